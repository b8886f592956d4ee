use std::sync::Arc;

use mesabot_core::DedupCache;
use mesabot_queue::QueueSender;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub dedup: Arc<DedupCache>,
    pub queue: QueueSender,
    /// Token the provider echoes during the webhook verification handshake.
    pub verify_token: String,
}
