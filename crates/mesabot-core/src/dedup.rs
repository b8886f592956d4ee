use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Short-lived record of recently seen provider message ids.
///
/// Webhook providers re-deliver on timeout; the first registration of an id
/// within the retention window wins and every repeat is rejected. An absent
/// or empty id cannot be deduplicated and always passes.
pub struct DedupCache {
    entries: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Returns `true` exactly once per non-empty id within the retention
    /// window. Expired entries are swept on the way in.
    pub async fn try_register(&self, message_id: Option<&str>) -> bool {
        let Some(id) = message_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return true;
        };

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < self.window);

        if entries.contains_key(id) {
            tracing::debug!(message_id = %id, "duplicate webhook delivery absorbed");
            return false;
        }
        entries.insert(id.to_string(), now);
        true
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
