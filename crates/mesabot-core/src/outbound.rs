use anyhow::Result;
use async_trait::async_trait;

/// Delivers reply text to the end user's messaging channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to_phone: &str, text: &str) -> Result<()>;
}

/// Notifies the human operator channel on handover and committed
/// reservations.
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}
