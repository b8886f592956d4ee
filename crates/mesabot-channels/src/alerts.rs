use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mesabot_core::AlertSender;

/// Posts operator notifications to a plain webhook (Slack-style
/// `{"text": ...}` body).
pub struct WebhookAlertSender {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookAlertSender {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl AlertSender for WebhookAlertSender {
    async fn notify(&self, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("alert webhook failed ({status})"));
        }
        Ok(())
    }
}
