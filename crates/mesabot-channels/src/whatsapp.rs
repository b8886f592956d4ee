use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mesabot_core::MessageSender;
use serde::Serialize;

/// Sends reply text through the WhatsApp Cloud API
/// (`POST {api_base}/{phone_id}/messages`).
pub struct WhatsAppSender {
    client: reqwest::Client,
    api_base: String,
    phone_id: String,
    access_token: String,
}

impl WhatsAppSender {
    pub fn new(
        api_base: impl Into<String>,
        phone_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            phone_id: phone_id.into(),
            access_token: access_token.into(),
        }
    }
}

#[derive(Serialize)]
struct OutboundPayload<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: OutboundText<'a>,
}

#[derive(Serialize)]
struct OutboundText<'a> {
    body: &'a str,
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    async fn send_text(&self, to_phone: &str, text: &str) -> Result<()> {
        let url = format!("{}/{}/messages", self.api_base, self.phone_id);
        let payload = OutboundPayload {
            messaging_product: "whatsapp",
            to: to_phone,
            message_type: "text",
            text: OutboundText { body: text },
        };

        let resp = self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.access_token))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("whatsapp send failed ({status}): {body}"));
        }
        tracing::debug!(to = %to_phone, chars = text.len(), "whatsapp message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_text_posts_cloud_api_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/5511888880000/messages"))
            .and(header("authorization", "Bearer token-123"))
            .and(body_partial_json(serde_json::json!({
                "messaging_product": "whatsapp",
                "to": "5511999990000",
                "type": "text",
                "text": {"body": "Olá!"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "wamid.out.1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WhatsAppSender::new(server.uri(), "5511888880000", "token-123");
        sender.send_text("5511999990000", "Olá!").await.unwrap();
    }

    #[tokio::test]
    async fn send_text_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/5511888880000/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let sender = WhatsAppSender::new(server.uri(), "5511888880000", "bad");
        let err = sender.send_text("5511999990000", "oi").await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid token"));
    }
}
