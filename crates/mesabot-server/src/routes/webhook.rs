use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use mesabot_schema::{InboundMessageEnvelope, ProcessingInput, WebhookEnvelope};
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/whatsapp", get(verify).post(receive))
}

#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Webhook verification handshake: the provider sends its challenge and
/// expects it echoed back when the token matches.
async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<String, StatusCode> {
    let mode_ok = params.mode.as_deref() == Some("subscribe");
    let token_ok = params.verify_token.as_deref() == Some(state.verify_token.as_str());
    if mode_ok && token_ok {
        return Ok(params.challenge.unwrap_or_default());
    }
    Err(StatusCode::FORBIDDEN)
}

// WhatsApp Cloud API webhook shape: entry -> changes -> value -> messages.

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    phone_number_id: String,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Option<String>,
    from: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    text: Option<TextBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

/// Receives a webhook delivery, gates each message through the dedup cache
/// and enqueues the survivors. Always answers immediately; processing
/// happens on the worker.
async fn receive(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<serde_json::Value> {
    let mut accepted = 0usize;

    for envelope in extract_envelopes(payload) {
        if !state.dedup.try_register(envelope.message_id.as_deref()).await {
            continue;
        }
        let queued = WebhookEnvelope::new(ProcessingInput::from_envelope(envelope));
        if let Err(error) = state.queue.enqueue(queued) {
            tracing::error!(error = %error, "failed to enqueue webhook envelope");
            continue;
        }
        accepted += 1;
    }

    Json(serde_json::json!({ "accepted": accepted }))
}

fn extract_envelopes(payload: WebhookPayload) -> Vec<InboundMessageEnvelope> {
    let mut envelopes = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            let Some(metadata) = change.value.metadata else {
                continue;
            };
            for message in change.value.messages {
                let Some(text) = message.text else {
                    // Media and reaction payloads carry no text body.
                    continue;
                };
                envelopes.push(InboundMessageEnvelope {
                    message_id: message.id,
                    from_phone: message.from,
                    text: text.body,
                    at: parse_provider_timestamp(message.timestamp.as_deref()),
                    routing_phone_id: metadata.phone_number_id.clone(),
                });
            }
        }
    }
    envelopes
}

/// Provider timestamps are unix seconds as a string; anything unparseable
/// falls back to arrival time.
fn parse_provider_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{body::Body, http::Request, http::StatusCode, Router};
    use mesabot_core::DedupCache;
    use mesabot_queue::QueueReceiver;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    use crate::state::AppState;

    fn setup_app() -> (Router, QueueReceiver) {
        let (queue, receiver) = mesabot_queue::channel();
        let state = AppState {
            dedup: Arc::new(DedupCache::new(Duration::from_secs(900))),
            queue,
            verify_token: "segredo".to_string(),
        };
        (
            Router::new()
                .nest("/webhook", super::router())
                .with_state(state),
            receiver,
        )
    }

    fn sample_payload(message_id: &str, text: &str) -> String {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "123",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "metadata": {
                            "display_phone_number": "5511888880000",
                            "phone_number_id": "5511888880000"
                        },
                        "messages": [{
                            "id": message_id,
                            "from": "5511999990000",
                            "timestamp": "1754400000",
                            "type": "text",
                            "text": {"body": text}
                        }]
                    }
                }]
            }]
        })
        .to_string()
    }

    async fn post_payload(app: &Router, body: String) -> StatusCode {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/whatsapp")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .expect("build request"),
            )
            .await
            .expect("send request");
        response.status()
    }

    #[tokio::test]
    async fn verification_echoes_challenge_on_matching_token() {
        let (app, _rx) = setup_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/whatsapp?hub.mode=subscribe&hub.verify_token=segredo&hub.challenge=42")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("send request");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"42");
    }

    #[tokio::test]
    async fn verification_rejects_wrong_token() {
        let (app, _rx) = setup_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/whatsapp?hub.mode=subscribe&hub.verify_token=errado&hub.challenge=42")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("send request");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn inbound_message_is_normalized_and_enqueued() {
        let (app, mut rx) = setup_app();
        let status = post_payload(&app, sample_payload("wamid.1", "quero reservar")).await;
        assert_eq!(status, StatusCode::OK);

        let shutdown = CancellationToken::new();
        let envelope = rx.recv(&shutdown).await.expect("envelope enqueued");
        let inbound = &envelope.input.envelope;
        assert_eq!(inbound.message_id.as_deref(), Some("wamid.1"));
        assert_eq!(inbound.from_phone, "5511999990000");
        assert_eq!(inbound.text, "quero reservar");
        assert_eq!(inbound.routing_phone_id, "5511888880000");
    }

    #[tokio::test]
    async fn duplicate_delivery_is_absorbed() {
        let (app, mut rx) = setup_app();
        post_payload(&app, sample_payload("wamid.1", "oi")).await;
        post_payload(&app, sample_payload("wamid.1", "oi")).await;
        post_payload(&app, sample_payload("wamid.2", "oi de novo")).await;

        let shutdown = CancellationToken::new();
        let first = rx.recv(&shutdown).await.unwrap();
        assert_eq!(first.input.envelope.message_id.as_deref(), Some("wamid.1"));
        let second = rx.recv(&shutdown).await.unwrap();
        assert_eq!(second.input.envelope.message_id.as_deref(), Some("wamid.2"));

        shutdown.cancel();
        assert!(rx.recv(&shutdown).await.is_none());
    }

    #[tokio::test]
    async fn non_text_messages_are_skipped() {
        let (app, mut rx) = setup_app();
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": {"phone_number_id": "5511888880000"},
                        "messages": [{
                            "id": "wamid.img",
                            "from": "5511999990000",
                            "type": "image"
                        }]
                    }
                }]
            }]
        })
        .to_string();
        let status = post_payload(&app, payload).await;
        assert_eq!(status, StatusCode::OK);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(rx.recv(&shutdown).await.is_none());
    }
}
