use anyhow::{anyhow, Result};
use mesabot_schema::WebhookEnvelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Creates the processing queue: many producers, exactly one consumer.
///
/// Unbounded on purpose: webhook handlers must return immediately, so
/// enqueue never waits on downstream processing.
pub fn channel() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<WebhookEnvelope>,
}

impl QueueSender {
    /// Hands an envelope to the worker. Fails only once the consumer side
    /// has shut down.
    pub fn enqueue(&self, envelope: WebhookEnvelope) -> Result<()> {
        let message_id = envelope.message_id().to_string();
        self.tx
            .send(envelope)
            .map_err(|_| anyhow!("processing queue is closed"))?;
        tracing::debug!(message_id = %message_id, "envelope enqueued");
        Ok(())
    }
}

pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<WebhookEnvelope>,
}

impl QueueReceiver {
    /// Waits for the next envelope in FIFO order. Returns `None` when the
    /// shutdown token fires or every producer is gone; items dequeued
    /// before cancellation are never lost.
    pub async fn recv(&mut self, shutdown: &CancellationToken) -> Option<WebhookEnvelope> {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("processing queue consumer stopping");
                None
            }
            envelope = self.rx.recv() => envelope,
        }
    }
}
