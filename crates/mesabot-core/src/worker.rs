use anyhow::Result;
use chrono::Utc;
use mesabot_queue::QueueReceiver;
use mesabot_schema::WebhookEnvelope;
use mesabot_store::DataStore;
use tokio_util::sync::CancellationToken;

use crate::assistant::AssistantOrchestrator;
use crate::dispatch::DecisionDispatcher;
use crate::interceptor;
use crate::processor::{ConversationProcessor, ProcessingOutcome};

/// The single consumer of the processing queue.
///
/// Exactly one worker task runs per process; everything that mutates
/// conversation state happens here, which is what makes per-conversation
/// locking unnecessary. One failing envelope never stops the next.
pub struct Worker {
    receiver: QueueReceiver,
    processor: ConversationProcessor,
    assistant: AssistantOrchestrator,
    dispatcher: DecisionDispatcher,
    store: DataStore,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        receiver: QueueReceiver,
        processor: ConversationProcessor,
        assistant: AssistantOrchestrator,
        dispatcher: DecisionDispatcher,
        store: DataStore,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            processor,
            assistant,
            dispatcher,
            store,
            shutdown,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!("conversation worker started");
        while let Some(envelope) = self.receiver.recv(&self.shutdown).await {
            let queued_ms = (Utc::now() - envelope.received_at).num_milliseconds();
            tracing::debug!(
                message_id = %envelope.message_id(),
                queued_ms,
                "envelope dequeued"
            );
            if let Err(error) = self.handle_envelope(&envelope).await {
                tracing::error!(
                    message_id = %envelope.message_id(),
                    error = %error,
                    "envelope processing failed, moving on"
                );
            }
        }
        tracing::info!("conversation worker stopped");
    }

    async fn handle_envelope(&self, envelope: &WebhookEnvelope) -> Result<()> {
        let mut result = match self.processor.process(envelope).await? {
            ProcessingOutcome::Ignore(reason) => {
                tracing::debug!(
                    message_id = %envelope.message_id(),
                    reason,
                    "envelope ignored"
                );
                return Ok(());
            }
            ProcessingOutcome::Ready(result) => result,
        };

        let outcome = interceptor::intercept(&mut result.context, &result.user_text, Utc::now());
        if outcome.context_modified {
            self.store
                .update_conversation_context(result.conversation_id, &result.context)
                .await?;
        }

        let decision = match outcome.decision {
            Some(decision) => {
                tracing::info!(
                    conversation_id = %result.conversation_id,
                    "pending action intercepted, assistant not invoked"
                );
                decision
            }
            None => {
                self.assistant
                    .generate_decision(
                        result.conversation_id,
                        &result.user_text,
                        &result.history,
                        &result.context,
                    )
                    .await
            }
        };

        self.dispatcher.handle(&decision, &result).await
    }
}
