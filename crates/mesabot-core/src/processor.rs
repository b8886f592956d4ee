use anyhow::Result;
use mesabot_schema::{
    ConversationContext, ConversationMode, ConversationTurn, TurnRole, WebhookEnvelope,
};
use mesabot_store::DataStore;
use uuid::Uuid;

/// Everything the decision stages need about one validated inbound message.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub conversation_id: Uuid,
    pub establishment_id: Uuid,
    pub client_id: Uuid,
    pub client_phone: String,
    pub user_text: String,
    pub provider_message_id: Option<String>,
    /// Prior turns, oldest first; the current message is not included.
    pub history: Vec<ConversationTurn>,
    pub context: ConversationContext,
}

#[derive(Debug)]
pub enum ProcessingOutcome {
    /// Message the core cannot or should not route. Dropped with a log,
    /// never retried.
    Ignore(&'static str),
    Ready(Box<ProcessingResult>),
}

/// Validates an envelope and resolves it into a conversation: establishment
/// by routing phone, client and conversation get-or-create, idempotent
/// history append, bounded history load.
pub struct ConversationProcessor {
    store: DataStore,
    history_limit: usize,
}

impl ConversationProcessor {
    pub fn new(store: DataStore, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
        }
    }

    pub async fn process(&self, envelope: &WebhookEnvelope) -> Result<ProcessingOutcome> {
        let inbound = &envelope.input.envelope;
        let text = inbound.text.trim();
        if text.is_empty() {
            return Ok(ProcessingOutcome::Ignore("message has no usable text"));
        }

        let Some(establishment) = self
            .store
            .find_establishment_by_routing(&inbound.routing_phone_id)
            .await?
        else {
            tracing::warn!(
                routing_phone_id = %inbound.routing_phone_id,
                message_id = %envelope.message_id(),
                "no establishment for routing phone, dropping message"
            );
            return Ok(ProcessingOutcome::Ignore("unknown routing phone"));
        };

        let client = self
            .store
            .get_or_create_client(&inbound.from_phone, establishment.id)
            .await?;
        let conversation = self
            .store
            .get_or_create_conversation(client.id, establishment.id)
            .await?;

        // Second line of defense against re-delivery, independent of the
        // in-memory dedup cache: the provider message id is unique in the
        // history table.
        let appended = self
            .store
            .append_message(
                conversation.id,
                TurnRole::User,
                text,
                inbound.message_id.as_deref(),
            )
            .await?;
        if !appended {
            return Ok(ProcessingOutcome::Ignore("message already processed"));
        }

        if conversation.mode != ConversationMode::Automated {
            tracing::debug!(
                conversation_id = %conversation.id,
                mode = %conversation.mode.as_str(),
                "conversation not in automated mode, message stored for the human agent"
            );
            return Ok(ProcessingOutcome::Ignore("conversation not automated"));
        }

        // One extra row covers the message appended just above; dropping it
        // leaves only prior turns.
        let mut history = self
            .store
            .recent_turns(conversation.id, self.history_limit + 1)
            .await?;
        if history
            .last()
            .is_some_and(|turn| turn.role == TurnRole::User && turn.text == text)
        {
            history.pop();
        }
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }

        Ok(ProcessingOutcome::Ready(Box::new(ProcessingResult {
            conversation_id: conversation.id,
            establishment_id: establishment.id,
            client_id: client.id,
            client_phone: client.phone,
            user_text: text.to_string(),
            provider_message_id: inbound.message_id.clone(),
            history,
            context: conversation.context,
        })))
    }
}
