use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use mesabot_schema::{AssistantDecision, ConversationMode, HandoverAction, PendingActionKind, TurnRole};
use mesabot_store::DataStore;
use uuid::Uuid;

use crate::outbound::{AlertSender, MessageSender};
use crate::processor::ProcessingResult;

/// Executes the side effects of a decision: reply delivery, pending-action
/// bookkeeping, handover mode transition, reservation commit.
pub struct DecisionDispatcher {
    store: DataStore,
    sender: Arc<dyn MessageSender>,
    alerts: Option<Arc<dyn AlertSender>>,
    pending_ttl: TimeDelta,
}

impl DecisionDispatcher {
    pub fn new(
        store: DataStore,
        sender: Arc<dyn MessageSender>,
        alerts: Option<Arc<dyn AlertSender>>,
        pending_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            sender,
            alerts,
            pending_ttl: TimeDelta::seconds(pending_ttl_secs),
        }
    }

    /// Errors propagate to the worker's per-message isolation; side effects
    /// already applied stay applied, and reservation commits are idempotent
    /// against a retried confirm.
    pub async fn handle(
        &self,
        decision: &AssistantDecision,
        result: &ProcessingResult,
    ) -> Result<()> {
        if !decision.reply.trim().is_empty() {
            self.sender
                .send_text(&result.client_phone, &decision.reply)
                .await?;
            self.store
                .append_message(
                    result.conversation_id,
                    TurnRole::Assistant,
                    &decision.reply,
                    None,
                )
                .await?;
        }

        match decision.handover {
            HandoverAction::None => Ok(()),
            HandoverAction::Ask => self.arm_pending(decision, result).await,
            HandoverAction::Confirm => self.commit_pending(decision, result).await,
        }
    }

    /// `ask` arms a fresh pending action and leaves the mode untouched. A
    /// decision already carrying the reservation data pends a reservation;
    /// otherwise the open question is whether to hand over to a human.
    async fn arm_pending(
        &self,
        decision: &AssistantDecision,
        result: &ProcessingResult,
    ) -> Result<()> {
        let kind = if decision.reservation_confirmed {
            PendingActionKind::Reservation
        } else {
            PendingActionKind::Handover
        };

        let mut context = result.context.clone();
        let action_id = context.set_pending(kind, Utc::now() + self.pending_ttl);
        self.store
            .update_conversation_context(result.conversation_id, &context)
            .await?;
        tracing::info!(
            conversation_id = %result.conversation_id,
            action_id = %action_id,
            kind = %kind.as_str(),
            "pending action armed, awaiting customer confirmation"
        );
        Ok(())
    }

    async fn commit_pending(
        &self,
        decision: &AssistantDecision,
        result: &ProcessingResult,
    ) -> Result<()> {
        let mut context = result.context.clone();
        let (action_id, kind) = match (context.pending_action_id, context.pending_action_kind) {
            (Some(id), Some(kind)) => (id, kind),
            // Confirm without an armed action: the decision stands on its
            // own (e.g. a one-shot tool-call reservation).
            _ => (
                Uuid::new_v4(),
                if decision.reservation_confirmed {
                    PendingActionKind::Reservation
                } else {
                    PendingActionKind::Handover
                },
            ),
        };

        if kind == PendingActionKind::Handover {
            self.store
                .update_conversation_mode(
                    result.conversation_id,
                    ConversationMode::HumanHandoff,
                    None,
                )
                .await?;
            let text = decision
                .agent_prompt
                .clone()
                .unwrap_or_else(|| "Cliente aguardando atendimento humano.".to_string());
            self.notify(result, &text).await;
            tracing::info!(
                conversation_id = %result.conversation_id,
                "conversation handed over to human agent"
            );
        }

        if kind == PendingActionKind::Reservation || decision.reservation_confirmed {
            let details = decision.details.clone().unwrap_or_else(|| {
                serde_json::json!({
                    "agent_prompt": decision.agent_prompt,
                    "reply": decision.reply,
                })
            });
            let committed = self
                .store
                .commit_reservation(action_id, result.conversation_id, &details)
                .await?;
            if committed {
                let text = decision
                    .agent_prompt
                    .clone()
                    .unwrap_or_else(|| "Nova reserva registrada pelo assistente.".to_string());
                self.notify(result, &text).await;
                tracing::info!(
                    conversation_id = %result.conversation_id,
                    action_id = %action_id,
                    "reservation committed"
                );
            } else {
                tracing::debug!(
                    conversation_id = %result.conversation_id,
                    action_id = %action_id,
                    "reservation already committed for this action"
                );
            }
        }

        context.clear_pending();
        self.store
            .update_conversation_context(result.conversation_id, &context)
            .await?;
        Ok(())
    }

    /// Operator alerts are best-effort: a failed notification is logged and
    /// never fails the dispatch.
    async fn notify(&self, result: &ProcessingResult, text: &str) {
        let Some(alerts) = self.alerts.as_ref() else {
            return;
        };
        if let Err(error) = alerts.notify(text).await {
            tracing::warn!(
                conversation_id = %result.conversation_id,
                error = %error,
                "operator alert failed"
            );
        }
    }
}
