use chrono::{DateTime, Utc};
use mesabot_schema::{AssistantDecision, ConversationContext, HandoverAction, PendingActionKind};

/// Outcome of checking a conversation's pending-action state against a new
/// inbound message.
#[derive(Debug)]
pub struct InterceptOutcome {
    pub intercepted: bool,
    pub decision: Option<AssistantDecision>,
    /// True when the context was mutated and must be persisted.
    pub context_modified: bool,
}

impl InterceptOutcome {
    fn pass() -> Self {
        Self {
            intercepted: false,
            decision: None,
            context_modified: false,
        }
    }
}

const AFFIRMATIVE: [&str; 10] = [
    "sim", "s", "ok", "claro", "pode", "confirmo", "confirmar", "confirma", "isso", "yes",
];
const NEGATIVE: [&str; 8] = [
    "não", "nao", "n", "cancelar", "cancela", "deixa", "no", "melhor não",
];

/// When the conversation is mid-way through a confirmation flow, interprets
/// the new message as the answer to the pending question and synthesizes the
/// decision locally; the assistant is never invoked for intercepted turns.
///
/// An expired pending action is cleared silently and the message flows on to
/// the assistant.
pub fn intercept(
    context: &mut ConversationContext,
    text: &str,
    now: DateTime<Utc>,
) -> InterceptOutcome {
    let Some(kind) = context.pending_action_kind else {
        return InterceptOutcome::pass();
    };
    if context.pending_action_id.is_none() {
        return InterceptOutcome::pass();
    }

    if !context.has_live_pending(now) {
        tracing::debug!("pending action expired, resuming normal assistant flow");
        context.clear_pending();
        return InterceptOutcome {
            intercepted: false,
            decision: None,
            context_modified: true,
        };
    }

    if is_affirmative(text) {
        // Leave the pending pair armed: the dispatcher commits it and then
        // clears the context.
        let decision = match kind {
            PendingActionKind::Reservation => AssistantDecision {
                reply: "Perfeito, sua reserva está confirmada!".to_string(),
                handover: HandoverAction::Confirm,
                agent_prompt: None,
                reservation_confirmed: true,
                details: None,
            },
            PendingActionKind::Handover => AssistantDecision {
                reply: "Certo, vou te transferir para um de nossos atendentes.".to_string(),
                handover: HandoverAction::Confirm,
                agent_prompt: Some(
                    "Cliente confirmou que deseja atendimento humano.".to_string(),
                ),
                reservation_confirmed: false,
                details: None,
            },
        };
        return InterceptOutcome {
            intercepted: true,
            decision: Some(decision),
            context_modified: false,
        };
    }

    if is_negative(text) {
        context.clear_pending();
        return InterceptOutcome {
            intercepted: true,
            decision: Some(AssistantDecision::reply(
                "Sem problemas! Posso ajudar com mais alguma coisa?",
            )),
            context_modified: true,
        };
    }

    // Neither yes nor no: repeat the question and keep the pending action
    // alive until it expires.
    let reply = match kind {
        PendingActionKind::Reservation => {
            "Só para confirmar: posso registrar a reserva? Responda sim ou não."
        }
        PendingActionKind::Handover => {
            "Só para confirmar: deseja falar com um atendente? Responda sim ou não."
        }
    };
    InterceptOutcome {
        intercepted: true,
        decision: Some(AssistantDecision::reply(reply)),
        context_modified: false,
    }
}

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['!', '.', '?', ','])
        .trim()
        .to_lowercase()
}

fn is_affirmative(text: &str) -> bool {
    let normalized = normalize(text);
    AFFIRMATIVE.contains(&normalized.as_str())
}

fn is_negative(text: &str) -> bool {
    let normalized = normalize(text);
    NEGATIVE.contains(&normalized.as_str())
}
