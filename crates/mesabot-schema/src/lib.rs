use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound customer message as delivered by the webhook boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessageEnvelope {
    /// Provider-assigned message id; absent when the provider omits it.
    #[serde(default)]
    pub message_id: Option<String>,
    pub from_phone: String,
    pub text: String,
    pub at: DateTime<Utc>,
    /// The business phone-number-routing id the message was sent to.
    pub routing_phone_id: String,
}

/// Normalized envelope plus the identifiers resolved during processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingInput {
    pub envelope: InboundMessageEnvelope,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub establishment_id: Option<Uuid>,
}

impl ProcessingInput {
    pub fn from_envelope(envelope: InboundMessageEnvelope) -> Self {
        Self {
            envelope,
            conversation_id: None,
            establishment_id: None,
        }
    }
}

/// The unit of work carried through the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub input: ProcessingInput,
    pub received_at: DateTime<Utc>,
}

impl WebhookEnvelope {
    pub fn new(input: ProcessingInput) -> Self {
        Self {
            input,
            received_at: Utc::now(),
        }
    }

    /// Provider message id, for log correlation. Empty string when absent.
    pub fn message_id(&self) -> &str {
        self.input.envelope.message_id.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Automated,
    HumanHandoff,
    Paused,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automated => "automated",
            Self::HumanHandoff => "human_handoff",
            Self::Paused => "paused",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "automated" => Some(Self::Automated),
            "human_handoff" => Some(Self::HumanHandoff),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingActionKind {
    Reservation,
    Handover,
}

impl PendingActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reservation => "reservation",
            Self::Handover => "handover",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "reservation" => Some(Self::Reservation),
            "handover" => Some(Self::Handover),
            _ => None,
        }
    }
}

/// Multi-turn state attached to a conversation. The pending-action pair is
/// set and cleared together; a context past `expires_at` must be ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub collected: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_action_id: Option<Uuid>,
    #[serde(default)]
    pub pending_action_kind: Option<PendingActionKind>,
}

impl ConversationContext {
    /// Arms a fresh pending action and returns its id.
    pub fn set_pending(&mut self, kind: PendingActionKind, expires_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.state = Some("awaiting_confirmation".to_string());
        self.pending_action_id = Some(id);
        self.pending_action_kind = Some(kind);
        self.expires_at = Some(expires_at);
        id
    }

    pub fn clear_pending(&mut self) {
        self.state = None;
        self.pending_action_id = None;
        self.pending_action_kind = None;
        self.expires_at = None;
    }

    /// True when a pending action exists and has not expired at `now`.
    pub fn has_live_pending(&self, now: DateTime<Utc>) -> bool {
        let armed = self.pending_action_id.is_some() && self.pending_action_kind.is_some();
        match (armed, self.expires_at) {
            (true, Some(expires_at)) => now < expires_at,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub mode: ConversationMode,
    #[serde(default)]
    pub assigned_agent: Option<String>,
    pub client_id: Uuid,
    pub establishment_id: Uuid,
    #[serde(default)]
    pub context: ConversationContext,
}

/// The assistant's declared next step regarding escalation to a human.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandoverAction {
    #[default]
    None,
    Ask,
    Confirm,
}

impl HandoverAction {
    /// Normalizes a raw handover string: trim, lowercase, closed set.
    /// Anything unrecognized (including empty) is `None`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "confirm" => Self::Confirm,
            "ask" => Self::Ask,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ask => "ask",
            Self::Confirm => "confirm",
        }
    }
}

/// One assistant invocation's outcome. Transient: only its effects are
/// persisted, never the decision itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantDecision {
    pub reply: String,
    #[serde(default)]
    pub handover: HandoverAction,
    #[serde(default)]
    pub agent_prompt: Option<String>,
    #[serde(default)]
    pub reservation_confirmed: bool,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl AssistantDecision {
    /// A plain reply with no escalation and no reservation effect.
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            handover: HandoverAction::None,
            agent_prompt: None,
            reservation_confirmed: false,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One history row handed to the assistant, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
}
