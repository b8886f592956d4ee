use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The venue a conversation belongs to, keyed for lookup by the business
/// phone-number-routing id the provider attaches to inbound traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Establishment {
    pub id: Uuid,
    pub name: String,
    pub routing_phone_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub phone: String,
    pub name: Option<String>,
    pub establishment_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A committed reservation. `action_id` is the pending-action id the commit
/// was keyed on; the UNIQUE constraint on it is what makes commits
/// idempotent against retried confirm decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub action_id: Uuid,
    pub conversation_id: Uuid,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
