use crate::migrations::run_migrations;
use crate::models::{Client, Establishment, Reservation};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use mesabot_schema::{
    Conversation, ConversationContext, ConversationMode, ConversationTurn, TurnRole,
};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};
use tokio::task;
use uuid::Uuid;

/// All repositories of the pipeline behind one SQLite connection.
///
/// Writes go through `spawn_blocking`; the connection mutex keeps each call
/// atomic. Conversation state is only ever mutated by the single worker
/// task, so no further coordination is needed here.
#[derive(Clone)]
pub struct DataStore {
    db: Arc<Mutex<Connection>>,
}

impl DataStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn insert_establishment(&self, establishment: Establishment) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO establishments (id, name, routing_phone_id)
                VALUES (?1, ?2, ?3)
                "#,
                params![
                    establishment.id.to_string(),
                    establishment.name,
                    establishment.routing_phone_id,
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn find_establishment_by_routing(
        &self,
        routing_phone_id: &str,
    ) -> Result<Option<Establishment>> {
        let db = Arc::clone(&self.db);
        let routing_phone_id = routing_phone_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, name, routing_phone_id
                FROM establishments
                WHERE routing_phone_id = ?1
                LIMIT 1
                "#,
            )?;
            let mut rows = stmt.query(params![routing_phone_id])?;
            if let Some(row) = rows.next()? {
                return Ok::<Option<Establishment>, anyhow::Error>(Some(row_to_establishment(
                    row,
                )?));
            }
            Ok::<Option<Establishment>, anyhow::Error>(None)
        })
        .await?
    }

    /// Looks up the client for (phone, establishment), creating it on first
    /// contact.
    pub async fn get_or_create_client(
        &self,
        phone: &str,
        establishment_id: Uuid,
    ) -> Result<Client> {
        let db = Arc::clone(&self.db);
        let phone = phone.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, phone, name, establishment_id, created_at
                FROM clients
                WHERE phone = ?1 AND establishment_id = ?2
                LIMIT 1
                "#,
            )?;
            let mut rows = stmt.query(params![phone, establishment_id.to_string()])?;
            if let Some(row) = rows.next()? {
                return Ok::<Client, anyhow::Error>(row_to_client(row)?);
            }
            drop(rows);
            drop(stmt);

            let client = Client {
                id: Uuid::new_v4(),
                phone,
                name: None,
                establishment_id,
                created_at: Utc::now(),
            };
            conn.execute(
                r#"
                INSERT INTO clients (id, phone, name, establishment_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    client.id.to_string(),
                    client.phone,
                    client.name,
                    client.establishment_id.to_string(),
                    client.created_at.to_rfc3339(),
                ],
            )?;
            Ok::<Client, anyhow::Error>(client)
        })
        .await?
    }

    /// Looks up the conversation for (client, establishment), creating it in
    /// automated mode with empty context on the client's first message.
    pub async fn get_or_create_conversation(
        &self,
        client_id: Uuid,
        establishment_id: Uuid,
    ) -> Result<Conversation> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, client_id, establishment_id, mode, assigned_agent, context
                FROM conversations
                WHERE client_id = ?1 AND establishment_id = ?2
                LIMIT 1
                "#,
            )?;
            let mut rows = stmt.query(params![
                client_id.to_string(),
                establishment_id.to_string()
            ])?;
            if let Some(row) = rows.next()? {
                return Ok::<Conversation, anyhow::Error>(row_to_conversation(row)?);
            }
            drop(rows);
            drop(stmt);

            let conversation = Conversation {
                id: Uuid::new_v4(),
                mode: ConversationMode::Automated,
                assigned_agent: None,
                client_id,
                establishment_id,
                context: ConversationContext::default(),
            };
            let now = Utc::now().to_rfc3339();
            conn.execute(
                r#"
                INSERT INTO conversations (
                    id, client_id, establishment_id, mode, assigned_agent, context,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    conversation.id.to_string(),
                    conversation.client_id.to_string(),
                    conversation.establishment_id.to_string(),
                    conversation.mode.as_str(),
                    conversation.assigned_agent,
                    serde_json::to_string(&conversation.context)?,
                    now,
                    now,
                ],
            )?;
            Ok::<Conversation, anyhow::Error>(conversation)
        })
        .await?
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, client_id, establishment_id, mode, assigned_agent, context
                FROM conversations
                WHERE id = ?1
                LIMIT 1
                "#,
            )?;
            let mut rows = stmt.query(params![id.to_string()])?;
            if let Some(row) = rows.next()? {
                return Ok::<Option<Conversation>, anyhow::Error>(Some(row_to_conversation(
                    row,
                )?));
            }
            Ok::<Option<Conversation>, anyhow::Error>(None)
        })
        .await?
    }

    pub async fn update_conversation_mode(
        &self,
        id: Uuid,
        mode: ConversationMode,
        assigned_agent: Option<String>,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let changed = conn.execute(
                r#"
                UPDATE conversations
                SET mode = ?2, assigned_agent = ?3, updated_at = ?4
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    mode.as_str(),
                    assigned_agent,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            if changed == 0 {
                return Err(anyhow!("conversation not found: {id}"));
            }
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn update_conversation_context(
        &self,
        id: Uuid,
        context: &ConversationContext,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let context = serde_json::to_string(context)?;
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let changed = conn.execute(
                r#"
                UPDATE conversations
                SET context = ?2, updated_at = ?3
                WHERE id = ?1
                "#,
                params![id.to_string(), context, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(anyhow!("conversation not found: {id}"));
            }
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    /// Appends a message to the conversation history. Returns `false` when a
    /// row with the same provider message id already exists (re-delivered
    /// webhook), in which case nothing is written.
    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        role: TurnRole,
        text: &str,
        provider_message_id: Option<&str>,
    ) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let text = text.to_owned();
        let provider_message_id = provider_message_id.map(str::to_owned);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO messages (
                    id, conversation_id, role, text, provider_message_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    conversation_id.to_string(),
                    role.as_str(),
                    text,
                    provider_message_id,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok::<bool, anyhow::Error>(inserted > 0)
        })
        .await?
    }

    /// The most recent turns of a conversation, oldest first.
    pub async fn recent_turns(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT role, text, created_at
                FROM messages
                WHERE conversation_id = ?1
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(
                params![conversation_id.to_string(), limit as i64],
                row_to_turn,
            )?;
            let mut turns = Vec::new();
            for row in rows {
                turns.push(row?);
            }
            turns.reverse();
            Ok::<Vec<ConversationTurn>, anyhow::Error>(turns)
        })
        .await?
    }

    /// Commits a reservation keyed on its pending-action id. Returns `true`
    /// when the reservation was newly created, `false` when that action id
    /// was already committed.
    pub async fn commit_reservation(
        &self,
        action_id: Uuid,
        conversation_id: Uuid,
        details: &serde_json::Value,
    ) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let details = details.to_string();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let inserted = conn.execute(
                r#"
                INSERT INTO reservations (id, action_id, conversation_id, details, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(action_id) DO NOTHING
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    action_id.to_string(),
                    conversation_id.to_string(),
                    details,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok::<bool, anyhow::Error>(inserted > 0)
        })
        .await?
    }

    pub async fn get_reservation_by_action(&self, action_id: Uuid) -> Result<Option<Reservation>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, action_id, conversation_id, details, created_at
                FROM reservations
                WHERE action_id = ?1
                LIMIT 1
                "#,
            )?;
            let mut rows = stmt.query(params![action_id.to_string()])?;
            if let Some(row) = rows.next()? {
                return Ok::<Option<Reservation>, anyhow::Error>(Some(row_to_reservation(row)?));
            }
            Ok::<Option<Reservation>, anyhow::Error>(None)
        })
        .await?
    }

    pub async fn count_reservations(&self, conversation_id: Uuid) -> Result<usize> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reservations WHERE conversation_id = ?1",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )?;
            Ok::<usize, anyhow::Error>(count as usize)
        })
        .await?
    }
}

fn parse_uuid_sql(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| anyhow!("invalid uuid in database: {e}"))
}

fn parse_datetime_sql(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow!("invalid timestamp in database: {e}"))?
        .with_timezone(&Utc))
}

fn row_to_establishment(row: &Row<'_>) -> Result<Establishment> {
    let id: String = row.get(0)?;
    Ok(Establishment {
        id: parse_uuid_sql(&id)?,
        name: row.get(1)?,
        routing_phone_id: row.get(2)?,
    })
}

fn row_to_client(row: &Row<'_>) -> Result<Client> {
    let id: String = row.get(0)?;
    let establishment_id: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(Client {
        id: parse_uuid_sql(&id)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        establishment_id: parse_uuid_sql(&establishment_id)?,
        created_at: parse_datetime_sql(&created_at)?,
    })
}

fn row_to_reservation(row: &Row<'_>) -> Result<Reservation> {
    let id: String = row.get(0)?;
    let action_id: String = row.get(1)?;
    let conversation_id: String = row.get(2)?;
    let details_raw: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(Reservation {
        id: parse_uuid_sql(&id)?,
        action_id: parse_uuid_sql(&action_id)?,
        conversation_id: parse_uuid_sql(&conversation_id)?,
        details: serde_json::from_str(&details_raw)?,
        created_at: parse_datetime_sql(&created_at)?,
    })
}

fn row_to_conversation(row: &Row<'_>) -> Result<Conversation> {
    let id: String = row.get(0)?;
    let client_id: String = row.get(1)?;
    let establishment_id: String = row.get(2)?;
    let mode_raw: String = row.get(3)?;
    let context_raw: String = row.get(5)?;
    Ok(Conversation {
        id: parse_uuid_sql(&id)?,
        client_id: parse_uuid_sql(&client_id)?,
        establishment_id: parse_uuid_sql(&establishment_id)?,
        mode: ConversationMode::parse(&mode_raw)
            .ok_or_else(|| anyhow!("unknown conversation mode: {mode_raw}"))?,
        assigned_agent: row.get(4)?,
        context: serde_json::from_str(&context_raw)?,
    })
}

fn row_to_turn(row: &Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let role_raw: String = row.get(0)?;
    let created_at: String = row.get(2)?;
    Ok(ConversationTurn {
        role: TurnRole::parse(&role_raw).unwrap_or(TurnRole::User),
        text: row.get(1)?,
        at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
