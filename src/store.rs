use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::types::{AllowListEntry, Contact};

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Durable-store seam. Contact rows carry the allow-list flag and the
/// serialized conversation history blob for their user.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn allow_entry(&self, user_id: &str) -> Option<AllowListEntry>;
    async fn get_history(&self, user_id: &str) -> Result<Option<String>, String>;
    async fn set_history(&self, user_id: &str, blob: &str) -> Result<(), String>;
    async fn clear_history(&self, user_id: &str) -> Result<(), String>;
    async fn contact_name(&self, user_id: &str) -> Option<String>;
    /// Records an inbound message from an allowed contact: refreshes the
    /// display name and bumps the message counters.
    async fn record_inbound(&self, user_id: &str, display_name: &str);
    async fn all_contacts(&self) -> Vec<Contact>;
    async fn allowed_contacts(&self) -> Vec<Contact>;
    async fn upsert_contact(
        &self,
        user_id: &str,
        name: &str,
        is_allowed: bool,
    ) -> Option<Contact>;
    async fn delete_contact(&self, user_id: &str) -> Result<(), String>;
}

pub struct PgContactStore {
    db: PgPool,
}

impl PgContactStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn parse_contact_row(row: sqlx::postgres::PgRow) -> Contact {
    Contact {
        whatsapp_id: row.get("whatsapp_id"),
        phone_number: row.get("phone_number"),
        name: row.get("name"),
        is_allowed: row.get("is_allowed"),
        message_count: row.get("message_count"),
        last_message_at: row.get("last_message_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const CONTACT_COLUMNS: &str = "whatsapp_id, phone_number, name, is_allowed, \
     message_count, last_message_at, created_at, updated_at";

#[async_trait]
impl ContactStore for PgContactStore {
    async fn allow_entry(&self, user_id: &str) -> Option<AllowListEntry> {
        let row = sqlx::query("SELECT whatsapp_id, name, is_allowed FROM contacts WHERE whatsapp_id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .ok()
            .flatten()?;
        Some(AllowListEntry {
            user_id: row.get("whatsapp_id"),
            display_name: row.get("name"),
            is_allowed: row.get("is_allowed"),
        })
    }

    async fn get_history(&self, user_id: &str) -> Result<Option<String>, String> {
        let blob: Option<Option<String>> =
            sqlx::query_scalar("SELECT chat_history FROM contacts WHERE whatsapp_id = $1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await
                .map_err(|err| format!("history read failed for {user_id}: {err}"))?;
        Ok(blob.flatten().filter(|b| !b.trim().is_empty()))
    }

    async fn set_history(&self, user_id: &str, blob: &str) -> Result<(), String> {
        sqlx::query(
            "UPDATE contacts SET chat_history = $1, updated_at = $2 WHERE whatsapp_id = $3",
        )
        .bind(blob)
        .bind(now_iso())
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(|err| format!("history write failed for {user_id}: {err}"))?;
        Ok(())
    }

    async fn clear_history(&self, user_id: &str) -> Result<(), String> {
        sqlx::query(
            "UPDATE contacts SET chat_history = NULL, updated_at = $1 WHERE whatsapp_id = $2",
        )
        .bind(now_iso())
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(|err| format!("history clear failed for {user_id}: {err}"))?;
        Ok(())
    }

    async fn contact_name(&self, user_id: &str) -> Option<String> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT name FROM contacts WHERE whatsapp_id = $1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await
                .ok()
                .flatten();
        name.filter(|n| !n.trim().is_empty())
    }

    async fn record_inbound(&self, user_id: &str, display_name: &str) {
        let now = now_iso();
        let result = sqlx::query(
            "UPDATE contacts \
             SET name = CASE WHEN $1 != '' THEN $1 ELSE name END, \
                 message_count = message_count + 1, \
                 last_message_at = $2, \
                 updated_at = $2 \
             WHERE whatsapp_id = $3",
        )
        .bind(display_name)
        .bind(&now)
        .bind(user_id)
        .execute(&self.db)
        .await;
        if let Err(err) = result {
            eprintln!("[store] contact update failed for {user_id}: {err}");
        }
    }

    async fn all_contacts(&self) -> Vec<Contact> {
        sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY name ASC"
        ))
        .fetch_all(&self.db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(parse_contact_row)
        .collect()
    }

    async fn allowed_contacts(&self) -> Vec<Contact> {
        sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE is_allowed = true ORDER BY name ASC"
        ))
        .fetch_all(&self.db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(parse_contact_row)
        .collect()
    }

    async fn upsert_contact(
        &self,
        user_id: &str,
        name: &str,
        is_allowed: bool,
    ) -> Option<Contact> {
        let now = now_iso();
        let phone = crate::transport::chat_id_phone(user_id);
        let row = sqlx::query(&format!(
            "INSERT INTO contacts (whatsapp_id, phone_number, name, is_allowed, \
                                   message_count, last_message_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 0, '', $5, $5) \
             ON CONFLICT (whatsapp_id) DO UPDATE \
             SET name = EXCLUDED.name, is_allowed = EXCLUDED.is_allowed, updated_at = $5 \
             RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(user_id)
        .bind(phone)
        .bind(name)
        .bind(is_allowed)
        .bind(&now)
        .fetch_optional(&self.db)
        .await
        .ok()
        .flatten()?;
        Some(parse_contact_row(row))
    }

    async fn delete_contact(&self, user_id: &str) -> Result<(), String> {
        sqlx::query("DELETE FROM contacts WHERE whatsapp_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await
            .map_err(|err| format!("contact delete failed for {user_id}: {err}"))?;
        Ok(())
    }
}
