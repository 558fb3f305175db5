use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::Dispatcher;
use crate::realtime::Broadcaster;
use crate::session::SessionManager;
use crate::store::ContactStore;
use crate::transport::ChatTransport;

/// A contact record doubles as the allow-list entry: only rows with
/// `is_allowed = true` pass the gate into the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub whatsapp_id: String,
    pub phone_number: String,
    pub name: String,
    pub is_allowed: bool,
    pub message_count: i64,
    pub last_message_at: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct AllowListEntry {
    pub user_id: String,
    pub display_name: String,
    pub is_allowed: bool,
}

/// Inbound message event normalized from the transport webhook.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from_id: String,
    pub display_name: String,
    pub text: String,
    pub has_media: bool,
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatus {
    pub is_ready: bool,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
    #[serde(rename = "type")]
    pub log_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageEvent {
    pub contact_name: String,
    pub contact_id: String,
    pub message: String,
    pub has_media: bool,
    pub media_type: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponseEvent {
    pub contact_name: String,
    pub contact_id: String,
    pub response: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessageEvent {
    pub contact_name: String,
    pub contact_id: String,
    pub message: String,
    pub timestamp: String,
}

pub struct AppState {
    pub store: Arc<dyn ContactStore>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub broadcaster: Arc<Broadcaster>,
    pub transport: Arc<dyn ChatTransport>,
    pub webhook_verify_token: String,
    pub webhook_app_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactBody {
    pub name: String,
    #[serde(default)]
    pub is_allowed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct EventEnvelopeIn {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}
