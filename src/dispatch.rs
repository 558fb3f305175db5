use std::sync::Arc;

use serde_json::json;

use crate::realtime::{now_clock, Broadcaster};
use crate::session::SessionManager;
use crate::store::ContactStore;
use crate::transport::{chat_id_phone, ChatTransport};
use crate::types::{AdminMessageEvent, AiResponseEvent, InboundMessage, UserMessageEvent};

/// Drives an inbound message through the pipeline: gate check, dashboard
/// broadcast, typing signal, AI exchange, reply delivery. Also carries the
/// parallel operator-authored send path, which bypasses both the gate and
/// the session manager.
pub struct Dispatcher {
    store: Arc<dyn ContactStore>,
    sessions: Arc<SessionManager>,
    transport: Arc<dyn ChatTransport>,
    broadcaster: Arc<Broadcaster>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ContactStore>,
        sessions: Arc<SessionManager>,
        transport: Arc<dyn ChatTransport>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            sessions,
            transport,
            broadcaster,
        }
    }

    pub async fn handle_inbound(&self, inbound: InboundMessage) {
        // The gate runs per message; history survives a mid-session disallow.
        let entry = self.store.allow_entry(&inbound.from_id).await;
        let allowed = entry.as_ref().map(|e| e.is_allowed).unwrap_or(false);
        if !allowed {
            self.broadcaster
                .log(
                    format!(
                        "Message from unauthorized contact: ({}): \"{}\"",
                        inbound.from_id, inbound.text
                    ),
                    "unauthorized",
                )
                .await;
            return;
        }

        let contact_name = resolve_name(
            entry.as_ref().map(|e| e.display_name.as_str()),
            &inbound.display_name,
            &inbound.from_id,
        );
        self.store
            .record_inbound(&inbound.from_id, &inbound.display_name)
            .await;

        self.broadcaster
            .emit(
                "user-message",
                UserMessageEvent {
                    contact_name: contact_name.clone(),
                    contact_id: inbound.from_id.clone(),
                    message: inbound.text.clone(),
                    has_media: inbound.has_media,
                    media_type: inbound.media_type.clone(),
                    timestamp: now_clock(),
                },
            )
            .await;
        self.broadcaster
            .log(
                format!(
                    "Message from {} ({}): \"{}\"",
                    contact_name, inbound.from_id, inbound.text
                ),
                "message",
            )
            .await;

        self.broadcaster
            .emit(
                "typing",
                json!({ "contactId": inbound.from_id, "active": true }),
            )
            .await;

        let reply = self
            .sessions
            .get_response(
                &inbound.from_id,
                &contact_name,
                &inbound.text,
                inbound.has_media,
                inbound.media_type.as_deref(),
            )
            .await;

        self.broadcaster
            .emit(
                "typing",
                json!({ "contactId": inbound.from_id, "active": false }),
            )
            .await;

        // At-most-once delivery; a failed send is logged, not retried.
        if !self.transport.send_text(&inbound.from_id, &reply).await {
            self.broadcaster
                .log(
                    format!("Failed to send message to {}", inbound.from_id),
                    "error",
                )
                .await;
        }

        self.broadcaster
            .emit(
                "ai-response",
                AiResponseEvent {
                    contact_name: contact_name.clone(),
                    contact_id: inbound.from_id.clone(),
                    response: reply.clone(),
                    timestamp: now_clock(),
                },
            )
            .await;
        self.broadcaster
            .log(
                format!("AI response to {contact_name}: \"{reply}\""),
                "response",
            )
            .await;
    }

    /// Operator-authored send. Never touches the session turns: operator
    /// messages are not part of the modeled conversation.
    pub async fn send_admin_message(&self, to: &str, text: &str) -> bool {
        if to.trim().is_empty() || text.trim().is_empty() {
            self.broadcaster
                .log(
                    "Recipient and message are required to send a WhatsApp message.",
                    "error",
                )
                .await;
            return false;
        }

        let contact_name = self
            .store
            .contact_name(to)
            .await
            .unwrap_or_else(|| chat_id_phone(to));

        if !self.transport.send_text(to, text).await {
            self.broadcaster
                .log(format!("Failed to send message to {to}"), "error")
                .await;
            return false;
        }

        self.broadcaster
            .emit(
                "admin-message",
                AdminMessageEvent {
                    contact_name: contact_name.clone(),
                    contact_id: to.to_string(),
                    message: text.to_string(),
                    timestamp: now_clock(),
                },
            )
            .await;
        self.broadcaster
            .log(
                format!("Admin sent message to {contact_name}: \"{text}\""),
                "success",
            )
            .await;
        true
    }
}

fn resolve_name(stored: Option<&str>, inbound: &str, from_id: &str) -> String {
    for candidate in [inbound, stored.unwrap_or("")] {
        if !candidate.trim().is_empty() {
            return candidate.trim().to_string();
        }
    }
    chat_id_phone(from_id)
}
