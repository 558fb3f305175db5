use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::gemini::ChatModel;
use crate::history::{parse_turns, serialize_turns, ChatTurn};
use crate::prompting::{render_persona_prompt, PersonaPromptContext};
use crate::realtime::Broadcaster;
use crate::store::ContactStore;

/// Live, in-memory conversational context for one user. Owned exclusively
/// by the [`SessionManager`]; the wrapping mutex is the per-user exchange
/// serialization scope.
pub struct ConversationSession {
    pub user_id: String,
    pub turns: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// History has been read from the store (or decided absent). Rehydration
    /// happens at most once per process lifetime per user, unless the
    /// session is explicitly evicted first.
    hydrated: bool,
    /// Set when the last persistence write failed; the in-memory turns are
    /// then the only copy and the session must not be evicted.
    dirty: bool,
}

impl ConversationSession {
    fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            turns: Vec::new(),
            created_at: now,
            last_active_at: now,
            hydrated: false,
            dirty: false,
        }
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Mutex<ConversationSession>>>>,
    store: Arc<dyn ContactStore>,
    model: Arc<dyn ChatModel>,
    broadcaster: Arc<Broadcaster>,
    fallback_message: String,
    max_live_sessions: usize,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ContactStore>,
        model: Arc<dyn ChatModel>,
        broadcaster: Arc<Broadcaster>,
        fallback_message: String,
        max_live_sessions: usize,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            model,
            broadcaster,
            fallback_message,
            max_live_sessions: max_live_sessions.max(1),
        }
    }

    /// Runs one full exchange for a user: rehydrate on first use, send the
    /// ordered turns plus the new user turn to the model, append both turns
    /// on success, persist, and return the reply. On model failure the turns
    /// are left untouched and the configured fallback message is returned.
    pub async fn get_response(
        &self,
        user_id: &str,
        display_name: &str,
        user_message: &str,
        has_media: bool,
        media_type: Option<&str>,
    ) -> String {
        let (handle, created) = self.session_handle(user_id).await;
        if created {
            self.broadcaster
                .log(
                    format!("Created new chat session for {display_name}"),
                    "info",
                )
                .await;
        }

        let reply = {
            // Inner lock held for the whole exchange.
            let mut session = handle.lock().await;

            if !session.hydrated {
                self.rehydrate(&mut session).await;
            }

            // Committed only on success.
            let mut request = session.turns.clone();
            if request.is_empty() {
                let priming = render_persona_prompt(&PersonaPromptContext {
                    contact_name: display_name,
                });
                request.push(ChatTurn::user(priming));
            }
            let content = outbound_content(user_message, has_media, media_type);
            request.push(ChatTurn::user(content));

            match self.model.generate(&request).await {
                Ok(reply) => {
                    session.turns = request;
                    session.turns.push(ChatTurn::model(reply.clone()));
                    session.last_active_at = Utc::now();
                    // A session cleared mid-exchange must not write its
                    // blob back.
                    if self.still_live(user_id, &handle).await {
                        self.persist(&mut session).await;
                    }
                    reply
                }
                Err(err) => {
                    self.broadcaster
                        .log(format!("Gemini API error for {display_name}: {err}"), "error")
                        .await;
                    self.fallback_message.clone()
                }
            }
        };

        self.enforce_session_bound().await;
        reply
    }

    /// Evicts the in-memory session only; the persisted blob is untouched.
    /// An exchange already running on the removed session completes but
    /// skips its persist.
    pub async fn clear_session(&self, user_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(user_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn session_handle(&self, user_id: &str) -> (Arc<Mutex<ConversationSession>>, bool) {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(user_id) {
            return (handle.clone(), false);
        }
        let handle = Arc::new(Mutex::new(ConversationSession::new(user_id)));
        sessions.insert(user_id.to_string(), handle.clone());
        (handle, true)
    }

    async fn still_live(&self, user_id: &str, handle: &Arc<Mutex<ConversationSession>>) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(user_id)
            .is_some_and(|live| Arc::ptr_eq(live, handle))
    }

    async fn rehydrate(&self, session: &mut ConversationSession) {
        match self.store.get_history(&session.user_id).await {
            Ok(Some(blob)) => match parse_turns(&blob) {
                Ok(turns) => session.turns = turns,
                Err(err) => {
                    self.broadcaster
                        .log(
                            format!(
                                "Corrupt persisted history for {}, starting fresh: {err}",
                                session.user_id
                            ),
                            "warning",
                        )
                        .await;
                }
            },
            Ok(None) => {}
            Err(err) => {
                self.broadcaster
                    .log(
                        format!(
                            "History read failed for {}, starting fresh: {err}",
                            session.user_id
                        ),
                        "warning",
                    )
                    .await;
            }
        }
        session.hydrated = true;
    }

    async fn persist(&self, session: &mut ConversationSession) {
        let blob = match serialize_turns(&session.turns) {
            Ok(blob) => blob,
            Err(err) => {
                session.dirty = true;
                self.broadcaster
                    .log(
                        format!("History serialize failed for {}: {err}", session.user_id),
                        "warning",
                    )
                    .await;
                return;
            }
        };
        match self.store.set_history(&session.user_id, &blob).await {
            Ok(()) => session.dirty = false,
            Err(err) => {
                session.dirty = true;
                self.broadcaster
                    .log(
                        format!("History persist failed for {}: {err}", session.user_id),
                        "warning",
                    )
                    .await;
            }
        }
    }

    /// Keeps the live table bounded: when it grows past the configured
    /// limit, the least-recently-active idle sessions are dropped. Sessions
    /// with an exchange in flight (handle checked out or inner lock held)
    /// or with an unpersisted increment of history are never evicted.
    async fn enforce_session_bound(&self) {
        let evicted = {
            let mut sessions = self.sessions.lock().await;
            if sessions.len() <= self.max_live_sessions {
                return;
            }
            let mut idle: Vec<(String, DateTime<Utc>)> = Vec::new();
            for (user_id, handle) in sessions.iter() {
                // The map holds exactly one reference; more means a
                // dispatch checked the handle out for an exchange.
                if Arc::strong_count(handle) > 1 {
                    continue;
                }
                if let Ok(session) = handle.try_lock() {
                    if session.hydrated && !session.dirty {
                        idle.push((user_id.clone(), session.last_active_at));
                    }
                }
            }
            idle.sort_by_key(|(_, last_active)| *last_active);
            let excess = sessions.len() - self.max_live_sessions;
            let mut evicted = Vec::new();
            for (user_id, _) in idle.into_iter().take(excess) {
                sessions.remove(&user_id);
                evicted.push(user_id);
            }
            evicted
        };
        for user_id in evicted {
            self.broadcaster
                .log(format!("Evicted idle session for {user_id}"), "info")
                .await;
        }
    }

    #[cfg(test)]
    pub async fn turns_snapshot(&self, user_id: &str) -> Option<Vec<ChatTurn>> {
        let handle = {
            let sessions = self.sessions.lock().await;
            sessions.get(user_id).cloned()
        }?;
        let session = handle.lock().await;
        Some(session.turns.clone())
    }
}

fn outbound_content(user_message: &str, has_media: bool, media_type: Option<&str>) -> String {
    match media_type {
        Some(media_type) if has_media && !media_type.trim().is_empty() => format!(
            "User sent a {media_type} along with this message: \"{user_message}\". \
             Please analyze both the text and the {media_type} content."
        ),
        _ => user_message.to_string(),
    }
}
