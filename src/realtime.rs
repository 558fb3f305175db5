use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::types::LogEntry;

const MAX_LOGS: usize = 1000;

#[derive(Default)]
struct RealtimeState {
    clients: HashMap<usize, mpsc::UnboundedSender<String>>,
    logs: VecDeque<LogEntry>,
}

/// Push channel to the dashboard: every connected browser gets a client id
/// and an unbounded sender; events are JSON envelopes `{event, data}`.
/// Log events are additionally kept in a ring buffer so a freshly connected
/// dashboard can replay recent activity.
pub struct Broadcaster {
    state: Mutex<RealtimeState>,
    next_client_id: AtomicUsize,
}

fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

pub fn now_clock() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RealtimeState::default()),
            next_client_id: AtomicUsize::new(0),
        }
    }

    pub async fn register(&self) -> (usize, mpsc::UnboundedReceiver<String>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut state = self.state.lock().await;
        state.clients.insert(client_id, tx);
        (client_id, rx)
    }

    pub async fn unregister(&self, client_id: usize) {
        let mut state = self.state.lock().await;
        state.clients.remove(&client_id);
    }

    pub async fn emit<T: Serialize>(&self, event: &str, data: T) {
        let Some(payload) = event_payload(event, data) else {
            return;
        };
        let senders = {
            let state = self.state.lock().await;
            state.clients.values().cloned().collect::<Vec<_>>()
        };
        for sender in senders {
            let _ = sender.send(payload.clone());
        }
    }

    pub async fn emit_to<T: Serialize>(&self, client_id: usize, event: &str, data: T) {
        let Some(payload) = event_payload(event, data) else {
            return;
        };
        let tx = {
            let state = self.state.lock().await;
            state.clients.get(&client_id).cloned()
        };
        if let Some(sender) = tx {
            let _ = sender.send(payload);
        }
    }

    pub async fn log(&self, message: impl Into<String>, log_type: &str) {
        let entry = LogEntry {
            timestamp: now_clock(),
            message: message.into(),
            log_type: log_type.to_string(),
        };
        eprintln!("[{}] {}", entry.timestamp, entry.message);
        {
            let mut state = self.state.lock().await;
            state.logs.push_back(entry.clone());
            if state.logs.len() > MAX_LOGS {
                state.logs.pop_front();
            }
        }
        self.emit("log", entry).await;
    }

    pub async fn log_backlog(&self) -> Vec<LogEntry> {
        let state = self.state.lock().await;
        state.logs.iter().cloned().collect()
    }

    #[cfg(test)]
    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
