//! In-memory collaborator doubles for the core tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::gemini::ChatModel;
use crate::history::ChatTurn;
use crate::store::ContactStore;
use crate::transport::ChatTransport;
use crate::types::{AllowListEntry, Contact, TransportStatus};

#[derive(Default, Clone)]
struct StoredContact {
    name: String,
    is_allowed: bool,
    history: Option<String>,
}

pub struct MemoryStore {
    contacts: Mutex<HashMap<String, StoredContact>>,
    history_reads: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            contacts: Mutex::new(HashMap::new()),
            history_reads: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub async fn add_contact(&self, user_id: &str, name: &str, is_allowed: bool) {
        let mut contacts = self.contacts.lock().await;
        contacts.insert(
            user_id.to_string(),
            StoredContact {
                name: name.to_string(),
                is_allowed,
                history: None,
            },
        );
    }

    pub fn history_reads(&self) -> usize {
        self.history_reads.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

fn to_contact(user_id: &str, stored: &StoredContact) -> Contact {
    Contact {
        whatsapp_id: user_id.to_string(),
        phone_number: crate::transport::chat_id_phone(user_id),
        name: stored.name.clone(),
        is_allowed: stored.is_allowed,
        message_count: 0,
        last_message_at: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn allow_entry(&self, user_id: &str) -> Option<AllowListEntry> {
        let contacts = self.contacts.lock().await;
        contacts.get(user_id).map(|stored| AllowListEntry {
            user_id: user_id.to_string(),
            display_name: stored.name.clone(),
            is_allowed: stored.is_allowed,
        })
    }

    async fn get_history(&self, user_id: &str) -> Result<Option<String>, String> {
        self.history_reads.fetch_add(1, Ordering::SeqCst);
        let contacts = self.contacts.lock().await;
        Ok(contacts.get(user_id).and_then(|c| c.history.clone()))
    }

    async fn set_history(&self, user_id: &str, blob: &str) -> Result<(), String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err("store write refused".to_string());
        }
        let mut contacts = self.contacts.lock().await;
        contacts
            .entry(user_id.to_string())
            .or_default()
            .history = Some(blob.to_string());
        Ok(())
    }

    async fn clear_history(&self, user_id: &str) -> Result<(), String> {
        let mut contacts = self.contacts.lock().await;
        if let Some(stored) = contacts.get_mut(user_id) {
            stored.history = None;
        }
        Ok(())
    }

    async fn contact_name(&self, user_id: &str) -> Option<String> {
        let contacts = self.contacts.lock().await;
        contacts
            .get(user_id)
            .map(|c| c.name.clone())
            .filter(|n| !n.is_empty())
    }

    async fn record_inbound(&self, user_id: &str, display_name: &str) {
        let mut contacts = self.contacts.lock().await;
        if let Some(stored) = contacts.get_mut(user_id) {
            if !display_name.is_empty() {
                stored.name = display_name.to_string();
            }
        }
    }

    async fn all_contacts(&self) -> Vec<Contact> {
        let contacts = self.contacts.lock().await;
        contacts
            .iter()
            .map(|(id, stored)| to_contact(id, stored))
            .collect()
    }

    async fn allowed_contacts(&self) -> Vec<Contact> {
        let contacts = self.contacts.lock().await;
        contacts
            .iter()
            .filter(|(_, stored)| stored.is_allowed)
            .map(|(id, stored)| to_contact(id, stored))
            .collect()
    }

    async fn upsert_contact(
        &self,
        user_id: &str,
        name: &str,
        is_allowed: bool,
    ) -> Option<Contact> {
        let mut contacts = self.contacts.lock().await;
        let stored = contacts.entry(user_id.to_string()).or_default();
        stored.name = name.to_string();
        stored.is_allowed = is_allowed;
        Some(to_contact(user_id, stored))
    }

    async fn delete_contact(&self, user_id: &str) -> Result<(), String> {
        let mut contacts = self.contacts.lock().await;
        contacts.remove(user_id);
        Ok(())
    }
}

pub struct MockModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    default_reply: Option<String>,
    requests: Mutex<Vec<Vec<ChatTurn>>>,
    delay: Duration,
}

impl MockModel {
    /// Scripted replies, consumed in order.
    pub fn replying(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            default_reply: None,
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn always_ok(reply: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn requests(&self) -> Vec<Vec<ChatTurn>> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, String> {
        self.requests.lock().await.push(turns.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.replies.lock().await.pop_front();
        match scripted {
            Some(reply) => reply,
            None => match &self.default_reply {
                Some(reply) => Ok(reply.clone()),
                None => Err("mock model out of replies".to_string()),
            },
        }
    }
}

pub struct MockTransport {
    sends: Mutex<Vec<(String, String)>>,
    succeed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            succeed: AtomicBool::new(true),
        }
    }

    pub fn failing() -> Self {
        let transport = Self::new();
        transport.succeed.store(false, Ordering::SeqCst);
        transport
    }

    pub async fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().await.clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_text(&self, to: &str, text: &str) -> bool {
        self.sends
            .lock()
            .await
            .push((to.to_string(), text.to_string()));
        self.succeed.load(Ordering::SeqCst)
    }

    fn status(&self) -> TransportStatus {
        TransportStatus {
            is_ready: true,
            is_authenticated: true,
        }
    }
}
