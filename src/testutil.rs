//! In-memory fakes for the three external collaborators, shared across the
//! unit tests of the modules that depend on them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_openai::types::ChatCompletionRequestMessage;
use async_trait::async_trait;

use crate::llm::{BackendError, ChatBackend};
use crate::profile::{AccessPatch, ProfileStore, UserProfile};
use crate::transport::{EntityInfo, Transport, Update};

pub fn profile(user_id: i64, name: &str, can_chat: bool) -> UserProfile {
    UserProfile {
        record_id: format!("rec-{user_id}"),
        name: name.to_string(),
        handle: Some(format!("@{}", name.to_lowercase())),
        user_id: Some(user_id),
        can_chat,
        active: true,
        admin: false,
        context_lines: None,
        profile_fields: Vec::new(),
    }
}

pub fn update(update_id: i64, user_id: i64, chat_id: i64, name: &str, text: &str) -> Update {
    Update {
        update_id,
        user_id,
        chat_id,
        display_name: name.to_string(),
        text: text.to_string(),
    }
}

#[derive(Default)]
pub struct FakeProfileStore {
    pub records: Mutex<Vec<UserProfile>>,
    pub fail: AtomicBool,
    pub fetch_calls: AtomicUsize,
}

impl FakeProfileStore {
    pub fn new(records: Vec<UserProfile>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn set_can_chat(&self, user_id: i64, can_chat: bool) {
        let mut records = self.records.lock().unwrap();
        for record in records.iter_mut() {
            if record.user_id == Some(user_id) {
                record.can_chat = can_chat;
            }
        }
    }

    pub fn get(&self, user_id: i64) -> Option<UserProfile> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.user_id == Some(user_id))
            .cloned()
    }

    fn check_fail(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("profile store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FakeProfileStore {
    async fn fetch_by_user_id(&self, user_id: i64) -> Result<Option<UserProfile>> {
        self.check_fail()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.active && r.user_id == Some(user_id))
            .cloned())
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<UserProfile>> {
        self.check_fail()?;
        let clean = handle.trim_start_matches('@');
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                r.handle
                    .as_deref()
                    .map(|h| h.trim_start_matches('@').eq_ignore_ascii_case(clean))
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<UserProfile>> {
        self.check_fail()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }

    async fn list_admin_ids(&self) -> Result<Vec<i64>> {
        self.check_fail()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.active && r.admin)
            .filter_map(|r| r.user_id)
            .collect())
    }

    async fn update_access(&self, record_id: &str, patch: AccessPatch) -> Result<()> {
        self.check_fail()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| anyhow::anyhow!("no record {record_id}"))?;
        if let Some(can_chat) = patch.can_chat {
            record.can_chat = can_chat;
        }
        if let Some(active) = patch.active {
            record.active = active;
        }
        if let Some(admin) = patch.admin {
            record.admin = admin;
        }
        Ok(())
    }

    async fn create_user(&self, name: &str, handle: Option<&str>, user_id: i64) -> Result<()> {
        self.check_fail()?;
        let mut created = profile(user_id, name, true);
        created.handle = handle.map(|h| format!("@{}", h.trim_start_matches('@')));
        self.records.lock().unwrap().push(created);
        Ok(())
    }

    async fn ping(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub batches: Mutex<VecDeque<Vec<Update>>>,
    pub entities: Mutex<HashMap<i64, EntityInfo>>,
    pub typing: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self) -> Option<(i64, String)> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_updates(&self, _offset: i64, _timeout_secs: u64) -> Result<Vec<Update>> {
        Ok(self
            .batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_typing(&self, _chat_id: i64) -> Result<()> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_entity(&self, user_id: i64) -> Result<Option<EntityInfo>> {
        Ok(self.entities.lock().unwrap().get(&user_id).cloned())
    }
}

pub struct FakeBackend {
    pub reply: String,
    pub error: Mutex<Option<BackendError>>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<Vec<ChatCompletionRequestMessage>>>,
}

impl FakeBackend {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            error: Mutex::new(None),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with(&self, error: BackendError) {
        *self.error.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages);
        match self.error.lock().unwrap().as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(self.reply.clone()),
        }
    }

    async fn ping(&self) -> bool {
        true
    }
}
