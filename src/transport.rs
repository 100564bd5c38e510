//! Messaging transport boundary: the update model, the transport trait, and
//! the Telegram Bot API client used in production.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Practical per-message length cap; longer texts are sent in chunks.
pub const MESSAGE_CHUNK_LIMIT: usize = 4000;

/// One inbound event. Non-text updates surface with an empty `text` so the
/// poller can still advance its offset past them.
#[derive(Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub display_name: String,
    pub text: String,
}

/// Group chats carry negative identifiers.
pub fn is_group_chat(chat_id: i64) -> bool {
    chat_id < 0
}

/// Identity fields resolvable from the transport for a user ID.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityInfo {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl EntityInfo {
    pub fn full_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let name = name.trim();
        if name.is_empty() {
            "Unknown".to_string()
        } else {
            name.to_string()
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Long-polls for updates past `offset`, blocking up to `timeout_secs`.
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>>;
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
    async fn send_typing(&self, chat_id: i64) -> Result<()>;
    async fn get_entity(&self, user_id: i64) -> Result<Option<EntityInfo>>;
}

/// Sends `text` in order, split at the chunk limit on character boundaries.
pub async fn send_chunked(transport: &dyn Transport, chat_id: i64, text: &str) -> Result<()> {
    for chunk in chunk_text(text, MESSAGE_CHUNK_LIMIT) {
        transport.send_message(chat_id, &chunk).await?;
    }
    Ok(())
}

pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if current.len() + c.len_utf8() > limit {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// Wire shapes for the subset of the Bot API this system consumes.

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    text: Option<String>,
    from: Option<RawUser>,
    chat: RawChat,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: i64,
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

fn to_update(raw: RawUpdate) -> Update {
    match raw.message {
        Some(message) => Update {
            update_id: raw.update_id,
            user_id: message.from.as_ref().map(|u| u.id).unwrap_or(0),
            chat_id: message.chat.id,
            display_name: message
                .from
                .and_then(|u| u.first_name)
                .unwrap_or_else(|| "Unknown".to_string()),
            text: message.text.unwrap_or_default(),
        },
        None => Update {
            update_id: raw.update_id,
            user_id: 0,
            chat_id: 0,
            display_name: String::new(),
            text: String::new(),
        },
    }
}

pub struct TelegramTransport {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    async fn call(&self, method: &str, body: Value, timeout: Duration) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let payload: Value = resp.json().await?;

        if !status.is_success() || !payload["ok"].as_bool().unwrap_or(false) {
            let description = payload["description"].as_str().unwrap_or("unknown error");
            anyhow::bail!("transport call {method} failed: {status} - {description}");
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let mut body = json!({ "timeout": timeout_secs });
        if offset > 0 {
            body["offset"] = json!(offset);
        }
        // The HTTP timeout must outlast the server-side long-poll window.
        let result = self
            .call(
                "getUpdates",
                body,
                Duration::from_secs(timeout_secs + 5),
            )
            .await?;

        let raw: Vec<RawUpdate> = serde_json::from_value(result)?;
        debug!(count = raw.len(), "updates fetched");
        Ok(raw.into_iter().map(to_update).collect())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true
        });
        self.call("sendMessage", body, Duration::from_secs(30))
            .await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        let body = json!({ "chat_id": chat_id, "action": "typing" });
        self.call("sendChatAction", body, Duration::from_secs(10))
            .await?;
        Ok(())
    }

    async fn get_entity(&self, user_id: i64) -> Result<Option<EntityInfo>> {
        let body = json!({ "chat_id": user_id });
        match self.call("getChat", body, Duration::from_secs(30)).await {
            Ok(result) => Ok(serde_json::from_value(result).ok()),
            Err(e) => {
                // A user who has never talked to the bot is unresolvable;
                // treat it the same as any other fetch failure.
                warn!(user_id, error = %e, "entity lookup failed");
                Ok(None)
            }
        }
    }
}
