//! Profile store boundary: user records, access mutations, and the
//! Notion-backed implementation used in production.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

const NOTION_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Control fields that must never leak into the conversational profile text.
const SYSTEM_FIELDS: [&str; 7] = [
    "Name",
    "telegram_handle",
    "telegram_user_id",
    "can_chat_bot",
    "context_lines",
    "active",
    "admin",
];

/// One user record as seen by the rest of the system.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub record_id: String,
    pub name: String,
    pub handle: Option<String>,
    pub user_id: Option<i64>,
    pub can_chat: bool,
    pub active: bool,
    pub admin: bool,
    pub context_lines: Option<usize>,
    /// Free-form non-system fields as `(field name, text value)` pairs.
    pub profile_fields: Vec<(String, String)>,
}

impl UserProfile {
    /// Renders the non-system fields as `name: value` lines for the prompt.
    pub fn profile_text(&self) -> String {
        self.profile_fields
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Partial update of a record's access flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPatch {
    pub can_chat: Option<bool>,
    pub active: Option<bool>,
    pub admin: Option<bool>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetches the single active record carrying this user ID.
    async fn fetch_by_user_id(&self, user_id: i64) -> Result<Option<UserProfile>>;
    /// Finds a record by handle, exact match after stripping any leading `@`.
    async fn find_by_handle(&self, handle: &str) -> Result<Option<UserProfile>>;
    /// All active records, ordered by name.
    async fn list_active(&self) -> Result<Vec<UserProfile>>;
    /// User IDs of all active records flagged as admins.
    async fn list_admin_ids(&self) -> Result<Vec<i64>>;
    async fn update_access(&self, record_id: &str, patch: AccessPatch) -> Result<()>;
    async fn create_user(&self, name: &str, handle: Option<&str>, user_id: i64) -> Result<()>;
    /// Lightweight connectivity probe for status reporting.
    async fn ping(&self) -> bool;
}

/// Employee directory backed by a Notion database.
pub struct NotionDirectory {
    http: reqwest::Client,
    token: String,
    database_id: String,
}

impl NotionDirectory {
    pub fn new(token: &str, database_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            database_id: database_id.to_string(),
        }
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{NOTION_BASE_URL}{path}");
        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .timeout(REQUEST_TIMEOUT);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(%status, path, "profile store request failed");
            anyhow::bail!("profile store error {status}: {text}");
        }
        Ok(resp.json().await?)
    }

    async fn query(&self, body: Value) -> Result<Vec<Value>> {
        let path = format!("/databases/{}/query", self.database_id);
        let response = self.request(Method::POST, &path, Some(body)).await?;
        let results = response
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        debug!(count = results.len(), "profile store query");
        Ok(results)
    }
}

#[async_trait]
impl ProfileStore for NotionDirectory {
    async fn fetch_by_user_id(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let query = json!({
            "filter": {
                "and": [
                    {"property": "active", "checkbox": {"equals": true}},
                    {"property": "telegram_user_id", "number": {"equals": user_id}}
                ]
            }
        });
        let results = self.query(query).await?;
        Ok(results.first().map(parse_profile))
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<UserProfile>> {
        let clean = handle.trim_start_matches('@');
        let query = json!({
            "filter": {
                "property": "telegram_handle",
                "rich_text": {"contains": clean}
            }
        });
        // The substring filter can over-match; require an exact handle.
        let results = self.query(query).await?;
        Ok(results.iter().map(parse_profile).find(|profile| {
            profile
                .handle
                .as_deref()
                .map(|h| h.trim_start_matches('@').eq_ignore_ascii_case(clean))
                .unwrap_or(false)
        }))
    }

    async fn list_active(&self) -> Result<Vec<UserProfile>> {
        let query = json!({
            "filter": {"property": "active", "checkbox": {"equals": true}},
            "sorts": [{"property": "Name", "direction": "ascending"}]
        });
        let results = self.query(query).await?;
        Ok(results.iter().map(parse_profile).collect())
    }

    async fn list_admin_ids(&self) -> Result<Vec<i64>> {
        let query = json!({
            "filter": {
                "and": [
                    {"property": "active", "checkbox": {"equals": true}},
                    {"property": "admin", "checkbox": {"equals": true}}
                ]
            }
        });
        let results = self.query(query).await?;
        Ok(results
            .iter()
            .map(parse_profile)
            .filter_map(|profile| profile.user_id)
            .collect())
    }

    async fn update_access(&self, record_id: &str, patch: AccessPatch) -> Result<()> {
        let mut properties = serde_json::Map::new();
        if let Some(can_chat) = patch.can_chat {
            properties.insert("can_chat_bot".into(), json!({"checkbox": can_chat}));
        }
        if let Some(active) = patch.active {
            properties.insert("active".into(), json!({"checkbox": active}));
        }
        if let Some(admin) = patch.admin {
            properties.insert("admin".into(), json!({"checkbox": admin}));
        }
        if properties.is_empty() {
            anyhow::bail!("empty access patch for record {record_id}");
        }

        let path = format!("/pages/{record_id}");
        self.request(Method::PATCH, &path, Some(json!({"properties": properties})))
            .await?;
        Ok(())
    }

    async fn create_user(&self, name: &str, handle: Option<&str>, user_id: i64) -> Result<()> {
        let mut properties = json!({
            "Name": {"title": [{"text": {"content": name}}]},
            "telegram_user_id": {"number": user_id},
            "active": {"checkbox": true},
            "can_chat_bot": {"checkbox": true},
            "admin": {"checkbox": false}
        });
        if let Some(handle) = handle {
            properties["telegram_handle"] = json!({
                "rich_text": [{"text": {"content": format!("@{}", handle.trim_start_matches('@'))}}]
            });
        }

        let body = json!({
            "parent": {"database_id": self.database_id},
            "properties": properties
        });
        self.request(Method::POST, "/pages", Some(body)).await?;
        debug!(user_id, name, "profile record created");
        Ok(())
    }

    async fn ping(&self) -> bool {
        let path = format!("/databases/{}", self.database_id);
        self.request(Method::GET, &path, None).await.is_ok()
    }
}

/// Maps one result page into a [`UserProfile`].
fn parse_profile(page: &Value) -> UserProfile {
    let record_id = page
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let empty = serde_json::Map::new();
    let props = page
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let name = props
        .get("Name")
        .map(extract_property_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let handle = props
        .get("telegram_handle")
        .map(extract_property_text)
        .filter(|s| !s.is_empty());
    let user_id = props
        .get("telegram_user_id")
        .and_then(|p| p.get("number"))
        .and_then(Value::as_i64);
    let checkbox = |field: &str| {
        props
            .get(field)
            .and_then(|p| p.get("checkbox"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    let context_lines = props
        .get("context_lines")
        .and_then(|p| p.get("number"))
        .and_then(Value::as_u64)
        .map(|n| n as usize);

    let profile_fields = props
        .iter()
        .filter(|(field, _)| !SYSTEM_FIELDS.contains(&field.as_str()))
        .map(|(field, prop)| (field.clone(), extract_property_text(prop)))
        .filter(|(_, text)| !text.is_empty())
        .collect();

    UserProfile {
        record_id,
        name,
        handle,
        user_id,
        can_chat: checkbox("can_chat_bot"),
        active: checkbox("active"),
        admin: checkbox("admin"),
        context_lines,
        profile_fields,
    }
}

/// Extracts plain text from the property types the directory uses.
fn extract_property_text(property: &Value) -> String {
    let join_plain_text = |items: &Vec<Value>| {
        items
            .iter()
            .filter_map(|item| item.get("plain_text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    };

    match property.get("type").and_then(Value::as_str) {
        Some("rich_text") => property
            .get("rich_text")
            .and_then(Value::as_array)
            .map(join_plain_text)
            .unwrap_or_default(),
        Some("title") => property
            .get("title")
            .and_then(Value::as_array)
            .map(join_plain_text)
            .unwrap_or_default(),
        Some("select") => property
            .get("select")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some("multi_select") => property
            .get("multi_select")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default(),
        Some("number") => property
            .get("number")
            .filter(|n| !n.is_null())
            .map(|n| n.to_string())
            .unwrap_or_default(),
        Some("checkbox") => property
            .get("checkbox")
            .and_then(Value::as_bool)
            .map(|b| b.to_string())
            .unwrap_or_default(),
        Some(kind @ ("date" | "email" | "phone_number" | "url")) => property
            .get(kind)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}
