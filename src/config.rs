use dotenvy::dotenv;
use std::env;
use std::fs;

/// Primary administrator. Always present in the roster and cannot be demoted,
/// so the system is never left without an admin.
pub const PRIMARY_ADMIN_ID: i64 = 6904183057;

/// Display name recorded on the bot's own conversation log lines.
pub const BOT_DISPLAY_NAME: &str = "Steward";

pub const UNAUTHORIZED_MESSAGE: &str =
    "Steward is available to approved team members only. \
     Ask an administrator to grant you access.";
pub const GROUP_REDIRECT_MESSAGE: &str = "Please message me privately.";
pub const GENERIC_ERROR_MESSAGE: &str =
    "Something went wrong on my end. Please try rephrasing your message.";

const DEFAULT_PERSONA: &str = "\
You are Steward, a personal operations assistant for a small team. \
You follow up on tasks, answer questions about day-to-day work, and keep \
conversations moving toward concrete outcomes. Adapt your tone to the person \
you are talking to, using whatever profile notes you are given. Be warm but \
direct, keep messages short and chat-friendly, and never refer to yourself \
as artificial.";

#[derive(Clone)]
pub struct Config {
    pub telegram_token: String,
    pub notion_token: String,
    pub employees_db_id: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub max_tokens: u32,
    pub port: u16,
    pub default_context_lines: usize,
    pub rate_limit_secs: u64,
    pub conversations_dir: String,
    pub persona: String,
    pub poll_timeout_secs: u64,
    pub backend_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            telegram_token: env::var("TELEGRAM_BOT_TOKEN")
                .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN must be set"))?,
            notion_token: env::var("NOTION_TOKEN")
                .map_err(|_| anyhow::anyhow!("NOTION_TOKEN must be set"))?,
            employees_db_id: env::var("EMPLOYEES_DB_ID")
                .map_err(|_| anyhow::anyhow!("EMPLOYEES_DB_ID must be set"))?,
            openai_api_key: env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY must be set"))?,
            openai_model: env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini-2024-07-18".to_string()),
            max_tokens: env::var("MAX_TOKENS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),
            default_context_lines: env::var("CONTEXT_WINDOW_DEFAULT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            rate_limit_secs: env::var("MESSAGE_RATE_LIMIT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            conversations_dir: env::var("CONVERSATIONS_DIR")
                .unwrap_or_else(|_| "conversations".to_string()),
            persona: Self::load_persona(),
            poll_timeout_secs: env::var("POLL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .unwrap_or(25),
            backend_timeout_secs: env::var("BACKEND_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
        })
    }

    fn load_persona() -> String {
        let path =
            env::var("SYSTEM_PROMPT_FILE").unwrap_or_else(|_| "system_prompt.txt".to_string());
        match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => DEFAULT_PERSONA.to_string(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("telegram_token", &"[REDACTED]")
            .field("notion_token", &"[REDACTED]")
            .field("employees_db_id", &self.employees_db_id)
            .field("openai_api_key", &"[REDACTED]")
            .field("openai_model", &self.openai_model)
            .field("max_tokens", &self.max_tokens)
            .field("port", &self.port)
            .field("default_context_lines", &self.default_context_lines)
            .field("rate_limit_secs", &self.rate_limit_secs)
            .field("conversations_dir", &self.conversations_dir)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("backend_timeout_secs", &self.backend_timeout_secs)
            .finish()
    }
}
