//! Plain command table: the commands any sender may issue.

use tracing::{error, warn};

use crate::admin::AdminRoster;
use crate::llm::ChatBackend;
use crate::profile::ProfileStore;
use crate::transport::{send_chunked, Transport};

const HELP_MESSAGE: &str = "<b>Steward Help</b>\n\n\
<b>Commands:</b>\n\
/start - Welcome message and introduction\n\
/help - Show this help information\n\
/status - System status and diagnostics\n\n\
<b>How to use:</b>\n\
• Send me any message to start chatting\n\
• I remember our conversation history\n\
• Group messages are redirected to private chat\n\n\
<b>Access control:</b>\n\
Your access is managed through the team directory. \
If you don't have access, ask an administrator.";

const UNRECOGNIZED_MESSAGE: &str = "I don't recognize that command. \
Try /help for available commands, or just send me a message to start our conversation.";

pub struct CommandDeps<'a> {
    pub transport: &'a dyn Transport,
    pub profiles: &'a dyn ProfileStore,
    pub backend: &'a dyn ChatBackend,
    pub roster: &'a AdminRoster,
}

/// Handles a `/`-prefixed message that was not an admin command. Always
/// answers, falling back to a fixed unrecognized-command reply.
pub async fn dispatch(deps: &CommandDeps<'_>, chat_id: i64, user_id: i64, text: &str) {
    let command = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();

    match command.as_str() {
        "/start" => send(deps, chat_id, &welcome_message()).await,
        "/help" => send(deps, chat_id, HELP_MESSAGE).await,
        "/status" => status(deps, chat_id).await,
        "/users" if deps.roster.is_admin(user_id) => users(deps, chat_id).await,
        _ => send(deps, chat_id, UNRECOGNIZED_MESSAGE).await,
    }
}

async fn send(deps: &CommandDeps<'_>, chat_id: i64, text: &str) {
    if let Err(e) = deps.transport.send_message(chat_id, text).await {
        warn!(chat_id, error = %e, "failed to send command reply");
    }
}

fn welcome_message() -> String {
    format!(
        "<b>Steward v{}</b>\n\n\
         I'm an assistant that adapts to you based on your team profile and \
         our conversation history.\n\n\
         <b>Key features:</b>\n\
         • Personalized responses that improve over time\n\
         • Persistent conversation memory\n\
         • Private conversations only (no group chats)\n\n\
         Just send me a message to start our conversation!",
        env!("CARGO_PKG_VERSION")
    )
}

async fn status(deps: &CommandDeps<'_>, chat_id: i64) {
    let backend = if deps.backend.ping().await {
        "✅ Connected"
    } else {
        "❌ Error"
    };
    let profiles = if deps.profiles.ping().await {
        "✅ Connected"
    } else {
        "❌ Error"
    };

    let text = format!(
        "<b>Steward System Status</b>\n\n\
         • Version: {}\n\
         • Backend: {backend}\n\
         • Profile store: {profiles}\n\
         • Conversation logs: ✅ Active\n\
         • Rate limiting: ✅ Active",
        env!("CARGO_PKG_VERSION")
    );
    send(deps, chat_id, &text).await;
}

async fn users(deps: &CommandDeps<'_>, chat_id: i64) {
    let profiles = match deps.profiles.list_active().await {
        Ok(profiles) => profiles,
        Err(e) => {
            error!(error = %e, "failed to list users");
            send(deps, chat_id, "Error retrieving users list.").await;
            return;
        }
    };
    if profiles.is_empty() {
        send(deps, chat_id, "No users found in the directory.").await;
        return;
    }

    let mut message = String::from("<b>Users in the directory:</b>\n\n");
    for user in &profiles {
        let status = if user.can_chat {
            "✅ Authorized"
        } else {
            "❌ Not Authorized"
        };
        let handle = user.handle.as_deref().unwrap_or("No handle");
        let user_id = user
            .user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "No ID".to_string());
        message.push_str(&format!(
            "<b>{}</b>\n  Handle: {}\n  User ID: {}\n  Status: {}\n\n",
            user.name, handle, user_id, status
        ));
    }

    if let Err(e) = send_chunked(deps.transport, chat_id, &message).await {
        warn!(chat_id, error = %e, "failed to send users list");
    }
}
