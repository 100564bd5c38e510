//! Update poller and session orchestrator.
//!
//! One update is fully handled before the next is taken, so the in-memory
//! caches need no cross-update coordination. The offset advances past every
//! fetched update before processing, which yields at-least-once handling
//! across restarts: an update is only acknowledged to the transport by the
//! next `get_updates` call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::admin::{self, AdminDeps, AdminRoster};
use crate::auth::{AuthCache, AuthRecord, AUTH_CACHE_TTL};
use crate::commands::{self, CommandDeps};
use crate::config::{
    Config, BOT_DISPLAY_NAME, GENERIC_ERROR_MESSAGE, GROUP_REDIRECT_MESSAGE, UNAUTHORIZED_MESSAGE,
};
use crate::context::build_context;
use crate::llm::{degraded_reply, ChatBackend};
use crate::profile::ProfileStore;
use crate::ratelimit::RateLimiter;
use crate::store::{Author, ConversationStore};
use crate::transport::{is_group_chat, send_chunked, Transport, Update};

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct Bot {
    config: Config,
    transport: Arc<dyn Transport>,
    profiles: Arc<dyn ProfileStore>,
    backend: Arc<dyn ChatBackend>,
    auth: AuthCache,
    limiter: RateLimiter,
    store: ConversationStore,
    roster: AdminRoster,
    offset: i64,
}

impl Bot {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        profiles: Arc<dyn ProfileStore>,
        backend: Arc<dyn ChatBackend>,
    ) -> Result<Self> {
        let store = ConversationStore::new(&config.conversations_dir)?;
        let auth = AuthCache::new(
            profiles.clone(),
            AUTH_CACHE_TTL,
            config.default_context_lines,
        );
        let limiter = RateLimiter::new(Duration::from_secs(config.rate_limit_secs));

        Ok(Self {
            config,
            transport,
            profiles,
            backend,
            auth,
            limiter,
            store,
            roster: AdminRoster::new(),
            offset: 0,
        })
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Long-polls the transport until the shutdown channel fires. Transport
    /// failures pause the loop briefly; nothing terminates it but shutdown.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        self.roster.reload(self.profiles.as_ref()).await;
        info!(admins = self.roster.ids().len(), "update polling started");

        loop {
            let transport = Arc::clone(&self.transport);
            let fetch = transport.get_updates(self.offset, self.config.poll_timeout_secs);
            let batch = tokio::select! {
                _ = shutdown.changed() => break,
                batch = fetch => batch,
            };

            match batch {
                Ok(updates) => self.process_batch(updates).await,
                Err(e) => {
                    error!(error = %e, "polling failed, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("update polling stopped");
    }

    /// Advances the offset past every update in the batch, then handles the
    /// ones that carry a text message. A failure inside one update is caught
    /// here so it can never take down the loop.
    pub async fn process_batch(&mut self, updates: Vec<Update>) {
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            if update.text.is_empty() || update.user_id == 0 {
                continue;
            }

            if let Err(e) = self.handle_update(&update).await {
                error!(
                    update_id = update.update_id,
                    user_id = update.user_id,
                    error = ?e,
                    "update handling failed"
                );
                let _ = self
                    .transport
                    .send_message(update.chat_id, GENERIC_ERROR_MESSAGE)
                    .await;
            }
        }
    }

    pub async fn handle_update(&self, update: &Update) -> Result<()> {
        // Audit trail first, before any gate can drop the message.
        if let Err(e) = self.store.append(
            update.user_id,
            Author::User {
                name: &update.display_name,
            },
            &update.text,
        ) {
            warn!(user_id = update.user_id, error = %e, "failed to log inbound message");
        }

        let preview: String = update.text.chars().take(50).collect();
        info!(
            user_id = update.user_id,
            name = %update.display_name,
            text = %preview,
            "inbound message"
        );

        if update.text.starts_with('/') {
            if self.roster.is_admin(update.user_id) {
                let deps = AdminDeps {
                    transport: self.transport.as_ref(),
                    profiles: self.profiles.as_ref(),
                    auth: &self.auth,
                    roster: &self.roster,
                };
                if admin::dispatch(&deps, update.chat_id, &update.text).await {
                    return Ok(());
                }
            }
            let deps = CommandDeps {
                transport: self.transport.as_ref(),
                profiles: self.profiles.as_ref(),
                backend: self.backend.as_ref(),
                roster: &self.roster,
            };
            commands::dispatch(&deps, update.chat_id, update.user_id, &update.text).await;
            return Ok(());
        }

        if is_group_chat(update.chat_id) {
            info!(chat_id = update.chat_id, "group message, redirecting to private");
            self.transport
                .send_message(update.chat_id, GROUP_REDIRECT_MESSAGE)
                .await?;
            return Ok(());
        }

        let record = self.auth.authorize(update.user_id).await;
        if !record.authorized {
            info!(user_id = update.user_id, "sender not authorized");
            self.transport
                .send_message(update.chat_id, UNAUTHORIZED_MESSAGE)
                .await?;
            return Ok(());
        }

        let (allowed, wait) = self.limiter.check(update.user_id);
        if !allowed {
            info!(user_id = update.user_id, wait, "rate limit hit");
            self.transport
                .send_message(
                    update.chat_id,
                    &format!("Please wait {wait:.1} seconds before your next message."),
                )
                .await?;
            return Ok(());
        }

        self.converse(update, &record).await
    }

    async fn converse(&self, update: &Update, record: &AuthRecord) -> Result<()> {
        if let Err(e) = self.transport.send_typing(update.chat_id).await {
            // Non-critical.
            warn!(chat_id = update.chat_id, error = %e, "typing indicator failed");
        }

        // The inbound message is already on the audit log; it must appear in
        // the prompt only as the current user turn, not in the history too.
        let mut history = self
            .store
            .recent(update.user_id, record.context_lines + 1);
        let current_marker = format!("[ID: {}]: --- {}", update.user_id, update.text);
        if history
            .last()
            .is_some_and(|line| line.contains(&current_marker))
        {
            history.pop();
        }

        let messages = build_context(
            &self.config.persona,
            &record.profile_text,
            &history,
            &update.text,
        )?;

        let reply = match self.backend.complete(messages).await {
            Ok(text) => text,
            Err(e) => {
                error!(user_id = update.user_id, error = %e, "backend completion failed");
                degraded_reply(&e).to_string()
            }
        };

        if let Err(e) = self.store.append(
            update.user_id,
            Author::Bot {
                name: BOT_DISPLAY_NAME,
            },
            &reply,
        ) {
            warn!(user_id = update.user_id, error = %e, "failed to log reply");
        }

        send_chunked(self.transport.as_ref(), update.chat_id, &reply).await?;
        info!(
            user_id = update.user_id,
            chars = reply.len(),
            "reply delivered"
        );
        Ok(())
    }
}
