//! Privilege-gated user management commands that mutate the profile store.
//!
//! The caller is responsible for the privilege check; dispatch assumes the
//! sender is already on the roster. Every successful mutation clears the
//! entire authorization cache, since handle-based updates do not map 1:1 to
//! the cache's ID keys.

use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::auth::AuthCache;
use crate::config::PRIMARY_ADMIN_ID;
use crate::profile::{AccessPatch, ProfileStore, UserProfile};
use crate::transport::Transport;

const ADMIN_HELP: &str = "<b>🛠 Admin Commands - User Management</b>\n\n\
<b>Access:</b>\n\
/grant @handle - Give a user bot access\n\
/revoke @handle - Remove bot access\n\
/activate @handle - Mark a user active\n\
/deactivate @handle - Deactivate a user and remove access\n\n\
<b>Accounts:</b>\n\
/enroll &lt;user id&gt; - Create a directory record for a new user\n\
/promote @handle - Grant admin privileges\n\
/demote @handle - Remove admin privileges\n\n\
<b>Utility:</b>\n\
/users - List all users\n\
/admin_help - Show this help\n\
/reload_admins - Reload the admin roster\n\n\
All changes take effect on the user's next message.";

/// User IDs with elevated privilege. Always contains the primary admin, so
/// the system can never end up with zero administrators.
pub struct AdminRoster {
    ids: Mutex<Vec<i64>>,
}

impl AdminRoster {
    pub fn new() -> Self {
        Self {
            ids: Mutex::new(vec![PRIMARY_ADMIN_ID]),
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.ids.lock().unwrap().contains(&user_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.ids.lock().unwrap().clone()
    }

    /// Reloads the roster from the profile store, falling back to the primary
    /// admin alone when the store is unreachable.
    pub async fn reload(&self, profiles: &dyn ProfileStore) {
        let mut ids = match profiles.list_admin_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to load admin roster, keeping primary admin only");
                Vec::new()
            }
        };
        if !ids.contains(&PRIMARY_ADMIN_ID) {
            ids.insert(0, PRIMARY_ADMIN_ID);
        }
        info!(admins = ids.len(), "admin roster loaded");
        *self.ids.lock().unwrap() = ids;
    }
}

impl Default for AdminRoster {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AdminDeps<'a> {
    pub transport: &'a dyn Transport,
    pub profiles: &'a dyn ProfileStore,
    pub auth: &'a AuthCache,
    pub roster: &'a AdminRoster,
}

/// Attempts to interpret `text` as an admin command. Returns `true` when the
/// command was recognized (and answered), `false` to fall through to the
/// plain command table.
pub async fn dispatch(deps: &AdminDeps<'_>, chat_id: i64, text: &str) -> bool {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let Some(command) = parts.first() else {
        return false;
    };

    match command.to_lowercase().as_str() {
        "/grant" if parts.len() >= 2 => grant(deps, chat_id, parts[1]).await,
        "/revoke" if parts.len() >= 2 => revoke(deps, chat_id, parts[1]).await,
        "/activate" if parts.len() >= 2 => activate(deps, chat_id, parts[1]).await,
        "/deactivate" if parts.len() >= 2 => deactivate(deps, chat_id, parts[1]).await,
        "/enroll" if parts.len() >= 2 => enroll(deps, chat_id, parts[1]).await,
        "/promote" if parts.len() >= 2 => promote(deps, chat_id, parts[1]).await,
        "/demote" if parts.len() >= 2 => demote(deps, chat_id, parts[1]).await,
        "/admin_help" => send(deps, chat_id, ADMIN_HELP).await,
        "/reload_admins" => reload_admins(deps, chat_id).await,
        _ => return false,
    }
    true
}

async fn send(deps: &AdminDeps<'_>, chat_id: i64, text: &str) {
    if let Err(e) = deps.transport.send_message(chat_id, text).await {
        warn!(chat_id, error = %e, "failed to send admin reply");
    }
}

/// Resolves a handle to a profile, answering the chat when it cannot.
async fn lookup(deps: &AdminDeps<'_>, chat_id: i64, handle: &str) -> Option<UserProfile> {
    match deps.profiles.find_by_handle(handle).await {
        Ok(Some(profile)) => Some(profile),
        Ok(None) => {
            send(
                deps,
                chat_id,
                &format!("❌ User {handle} not found in the directory."),
            )
            .await;
            None
        }
        Err(e) => {
            error!(handle, error = %e, "handle lookup failed");
            send(
                deps,
                chat_id,
                &format!("❌ Failed to look up {handle}. Check logs."),
            )
            .await;
            None
        }
    }
}

/// Applies an access patch and clears the authorization cache on success.
async fn apply(
    deps: &AdminDeps<'_>,
    chat_id: i64,
    profile: &UserProfile,
    patch: AccessPatch,
    success: String,
) -> bool {
    match deps.profiles.update_access(&profile.record_id, patch).await {
        Ok(()) => {
            deps.auth.invalidate_all();
            send(deps, chat_id, &success).await;
            true
        }
        Err(e) => {
            error!(record_id = %profile.record_id, error = %e, "access update failed");
            send(
                deps,
                chat_id,
                &format!("❌ Failed to update {}. Check logs.", profile.name),
            )
            .await;
            false
        }
    }
}

async fn grant(deps: &AdminDeps<'_>, chat_id: i64, handle: &str) {
    let Some(profile) = lookup(deps, chat_id, handle).await else {
        return;
    };
    let patch = AccessPatch {
        can_chat: Some(true),
        active: Some(true),
        ..Default::default()
    };
    let success = format!(
        "✅ {} (@{}) has been given bot access.",
        profile.name,
        handle.trim_start_matches('@')
    );
    if apply(deps, chat_id, &profile, patch, success).await {
        info!(target = ?profile.user_id, "access granted");
    }
}

async fn revoke(deps: &AdminDeps<'_>, chat_id: i64, handle: &str) {
    let Some(profile) = lookup(deps, chat_id, handle).await else {
        return;
    };
    let patch = AccessPatch {
        can_chat: Some(false),
        ..Default::default()
    };
    let success = format!(
        "❌ Bot access removed from {} (@{}).",
        profile.name,
        handle.trim_start_matches('@')
    );
    if apply(deps, chat_id, &profile, patch, success).await {
        info!(target = ?profile.user_id, "access revoked");
    }
}

async fn activate(deps: &AdminDeps<'_>, chat_id: i64, handle: &str) {
    let Some(profile) = lookup(deps, chat_id, handle).await else {
        return;
    };
    let patch = AccessPatch {
        active: Some(true),
        ..Default::default()
    };
    let success = format!("✅ {} has been activated.", profile.name);
    apply(deps, chat_id, &profile, patch, success).await;
}

async fn deactivate(deps: &AdminDeps<'_>, chat_id: i64, handle: &str) {
    let Some(profile) = lookup(deps, chat_id, handle).await else {
        return;
    };
    let patch = AccessPatch {
        active: Some(false),
        can_chat: Some(false),
        ..Default::default()
    };
    let success = format!("❌ {} has been deactivated.", profile.name);
    apply(deps, chat_id, &profile, patch, success).await;
}

async fn enroll(deps: &AdminDeps<'_>, chat_id: i64, arg: &str) {
    let Ok(user_id) = arg.parse::<i64>() else {
        send(deps, chat_id, "❌ Invalid user ID. Must be a number.").await;
        return;
    };

    match deps.transport.get_entity(user_id).await {
        Ok(Some(entity)) => {
            let name = entity.full_name();
            match deps
                .profiles
                .create_user(&name, entity.username.as_deref(), user_id)
                .await
            {
                Ok(()) => {
                    deps.auth.invalidate_all();
                    info!(user_id, name = %name, "user enrolled");
                    send(
                        deps,
                        chat_id,
                        &format!("✅ Created and activated user: {name} - ID: {user_id}"),
                    )
                    .await;
                }
                Err(e) => {
                    error!(user_id, error = %e, "user creation failed");
                    send(
                        deps,
                        chat_id,
                        &format!("❌ Failed to create user with ID {user_id}. Check logs."),
                    )
                    .await;
                }
            }
        }
        Ok(None) | Err(_) => {
            send(
                deps,
                chat_id,
                &format!(
                    "❌ Could not fetch user data for ID {user_id}. \
                     The user may never have messaged the bot."
                ),
            )
            .await;
        }
    }
}

async fn promote(deps: &AdminDeps<'_>, chat_id: i64, handle: &str) {
    let Some(profile) = lookup(deps, chat_id, handle).await else {
        return;
    };
    let patch = AccessPatch {
        admin: Some(true),
        active: Some(true),
        can_chat: Some(true),
    };
    let success = format!("👑 {} is now an admin.", profile.name);
    if apply(deps, chat_id, &profile, patch, success).await {
        deps.roster.reload(deps.profiles).await;
    }
}

async fn demote(deps: &AdminDeps<'_>, chat_id: i64, handle: &str) {
    let Some(profile) = lookup(deps, chat_id, handle).await else {
        return;
    };
    if profile.user_id == Some(PRIMARY_ADMIN_ID) {
        send(
            deps,
            chat_id,
            "❌ Cannot remove admin privileges from the primary admin.",
        )
        .await;
        return;
    }
    let patch = AccessPatch {
        admin: Some(false),
        ..Default::default()
    };
    let success = format!("👤 Admin privileges removed from {}.", profile.name);
    if apply(deps, chat_id, &profile, patch, success).await {
        deps.roster.reload(deps.profiles).await;
    }
}

async fn reload_admins(deps: &AdminDeps<'_>, chat_id: i64) {
    deps.roster.reload(deps.profiles).await;
    let count = deps.roster.ids().len();
    send(
        deps,
        chat_id,
        &format!("✅ Admin list refreshed. Current admins: {count}"),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthCache, AUTH_CACHE_TTL};
    use crate::testutil::{profile, FakeProfileStore, FakeTransport};
    use crate::transport::EntityInfo;
    use std::sync::Arc;

    struct Harness {
        transport: Arc<FakeTransport>,
        profiles: Arc<FakeProfileStore>,
        auth: AuthCache,
        roster: AdminRoster,
    }

    impl Harness {
        fn new(records: Vec<crate::profile::UserProfile>) -> Self {
            let profiles = Arc::new(FakeProfileStore::new(records));
            let auth = AuthCache::new(profiles.clone(), AUTH_CACHE_TTL, 20);
            Self {
                transport: Arc::new(FakeTransport::new()),
                profiles,
                auth,
                roster: AdminRoster::new(),
            }
        }

        fn deps(&self) -> AdminDeps<'_> {
            AdminDeps {
                transport: self.transport.as_ref(),
                profiles: self.profiles.as_ref(),
                auth: &self.auth,
                roster: &self.roster,
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_command_falls_through() {
        let h = Harness::new(vec![]);
        assert!(!dispatch(&h.deps(), 1, "/weather today").await);
        assert!(!dispatch(&h.deps(), 1, "hello").await);
        // Missing argument also falls through to the plain table.
        assert!(!dispatch(&h.deps(), 1, "/grant").await);
    }

    #[tokio::test]
    async fn test_grant_updates_record_and_invalidates_cache() {
        let h = Harness::new(vec![profile(7, "Bob", false)]);

        // Prime the cache with the denied state.
        assert!(!h.auth.authorize(7).await.authorized);

        assert!(dispatch(&h.deps(), 1, "/grant @bob").await);

        assert!(h.profiles.get(7).unwrap().can_chat);
        // The mutation must be visible immediately, TTL notwithstanding.
        assert!(h.auth.authorize(7).await.authorized);
        let (_, text) = h.transport.last_sent().unwrap();
        assert!(text.contains("has been given bot access"));
    }

    #[tokio::test]
    async fn test_revoke_and_deactivate() {
        let h = Harness::new(vec![profile(7, "Bob", true)]);

        assert!(dispatch(&h.deps(), 1, "/revoke @bob").await);
        assert!(!h.profiles.get(7).unwrap().can_chat);

        assert!(dispatch(&h.deps(), 1, "/deactivate @bob").await);
        let bob = h.profiles.records.lock().unwrap()[0].clone();
        assert!(!bob.active);
        assert!(!bob.can_chat);
    }

    #[tokio::test]
    async fn test_grant_unknown_handle_reports_not_found() {
        let h = Harness::new(vec![]);
        assert!(dispatch(&h.deps(), 1, "/grant @ghost").await);
        let (_, text) = h.transport.last_sent().unwrap();
        assert!(text.contains("not found"));
    }

    #[tokio::test]
    async fn test_promote_reloads_roster() {
        let h = Harness::new(vec![profile(9, "Carol", true)]);
        assert!(!h.roster.is_admin(9));

        assert!(dispatch(&h.deps(), 1, "/promote @carol").await);

        assert!(h.profiles.get(9).unwrap().admin);
        assert!(h.roster.is_admin(9));
        assert!(h.roster.is_admin(PRIMARY_ADMIN_ID));
    }

    #[tokio::test]
    async fn test_demote_primary_admin_refused() {
        let mut root = profile(PRIMARY_ADMIN_ID, "Root", true);
        root.admin = true;
        let h = Harness::new(vec![root]);
        h.roster.reload(h.profiles.as_ref()).await;
        let before = h.roster.ids();

        assert!(dispatch(&h.deps(), 1, "/demote @root").await);

        let (_, text) = h.transport.last_sent().unwrap();
        assert!(text.contains("Cannot remove admin privileges"));
        assert!(h.profiles.get(PRIMARY_ADMIN_ID).unwrap().admin);
        assert_eq!(h.roster.ids(), before);
    }

    #[tokio::test]
    async fn test_demote_regular_admin() {
        let mut carol = profile(9, "Carol", true);
        carol.admin = true;
        let h = Harness::new(vec![carol]);
        h.roster.reload(h.profiles.as_ref()).await;
        assert!(h.roster.is_admin(9));

        assert!(dispatch(&h.deps(), 1, "/demote @carol").await);

        assert!(!h.profiles.get(9).unwrap().admin);
        assert!(!h.roster.is_admin(9));
        // The fallback admin survives every reload.
        assert!(h.roster.is_admin(PRIMARY_ADMIN_ID));
    }

    #[tokio::test]
    async fn test_enroll_creates_record_from_entity() {
        let h = Harness::new(vec![]);
        h.transport.entities.lock().unwrap().insert(
            55,
            EntityInfo {
                first_name: Some("Dana".into()),
                last_name: Some("Reyes".into()),
                username: Some("dana".into()),
            },
        );

        assert!(dispatch(&h.deps(), 1, "/enroll 55").await);

        let dana = h.profiles.get(55).unwrap();
        assert_eq!(dana.name, "Dana Reyes");
        assert_eq!(dana.handle.as_deref(), Some("@dana"));
        assert!(dana.can_chat);
        assert!(dana.active);
    }

    #[tokio::test]
    async fn test_enroll_rejects_bad_id_and_unknown_entity() {
        let h = Harness::new(vec![]);

        assert!(dispatch(&h.deps(), 1, "/enroll abc").await);
        assert!(h.transport.last_sent().unwrap().1.contains("Invalid user ID"));

        assert!(dispatch(&h.deps(), 1, "/enroll 77").await);
        assert!(h
            .transport
            .last_sent()
            .unwrap()
            .1
            .contains("Could not fetch user data"));
    }

    #[tokio::test]
    async fn test_roster_reload_survives_store_failure() {
        let h = Harness::new(vec![]);
        h.profiles
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        h.roster.reload(h.profiles.as_ref()).await;
        assert_eq!(h.roster.ids(), vec![PRIMARY_ADMIN_ID]);
    }
}
