//! Time-bounded authorization cache over the profile store.
//!
//! Lookups are memoized per user ID for [`AUTH_CACHE_TTL`]; expired entries
//! are retained so a failing profile store can fall back to the last known
//! answer. With no cached value at all, a failed lookup denies access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::profile::ProfileStore;

pub const AUTH_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cached view of one user's authorization state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRecord {
    pub authorized: bool,
    pub profile_text: String,
    pub context_lines: usize,
    pub display_name: String,
}

struct CacheEntry {
    record: AuthRecord,
    expires_at: Instant,
}

pub struct AuthCache {
    profiles: Arc<dyn ProfileStore>,
    ttl: Duration,
    default_context_lines: usize,
    entries: Mutex<HashMap<i64, CacheEntry>>,
}

impl AuthCache {
    pub fn new(profiles: Arc<dyn ProfileStore>, ttl: Duration, default_context_lines: usize) -> Self {
        Self {
            profiles,
            ttl,
            default_context_lines,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the user's authorization record, consulting the cache first.
    ///
    /// Not-found users are cached as denied for the full TTL; an admin
    /// mutation clears them via [`AuthCache::invalidate_all`].
    pub async fn authorize(&self, user_id: i64) -> AuthRecord {
        let now = Instant::now();
        if let Some(record) = self.fresh(user_id, now) {
            debug!(user_id, "using cached authorization");
            return record;
        }

        match self.profiles.fetch_by_user_id(user_id).await {
            Ok(Some(profile)) => {
                let record = AuthRecord {
                    authorized: profile.can_chat,
                    profile_text: profile.profile_text(),
                    context_lines: profile.context_lines.unwrap_or(self.default_context_lines),
                    display_name: profile.name.clone(),
                };
                info!(
                    user_id,
                    name = %profile.name,
                    authorized = record.authorized,
                    "authorization resolved"
                );
                self.put(user_id, record.clone(), now);
                record
            }
            Ok(None) => {
                info!(user_id, "user not found in profile store");
                let record = self.denied();
                self.put(user_id, record.clone(), now);
                record
            }
            Err(e) => {
                error!(user_id, error = %e, "authorization lookup failed");
                match self.stale(user_id) {
                    Some(record) => {
                        warn!(user_id, "serving last known authorization after lookup failure");
                        record
                    }
                    // Fail closed: no history means no access.
                    None => self.denied(),
                }
            }
        }
    }

    /// Drops every cached entry. Called after any profile-store mutation,
    /// since handle-based mutations do not map 1:1 to ID-based cache keys.
    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
        info!("authorization cache cleared");
    }

    fn denied(&self) -> AuthRecord {
        AuthRecord {
            authorized: false,
            profile_text: String::new(),
            context_lines: self.default_context_lines,
            display_name: "Unknown".to_string(),
        }
    }

    fn fresh(&self, user_id: i64, now: Instant) -> Option<AuthRecord> {
        self.entries
            .lock()
            .unwrap()
            .get(&user_id)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.record.clone())
    }

    fn stale(&self, user_id: i64) -> Option<AuthRecord> {
        self.entries
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|entry| entry.record.clone())
    }

    fn put(&self, user_id: i64, record: AuthRecord, now: Instant) {
        self.entries.lock().unwrap().insert(
            user_id,
            CacheEntry {
                record,
                expires_at: now + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{profile, FakeProfileStore};
    use std::sync::atomic::Ordering;

    fn cache_with(store: Arc<FakeProfileStore>, ttl: Duration) -> AuthCache {
        AuthCache::new(store, ttl, 20)
    }

    #[tokio::test]
    async fn test_hit_skips_second_lookup() {
        let store = Arc::new(FakeProfileStore::new(vec![profile(42, "Alex", true)]));
        let cache = cache_with(store.clone(), AUTH_CACHE_TTL);

        let first = cache.authorize(42).await;
        let second = cache.authorize(42).await;

        assert!(first.authorized);
        assert_eq!(first, second);
        assert_eq!(store.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_denied_and_cached() {
        let store = Arc::new(FakeProfileStore::new(vec![]));
        let cache = cache_with(store.clone(), AUTH_CACHE_TTL);

        let record = cache.authorize(7).await;
        assert!(!record.authorized);
        assert_eq!(record.context_lines, 20);

        cache.authorize(7).await;
        assert_eq!(store.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_closed_without_cache() {
        let store = Arc::new(FakeProfileStore::new(vec![profile(42, "Alex", true)]));
        store.fail.store(true, Ordering::SeqCst);
        let cache = cache_with(store, AUTH_CACHE_TTL);

        let record = cache.authorize(42).await;
        assert!(!record.authorized);
    }

    #[tokio::test]
    async fn test_stale_fallback_on_lookup_failure() {
        let store = Arc::new(FakeProfileStore::new(vec![profile(42, "Alex", true)]));
        // Zero TTL: every entry is stale the moment it is written.
        let cache = cache_with(store.clone(), Duration::ZERO);

        assert!(cache.authorize(42).await.authorized);

        store.fail.store(true, Ordering::SeqCst);
        let record = cache.authorize(42).await;
        assert!(record.authorized, "stale value should be served on failure");
        assert_eq!(record.display_name, "Alex");
    }

    #[tokio::test]
    async fn test_invalidate_all_forces_refetch() {
        let store = Arc::new(FakeProfileStore::new(vec![profile(42, "Alex", false)]));
        let cache = cache_with(store.clone(), AUTH_CACHE_TTL);

        assert!(!cache.authorize(42).await.authorized);

        // Access granted out of band, then the cache is invalidated the way
        // the admin dispatcher does it.
        store.set_can_chat(42, true);
        cache.invalidate_all();

        assert!(cache.authorize(42).await.authorized);
        assert_eq!(store.fetch_calls.load(Ordering::SeqCst), 2);
    }
}
