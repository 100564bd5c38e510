use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-user minimum-interval gate in front of the backend.
///
/// A permitted request records its timestamp; a denied request leaves the
/// state untouched, so the wait countdown is measured from the last request
/// that actually went through.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<HashMap<i64, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `(allowed, wait_seconds)` for the user at the current instant.
    pub fn check(&self, user_id: i64) -> (bool, f64) {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&self, user_id: i64, now: Instant) -> (bool, f64) {
        let mut last = self.last_request.lock().unwrap();
        if let Some(prev) = last.get(&user_id) {
            let elapsed = now.saturating_duration_since(*prev);
            if elapsed < self.min_interval {
                let remaining = (self.min_interval - elapsed).as_secs_f64();
                return (false, remaining);
            }
        }
        last.insert(user_id, now);
        (true, 0.0)
    }
}
