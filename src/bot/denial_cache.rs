//! Flood protection for "not premium" denial messages.
//!
//! A non-entitled user poking the bot repeatedly would otherwise make it
//! answer every single time, risking Telegram rate limits. Each user gets
//! the denial message at most once per cooldown window; suppressed attempts
//! are only logged.

use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

/// Tracks which users recently received a denial message
#[derive(Clone)]
pub struct DenialCache {
    recently_denied: Cache<i64, ()>,
}

impl DenialCache {
    /// Create a cache that suppresses repeat denials for `cooldown_secs`,
    /// evicting entries after `ttl_secs` and capping at `max_capacity`
    /// tracked users.
    #[must_use]
    pub fn new(cooldown_secs: u64, ttl_secs: u64, max_capacity: u64) -> Self {
        let recently_denied = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(Duration::from_secs(cooldown_secs))
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { recently_denied }
    }

    /// Whether this user should be told they lack premium right now.
    pub async fn should_notify(&self, user_id: i64) -> bool {
        if self.recently_denied.get(&user_id).await.is_none() {
            return true;
        }
        debug!(user_id, "Suppressed repeat denial message");
        false
    }

    /// Record that the denial message went out; starts the cooldown.
    pub async fn mark_notified(&self, user_id: i64) {
        self.recently_denied.insert(user_id, ()).await;
    }

    /// Number of users currently in cooldown, for monitoring.
    #[must_use]
    pub fn tracked_users(&self) -> u64 {
        self.recently_denied.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_attempt_notifies() {
        let cache = DenialCache::new(60, 120, 100);
        assert!(cache.should_notify(1).await);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeats() {
        let cache = DenialCache::new(60, 120, 100);
        assert!(cache.should_notify(1).await);
        cache.mark_notified(1).await;
        assert!(!cache.should_notify(1).await);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let cache = DenialCache::new(60, 120, 100);
        cache.mark_notified(1).await;
        assert!(cache.should_notify(2).await);
    }

    #[tokio::test]
    async fn tracked_users_counts_entries() {
        let cache = DenialCache::new(60, 120, 100);
        cache.mark_notified(1).await;
        cache.mark_notified(2).await;
        cache.recently_denied.run_pending_tasks().await;
        assert_eq!(cache.tracked_users(), 2);
    }
}
