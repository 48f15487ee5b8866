//! Rate limiting for login attempts
//!
//! Two sliding windows guard the login endpoints:
//! - failed attempts per username (5 per 15 minutes)
//! - login requests per client IP (10 per minute)

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

const USERNAME_LIMIT: usize = 5;
const USERNAME_WINDOW_MINUTES: i64 = 15;
const IP_LIMIT: usize = 10;
const IP_WINDOW_MINUTES: i64 = 1;

/// Counts events per key over a trailing time window
pub struct SlidingWindow<K> {
    limit: usize,
    window: Duration,
    hits: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
}

impl<K: Eq + Hash + Clone> SlidingWindow<K> {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: RwLock::new(HashMap::new()),
        }
    }

    /// Seconds until the key may act again, or `None` when it is not limited
    pub async fn retry_after(&self, key: &K) -> Option<u64> {
        self.retry_after_at(key, Utc::now()).await
    }

    async fn retry_after_at(&self, key: &K, now: DateTime<Utc>) -> Option<u64> {
        let mut hits = self.hits.write().await;
        let times = hits.get_mut(key)?;
        let cutoff = now - self.window;
        times.retain(|t| *t > cutoff);

        if times.len() < self.limit {
            return None;
        }
        // The window reopens when the oldest counted hit ages out
        let oldest = times.iter().min().copied()?;
        let wait = (oldest + self.window - now).num_seconds().max(1);
        Some(wait as u64)
    }

    pub async fn record(&self, key: K) {
        self.record_at(key, Utc::now()).await;
    }

    async fn record_at(&self, key: K, at: DateTime<Utc>) {
        self.hits.write().await.entry(key).or_default().push(at);
    }

    pub async fn clear(&self, key: &K) {
        self.hits.write().await.remove(key);
    }

    /// Forget hits that fell out of the window
    pub async fn cleanup(&self) {
        let cutoff = Utc::now() - self.window;
        self.hits.write().await.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
    }
}

/// Login rate limiter
pub struct LoginRateLimiter {
    usernames: SlidingWindow<String>,
    ips: SlidingWindow<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            usernames: SlidingWindow::new(USERNAME_LIMIT, Duration::minutes(USERNAME_WINDOW_MINUTES)),
            ips: SlidingWindow::new(IP_LIMIT, Duration::minutes(IP_WINDOW_MINUTES)),
        }
    }

    /// Count a login request from `ip` and report whether it must wait.
    /// Returns the retry delay in seconds when limited.
    pub async fn check_ip(&self, ip: IpAddr) -> Option<u64> {
        if let Some(wait) = self.ips.retry_after(&ip).await {
            return Some(wait);
        }
        self.ips.record(ip).await;
        None
    }

    /// Retry delay in seconds when the username has too many failures
    pub async fn check_username(&self, username: &str) -> Option<u64> {
        self.usernames.retry_after(&username.to_lowercase()).await
    }

    pub async fn record_failed_attempt(&self, username: &str) {
        self.usernames.record(username.to_lowercase()).await;
    }

    /// Forget failures after a successful login
    pub async fn clear_username(&self, username: &str) {
        self.usernames.clear(&username.to_lowercase()).await;
    }

    pub async fn cleanup(&self) {
        self.usernames.cleanup().await;
        self.ips.cleanup().await;
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
