//! Rate limiter guarding PIN logins against brute force
//!
//! PINs are short, so failed attempts are counted per member number and the
//! member number is banned for a while once the budget is spent.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum number of failed attempts allowed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Time window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Ban duration in seconds
    #[serde(default = "default_ban_duration_seconds")]
    pub ban_duration_seconds: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_window_seconds() -> u64 {
    300 // 5 minutes
}
fn default_ban_duration_seconds() -> u64 {
    3600 // 1 hour
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_seconds: default_window_seconds(),
            ban_duration_seconds: default_ban_duration_seconds(),
        }
    }
}

/// Rate limiter entry
#[derive(Debug)]
struct RateLimiterEntry {
    /// Number of failed attempts in the current window
    failures: u32,
    /// Start of the current window
    window_started: Instant,
    /// Ban expiration time
    ban_expires: Option<Instant>,
}

/// Rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    entries: Arc<Mutex<HashMap<String, RateLimiterEntry>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether `key` may attempt a login right now
    pub async fn is_allowed(&self, key: &str) -> bool {
        self.is_allowed_at(key, Instant::now()).await
    }

    async fn is_allowed_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().await;
        let ban_expires = match entries.get(key) {
            Some(entry) => entry.ban_expires,
            None => return true,
        };

        match ban_expires {
            Some(ban_expires) if now < ban_expires => false,
            Some(_) => {
                // Ban expired, start over
                entries.remove(key);
                true
            }
            None => true,
        }
    }

    /// Count a failed attempt for `key`, banning it once over the limit
    pub async fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now()).await
    }

    async fn record_failure_at(&self, key: &str, now: Instant) {
        let window = Duration::from_secs(self.config.window_seconds);
        let mut entries = self.entries.lock().await;

        // Forget keys whose window lapsed without a ban still running
        entries.retain(|_, entry| match entry.ban_expires {
            Some(ban_expires) => now < ban_expires,
            None => now.duration_since(entry.window_started) < window,
        });

        let entry = entries.entry(key.to_string()).or_insert(RateLimiterEntry {
            failures: 0,
            window_started: now,
            ban_expires: None,
        });

        // Check if window has expired
        if now.duration_since(entry.window_started) >= window {
            entry.failures = 0;
            entry.window_started = now;
        }

        entry.failures += 1;
        if entry.failures >= self.config.max_attempts && entry.ban_expires.is_none() {
            entry.ban_expires = Some(now + Duration::from_secs(self.config.ban_duration_seconds));
            warn!(
                "Banned key {} for {} seconds after {} failed attempts",
                key, self.config.ban_duration_seconds, entry.failures
            );
        }
    }

    /// Forget the failure history of `key` after a successful login
    pub async fn reset(&self, key: &str) {
        if self.entries.lock().await.remove(key).is_some() {
            info!("Cleared failed attempts for key {}", key);
        }
    }
}
