//! Service configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `CANTEEN__SECTION__KEY` environment variables.

use anyhow::{Context, Result};
use chrono::{TimeDelta, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::rate_limiter::RateLimiterConfig;

/// Default location of the optional settings file
pub const DEFAULT_CONFIG_PATH: &str = "canteen.toml";

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:3001".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Longest accepted validation window offset, one day
pub const MAX_WINDOW_MINUTES: i64 = 24 * 60;
/// Longest accepted lock horizon, one leap year
pub const MAX_LOCK_HOURS: i64 = 366 * 24;

/// Meal timing policy. Deployments have run with different offsets and lock
/// horizons, so none of these are baked into the engines.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// The organisation's single timezone
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    /// Minutes before the meal the kiosk starts accepting validations
    #[serde(default = "default_window_before")]
    pub window_before_minutes: i64,
    /// Minutes after the meal the kiosk keeps accepting validations
    #[serde(default = "default_window_after")]
    pub window_after_minutes: i64,
    /// A slot closer than this to its meal time is frozen for self-service
    #[serde(default = "default_lock_hours")]
    pub lock_hours: i64,
    /// First day of a reporting week
    #[serde(default = "default_week_start")]
    pub week_start: Weekday,
    /// Days, starting today, a member may view and toggle
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
}

fn default_timezone() -> Tz {
    chrono_tz::Europe::Bucharest
}
fn default_window_before() -> i64 {
    60
}
fn default_window_after() -> i64 {
    140
}
fn default_lock_hours() -> i64 {
    25
}
fn default_week_start() -> Weekday {
    Weekday::Sat
}
fn default_horizon_days() -> u32 {
    31
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            window_before_minutes: default_window_before(),
            window_after_minutes: default_window_after(),
            lock_hours: default_lock_hours(),
            week_start: default_week_start(),
            horizon_days: default_horizon_days(),
        }
    }
}

/// Session token settings
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC key used to sign session tokens
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Sliding lifetime of a member session in seconds
    #[serde(default = "default_member_ttl")]
    pub member_ttl_seconds: u64,
    /// Lifetime of a staff session in seconds
    #[serde(default = "default_staff_ttl")]
    pub staff_ttl_seconds: u64,
}

/// Development-only signing key
pub const DEV_SECRET: &str = "dev-secret";

fn default_secret() -> String {
    DEV_SECRET.to_string()
}
fn default_member_ttl() -> u64 {
    900
}
fn default_staff_ttl() -> u64 {
    28_800
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            member_ttl_seconds: default_member_ttl(),
            staff_ttl_seconds: default_staff_ttl(),
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimiterConfig,
}

impl Settings {
    /// Load settings from the file named by `CANTEEN_CONFIG` (or the default
    /// path) plus environment overrides
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("CANTEEN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load settings from `path` (missing file is fine) plus environment overrides
    pub fn load_from(path: &str) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("CANTEEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to build config from: {}", path))?
            .try_deserialize()
            .with_context(|| format!("Failed to deserialize config from: {}", path))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;
        for (name, minutes) in [
            ("window_before_minutes", policy.window_before_minutes),
            ("window_after_minutes", policy.window_after_minutes),
        ] {
            if !(0..=MAX_WINDOW_MINUTES).contains(&minutes)
                || TimeDelta::try_minutes(minutes).is_none()
            {
                anyhow::bail!("{} must be between 0 and {}", name, MAX_WINDOW_MINUTES);
            }
        }
        if !(0..=MAX_LOCK_HOURS).contains(&policy.lock_hours)
            || TimeDelta::try_hours(policy.lock_hours).is_none()
        {
            anyhow::bail!("lock_hours must be between 0 and {}", MAX_LOCK_HOURS);
        }
        if policy.horizon_days == 0 {
            anyhow::bail!("horizon_days must be at least 1");
        }
        if self.session.secret.is_empty() {
            anyhow::bail!("session.secret must not be empty");
        }
        if self.session.member_ttl_seconds == 0 || self.session.staff_ttl_seconds == 0 {
            anyhow::bail!("session lifetimes must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "canteen-config-test-{}-{}.toml",
            std::process::id(),
            contents.len()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let settings = Settings::load_from("/nonexistent/canteen.toml").unwrap();
        assert_eq!(settings.server.listen, "0.0.0.0:3001");
        assert_eq!(settings.policy.timezone, chrono_tz::Europe::Bucharest);
        assert_eq!(settings.policy.window_before_minutes, 60);
        assert_eq!(settings.policy.window_after_minutes, 140);
        assert_eq!(settings.policy.lock_hours, 25);
        assert_eq!(settings.policy.week_start, Weekday::Sat);
        assert_eq!(settings.policy.horizon_days, 31);
        assert_eq!(settings.rate_limit.max_attempts, 5);
    }

    #[test]
    #[serial]
    fn test_file_overrides_policy() {
        let path = write_config(
            r#"
[policy]
timezone = "Europe/Lisbon"
window_after_minutes = 90
lock_hours = 48
week_start = "Mon"
"#,
        );

        let settings = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.policy.timezone, chrono_tz::Europe::Lisbon);
        assert_eq!(settings.policy.window_before_minutes, 60);
        assert_eq!(settings.policy.window_after_minutes, 90);
        assert_eq!(settings.policy.lock_hours, 48);
        assert_eq!(settings.policy.week_start, Weekday::Mon);

        std::fs::remove_file(path).ok();
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        unsafe {
            std::env::set_var("CANTEEN__POLICY__LOCK_HOURS", "48");
            std::env::set_var("CANTEEN__SESSION__SECRET", "from-env");
        }

        let settings = Settings::load_from("/nonexistent/canteen.toml").unwrap();
        assert_eq!(settings.policy.lock_hours, 48);
        assert_eq!(settings.session.secret, "from-env");

        unsafe {
            std::env::remove_var("CANTEEN__POLICY__LOCK_HOURS");
            std::env::remove_var("CANTEEN__SESSION__SECRET");
        }
    }

    #[test]
    fn test_validate_rejects_oversized_offsets() {
        let mut settings = Settings::default();
        settings.policy.lock_hours = i64::MAX;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.policy.window_after_minutes = i64::MAX / 2;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.policy.window_before_minutes = -5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.policy.lock_hours = MAX_LOCK_HOURS;
        settings.policy.window_after_minutes = MAX_WINDOW_MINUTES;
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_huge_lock_hours_is_a_config_error() {
        unsafe {
            std::env::set_var("CANTEEN__POLICY__LOCK_HOURS", "9223372036854775807");
        }

        let result = Settings::load_from("/nonexistent/canteen.toml");

        unsafe {
            std::env::remove_var("CANTEEN__POLICY__LOCK_HOURS");
        }
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_horizon() {
        let mut settings = Settings::default();
        settings.policy.horizon_days = 0;
        assert!(settings.validate().is_err());
    }
}
