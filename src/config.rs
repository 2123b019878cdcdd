//! Configuration and settings management
//!
//! Loads settings from environment variables and defines tuning constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Telegram user ID of the bot owner/administrator
    pub owner_id: i64,

    /// Path of the persisted premium entitlement file
    #[serde(default = "default_entitlement_file")]
    pub entitlement_file: PathBuf,

    /// Directory where per-flow temporary artifacts are created
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Path of the ffmpeg binary used for video compression
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Port the liveness probe listens on
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_entitlement_file() -> PathBuf {
    PathBuf::from("premium.json")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

const fn default_health_port() -> u16 {
    5000
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or required keys
    /// (`TELEGRAM_TOKEN`, `OWNER_ID`) are missing.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }
}

// Session correlation
/// How long a pending operation waits for its follow-up reply
pub const SESSION_TIMEOUT_SECS: u64 = 600; // 10 minutes
/// How often the sweep task reclaims stale sessions and selections
pub const SWEEP_INTERVAL_SECS: u64 = 60;
/// How long an unconsumed operation menu stays selectable
pub const SELECTION_TIMEOUT_SECS: u64 = 3600;

// File operations
/// Target bitrate for video compression
pub const VIDEO_BITRATE: &str = "400k";
/// Bot API refuses downloads above this size
pub const MAX_DOWNLOAD_SIZE: u32 = 20 * 1024 * 1024; // 20 MB

// Telegram API retry configuration
/// Initial backoff delay for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff delay for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum retry attempts for Telegram API operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

// Denial-message flood protection
/// Seconds between "not premium" messages to the same user
pub const DENIAL_COOLDOWN_SECS: u64 = 1200; // 20 minutes
/// Time-to-live for denial cache entries
pub const DENIAL_CACHE_TTL_SECS: u64 = 7200; // 2 hours
/// Maximum number of denial cache entries
pub const DENIAL_CACHE_MAX_SIZE: u64 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_settings_from_env() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("OWNER_ID", "42");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_token, "dummy_token");
        assert_eq!(settings.owner_id, 42);
        assert_eq!(settings.entitlement_file, PathBuf::from("premium.json"));
        assert_eq!(settings.work_dir, PathBuf::from("downloads"));
        assert_eq!(settings.ffmpeg_path, "ffmpeg");
        assert_eq!(settings.health_port, 5000);

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("OWNER_ID");
        Ok(())
    }
}
