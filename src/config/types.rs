//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::moderation::{BanlistConfig, CensorConfig, TrackingConfig, VerificationConfig};
use super::rooms::{GreetingsConfig, PowerConfig, RoomsConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Agent configuration.
///
/// Read-only for the engine: components receive it as `Arc<Config>` at
/// construction time and never write back.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bot identity and administrators.
    pub bot: BotConfig,
    /// Activity tracking toggles and inactivity thresholds.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Word-list censorship.
    #[serde(default)]
    pub censor: CensorConfig,
    /// Subscribed ban-policy rooms.
    #[serde(default)]
    pub banlists: BanlistConfig,
    /// Join verification challenge settings.
    #[serde(default)]
    pub verification: VerificationConfig,
    /// Room creation defaults.
    #[serde(default)]
    pub rooms: RoomsConfig,
    /// Power-level reconciliation policy.
    #[serde(default)]
    pub power: PowerConfig,
    /// Outbound action queue pacing.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Greeting texts and the rooms they are bound to.
    #[serde(default)]
    pub greetings: GreetingsConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Returns true if `user` may run administrative commands.
    pub fn is_admin(&self, user: &str) -> bool {
        self.bot.admins.iter().any(|a| a == user)
    }

    /// Returns true if `user` may run moderator commands (admins included).
    pub fn is_moderator(&self, user: &str) -> bool {
        self.is_admin(user) || self.bot.moderators.iter().any(|m| m == user)
    }
}

/// Bot identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// The bot's own user id (e.g., "@keeper:example.org").
    pub user_id: String,
    /// The parent space all managed rooms belong to.
    pub parent_space: String,
    /// Users allowed to run every command.
    #[serde(default)]
    pub admins: Vec<String>,
    /// Users allowed to run moderator commands (room creation).
    #[serde(default)]
    pub moderators: Vec<String>,
    /// Room receiving enforcement notifications.
    #[serde(default)]
    pub notification_room: Option<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    pub path: String,
}

/// Outbound action queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Minimum delay between two mutating protocol calls, in milliseconds.
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    /// Number of actions that may wait in the queue before submitters block.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sleep_ms: default_sleep_ms(),
            capacity: default_queue_capacity(),
        }
    }
}

fn default_sleep_ms() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    1024
}

pub(super) fn default_true() -> bool {
    true
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    toml::from_str(
        r#"
[bot]
user_id = "@keeper:example.org"
parent_space = "!space:example.org"
admins = ["@admin:example.org"]
moderators = ["@mod:example.org"]

[queue]
sleep_ms = 0
"#,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = test_config();
        assert_eq!(config.tracking.warn_threshold_days, 30);
        assert_eq!(config.tracking.kick_threshold_days, 60);
        assert!(config.tracking.track_users);
        assert_eq!(config.verification.attempts, 3);
        assert_eq!(config.rooms.bot_power_level, 1000);
        assert_eq!(config.queue.sleep_ms, 0);
        assert!(config.database.is_none());
    }

    #[test]
    fn queue_default_sleep_is_half_a_second() {
        assert_eq!(QueueConfig::default().sleep_ms, 500);
    }

    #[test]
    fn admin_and_moderator_checks() {
        let config = test_config();
        assert!(config.is_admin("@admin:example.org"));
        assert!(!config.is_admin("@mod:example.org"));
        assert!(config.is_moderator("@mod:example.org"));
        assert!(config.is_moderator("@admin:example.org"));
        assert!(!config.is_moderator("@rando:example.org"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[bot]
user_id = "@keeper:example.org"
parent_space = "!space:example.org"

[database]
path = "data/keeper.db"
"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.database.unwrap().path, "data/keeper.db");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/keeper.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
