//! Moderation configuration: activity tracking, censorship, banlists and
//! join verification.

use serde::Deserialize;

use super::types::default_true;

/// Activity tracking configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Master switch for per-user activity tracking.
    #[serde(default = "default_true")]
    pub track_users: bool,
    /// Count room messages as activity.
    #[serde(default = "default_true")]
    pub track_messages: bool,
    /// Count reactions as activity.
    #[serde(default = "default_true")]
    pub track_reactions: bool,
    /// Days of inactivity before a user is reported as `warn`.
    #[serde(default = "default_warn_days")]
    pub warn_threshold_days: u32,
    /// Days of inactivity before a user is reported as `danger` (purgeable).
    #[serde(default = "default_kick_days")]
    pub kick_threshold_days: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_users: true,
            track_messages: true,
            track_reactions: true,
            warn_threshold_days: default_warn_days(),
            kick_threshold_days: default_kick_days(),
        }
    }
}

fn default_warn_days() -> u32 {
    30
}

fn default_kick_days() -> u32 {
    60
}

/// Which rooms censorship applies to.
///
/// Accepts either a boolean (every managed room / none) or an explicit
/// allow-list of room ids.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CensorScope {
    All(bool),
    Rooms(Vec<String>),
}

impl Default for CensorScope {
    fn default() -> Self {
        CensorScope::All(false)
    }
}

impl CensorScope {
    /// Returns true if messages in `room` are subject to censorship.
    pub fn covers(&self, room: &str) -> bool {
        match self {
            CensorScope::All(enabled) => *enabled,
            CensorScope::Rooms(rooms) => rooms.iter().any(|r| r == room),
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            CensorScope::All(enabled) => *enabled,
            CensorScope::Rooms(rooms) => !rooms.is_empty(),
        }
    }
}

/// Word-list censorship configuration.
///
/// Matching is a literal, ASCII case-insensitive substring search.
#[derive(Debug, Clone, Deserialize)]
pub struct CensorConfig {
    #[serde(default)]
    pub enabled: CensorScope,
    /// Words whose presence gets a message redacted.
    #[serde(default)]
    pub words: Vec<String>,
    /// Words whose presence gets a message redacted and the sender banned.
    #[serde(default)]
    pub instant_ban_words: Vec<String>,
    /// Senders at or above this power level are never censored.
    #[serde(default = "default_uncensor_level")]
    pub uncensor_power_level: i64,
    /// Upper bound of messages inspected by the `redact` command.
    #[serde(default = "default_redact_limit")]
    pub redact_limit: usize,
}

impl Default for CensorConfig {
    fn default() -> Self {
        Self {
            enabled: CensorScope::default(),
            words: Vec::new(),
            instant_ban_words: Vec::new(),
            uncensor_power_level: default_uncensor_level(),
            redact_limit: default_redact_limit(),
        }
    }
}

fn default_uncensor_level() -> i64 {
    50
}

fn default_redact_limit() -> usize {
    100
}

/// Ban-policy subscription configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BanlistConfig {
    /// Policy rooms whose rules are ingested.
    #[serde(default)]
    pub rooms: Vec<String>,
    /// Check newly ingested rules against current membership of every
    /// managed room instead of waiting for the next join.
    #[serde(default)]
    pub proactive_banning: bool,
}

/// Join verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Rooms with verification enabled.
    #[serde(default)]
    pub enabled_rooms: Vec<String>,
    /// Challenge phrases; one is chosen at random per session.
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Attempts allowed before a session fails.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Compare responses case-sensitively.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    /// Challenge message; `{room}` and `{phrase}` are substituted.
    #[serde(default = "default_challenge")]
    pub message: String,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled_rooms: Vec::new(),
            phrases: Vec::new(),
            attempts: default_attempts(),
            case_sensitive: true,
            message: default_challenge(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_challenge() -> String {
    "To be able to speak in {room}, please reply with this phrase exactly: {phrase}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        censor: CensorConfig,
    }

    #[test]
    fn censor_scope_accepts_bool() {
        let w: Wrapper = toml::from_str("[censor]\nenabled = true\nwords = [\"spam\"]").unwrap();
        assert_eq!(w.censor.enabled, CensorScope::All(true));
        assert!(w.censor.enabled.covers("!any:example.org"));
    }

    #[test]
    fn censor_scope_accepts_room_list() {
        let w: Wrapper =
            toml::from_str("[censor]\nenabled = [\"!a:example.org\"]").unwrap();
        assert!(w.censor.enabled.covers("!a:example.org"));
        assert!(!w.censor.enabled.covers("!b:example.org"));
        assert!(w.censor.enabled.is_enabled());
    }

    #[test]
    fn censor_disabled_by_default() {
        let config = CensorConfig::default();
        assert!(!config.enabled.is_enabled());
        assert_eq!(config.uncensor_power_level, 50);
    }

    #[test]
    fn tracking_defaults() {
        let t = TrackingConfig::default();
        assert!(t.track_messages && t.track_reactions && t.track_users);
        assert!(t.warn_threshold_days < t.kick_threshold_days);
    }
}
