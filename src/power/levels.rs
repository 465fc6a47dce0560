//! The power-level state event content and level lookups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content of a room's power-level state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLevels {
    #[serde(default)]
    pub users: BTreeMap<String, i64>,
    #[serde(default)]
    pub users_default: i64,
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
    #[serde(default)]
    pub events_default: i64,
    #[serde(default = "default_moderation")]
    pub state_default: i64,
    #[serde(default = "default_moderation")]
    pub ban: i64,
    #[serde(default = "default_moderation")]
    pub kick: i64,
    #[serde(default = "default_moderation")]
    pub redact: i64,
    #[serde(default)]
    pub invite: i64,
}

fn default_moderation() -> i64 {
    50
}

impl Default for PowerLevels {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            users_default: 0,
            events: BTreeMap::new(),
            events_default: 0,
            state_default: default_moderation(),
            ban: default_moderation(),
            kick: default_moderation(),
            redact: default_moderation(),
            invite: 0,
        }
    }
}

pub const POWER_LEVELS_EVENT: &str = "m.room.power_levels";
pub const MESSAGE_EVENT: &str = "m.room.message";

impl PowerLevels {
    /// Effective level of `user` (explicit entry or the room default).
    pub fn user_level(&self, user: &str) -> i64 {
        self.users.get(user).copied().unwrap_or(self.users_default)
    }

    /// Explicit level of `user`, if the room lists one.
    pub fn explicit_level(&self, user: &str) -> Option<i64> {
        self.users.get(user).copied()
    }

    /// Level required to send room messages.
    pub fn send_threshold(&self) -> i64 {
        self.events
            .get(MESSAGE_EVENT)
            .copied()
            .unwrap_or(self.events_default)
    }

    /// Level required to send a state event of `event_type`.
    pub fn state_level(&self, event_type: &str) -> i64 {
        self.events
            .get(event_type)
            .copied()
            .unwrap_or(self.state_default)
    }

    /// Whether `user` may change the power levels at all.
    pub fn can_change_power_levels(&self, user: &str) -> bool {
        self.user_level(user) >= self.state_level(POWER_LEVELS_EVENT)
    }

    /// Highest explicit level in the room.
    pub fn max_level(&self) -> i64 {
        self.users
            .values()
            .copied()
            .max()
            .unwrap_or(self.users_default)
    }

    /// Apply `(user, level)` changes; `None` removes the explicit entry.
    pub fn apply(&mut self, changes: &[(String, Option<i64>)]) {
        for (user, level) in changes {
            match level {
                Some(level) => {
                    self.users.insert(user.clone(), *level);
                }
                None => {
                    self.users.remove(user);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let pl: PowerLevels = serde_json::from_str("{}").unwrap();
        assert_eq!(pl.state_default, 50);
        assert_eq!(pl.ban, 50);
        assert_eq!(pl.invite, 0);
        assert_eq!(pl.send_threshold(), 0);
    }

    #[test]
    fn user_level_falls_back_to_default() {
        let mut pl = PowerLevels {
            users_default: -1,
            ..Default::default()
        };
        pl.users.insert("@mod:example.org".into(), 50);
        assert_eq!(pl.user_level("@mod:example.org"), 50);
        assert_eq!(pl.user_level("@new:example.org"), -1);
        assert!(pl.can_change_power_levels("@mod:example.org"));
        assert!(!pl.can_change_power_levels("@new:example.org"));
    }

    #[test]
    fn message_event_overrides_events_default() {
        let mut pl = PowerLevels::default();
        pl.events.insert(MESSAGE_EVENT.into(), 10);
        assert_eq!(pl.send_threshold(), 10);
    }

    #[test]
    fn apply_sets_and_removes() {
        let mut pl = PowerLevels::default();
        pl.users.insert("@a:example.org".into(), 50);
        pl.apply(&[
            ("@a:example.org".into(), None),
            ("@b:example.org".into(), Some(20)),
        ]);
        assert_eq!(pl.explicit_level("@a:example.org"), None);
        assert_eq!(pl.explicit_level("@b:example.org"), Some(20));
        assert_eq!(pl.max_level(), 20);
    }
}
