//! Room creation defaults, power-level policy and greetings.

use serde::Deserialize;
use std::collections::HashMap;

use super::types::default_true;

/// Room creation defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Enable encryption on newly created rooms unless overridden.
    #[serde(default)]
    pub encrypt: bool,
    /// Users invited to every newly created room.
    #[serde(default)]
    pub invitees: Vec<String>,
    /// Power level required to invite in newly created rooms.
    #[serde(default = "default_invite_level")]
    pub invite_power_level: i64,
    /// Level given to configured admins in newly created rooms.
    #[serde(default = "default_admin_level")]
    pub admin_power_level: i64,
    /// The bot's own level in rooms it creates. Raised above every target
    /// level if configured lower.
    #[serde(default = "default_bot_level")]
    pub bot_power_level: i64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            encrypt: false,
            invitees: Vec::new(),
            invite_power_level: default_invite_level(),
            admin_power_level: default_admin_level(),
            bot_power_level: default_bot_level(),
        }
    }
}

fn default_invite_level() -> i64 {
    50
}

fn default_admin_level() -> i64 {
    100
}

fn default_bot_level() -> i64 {
    1000
}

/// Power-level reconciliation policy.
#[derive(Debug, Clone, Deserialize)]
pub struct PowerConfig {
    /// Leave verification-enabled rooms alone unless explicitly targeted.
    #[serde(default = "default_true")]
    pub skip_verification_rooms: bool,
    /// Run a space-wide reconcile whenever the space's power levels change.
    #[serde(default)]
    pub reconcile_on_space_change: bool,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            skip_verification_rooms: true,
            reconcile_on_space_change: false,
        }
    }
}

/// Greeting texts and room bindings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GreetingsConfig {
    /// Greeting name -> text. `{user}` is replaced by the joining user.
    #[serde(default)]
    pub messages: HashMap<String, String>,
    /// Room id -> greeting name.
    #[serde(default)]
    pub rooms: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_defaults() {
        let rooms = RoomsConfig::default();
        assert!(!rooms.encrypt);
        assert!(rooms.bot_power_level > rooms.admin_power_level);
    }

    #[test]
    fn greetings_parse() {
        let g: GreetingsConfig = toml::from_str(
            r#"
[messages]
welcome = "hi {user}"

[rooms]
"!lobby:example.org" = "welcome"
"#,
        )
        .unwrap();
        assert_eq!(g.rooms["!lobby:example.org"], "welcome");
        assert_eq!(g.messages["welcome"], "hi {user}");
    }
}
