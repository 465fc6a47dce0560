//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, BotConfig, QueueConfig)
//! - [`moderation`]: Tracking, censorship, banlist and verification settings
//! - [`rooms`]: Room creation defaults, power-level policy and greetings
//! - [`validation`]: Startup validation collecting every problem found

mod moderation;
mod rooms;
mod types;
mod validation;

pub use moderation::{BanlistConfig, CensorConfig, CensorScope, TrackingConfig, VerificationConfig};
pub use rooms::{GreetingsConfig, PowerConfig, RoomsConfig};
pub use types::{BotConfig, Config, ConfigError, DatabaseConfig, QueueConfig};
pub use validation::{ValidationError, greeting_problems, validate};

#[cfg(test)]
pub(crate) use types::test_config;
