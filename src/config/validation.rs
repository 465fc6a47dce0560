//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::ids::{is_room_id, is_user_id};
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("bot.user_id is not a user id: '{0}'")]
    InvalidBotUserId(String),
    #[error("bot.parent_space is not a room id: '{0}'")]
    InvalidParentSpace(String),
    #[error("{field} contains an invalid user id: '{value}'")]
    InvalidUserId { field: &'static str, value: String },
    #[error("{field} contains an invalid room id: '{value}'")]
    InvalidRoomId { field: &'static str, value: String },
    #[error("tracking.kick_threshold_days ({kick}) must not be below warn_threshold_days ({warn})")]
    ThresholdOrder { warn: u32, kick: u32 },
    #[error("verification.attempts must be at least 1")]
    ZeroAttempts,
    #[error("verification is enabled for {0} room(s) but verification.phrases is empty")]
    NoPhrases(usize),
    #[error("greetings.rooms binds '{room}' to unknown greeting '{name}'")]
    UnknownGreeting { room: String, name: String },
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

fn check_users(errors: &mut Vec<ValidationError>, field: &'static str, values: &[String]) {
    for value in values {
        if !is_user_id(value) {
            errors.push(ValidationError::InvalidUserId {
                field,
                value: value.clone(),
            });
        }
    }
}

fn check_rooms<'a>(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    values: impl IntoIterator<Item = &'a String>,
) {
    for value in values {
        if !is_room_id(value) {
            errors.push(ValidationError::InvalidRoomId {
                field,
                value: value.clone(),
            });
        }
    }
}

/// Greeting bindings naming a greeting that does not exist.
pub fn greeting_problems(config: &Config) -> Vec<ValidationError> {
    let mut problems: Vec<ValidationError> = config
        .greetings
        .rooms
        .iter()
        .filter(|(_, name)| !config.greetings.messages.contains_key(*name))
        .map(|(room, name)| ValidationError::UnknownGreeting {
            room: room.clone(),
            name: name.clone(),
        })
        .collect();
    problems.sort_by_key(|p| p.to_string());
    problems
}

/// Validate a configuration, returning all errors found.
///
/// Some settings are suspicious rather than wrong (censorship enabled with no
/// words, a greeting binding to an unknown name); those only emit a warning.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_user_id(&config.bot.user_id) {
        errors.push(ValidationError::InvalidBotUserId(config.bot.user_id.clone()));
    }
    if !is_room_id(&config.bot.parent_space) {
        errors.push(ValidationError::InvalidParentSpace(
            config.bot.parent_space.clone(),
        ));
    }
    check_users(&mut errors, "bot.admins", &config.bot.admins);
    check_users(&mut errors, "bot.moderators", &config.bot.moderators);
    check_users(&mut errors, "rooms.invitees", &config.rooms.invitees);
    check_rooms(&mut errors, "bot.notification_room", config.bot.notification_room.iter());
    check_rooms(&mut errors, "banlists.rooms", &config.banlists.rooms);
    check_rooms(
        &mut errors,
        "verification.enabled_rooms",
        &config.verification.enabled_rooms,
    );
    check_rooms(&mut errors, "greetings.rooms", config.greetings.rooms.keys());

    let tracking = &config.tracking;
    if tracking.kick_threshold_days < tracking.warn_threshold_days {
        errors.push(ValidationError::ThresholdOrder {
            warn: tracking.warn_threshold_days,
            kick: tracking.kick_threshold_days,
        });
    }

    let verification = &config.verification;
    if verification.attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }
    if !verification.enabled_rooms.is_empty() && verification.phrases.is_empty() {
        errors.push(ValidationError::NoPhrases(verification.enabled_rooms.len()));
    }

    // A broken greeting binding only disables that greeting.
    for problem in greeting_problems(config) {
        tracing::warn!(error = %problem, "Greeting binding will be skipped");
    }

    if config.censor.enabled.is_enabled()
        && config.censor.words.is_empty()
        && config.censor.instant_ban_words.is_empty()
    {
        tracing::warn!("[censor] is enabled but no words are configured; nothing will be censored");
    }

    if let Some(ref db) = config.database {
        let db_path = Path::new(&db.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(db.path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
