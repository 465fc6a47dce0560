//! Identifier helpers for users, rooms and aliases.
//!
//! Identifiers are kept as plain strings (`@local:server`, `!opaque:server`,
//! `#alias:server`); these helpers only check the sigil and split out the
//! server part.

/// Fully qualified user identifier (`@local:server`).
pub type UserId = String;

/// Opaque room identifier (`!opaque:server`).
pub type RoomId = String;

/// Room alias (`#local:server`).
pub type RoomAlias = String;

fn has_sigil_and_server(id: &str, sigil: char) -> bool {
    let Some(rest) = id.strip_prefix(sigil) else {
        return false;
    };
    match rest.split_once(':') {
        Some((local, server)) => !local.is_empty() && !server.is_empty(),
        None => false,
    }
}

/// Returns true if `id` looks like a user identifier.
pub fn is_user_id(id: &str) -> bool {
    has_sigil_and_server(id, '@')
}

/// Returns true if `id` looks like a room identifier.
pub fn is_room_id(id: &str) -> bool {
    has_sigil_and_server(id, '!')
}

/// Returns true if `id` looks like a room alias.
pub fn is_room_alias(id: &str) -> bool {
    has_sigil_and_server(id, '#')
}

/// Server part of an identifier (everything after the first `:`).
pub fn server_name(id: &str) -> Option<&str> {
    id.split_once(':')
        .map(|(_, server)| server)
        .filter(|s| !s.is_empty())
}

/// Build an alias from a localpart and a server name.
pub fn make_alias(localpart: &str, server: &str) -> RoomAlias {
    format!("#{}:{}", localpart, server)
}
