//! The protocol transport collaborator.
//!
//! Everything the engine needs from the homeserver goes through the
//! [`Transport`] trait: read-side queries are called directly, mutating calls
//! are only issued by the action queue worker. Retries for rate limiting and
//! network failures live behind this trait.

pub mod memory;

pub use memory::{MemoryTransport, Snapshot, SnapshotRoom};

use crate::error::TransportError;
use crate::power::PowerLevels;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Membership of a user in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
}

/// Parameters for creating a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    /// Alias localpart to claim during creation.
    pub alias_localpart: Option<String>,
    pub topic: Option<String>,
    /// Initial power levels.
    pub power_levels: Option<PowerLevels>,
    /// Create as a direct chat with the invitees.
    pub is_direct: bool,
    pub invite: Vec<String>,
}

/// Protocol transport: queries and outbound calls.
#[async_trait]
pub trait Transport: Send + Sync {
    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Users currently joined to `room`.
    async fn joined_members(&self, room: &str) -> TransportResult<Vec<String>>;

    /// Membership of `user` in `room`, `None` if the user never appeared.
    async fn membership(&self, room: &str, user: &str) -> TransportResult<Option<Membership>>;

    /// Current power-level content of `room`.
    async fn power_levels(&self, room: &str) -> TransportResult<PowerLevels>;

    /// Child rooms of `space` that carry a `via` path.
    async fn space_children(&self, space: &str) -> TransportResult<Vec<String>>;

    /// Display name of `room`.
    async fn room_name(&self, room: &str) -> TransportResult<Option<String>>;

    /// Canonical and alternative aliases published in `room`.
    async fn room_aliases(&self, room: &str) -> TransportResult<Vec<String>>;

    /// Resolve an alias to a room id.
    async fn resolve_alias(&self, alias: &str) -> TransportResult<String>;

    /// Event ids of the most recent messages `sender` sent in `room`.
    async fn recent_messages(
        &self,
        room: &str,
        sender: &str,
        limit: usize,
    ) -> TransportResult<Vec<String>>;

    // ------------------------------------------------------------------
    // Outbound calls (issued by the action queue only)
    // ------------------------------------------------------------------

    async fn create_room(&self, request: &CreateRoomRequest) -> TransportResult<String>;

    /// Send a text message; returns the event id.
    async fn send_message(&self, room: &str, body: &str) -> TransportResult<String>;

    /// Send a state event; returns the event id.
    async fn send_state(
        &self,
        room: &str,
        event_type: &str,
        state_key: &str,
        content: serde_json::Value,
    ) -> TransportResult<String>;

    async fn set_power_levels(&self, room: &str, levels: &PowerLevels) -> TransportResult<()>;

    async fn kick(&self, room: &str, user: &str, reason: &str) -> TransportResult<()>;

    async fn ban(&self, room: &str, user: &str, reason: &str) -> TransportResult<()>;

    async fn unban(&self, room: &str, user: &str, reason: &str) -> TransportResult<()>;

    async fn invite(&self, room: &str, user: &str) -> TransportResult<()>;

    async fn redact(&self, room: &str, event_id: &str, reason: &str) -> TransportResult<()>;

    /// Point `alias` at `room` in the directory.
    async fn set_alias(&self, alias: &str, room: &str) -> TransportResult<()>;

    /// Remove `alias` from the directory.
    async fn remove_alias(&self, alias: &str) -> TransportResult<()>;
}

/// Every room the community manages: the space's children, then the space.
pub async fn managed_rooms(transport: &dyn Transport, space: &str) -> TransportResult<Vec<String>> {
    let mut rooms = transport.space_children(space).await?;
    rooms.push(space.to_string());
    Ok(rooms)
}
