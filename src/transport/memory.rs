//! In-process homeserver used by the replay binary and by tests.
//!
//! `MemoryTransport` keeps a complete world (rooms, memberships, power
//! levels, state events, messages and the alias directory) behind a single
//! mutex and enforces the same power-level checks a homeserver would. Tests
//! drive failure paths through [`MemoryTransport::fail_next`] and
//! [`MemoryTransport::fail_always`], and interrupt batches at a known point
//! with [`MemoryTransport::cancel_after`].

use super::{CreateRoomRequest, Membership, Transport, TransportResult};
use crate::error::TransportError;
use crate::ids;
use crate::power::PowerLevels;
use crate::power::levels::POWER_LEVELS_EVENT;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const SPACE_CHILD_EVENT: &str = "m.space.child";

/// One room of a world snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotRoom {
    pub room_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Joined members.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub power_levels: PowerLevels,
    /// Aliases pointing at this room.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Child rooms (only meaningful for a space).
    #[serde(default)]
    pub children: Vec<String>,
}

/// Initial world state loaded by the replay binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub rooms: Vec<SnapshotRoom>,
}

/// An outbound call observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub room: Option<String>,
    /// User, event id, alias or state type, depending on `op`.
    pub target: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    event_id: String,
    sender: String,
    body: String,
    redacted: bool,
}

#[derive(Debug, Clone, Default)]
struct RoomState {
    name: Option<String>,
    members: BTreeMap<String, Membership>,
    power_levels: PowerLevels,
    state: BTreeMap<(String, String), Value>,
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Clone)]
struct Failure {
    op: &'static str,
    room: Option<String>,
    error: TransportError,
    once: bool,
}

/// Cancels `token` once `remaining` calls of `op` have been made.
#[derive(Debug)]
struct Tripwire {
    op: &'static str,
    remaining: usize,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct World {
    rooms: BTreeMap<String, RoomState>,
    aliases: BTreeMap<String, String>,
    next_id: u64,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    tripwires: Vec<Tripwire>,
}

impl World {
    fn next_event_id(&mut self) -> String {
        self.next_id += 1;
        format!("${}", self.next_id)
    }

    fn room(&self, room: &str) -> TransportResult<&RoomState> {
        self.rooms
            .get(room)
            .ok_or_else(|| TransportError::NotFound(room.to_string()))
    }

    fn room_mut(&mut self, room: &str) -> TransportResult<&mut RoomState> {
        self.rooms
            .get_mut(room)
            .ok_or_else(|| TransportError::NotFound(room.to_string()))
    }

    fn take_failure(&mut self, op: &'static str, room: Option<&str>) -> Option<TransportError> {
        let index = self.failures.iter().position(|f| {
            f.op == op && (f.room.is_none() || f.room.as_deref() == room)
        })?;
        let failure = if self.failures[index].once {
            self.failures.remove(index)
        } else {
            self.failures[index].clone()
        };
        Some(failure.error)
    }

    fn trip(&mut self, op: &'static str) {
        self.tripwires.retain_mut(|wire| {
            if wire.op != op {
                return true;
            }
            wire.remaining = wire.remaining.saturating_sub(1);
            if wire.remaining == 0 {
                wire.token.cancel();
                return false;
            }
            true
        });
    }
}

fn denied(what: &str, room: &str) -> TransportError {
    TransportError::PermissionDenied(format!("insufficient power to {what} in {room}"))
}

/// Decrements the in-flight counter when a call completes.
struct Flight<'a>(&'a AtomicUsize);

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process transport acting as the bot `bot_user`.
pub struct MemoryTransport {
    bot_user: String,
    world: Mutex<World>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(bot_user: impl Into<String>) -> Self {
        Self {
            bot_user: bot_user.into(),
            world: Mutex::new(World::default()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every outbound call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build a transport from a snapshot. The bot joins every room.
    pub fn from_snapshot(bot_user: impl Into<String>, snapshot: &Snapshot) -> Self {
        let transport = Self::new(bot_user);
        for room in &snapshot.rooms {
            transport.add_room(&room.room_id, room.name.as_deref(), room.power_levels.clone());
            for member in &room.members {
                transport.set_membership(&room.room_id, member, Membership::Join);
            }
            for alias in &room.aliases {
                transport.world.lock().aliases.insert(alias.clone(), room.room_id.clone());
            }
            for child in &room.children {
                transport.add_space_child(&room.room_id, child);
            }
        }
        transport
    }

    // ------------------------------------------------------------------
    // World setup (inbound side)
    // ------------------------------------------------------------------

    /// Add a room the bot is joined to.
    pub fn add_room(&self, room: &str, name: Option<&str>, power_levels: PowerLevels) {
        let mut world = self.world.lock();
        let state = world.rooms.entry(room.to_string()).or_default();
        state.name = name.map(str::to_string);
        state.power_levels = power_levels;
        state
            .members
            .insert(self.bot_user.clone(), Membership::Join);
    }

    pub fn set_membership(&self, room: &str, user: &str, membership: Membership) {
        let mut world = self.world.lock();
        world
            .rooms
            .entry(room.to_string())
            .or_default()
            .members
            .insert(user.to_string(), membership);
    }

    /// Replace the power levels of `room` as if an admin had sent them.
    pub fn put_power_levels(&self, room: &str, power_levels: PowerLevels) {
        let mut world = self.world.lock();
        world.rooms.entry(room.to_string()).or_default().power_levels = power_levels;
    }

    /// Link `child` under `space` with a `via` path.
    pub fn add_space_child(&self, space: &str, child: &str) {
        let via = ids::server_name(child).unwrap_or_default().to_string();
        let mut world = self.world.lock();
        world.rooms.entry(space.to_string()).or_default().state.insert(
            (SPACE_CHILD_EVENT.to_string(), child.to_string()),
            serde_json::json!({ "via": [via] }),
        );
    }

    /// Record a message sent by someone else. Returns its event id.
    pub fn push_message(&self, room: &str, sender: &str, body: &str) -> String {
        let mut world = self.world.lock();
        let event_id = world.next_event_id();
        world
            .rooms
            .entry(room.to_string())
            .or_default()
            .messages
            .push(StoredMessage {
                event_id: event_id.clone(),
                sender: sender.to_string(),
                body: body.to_string(),
                redacted: false,
            });
        event_id
    }

    // ------------------------------------------------------------------
    // Failure injection and inspection
    // ------------------------------------------------------------------

    /// Fail the next `op` call (optionally only in `room`) with `error`.
    pub fn fail_next(&self, op: &'static str, room: Option<&str>, error: TransportError) {
        self.world.lock().failures.push(Failure {
            op,
            room: room.map(str::to_string),
            error,
            once: true,
        });
    }

    /// Fail every `op` call (optionally only in `room`) with `error`.
    pub fn fail_always(&self, op: &'static str, room: Option<&str>, error: TransportError) {
        self.world.lock().failures.push(Failure {
            op,
            room: room.map(str::to_string),
            error,
            once: false,
        });
    }

    /// Drop every injected failure.
    pub fn clear_failures(&self) {
        self.world.lock().failures.clear();
    }

    /// Cancel `token` as soon as the `calls`-th `op` call has been made.
    /// The call itself still goes through.
    pub fn cancel_after(&self, op: &'static str, calls: usize, token: CancellationToken) {
        if calls == 0 {
            token.cancel();
            return;
        }
        self.world.lock().tripwires.push(Tripwire {
            op,
            remaining: calls,
            token,
        });
    }

    /// Outbound calls in the order they were made.
    pub fn calls(&self) -> Vec<Call> {
        self.world.lock().calls.clone()
    }

    /// Outbound calls of one kind.
    pub fn calls_of(&self, op: &str) -> Vec<Call> {
        self.world
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Highest number of outbound calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Content of a state event, if set.
    pub fn state_event(&self, room: &str, event_type: &str, state_key: &str) -> Option<Value> {
        let world = self.world.lock();
        world
            .rooms
            .get(room)?
            .state
            .get(&(event_type.to_string(), state_key.to_string()))
            .cloned()
    }

    /// Room an alias currently points to.
    pub fn alias_target(&self, alias: &str) -> Option<String> {
        self.world.lock().aliases.get(alias).cloned()
    }

    /// Text messages the bot sent to `room`.
    pub fn sent_messages(&self, room: &str) -> Vec<String> {
        let world = self.world.lock();
        world
            .rooms
            .get(room)
            .map(|r| {
                r.messages
                    .iter()
                    .filter(|m| m.sender == self.bot_user)
                    .map(|m| m.body.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_redacted(&self, room: &str, event_id: &str) -> bool {
        let world = self.world.lock();
        world
            .rooms
            .get(room)
            .and_then(|r| r.messages.iter().find(|m| m.event_id == event_id))
            .is_some_and(|m| m.redacted)
    }

    // ------------------------------------------------------------------
    // Call bookkeeping
    // ------------------------------------------------------------------

    async fn begin(
        &self,
        op: &'static str,
        room: Option<&str>,
        target: Option<&str>,
    ) -> TransportResult<Flight<'_>> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let flight = Flight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut world = self.world.lock();
        world.calls.push(Call {
            op,
            room: room.map(str::to_string),
            target: target.map(str::to_string),
        });
        world.trip(op);
        if let Some(error) = world.take_failure(op, room) {
            debug!(op, room = ?room, error = %error, "Injected transport failure");
            return Err(error);
        }
        Ok(flight)
    }

    fn bot_level(&self, room: &RoomState) -> i64 {
        room.power_levels.user_level(&self.bot_user)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn joined_members(&self, room: &str) -> TransportResult<Vec<String>> {
        let world = self.world.lock();
        Ok(world
            .room(room)?
            .members
            .iter()
            .filter(|(_, m)| **m == Membership::Join)
            .map(|(user, _)| user.clone())
            .collect())
    }

    async fn membership(&self, room: &str, user: &str) -> TransportResult<Option<Membership>> {
        let world = self.world.lock();
        Ok(world.room(room)?.members.get(user).copied())
    }

    async fn power_levels(&self, room: &str) -> TransportResult<PowerLevels> {
        let world = self.world.lock();
        Ok(world.room(room)?.power_levels.clone())
    }

    async fn space_children(&self, space: &str) -> TransportResult<Vec<String>> {
        let world = self.world.lock();
        Ok(world
            .room(space)?
            .state
            .iter()
            .filter(|((event_type, _), content)| {
                event_type == SPACE_CHILD_EVENT
                    && content
                        .get("via")
                        .and_then(Value::as_array)
                        .is_some_and(|via| !via.is_empty())
            })
            .map(|((_, child), _)| child.clone())
            .collect())
    }

    async fn room_name(&self, room: &str) -> TransportResult<Option<String>> {
        let world = self.world.lock();
        Ok(world.room(room)?.name.clone())
    }

    async fn room_aliases(&self, room: &str) -> TransportResult<Vec<String>> {
        let world = self.world.lock();
        world.room(room)?;
        Ok(world
            .aliases
            .iter()
            .filter(|(_, target)| *target == room)
            .map(|(alias, _)| alias.clone())
            .collect())
    }

    async fn resolve_alias(&self, alias: &str) -> TransportResult<String> {
        self.world
            .lock()
            .aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(alias.to_string()))
    }

    async fn recent_messages(
        &self,
        room: &str,
        sender: &str,
        limit: usize,
    ) -> TransportResult<Vec<String>> {
        let world = self.world.lock();
        Ok(world
            .room(room)?
            .messages
            .iter()
            .rev()
            .filter(|m| m.sender == sender && !m.redacted)
            .take(limit)
            .map(|m| m.event_id.clone())
            .collect())
    }

    async fn create_room(&self, request: &CreateRoomRequest) -> TransportResult<String> {
        let _flight = self.begin("create_room", None, Some(&request.name)).await?;
        let server = ids::server_name(&self.bot_user).unwrap_or("localhost").to_string();
        let mut world = self.world.lock();

        let alias = request
            .alias_localpart
            .as_deref()
            .map(|local| ids::make_alias(local, &server));
        if let Some(alias) = &alias
            && world.aliases.contains_key(alias)
        {
            return Err(TransportError::PermissionDenied(format!("alias {alias} is in use")));
        }

        world.next_id += 1;
        let room_id = format!("!room{}:{}", world.next_id, server);

        let mut power_levels = request.power_levels.clone().unwrap_or_default();
        power_levels
            .users
            .entry(self.bot_user.clone())
            .or_insert(100);

        let mut state = RoomState {
            name: Some(request.name.clone()),
            power_levels,
            ..Default::default()
        };
        state.members.insert(self.bot_user.clone(), Membership::Join);
        for invitee in &request.invite {
            state.members.insert(invitee.clone(), Membership::Invite);
        }
        if let Some(topic) = &request.topic {
            state.state.insert(
                ("m.room.topic".to_string(), String::new()),
                serde_json::json!({ "topic": topic }),
            );
        }
        world.rooms.insert(room_id.clone(), state);
        if let Some(alias) = alias {
            world.aliases.insert(alias, room_id.clone());
        }

        Ok(room_id)
    }

    async fn send_message(&self, room: &str, body: &str) -> TransportResult<String> {
        let _flight = self.begin("send_message", Some(room), None).await?;
        let mut world = self.world.lock();
        let event_id = world.next_event_id();
        let state = world.room_mut(room)?;
        if self.bot_level(state) < state.power_levels.send_threshold() {
            return Err(denied("send messages", room));
        }
        state.messages.push(StoredMessage {
            event_id: event_id.clone(),
            sender: self.bot_user.clone(),
            body: body.to_string(),
            redacted: false,
        });
        Ok(event_id)
    }

    async fn send_state(
        &self,
        room: &str,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> TransportResult<String> {
        let _flight = self.begin("send_state", Some(room), Some(event_type)).await?;
        let mut world = self.world.lock();
        let event_id = world.next_event_id();
        let state = world.room_mut(room)?;
        if self.bot_level(state) < state.power_levels.state_level(event_type) {
            return Err(denied(&format!("send {event_type}"), room));
        }
        state
            .state
            .insert((event_type.to_string(), state_key.to_string()), content);
        Ok(event_id)
    }

    async fn set_power_levels(&self, room: &str, levels: &PowerLevels) -> TransportResult<()> {
        let _flight = self.begin("set_power_levels", Some(room), None).await?;
        let mut world = self.world.lock();
        let state = world.room_mut(room)?;
        let current = &state.power_levels;
        let own = self.bot_level(state);
        if own < current.state_level(POWER_LEVELS_EVENT) {
            return Err(denied("change power levels", room));
        }

        let users = current.users.keys().chain(levels.users.keys());
        for user in users {
            let before = current.user_level(user);
            let after = levels.user_level(user);
            if before == after || *user == self.bot_user {
                continue;
            }
            if before >= own || after > own {
                return Err(denied(&format!("change the level of {user}"), room));
            }
        }

        state.power_levels = levels.clone();
        Ok(())
    }

    async fn kick(&self, room: &str, user: &str, _reason: &str) -> TransportResult<()> {
        let _flight = self.begin("kick", Some(room), Some(user)).await?;
        let mut world = self.world.lock();
        let state = world.room_mut(room)?;
        let own = self.bot_level(state);
        if own < state.power_levels.kick || state.power_levels.user_level(user) >= own {
            return Err(denied("kick", room));
        }
        match state.members.get(user) {
            Some(Membership::Join | Membership::Invite) => {
                state.members.insert(user.to_string(), Membership::Leave);
                Ok(())
            }
            _ => Err(TransportError::NotFound(format!("{user} is not in {room}"))),
        }
    }

    async fn ban(&self, room: &str, user: &str, _reason: &str) -> TransportResult<()> {
        let _flight = self.begin("ban", Some(room), Some(user)).await?;
        let mut world = self.world.lock();
        let state = world.room_mut(room)?;
        let own = self.bot_level(state);
        if own < state.power_levels.ban || state.power_levels.user_level(user) >= own {
            return Err(denied("ban", room));
        }
        state.members.insert(user.to_string(), Membership::Ban);
        Ok(())
    }

    async fn unban(&self, room: &str, user: &str, _reason: &str) -> TransportResult<()> {
        let _flight = self.begin("unban", Some(room), Some(user)).await?;
        let mut world = self.world.lock();
        let state = world.room_mut(room)?;
        if self.bot_level(state) < state.power_levels.ban {
            return Err(denied("unban", room));
        }
        if state.members.get(user) == Some(&Membership::Ban) {
            state.members.insert(user.to_string(), Membership::Leave);
        }
        Ok(())
    }

    async fn invite(&self, room: &str, user: &str) -> TransportResult<()> {
        let _flight = self.begin("invite", Some(room), Some(user)).await?;
        let mut world = self.world.lock();
        let state = world.room_mut(room)?;
        if self.bot_level(state) < state.power_levels.invite {
            return Err(denied("invite", room));
        }
        match state.members.get(user) {
            Some(Membership::Ban) => Err(denied(&format!("invite banned user {user}"), room)),
            Some(Membership::Join) => Ok(()),
            _ => {
                state.members.insert(user.to_string(), Membership::Invite);
                Ok(())
            }
        }
    }

    async fn redact(&self, room: &str, event_id: &str, _reason: &str) -> TransportResult<()> {
        let _flight = self.begin("redact", Some(room), Some(event_id)).await?;
        let mut world = self.world.lock();
        let state = world.room_mut(room)?;
        let own = self.bot_level(state);
        let redact_level = state.power_levels.redact;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.event_id == event_id)
            .ok_or_else(|| TransportError::NotFound(event_id.to_string()))?;
        if message.sender != self.bot_user && own < redact_level {
            return Err(denied("redact", room));
        }
        message.redacted = true;
        message.body.clear();
        Ok(())
    }

    async fn set_alias(&self, alias: &str, room: &str) -> TransportResult<()> {
        let _flight = self.begin("set_alias", Some(room), Some(alias)).await?;
        let mut world = self.world.lock();
        world.room(room)?;
        match world.aliases.get(alias) {
            Some(existing) if existing == room => Ok(()),
            Some(existing) => Err(TransportError::PermissionDenied(format!(
                "{alias} already points to {existing}"
            ))),
            None => {
                world.aliases.insert(alias.to_string(), room.to_string());
                Ok(())
            }
        }
    }

    async fn remove_alias(&self, alias: &str) -> TransportResult<()> {
        let _flight = self.begin("remove_alias", None, Some(alias)).await?;
        self.world
            .lock()
            .aliases
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| TransportError::NotFound(alias.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "@keeper:example.org";
    const ROOM: &str = "!a:example.org";

    fn bot_levels(level: i64) -> PowerLevels {
        let mut pl = PowerLevels::default();
        pl.users.insert(BOT.into(), level);
        pl
    }

    #[tokio::test]
    async fn kick_requires_power_and_membership() {
        let transport = MemoryTransport::new(BOT);
        transport.add_room(ROOM, None, bot_levels(100));
        transport.set_membership(ROOM, "@u:example.org", Membership::Join);

        transport.kick(ROOM, "@u:example.org", "bye").await.unwrap();
        assert_eq!(
            transport.membership(ROOM, "@u:example.org").await.unwrap(),
            Some(Membership::Leave)
        );

        let err = transport.kick(ROOM, "@u:example.org", "bye").await.unwrap_err();
        assert!(err.is_not_found());

        transport.put_power_levels(ROOM, bot_levels(0));
        transport.set_membership(ROOM, "@u:example.org", Membership::Join);
        let err = transport.kick(ROOM, "@u:example.org", "bye").await.unwrap_err();
        assert!(err.is_permission());
    }

    #[tokio::test]
    async fn power_level_change_cannot_exceed_own_level() {
        let transport = MemoryTransport::new(BOT);
        transport.add_room(ROOM, None, bot_levels(50));

        let mut wanted = bot_levels(50);
        wanted.users.insert("@u:example.org".into(), 100);
        let err = transport.set_power_levels(ROOM, &wanted).await.unwrap_err();
        assert!(err.is_permission());

        wanted.users.insert("@u:example.org".into(), 50);
        transport.set_power_levels(ROOM, &wanted).await.unwrap();
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let transport = MemoryTransport::new(BOT);
        transport.add_room(ROOM, None, bot_levels(100));
        transport.fail_next("send_message", Some(ROOM), TransportError::Network("reset".into()));

        assert!(transport.send_message(ROOM, "hi").await.is_err());
        transport.send_message(ROOM, "hi").await.unwrap();
        assert_eq!(transport.sent_messages(ROOM), vec!["hi".to_string()]);
        assert_eq!(transport.calls_of("send_message").len(), 2);
    }

    #[tokio::test]
    async fn space_children_need_via() {
        let transport = MemoryTransport::new(BOT);
        transport.add_room("!space:example.org", None, bot_levels(100));
        transport.add_space_child("!space:example.org", ROOM);
        transport
            .send_state("!space:example.org", SPACE_CHILD_EVENT, "!old:example.org", serde_json::json!({}))
            .await
            .unwrap();

        let children = transport.space_children("!space:example.org").await.unwrap();
        assert_eq!(children, vec![ROOM.to_string()]);
    }

    #[tokio::test]
    async fn snapshot_round_trip_into_world() {
        let snapshot: Snapshot = serde_json::from_str(
            r##"{"rooms":[{"room_id":"!space:example.org","members":["@u:example.org"],
                "children":["!a:example.org"]},
               {"room_id":"!a:example.org","aliases":["#a:example.org"]}]}"##,
        )
        .unwrap();
        let transport = MemoryTransport::from_snapshot(BOT, &snapshot);

        assert_eq!(transport.resolve_alias("#a:example.org").await.unwrap(), ROOM);
        let members = transport.joined_members("!space:example.org").await.unwrap();
        assert!(members.contains(&"@u:example.org".to_string()));
        assert!(members.contains(&BOT.to_string()));
    }

    #[tokio::test]
    async fn recent_messages_newest_first() {
        let transport = MemoryTransport::new(BOT);
        transport.add_room(ROOM, None, bot_levels(100));
        let first = transport.push_message(ROOM, "@u:example.org", "one");
        let second = transport.push_message(ROOM, "@u:example.org", "two");
        transport.push_message(ROOM, "@v:example.org", "other");

        let recent = transport.recent_messages(ROOM, "@u:example.org", 10).await.unwrap();
        assert_eq!(recent, vec![second, first.clone()]);

        transport.redact(ROOM, &first, "spam").await.unwrap();
        assert!(transport.is_redacted(ROOM, &first));
    }
}
