//! Room lifecycle: create, archive and replace.
//!
//! `create` always hands back the room id once the room exists; later steps
//! (space linking, join rules, encryption, alias bookkeeping) are reported
//! individually so an operator can finish a partially set up room by hand.
//!
//! `replace` is a saga over the replacement step log: create the new room,
//! move aliases one by one, archive the old room with a pointer to the new
//! one, then rewrite room bindings. Each completed step is written to the
//! log before the next starts, and [`LifecycleManager::resume_pending`]
//! picks interrupted replacements up at startup.

use crate::config::Config;
use crate::db::{Database, DbError, ReplacementRecord, ReplacementStep, RoomRecord, now_ms};
use crate::error::{EngineError, EngineResult};
use crate::ids;
use crate::outcome::{BatchReport, ItemResult, ItemStatus};
use crate::power::PowerLevels;
use crate::queue::{Action, ActionQueue, created_room};
use crate::transport::{CreateRoomRequest, Transport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub const SPACE_CHILD: &str = "m.space.child";
pub const SPACE_PARENT: &str = "m.space.parent";
pub const JOIN_RULES: &str = "m.room.join_rules";
pub const ENCRYPTION: &str = "m.room.encryption";
pub const TOMBSTONE: &str = "m.room.tombstone";
pub const CANONICAL_ALIAS: &str = "m.room.canonical_alias";

/// Alias localpart for a room name: ASCII alphanumerics only, lower-cased.
pub fn sanitize_alias(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// What to create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSpec {
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    /// Overrides `rooms.encrypt`.
    #[serde(default)]
    pub encrypt: Option<bool>,
    /// Overrides the alias derived from the name.
    #[serde(default)]
    pub alias_localpart: Option<String>,
}

impl RoomSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A created room and the setup steps that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRoom {
    pub room_id: String,
    pub alias: Option<String>,
    pub report: BatchReport,
}

/// Result of a (possibly resumed) replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub old_room: String,
    pub new_room: String,
    pub step: ReplacementStep,
    pub report: BatchReport,
}

/// Orchestrates room creation, archival and replacement.
pub struct LifecycleManager {
    config: Arc<Config>,
    db: Database,
    transport: Arc<dyn Transport>,
    queue: ActionQueue,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<Config>,
        db: Database,
        transport: Arc<dyn Transport>,
        queue: ActionQueue,
    ) -> Self {
        Self {
            config,
            db,
            transport,
            queue,
        }
    }

    fn server(&self) -> &str {
        ids::server_name(&self.config.bot.user_id).unwrap_or("localhost")
    }

    /// Run one step, recording its failure in `report` instead of failing.
    async fn step(&self, report: &mut BatchReport, label: String, action: Action) -> bool {
        match self.queue.submit(action).await {
            Ok(_) => true,
            Err(e) => {
                warn!(step = %label, error = %e, code = e.error_code(), "Lifecycle step failed");
                report.push(ItemResult::from_error(label, &e));
                false
            }
        }
    }

    /// Initial power levels for a new room: the space's users, configured
    /// admins, and the bot above all of them.
    async fn initial_levels(&self) -> EngineResult<PowerLevels> {
        let space = &self.config.bot.parent_space;
        let space_levels = self
            .transport
            .power_levels(space)
            .await
            .map_err(|e| EngineError::from_transport(space, e))?;

        let bot = &self.config.bot.user_id;
        let mut levels = PowerLevels {
            invite: self.config.rooms.invite_power_level,
            ..Default::default()
        };
        for (user, level) in &space_levels.users {
            if user != bot {
                levels.users.insert(user.clone(), *level);
            }
        }
        for admin in &self.config.bot.admins {
            let level = levels.users.entry(admin.clone()).or_insert(0);
            *level = (*level).max(self.config.rooms.admin_power_level);
        }

        let highest = levels.max_level().max(0);
        levels.users.insert(
            bot.clone(),
            self.config.rooms.bot_power_level.max(highest + 1),
        );
        Ok(levels)
    }

    /// Create a room inside the space.
    pub async fn create(&self, spec: &RoomSpec) -> EngineResult<CreatedRoom> {
        self.create_room(spec, true).await
    }

    async fn create_room(&self, spec: &RoomSpec, claim_alias: bool) -> EngineResult<CreatedRoom> {
        let space = self.config.bot.parent_space.clone();
        let server = self.server().to_string();
        let encrypt = spec.encrypt.unwrap_or(self.config.rooms.encrypt);
        let localpart = spec
            .alias_localpart
            .clone()
            .unwrap_or_else(|| sanitize_alias(&spec.name));
        let localpart = (claim_alias && !localpart.is_empty()).then_some(localpart);

        let request = CreateRoomRequest {
            name: spec.name.clone(),
            alias_localpart: localpart.clone(),
            topic: spec.topic.clone(),
            power_levels: Some(self.initial_levels().await?),
            is_direct: false,
            invite: self.config.rooms.invitees.clone(),
        };
        let output = self.queue.submit(Action::CreateRoom(request)).await?;
        let room_id = created_room(output)?;

        let now = now_ms();
        self.db
            .rooms()
            .upsert(&room_id, Some(&spec.name), true, false, now)
            .await?;
        info!(room = %room_id, name = %spec.name, "Room created");

        let mut report = BatchReport::default();
        let via = json!([server]);

        self.step(
            &mut report,
            format!("link {room_id} into {space}"),
            Action::SendState {
                room: space.clone(),
                event_type: SPACE_CHILD.into(),
                state_key: room_id.clone(),
                content: json!({ "via": via, "suggested": false, "auto_join": false }),
            },
        )
        .await;

        self.step(
            &mut report,
            format!("set parent of {room_id}"),
            Action::SendState {
                room: room_id.clone(),
                event_type: SPACE_PARENT.into(),
                state_key: space.clone(),
                content: json!({ "via": via, "canonical": true }),
            },
        )
        .await;

        self.step(
            &mut report,
            format!("restrict joins in {room_id}"),
            Action::SendState {
                room: room_id.clone(),
                event_type: JOIN_RULES.into(),
                state_key: String::new(),
                content: json!({
                    "join_rule": "restricted",
                    "allow": [{ "type": "m.room_membership", "room_id": space }],
                }),
            },
        )
        .await;

        if encrypt {
            let encrypted = self
                .step(
                    &mut report,
                    format!("encrypt {room_id}"),
                    Action::SendState {
                        room: room_id.clone(),
                        event_type: ENCRYPTION.into(),
                        state_key: String::new(),
                        content: json!({ "algorithm": "m.megolm.v1.aes-sha2" }),
                    },
                )
                .await;
            if encrypted {
                self.db.rooms().set_encrypted(&room_id, true).await?;
            }
        }

        let alias = localpart.map(|local| ids::make_alias(&local, &server));
        if let Some(alias) = &alias
            && let Err(e) = self.db.rooms().attach_alias(&room_id, alias, now).await
        {
            warn!(room = %room_id, alias = %alias, error = %e, "Alias bookkeeping failed");
            report.push(ItemResult::new(
                format!("record {alias}"),
                ItemStatus::Failed(e.to_string()),
            ));
        }

        if !report.items.is_empty() {
            warn!(room = %room_id, failed = report.items.len(), "Room created with incomplete setup");
        }

        Ok(CreatedRoom {
            room_id,
            alias,
            report,
        })
    }

    /// The stored record for `room`, recording it first if it predates us.
    async fn ensure_known(&self, room: &str) -> EngineResult<RoomRecord> {
        let rooms = self.db.rooms();
        if let Some(record) = rooms.get(room).await? {
            return Ok(record);
        }
        let name = self.transport.room_name(room).await.ok().flatten();
        rooms.upsert(room, name.as_deref(), true, false, now_ms()).await?;
        rooms
            .get(room)
            .await?
            .ok_or_else(|| EngineError::NotFound(room.to_string()))
    }

    /// Aliases the store or the server knows to point at `room`.
    async fn current_aliases(&self, room: &str) -> EngineResult<BTreeSet<String>> {
        let mut aliases: BTreeSet<String> = self.db.rooms().active_aliases(room).await?.into_iter().collect();
        match self.transport.room_aliases(room).await {
            Ok(published) => aliases.extend(published),
            Err(e) => warn!(room = %room, error = %e, "Cannot list published aliases"),
        }
        Ok(aliases)
    }

    /// Archive `room`: unlink it from the space, drop its aliases and mark
    /// it with a tombstone (pointing at `replacement`, if any).
    pub async fn archive(&self, room: &str, replacement: Option<&str>) -> EngineResult<BatchReport> {
        let now = now_ms();
        let rooms = self.db.rooms();
        let record = self.ensure_known(room).await?;
        if let (Some(existing), Some(wanted)) = (&record.replacement_room, replacement)
            && existing != wanted
        {
            return Err(EngineError::StateConflict(format!(
                "{room} is already replaced by {existing}"
            )));
        }

        let space = self.config.bot.parent_space.clone();
        let mut report = BatchReport::default();

        self.step(
            &mut report,
            format!("unlink {room} from {space}"),
            Action::SendState {
                room: space,
                event_type: SPACE_CHILD.into(),
                state_key: room.to_string(),
                content: json!({}),
            },
        )
        .await;

        for alias in self.current_aliases(room).await? {
            let removed = match self
                .queue
                .submit(Action::RemoveAlias { alias: alias.clone() })
                .await
            {
                Ok(_) | Err(EngineError::NotFound(_)) => true,
                Err(e) => {
                    warn!(room = %room, alias = %alias, error = %e, "Alias removal failed");
                    report.push(ItemResult::from_error(format!("remove {alias}"), &e));
                    false
                }
            };
            if removed {
                rooms.detach_alias(room, &alias, now).await?;
            }
        }

        let mut tombstone = json!({ "body": "This room has been archived." });
        if let Some(new_room) = replacement {
            tombstone = json!({
                "body": "This room has been replaced.",
                "replacement_room": new_room,
            });
        }
        self.step(
            &mut report,
            format!("tombstone {room}"),
            Action::SendState {
                room: room.to_string(),
                event_type: TOMBSTONE.into(),
                state_key: String::new(),
                content: tombstone,
            },
        )
        .await;

        if let Some(new_room) = replacement {
            rooms.set_tombstone(room, new_room).await.map_err(|e| match e {
                DbError::TombstoneSet { room, existing } => {
                    EngineError::StateConflict(format!("{room} is already replaced by {existing}"))
                }
                other => other.into(),
            })?;
        }
        rooms.set_archived(room).await?;

        info!(room = %room, replacement = ?replacement, failed = report.items.len(), "Room archived");
        Ok(report)
    }

    /// Move one alias from `old` to `new`.
    ///
    /// The store keeps the alias on `old` until the server has it on `new`,
    /// so a move that fails (or whose restore fails) is retried from the old
    /// room on the next run.
    async fn transfer_alias(&self, alias: &str, old: &str, new: &str, report: &mut BatchReport) -> EngineResult<bool> {
        match self
            .queue
            .submit(Action::RemoveAlias { alias: alias.to_string() })
            .await
        {
            Ok(_) | Err(EngineError::NotFound(_)) => {}
            Err(e) => {
                warn!(alias = %alias, room = %old, error = %e, "Alias stays on the old room");
                report.push(ItemResult::from_error(format!("move {alias}"), &e));
                return Ok(false);
            }
        }

        let attached = self
            .queue
            .submit(Action::SetAlias {
                alias: alias.to_string(),
                room: new.to_string(),
            })
            .await;
        if let Err(e) = attached {
            warn!(alias = %alias, room = %new, error = %e, "Alias transfer failed; restoring");
            report.push(ItemResult::from_error(format!("move {alias}"), &e));
            if let Err(e) = self
                .queue
                .submit(Action::SetAlias {
                    alias: alias.to_string(),
                    room: old.to_string(),
                })
                .await
            {
                warn!(alias = %alias, room = %old, error = %e, "Alias not restored; retried on resume");
                report.push(ItemResult::from_error(format!("restore {alias} on {old}"), &e));
            }
            return Ok(false);
        }

        self.db.rooms().move_alias(alias, old, new, now_ms()).await?;
        info!(alias = %alias, from = %old, to = %new, "Alias transferred");
        report.push(ItemResult::new(format!("move {alias}"), ItemStatus::Applied));
        Ok(true)
    }

    /// Record every alias the old room holds so a failed move can be
    /// retried from the store. Aliases the store gives to another room are
    /// reported and left alone.
    async fn adopt_aliases(&self, room: &str, report: &mut BatchReport) -> EngineResult<BTreeSet<String>> {
        let rooms = self.db.rooms();
        let now = now_ms();
        let mut adopted = BTreeSet::new();
        for alias in self.current_aliases(room).await? {
            match rooms.attach_alias(room, &alias, now).await {
                Ok(()) => {
                    adopted.insert(alias);
                }
                Err(DbError::AliasActive { room: holder, .. }) => {
                    warn!(alias = %alias, room = %room, holder = %holder, "Alias recorded on another room");
                    report.push(ItemResult::new(
                        format!("move {alias}"),
                        ItemStatus::Failed(format!("recorded on {holder}")),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(adopted)
    }

    /// Replace `old_room` with a new room built from `spec`. An unfinished
    /// replacement of the same room is continued instead of starting anew.
    pub async fn replace(&self, old_room: &str, spec: &RoomSpec, requested_by: &str) -> EngineResult<Replacement> {
        self.transport
            .power_levels(old_room)
            .await
            .map_err(|e| EngineError::from_transport(old_room, e))?;
        if let Some(record) = self
            .db
            .replacements()
            .unfinished()
            .await?
            .into_iter()
            .find(|r| r.old_room == old_room)
        {
            info!(id = %record.id, old = %old_room, step = record.step.as_str(), "Retrying unfinished room replacement");
            return self.run(record).await;
        }

        if let Some(existing) = self.ensure_known(old_room).await?.replacement_room {
            return Err(EngineError::StateConflict(format!(
                "{old_room} is already replaced by {existing}"
            )));
        }

        let spec_json = serde_json::to_string(spec)
            .map_err(|e| EngineError::Configuration(format!("room spec: {e}")))?;
        let record = self
            .db
            .replacements()
            .start(old_room, &spec_json, requested_by, now_ms())
            .await?;
        info!(id = %record.id, old = %old_room, "Room replacement started");
        self.run(record).await
    }

    /// Drive a replacement from its last completed step to the end.
    async fn run(&self, mut record: ReplacementRecord) -> EngineResult<Replacement> {
        let log = self.db.replacements();
        let mut report = BatchReport::default();
        let old = record.old_room.clone();

        if record.step == ReplacementStep::Started {
            let spec: RoomSpec = serde_json::from_str(&record.spec)
                .map_err(|e| EngineError::Configuration(format!("stored room spec: {e}")))?;
            let created = self.create_room(&spec, false).await?;
            report.push(ItemResult::new(format!("create {}", created.room_id), ItemStatus::Applied));
            report.items.extend(created.report.items);
            log.record_created(&record.id, &created.room_id, now_ms()).await?;
            record.new_room = Some(created.room_id);
            record.step = ReplacementStep::Created;
        }

        let new = record.new_room.clone().ok_or_else(|| {
            EngineError::StateConflict(format!("replacement {} has no new room", record.id))
        })?;

        if record.step == ReplacementStep::Created {
            let mut stranded = false;
            let rooms = self.db.rooms();
            for alias in self.adopt_aliases(&old, &mut report).await? {
                if !self.transfer_alias(&alias, &old, &new, &mut report).await? {
                    stranded = true;
                }
            }
            if stranded || !rooms.active_aliases(&old).await?.is_empty() {
                // the old room keeps what did not move; archiving it now
                // would leave those aliases with no room
                warn!(id = %record.id, old = %old, new = %new, "Aliases left on the old room; replacement paused");
                return Ok(Replacement {
                    old_room: old,
                    new_room: new,
                    step: record.step,
                    report,
                });
            }

            let moved = rooms.active_aliases(&new).await?;
            if let Some(canonical) = moved.first() {
                self.step(
                    &mut report,
                    format!("canonical alias of {new}"),
                    Action::SendState {
                        room: new.clone(),
                        event_type: CANONICAL_ALIAS.into(),
                        state_key: String::new(),
                        content: json!({ "alias": canonical, "alt_aliases": moved[1..] }),
                    },
                )
                .await;
            }
            log.advance(&record.id, ReplacementStep::AliasesTransferred, now_ms()).await?;
            record.step = ReplacementStep::AliasesTransferred;
        }

        if record.step == ReplacementStep::AliasesTransferred {
            let archived = self.archive(&old, Some(&new)).await?;
            report.items.extend(archived.items);
            log.advance(&record.id, ReplacementStep::Archived, now_ms()).await?;
            record.step = ReplacementStep::Archived;
        }

        if record.step == ReplacementStep::Archived {
            match self.db.bindings().rewrite(&old, &new).await {
                Ok(count) => {
                    info!(old = %old, new = %new, bindings = count, "Room bindings rewritten");
                    log.advance(&record.id, ReplacementStep::Done, now_ms()).await?;
                    record.step = ReplacementStep::Done;
                }
                Err(e) => {
                    warn!(old = %old, new = %new, error = %e, "Room bindings not rewritten");
                    report.push(ItemResult::new(
                        format!("rewrite bindings of {old}"),
                        ItemStatus::Failed(e.to_string()),
                    ));
                }
            }
        }

        info!(id = %record.id, old = %old, new = %new, step = record.step.as_str(), "Room replacement finished");
        Ok(Replacement {
            old_room: old,
            new_room: new,
            step: record.step,
            report,
        })
    }

    /// Resume every replacement that did not reach its last step.
    pub async fn resume_pending(&self) -> EngineResult<Vec<EngineResult<Replacement>>> {
        let unfinished = self.db.replacements().unfinished().await?;
        let mut results = Vec::with_capacity(unfinished.len());
        for record in unfinished {
            info!(id = %record.id, old = %record.old_room, step = record.step.as_str(), "Resuming room replacement");
            let result = self.run(record).await;
            if let Err(e) = &result {
                warn!(error = %e, "Room replacement could not be resumed");
            }
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::error::TransportError;
    use crate::transport::MemoryTransport;

    const BOT: &str = "@keeper:example.org";
    const SPACE: &str = "!space:example.org";
    const OLD: &str = "!old:example.org";

    async fn setup() -> (LifecycleManager, Arc<MemoryTransport>) {
        let mut config = crate::config::test_config();
        config.rooms.invitees = vec!["@friend:example.org".into()];

        let transport = Arc::new(MemoryTransport::new(BOT));
        let mut space_levels = PowerLevels::default();
        space_levels.users.insert(BOT.into(), 100);
        space_levels.users.insert("@mod:example.org".into(), 50);
        space_levels.users.insert("@owner:example.org".into(), 1500);
        transport.add_room(SPACE, Some("Space"), space_levels.clone());
        transport.add_room(OLD, Some("General"), space_levels);
        transport.add_space_child(SPACE, OLD);
        transport.set_alias("#general:example.org", OLD).await.unwrap();
        transport.set_alias("#chat:example.org", OLD).await.unwrap();

        let db = Database::new(":memory:").await.unwrap();
        let queue = ActionQueue::spawn(transport.clone(), &QueueConfig { sleep_ms: 0, capacity: 64 });
        (
            LifecycleManager::new(Arc::new(config), db, transport.clone(), queue),
            transport,
        )
    }

    #[test]
    fn alias_sanitizing() {
        assert_eq!(sanitize_alias("Cool Topic!"), "cooltopic");
        assert_eq!(sanitize_alias("Rust & Go 2"), "rustgo2");
        assert_eq!(sanitize_alias("***"), "");
        assert_eq!(sanitize_alias("Café Chat"), "cafchat");
    }

    #[tokio::test]
    async fn create_links_room_and_outranks_admins() {
        let (manager, transport) = setup().await;
        let created = manager.create(&RoomSpec::named("Cool Topic")).await.unwrap();
        let room = &created.room_id;

        assert!(created.report.items.is_empty());
        assert_eq!(created.alias.as_deref(), Some("#cooltopic:example.org"));
        assert_eq!(transport.alias_target("#cooltopic:example.org").as_deref(), Some(room.as_str()));

        let pl = transport.power_levels(room).await.unwrap();
        assert_eq!(pl.user_level("@admin:example.org"), 100);
        assert_eq!(pl.user_level("@mod:example.org"), 50);
        assert_eq!(pl.user_level(BOT), 1501);
        assert_eq!(pl.invite, 50);

        assert!(transport.space_children(SPACE).await.unwrap().contains(room));
        let rules = transport.state_event(room, JOIN_RULES, "").unwrap();
        assert_eq!(rules["join_rule"], "restricted");
        assert_eq!(rules["allow"][0]["room_id"], SPACE);
        assert!(transport.state_event(room, ENCRYPTION, "").is_none());
        assert_eq!(
            transport.membership(room, "@friend:example.org").await.unwrap(),
            Some(crate::transport::Membership::Invite)
        );

        let record = manager.db.rooms().get(room).await.unwrap().unwrap();
        assert!(record.in_space);
    }

    #[tokio::test]
    async fn create_reports_failed_steps_but_returns_the_room() {
        let (manager, transport) = setup().await;
        transport.fail_always(
            "send_state",
            Some(SPACE),
            TransportError::PermissionDenied("no".into()),
        );

        let created = manager
            .create(&RoomSpec {
                encrypt: Some(true),
                ..RoomSpec::named("Secret")
            })
            .await
            .unwrap();
        assert_eq!(created.report.manual_actions().len(), 1);
        assert!(transport.state_event(&created.room_id, ENCRYPTION, "").is_some());
        assert!(manager.db.rooms().get(&created.room_id).await.unwrap().unwrap().encrypted);
    }

    #[tokio::test]
    async fn archive_unlinks_and_tombstones() {
        let (manager, transport) = setup().await;
        let report = manager.archive(OLD, None).await.unwrap();
        assert!(report.items.is_empty());

        assert!(transport.space_children(SPACE).await.unwrap().is_empty());
        assert!(transport.alias_target("#general:example.org").is_none());
        assert!(transport.state_event(OLD, TOMBSTONE, "").is_some());

        let rooms = manager.db.rooms();
        let record = rooms.get(OLD).await.unwrap().unwrap();
        assert!(record.archived && !record.in_space);
        assert!(rooms.active_aliases(OLD).await.unwrap().is_empty());
        assert_eq!(rooms.known_aliases(OLD).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replace_moves_aliases_and_rewrites_bindings() {
        let (manager, transport) = setup().await;
        manager.db.bindings().seed("notification", OLD).await.unwrap();

        let replacement = manager
            .replace(OLD, &RoomSpec::named("General"), "@admin:example.org")
            .await
            .unwrap();
        let new = replacement.new_room.clone();
        assert_eq!(replacement.step, ReplacementStep::Done);

        for alias in ["#general:example.org", "#chat:example.org"] {
            assert_eq!(transport.alias_target(alias).as_deref(), Some(new.as_str()));
            assert_eq!(manager.db.rooms().alias_holder(alias).await.unwrap().as_deref(), Some(new.as_str()));
        }

        let tombstone = transport.state_event(OLD, TOMBSTONE, "").unwrap();
        assert_eq!(tombstone["replacement_room"], new.as_str());
        let record = manager.db.rooms().get(OLD).await.unwrap().unwrap();
        assert_eq!(record.replacement_room.as_deref(), Some(new.as_str()));
        assert_eq!(manager.db.bindings().get("notification").await.unwrap().as_deref(), Some(new.as_str()));

        let err = manager
            .replace(OLD, &RoomSpec::named("Again"), "@admin:example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    async fn holders(manager: &LifecycleManager, transport: &MemoryTransport, alias: &str) -> (Option<String>, Option<String>) {
        (
            transport.alias_target(alias),
            manager.db.rooms().alias_holder(alias).await.unwrap(),
        )
    }

    #[tokio::test]
    async fn failed_alias_move_pauses_before_archival() {
        let (manager, transport) = setup().await;
        // #chat sorts first; its move to the new room fails, the restore works
        transport.fail_next(
            "set_alias",
            None,
            TransportError::Network("connection reset".into()),
        );

        let paused = manager
            .replace(OLD, &RoomSpec::named("General"), "@admin:example.org")
            .await
            .unwrap();
        let new = paused.new_room.clone();
        assert_eq!(paused.step, ReplacementStep::Created);
        assert_eq!(paused.report.failures(), vec!["move #chat:example.org"]);

        let old = Some(OLD.to_string());
        assert_eq!(holders(&manager, &transport, "#chat:example.org").await, (old.clone(), old));
        let moved = Some(new.clone());
        assert_eq!(holders(&manager, &transport, "#general:example.org").await, (moved.clone(), moved));
        assert!(transport.state_event(OLD, TOMBSTONE, "").is_none());

        // running it again continues the same replacement
        let done = manager
            .replace(OLD, &RoomSpec::named("General"), "@admin:example.org")
            .await
            .unwrap();
        assert_eq!(done.step, ReplacementStep::Done);
        assert_eq!(done.new_room, new);
        for alias in ["#chat:example.org", "#general:example.org"] {
            let moved = Some(new.clone());
            assert_eq!(holders(&manager, &transport, alias).await, (moved.clone(), moved));
        }
        assert!(transport.state_event(OLD, TOMBSTONE, "").is_some());
    }

    #[tokio::test]
    async fn unrestored_alias_is_kept_in_the_store_and_resumed() {
        let (manager, transport) = setup().await;
        transport.fail_always("set_alias", None, TransportError::Network("down".into()));

        let paused = manager
            .replace(OLD, &RoomSpec::named("General"), "@admin:example.org")
            .await
            .unwrap();
        assert_eq!(paused.step, ReplacementStep::Created);
        assert_eq!(
            paused.report.failures(),
            vec![
                "move #chat:example.org".to_string(),
                format!("restore #chat:example.org on {OLD}"),
                "move #general:example.org".to_string(),
                format!("restore #general:example.org on {OLD}"),
            ]
        );
        for alias in ["#chat:example.org", "#general:example.org"] {
            assert_eq!(holders(&manager, &transport, alias).await, (None, Some(OLD.to_string())));
        }

        transport.clear_failures();
        let results = manager.resume_pending().await.unwrap();
        let done = results.into_iter().next().unwrap().unwrap();
        assert_eq!(done.step, ReplacementStep::Done);
        for alias in ["#chat:example.org", "#general:example.org"] {
            let moved = Some(done.new_room.clone());
            assert_eq!(holders(&manager, &transport, alias).await, (moved.clone(), moved));
        }
    }

    #[tokio::test]
    async fn interrupted_replacement_resumes_after_aliases_moved() {
        let (manager, transport) = setup().await;
        let log = manager.db.replacements();

        // simulate a crash right after the alias transfer
        manager.ensure_known(OLD).await.unwrap();
        let record = log
            .start(OLD, &serde_json::to_string(&RoomSpec::named("General")).unwrap(), "@admin:example.org", 1)
            .await
            .unwrap();
        let created = manager.create_room(&RoomSpec::named("General"), false).await.unwrap();
        log.record_created(&record.id, &created.room_id, 2).await.unwrap();
        let mut report = BatchReport::default();
        for alias in manager.adopt_aliases(OLD, &mut report).await.unwrap() {
            assert!(
                manager
                    .transfer_alias(&alias, OLD, &created.room_id, &mut report)
                    .await
                    .unwrap()
            );
        }
        log.advance(&record.id, ReplacementStep::AliasesTransferred, 3).await.unwrap();

        // exactly one holder while the old room is not archived yet
        assert_eq!(
            manager.db.rooms().alias_holder("#general:example.org").await.unwrap().as_deref(),
            Some(created.room_id.as_str())
        );

        let results = manager.resume_pending().await.unwrap();
        assert_eq!(results.len(), 1);
        let done = results.into_iter().next().unwrap().unwrap();
        assert_eq!(done.step, ReplacementStep::Done);
        assert_eq!(done.new_room, created.room_id);
        assert!(log.unfinished().await.unwrap().is_empty());
        assert!(transport.state_event(OLD, TOMBSTONE, "").is_some());
        assert_eq!(
            transport.alias_target("#chat:example.org").as_deref(),
            Some(created.room_id.as_str())
        );
    }
}
