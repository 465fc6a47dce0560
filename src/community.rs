//! The community - shared state for the agent.
//!
//! Holds the configuration, the store, the transport and one instance of
//! every engine component, so the dispatcher and the command front end see
//! the same caches and the same outbound queue.

use crate::censor::{Censor, Verdict};
use crate::config::Config;
use crate::db::{Database, now_ms};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::LifecycleManager;
use crate::outcome::{BatchReport, ItemResult, ItemStatus};
use crate::policy::BanlistCache;
use crate::power::Reconciler;
use crate::queue::{Action, ActionQueue};
use crate::tracker::{ActivityTracker, SyncResult};
use crate::transport::{Membership, Transport, managed_rooms};
use crate::verification::VerificationMachine;
use dashmap::DashSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Binding purpose for the enforcement notification room.
pub const NOTIFICATION_BINDING: &str = "notification";

/// Binding purpose prefix for greeting rooms; the suffix is the configured room.
pub const GREETING_BINDING_PREFIX: &str = "greeting:";

/// Community-wide membership sanction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanction {
    Kick,
    Ban,
    Unban,
}

impl Sanction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sanction::Kick => "kick",
            Sanction::Ban => "ban",
            Sanction::Unban => "unban",
        }
    }

    fn action(&self, room: &str, user: &str, reason: &str) -> Action {
        let (room, user, reason) = (room.to_string(), user.to_string(), reason.to_string());
        match self {
            Sanction::Kick => Action::Kick { room, user, reason },
            Sanction::Ban => Action::Ban { room, user, reason },
            Sanction::Unban => Action::Unban { room, user, reason },
        }
    }

    /// Whether the sanction makes sense given the user's membership.
    fn applies_to(&self, membership: Option<Membership>) -> bool {
        match self {
            Sanction::Kick => matches!(membership, Some(Membership::Join | Membership::Invite)),
            Sanction::Ban => membership != Some(Membership::Ban),
            Sanction::Unban => membership == Some(Membership::Ban),
        }
    }
}

/// Shared state container.
pub struct Community {
    pub config: Arc<Config>,
    pub db: Database,
    pub transport: Arc<dyn Transport>,
    pub queue: ActionQueue,
    pub tracker: ActivityTracker,
    pub reconciler: Reconciler,
    pub banlist: BanlistCache,
    pub verification: VerificationMachine,
    pub censor: Censor,
    pub lifecycle: LifecycleManager,
    /// Greeting names already reported as missing.
    missing_greetings: DashSet<String>,
    /// Cancels long-running batches on shutdown.
    shutdown: CancellationToken,
}

impl Community {
    /// Build every component. Must run inside a tokio runtime (spawns the
    /// action queue worker).
    pub fn new(config: Arc<Config>, db: Database, transport: Arc<dyn Transport>) -> Arc<Self> {
        let queue = ActionQueue::spawn(transport.clone(), &config.queue);
        Arc::new(Self {
            tracker: ActivityTracker::new(config.clone(), db.clone(), transport.clone()),
            reconciler: Reconciler::new(config.clone(), db.clone(), transport.clone(), queue.clone()),
            banlist: BanlistCache::new(config.clone(), db.clone(), transport.clone(), queue.clone()),
            verification: VerificationMachine::new(
                config.clone(),
                db.clone(),
                transport.clone(),
                queue.clone(),
            ),
            censor: Censor::new(&config.censor),
            lifecycle: LifecycleManager::new(config.clone(), db.clone(), transport.clone(), queue.clone()),
            missing_greetings: DashSet::new(),
            shutdown: CancellationToken::new(),
            config,
            db,
            transport,
            queue,
        })
    }

    /// Token for a batch operation; cancelled when the agent shuts down.
    pub fn batch_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Startup sequence: seed bindings and verification flags, load the
    /// banlist cache, discover space rooms and resume interrupted
    /// replacements.
    pub async fn start(&self) -> EngineResult<()> {
        let now = now_ms();
        self.seed_bindings().await?;
        self.verification.seed(now).await?;
        self.banlist.load().await?;
        match self.discover_rooms(now).await {
            Ok(count) => debug!(rooms = count, "Space rooms discovered"),
            Err(e) => warn!(error = %e, "Space room discovery failed"),
        }
        for replacement in self.lifecycle.resume_pending().await?.into_iter().flatten() {
            self.notify(&format!(
                "Resumed replacement of {} by {}",
                replacement.old_room, replacement.new_room
            ))
            .await;
        }
        info!("Community state ready");
        Ok(())
    }

    /// Seed room bindings from configuration.
    pub async fn seed_bindings(&self) -> EngineResult<()> {
        let bindings = self.db.bindings();
        if let Some(room) = &self.config.bot.notification_room {
            bindings.seed(NOTIFICATION_BINDING, room).await?;
        }
        for room in self.config.greetings.rooms.keys() {
            bindings
                .seed(&format!("{GREETING_BINDING_PREFIX}{room}"), room)
                .await?;
        }
        Ok(())
    }

    /// Record every space child in the room store.
    pub async fn discover_rooms(&self, now: i64) -> EngineResult<usize> {
        let space = &self.config.bot.parent_space;
        let children = self
            .transport
            .space_children(space)
            .await
            .map_err(|e| EngineError::from_transport(space, e))?;
        for room in &children {
            let name = self.transport.room_name(room).await.ok().flatten();
            self.db.rooms().upsert(room, name.as_deref(), true, false, now).await?;
        }
        Ok(children.len())
    }

    /// Post `text` to the notification room, if one is bound.
    pub async fn notify(&self, text: &str) {
        let room = match self.db.bindings().get(NOTIFICATION_BINDING).await {
            Ok(Some(room)) => room,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Cannot look up the notification room");
                return;
            }
        };
        let action = Action::SendMessage {
            room,
            body: text.to_string(),
        };
        if let Err(e) = self.queue.enqueue(action).await {
            warn!(error = %e, "Notification dropped");
        }
    }

    /// Greet `user` on joining `room` if the room is bound to a greeting.
    ///
    /// Returns true if a greeting was queued. A binding naming an unknown
    /// greeting is reported once per name and otherwise ignored.
    pub async fn greet(&self, user: &str, room: &str) -> EngineResult<bool> {
        if user == self.config.bot.user_id {
            return Ok(false);
        }
        let greetings = &self.config.greetings;
        let mut greeted = false;

        for binding in self.db.bindings().for_room(room).await? {
            if !binding.purpose.starts_with(GREETING_BINDING_PREFIX) {
                continue;
            }
            let Some(name) = greetings.rooms.get(&binding.seeded_from) else {
                continue;
            };
            let Some(text) = greetings.messages.get(name) else {
                if self.missing_greetings.insert(name.clone()) {
                    let err = EngineError::Configuration(format!("greeting '{name}' is not defined"));
                    error!(room = %room, error = %err, "Greeting skipped");
                }
                continue;
            };

            self.queue
                .enqueue(Action::SendMessage {
                    room: room.to_string(),
                    body: text.replace("{user}", user),
                })
                .await?;
            greeted = true;
        }
        Ok(greeted)
    }

    /// Discover rooms and align tracked users with the space.
    pub async fn sync(&self, now: i64) -> EngineResult<SyncResult> {
        if let Err(e) = self.discover_rooms(now).await {
            warn!(error = %e, "Space room discovery failed");
        }
        let result = self.tracker.sync(now).await?;
        info!(added = result.added.len(), dropped = result.dropped.len(), "Space sync complete");
        Ok(result)
    }

    /// Sync after a membership-changing command; failures are logged only.
    async fn resync(&self) {
        if let Err(e) = self.sync(now_ms()).await {
            warn!(error = %e, "Post-command sync failed");
        }
    }

    async fn community_rooms(&self) -> EngineResult<Vec<String>> {
        let space = &self.config.bot.parent_space;
        managed_rooms(self.transport.as_ref(), space)
            .await
            .map_err(|e| EngineError::from_transport(space, e))
    }

    /// Apply `sanction` to `user` in every space child and the space.
    ///
    /// Rooms where the sanction does not apply (kicking a non-member,
    /// unbanning someone not banned) are reported as skipped.
    pub async fn sanction(
        &self,
        user: &str,
        sanction: Sanction,
        reason: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<BatchReport> {
        let rooms = self.community_rooms().await?;
        let mut report = self.sanction_rooms(&rooms, user, sanction, reason, cancel, false).await;

        let banned = match sanction {
            Sanction::Ban => Some(true),
            Sanction::Unban => Some(false),
            Sanction::Kick => None,
        };
        if let Some(banned) = banned
            && let Err(e) = self.db.users().set_banned(user, banned, now_ms()).await
        {
            warn!(user = %user, error = %e, "Ban flag not recorded");
            report.push(ItemResult::new(
                format!("record {} of {user}", sanction.as_str()),
                ItemStatus::Failed(e.to_string()),
            ));
        }
        info!(
            user = %user,
            action = sanction.as_str(),
            applied = report.applied().len(),
            manual = report.manual_actions().len(),
            failed = report.failures().len(),
            "Community sanction finished"
        );
        self.resync().await;
        Ok(report)
    }

    async fn sanction_rooms(
        &self,
        rooms: &[String],
        user: &str,
        sanction: Sanction,
        reason: &str,
        cancel: &CancellationToken,
        silent_skips: bool,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for room in rooms {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let target = format!("{user} in {room}");

            let membership = match self.transport.membership(room, user).await {
                Ok(m) => m,
                Err(e) => {
                    let err = EngineError::from_transport(room, e);
                    warn!(room = %room, user = %user, error = %err, "Cannot read membership");
                    report.push(ItemResult::from_error(target, &err));
                    continue;
                }
            };
            if !sanction.applies_to(membership) {
                if !silent_skips {
                    report.push(ItemResult::new(target, ItemStatus::Skipped("not applicable".into())));
                }
                continue;
            }

            match self.queue.submit(sanction.action(room, user, reason)).await {
                Ok(_) => report.push(ItemResult::new(target, ItemStatus::Applied)),
                Err(e) => {
                    warn!(room = %room, user = %user, action = sanction.as_str(), error = %e, "Sanction failed");
                    report.push(ItemResult::from_error(target, &e));
                }
            }
        }
        report
    }

    /// Kick every `danger` user from the whole community.
    ///
    /// Cancellation is checked before each (user, room) pair; kicks already
    /// made stay.
    pub async fn purge(&self, now: i64, cancel: &CancellationToken) -> EngineResult<BatchReport> {
        let users = self.tracker.purgeable(now).await?;
        let rooms = self.community_rooms().await?;
        let mut report = BatchReport::default();
        for user in users {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let kicked = self
                .sanction_rooms(&rooms, &user, Sanction::Kick, "inactivity", cancel, true)
                .await;
            report.cancelled |= kicked.cancelled;
            report.items.extend(kicked.items);
        }
        info!(kicked = report.applied().len(), failed = report.failures().len(), "Purge finished");
        self.resync().await;
        Ok(report)
    }

    /// Members of `room` who are not members of the parent space.
    pub async fn guests(&self, room: &str) -> EngineResult<Vec<String>> {
        let space = &self.config.bot.parent_space;
        let space_members: BTreeSet<String> = self
            .transport
            .joined_members(space)
            .await
            .map_err(|e| EngineError::from_transport(space, e))?
            .into_iter()
            .collect();
        let mut guests: Vec<String> = self
            .transport
            .joined_members(room)
            .await
            .map_err(|e| EngineError::from_transport(room, e))?
            .into_iter()
            .filter(|u| !space_members.contains(u) && *u != self.config.bot.user_id)
            .collect();
        guests.sort();
        Ok(guests)
    }

    /// Resolve `alias` to a room id; without an alias, `current_room`.
    pub async fn room_id(&self, alias: Option<&str>, current_room: &str) -> EngineResult<String> {
        match alias {
            Some(alias) => self
                .transport
                .resolve_alias(alias)
                .await
                .map_err(|e| EngineError::from_transport(alias, e)),
            None => Ok(current_room.to_string()),
        }
    }

    /// Redact the recent messages of `user` in `room`.
    pub async fn redact_user(&self, user: &str, room: &str, cancel: &CancellationToken) -> EngineResult<BatchReport> {
        let events = self
            .transport
            .recent_messages(room, user, self.config.censor.redact_limit)
            .await
            .map_err(|e| EngineError::from_transport(room, e))?;

        let mut report = BatchReport::default();
        for event_id in events {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let action = Action::Redact {
                room: room.to_string(),
                event_id: event_id.clone(),
                reason: "redacted by moderator".into(),
            };
            match self.queue.submit(action).await {
                Ok(_) => report.push(ItemResult::new(event_id, ItemStatus::Applied)),
                Err(e) => {
                    warn!(room = %room, event = %event_id, error = %e, "Redaction failed");
                    report.push(ItemResult::from_error(event_id, &e));
                }
            }
        }
        Ok(report)
    }

    /// Apply word-list censorship to a message.
    ///
    /// Actions are queued, not awaited, so the room lane keeps moving.
    pub async fn censor_message(&self, room: &str, sender: &str, event_id: &str, body: &str) -> EngineResult<Verdict> {
        if sender == self.config.bot.user_id || !self.config.censor.enabled.is_enabled() {
            return Ok(Verdict::Clean);
        }
        let level = self
            .transport
            .power_levels(room)
            .await
            .map_err(|e| EngineError::from_transport(room, e))?
            .user_level(sender);
        if !self.censor.applies(room, level) {
            return Ok(Verdict::Clean);
        }

        let verdict = self.censor.check(body);
        match &verdict {
            Verdict::Clean => {}
            Verdict::Redact { word } => {
                info!(room = %room, user = %sender, word = %word, "Censored message");
                self.queue
                    .enqueue(Action::Redact {
                        room: room.to_string(),
                        event_id: event_id.to_string(),
                        reason: "censored".into(),
                    })
                    .await?;
            }
            Verdict::RedactAndBan { word } => {
                info!(room = %room, user = %sender, word = %word, "Instant-ban word; banning community-wide");
                self.queue
                    .enqueue(Action::Redact {
                        room: room.to_string(),
                        event_id: event_id.to_string(),
                        reason: "censored".into(),
                    })
                    .await?;
                let space = &self.config.bot.parent_space;
                let rooms = managed_rooms(self.transport.as_ref(), space)
                    .await
                    .map_err(|e| EngineError::from_transport(space, e))?;
                for target in rooms {
                    self.queue
                        .enqueue(Sanction::Ban.action(&target, sender, "instant-ban word"))
                        .await?;
                }
                self.db.users().set_banned(sender, true, now_ms()).await?;
                self.notify(&format!("Banned {sender} for an instant-ban word in {room}"))
                    .await;
            }
        }
        Ok(verdict)
    }

    /// Set or clear the ignore flag, tracking the user first if needed.
    pub async fn set_ignored(&self, user: &str, ignored: bool) -> EngineResult<()> {
        let users = self.db.users();
        users.ensure(user, now_ms()).await?;
        users.set_ignored(user, ignored).await?;
        info!(user = %user, ignored, "Ignore flag updated");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::power::PowerLevels;
    use crate::transport::MemoryTransport;

    pub(crate) const BOT: &str = "@keeper:example.org";
    pub(crate) const SPACE: &str = "!space:example.org";
    pub(crate) const LOBBY: &str = "!lobby:example.org";
    pub(crate) const DEV: &str = "!dev:example.org";

    pub(crate) fn bot_levels() -> PowerLevels {
        let mut pl = PowerLevels::default();
        pl.users.insert(BOT.into(), 100);
        pl
    }

    /// A space with two child rooms and the given config.
    pub(crate) async fn community_with(config: Config) -> (Arc<Community>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new(BOT));
        transport.add_room(SPACE, Some("Space"), bot_levels());
        transport.add_room(LOBBY, Some("Lobby"), bot_levels());
        transport.add_room(DEV, Some("Dev"), bot_levels());
        transport.add_space_child(SPACE, LOBBY);
        transport.add_space_child(SPACE, DEV);

        let db = Database::new(":memory:").await.unwrap();
        let community = Community::new(Arc::new(config), db, transport.clone());
        (community, transport)
    }

    fn join(transport: &MemoryTransport, user: &str, rooms: &[&str]) {
        for room in rooms {
            transport.set_membership(room, user, Membership::Join);
        }
    }

    #[tokio::test]
    async fn ban_then_unban_across_the_community() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        let user = "@troll:example.org";
        join(&transport, user, &[SPACE, LOBBY]);
        let cancel = community.batch_token();

        let report = community.sanction(user, Sanction::Ban, "trolling", &cancel).await.unwrap();
        // banned even where never a member
        assert_eq!(report.applied().len(), 3);
        assert_eq!(
            transport.membership(DEV, user).await.unwrap(),
            Some(Membership::Ban)
        );
        assert!(community.db.users().get(user).await.unwrap().unwrap().banned);

        let report = community.sanction(user, Sanction::Unban, "appeal", &cancel).await.unwrap();
        assert_eq!(report.applied().len(), 3);
        assert!(!community.db.users().get(user).await.unwrap().unwrap().banned);
    }

    #[tokio::test]
    async fn kick_skips_rooms_without_the_user() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        let user = "@quiet:example.org";
        join(&transport, user, &[SPACE, DEV]);

        let report = community
            .sanction(user, Sanction::Kick, "bye", &community.batch_token())
            .await
            .unwrap();
        assert_eq!(report.applied().len(), 2);
        assert_eq!(report.items.len(), 3);
        assert_eq!(report.outcome(), crate::outcome::Outcome::Applied);
    }

    #[tokio::test]
    async fn purge_kicks_only_danger_users() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        join(&transport, "@old:example.org", &[SPACE, LOBBY]);
        join(&transport, "@fresh:example.org", &[SPACE, LOBBY]);

        let day = crate::tracker::DAY_MS;
        let now = 100 * day;
        community.db.users().ensure("@old:example.org", 0).await.unwrap();
        community.db.users().ensure("@fresh:example.org", now).await.unwrap();

        let report = community.purge(now, &community.batch_token()).await.unwrap();
        assert_eq!(report.applied().len(), 2);
        assert_eq!(
            transport.membership(LOBBY, "@old:example.org").await.unwrap(),
            Some(Membership::Leave)
        );
        assert_eq!(
            transport.membership(LOBBY, "@fresh:example.org").await.unwrap(),
            Some(Membership::Join)
        );
    }

    #[tokio::test]
    async fn ban_is_reported_when_the_store_is_unavailable() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        let user = "@troll:example.org";
        join(&transport, user, &[SPACE, LOBBY]);
        community.db.pool().close().await;

        let report = community
            .sanction(user, Sanction::Ban, "trolling", &community.batch_token())
            .await
            .unwrap();
        assert_eq!(report.applied().len(), 3);
        assert_eq!(report.failures(), vec!["record ban of @troll:example.org"]);
        assert!(matches!(report.outcome(), crate::outcome::Outcome::Partial { .. }));
        assert_eq!(transport.membership(LOBBY, user).await.unwrap(), Some(Membership::Ban));
    }

    #[tokio::test]
    async fn purge_continues_past_a_failed_kick() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        let users = ["@old1:example.org", "@old2:example.org"];
        for user in users {
            join(&transport, user, &[SPACE, LOBBY]);
            community.db.users().ensure(user, 0).await.unwrap();
        }
        transport.fail_always("kick", Some(LOBBY), TransportError::Network("timeout".into()));

        let now = 100 * crate::tracker::DAY_MS;
        let report = community.purge(now, &community.batch_token()).await.unwrap();
        assert_eq!(report.failures().len(), 2);
        assert_eq!(report.applied().len(), 2);
        assert!(!report.cancelled);
        for user in users {
            assert_eq!(transport.membership(SPACE, user).await.unwrap(), Some(Membership::Leave));
            assert_eq!(transport.membership(LOBBY, user).await.unwrap(), Some(Membership::Join));
        }
    }

    #[tokio::test]
    async fn purge_stops_between_kicks_when_cancelled() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        for user in ["@old1:example.org", "@old2:example.org"] {
            join(&transport, user, &[SPACE, LOBBY, DEV]);
            community.db.users().ensure(user, 0).await.unwrap();
        }
        let cancel = community.batch_token();
        transport.cancel_after("kick", 1, cancel.clone());

        let now = 100 * crate::tracker::DAY_MS;
        let report = community.purge(now, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.applied().len(), 1);
        assert_eq!(report.items.len(), 1);
        // the kick that went out stays, nothing else is attempted
        assert_eq!(transport.calls_of("kick").len(), 1);
    }

    #[tokio::test]
    async fn guests_are_room_members_outside_the_space() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        join(&transport, "@member:example.org", &[SPACE, LOBBY]);
        join(&transport, "@visitor:other.org", &[LOBBY]);

        assert_eq!(community.guests(LOBBY).await.unwrap(), vec!["@visitor:other.org"]);
    }

    #[tokio::test]
    async fn room_id_resolves_aliases() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        transport.set_alias("#lobby:example.org", LOBBY).await.unwrap();

        assert_eq!(community.room_id(Some("#lobby:example.org"), DEV).await.unwrap(), LOBBY);
        assert_eq!(community.room_id(None, DEV).await.unwrap(), DEV);
        let err = community.room_id(Some("#nope:example.org"), DEV).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn redact_user_is_bounded() {
        let mut config = crate::config::test_config();
        config.censor.redact_limit = 2;
        let (community, transport) = community_with(config).await;
        let user = "@spam:example.org";
        join(&transport, user, &[LOBBY]);
        let first = transport.push_message(LOBBY, user, "one");
        transport.push_message(LOBBY, user, "two");
        transport.push_message(LOBBY, user, "three");

        let report = community.redact_user(user, LOBBY, &community.batch_token()).await.unwrap();
        assert_eq!(report.applied().len(), 2);
        assert!(!transport.is_redacted(LOBBY, &first));
    }

    #[tokio::test]
    async fn greetings_follow_bindings_and_tolerate_missing_names() {
        let mut config = crate::config::test_config();
        config.greetings.messages.insert("welcome".into(), "Hi {user}!".into());
        config.greetings.rooms.insert(LOBBY.into(), "welcome".into());
        config.greetings.rooms.insert(DEV.into(), "missing".into());
        let (community, transport) = community_with(config).await;
        community.seed_bindings().await.unwrap();

        assert!(community.greet("@new:example.org", LOBBY).await.unwrap());
        assert!(!community.greet("@new:example.org", DEV).await.unwrap());
        assert!(!community.greet("@new:example.org", DEV).await.unwrap());
        community.queue.flush().await.unwrap();
        assert_eq!(transport.sent_messages(LOBBY), vec!["Hi @new:example.org!"]);
        assert_eq!(community.missing_greetings.len(), 1);
    }

    #[tokio::test]
    async fn instant_ban_words_ban_everywhere() {
        let mut config = crate::config::test_config();
        config.censor.enabled = crate::config::CensorScope::All(true);
        config.censor.words = vec!["darn".into()];
        config.censor.instant_ban_words = vec!["free crypto".into()];
        let (community, transport) = community_with(config).await;
        let user = "@scam:example.org";
        join(&transport, user, &[SPACE, LOBBY]);

        let event = transport.push_message(LOBBY, user, "FREE CRYPTO here");
        let verdict = community.censor_message(LOBBY, user, &event, "FREE CRYPTO here").await.unwrap();
        assert!(matches!(verdict, Verdict::RedactAndBan { .. }));
        community.queue.flush().await.unwrap();

        assert!(transport.is_redacted(LOBBY, &event));
        for room in [SPACE, LOBBY, DEV] {
            assert_eq!(transport.membership(room, user).await.unwrap(), Some(Membership::Ban));
        }

        let event = transport.push_message(LOBBY, BOT, "darn");
        let verdict = community.censor_message(LOBBY, BOT, &event, "darn").await.unwrap();
        assert_eq!(verdict, Verdict::Clean);
    }
}
