//! Activity tracking and inactivity reports.
//!
//! Messages and reactions bump a user's last-active timestamp (never
//! backwards). A user's inactivity is measured from that timestamp, or from
//! when the user was first seen if they never spoke.

use crate::config::Config;
use crate::db::{Database, UserRecord};
use crate::error::{EngineError, EngineResult};
use crate::transport::Transport;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// What kind of event counted as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Message,
    Reaction,
}

/// Inactivity class of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Classification {
    Active,
    Warn,
    Danger,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Active => "active",
            Classification::Warn => "warn",
            Classification::Danger => "danger",
        }
    }
}

/// Whole days elapsed between `reference` and `now`.
pub fn days_inactive(reference: i64, now: i64) -> i64 {
    (now - reference).max(0) / DAY_MS
}

/// Classify a user whose last activity (or first sighting) was `reference`.
pub fn classify(reference: i64, now: i64, warn_days: u32, kick_days: u32) -> Classification {
    let days = days_inactive(reference, now);
    if days >= i64::from(kick_days) {
        Classification::Danger
    } else if days >= i64::from(warn_days) {
        Classification::Warn
    } else {
        Classification::Active
    }
}

/// One line of an inactivity report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub user: String,
    pub days_inactive: i64,
    pub classification: Classification,
}

/// Result of a space membership sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub added: Vec<String>,
    pub dropped: Vec<String>,
}

/// Tracks per-user activity.
pub struct ActivityTracker {
    config: Arc<Config>,
    db: Database,
    transport: Arc<dyn Transport>,
}

impl ActivityTracker {
    pub fn new(config: Arc<Config>, db: Database, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            db,
            transport,
        }
    }

    /// Record activity by `user` in `room`. Returns false if tracking for
    /// this kind of event is disabled.
    pub async fn record_activity(
        &self,
        user: &str,
        room: &str,
        timestamp: i64,
        kind: ActivityKind,
    ) -> EngineResult<bool> {
        let tracking = &self.config.tracking;
        let enabled = tracking.track_users
            && match kind {
                ActivityKind::Message => tracking.track_messages,
                ActivityKind::Reaction => tracking.track_reactions,
            };

        if !enabled || user == self.config.bot.user_id {
            debug!(user = %user, room = %room, ?kind, "Activity not tracked");
            return Ok(false);
        }

        self.db.users().record_activity(user, timestamp).await?;
        Ok(true)
    }

    /// Reference timestamp for inactivity: last activity, else first sighting.
    fn reference(record: &UserRecord) -> i64 {
        record.last_active.unwrap_or(record.first_seen)
    }

    /// Classify a single user. `None` if the user is not tracked.
    pub async fn classify_user(&self, user: &str, now: i64) -> EngineResult<Option<Classification>> {
        let tracking = &self.config.tracking;
        Ok(self.db.users().get(user).await?.map(|record| {
            classify(
                Self::reference(&record),
                now,
                tracking.warn_threshold_days,
                tracking.kick_threshold_days,
            )
        }))
    }

    /// Inactivity report, most inactive first.
    ///
    /// With an empty `rooms` slice every space member is reported, otherwise
    /// only users joined to one of `rooms`. Ignored users are left out.
    pub async fn report(&self, rooms: &[String], now: i64) -> EngineResult<Vec<ReportEntry>> {
        let scope = if rooms.is_empty() {
            None
        } else {
            let mut members = HashSet::new();
            for room in rooms {
                let joined = self
                    .transport
                    .joined_members(room)
                    .await
                    .map_err(|e| EngineError::from_transport(room, e))?;
                members.extend(joined);
            }
            Some(members)
        };

        let tracking = &self.config.tracking;
        let mut entries: Vec<ReportEntry> = self
            .db
            .users()
            .all()
            .await?
            .into_iter()
            .filter(|r| !r.ignored && r.space_member)
            .filter(|r| scope.as_ref().is_none_or(|s| s.contains(&r.user_id)))
            .map(|r| {
                let reference = Self::reference(&r);
                ReportEntry {
                    days_inactive: days_inactive(reference, now),
                    classification: classify(
                        reference,
                        now,
                        tracking.warn_threshold_days,
                        tracking.kick_threshold_days,
                    ),
                    user: r.user_id,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.days_inactive
                .cmp(&a.days_inactive)
                .then_with(|| a.user.cmp(&b.user))
        });
        Ok(entries)
    }

    /// Users currently classified `danger`.
    pub async fn purgeable(&self, now: i64) -> EngineResult<Vec<String>> {
        Ok(self
            .report(&[], now)
            .await?
            .into_iter()
            .filter(|e| e.classification == Classification::Danger)
            .map(|e| e.user)
            .collect())
    }

    /// Align tracked users with the space's joined members.
    ///
    /// New members are inserted; departed members are flagged, never deleted.
    pub async fn sync(&self, now: i64) -> EngineResult<SyncResult> {
        let space = &self.config.bot.parent_space;
        let members: BTreeSet<String> = self
            .transport
            .joined_members(space)
            .await
            .map_err(|e| EngineError::from_transport(space, e))?
            .into_iter()
            .filter(|u| *u != self.config.bot.user_id)
            .collect();

        let users = self.db.users();
        let mut result = SyncResult::default();

        for member in &members {
            if users.ensure(member, now).await? {
                info!(user = %member, "User added to activity tracking");
                result.added.push(member.clone());
            } else if users.set_space_member(member, true).await? {
                info!(user = %member, "User rejoined the space");
                result.added.push(member.clone());
            }
        }

        for record in users.all().await? {
            if record.space_member && !members.contains(&record.user_id) {
                users.set_space_member(&record.user_id, false).await?;
                info!(user = %record.user_id, "User left the space, flagged");
                result.dropped.push(record.user_id);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Membership, MemoryTransport};

    const SPACE: &str = "!space:example.org";
    const BOT: &str = "@keeper:example.org";

    async fn tracker_with(config: Config) -> (ActivityTracker, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new(BOT));
        transport.add_room(SPACE, None, Default::default());
        let db = Database::new(":memory:").await.unwrap();
        (
            ActivityTracker::new(Arc::new(config), db, transport.clone()),
            transport,
        )
    }

    #[test]
    fn classify_uses_whole_days() {
        let now = 100 * DAY_MS;
        assert_eq!(classify(now - 29 * DAY_MS, now, 30, 60), Classification::Active);
        assert_eq!(classify(now - 30 * DAY_MS, now, 30, 60), Classification::Warn);
        assert_eq!(classify(now - 59 * DAY_MS - 1, now, 30, 60), Classification::Warn);
        assert_eq!(classify(now - 60 * DAY_MS, now, 30, 60), Classification::Danger);
        // clock skew never produces negative inactivity
        assert_eq!(classify(now + DAY_MS, now, 30, 60), Classification::Active);
    }

    #[tokio::test]
    async fn silent_member_becomes_danger_after_kick_threshold() {
        let (tracker, transport) = tracker_with(crate::config::test_config()).await;
        transport.set_membership(SPACE, "@quiet:example.org", Membership::Join);
        tracker.sync(0).await.unwrap();

        let later = 61 * DAY_MS;
        assert_eq!(
            tracker.classify_user("@quiet:example.org", later).await.unwrap(),
            Some(Classification::Danger)
        );
        assert_eq!(tracker.purgeable(later).await.unwrap(), vec!["@quiet:example.org"]);
    }

    #[tokio::test]
    async fn activity_respects_toggles() {
        let mut config = crate::config::test_config();
        config.tracking.track_reactions = false;
        let (tracker, _) = tracker_with(config).await;

        assert!(tracker
            .record_activity("@u:example.org", "!r:example.org", 5, ActivityKind::Message)
            .await
            .unwrap());
        assert!(!tracker
            .record_activity("@u:example.org", "!r:example.org", 9, ActivityKind::Reaction)
            .await
            .unwrap());
        assert!(!tracker
            .record_activity(BOT, "!r:example.org", 9, ActivityKind::Message)
            .await
            .unwrap());

        let record = tracker.db.users().get("@u:example.org").await.unwrap().unwrap();
        assert_eq!(record.last_active, Some(5));
    }

    #[tokio::test]
    async fn user_tracking_master_switch() {
        let mut config = crate::config::test_config();
        config.tracking.track_users = false;
        let (tracker, _) = tracker_with(config).await;
        assert!(!tracker
            .record_activity("@u:example.org", "!r:example.org", 5, ActivityKind::Message)
            .await
            .unwrap());
        assert!(tracker.db.users().get("@u:example.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn report_orders_and_excludes_ignored() {
        let (tracker, transport) = tracker_with(crate::config::test_config()).await;
        for user in ["@a:example.org", "@b:example.org", "@c:example.org"] {
            transport.set_membership(SPACE, user, Membership::Join);
        }
        tracker.sync(0).await.unwrap();
        tracker
            .record_activity("@a:example.org", SPACE, 40 * DAY_MS, ActivityKind::Message)
            .await
            .unwrap();
        tracker.db.users().set_ignored("@c:example.org", true).await.unwrap();

        let report = tracker.report(&[], 50 * DAY_MS).await.unwrap();
        let users: Vec<_> = report.iter().map(|e| e.user.as_str()).collect();
        assert_eq!(users, vec!["@b:example.org", "@a:example.org"]);
        assert_eq!(report[0].days_inactive, 50);
        assert_eq!(report[0].classification, Classification::Warn);
        assert_eq!(report[1].classification, Classification::Active);
    }

    #[tokio::test]
    async fn report_scoped_to_rooms() {
        let (tracker, transport) = tracker_with(crate::config::test_config()).await;
        transport.add_room("!r:example.org", None, Default::default());
        transport.set_membership(SPACE, "@a:example.org", Membership::Join);
        transport.set_membership(SPACE, "@b:example.org", Membership::Join);
        transport.set_membership("!r:example.org", "@b:example.org", Membership::Join);
        tracker.sync(0).await.unwrap();

        let report = tracker
            .report(&["!r:example.org".to_string()], DAY_MS)
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].user, "@b:example.org");
    }

    #[tokio::test]
    async fn sync_flags_departed_members() {
        let (tracker, transport) = tracker_with(crate::config::test_config()).await;
        transport.set_membership(SPACE, "@a:example.org", Membership::Join);
        transport.set_membership(SPACE, "@b:example.org", Membership::Join);

        let first = tracker.sync(1).await.unwrap();
        assert_eq!(first.added.len(), 2);

        transport.set_membership(SPACE, "@b:example.org", Membership::Leave);
        let second = tracker.sync(2).await.unwrap();
        assert!(second.added.is_empty());
        assert_eq!(second.dropped, vec!["@b:example.org"]);

        // flagged, not deleted
        let record = tracker.db.users().get("@b:example.org").await.unwrap().unwrap();
        assert!(!record.space_member);
    }
}
