//! Banlist policy cache.
//!
//! Rules published in subscribed policy rooms are persisted in the store and
//! kept compiled in memory. Joins are always checked against the cache; with
//! proactive banning enabled, a newly active rule is also swept across the
//! current membership of every managed room. Bans only ever go one way: a
//! revoked rule drops out of the cache but never unbans anyone.

mod rules;

pub use rules::{BAN_RECOMMENDATIONS, CompiledRule, PolicyEvent, is_ban, kind_of, parse};

use crate::config::Config;
use crate::db::{Database, PolicyKind, PolicyRule, RuleState, now_ms};
use crate::error::{EngineError, EngineResult};
use crate::outcome::{BatchReport, ItemResult, ItemStatus};
use crate::queue::{Action, ActionQueue};
use crate::transport::{Transport, managed_rooms};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type RuleKey = (String, PolicyKind, String);

fn key_of(rule: &PolicyRule) -> RuleKey {
    (rule.policy_room.clone(), rule.kind, rule.rule_id.clone())
}

/// What happened to an ingested event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The rule is active (inserted or updated).
    Active(PolicyRule),
    /// The rule was revoked.
    Revoked(PolicyRule),
    /// This event was ingested before.
    Duplicate,
    /// A newer event for the same rule is already stored.
    Stale,
    /// The event comes from a room that is not a subscribed banlist.
    NotSubscribed,
    /// The event is not a policy rule.
    NotPolicy,
}

/// In-memory view of every active ban rule.
pub struct BanlistCache {
    config: Arc<Config>,
    db: Database,
    transport: Arc<dyn Transport>,
    queue: ActionQueue,
    rules: DashMap<RuleKey, CompiledRule>,
}

impl BanlistCache {
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
            rules: DashMap::new(),
        }
    }

    /// Load active rules from the store. Returns how many were cached.
    pub async fn load(&self) -> EngineResult<usize> {
        for rule in self.db.policies().all().await? {
            self.cache(rule);
        }
        info!(rules = self.rules.len(), "Banlist rules loaded");
        Ok(self.rules.len())
    }

    /// Number of cached ban rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_policy_room(&self, room: &str) -> bool {
        self.config.banlists.rooms.iter().any(|r| r == room)
    }

    fn cache(&self, rule: PolicyRule) {
        let key = key_of(&rule);
        if rule.state != RuleState::Active || !is_ban(&rule) {
            self.rules.remove(&key);
            return;
        }
        match CompiledRule::compile(rule) {
            Ok(compiled) => {
                self.rules.insert(key, compiled);
            }
            Err(e) => {
                warn!(policy_room = %key.0, rule = %key.2, error = %e, "Unusable policy entity glob");
                self.rules.remove(&key);
            }
        }
    }

    /// Ingest a policy-room event. Re-ingesting an event is a no-op.
    pub async fn ingest(&self, event: &PolicyEvent) -> EngineResult<IngestOutcome> {
        if !self.is_policy_room(&event.room_id) {
            return Ok(IngestOutcome::NotSubscribed);
        }
        let Some(rule) = parse(event) else {
            return Ok(IngestOutcome::NotPolicy);
        };

        // A redaction arrives with the id of the event it removes.
        let marker = if event.redacted {
            format!("{}#redacted", event.event_id)
        } else {
            event.event_id.clone()
        };

        let policies = self.db.policies();
        if policies.is_ingested(&marker).await? {
            debug!(event_id = %event.event_id, "Policy event already ingested");
            return Ok(IngestOutcome::Duplicate);
        }

        if let Some(existing) = policies.get(&rule.policy_room, rule.kind, &rule.rule_id).await? {
            let superseded = existing.origin_ts > rule.origin_ts
                || (event.redacted && existing.event_id != event.event_id);
            if superseded {
                debug!(event_id = %event.event_id, current = %existing.event_id, "Stale policy event");
                policies.mark_ingested(&marker, now_ms()).await?;
                return Ok(IngestOutcome::Stale);
            }
        }

        policies.upsert(&rule).await?;
        policies.mark_ingested(&marker, now_ms()).await?;
        self.cache(rule.clone());

        info!(
            policy_room = %rule.policy_room,
            kind = %rule.kind,
            entity = %rule.entity,
            state = rule.state.as_str(),
            "Policy rule ingested"
        );

        Ok(match rule.state {
            RuleState::Active => IngestOutcome::Active(rule),
            RuleState::Revoked => IngestOutcome::Revoked(rule),
        })
    }

    /// Active ban rules triggered by `user` being in `room`.
    pub fn matches(&self, user: &str, room: &str) -> Vec<PolicyRule> {
        let mut hits: Vec<PolicyRule> = self
            .rules
            .iter()
            .filter(|entry| entry.value().matches(user, room))
            .map(|entry| entry.value().rule.clone())
            .collect();
        hits.sort_by(|a, b| (&a.policy_room, &a.rule_id).cmp(&(&b.policy_room, &b.rule_id)));
        hits
    }

    fn is_protected(&self, user: &str) -> bool {
        user == self.config.bot.user_id || self.config.is_admin(user)
    }

    /// Check a join against the cache and queue a ban on a match.
    ///
    /// Returns the user/server rules that triggered.
    pub async fn check_join(&self, user: &str, room: &str) -> EngineResult<Vec<PolicyRule>> {
        let hits: Vec<PolicyRule> = self
            .matches(user, room)
            .into_iter()
            .filter(|r| matches!(r.kind, PolicyKind::User | PolicyKind::Server))
            .collect();
        let Some(first) = hits.first() else {
            return Ok(hits);
        };
        if self.is_protected(user) {
            warn!(user = %user, room = %room, "Policy rule matches a protected user; not banning");
            return Ok(hits);
        }

        let reason = ban_reason(first);
        info!(user = %user, room = %room, rule = %first.rule_id, "Banning user on join (policy match)");
        self.queue
            .enqueue(Action::Ban {
                room: room.to_string(),
                user: user.to_string(),
                reason,
            })
            .await?;
        self.db.users().set_banned(user, true, now_ms()).await?;
        Ok(hits)
    }

    /// Ban every current member of every managed room matched by `rule`.
    ///
    /// Cancellation is checked before each room; bans already issued stay.
    pub async fn sweep(&self, rule: &PolicyRule, cancel: &CancellationToken) -> EngineResult<BatchReport> {
        let compiled = CompiledRule::compile(rule.clone())
            .map_err(|e| EngineError::Configuration(format!("policy entity '{}': {e}", rule.entity)))?;

        let mut report = BatchReport::default();
        if !compiled.bans_users() {
            return Ok(report);
        }

        let space = &self.config.bot.parent_space;
        let rooms = managed_rooms(self.transport.as_ref(), space)
            .await
            .map_err(|e| EngineError::from_transport(space, e))?;
        let reason = ban_reason(rule);

        for room in &rooms {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let members = match self.transport.joined_members(room).await {
                Ok(members) => members,
                Err(e) => {
                    let err = EngineError::from_transport(room, e);
                    warn!(room = %room, error = %err, "Cannot list members for banlist sweep");
                    report.push(ItemResult::from_error(room, &err));
                    continue;
                }
            };

            for member in members {
                if !compiled.matches(&member, room) || self.is_protected(&member) {
                    continue;
                }
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                let target = format!("{member} in {room}");
                let result = self
                    .queue
                    .submit(Action::Ban {
                        room: room.clone(),
                        user: member.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                match result {
                    Ok(_) => {
                        info!(user = %member, room = %room, rule = %rule.rule_id, "Proactive ban applied");
                        let status = match self.db.users().set_banned(&member, true, now_ms()).await {
                            Ok(()) => ItemStatus::Applied,
                            Err(e) => {
                                warn!(user = %member, error = %e, "Ban flag not recorded");
                                ItemStatus::Failed(format!("banned but not recorded: {e}"))
                            }
                        };
                        report.push(ItemResult::new(target, status));
                    }
                    Err(e) => {
                        warn!(user = %member, room = %room, error = %e, "Proactive ban failed");
                        report.push(ItemResult::from_error(target, &e));
                    }
                }
            }
        }

        if report.cancelled {
            info!(rule = %rule.rule_id, done = report.items.len(), "Banlist sweep cancelled");
        }
        Ok(report)
    }

    /// Ingest an event and, with proactive banning on, sweep a newly active
    /// ban rule across the community.
    pub async fn apply_event(
        &self,
        event: &PolicyEvent,
        cancel: &CancellationToken,
    ) -> EngineResult<(IngestOutcome, Option<BatchReport>)> {
        let outcome = self.ingest(event).await?;
        let sweep = match &outcome {
            IngestOutcome::Active(rule) if self.config.banlists.proactive_banning && is_ban(rule) => {
                Some(self.sweep(rule, cancel).await?)
            }
            _ => None,
        };
        Ok((outcome, sweep))
    }
}

fn ban_reason(rule: &PolicyRule) -> String {
    match &rule.reason {
        Some(reason) if !reason.is_empty() => format!("banlist: {reason}"),
        _ => "banlist".to_string(),
    }
}
