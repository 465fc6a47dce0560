//! Space-to-room power-level reconciliation.
//!
//! The parent space's power-level state is the source of truth. For each
//! managed room the reconciler computes the minimal set of user level
//! changes that makes the room agree with the space, then applies it through
//! the action queue. A room where the bot cannot change power levels ends up
//! in the manual-action list instead of failing the batch.

use super::PowerLevels;
use crate::config::Config;
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::outcome::{BatchReport, ItemResult, ItemStatus};
use crate::queue::{Action, ActionQueue};
use crate::transport::Transport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One user level change in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerChange {
    pub user: String,
    /// Effective level before the change.
    pub from: i64,
    /// New explicit level, `None` to fall back to the room default.
    pub to: Option<i64>,
}

/// Compute the changes that make `room` match `space`.
///
/// Users listed in the space keep their space level. Users with a positive
/// room-local level who are not listed in the space fall back to the room
/// default. The bot and `reserved` users are never lowered.
pub fn compute_diff(
    space: &PowerLevels,
    room: &PowerLevels,
    bot: &str,
    reserved: &[String],
) -> Vec<PowerChange> {
    let is_reserved = |user: &str| user == bot || reserved.iter().any(|r| r == user);
    let mut diff = Vec::new();

    for (user, &target) in &space.users {
        if user == bot {
            continue;
        }
        let current = room.user_level(user);
        if current == target || (target < current && is_reserved(user.as_str())) {
            continue;
        }
        diff.push(PowerChange {
            user: user.clone(),
            from: current,
            to: Some(target),
        });
    }

    for (user, &level) in &room.users {
        if level <= 0 || space.users.contains_key(user) || is_reserved(user.as_str()) {
            continue;
        }
        diff.push(PowerChange {
            user: user.clone(),
            from: level,
            to: None,
        });
    }

    diff
}

/// Applies space power levels to managed rooms.
pub struct Reconciler {
    config: Arc<Config>,
    db: Database,
    transport: Arc<dyn Transport>,
    queue: ActionQueue,
}

impl Reconciler {
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

    async fn levels(&self, room: &str) -> EngineResult<PowerLevels> {
        self.transport
            .power_levels(room)
            .await
            .map_err(|e| EngineError::from_transport(room, e))
    }

    /// Diff between the space's levels and `room`'s levels.
    pub async fn reconcile(&self, room: &str) -> EngineResult<Vec<PowerChange>> {
        let space = self.levels(&self.config.bot.parent_space).await?;
        let current = self.levels(room).await?;
        Ok(compute_diff(
            &space,
            &current,
            &self.config.bot.user_id,
            &self.config.bot.admins,
        ))
    }

    /// Apply a diff to `room`.
    pub async fn apply(&self, room: &str, diff: &[PowerChange]) -> EngineResult<ItemStatus> {
        if diff.is_empty() {
            debug!(room = %room, "Power levels already match the space");
            return Ok(ItemStatus::Unchanged);
        }

        let current = self.levels(room).await?;
        if !current.can_change_power_levels(&self.config.bot.user_id) {
            warn!(room = %room, "Bot cannot change power levels here");
            return Ok(ItemStatus::Manual(format!(
                "bot lacks power to change power levels in {room}"
            )));
        }

        let changes = diff.iter().map(|c| (c.user.clone(), c.to)).collect();
        match self
            .queue
            .submit(Action::SetUserLevels {
                room: room.to_string(),
                changes,
            })
            .await
        {
            Ok(_) => {
                info!(room = %room, changes = diff.len(), "Power levels reconciled");
                Ok(ItemStatus::Applied)
            }
            Err(EngineError::Permission { reason, .. }) => {
                warn!(room = %room, reason = %reason, "Power level change refused");
                Ok(ItemStatus::Manual(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile and apply one room, folding errors into the item result.
    pub async fn reconcile_room(&self, room: &str) -> ItemResult {
        let result = match self.reconcile(room).await {
            Ok(diff) => self.apply(room, &diff).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(status) => ItemResult::new(room, status),
            Err(e) => {
                warn!(room = %room, error = %e, code = e.error_code(), "Reconciliation failed");
                ItemResult::from_error(room, &e)
            }
        }
    }

    /// Reconcile `targets`, or every space child when `targets` is `None`.
    ///
    /// Verification rooms are skipped unless explicitly targeted.
    /// Cancellation is checked before each room.
    pub async fn setpower(
        &self,
        targets: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> EngineResult<BatchReport> {
        let explicit = targets.is_some();
        let rooms = match targets {
            Some(rooms) => rooms.to_vec(),
            None => {
                let space = &self.config.bot.parent_space;
                self.transport
                    .space_children(space)
                    .await
                    .map_err(|e| EngineError::from_transport(space, e))?
            }
        };

        let mut report = BatchReport::default();
        for room in &rooms {
            if cancel.is_cancelled() {
                info!(done = report.items.len(), total = rooms.len(), "setpower cancelled");
                report.cancelled = true;
                break;
            }

            if !explicit && self.config.power.skip_verification_rooms {
                let verification = self
                    .db
                    .rooms()
                    .get(room)
                    .await?
                    .is_some_and(|r| r.verification_enabled);
                if verification {
                    report.push(ItemResult::new(
                        room,
                        ItemStatus::Skipped("verification enabled".into()),
                    ));
                    continue;
                }
            }

            report.push(self.reconcile_room(room).await);
        }

        Ok(report)
    }
}
