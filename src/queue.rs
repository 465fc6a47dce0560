//! Rate-limited outbound action queue.
//!
//! Every state-mutating protocol call goes through a single [`ActionQueue`].
//! One worker task drains the queue in FIFO order and runs at most one call
//! at a time; a governor limiter spaces consecutive calls by the configured
//! `sleep_ms` interval so fan-out operations become a steady stream.

use crate::config::QueueConfig;
use crate::error::{EngineError, EngineResult, TransportError};
use crate::power::PowerLevels;
use crate::transport::{CreateRoomRequest, Transport, TransportResult};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A mutating protocol call.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendMessage {
        room: String,
        body: String,
    },
    SendState {
        room: String,
        event_type: String,
        state_key: String,
        content: Value,
    },
    /// Read-modify-write of individual user levels. The current power levels
    /// are read when the action runs, not when it is queued.
    SetUserLevels {
        room: String,
        changes: Vec<(String, Option<i64>)>,
    },
    Kick {
        room: String,
        user: String,
        reason: String,
    },
    Ban {
        room: String,
        user: String,
        reason: String,
    },
    Unban {
        room: String,
        user: String,
        reason: String,
    },
    Invite {
        room: String,
        user: String,
    },
    Redact {
        room: String,
        event_id: String,
        reason: String,
    },
    CreateRoom(CreateRoomRequest),
    SetAlias {
        alias: String,
        room: String,
    },
    RemoveAlias {
        alias: String,
    },
}

impl Action {
    /// Static label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SendMessage { .. } => "send_message",
            Action::SendState { .. } => "send_state",
            Action::SetUserLevels { .. } => "set_user_levels",
            Action::Kick { .. } => "kick",
            Action::Ban { .. } => "ban",
            Action::Unban { .. } => "unban",
            Action::Invite { .. } => "invite",
            Action::Redact { .. } => "redact",
            Action::CreateRoom(_) => "create_room",
            Action::SetAlias { .. } => "set_alias",
            Action::RemoveAlias { .. } => "remove_alias",
        }
    }

    /// Room the action targets, if any.
    pub fn room(&self) -> Option<&str> {
        match self {
            Action::SendMessage { room, .. }
            | Action::SendState { room, .. }
            | Action::SetUserLevels { room, .. }
            | Action::Kick { room, .. }
            | Action::Ban { room, .. }
            | Action::Unban { room, .. }
            | Action::Invite { room, .. }
            | Action::Redact { room, .. }
            | Action::SetAlias { room, .. } => Some(room),
            Action::CreateRoom(_) | Action::RemoveAlias { .. } => None,
        }
    }
}

/// What a completed action produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutput {
    Done,
    RoomCreated(String),
    EventSent(String),
}

enum Job {
    Run {
        action: Action,
        reply: Option<oneshot::Sender<TransportResult<ActionOutput>>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the outbound action queue. Cheap to clone.
#[derive(Clone)]
pub struct ActionQueue {
    tx: mpsc::Sender<Job>,
}

impl ActionQueue {
    /// Spawn the queue worker.
    pub fn spawn(transport: Arc<dyn Transport>, config: &QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));

        let limiter = Quota::with_period(Duration::from_millis(config.sleep_ms))
            .map(RateLimiter::direct);

        tokio::spawn(async move {
            run(transport, rx, limiter).await;
        });

        Self { tx }
    }

    /// Queue an action and wait for its result.
    pub async fn submit(&self, action: Action) -> EngineResult<ActionOutput> {
        let room = action.room().map(str::to_string);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Run {
                action,
                reply: Some(reply),
            })
            .await
            .map_err(|_| EngineError::QueueClosed)?;

        match rx.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(match room {
                Some(room) => EngineError::from_transport(&room, e),
                None => e.into(),
            }),
            Err(_) => Err(EngineError::QueueClosed),
        }
    }

    /// Queue an action without waiting. Failures are logged by the worker.
    pub async fn enqueue(&self, action: Action) -> EngineResult<()> {
        self.tx
            .send(Job::Run { action, reply: None })
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Wait until every action queued before this call has run.
    pub async fn flush(&self) -> EngineResult<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Job::Flush(done))
            .await
            .map_err(|_| EngineError::QueueClosed)?;
        rx.await.map_err(|_| EngineError::QueueClosed)
    }
}

async fn run(
    transport: Arc<dyn Transport>,
    mut rx: mpsc::Receiver<Job>,
    limiter: Option<DefaultDirectRateLimiter>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Flush(done) => {
                let _ = done.send(());
            }
            Job::Run { action, reply } => {
                if let Some(limiter) = &limiter {
                    limiter.until_ready().await;
                }

                debug!(action = action.kind(), room = ?action.room(), "Running queued action");
                let result = execute(transport.as_ref(), &action).await;

                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(
                                action = action.kind(),
                                room = ?action.room(),
                                error = %e,
                                code = e.error_code(),
                                "Queued action failed"
                            );
                        }
                    }
                }
            }
        }
    }
    debug!("Action queue closed");
}

async fn execute(transport: &dyn Transport, action: &Action) -> TransportResult<ActionOutput> {
    match action {
        Action::SendMessage { room, body } => transport
            .send_message(room, body)
            .await
            .map(ActionOutput::EventSent),
        Action::SendState {
            room,
            event_type,
            state_key,
            content,
        } => transport
            .send_state(room, event_type, state_key, content.clone())
            .await
            .map(ActionOutput::EventSent),
        Action::SetUserLevels { room, changes } => {
            let current = transport.power_levels(room).await?;
            let mut wanted: PowerLevels = current.clone();
            wanted.apply(changes);
            if wanted == current {
                return Ok(ActionOutput::Done);
            }
            transport.set_power_levels(room, &wanted).await?;
            Ok(ActionOutput::Done)
        }
        Action::Kick { room, user, reason } => {
            transport.kick(room, user, reason).await?;
            Ok(ActionOutput::Done)
        }
        Action::Ban { room, user, reason } => {
            transport.ban(room, user, reason).await?;
            Ok(ActionOutput::Done)
        }
        Action::Unban { room, user, reason } => {
            transport.unban(room, user, reason).await?;
            Ok(ActionOutput::Done)
        }
        Action::Invite { room, user } => {
            transport.invite(room, user).await?;
            Ok(ActionOutput::Done)
        }
        Action::Redact {
            room,
            event_id,
            reason,
        } => {
            transport.redact(room, event_id, reason).await?;
            Ok(ActionOutput::Done)
        }
        Action::CreateRoom(request) => transport
            .create_room(request)
            .await
            .map(ActionOutput::RoomCreated),
        Action::SetAlias { alias, room } => {
            transport.set_alias(alias, room).await?;
            Ok(ActionOutput::Done)
        }
        Action::RemoveAlias { alias } => {
            transport.remove_alias(alias).await?;
            Ok(ActionOutput::Done)
        }
    }
}

/// Convenience: the room id produced by a `CreateRoom` action.
pub fn created_room(output: ActionOutput) -> Result<String, TransportError> {
    match output {
        ActionOutput::RoomCreated(room) => Ok(room),
        other => Err(TransportError::Network(format!(
            "create_room returned {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Membership, MemoryTransport};
    use std::time::Instant;

    const BOT: &str = "@keeper:example.org";
    const ROOM: &str = "!a:example.org";

    fn world() -> Arc<MemoryTransport> {
        let transport = MemoryTransport::new(BOT).with_latency(Duration::from_millis(5));
        let mut pl = PowerLevels::default();
        pl.users.insert(BOT.into(), 100);
        transport.add_room(ROOM, None, pl);
        Arc::new(transport)
    }

    #[tokio::test]
    async fn runs_in_fifo_order_one_at_a_time() {
        let transport = world();
        let queue = ActionQueue::spawn(transport.clone(), &QueueConfig { sleep_ms: 0, capacity: 16 });

        for n in 0..5 {
            queue
                .enqueue(Action::SendMessage {
                    room: ROOM.into(),
                    body: format!("m{n}"),
                })
                .await
                .unwrap();
        }
        queue.flush().await.unwrap();

        assert_eq!(
            transport.sent_messages(ROOM),
            vec!["m0", "m1", "m2", "m3", "m4"]
        );
        assert_eq!(transport.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn sleep_interval_spaces_calls() {
        let transport = world();
        let queue = ActionQueue::spawn(transport.clone(), &QueueConfig { sleep_ms: 40, capacity: 16 });

        let start = Instant::now();
        for _ in 0..3 {
            queue
                .submit(Action::SendMessage {
                    room: ROOM.into(),
                    body: "x".into(),
                })
                .await
                .unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn submit_maps_permission_failures() {
        let transport = world();
        transport.set_membership(ROOM, "@admin:example.org", Membership::Join);
        let mut pl = PowerLevels::default();
        pl.users.insert(BOT.into(), 0);
        pl.users.insert("@admin:example.org".into(), 100);
        transport.put_power_levels(ROOM, pl);

        let queue = ActionQueue::spawn(transport.clone(), &QueueConfig { sleep_ms: 0, capacity: 4 });
        let err = queue
            .submit(Action::Kick {
                room: ROOM.into(),
                user: "@admin:example.org".into(),
                reason: "test".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Permission { .. }));
    }

    #[tokio::test]
    async fn set_user_levels_reads_current_state() {
        let transport = world();
        let queue = ActionQueue::spawn(transport.clone(), &QueueConfig { sleep_ms: 0, capacity: 4 });

        queue
            .submit(Action::SetUserLevels {
                room: ROOM.into(),
                changes: vec![("@u:example.org".into(), Some(10))],
            })
            .await
            .unwrap();
        queue
            .submit(Action::SetUserLevels {
                room: ROOM.into(),
                changes: vec![("@u:example.org".into(), Some(10))],
            })
            .await
            .unwrap();

        let pl = transport.power_levels(ROOM).await.unwrap();
        assert_eq!(pl.user_level("@u:example.org"), 10);
        assert_eq!(pl.user_level(BOT), 100);
        // second submission was a no-op
        assert_eq!(transport.calls_of("set_power_levels").len(), 1);
    }
}
