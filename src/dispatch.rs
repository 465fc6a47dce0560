//! Event dispatcher.
//!
//! Every room gets its own lane: a task draining an mpsc channel, so events
//! of one room are handled strictly in arrival order while independent rooms
//! proceed concurrently. Administrative commands run on their own tasks and
//! serialize their side effects through the shared action queue.

use crate::commands::{self, Command, CommandReply};
use crate::community::Community;
use crate::db::now_ms;
use crate::error::{EngineError, EngineResult};
use crate::outcome::Outcome;
use crate::policy::{IngestOutcome, PolicyEvent};
use crate::power::PowerLevels;
use crate::queue::Action;
use crate::tracker::ActivityKind;
use crate::transport::Membership;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Capacity of each room lane.
const LANE_CAPACITY: usize = 256;

/// Finished command replies kept for the next [`Dispatcher::flush`].
const FINISHED_REPLIES: usize = 64;

/// An inbound protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Message {
        room: String,
        sender: String,
        event_id: String,
        body: String,
        #[serde(default)]
        ts: Option<i64>,
    },
    Reaction {
        room: String,
        sender: String,
        #[serde(default)]
        ts: Option<i64>,
    },
    Member {
        room: String,
        user: String,
        membership: Membership,
    },
    PowerLevels {
        room: String,
        content: PowerLevels,
    },
    Policy(PolicyEvent),
    Command {
        room: String,
        sender: String,
        command: Command,
    },
}

impl Event {
    /// Room whose lane handles this event.
    pub fn room(&self) -> &str {
        match self {
            Event::Message { room, .. }
            | Event::Reaction { room, .. }
            | Event::Member { room, .. }
            | Event::PowerLevels { room, .. }
            | Event::Command { room, .. } => room,
            Event::Policy(event) => &event.room_id,
        }
    }
}

enum LaneJob {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

/// Running command tasks and the most recent finished replies.
#[derive(Default)]
struct CommandTasks {
    running: JoinSet<CommandReply>,
    finished: VecDeque<CommandReply>,
}

impl CommandTasks {
    fn keep(&mut self, reply: CommandReply) {
        if self.finished.len() == FINISHED_REPLIES {
            self.finished.pop_front();
        }
        self.finished.push_back(reply);
    }

    /// Collect every task that has already finished.
    fn reap(&mut self) {
        while let Some(joined) = self.running.try_join_next() {
            match joined {
                Ok(reply) => self.keep(reply),
                Err(e) => warn!(error = %e, "Command task aborted"),
            }
        }
    }
}

/// Routes events to per-room lanes.
pub struct Dispatcher {
    community: Arc<Community>,
    lanes: DashMap<String, mpsc::Sender<LaneJob>>,
    commands: Mutex<CommandTasks>,
}

impl Dispatcher {
    pub fn new(community: Arc<Community>) -> Arc<Self> {
        Arc::new(Self {
            community,
            lanes: DashMap::new(),
            commands: Mutex::new(CommandTasks::default()),
        })
    }

    fn lane(self: &Arc<Self>, room: &str) -> mpsc::Sender<LaneJob> {
        self.lanes
            .entry(room.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(LANE_CAPACITY);
                let dispatcher = Arc::clone(self);
                let room = room.to_string();
                tokio::spawn(async move {
                    dispatcher.run_lane(room, rx).await;
                });
                tx
            })
            .clone()
    }

    async fn run_lane(self: Arc<Self>, room: String, mut rx: mpsc::Receiver<LaneJob>) {
        debug!(room = %room, "Room lane started");
        while let Some(job) = rx.recv().await {
            match job {
                LaneJob::Event(event) => {
                    if let Err(e) = self.handle(event).await {
                        warn!(room = %room, error = %e, code = e.error_code(), "Event handling failed");
                    }
                }
                LaneJob::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Queue `event` on its room's lane.
    pub async fn dispatch(self: &Arc<Self>, event: Event) -> EngineResult<()> {
        let lane = self.lane(event.room());
        lane.send(LaneJob::Event(event))
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Wait until every event dispatched so far, the commands it started and
    /// the actions they queued are done. Returns the command replies gathered
    /// since the last flush in completion order; beyond `FINISHED_REPLIES`
    /// the oldest are dropped.
    pub async fn flush(self: &Arc<Self>) -> EngineResult<Vec<CommandReply>> {
        let lanes: Vec<_> = self.lanes.iter().map(|l| l.value().clone()).collect();
        for lane in lanes {
            let (done, rx) = oneshot::channel();
            if lane.send(LaneJob::Flush(done)).await.is_ok() {
                let _ = rx.await;
            }
        }

        let (mut running, finished) = {
            let mut tasks = self.commands.lock();
            (
                std::mem::take(&mut tasks.running),
                std::mem::take(&mut tasks.finished),
            )
        };
        let mut replies: Vec<CommandReply> = finished.into();
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(reply) => replies.push(reply),
                Err(e) => warn!(error = %e, "Command task aborted"),
            }
        }

        self.community.queue.flush().await?;
        Ok(replies)
    }

    /// Handle one event inline.
    pub async fn handle(self: &Arc<Self>, event: Event) -> EngineResult<()> {
        let community = &self.community;
        match event {
            Event::Message {
                room,
                sender,
                event_id,
                body,
                ts,
            } => {
                if sender == community.config.bot.user_id {
                    return Ok(());
                }
                let now = ts.unwrap_or_else(now_ms);
                let answered = community
                    .verification
                    .on_direct_message(&sender, &room, &body, now)
                    .await?;
                if !answered.is_empty() {
                    return Ok(());
                }
                community
                    .tracker
                    .record_activity(&sender, &room, now, ActivityKind::Message)
                    .await?;
                community.censor_message(&room, &sender, &event_id, &body).await?;
            }
            Event::Reaction { room, sender, ts } => {
                community
                    .tracker
                    .record_activity(&sender, &room, ts.unwrap_or_else(now_ms), ActivityKind::Reaction)
                    .await?;
            }
            Event::Member {
                room,
                user,
                membership,
            } => self.on_membership(&room, &user, membership).await?,
            Event::PowerLevels { room, content } => {
                community
                    .verification
                    .on_power_levels(&room, &content, now_ms())
                    .await?;
                if room == community.config.bot.parent_space && community.config.power.reconcile_on_space_change {
                    info!("Space power levels changed; reconciling all rooms");
                    self.spawn_command(
                        room,
                        community.config.bot.user_id.clone(),
                        Command::Setpower { rooms: vec![] },
                    );
                }
            }
            Event::Policy(event) => {
                let cancel = community.batch_token();
                let (outcome, sweep) = community.banlist.apply_event(&event, &cancel).await?;
                match &outcome {
                    IngestOutcome::Active(rule) => {
                        info!(policy_room = %rule.policy_room, rule = %rule.rule_id, entity = %rule.entity, "Policy rule active")
                    }
                    IngestOutcome::Revoked(rule) => {
                        info!(policy_room = %rule.policy_room, rule = %rule.rule_id, "Policy rule revoked")
                    }
                    other => debug!(outcome = ?other, "Policy event ignored"),
                }
                if let Some(report) = sweep
                    && !report.items.is_empty()
                {
                    community
                        .notify(&commands::summarize("Banlist sweep", &report))
                        .await;
                }
            }
            Event::Command {
                room,
                sender,
                command,
            } => self.spawn_command(room, sender, command),
        }
        Ok(())
    }

    async fn on_membership(&self, room: &str, user: &str, membership: Membership) -> EngineResult<()> {
        let community = &self.community;
        let now = now_ms();
        let in_space = room == community.config.bot.parent_space;

        match membership {
            Membership::Join => {
                let hits = community.banlist.check_join(user, room).await?;
                if !hits.is_empty()
                    && community
                        .db
                        .users()
                        .get(user)
                        .await?
                        .is_some_and(|u| u.banned)
                {
                    return Ok(());
                }
                if in_space {
                    community.sync(now).await?;
                }
                community.verification.on_join(user, room, now).await?;
                community.greet(user, room).await?;
            }
            Membership::Leave | Membership::Ban => {
                community.verification.on_leave(user, room, now).await?;
                if in_space {
                    community.sync(now).await?;
                }
            }
            Membership::Invite => {}
        }
        Ok(())
    }

    /// Run a command on its own task and post the reply to `room`.
    fn spawn_command(&self, room: String, sender: String, command: Command) {
        let community = Arc::clone(&self.community);
        let task = async move {
            let reply = commands::execute(&community, &sender, &room, command).await;
            if reply.outcome != Outcome::Applied {
                info!(room = %room, outcome = %reply.outcome, "Command finished");
            }
            if sender != community.config.bot.user_id {
                let action = Action::SendMessage {
                    room: room.clone(),
                    body: reply.text.clone(),
                };
                if let Err(e) = community.queue.enqueue(action).await {
                    warn!(room = %room, error = %e, "Command reply dropped");
                }
            }
            reply
        };
        let mut tasks = self.commands.lock();
        tasks.reap();
        tasks.running.spawn(task);
    }
}
