//! Shared harness for integration tests: a small space with a snapshot
//! transport, an in-memory store and a running dispatcher.

#![allow(dead_code)]

use spacekeeper::community::Community;
use spacekeeper::config::Config;
use spacekeeper::db::Database;
use spacekeeper::dispatch::{Dispatcher, Event};
use spacekeeper::power::PowerLevels;
use spacekeeper::transport::{Membership, MemoryTransport, Snapshot, SnapshotRoom};
use std::sync::Arc;

pub const BOT: &str = "@keeper:example.org";
pub const ADMIN: &str = "@admin:example.org";
pub const SPACE: &str = "!space:example.org";
pub const GENERAL: &str = "!general:example.org";
pub const RANDOM: &str = "!random:example.org";
pub const NEWS: &str = "!news:example.org";
pub const POLICY: &str = "!policy:example.org";

pub fn config(extra: &str) -> Config {
    let base = format!(
        r#"
[bot]
user_id = "{BOT}"
parent_space = "{SPACE}"
admins = ["{ADMIN}"]
notification_room = "{NEWS}"

[queue]
sleep_ms = 0
"#
    );
    toml::from_str(&format!("{base}\n{extra}")).expect("test config parses")
}

fn room(id: &str, name: &str, members: &[&str]) -> SnapshotRoom {
    let mut power_levels = PowerLevels::default();
    power_levels.users.insert(BOT.to_string(), 100);
    power_levels.users.insert(ADMIN.to_string(), 100);
    SnapshotRoom {
        room_id: id.to_string(),
        name: Some(name.to_string()),
        members: members.iter().map(|m| m.to_string()).collect(),
        power_levels,
        aliases: Vec::new(),
        children: Vec::new(),
    }
}

pub fn snapshot(members: &[&str]) -> Snapshot {
    let mut space = room(SPACE, "Space", members);
    space.children = vec![GENERAL.to_string(), RANDOM.to_string(), NEWS.to_string()];
    let mut general = room(GENERAL, "General", members);
    general.aliases = vec!["#general:example.org".to_string()];

    Snapshot {
        rooms: vec![
            space,
            general,
            room(RANDOM, "Random", members),
            room(NEWS, "News", &[]),
            room(POLICY, "Policies", &[]),
        ],
    }
}

pub struct TestCommunity {
    pub community: Arc<Community>,
    pub dispatcher: Arc<Dispatcher>,
    pub transport: Arc<MemoryTransport>,
}

impl TestCommunity {
    pub async fn start(config: Config, members: &[&str]) -> Self {
        let transport = Arc::new(MemoryTransport::from_snapshot(BOT, &snapshot(members)));
        let db = Database::new(":memory:").await.expect("memory database");
        let community = Community::new(Arc::new(config), db, transport.clone());
        community.start().await.expect("startup");
        let dispatcher = Dispatcher::new(community.clone());
        Self {
            community,
            dispatcher,
            transport,
        }
    }

    pub async fn send(&self, event: Event) {
        self.dispatcher.dispatch(event).await.expect("dispatch");
    }

    pub async fn settle(&self) -> Vec<spacekeeper::commands::CommandReply> {
        self.dispatcher.flush().await.expect("flush")
    }

    /// Put `user` in `room` and tell the dispatcher.
    pub async fn join(&self, room: &str, user: &str) {
        self.transport.set_membership(room, user, Membership::Join);
        self.send(Event::Member {
            room: room.to_string(),
            user: user.to_string(),
            membership: Membership::Join,
        })
        .await;
    }
}
