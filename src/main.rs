//! spacekeeper - replay driver.
//!
//! `spacekeeper <config.toml> [snapshot.json] [events.jsonl]`
//!
//! Loads a world snapshot into the in-memory transport, replays a JSON-lines
//! event log through the dispatcher and logs every action taken.

use anyhow::Context;
use spacekeeper::community::Community;
use spacekeeper::config::{Config, validate};
use spacekeeper::db::Database;
use spacekeeper::dispatch::{Dispatcher, Event};
use spacekeeper::power::PowerLevels;
use spacekeeper::transport::{MemoryTransport, Snapshot};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn load_snapshot(config: &Config, path: Option<&str>) -> anyhow::Result<MemoryTransport> {
    let bot = config.bot.user_id.clone();
    let Some(path) = path else {
        warn!("No snapshot given; starting from an empty space");
        let transport = MemoryTransport::new(bot.clone());
        let mut levels = PowerLevels::default();
        levels.users.insert(bot, 100);
        transport.add_room(&config.bot.parent_space, None, levels);
        return Ok(transport);
    };

    let content = std::fs::read_to_string(path).with_context(|| format!("reading snapshot {path}"))?;
    let snapshot: Snapshot = serde_json::from_str(&content).with_context(|| format!("parsing snapshot {path}"))?;
    info!(path = %path, rooms = snapshot.rooms.len(), "Loaded world snapshot");
    Ok(MemoryTransport::from_snapshot(bot, &snapshot))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config.toml".to_string());
    let snapshot_path = args.next();
    let events_path = args.next();

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;
    if let Err(problems) = validate(&config) {
        for problem in &problems {
            error!(error = %problem, "Invalid configuration");
        }
        anyhow::bail!("{} configuration problem(s) in {config_path}", problems.len());
    }

    info!(
        bot = %config.bot.user_id,
        space = %config.bot.parent_space,
        "Starting spacekeeper"
    );

    let db_path = config
        .database
        .as_ref()
        .map(|d| d.path.as_str())
        .unwrap_or("spacekeeper.db");
    let db = Database::new(db_path).await?;

    let transport = Arc::new(load_snapshot(&config, snapshot_path.as_deref())?);
    let community = Community::new(Arc::new(config), db, transport.clone());
    community.start().await?;
    let dispatcher = Dispatcher::new(community.clone());

    if let Some(path) = events_path {
        let content = std::fs::read_to_string(&path).with_context(|| format!("reading events {path}"))?;
        let mut dispatched = 0usize;
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => {
                    dispatcher.dispatch(event).await?;
                    dispatched += 1;
                }
                Err(e) => warn!(line = number + 1, error = %e, "Skipping malformed event"),
            }
        }
        info!(events = dispatched, "Event log dispatched");
    }

    for reply in dispatcher.flush().await? {
        info!(outcome = %reply.outcome, "{}", reply.text);
    }

    for call in transport.calls() {
        info!(op = call.op, room = ?call.room, target = ?call.target, "Action");
    }

    community.shutdown();
    info!("spacekeeper finished");
    Ok(())
}
