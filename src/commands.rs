//! Named administrative operations.
//!
//! Commands arrive already parsed. Each one returns a human-readable reply
//! plus a structured [`Outcome`] for the front end to render.

use crate::community::{Community, Sanction};
use crate::db::now_ms;
use crate::error::EngineResult;
use crate::lifecycle::RoomSpec;
use crate::outcome::{BatchReport, Outcome};
use crate::tracker::Classification;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{info, warn};

/// A parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Command {
    Sync,
    Report {
        #[serde(default)]
        rooms: Vec<String>,
    },
    Purge,
    Kick {
        user: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Ban {
        user: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Unban {
        user: String,
    },
    Guests {
        #[serde(default)]
        room: Option<String>,
    },
    Setpower {
        #[serde(default)]
        rooms: Vec<String>,
    },
    Createroom {
        name: String,
        #[serde(default)]
        encrypt: Option<bool>,
        #[serde(default)]
        topic: Option<String>,
    },
    Archive {
        room: String,
    },
    Replaceroom {
        room: String,
        name: String,
        #[serde(default)]
        encrypt: Option<bool>,
    },
    Roomid {
        #[serde(default)]
        alias: Option<String>,
    },
    Ignore {
        user: String,
    },
    Unignore {
        user: String,
    },
    VerifyMigrate {
        #[serde(default)]
        room: Option<String>,
    },
    Redact {
        user: String,
        #[serde(default)]
        room: Option<String>,
    },
}

/// Who may run a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Moderator,
    Admin,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Sync => "sync",
            Command::Report { .. } => "report",
            Command::Purge => "purge",
            Command::Kick { .. } => "kick",
            Command::Ban { .. } => "ban",
            Command::Unban { .. } => "unban",
            Command::Guests { .. } => "guests",
            Command::Setpower { .. } => "setpower",
            Command::Createroom { .. } => "createroom",
            Command::Archive { .. } => "archive",
            Command::Replaceroom { .. } => "replaceroom",
            Command::Roomid { .. } => "roomid",
            Command::Ignore { .. } => "ignore",
            Command::Unignore { .. } => "unignore",
            Command::VerifyMigrate { .. } => "verify-migrate",
            Command::Redact { .. } => "redact",
        }
    }

    pub fn required_role(&self) -> Role {
        match self {
            Command::Createroom { .. } | Command::Roomid { .. } | Command::Guests { .. } => Role::Moderator,
            _ => Role::Admin,
        }
    }
}

/// Reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    pub outcome: Outcome,
}

impl CommandReply {
    fn applied(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            outcome: Outcome::Applied,
        }
    }

    fn from_report(what: &str, report: &BatchReport) -> Self {
        Self {
            text: summarize(what, report),
            outcome: report.outcome(),
        }
    }
}

/// One-paragraph summary of a batch.
pub fn summarize(what: &str, report: &BatchReport) -> String {
    let applied = report.applied();
    let manual = report.manual_actions();
    let failed = report.failures();

    let mut text = format!("{what}: {} applied", applied.len());
    if !manual.is_empty() {
        let _ = write!(text, ", {} need manual action ({})", manual.len(), manual.join(", "));
    }
    if !failed.is_empty() {
        let _ = write!(text, ", {} failed ({})", failed.len(), failed.join(", "));
    }
    if report.cancelled {
        text.push_str(", cancelled before completion");
    }
    text
}

fn permitted(community: &Community, invoker: &str, role: Role) -> bool {
    match role {
        Role::Admin => community.config.is_admin(invoker),
        Role::Moderator => community.config.is_moderator(invoker),
    }
}

/// Run `command` on behalf of `invoker`, issued in `room`.
pub async fn execute(community: &Community, invoker: &str, room: &str, command: Command) -> CommandReply {
    let name = command.name();
    if !permitted(community, invoker, command.required_role()) {
        warn!(user = %invoker, command = name, "Command refused");
        return CommandReply {
            text: format!("{invoker} may not run {name}"),
            outcome: Outcome::Failed {
                reason: "not permitted".into(),
            },
        };
    }

    info!(user = %invoker, room = %room, command = name, "Running command");
    match run(community, invoker, room, command).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(command = name, error = %e, code = e.error_code(), "Command failed");
            CommandReply {
                text: format!("{name} failed: {e}"),
                outcome: Outcome::failed(&e),
            }
        }
    }
}

async fn run(community: &Community, invoker: &str, room: &str, command: Command) -> EngineResult<CommandReply> {
    let now = now_ms();
    let cancel = community.batch_token();

    let reply = match command {
        Command::Sync => {
            let result = community.sync(now).await?;
            CommandReply::applied(format!(
                "Sync: {} added, {} dropped",
                result.added.len(),
                result.dropped.len()
            ))
        }
        Command::Report { rooms } => {
            community.sync(now).await?;
            let entries = community.tracker.report(&rooms, now).await?;
            let mut text = String::from("Inactivity report:");
            let mut flagged = 0;
            for entry in entries.iter().filter(|e| e.classification != Classification::Active) {
                flagged += 1;
                let _ = write!(
                    text,
                    "\n{}: {} days ({})",
                    entry.user,
                    entry.days_inactive,
                    entry.classification.as_str()
                );
            }
            if flagged == 0 {
                text.push_str(" everyone is active");
            }
            CommandReply::applied(text)
        }
        Command::Purge => {
            let report = community.purge(now, &cancel).await?;
            CommandReply::from_report("Purge", &report)
        }
        Command::Kick { user, reason } => {
            let reason = reason.unwrap_or_else(|| "kicked by administrator".into());
            let report = community.sanction(&user, Sanction::Kick, &reason, &cancel).await?;
            CommandReply::from_report(&format!("Kick {user}"), &report)
        }
        Command::Ban { user, reason } => {
            let reason = reason.unwrap_or_else(|| "banned by administrator".into());
            let report = community.sanction(&user, Sanction::Ban, &reason, &cancel).await?;
            CommandReply::from_report(&format!("Ban {user}"), &report)
        }
        Command::Unban { user } => {
            let report = community
                .sanction(&user, Sanction::Unban, "unbanned by administrator", &cancel)
                .await?;
            CommandReply::from_report(&format!("Unban {user}"), &report)
        }
        Command::Guests { room: target } => {
            let target = target.unwrap_or_else(|| room.to_string());
            let guests = community.guests(&target).await?;
            if guests.is_empty() {
                CommandReply::applied(format!("No guests in {target}"))
            } else {
                CommandReply::applied(format!("Guests in {target}: {}", guests.join(", ")))
            }
        }
        Command::Setpower { rooms } => {
            let targets = (!rooms.is_empty()).then_some(rooms.as_slice());
            let report = community.reconciler.setpower(targets, &cancel).await?;
            CommandReply::from_report("Setpower", &report)
        }
        Command::Createroom { name, encrypt, topic } => {
            let spec = RoomSpec {
                name,
                topic,
                encrypt,
                alias_localpart: None,
            };
            let created = community.lifecycle.create(&spec).await?;
            let mut reply = CommandReply::from_report(&format!("Created {}", created.room_id), &created.report);
            if let Some(alias) = &created.alias {
                let _ = write!(reply.text, " (alias {alias})");
            }
            reply
        }
        Command::Archive { room: target } => {
            let report = community.lifecycle.archive(&target, None).await?;
            CommandReply::from_report(&format!("Archived {target}"), &report)
        }
        Command::Replaceroom {
            room: target,
            name,
            encrypt,
        } => {
            let spec = RoomSpec {
                name,
                encrypt,
                ..Default::default()
            };
            let replacement = community.lifecycle.replace(&target, &spec, invoker).await?;
            let mut reply = CommandReply::from_report(
                &format!("Replaced {} with {}", replacement.old_room, replacement.new_room),
                &replacement.report,
            );
            if replacement.step != crate::db::ReplacementStep::Done {
                let _ = write!(reply.text, ", stopped after step {}", replacement.step.as_str());
            }
            reply
        }
        Command::Roomid { alias } => {
            let id = community.room_id(alias.as_deref(), room).await?;
            CommandReply::applied(id)
        }
        Command::Ignore { user } => {
            community.set_ignored(&user, true).await?;
            CommandReply::applied(format!("Ignoring {user} in reports"))
        }
        Command::Unignore { user } => {
            community.set_ignored(&user, false).await?;
            CommandReply::applied(format!("No longer ignoring {user}"))
        }
        Command::VerifyMigrate { room: target } => {
            let target = target.unwrap_or_else(|| room.to_string());
            let migrated = community.verification.migrate(&target, now).await?;
            CommandReply::applied(format!(
                "Marked {} existing member(s) of {target} verified",
                migrated.len()
            ))
        }
        Command::Redact { user, room: target } => {
            let target = target.unwrap_or_else(|| room.to_string());
            let report = community.redact_user(&user, &target, &cancel).await?;
            CommandReply::from_report(&format!("Redact {user} in {target}"), &report)
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::tests::{BOT, DEV, LOBBY, SPACE, bot_levels, community_with};
    use crate::error::TransportError;
    use crate::transport::{Membership, Transport};

    const ADMIN: &str = "@admin:example.org";
    const MODERATOR: &str = "@mod:example.org";

    #[test]
    fn commands_deserialize_by_op() {
        let cmd: Command = serde_json::from_str(r#"{"op": "verify-migrate", "room": "!r:example.org"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::VerifyMigrate {
                room: Some("!r:example.org".into())
            }
        );
        let cmd: Command = serde_json::from_str(r#"{"op": "setpower"}"#).unwrap();
        assert_eq!(cmd, Command::Setpower { rooms: vec![] });

        let cmd: Command = serde_json::from_str(r#"{"op": "createroom", "name": "Book Club"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Createroom {
                name: "Book Club".into(),
                encrypt: None,
                topic: None,
            }
        );
    }

    #[tokio::test]
    async fn permissions_are_enforced() {
        let (community, _transport) = community_with(crate::config::test_config()).await;

        let reply = execute(&community, MODERATOR, LOBBY, Command::Purge).await;
        assert!(matches!(reply.outcome, Outcome::Failed { .. }));

        let reply = execute(&community, MODERATOR, LOBBY, Command::Roomid { alias: None }).await;
        assert_eq!(reply.text, LOBBY);
        assert_eq!(reply.outcome, Outcome::Applied);
    }

    #[tokio::test]
    async fn setpower_reports_manual_rooms() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        let mut space = bot_levels();
        space.users.insert(ADMIN.into(), 100);
        transport.put_power_levels(SPACE, space);
        // the bot cannot touch power levels in the dev room
        let mut dev = bot_levels();
        dev.users.insert(BOT.into(), 10);
        transport.put_power_levels(DEV, dev);

        let reply = execute(&community, ADMIN, LOBBY, Command::Setpower { rooms: vec![] }).await;
        assert_eq!(
            reply.outcome,
            Outcome::Partial {
                manual_actions: vec![DEV.to_string()],
                failures: vec![],
            }
        );
        assert!(reply.text.contains("1 need manual action"));
        assert_eq!(transport.power_levels(LOBBY).await.unwrap().user_level(ADMIN), 100);
    }

    #[tokio::test]
    async fn unknown_alias_is_a_failed_outcome() {
        let (community, _transport) = community_with(crate::config::test_config()).await;
        let reply = execute(
            &community,
            ADMIN,
            LOBBY,
            Command::Roomid {
                alias: Some("#missing:example.org".into()),
            },
        )
        .await;
        assert!(matches!(reply.outcome, Outcome::Failed { .. }));
        assert!(reply.text.starts_with("roomid failed"));
    }

    #[tokio::test]
    async fn report_lists_inactive_users() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        transport.set_membership(SPACE, "@idle:example.org", Membership::Join);
        community.db.users().ensure("@idle:example.org", 0).await.unwrap();

        let reply = execute(&community, ADMIN, LOBBY, Command::Report { rooms: vec![] }).await;
        assert_eq!(reply.outcome, Outcome::Applied);
        assert!(reply.text.contains("@idle:example.org"));
        assert!(reply.text.contains("danger"));
    }

    #[tokio::test]
    async fn ban_with_one_powerless_room_is_partial() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        transport.fail_always(
            "ban",
            Some(DEV),
            TransportError::PermissionDenied("insufficient level".into()),
        );

        let reply = execute(
            &community,
            ADMIN,
            LOBBY,
            Command::Ban {
                user: "@troll:example.org".into(),
                reason: None,
            },
        )
        .await;
        match reply.outcome {
            Outcome::Partial { manual_actions, .. } => {
                assert_eq!(manual_actions, vec![format!("@troll:example.org in {DEV}")]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn createroom_by_moderator() {
        let (community, transport) = community_with(crate::config::test_config()).await;
        let reply = execute(
            &community,
            MODERATOR,
            LOBBY,
            Command::Createroom {
                name: "Book Club".into(),
                encrypt: None,
                topic: None,
            },
        )
        .await;
        assert_eq!(reply.outcome, Outcome::Applied);
        assert!(reply.text.contains("#bookclub:example.org"));
        assert!(transport.alias_target("#bookclub:example.org").is_some());
    }
}
