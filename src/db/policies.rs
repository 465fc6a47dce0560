//! Policy rule repository for subscribed banlists.

use super::DbError;
use sqlx::SqlitePool;
use std::fmt;

/// What a policy rule's entity glob is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    User,
    Server,
    Room,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::User => "user",
            PolicyKind::Server => "server",
            PolicyKind::Room => "room",
        }
    }

    /// Parse the stored kind label.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(PolicyKind::User),
            "server" => Some(PolicyKind::Server),
            "room" => Some(PolicyKind::Room),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an ingested rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Active,
    Revoked,
}

impl RuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleState::Active => "active",
            RuleState::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RuleState::Active),
            "revoked" => Some(RuleState::Revoked),
            _ => None,
        }
    }
}

/// A ban recommendation published in a policy room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub policy_room: String,
    pub kind: PolicyKind,
    /// State key of the rule event.
    pub rule_id: String,
    /// Glob over user ids, server names or room ids.
    pub entity: String,
    pub recommendation: String,
    pub reason: Option<String>,
    pub state: RuleState,
    /// Last event applied to this rule.
    pub event_id: String,
    pub origin_ts: i64,
}

type RuleRow = (String, String, String, String, String, Option<String>, String, String, i64);

fn from_row(row: RuleRow) -> Result<PolicyRule, DbError> {
    let (policy_room, kind, rule_id, entity, recommendation, reason, state, event_id, origin_ts) = row;
    Ok(PolicyRule {
        kind: PolicyKind::parse(&kind)
            .ok_or_else(|| DbError::Corrupt(format!("unknown policy kind '{kind}'")))?,
        state: RuleState::parse(&state)
            .ok_or_else(|| DbError::Corrupt(format!("unknown rule state '{state}'")))?,
        policy_room,
        rule_id,
        entity,
        recommendation,
        reason,
        event_id,
        origin_ts,
    })
}

const SELECT_RULE: &str = r#"
    SELECT policy_room, kind, rule_id, entity, recommendation, reason, state, event_id, origin_ts
    FROM policy_rules
"#;

/// Repository for policy rule operations.
pub struct PolicyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PolicyRepository<'a> {
    /// Create a new policy repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns true if `event_id` has already been ingested.
    pub async fn is_ingested(&self, event_id: &str) -> Result<bool, DbError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT event_id FROM policy_events WHERE event_id = ?",
        )
        .bind(event_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Remember that `event_id` has been ingested.
    pub async fn mark_ingested(&self, event_id: &str, now: i64) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO policy_events (event_id, ingested_at) VALUES (?, ?) ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Find a rule by its key.
    pub async fn get(
        &self,
        policy_room: &str,
        kind: PolicyKind,
        rule_id: &str,
    ) -> Result<Option<PolicyRule>, DbError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "{SELECT_RULE} WHERE policy_room = ? AND kind = ? AND rule_id = ?"
        ))
        .bind(policy_room)
        .bind(kind.as_str())
        .bind(rule_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(from_row).transpose()
    }

    /// Insert or overwrite a rule.
    pub async fn upsert(&self, rule: &PolicyRule) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO policy_rules
                (policy_room, kind, rule_id, entity, recommendation, reason, state, event_id, origin_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(policy_room, kind, rule_id) DO UPDATE SET
                entity = excluded.entity,
                recommendation = excluded.recommendation,
                reason = excluded.reason,
                state = excluded.state,
                event_id = excluded.event_id,
                origin_ts = excluded.origin_ts
            "#,
        )
        .bind(&rule.policy_room)
        .bind(rule.kind.as_str())
        .bind(&rule.rule_id)
        .bind(&rule.entity)
        .bind(&rule.recommendation)
        .bind(&rule.reason)
        .bind(rule.state.as_str())
        .bind(&rule.event_id)
        .bind(rule.origin_ts)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Load every stored rule, revoked ones included.
    pub async fn all(&self) -> Result<Vec<PolicyRule>, DbError> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "{SELECT_RULE} ORDER BY policy_room, kind, rule_id"
        ))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }
}
