//! Step log for room replacement.
//!
//! Each completed step is written before the next one starts so that an
//! interrupted replacement can resume where it stopped.

use super::DbError;
use sqlx::SqlitePool;

/// Last completed step of a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReplacementStep {
    /// Logged, nothing done yet.
    Started,
    /// The new room exists (and is recorded in `new_room`).
    Created,
    /// Every alias now points at the new room.
    AliasesTransferred,
    /// The old room is archived with a tombstone to the new one.
    Archived,
    /// Room bindings rewritten; the replacement is complete.
    Done,
}

impl ReplacementStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplacementStep::Started => "started",
            ReplacementStep::Created => "created",
            ReplacementStep::AliasesTransferred => "aliases_transferred",
            ReplacementStep::Archived => "archived",
            ReplacementStep::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(ReplacementStep::Started),
            "created" => Some(ReplacementStep::Created),
            "aliases_transferred" => Some(ReplacementStep::AliasesTransferred),
            "archived" => Some(ReplacementStep::Archived),
            "done" => Some(ReplacementStep::Done),
            _ => None,
        }
    }
}

/// A logged replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRecord {
    pub id: String,
    pub old_room: String,
    pub new_room: Option<String>,
    /// Serialized room specification for the new room.
    pub spec: String,
    pub step: ReplacementStep,
    pub requested_by: String,
    pub started_at: i64,
    pub updated_at: i64,
}

type ReplacementRow = (String, String, Option<String>, String, String, String, i64, i64);

fn from_row(row: ReplacementRow) -> Result<ReplacementRecord, DbError> {
    let (id, old_room, new_room, spec, step, requested_by, started_at, updated_at) = row;
    Ok(ReplacementRecord {
        step: ReplacementStep::parse(&step)
            .ok_or_else(|| DbError::Corrupt(format!("unknown replacement step '{step}'")))?,
        id,
        old_room,
        new_room,
        spec,
        requested_by,
        started_at,
        updated_at,
    })
}

const SELECT_REPLACEMENT: &str = r#"
    SELECT id, old_room, new_room, spec, step, requested_by, started_at, updated_at
    FROM room_replacements
"#;

/// Repository for the replacement step log.
pub struct ReplacementRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReplacementRepository<'a> {
    /// Create a new replacement repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Log the start of a replacement and return its record.
    pub async fn start(
        &self,
        old_room: &str,
        spec: &str,
        requested_by: &str,
        now: i64,
    ) -> Result<ReplacementRecord, DbError> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO room_replacements (id, old_room, spec, step, requested_by, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(old_room)
        .bind(spec)
        .bind(ReplacementStep::Started.as_str())
        .bind(requested_by)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(ReplacementRecord {
            id,
            old_room: old_room.to_string(),
            new_room: None,
            spec: spec.to_string(),
            step: ReplacementStep::Started,
            requested_by: requested_by.to_string(),
            started_at: now,
            updated_at: now,
        })
    }

    /// Record the new room id together with the `Created` step.
    pub async fn record_created(&self, id: &str, new_room: &str, now: i64) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE room_replacements SET new_room = ?, step = ?, updated_at = ? WHERE id = ?",
        )
        .bind(new_room)
        .bind(ReplacementStep::Created.as_str())
        .bind(now)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Record completion of `step`.
    pub async fn advance(&self, id: &str, step: ReplacementStep, now: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE room_replacements SET step = ?, updated_at = ? WHERE id = ?")
            .bind(step.as_str())
            .bind(now)
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ReplacementRecord>, DbError> {
        let row = sqlx::query_as::<_, ReplacementRow>(&format!("{SELECT_REPLACEMENT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        row.map(from_row).transpose()
    }

    /// Replacements that have not reached `Done`, oldest first.
    pub async fn unfinished(&self) -> Result<Vec<ReplacementRecord>, DbError> {
        let rows = sqlx::query_as::<_, ReplacementRow>(&format!(
            "{SELECT_REPLACEMENT} WHERE step != 'done' ORDER BY started_at"
        ))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_step_log_progression() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.replacements();

        let record = repo
            .start("!old:example.org", "{}", "@admin:example.org", 1)
            .await
            .unwrap();
        assert_eq!(repo.unfinished().await.unwrap().len(), 1);

        repo.record_created(&record.id, "!new:example.org", 2).await.unwrap();
        let loaded = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.step, ReplacementStep::Created);
        assert_eq!(loaded.new_room.as_deref(), Some("!new:example.org"));

        repo.advance(&record.id, ReplacementStep::Done, 3).await.unwrap();
        assert!(repo.unfinished().await.unwrap().is_empty());
    }

    #[test]
    fn test_steps_are_ordered() {
        assert!(ReplacementStep::Started < ReplacementStep::Created);
        assert!(ReplacementStep::Created < ReplacementStep::AliasesTransferred);
        assert!(ReplacementStep::AliasesTransferred < ReplacementStep::Archived);
        assert!(ReplacementStep::Archived < ReplacementStep::Done);
    }
}
