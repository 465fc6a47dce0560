//! Room repository: managed rooms, aliases and tombstone pointers.

use super::DbError;
use sqlx::SqlitePool;

/// A room known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub room_id: String,
    pub name: Option<String>,
    /// Listed as a child of the parent space.
    pub in_space: bool,
    pub encrypted: bool,
    pub verification_enabled: bool,
    pub archived: bool,
    /// Room that superseded this one. Write-once.
    pub replacement_room: Option<String>,
    pub created_at: i64,
}

type RoomRow = (String, Option<String>, bool, bool, bool, bool, Option<String>, i64);

fn from_row(row: RoomRow) -> RoomRecord {
    let (room_id, name, in_space, encrypted, verification_enabled, archived, replacement_room, created_at) =
        row;
    RoomRecord {
        room_id,
        name,
        in_space,
        encrypted,
        verification_enabled,
        archived,
        replacement_room,
        created_at,
    }
}

const SELECT_ROOM: &str = r#"
    SELECT room_id, name, in_space, encrypted, verification_enabled, archived, replacement_room, created_at
    FROM rooms
"#;

/// Repository for room operations.
pub struct RoomRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RoomRepository<'a> {
    /// Create a new room repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a room discovered in (or created for) the space.
    ///
    /// Existing rows keep their flags; only space membership and a missing
    /// name are refreshed.
    pub async fn upsert(
        &self,
        room_id: &str,
        name: Option<&str>,
        in_space: bool,
        encrypted: bool,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO rooms (room_id, name, in_space, encrypted, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(room_id) DO UPDATE SET
                in_space = excluded.in_space,
                name = COALESCE(excluded.name, rooms.name)
            "#,
        )
        .bind(room_id)
        .bind(name)
        .bind(in_space)
        .bind(encrypted)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Find a room by id.
    pub async fn get(&self, room_id: &str) -> Result<Option<RoomRecord>, DbError> {
        let row = sqlx::query_as::<_, RoomRow>(&format!("{SELECT_ROOM} WHERE room_id = ?"))
            .bind(room_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(from_row))
    }

    /// Load every room, archived ones included.
    pub async fn all(&self) -> Result<Vec<RoomRecord>, DbError> {
        let rows = sqlx::query_as::<_, RoomRow>(&format!("{SELECT_ROOM} ORDER BY room_id"))
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Rooms with verification currently enabled.
    pub async fn verification_rooms(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT room_id FROM rooms WHERE verification_enabled = 1 ORDER BY room_id",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Set the verification flag. Returns the previous value.
    pub async fn set_verification(&self, room_id: &str, enabled: bool) -> Result<bool, DbError> {
        let previous = self
            .get(room_id)
            .await?
            .ok_or_else(|| DbError::RoomNotFound(room_id.to_string()))?
            .verification_enabled;

        sqlx::query("UPDATE rooms SET verification_enabled = ? WHERE room_id = ?")
            .bind(enabled)
            .bind(room_id)
            .execute(self.pool)
            .await?;

        Ok(previous)
    }

    pub async fn set_encrypted(&self, room_id: &str, encrypted: bool) -> Result<(), DbError> {
        sqlx::query("UPDATE rooms SET encrypted = ? WHERE room_id = ?")
            .bind(encrypted)
            .bind(room_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Mark a room archived and detached from the space.
    pub async fn set_archived(&self, room_id: &str) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE rooms SET archived = 1, in_space = 0 WHERE room_id = ?")
            .bind(room_id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::RoomNotFound(room_id.to_string()));
        }
        Ok(())
    }

    /// Point an archived room at its replacement.
    ///
    /// Setting the same value twice is accepted; pointing an already
    /// tombstoned room somewhere else is refused.
    pub async fn set_tombstone(&self, room_id: &str, replacement: &str) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE rooms SET replacement_room = ? WHERE room_id = ? AND replacement_room IS NULL",
        )
        .bind(replacement)
        .bind(room_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get(room_id).await? {
            None => Err(DbError::RoomNotFound(room_id.to_string())),
            Some(record) => match record.replacement_room {
                Some(existing) if existing == replacement => Ok(()),
                Some(existing) => Err(DbError::TombstoneSet {
                    room: room_id.to_string(),
                    existing,
                }),
                None => Err(DbError::Corrupt(format!(
                    "tombstone update for {room_id} matched no row"
                ))),
            },
        }
    }

    // ------------------------------------------------------------------
    // Aliases
    // ------------------------------------------------------------------

    /// Aliases currently pointing at `room_id`.
    pub async fn active_aliases(&self, room_id: &str) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT alias FROM room_aliases WHERE room_id = ? AND active = 1 ORDER BY alias",
        )
        .bind(room_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Every alias ever recorded for `room_id`, former ones included.
    pub async fn known_aliases(&self, room_id: &str) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT alias FROM room_aliases WHERE room_id = ? ORDER BY alias",
        )
        .bind(room_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Room currently holding `alias`, if any.
    pub async fn alias_holder(&self, alias: &str) -> Result<Option<String>, DbError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT room_id FROM room_aliases WHERE alias = ? AND active = 1",
        )
        .bind(alias)
        .fetch_optional(self.pool)
        .await?;

        Ok(row)
    }

    /// Record `alias` as active on `room_id`.
    pub async fn attach_alias(&self, room_id: &str, alias: &str, now: i64) -> Result<(), DbError> {
        if let Some(holder) = self.alias_holder(alias).await?
            && holder != room_id
        {
            return Err(DbError::AliasActive {
                alias: alias.to_string(),
                room: holder,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO room_aliases (room_id, alias, active, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(room_id, alias) DO UPDATE SET active = 1, updated_at = excluded.updated_at
            "#,
        )
        .bind(room_id)
        .bind(alias)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Mark `alias` as former on `room_id`; the row is kept for bookkeeping.
    pub async fn detach_alias(&self, room_id: &str, alias: &str, now: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO room_aliases (room_id, alias, active, updated_at)
            VALUES (?, ?, 0, ?)
            ON CONFLICT(room_id, alias) DO UPDATE SET active = 0, updated_at = excluded.updated_at
            "#,
        )
        .bind(room_id)
        .bind(alias)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Move `alias` from `from` to `to` in one transaction.
    pub async fn move_alias(&self, alias: &str, from: &str, to: &str, now: i64) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO room_aliases (room_id, alias, active, updated_at)
            VALUES (?, ?, 0, ?)
            ON CONFLICT(room_id, alias) DO UPDATE SET active = 0, updated_at = excluded.updated_at
            "#,
        )
        .bind(from)
        .bind(alias)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let holder: Option<String> =
            sqlx::query_scalar("SELECT room_id FROM room_aliases WHERE alias = ? AND active = 1")
                .bind(alias)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(holder) = holder
            && holder != to
        {
            return Err(DbError::AliasActive {
                alias: alias.to_string(),
                room: holder,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO room_aliases (room_id, alias, active, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(room_id, alias) DO UPDATE SET active = 1, updated_at = excluded.updated_at
            "#,
        )
        .bind(to)
        .bind(alias)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
