//! User repository for activity tracking and moderation flags.

use super::DbError;
use sqlx::SqlitePool;

/// Tracked state for a single user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: String,
    /// When the user was first observed (ms).
    pub first_seen: i64,
    /// Last tracked message or reaction (ms). `None` until the first one.
    pub last_active: Option<i64>,
    /// Excluded from inactivity reports.
    pub ignored: bool,
    /// Banned community-wide. Cleared only by an explicit unban.
    pub banned: bool,
    /// Currently a member of the parent space.
    pub space_member: bool,
}

type UserRow = (String, i64, Option<i64>, bool, bool, bool);

fn from_row(row: UserRow) -> UserRecord {
    let (user_id, first_seen, last_active, ignored, banned, space_member) = row;
    UserRecord {
        user_id,
        first_seen,
        last_active,
        ignored,
        banned,
        space_member,
    }
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user observed at `now` unless already tracked.
    ///
    /// Returns true if a new row was created.
    pub async fn ensure(&self, user_id: &str, now: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, first_seen)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record activity at `timestamp`, keeping the newest value seen.
    pub async fn record_activity(&self, user_id: &str, timestamp: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, first_seen, last_active)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                last_active = MAX(COALESCE(users.last_active, excluded.last_active), excluded.last_active)
            "#,
        )
        .bind(user_id)
        .bind(timestamp)
        .bind(timestamp)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Find a user by id.
    pub async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, DbError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, first_seen, last_active, ignored, banned, space_member
            FROM users
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(from_row))
    }

    /// Load every tracked user.
    pub async fn all(&self) -> Result<Vec<UserRecord>, DbError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, first_seen, last_active, ignored, banned, space_member
            FROM users
            ORDER BY user_id
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Set or clear the ignore flag. Returns false if the user is unknown.
    pub async fn set_ignored(&self, user_id: &str, ignored: bool) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE users SET ignored = ? WHERE user_id = ?")
            .bind(ignored)
            .bind(user_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set or clear the community-wide ban flag, creating the row if needed.
    pub async fn set_banned(&self, user_id: &str, banned: bool, now: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, first_seen, banned)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET banned = excluded.banned
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(banned)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Flag whether the user currently belongs to the parent space.
    ///
    /// Returns true if the flag changed.
    pub async fn set_space_member(&self, user_id: &str, member: bool) -> Result<bool, DbError> {
        let result =
            sqlx::query("UPDATE users SET space_member = ? WHERE user_id = ? AND space_member != ?")
                .bind(member)
                .bind(user_id)
                .bind(member)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
