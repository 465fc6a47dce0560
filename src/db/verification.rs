//! Verification session repository.

use super::DbError;
use sqlx::SqlitePool;

/// State of a verification challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Verified,
    Failed,
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Verified => "verified",
            SessionState::Failed => "failed",
            SessionState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionState::Pending),
            "verified" => Some(SessionState::Verified),
            "failed" => Some(SessionState::Failed),
            "expired" => Some(SessionState::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Pending)
    }
}

/// A verification challenge for one user in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSession {
    pub user_id: String,
    pub room_id: String,
    /// Direct-message room the challenge was sent to.
    pub dm_room: Option<String>,
    /// `None` for members verified by migration.
    pub phrase: Option<String>,
    pub attempts_remaining: u32,
    pub state: SessionState,
    pub created_at: i64,
    pub updated_at: i64,
}

type SessionRow = (String, String, Option<String>, Option<String>, i64, String, i64, i64);

fn from_row(row: SessionRow) -> Result<VerificationSession, DbError> {
    let (user_id, room_id, dm_room, phrase, attempts, state, created_at, updated_at) = row;
    Ok(VerificationSession {
        state: SessionState::parse(&state)
            .ok_or_else(|| DbError::Corrupt(format!("unknown session state '{state}'")))?,
        attempts_remaining: u32::try_from(attempts).unwrap_or(0),
        user_id,
        room_id,
        dm_room,
        phrase,
        created_at,
        updated_at,
    })
}

const SELECT_SESSION: &str = r#"
    SELECT user_id, room_id, dm_room, phrase, attempts_remaining, state, created_at, updated_at
    FROM verification_sessions
"#;

/// Repository for verification sessions.
pub struct VerificationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VerificationRepository<'a> {
    /// Create a new verification repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a session, replacing any previous one for the same user and room.
    pub async fn put(&self, session: &VerificationSession) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO verification_sessions
                (user_id, room_id, dm_room, phrase, attempts_remaining, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, room_id) DO UPDATE SET
                dm_room = excluded.dm_room,
                phrase = excluded.phrase,
                attempts_remaining = excluded.attempts_remaining,
                state = excluded.state,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.user_id)
        .bind(&session.room_id)
        .bind(&session.dm_room)
        .bind(&session.phrase)
        .bind(i64::from(session.attempts_remaining))
        .bind(session.state.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Find the session for a user in a room.
    pub async fn get(&self, user_id: &str, room_id: &str) -> Result<Option<VerificationSession>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_SESSION} WHERE user_id = ? AND room_id = ?"
        ))
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(from_row).transpose()
    }

    /// Pending sessions whose challenge went to `dm_room` from `user_id`.
    pub async fn pending_in_dm(
        &self,
        user_id: &str,
        dm_room: &str,
    ) -> Result<Vec<VerificationSession>, DbError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_SESSION} WHERE user_id = ? AND dm_room = ? AND state = 'pending' ORDER BY created_at"
        ))
        .bind(user_id)
        .bind(dm_room)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }

    /// Pending sessions for a room.
    pub async fn pending_in_room(&self, room_id: &str) -> Result<Vec<VerificationSession>, DbError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_SESSION} WHERE room_id = ? AND state = 'pending' ORDER BY created_at"
        ))
        .bind(room_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }

    /// Every session of a user (per-room verification status).
    pub async fn for_user(&self, user_id: &str) -> Result<Vec<VerificationSession>, DbError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_SESSION} WHERE user_id = ? ORDER BY room_id"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn pending(user: &str, room: &str, dm: &str) -> VerificationSession {
        VerificationSession {
            user_id: user.into(),
            room_id: room.into(),
            dm_room: Some(dm.into()),
            phrase: Some("open sesame".into()),
            attempts_remaining: 3,
            state: SessionState::Pending,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_put_and_query() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.verification();

        repo.put(&pending("@u:example.org", "!r:example.org", "!dm:example.org"))
            .await
            .unwrap();
        repo.put(&pending("@u:example.org", "!s:example.org", "!dm:example.org"))
            .await
            .unwrap();

        let in_dm = repo
            .pending_in_dm("@u:example.org", "!dm:example.org")
            .await
            .unwrap();
        assert_eq!(in_dm.len(), 2);

        let mut done = in_dm
            .iter()
            .find(|s| s.room_id == "!r:example.org")
            .cloned()
            .unwrap();
        done.state = SessionState::Verified;
        repo.put(&done).await.unwrap();

        assert_eq!(repo.pending_in_room("!r:example.org").await.unwrap().len(), 0);
        assert_eq!(repo.pending_in_room("!s:example.org").await.unwrap().len(), 1);
        assert_eq!(repo.for_user("@u:example.org").await.unwrap().len(), 2);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Pending.is_terminal());
        assert!(SessionState::Verified.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Expired.is_terminal());
    }
}
