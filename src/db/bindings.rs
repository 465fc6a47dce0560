//! Room bindings: room ids referenced by other features.
//!
//! Bindings are seeded from configuration at startup. A room replacement
//! rewrites them here, so the new room survives restarts while the
//! configuration file stays untouched. When the configured value itself
//! changes, the configuration wins again.

use super::DbError;
use sqlx::SqlitePool;

/// A named reference to a room (e.g. `notification`, `greeting:welcome`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomBinding {
    pub purpose: String,
    pub room_id: String,
    /// The configured room this binding was last seeded from.
    pub seeded_from: String,
}

/// Repository for room bindings.
pub struct BindingRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BindingRepository<'a> {
    /// Create a new binding repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Seed a binding from configuration.
    pub async fn seed(&self, purpose: &str, configured_room: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO room_bindings (purpose, room_id, seeded_from)
            VALUES (?, ?, ?)
            ON CONFLICT(purpose) DO UPDATE SET
                room_id = CASE WHEN room_bindings.seeded_from = excluded.seeded_from
                               THEN room_bindings.room_id ELSE excluded.room_id END,
                seeded_from = excluded.seeded_from
            "#,
        )
        .bind(purpose)
        .bind(configured_room)
        .bind(configured_room)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Room currently bound to `purpose`.
    pub async fn get(&self, purpose: &str) -> Result<Option<String>, DbError> {
        let row = sqlx::query_scalar::<_, String>("SELECT room_id FROM room_bindings WHERE purpose = ?")
            .bind(purpose)
            .fetch_optional(self.pool)
            .await?;

        Ok(row)
    }

    /// Bindings pointing at `room_id`.
    pub async fn for_room(&self, room_id: &str) -> Result<Vec<RoomBinding>, DbError> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT purpose, room_id, seeded_from FROM room_bindings WHERE room_id = ? ORDER BY purpose",
        )
        .bind(room_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(purpose, room_id, seeded_from)| RoomBinding {
                purpose,
                room_id,
                seeded_from,
            })
            .collect())
    }

    /// Point every binding of `old_room` at `new_room`. Returns the count.
    pub async fn rewrite(&self, old_room: &str, new_room: &str) -> Result<u64, DbError> {
        let result = sqlx::query("UPDATE room_bindings SET room_id = ? WHERE room_id = ?")
            .bind(new_room)
            .bind(old_room)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
