//! SetAggregator Repository
//!
//! SQLite persistence for finalized capture sets

use super::types::CaptureSet;
use crate::error::Result;
use crate::session::SessionId;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

/// Capture set repository
#[derive(Clone)]
pub struct SetRepository {
    pool: SqlitePool,
}

impl SetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS capture_sets (
                set_key      TEXT PRIMARY KEY,
                ts           TEXT NOT NULL,
                counter      INTEGER NOT NULL,
                complete     INTEGER NOT NULL,
                finalized_at TEXT NOT NULL,
                payload      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_capture_sets_order ON capture_sets (ts, counter)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn insert(&self, set: &CaptureSet) -> Result<()> {
        let payload = serde_json::to_string(set)?;
        sqlx::query(
            r#"
            INSERT INTO capture_sets (set_key, ts, counter, complete, finalized_at, payload)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(set.timestamp().to_string())
        .bind(set.timestamp().timestamp())
        .bind(set.timestamp().counter() as i64)
        .bind(set.is_complete())
        .bind(set.finalized_at().to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent `limit` sets, newest first
    pub async fn load_recent(&self, limit: usize) -> Result<Vec<CaptureSet>> {
        let rows = sqlx::query(
            "SELECT set_key, payload FROM capture_sets ORDER BY ts DESC, counter DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut sets = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("set_key")?;
            let payload: String = row.try_get("payload")?;
            match serde_json::from_str::<CaptureSet>(&payload) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    tracing::warn!(set_key = %key, error = %e, "Skipping unreadable capture set row");
                }
            }
        }

        Ok(sets)
    }

    pub async fn delete(&self, key: &SessionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM capture_sets WHERE set_key = ?")
            .bind(key.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Close the pool; later queries fail with `PoolClosed`
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM capture_sets")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[cfg(test)]
pub(crate) async fn memory_repository() -> SetRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let repo = SetRepository::new(pool);
    repo.migrate().await.unwrap();
    repo
}
