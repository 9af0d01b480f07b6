use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;

use super::store::SeenRecord;

/// Durable snapshot of the seen-store: a single SQLite file, rewritten
/// after every successful cycle and loaded at startup. Timestamps are
/// persisted, so TTL eviction survives restarts.
pub struct SeenDatabase {
    pool: SqlitePool,
}

impl SeenDatabase {
    pub async fn new(database_path: &str) -> Result<Self> {
        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            if let Some(parent) = Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite://{}?mode=rwc", database_path)
        };

        // Single connection: the supervisor is the only writer, and an
        // in-memory database must not be split across pool connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&connection_string)
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_listings (
                id TEXT PRIMARY KEY,
                seen_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_seen_listings_seen_at
            ON seen_listings(seen_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Full snapshot, oldest first, matching the store's eviction order.
    pub async fn load(&self) -> Result<Vec<SeenRecord>> {
        let records = sqlx::query_as::<_, SeenRecord>(
            r#"
            SELECT id, seen_at FROM seen_listings ORDER BY seen_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Upsert the store's current records and drop rows that have aged
    /// past the retention horizon, in one transaction.
    pub async fn persist(&self, records: &[SeenRecord], horizon: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO seen_listings (id, seen_at)
                VALUES (?, ?)
                ON CONFLICT(id) DO UPDATE SET seen_at = excluded.seen_at
                "#,
            )
            .bind(&record.id)
            .bind(record.seen_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(r#"DELETE FROM seen_listings WHERE seen_at < ?"#)
            .bind(horizon)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen_listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
