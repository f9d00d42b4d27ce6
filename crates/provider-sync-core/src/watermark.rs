//! "Last successful sync" watermark.
//!
//! A single row, overwritten after every completed cycle. Failed and skipped
//! cycles never touch it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{Error, Result};

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn record_success(&self, at: DateTime<Utc>) -> Result<()>;

    async fn last_success(&self) -> Result<Option<DateTime<Utc>>>;
}

#[derive(Debug, Clone)]
pub struct SqliteWatermarkStore {
    db: SqlitePool,
}

impl SqliteWatermarkStore {
    pub const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the watermark table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_watermark (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_successful_sync INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn record_success(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_watermark (id, last_successful_sync, updated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE
                SET last_successful_sync = excluded.last_successful_sync,
                    updated_at = excluded.updated_at",
        )
        .bind(at.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn last_success(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_successful_sync FROM sync_watermark WHERE id = 1")
                .fetch_optional(&self.db)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;

        row.map(|(ms,)| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| Error::ParseError(format!("Invalid watermark timestamp: {ms}")))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn setup() -> Result<SqliteWatermarkStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        let store = SqliteWatermarkStore::new(pool);
        store.init().await?;
        Ok(store)
    }

    #[tokio::test]
    async fn test_empty_until_first_success() -> Result<()> {
        let store = setup().await?;
        assert_eq!(store.last_success().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_success_overwrites() -> Result<()> {
        let store = setup().await?;
        let first = Utc::now() - Duration::hours(1);
        let second = Utc::now();

        store.record_success(first).await?;
        store.record_success(second).await?;

        let stored = store.last_success().await?;
        assert_eq!(
            stored.map(|t| t.timestamp_millis()),
            Some(second.timestamp_millis())
        );
        Ok(())
    }
}
