//! Database bootstrap.
//!
//! Opens the shared SQLite pool, creates every table and hands out the
//! repository and store handles built on it.

use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    lock::SqliteLockStore,
    repository::{SqliteFirmRepository, SqliteOfficeRepository, SqliteUserProfileRepository},
    watermark::SqliteWatermarkStore,
    Error, Result,
};

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to `url` (e.g. `sqlite:provider-sync.db?mode=rwc`) and create the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::InvalidConfig(format!("Invalid database URL '{url}': {e}")))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Create every table. Order matters for the foreign keys.
    pub async fn init(&self) -> Result<()> {
        self.firms().init().await?;
        self.offices().init().await?;
        self.user_profiles().init().await?;
        self.lock_store().init().await?;
        self.watermarks().init().await?;
        Ok(())
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn firms(&self) -> SqliteFirmRepository {
        SqliteFirmRepository::new(self.pool.clone())
    }

    pub fn offices(&self) -> SqliteOfficeRepository {
        SqliteOfficeRepository::new(self.pool.clone())
    }

    pub fn user_profiles(&self) -> SqliteUserProfileRepository {
        SqliteUserProfileRepository::new(self.pool.clone())
    }

    pub fn lock_store(&self) -> SqliteLockStore {
        SqliteLockStore::new(self.pool.clone())
    }

    pub fn watermarks(&self) -> SqliteWatermarkStore {
        SqliteWatermarkStore::new(self.pool.clone())
    }
}
