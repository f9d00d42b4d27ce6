//! Lease-based distributed lock backed by a shared relational table.
//!
//! Every deployed instance races for the same named lease. A lease is a row
//! `(lock_key, locked_until, locked_by)`; whoever manages to write their
//! holder id into it while it is free, expired or already theirs owns it
//! until `locked_until`.
//!
//! # Lifecycle
//!
//! - Rows are created or refreshed by acquire and are never deleted.
//! - Release only pulls `locked_until` back to "now" so the row is
//!   immediately reclaimable.
//! - A crashed holder's lease simply runs out. There is no heartbeat, so the
//!   TTL must exceed the longest expected run.
//!
//! # Failure semantics
//!
//! [`DistributedLockService`] never surfaces store errors. They are logged
//! and turned into "not acquired", which skips the cycle and leaves the next
//! scheduled attempt unaffected.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use sqlx::SqlitePool;

use crate::{Error, Result};

/// A named lease as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub locked_until: DateTime<Utc>,
    pub locked_by: String,
}

impl Lease {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::ParseError(format!("Invalid lease timestamp: {ms}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCK STORE
// ═══════════════════════════════════════════════════════════════════════════

/// Storage primitive behind the lock service.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically take the lease if it is absent, expired or already held by
    /// `holder`. Returns whether `holder` now owns it.
    async fn try_acquire(&self, key: &str, until: DateTime<Utc>, holder: &str) -> Result<bool>;

    /// Make the lease immediately reclaimable if `holder` still owns it.
    /// Safe on expired or foreign leases.
    async fn release(&self, key: &str, holder: &str) -> Result<()>;

    async fn lease(&self, key: &str) -> Result<Option<Lease>>;
}

/// [`LockStore`] over a `distributed_lock` table.
#[derive(Debug, Clone)]
pub struct SqliteLockStore {
    db: SqlitePool,
}

impl SqliteLockStore {
    pub const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the lease table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS distributed_lock (
                lock_key TEXT PRIMARY KEY,
                locked_until INTEGER NOT NULL,
                locked_by TEXT NOT NULL
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| Error::LockError(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_acquire(&self, key: &str, until: DateTime<Utc>, holder: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();

        // Single statement: the conflict branch only writes when the current
        // lease is expired or ours, so two racing instances cannot both win.
        let result = sqlx::query(
            "INSERT INTO distributed_lock (lock_key, locked_until, locked_by) VALUES (?, ?, ?)
             ON CONFLICT(lock_key) DO UPDATE
                SET locked_until = excluded.locked_until, locked_by = excluded.locked_by
              WHERE distributed_lock.locked_until <= ?
                 OR distributed_lock.locked_by = excluded.locked_by",
        )
        .bind(key)
        .bind(until.timestamp_millis())
        .bind(holder)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| Error::LockError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            "UPDATE distributed_lock SET locked_until = ?
             WHERE lock_key = ? AND locked_by = ? AND locked_until > ?",
        )
        .bind(now)
        .bind(key)
        .bind(holder)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| Error::LockError(e.to_string()))?;

        Ok(())
    }

    async fn lease(&self, key: &str) -> Result<Option<Lease>> {
        let row: Option<(String, i64, String)> = sqlx::query_as(
            "SELECT lock_key, locked_until, locked_by FROM distributed_lock WHERE lock_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::LockError(e.to_string()))?;

        row.map(|(key, until, by)| {
            Ok(Lease {
                key,
                locked_until: from_millis(until)?,
                locked_by: by,
            })
        })
        .transpose()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCK SERVICE
// ═══════════════════════════════════════════════════════════════════════════

/// Mutual exclusion across instances.
///
/// Implementations must not fail: contention and backend trouble both read
/// as `false` from [`DistributedLock::acquire`].
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Identifier written into leases taken by this instance.
    fn holder(&self) -> &str;

    /// Try to take `key` for `ttl`.
    async fn acquire(&self, key: &str, ttl: Duration) -> bool;

    /// Give `key` back. Safe to call after the lease has expired.
    async fn release(&self, key: &str);

    /// Whether a live lease on `key` belongs to another instance.
    async fn is_held_elsewhere(&self, key: &str) -> bool;
}

/// Default [`DistributedLock`] over any [`LockStore`].
#[derive(Clone)]
pub struct DistributedLockService {
    store: Arc<dyn LockStore>,
    holder: String,
}

impl DistributedLockService {
    pub fn new(store: Arc<dyn LockStore>, holder: impl Into<String>) -> Self {
        Self {
            store,
            holder: holder.into(),
        }
    }

    /// Use a random UUID as holder id.
    pub fn with_random_holder(store: Arc<dyn LockStore>) -> Self {
        Self::new(store, uuid::Uuid::new_v4().to_string())
    }

    pub async fn lease(&self, key: &str) -> Result<Option<Lease>> {
        self.store.lease(key).await
    }
}

impl std::fmt::Debug for DistributedLockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLockService")
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DistributedLock for DistributedLockService {
    fn holder(&self) -> &str {
        &self.holder
    }

    async fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let until = Utc::now() + ttl;
        match self.store.try_acquire(key, until, &self.holder).await {
            Ok(true) => {
                tracing::debug!(lock_key = key, holder = %self.holder, %until, "Lock acquired");
                true
            }
            Ok(false) => {
                tracing::debug!(lock_key = key, holder = %self.holder, "Lock held by another instance");
                false
            }
            Err(e) => {
                tracing::warn!(lock_key = key, error = %e, "Lock acquisition failed, treating as not acquired");
                false
            }
        }
    }

    async fn release(&self, key: &str) {
        match self.store.release(key, &self.holder).await {
            Ok(()) => tracing::debug!(lock_key = key, holder = %self.holder, "Lock released"),
            Err(e) => tracing::warn!(lock_key = key, error = %e, "Lock release failed; lease will expire"),
        }
    }

    async fn is_held_elsewhere(&self, key: &str) -> bool {
        match self.store.lease(key).await {
            Ok(Some(lease)) => !lease.is_expired() && lease.locked_by != self.holder,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(lock_key = key, error = %e, "Could not read lease");
                false
            }
        }
    }
}

/// Run `action` while holding `key`.
///
/// Returns `None` without running anything when the lease is held elsewhere.
/// The lease is released after `action` completes, including when it panics;
/// the panic is then resumed.
pub async fn with_lock<L, F, Fut, T>(lock: &L, key: &str, ttl: Duration, action: F) -> Option<T>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = T> + Send,
    T: Send,
{
    if !lock.acquire(key, ttl).await {
        tracing::debug!(lock_key = key, "Skipping locked action");
        return None;
    }

    let outcome = AssertUnwindSafe(action()).catch_unwind().await;
    lock.release(key).await;

    match outcome {
        Ok(value) => Some(value),
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
