//! Manual sync triggers.
//!
//! Requests go through a bounded queue served by a single worker task. While
//! one run is in progress at most `capacity` further requests wait and are
//! reported as queued; anything beyond that is rejected on the spot instead
//! of piling up.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::scheduler::{CycleOutcome, SyncScheduler};

pub const REJECTED_MESSAGE: &str = "Too many concurrent sync operations. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// A run was kicked off for this request.
    Started,
    /// Accepted, but waiting behind a run already in progress.
    Queued,
    Rejected,
    Skipped,
    Disabled,
    Failure,
}

/// Answer to a manual trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResponse {
    pub status: SyncStatus,
    pub message: String,
    pub started: bool,
}

impl SyncResponse {
    fn new(status: SyncStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            started: status == SyncStatus::Started,
        }
    }
}

#[derive(Debug)]
struct SyncRequest {
    requested_at: DateTime<Utc>,
}

pub struct ManualSyncWorker;

impl ManualSyncWorker {
    /// Start the worker. It stops once every handle is dropped and the queue
    /// has drained.
    pub fn spawn(
        scheduler: Arc<SyncScheduler>,
        capacity: usize,
    ) -> (ManualSyncHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SyncRequest>(capacity.max(1));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            let outstanding = Arc::clone(&outstanding);
            tokio::spawn(async move {
                while let Some(request) = rx.recv().await {
                    let waited_ms = (Utc::now() - request.requested_at).num_milliseconds();
                    tracing::info!(waited_ms, "Manual provider data sync starting");
                    match scheduler.run_cycle().await {
                        CycleOutcome::Completed(result) => tracing::info!(
                            changes = result.total_changes(),
                            errors = result.errors.len(),
                            "Manual provider data sync completed"
                        ),
                        outcome => tracing::info!(?outcome, "Manual provider data sync did not run"),
                    }
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                }
                tracing::debug!("Manual sync worker stopped");
            })
        };

        (
            ManualSyncHandle {
                scheduler,
                tx,
                outstanding,
            },
            worker,
        )
    }
}

/// Submits manual sync requests.
#[derive(Clone)]
pub struct ManualSyncHandle {
    scheduler: Arc<SyncScheduler>,
    tx: mpsc::Sender<SyncRequest>,
    /// Requests accepted and not yet finished, the running one included.
    outstanding: Arc<AtomicUsize>,
}

impl ManualSyncHandle {
    /// Queue a run if possible and say what happened.
    pub async fn trigger(&self) -> SyncResponse {
        let config = self.scheduler.config();
        if !config.polling_enabled {
            return SyncResponse::new(SyncStatus::Disabled, "Provider data sync is disabled");
        }

        if self.scheduler.lock().is_held_elsewhere(&config.lock_key).await {
            return SyncResponse::new(
                SyncStatus::Skipped,
                "Provider data sync is already running on another instance",
            );
        }

        let request = SyncRequest {
            requested_at: Utc::now(),
        };
        let ahead = self.outstanding.fetch_add(1, Ordering::SeqCst);
        let response = match self.tx.try_send(request) {
            Ok(()) if ahead == 0 => {
                SyncResponse::new(SyncStatus::Started, "Provider data sync started")
            }
            Ok(()) => SyncResponse::new(
                SyncStatus::Queued,
                format!("Provider data sync queued behind {ahead} earlier request(s)"),
            ),
            Err(e) => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                match e {
                    TrySendError::Full(_) => SyncResponse::new(SyncStatus::Rejected, REJECTED_MESSAGE),
                    TrySendError::Closed(_) => {
                        SyncResponse::new(SyncStatus::Failure, "Sync worker is not running")
                    }
                }
            }
        };
        tracing::info!(status = %response.status, "Manual sync trigger");
        response
    }
}
