#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Manual triggers are serialised through one worker with a small queue.

mod common;

use std::{sync::Arc, time::Duration};

use common::{firm, office, snapshot, Harness, ScriptedRegistry};
use provider_sync_core::{
    config::SyncConfig,
    lock::LockStore,
    repository::FirmRepository,
    watermark::WatermarkStore,
    worker::{ManualSyncWorker, SyncStatus, REJECTED_MESSAGE},
    Error, Result,
};

#[tokio::test]
async fn burst_is_serialised_and_excess_rejected() -> Result<()> {
    let harness = Harness::with_registry(ScriptedRegistry::gated()).await?;
    harness
        .registry
        .set(snapshot(
            vec![firm("100", "Acme", "Chambers", None)],
            vec![office("A", "100", "1 High St")],
        ))
        .await;
    let scheduler = Arc::new(harness.scheduler(SyncConfig::default(), "admin"));
    let (handle, worker) = ManualSyncWorker::spawn(scheduler, 2);

    let first = handle.trigger().await;
    assert_eq!(first.status, SyncStatus::Started);

    // Wait until the worker has taken the first request off the queue.
    let lease_taken = async {
        while harness.db.lock_store().lease("PROVIDER_DATA_SYNC_LOCK").await?.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<(), Error>(())
    };
    tokio::time::timeout(Duration::from_secs(5), lease_taken)
        .await
        .map_err(|e| Error::Unknown(e.to_string()))??;

    let queued: Vec<_> = [handle.trigger().await, handle.trigger().await].into();
    let rejected = handle.trigger().await;

    assert!(queued.iter().all(|r| r.status == SyncStatus::Queued && !r.started));
    assert_eq!(rejected.status, SyncStatus::Rejected);
    assert_eq!(rejected.message, REJECTED_MESSAGE);
    assert!(!rejected.started);

    harness.registry.release(3);
    drop(handle);
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .map_err(|e| Error::Unknown(e.to_string()))?
        .map_err(|e| Error::Unknown(e.to_string()))?;

    assert_eq!(harness.db.firms().find_all().await?.len(), 1);
    assert!(harness.db.watermarks().last_success().await?.is_some());
    Ok(())
}
