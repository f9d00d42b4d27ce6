use std::{sync::Arc, time::Duration};

use anyhow::Result;
use provider_sync_core::{
    lock::DistributedLock,
    shutdown::{signal_channels, ShutdownCoordinator},
    worker::{ManualSyncHandle, ManualSyncWorker},
};

use crate::app::App;

pub async fn handle(app: &App) -> Result<()> {
    // Past this deadline shutdown only logs and keeps waiting: the worker and
    // scheduler may be mid-run, and a run is never cancelled once started.
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(
        u64::try_from(app.config.sync.lock_ttl_secs).unwrap_or(0).max(30),
    ));
    let (mut sigint, mut sigterm) = signal_channels()?;

    let (handle, worker) =
        ManualSyncWorker::spawn(Arc::clone(&app.scheduler), app.config.worker.queue_capacity);
    coordinator.register_run_task(worker).await;

    let scheduler = Arc::clone(&app.scheduler);
    let shutdown = coordinator.subscribe();
    coordinator
        .register_run_task(tokio::spawn(async move { scheduler.run(shutdown).await }))
        .await;

    let trigger = spawn_manual_trigger(handle)?;

    tracing::info!(holder = %app.lock.holder(), "provider-sync serving");
    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating shutdown..."),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating shutdown..."),
    }

    // Dropping the last handle lets the worker drain its queue and stop.
    trigger.abort();
    let _ = trigger.await;
    coordinator.shutdown().await;
    Ok(())
}

/// Submit a manual sync for every SIGUSR1.
#[cfg(unix)]
fn spawn_manual_trigger(handle: ManualSyncHandle) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    Ok(tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            let response = handle.trigger().await;
            tracing::info!(
                status = %response.status,
                started = response.started,
                "{}",
                response.message
            );
        }
    }))
}

#[cfg(not(unix))]
fn spawn_manual_trigger(handle: ManualSyncHandle) -> Result<tokio::task::JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        let _handle = handle;
        std::future::pending::<()>().await;
    }))
}
