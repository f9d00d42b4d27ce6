//! Graceful shutdown for the long-running `serve` mode.
//!
//! SIGINT and SIGTERM are turned into a broadcast [`ShutdownSignal`]. The
//! scheduler loop stops taking new cycles when it sees one; a cycle already
//! running is left to finish, however long it takes.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Stop after the current cycle.
    Graceful,
    /// Graceful shutdown timed out.
    Force,
}

/// Broadcasts shutdown to registered tasks and waits for them.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    run_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
            run_tasks: Arc::new(Mutex::new(Vec::new())),
            shutdown_timeout,
        }
    }

    /// Receiver for components that loop until shutdown.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Track a task so shutdown waits for it. It is aborted if it outlives
    /// the timeout.
    pub async fn register_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().await.push(task);
    }

    /// Track a task that may be inside a sync run. Shutdown waits for it
    /// without a deadline and never aborts it.
    pub async fn register_run_task(&self, task: JoinHandle<()>) {
        self.run_tasks.lock().await.push(task);
    }

    /// Signal every subscriber, then wait up to the timeout for registered
    /// tasks. Stragglers are aborted, except run tasks, which are awaited to
    /// completion.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(ShutdownSignal::Graceful);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let runs = std::mem::take(&mut *self.run_tasks.lock().await);
        let abortable: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();

        let all = async move {
            for task in tasks.into_iter().chain(runs) {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Task ended abnormally during shutdown");
                }
            }
        };
        tokio::pin!(all);

        if tokio::time::timeout(self.shutdown_timeout, &mut all).await.is_err() {
            tracing::warn!("Shutdown timeout exceeded, forcing shutdown");
            let _ = self.shutdown_tx.send(ShutdownSignal::Force);
            for handle in &abortable {
                handle.abort();
            }
            tracing::info!("Waiting for the sync run in progress to finish");
            all.await;
        }
        tracing::info!("Shutdown completed");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Receivers that fire once on SIGINT and SIGTERM respectively.
pub fn signal_channels() -> Result<(broadcast::Receiver<()>, broadcast::Receiver<()>)> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::InvalidConfig(format!("Failed to setup SIGINT: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::InvalidConfig(format!("Failed to setup SIGTERM: {e}")))?;

        let (sigint_tx, sigint_rx) = broadcast::channel(1);
        let (sigterm_tx, sigterm_rx) = broadcast::channel(1);

        tokio::spawn(async move {
            let _ = sigint.recv().await;
            tracing::info!("Received SIGINT");
            let _ = sigint_tx.send(());
        });

        tokio::spawn(async move {
            let _ = sigterm.recv().await;
            tracing::info!("Received SIGTERM");
            let _ = sigterm_tx.send(());
        });

        Ok((sigint_rx, sigterm_rx))
    }

    #[cfg(not(unix))]
    {
        let (sigint_tx, sigint_rx) = broadcast::channel(1);
        let (sigterm_tx, sigterm_rx) = broadcast::channel(1);

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl-C");
            let _ = sigint_tx.send(());
            let _ = sigterm_tx.send(());
        });

        Ok((sigint_rx, sigterm_rx))
    }
}
