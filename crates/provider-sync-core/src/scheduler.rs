//! Sync cycle orchestration.
//!
//! A cycle is: check the polling flag, take the lease, fetch the snapshot,
//! diff, execute every command in order, give the lease back, record the
//! watermark. The lease is released on every path out of the cycle,
//! including a panic inside the reconciliation.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Instant,
};

use chrono::{Duration, Utc};
use futures::FutureExt;
use tokio::sync::broadcast;

use crate::{
    command::{Command, SyncContext},
    config::SyncConfig,
    domain::{Firm, FirmId, Office},
    lock::{with_lock, DistributedLock},
    reconcile::{reconcile, SyncPlan},
    shutdown::ShutdownSignal,
    snapshot::ProviderRegistry,
    watermark::WatermarkStore,
    Result, SyncResult,
};

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Polling is switched off; nothing was attempted.
    Disabled,
    /// Another instance holds the lease.
    Skipped,
    /// The run finished. Per-item errors may still be listed in the result.
    Completed(SyncResult),
    /// The run could not get going, typically because the snapshot fetch failed.
    Failed { reason: String },
}

pub struct SyncScheduler {
    config: SyncConfig,
    ctx: SyncContext,
    registry: Arc<dyn ProviderRegistry>,
    lock: Arc<dyn DistributedLock>,
    watermark: Arc<dyn WatermarkStore>,
}

impl SyncScheduler {
    pub fn new(
        config: SyncConfig,
        ctx: SyncContext,
        registry: Arc<dyn ProviderRegistry>,
        lock: Arc<dyn DistributedLock>,
        watermark: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            config,
            ctx,
            registry,
            lock,
            watermark,
        }
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn lock(&self) -> &dyn DistributedLock {
        self.lock.as_ref()
    }

    /// Run one guarded cycle. Never fails; the outcome says what happened.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if !self.config.polling_enabled {
            tracing::debug!("Provider data sync disabled, skipping cycle");
            return CycleOutcome::Disabled;
        }

        let ttl = Duration::seconds(self.config.lock_ttl_secs);
        let guarded = with_lock(self.lock.as_ref(), &self.config.lock_key, ttl, || {
            AssertUnwindSafe(self.synchronize()).catch_unwind()
        })
        .await;

        match guarded {
            None => {
                tracing::info!(
                    lock_key = %self.config.lock_key,
                    "Provider data sync already running on another instance, skipping"
                );
                CycleOutcome::Skipped
            }
            Some(Err(_panic)) => {
                tracing::error!("Provider data sync panicked");
                CycleOutcome::Failed {
                    reason: "sync panicked".to_string(),
                }
            }
            Some(Ok(Err(e))) => {
                tracing::error!(error = %e, "Provider data sync failed");
                CycleOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Some(Ok(Ok(result))) => {
                if let Err(e) = self.watermark.record_success(Utc::now()).await {
                    tracing::warn!(error = %e, "Failed to record sync watermark");
                }
                result.log_summary();
                CycleOutcome::Completed(result)
            }
        }
    }

    /// Fetch, diff and apply without touching the lease.
    ///
    /// Callers are responsible for mutual exclusion; [`Self::run_cycle`] is
    /// the guarded entry point.
    pub async fn synchronize(&self) -> Result<SyncResult> {
        let started = Instant::now();
        tracing::info!("Starting provider data sync");

        let snapshot = self.registry.fetch_snapshot().await?;
        let mut result = SyncResult::new();
        for warning in &snapshot.integrity_warnings {
            result.add_warning(warning.clone());
        }

        let (local_firms, local_offices) = self.load_local_state().await?;
        let commands = reconcile(
            &snapshot.firms,
            &snapshot.offices,
            &local_firms,
            &local_offices,
        );
        tracing::info!(
            remote_firms = snapshot.firms.len(),
            remote_offices = snapshot.offices.len(),
            commands = commands.len(),
            "Executing sync commands"
        );

        let ctx = self
            .ctx
            .clone()
            .with_listed_firms(snapshot.firms.iter().map(|f| f.firm_number.clone()));
        for command in &commands {
            command.execute(&ctx, &mut result).await;
        }

        // A firm may not outlive its last office, e.g. when every office
        // create for it failed above.
        match self.firms_without_offices().await {
            Ok(codes) => {
                for code in codes {
                    tracing::warn!(firm_code = %code, "Firm has no offices after sync, deleting");
                    Command::DeleteFirm { code }.execute(&ctx, &mut result).await;
                }
            }
            Err(e) => result.add_error(format!("Failed to check for firms without offices: {e}")),
        }

        tracing::info!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            changes = result.total_changes(),
            "Provider data sync finished"
        );
        Ok(result)
    }

    /// Diff without writing. Offices that would be deleted report their
    /// association impact as warnings.
    pub async fn preview(&self) -> Result<SyncPlan> {
        let snapshot = self.registry.fetch_snapshot().await?;
        let (local_firms, local_offices) = self.load_local_state().await?;
        let commands = reconcile(
            &snapshot.firms,
            &snapshot.offices,
            &local_firms,
            &local_offices,
        );

        let mut impact = SyncResult::new();
        for command in &commands {
            if let Command::DeleteOffice { code } = command {
                Command::DeactivateOffice { code: code.clone() }
                    .execute(&self.ctx, &mut impact)
                    .await;
            }
        }

        let mut plan = SyncPlan::from_commands(&commands, &local_firms);
        plan.warnings = snapshot
            .integrity_warnings
            .into_iter()
            .chain(impact.warnings)
            .chain(impact.errors)
            .collect();
        Ok(plan)
    }

    /// Run cycles on the configured interval until shutdown is signalled.
    ///
    /// The first cycle runs immediately when `run_on_startup` is set and
    /// after one interval otherwise. A cycle in progress is always allowed
    /// to finish.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        let period = std::time::Duration::from_secs(self.config.interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        if !self.config.run_on_startup {
            ticker.tick().await;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            run_on_startup = self.config.run_on_startup,
            "Sync scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Sync scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.run_cycle().await;
                    tracing::debug!(?outcome, "Scheduled cycle finished");
                }
            }
        }
    }

    /// Enabled firms that own no office. Disabled firms keep their row for a
    /// later re-enable and are left alone.
    async fn firms_without_offices(&self) -> Result<Vec<String>> {
        let owners: HashSet<FirmId> = self
            .ctx
            .offices
            .find_all()
            .await?
            .into_iter()
            .map(|o| o.firm_id)
            .collect();
        Ok(self
            .ctx
            .firms
            .find_all()
            .await?
            .into_iter()
            .filter(|f| f.enabled && !owners.contains(&f.id))
            .map(|f| f.code)
            .collect())
    }

    async fn load_local_state(&self) -> Result<(HashMap<String, Firm>, HashMap<String, Office>)> {
        let firms = self
            .ctx
            .firms
            .find_all()
            .await?
            .into_iter()
            .map(|f| (f.code.clone(), f))
            .collect();
        let offices = self
            .ctx
            .offices
            .find_all()
            .await?
            .into_iter()
            .map(|o| (o.code.clone(), o))
            .collect();
        Ok((firms, offices))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::{
        db::Database,
        domain::{Address, RemoteFirmRecord, RemoteOfficeRecord},
        lock::{DistributedLockService, LockStore},
        repository::{FirmRepository, OfficeRepository, UserProfileRepository},
        snapshot::ProviderSnapshot,
        Error,
    };

    use super::*;

    struct StaticRegistry {
        snapshot: ProviderSnapshot,
        fetches: AtomicUsize,
    }

    impl StaticRegistry {
        fn new(snapshot: ProviderSnapshot) -> Arc<Self> {
            Arc::new(Self {
                snapshot,
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderRegistry for StaticRegistry {
        async fn fetch_snapshot(&self) -> Result<ProviderSnapshot> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.clone())
        }
    }

    struct FailingRegistry;

    #[async_trait]
    impl ProviderRegistry for FailingRegistry {
        async fn fetch_snapshot(&self) -> Result<ProviderSnapshot> {
            Err(Error::RegistryError("connection refused".to_string()))
        }
    }

    struct PanickingRegistry;

    #[async_trait]
    impl ProviderRegistry for PanickingRegistry {
        async fn fetch_snapshot(&self) -> Result<ProviderSnapshot> {
            panic!("registry exploded");
        }
    }

    fn acme_snapshot() -> ProviderSnapshot {
        ProviderSnapshot {
            firms: vec![RemoteFirmRecord {
                firm_number: "12345".to_string(),
                name: "Acme Legal".to_string(),
                firm_type_label: "Legal Services Provider".to_string(),
                parent_firm_number: None,
            }],
            offices: vec![RemoteOfficeRecord {
                account_number: "1A001L".to_string(),
                firm_number: "12345".to_string(),
                address: Address::from_raw(Some("1 High St"), None, None, Some("Leeds"), None),
            }],
            integrity_warnings: Vec::new(),
        }
    }

    fn scheduler(
        db: &Database,
        config: SyncConfig,
        registry: Arc<dyn ProviderRegistry>,
        holder: &str,
    ) -> SyncScheduler {
        SyncScheduler::new(
            config,
            SyncContext::new(
                Arc::new(db.firms()),
                Arc::new(db.offices()),
                Arc::new(db.user_profiles()),
            ),
            registry,
            Arc::new(DistributedLockService::new(
                Arc::new(db.lock_store()),
                holder,
            )),
            Arc::new(db.watermarks()),
        )
    }

    #[tokio::test]
    async fn test_disabled_polling_does_nothing() -> Result<()> {
        let db = Database::in_memory().await?;
        let registry = StaticRegistry::new(acme_snapshot());
        let config = SyncConfig {
            polling_enabled: false,
            ..SyncConfig::default()
        };
        let scheduler = scheduler(&db, config, registry.clone(), "a");

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Disabled);
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(db.lock_store().lease("PROVIDER_DATA_SYNC_LOCK").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_completed_cycle_records_watermark_and_releases_lock() -> Result<()> {
        let db = Database::in_memory().await?;
        let scheduler = scheduler(
            &db,
            SyncConfig::default(),
            StaticRegistry::new(acme_snapshot()),
            "a",
        );

        let CycleOutcome::Completed(result) = scheduler.run_cycle().await else {
            return Err(Error::Unknown("cycle did not complete".to_string()));
        };

        assert_eq!(result.firms_created, 1);
        assert_eq!(result.offices_created, 1);
        assert!(result.warnings.is_empty());
        assert!(db.watermarks().last_success().await?.is_some());
        assert!(!scheduler.lock().is_held_elsewhere("PROVIDER_DATA_SYNC_LOCK").await);
        let lease = db.lock_store().lease("PROVIDER_DATA_SYNC_LOCK").await?;
        assert!(lease.is_some_and(|l| l.is_expired()));
        Ok(())
    }

    #[tokio::test]
    async fn test_held_lease_skips_without_fetch() -> Result<()> {
        let db = Database::in_memory().await?;
        let other = DistributedLockService::new(Arc::new(db.lock_store()), "other");
        assert!(other.acquire("PROVIDER_DATA_SYNC_LOCK", Duration::minutes(5)).await);

        let registry = StaticRegistry::new(acme_snapshot());
        let scheduler = scheduler(&db, SyncConfig::default(), registry.clone(), "a");

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(db.watermarks().last_success().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_watermark_untouched() -> Result<()> {
        let db = Database::in_memory().await?;
        let scheduler = scheduler(&db, SyncConfig::default(), Arc::new(FailingRegistry), "a");

        let outcome = scheduler.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Failed { reason } if reason.contains("connection refused")));
        assert_eq!(db.watermarks().last_success().await?, None);
        assert!(scheduler.lock.acquire("PROVIDER_DATA_SYNC_LOCK", Duration::minutes(1)).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_lock_released() -> Result<()> {
        let db = Database::in_memory().await?;
        let scheduler = scheduler(&db, SyncConfig::default(), Arc::new(PanickingRegistry), "a");

        let outcome = scheduler.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Failed { .. }));
        let other = DistributedLockService::new(Arc::new(db.lock_store()), "other");
        assert!(other.acquire("PROVIDER_DATA_SYNC_LOCK", Duration::minutes(1)).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_integrity_warnings_carried_into_result() -> Result<()> {
        let db = Database::in_memory().await?;
        let mut snapshot = acme_snapshot();
        snapshot.integrity_warnings = vec!["Removed 2 orphan offices".to_string()];
        let scheduler = scheduler(&db, SyncConfig::default(), StaticRegistry::new(snapshot), "a");

        let result = scheduler.synchronize().await?;

        assert_eq!(result.warnings, vec!["Removed 2 orphan offices"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_firm_left_without_offices_is_deleted() -> Result<()> {
        let db = Database::in_memory().await?;
        let mut orphaned = acme_snapshot();
        orphaned.offices[0].firm_number = "99999".to_string();
        let scheduler = scheduler(&db, SyncConfig::default(), StaticRegistry::new(orphaned), "a");

        let result = scheduler.synchronize().await?;

        assert_eq!(result.firms_created, 1);
        assert_eq!(result.firms_deleted, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("create office 1A001L"));
        assert_eq!(db.firms().find_by_code("12345").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() -> Result<()> {
        let db = Database::in_memory().await?;
        let scheduler = scheduler(
            &db,
            SyncConfig::default(),
            StaticRegistry::new(acme_snapshot()),
            "a",
        );

        let plan = scheduler.preview().await?;

        assert_eq!(plan.firms_to_create, vec!["12345"]);
        assert_eq!(plan.offices_to_create, vec!["1A001L"]);
        assert!(db.firms().find_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_preview_reports_office_delete_impact() -> Result<()> {
        let db = Database::in_memory().await?;
        let first = scheduler(
            &db,
            SyncConfig::default(),
            StaticRegistry::new(acme_snapshot()),
            "a",
        );
        first.synchronize().await?;
        let office = db
            .offices()
            .find_by_code("1A001L")
            .await?
            .ok_or_else(|| Error::NotFound("1A001L".to_string()))?;
        db.user_profiles().insert("alice", &[office.id]).await?;

        let mut moved = acme_snapshot();
        moved.offices[0].account_number = "2B002M".to_string();
        let second = scheduler(&db, SyncConfig::default(), StaticRegistry::new(moved), "a");
        let plan = second.preview().await?;

        assert_eq!(plan.offices_to_delete, vec!["1A001L"]);
        assert_eq!(plan.offices_to_create, vec!["2B002M"]);
        assert_eq!(
            plan.warnings,
            vec!["Office 1A001L being deleted: 1 user associations will be removed"]
        );
        assert!(db.offices().find_by_code("1A001L").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_on_startup_then_stop() -> Result<()> {
        let db = Database::in_memory().await?;
        let registry = StaticRegistry::new(acme_snapshot());
        let config = SyncConfig {
            run_on_startup: true,
            interval_secs: 3600,
            ..SyncConfig::default()
        };
        let scheduler = Arc::new(scheduler(&db, config, registry.clone(), "a"));
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run(rx).await }
        });
        while registry.fetches.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let _ = tx.send(ShutdownSignal::Graceful);

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .map_err(|e| Error::Unknown(e.to_string()))?
            .map_err(|e| Error::Unknown(e.to_string()))?;
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
