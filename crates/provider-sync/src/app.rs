//! Wiring shared by every subcommand.

use std::sync::Arc;

use provider_sync_core::{
    command::SyncContext,
    config::Config,
    db::Database,
    lock::{DistributedLock, DistributedLockService},
    scheduler::SyncScheduler,
    snapshot::registry_from_config,
    Result,
};

pub struct App {
    pub config: Config,
    pub db: Database,
    pub lock: Arc<DistributedLockService>,
    pub scheduler: Arc<SyncScheduler>,
}

impl App {
    /// Connect to the database and build the scheduler described by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let db = Database::connect(&config.database_url).await?;
        let store = Arc::new(db.lock_store());
        let lock = Arc::new(if config.lock.instance_id.trim().is_empty() {
            DistributedLockService::with_random_holder(store)
        } else {
            DistributedLockService::new(store, config.lock.instance_id.trim())
        });
        tracing::debug!(holder = %lock.holder(), "Lock identity");

        let ctx = SyncContext::new(
            Arc::new(db.firms()),
            Arc::new(db.offices()),
            Arc::new(db.user_profiles()),
        );
        let scheduler = Arc::new(SyncScheduler::new(
            config.sync.clone(),
            ctx,
            registry_from_config(&config.registry)?,
            lock.clone(),
            Arc::new(db.watermarks()),
        ));

        Ok(Self {
            config,
            db,
            lock,
            scheduler,
        })
    }
}
