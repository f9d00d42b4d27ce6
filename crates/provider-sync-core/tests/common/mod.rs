//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use provider_sync_core::{
    command::SyncContext,
    config::SyncConfig,
    db::Database,
    domain::{Address, Firm, Office, RemoteFirmRecord, RemoteOfficeRecord},
    lock::DistributedLockService,
    scheduler::SyncScheduler,
    snapshot::{ProviderRegistry, ProviderSnapshot},
    Error, Result,
};
use tokio::sync::{RwLock, Semaphore};

/// Registry whose snapshot the test can replace between runs.
#[derive(Default)]
pub struct ScriptedRegistry {
    snapshot: RwLock<ProviderSnapshot>,
    gate: Option<Semaphore>,
}

impl ScriptedRegistry {
    /// A registry that blocks every fetch until [`Self::release`] hands out a permit.
    pub fn gated() -> Self {
        Self {
            snapshot: RwLock::default(),
            gate: Some(Semaphore::new(0)),
        }
    }

    pub async fn set(&self, snapshot: ProviderSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(fetches);
        }
    }
}

#[async_trait]
impl ProviderRegistry for ScriptedRegistry {
    async fn fetch_snapshot(&self) -> Result<ProviderSnapshot> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Unknown(e.to_string()))?
                .forget();
        }
        Ok(self.snapshot.read().await.clone())
    }
}

pub struct Harness {
    pub db: Database,
    pub registry: Arc<ScriptedRegistry>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        Self::with_registry(ScriptedRegistry::default()).await
    }

    pub async fn with_registry(registry: ScriptedRegistry) -> Result<Self> {
        Ok(Self {
            db: Database::in_memory().await?,
            registry: Arc::new(registry),
        })
    }

    pub fn context(&self) -> SyncContext {
        SyncContext::new(
            Arc::new(self.db.firms()),
            Arc::new(self.db.offices()),
            Arc::new(self.db.user_profiles()),
        )
    }

    pub fn scheduler(&self, config: SyncConfig, holder: &str) -> SyncScheduler {
        SyncScheduler::new(
            config,
            self.context(),
            self.registry.clone(),
            Arc::new(DistributedLockService::new(
                Arc::new(self.db.lock_store()),
                holder,
            )),
            Arc::new(self.db.watermarks()),
        )
    }

    pub async fn firm(&self, code: &str) -> Result<Firm> {
        use provider_sync_core::repository::FirmRepository;
        self.db
            .firms()
            .find_by_code(code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("firm {code}")))
    }

    pub async fn office(&self, code: &str) -> Result<Office> {
        use provider_sync_core::repository::OfficeRepository;
        self.db
            .offices()
            .find_by_code(code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("office {code}")))
    }
}

pub fn firm(code: &str, name: &str, label: &str, parent: Option<&str>) -> RemoteFirmRecord {
    RemoteFirmRecord {
        firm_number: code.to_string(),
        name: name.to_string(),
        firm_type_label: label.to_string(),
        parent_firm_number: parent.map(str::to_string),
    }
}

pub fn office(code: &str, firm: &str, line1: &str) -> RemoteOfficeRecord {
    RemoteOfficeRecord {
        account_number: code.to_string(),
        firm_number: firm.to_string(),
        address: Address::from_raw(Some(line1), None, None, Some("London"), Some("SW1A 1AA")),
    }
}

pub fn snapshot(firms: Vec<RemoteFirmRecord>, offices: Vec<RemoteOfficeRecord>) -> ProviderSnapshot {
    ProviderSnapshot {
        firms,
        offices,
        integrity_warnings: Vec::new(),
    }
}
