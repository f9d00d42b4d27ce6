//! Provider Data registry client and snapshot parsing.
//!
//! The registry serves one flat list of office rows, each carrying its
//! owning firm's details:
//!
//! ```json
//! { "offices": [ { "firmNumber": "12345", "firmName": "Acme Legal",
//!                  "firmType": "Legal Services Provider", "parentFirmNumber": null,
//!                  "officeAccountNo": "1A001L", "officeAddressLine1": "1 High St", ... } ] }
//! ```
//!
//! Rows are folded into firm and office records by [`ProviderSnapshot::from_rows`],
//! which also applies the integrity pre-pass.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::{
    config::RegistryConfig,
    domain::{Address, RemoteFirmRecord, RemoteOfficeRecord},
    Error, Result,
};

/// Path of the snapshot endpoint, relative to the registry base URL.
pub const SNAPSHOT_PATH: &str = "/api/v1/provider-offices/snapshot";

/// Header carrying the registry API key.
pub const AUTH_HEADER: &str = "x-authorization";

// ═══════════════════════════════════════════════════════════════════════════
// WIRE FORMAT
// ═══════════════════════════════════════════════════════════════════════════

/// One row of the snapshot as served by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    #[serde(default, deserialize_with = "lenient_string")]
    pub firm_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub firm_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub firm_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub parent_firm_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub office_account_no: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub office_address_line1: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub office_address_line2: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub office_address_line3: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub office_address_city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub office_address_postcode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    offices: Option<Vec<SnapshotRow>>,
}

/// Codes sometimes arrive as JSON numbers.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Parse the registry response body.
pub fn parse_snapshot(body: &str) -> Result<Vec<SnapshotRow>> {
    let envelope: SnapshotEnvelope = serde_json::from_str(body)?;
    envelope
        .offices
        .ok_or_else(|| Error::ParseError("Expected 'offices' array in response".to_string()))
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ═══════════════════════════════════════════════════════════════════════════
// SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════

/// Firms and offices as the registry currently sees them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSnapshot {
    pub firms: Vec<RemoteFirmRecord>,
    pub offices: Vec<RemoteOfficeRecord>,
    /// Anomalies removed by the integrity pre-pass.
    pub integrity_warnings: Vec<String>,
}

impl ProviderSnapshot {
    /// Fold rows into records.
    ///
    /// - The first row for a firm number defines the firm.
    /// - The first row for an office code defines the office.
    /// - Offices with no firm number are dropped.
    /// - Firms left without any office are dropped, so locally they go
    ///   through the disable path.
    pub fn from_rows(rows: &[SnapshotRow]) -> Self {
        let mut firms: Vec<RemoteFirmRecord> = Vec::new();
        let mut firm_index: HashSet<String> = HashSet::new();
        let mut offices: Vec<RemoteOfficeRecord> = Vec::new();
        let mut office_index: HashSet<String> = HashSet::new();
        let mut orphan_offices = 0_usize;

        for row in rows {
            let office_code = non_blank(row.office_account_no.as_ref());
            let Some(firm_number) = non_blank(row.firm_number.as_ref()) else {
                if office_code.is_some() {
                    orphan_offices += 1;
                }
                continue;
            };

            if firm_index.insert(firm_number.clone()) {
                firms.push(RemoteFirmRecord {
                    firm_number: firm_number.clone(),
                    name: row.firm_name.as_deref().map_or_else(String::new, |n| n.trim().to_string()),
                    firm_type_label: row.firm_type.clone().unwrap_or_default(),
                    parent_firm_number: row.parent_firm_number.clone(),
                });
            }

            if let Some(code) = office_code {
                if office_index.insert(code.clone()) {
                    offices.push(RemoteOfficeRecord {
                        account_number: code,
                        firm_number,
                        address: Address::from_raw(
                            row.office_address_line1.as_deref(),
                            row.office_address_line2.as_deref(),
                            row.office_address_line3.as_deref(),
                            row.office_address_city.as_deref(),
                            row.office_address_postcode.as_deref(),
                        ),
                    });
                } else {
                    tracing::debug!(office_code = %code, "Duplicate office row ignored");
                }
            }
        }

        let mut offices_per_firm: HashMap<&str, usize> = HashMap::new();
        for office in &offices {
            *offices_per_firm.entry(office.firm_number.as_str()).or_default() += 1;
        }
        let before = firms.len();
        let firms: Vec<RemoteFirmRecord> = firms
            .into_iter()
            .filter(|f| offices_per_firm.contains_key(f.firm_number.as_str()))
            .collect();
        let firms_without_offices = before - firms.len();

        let mut integrity_warnings = Vec::new();
        if orphan_offices > 0 {
            integrity_warnings.push(format!("Removed {orphan_offices} orphan offices"));
        }
        if firms_without_offices > 0 {
            integrity_warnings.push(format!("Removed {firms_without_offices} firms without offices"));
        }

        tracing::debug!(
            rows = rows.len(),
            firms = firms.len(),
            offices = offices.len(),
            orphan_offices,
            firms_without_offices,
            "Snapshot folded"
        );

        Self {
            firms,
            offices,
            integrity_warnings,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRY CLIENTS
// ═══════════════════════════════════════════════════════════════════════════

/// Source of provider snapshots.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<ProviderSnapshot>;
}

/// Registry client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProviderRegistry {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpProviderRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| Error::RegistryError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{SNAPSHOT_PATH}", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ProviderRegistry for HttpProviderRegistry {
    async fn fetch_snapshot(&self) -> Result<ProviderSnapshot> {
        tracing::debug!(url = %self.url, "Fetching provider snapshot");

        let mut request = self.client.get(&self.url);
        if !self.api_key.is_empty() {
            request = request.header(AUTH_HEADER, &self.api_key);
        }

        let body = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::RegistryError(format!("Snapshot request failed: {e}")))?
            .text()
            .await
            .map_err(|e| Error::RegistryError(format!("Snapshot body unreadable: {e}")))?;

        let rows = parse_snapshot(&body)?;
        Ok(ProviderSnapshot::from_rows(&rows))
    }
}

/// Registry client reading a snapshot file from disk.
#[derive(Debug, Clone)]
pub struct LocalFileProviderRegistry {
    path: PathBuf,
}

impl LocalFileProviderRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProviderRegistry for LocalFileProviderRegistry {
    async fn fetch_snapshot(&self) -> Result<ProviderSnapshot> {
        tracing::debug!(path = %self.path.display(), "Loading provider snapshot from file");

        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to read snapshot file {}: {e}",
                self.path.display()
            ))
        })?;

        let rows = parse_snapshot(&body)?;
        Ok(ProviderSnapshot::from_rows(&rows))
    }
}

/// Build the registry client selected by `config`.
pub fn registry_from_config(config: &RegistryConfig) -> Result<Arc<dyn ProviderRegistry>> {
    if config.use_local_file {
        Ok(Arc::new(LocalFileProviderRegistry::new(&config.local_file_path)))
    } else {
        Ok(Arc::new(HttpProviderRegistry::new(config)?))
    }
}
