//! Per-run accumulator for a synchronisation cycle.

use serde::Serialize;

/// Counts, warnings and errors collected across one reconciliation run.
///
/// A fresh value is created for every run and handed by `&mut` to each
/// command in turn. Nothing in it outlives the run except the summary that
/// gets logged. Offices have no disabled state, so there is no office
/// reactivation count; a returning office is counted as created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub firms_created: u32,
    pub firms_reactivated: u32,
    pub firms_updated: u32,
    pub firms_disabled: u32,
    pub firms_deleted: u32,
    pub offices_created: u32,
    pub offices_updated: u32,
    pub offices_deleted: u32,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::error!("{error}");
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Sum of every mutation counter.
    pub const fn total_changes(&self) -> u32 {
        self.firms_created
            + self.firms_reactivated
            + self.firms_updated
            + self.firms_disabled
            + self.firms_deleted
            + self.offices_created
            + self.offices_updated
            + self.offices_deleted
    }

    /// Log the run summary: one line of counts, then every error and warning.
    pub fn log_summary(&self) {
        tracing::info!(
            firms_created = self.firms_created,
            firms_updated = self.firms_updated,
            firms_disabled = self.firms_disabled,
            firms_reactivated = self.firms_reactivated,
            firms_deleted = self.firms_deleted,
            offices_created = self.offices_created,
            offices_updated = self.offices_updated,
            offices_deleted = self.offices_deleted,
            warnings = self.warnings.len(),
            errors = self.errors.len(),
            "Provider data sync summary"
        );
        for error in &self.errors {
            tracing::error!("Sync error: {error}");
        }
        for warning in &self.warnings {
            tracing::warn!("Sync warning: {warning}");
        }
    }
}
