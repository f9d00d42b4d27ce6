//! Mutation commands produced by reconciliation.
//!
//! Each command re-reads the state it needs when it executes instead of
//! trusting the snapshot taken at diff time. Earlier commands in the same run
//! (firm creates before parent wiring, for instance) are therefore always
//! visible to later ones.
//!
//! `execute` never fails. A failing command records one error entry naming
//! the operation and business code, and the run moves on.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Serialize;

use crate::{
    domain::{FirmType, NewFirm, NewOffice, Office, RemoteFirmRecord, RemoteOfficeRecord},
    hierarchy::{validate_parent, ParentDecision},
    repository::{FirmRepository, OfficeRepository, UserProfileRepository},
    Error, Result, SyncResult,
};

/// Repositories a command may touch, plus the firm codes the current
/// registry snapshot carries.
#[derive(Clone)]
pub struct SyncContext {
    pub firms: Arc<dyn FirmRepository>,
    pub offices: Arc<dyn OfficeRepository>,
    pub user_profiles: Arc<dyn UserProfileRepository>,
    listed_firms: Arc<HashSet<String>>,
}

impl SyncContext {
    pub fn new(
        firms: Arc<dyn FirmRepository>,
        offices: Arc<dyn OfficeRepository>,
        user_profiles: Arc<dyn UserProfileRepository>,
    ) -> Self {
        Self {
            firms,
            offices,
            user_profiles,
            listed_firms: Arc::default(),
        }
    }

    /// Scope the context to one run over a snapshot listing `codes`.
    pub fn with_listed_firms(mut self, codes: impl IntoIterator<Item = String>) -> Self {
        self.listed_firms = Arc::new(codes.into_iter().collect());
        self
    }

    /// Whether the registry snapshot of this run carries firm `code`.
    pub fn is_listed(&self, code: &str) -> bool {
        self.listed_firms.contains(code)
    }
}

/// Discriminant of a [`Command`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    CreateFirm,
    UpdateFirm,
    DisableFirm,
    EnableFirm,
    CreateOffice,
    UpdateOffice,
    DeleteOffice,
    DeactivateOffice,
    DeleteFirm,
}

/// One mutation against local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Insert a firm. Never wires a parent.
    CreateFirm(RemoteFirmRecord),
    /// Bring name and parent in line with the registry.
    UpdateFirm(RemoteFirmRecord),
    /// Soft-disable a firm and detach it from its hierarchy.
    DisableFirm { code: String },
    EnableFirm { code: String },
    CreateOffice(RemoteOfficeRecord),
    /// Bring address and owning firm in line with the registry.
    UpdateOffice(RemoteOfficeRecord),
    /// Remove user associations, then the office.
    DeleteOffice { code: String },
    /// Report what deleting the office would remove, without writing.
    DeactivateOffice { code: String },
    /// Remove a firm outright: user associations, then its offices, then the
    /// firm row. Reserved for firms left without any office after a run.
    DeleteFirm { code: String },
}

impl Command {
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::CreateFirm(_) => CommandKind::CreateFirm,
            Self::UpdateFirm(_) => CommandKind::UpdateFirm,
            Self::DisableFirm { .. } => CommandKind::DisableFirm,
            Self::EnableFirm { .. } => CommandKind::EnableFirm,
            Self::CreateOffice(_) => CommandKind::CreateOffice,
            Self::UpdateOffice(_) => CommandKind::UpdateOffice,
            Self::DeleteOffice { .. } => CommandKind::DeleteOffice,
            Self::DeactivateOffice { .. } => CommandKind::DeactivateOffice,
            Self::DeleteFirm { .. } => CommandKind::DeleteFirm,
        }
    }

    /// Business code of the firm or office this command targets.
    pub fn code(&self) -> &str {
        match self {
            Self::CreateFirm(record) | Self::UpdateFirm(record) => &record.firm_number,
            Self::CreateOffice(record) | Self::UpdateOffice(record) => &record.account_number,
            Self::DisableFirm { code }
            | Self::EnableFirm { code }
            | Self::DeleteOffice { code }
            | Self::DeactivateOffice { code }
            | Self::DeleteFirm { code } => code,
        }
    }

    /// One-line description including the registry values being applied.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateFirm(record) => format!(
                "{self}: '{}' ({})",
                record.name,
                record.firm_type_label.trim()
            ),
            Self::UpdateFirm(record) => match record.requested_parent() {
                Some(parent) => format!("{self}: '{}' under {parent}", record.name),
                None => format!("{self}: '{}' without parent", record.name),
            },
            Self::CreateOffice(record) | Self::UpdateOffice(record) => {
                format!("{self} for firm {}", record.firm_number)
            }
            Self::DisableFirm { .. }
            | Self::EnableFirm { .. }
            | Self::DeleteOffice { .. }
            | Self::DeactivateOffice { .. }
            | Self::DeleteFirm { .. } => self.to_string(),
        }
    }

    /// Run the command, recording its outcome in `result`.
    pub async fn execute(&self, ctx: &SyncContext, result: &mut SyncResult) {
        let outcome = match self {
            Self::CreateFirm(record) => create_firm(ctx, record, result).await,
            Self::UpdateFirm(record) => update_firm(ctx, record, result).await,
            Self::DisableFirm { code } => disable_firm(ctx, code, result).await,
            Self::EnableFirm { code } => enable_firm(ctx, code, result).await,
            Self::CreateOffice(record) => create_office(ctx, record, result).await,
            Self::UpdateOffice(record) => update_office(ctx, record, result).await,
            Self::DeleteOffice { code } => delete_office(ctx, code, result).await,
            Self::DeactivateOffice { code } => deactivate_office(ctx, code, result).await,
            Self::DeleteFirm { code } => delete_firm(ctx, code, result).await,
        };

        if let Err(e) = outcome {
            result.add_error(format!("Failed to {self}: {e}"));
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        match self.kind() {
            CommandKind::CreateFirm => write!(f, "create firm {code}"),
            CommandKind::UpdateFirm => write!(f, "update firm {code}"),
            CommandKind::DisableFirm => write!(f, "disable firm {code}"),
            CommandKind::EnableFirm => write!(f, "enable firm {code}"),
            CommandKind::CreateOffice => write!(f, "create office {code}"),
            CommandKind::UpdateOffice => write!(f, "update office {code}"),
            CommandKind::DeleteOffice => write!(f, "delete office {code}"),
            CommandKind::DeactivateOffice => write!(f, "deactivate office {code}"),
            CommandKind::DeleteFirm => write!(f, "delete firm {code}"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FIRMS
// ═══════════════════════════════════════════════════════════════════════════

async fn create_firm(
    ctx: &SyncContext,
    record: &RemoteFirmRecord,
    result: &mut SyncResult,
) -> Result<()> {
    let firm_type = FirmType::parse_label(&record.firm_type_label)?;
    let new_firm = NewFirm {
        code: record.firm_number.clone(),
        name: record.name.clone(),
        firm_type,
    };

    match ctx.firms.insert(new_firm.clone()).await {
        Ok(firm) => {
            tracing::debug!(firm_code = %firm.code, firm_id = %firm.id, "Firm created");
        }
        Err(Error::DuplicateName { .. }) => {
            let fallback = format!("{} ({})", record.name, record.firm_number);
            let firm = ctx
                .firms
                .insert(NewFirm {
                    name: fallback.clone(),
                    ..new_firm
                })
                .await?;
            result.add_warning(format!(
                "Duplicate firm name '{}' for firm {} - created as '{fallback}'",
                record.name, firm.code
            ));
        }
        Err(e) => return Err(e),
    }

    result.firms_created += 1;
    Ok(())
}

async fn update_firm(
    ctx: &SyncContext,
    record: &RemoteFirmRecord,
    result: &mut SyncResult,
) -> Result<()> {
    let code = &record.firm_number;
    let mut firm = ctx
        .firms
        .find_by_code(code)
        .await?
        .ok_or_else(|| Error::NotFound(format!("firm {code}")))?;

    if record.firm_type_label.trim().is_empty() {
        return Err(Error::ValidationError("firmType is empty or null".to_string()));
    }
    let remote_type = FirmType::parse_label(&record.firm_type_label)?;
    if remote_type != firm.firm_type {
        result.add_warning(format!(
            "CRITICAL: Firm {code} type change rejected: {} -> {remote_type}",
            firm.firm_type
        ));
        return Ok(());
    }

    let mut updated = false;

    if record.name != firm.name {
        match ctx.firms.find_by_name(&record.name).await? {
            Some(holder) if holder.id != firm.id => {
                result.add_warning(format!(
                    "Duplicate firm name '{}' for firm {code} - name update skipped",
                    record.name
                ));
            }
            _ => {
                tracing::debug!(firm_code = %code, from = %firm.name, to = %record.name, "Firm renamed");
                firm.name.clone_from(&record.name);
                updated = true;
            }
        }
    }

    let current_parent = match firm.parent_id {
        Some(id) => ctx.firms.find_by_id(id).await?,
        None => None,
    };
    let current_parent_code = current_parent.as_ref().map(|p| p.code.as_str());
    let requested = record.requested_parent();

    if requested.as_deref() != current_parent_code {
        match requested {
            None => {
                tracing::debug!(firm_code = %code, "Parent cleared");
                firm.parent_id = None;
                updated = true;
            }
            Some(parent_code) => {
                let proposed = ctx.firms.find_by_code(&parent_code).await?;
                let has_children = !ctx.firms.find_children(firm.id).await?.is_empty();
                let listed = ctx.is_listed(&parent_code);
                match validate_parent(code, &parent_code, proposed.as_ref(), has_children, listed) {
                    ParentDecision::Accept(parent_id) => {
                        tracing::debug!(firm_code = %code, parent_code = %parent_code, "Parent set");
                        firm.parent_id = Some(parent_id);
                        updated = true;
                    }
                    ParentDecision::Reject(warning) => result.add_warning(warning),
                }
            }
        }
    } else if firm.parent_id.is_some() && current_parent.is_none() {
        // Parent row vanished underneath us.
        firm.parent_id = None;
        updated = true;
    }

    if updated {
        ctx.firms.save(&firm).await?;
        result.firms_updated += 1;
    }
    Ok(())
}

async fn disable_firm(ctx: &SyncContext, code: &str, result: &mut SyncResult) -> Result<()> {
    let mut firm = ctx
        .firms
        .find_by_code(code)
        .await?
        .ok_or_else(|| Error::NotFound(format!("firm {code}")))?;

    if !firm.enabled {
        tracing::debug!(firm_code = %code, "Firm already disabled");
        return Ok(());
    }

    let children = ctx.firms.find_children(firm.id).await?;
    for mut child in children {
        child.parent_id = None;
        ctx.firms.save(&child).await?;
        tracing::debug!(firm_code = %code, child_code = %child.code, "Child detached from disabled parent");
    }

    firm.enabled = false;
    firm.parent_id = None;
    ctx.firms.save(&firm).await?;

    tracing::info!(firm_code = %code, "Firm disabled");
    result.firms_disabled += 1;
    Ok(())
}

async fn enable_firm(ctx: &SyncContext, code: &str, result: &mut SyncResult) -> Result<()> {
    let mut firm = ctx
        .firms
        .find_by_code(code)
        .await?
        .ok_or_else(|| Error::NotFound(format!("firm {code}")))?;

    // Counted even when already enabled; offices and users were never touched.
    firm.enabled = true;
    ctx.firms.save(&firm).await?;

    tracing::info!(firm_code = %code, "Firm reactivated");
    result.firms_reactivated += 1;
    Ok(())
}

async fn delete_firm(ctx: &SyncContext, code: &str, result: &mut SyncResult) -> Result<()> {
    let Some(firm) = ctx.firms.find_by_code(code).await? else {
        tracing::debug!(firm_code = %code, "Firm already gone");
        return Ok(());
    };

    // Each step must finish before the next; a failure leaves the rest in place.
    for office in ctx.offices.find_by_firm(firm.id).await? {
        let removed = detach_users(ctx, &office).await?;
        ctx.offices.delete(office.id).await?;
        tracing::debug!(firm_code = %code, office_code = %office.code, removed, "Office deleted with firm");
        result.offices_deleted += 1;
    }

    for mut child in ctx.firms.find_children(firm.id).await? {
        child.parent_id = None;
        ctx.firms.save(&child).await?;
    }

    ctx.firms.delete(firm.id).await?;
    tracing::info!(firm_code = %code, name = %firm.name, "Firm deleted");
    result.firms_deleted += 1;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// OFFICES
// ═══════════════════════════════════════════════════════════════════════════

async fn create_office(
    ctx: &SyncContext,
    record: &RemoteOfficeRecord,
    result: &mut SyncResult,
) -> Result<()> {
    let firm = ctx
        .firms
        .find_by_code(&record.firm_number)
        .await?
        .ok_or_else(|| Error::NotFound(format!("firm {}", record.firm_number)))?;

    let office = ctx
        .offices
        .insert(NewOffice {
            code: record.account_number.clone(),
            firm_id: firm.id,
            address: record.address.clone(),
        })
        .await?;

    tracing::debug!(office_code = %office.code, firm_code = %firm.code, "Office created");
    result.offices_created += 1;
    Ok(())
}

async fn update_office(
    ctx: &SyncContext,
    record: &RemoteOfficeRecord,
    result: &mut SyncResult,
) -> Result<()> {
    let code = &record.account_number;
    let mut office = ctx
        .offices
        .find_by_code(code)
        .await?
        .ok_or_else(|| Error::NotFound(format!("office {code}")))?;
    let firm = ctx
        .firms
        .find_by_code(&record.firm_number)
        .await?
        .ok_or_else(|| Error::NotFound(format!("firm {}", record.firm_number)))?;

    let mut updated = false;

    if office.firm_id != firm.id {
        let removed = detach_users(ctx, &office).await?;
        if removed > 0 {
            result.add_warning(format!(
                "Office {code} switched firms - removed {removed} user association(s)"
            ));
        }
        tracing::info!(office_code = %code, firm_code = %firm.code, removed, "Office reassigned");
        office.firm_id = firm.id;
        updated = true;
    }

    if office.address != record.address {
        office.address = record.address.clone();
        updated = true;
    }

    if updated {
        ctx.offices.save(&office).await?;
        result.offices_updated += 1;
    }
    Ok(())
}

async fn delete_office(ctx: &SyncContext, code: &str, result: &mut SyncResult) -> Result<()> {
    let Some(office) = ctx.offices.find_by_code(code).await? else {
        tracing::debug!(office_code = %code, "Office already gone");
        return Ok(());
    };

    // Associations first; a failure here must leave the office in place.
    let removed = detach_users(ctx, &office).await?;
    ctx.offices.delete(office.id).await?;

    tracing::info!(office_code = %code, removed, "Office deleted");
    result.offices_deleted += 1;
    Ok(())
}

async fn deactivate_office(ctx: &SyncContext, code: &str, result: &mut SyncResult) -> Result<()> {
    let Some(office) = ctx.offices.find_by_code(code).await? else {
        return Ok(());
    };

    let associations = ctx.user_profiles.find_by_office(office.id).await?.len();
    tracing::info!(office_code = %code, associations, "Office would be deleted");
    result.add_warning(format!(
        "Office {code} being deleted: {associations} user associations will be removed"
    ));
    Ok(())
}

/// Remove `office` from every profile that references it. Returns how many
/// profiles were changed.
async fn detach_users(ctx: &SyncContext, office: &Office) -> Result<usize> {
    let mut profiles = ctx.user_profiles.find_by_office(office.id).await?;
    if profiles.is_empty() {
        return Ok(0);
    }

    for profile in &mut profiles {
        profile.office_ids.remove(&office.id);
    }
    ctx.user_profiles.save_all(&profiles).await?;
    Ok(profiles.len())
}
