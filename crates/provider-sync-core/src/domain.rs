//! Domain model: firms, offices, user-profile associations and the
//! read-only records of the upstream registry snapshot.
//!
//! Firms reference their parent by [`FirmId`] only. Children are resolved
//! through [`crate::repository::FirmRepository::find_children`] rather than
//! stored on the parent, so the parent/child graph has a single owner.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirmId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfficeId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserProfileId(pub i64);

impl fmt::Display for FirmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OfficeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FIRM
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of firm. Stored and displayed in SCREAMING_SNAKE form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirmType {
    LegalServicesProvider,
    Chambers,
    Advocate,
}

impl FirmType {
    /// Parse a registry label such as `"Legal Services Provider"`.
    ///
    /// Labels are upper-cased and spaces become underscores before matching,
    /// so `"Chambers"`, `"CHAMBERS"` and `"chambers"` are all accepted.
    pub fn parse_label(label: &str) -> Result<Self> {
        let normalized = label.trim().to_uppercase().replace(' ', "_");
        if normalized.is_empty() {
            return Err(Error::ParseError("firmType is empty or null".to_string()));
        }
        Self::from_str(&normalized)
            .map_err(|_| Error::ParseError(format!("Unknown firm type: '{label}'")))
    }

    /// Advocates are individual practitioners and never head a hierarchy.
    pub const fn can_be_parent(self) -> bool {
        !matches!(self, Self::Advocate)
    }
}

/// A firm as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firm {
    pub id: FirmId,
    pub code: String,
    pub name: String,
    pub firm_type: FirmType,
    pub enabled: bool,
    pub parent_id: Option<FirmId>,
}

/// A firm about to be inserted. Never carries a parent: hierarchy links are
/// wired by the update pass once every firm has an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFirm {
    pub code: String,
    pub name: String,
    pub firm_type: FirmType,
}

// ═══════════════════════════════════════════════════════════════════════════
// OFFICE
// ═══════════════════════════════════════════════════════════════════════════

/// Postal address. Every field is independent and optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub line3: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
}

impl Address {
    /// Build an address from raw registry fields, trimming each one and
    /// treating blank values as absent.
    pub fn from_raw(
        line1: Option<&str>,
        line2: Option<&str>,
        line3: Option<&str>,
        city: Option<&str>,
        postcode: Option<&str>,
    ) -> Self {
        Self {
            line1: empty_to_none(line1),
            line2: empty_to_none(line2),
            line3: empty_to_none(line3),
            city: empty_to_none(city),
            postcode: empty_to_none(postcode),
        }
    }
}

/// An office as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Office {
    pub id: OfficeId,
    pub code: String,
    pub firm_id: FirmId,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOffice {
    pub code: String,
    pub firm_id: FirmId,
    pub address: Address,
}

/// A user profile together with the offices it is associated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserProfileId,
    pub name: String,
    pub office_ids: BTreeSet<OfficeId>,
}

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE RECORDS
// ═══════════════════════════════════════════════════════════════════════════

/// A firm as described by the registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFirmRecord {
    pub firm_number: String,
    pub name: String,
    pub firm_type_label: String,
    pub parent_firm_number: Option<String>,
}

impl RemoteFirmRecord {
    /// The requested parent code after normalisation, see [`normalize_parent_code`].
    pub fn requested_parent(&self) -> Option<String> {
        normalize_parent_code(self.parent_firm_number.as_deref())
    }
}

/// An office as described by the registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteOfficeRecord {
    pub account_number: String,
    pub firm_number: String,
    pub address: Address,
}

/// Normalise an incoming parent firm code.
///
/// Missing, blank and the literal `"null"` (any case) all mean that no parent
/// is requested. Anything else is returned trimmed.
pub fn normalize_parent_code(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(value.to_string())
    }
}

fn empty_to_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
