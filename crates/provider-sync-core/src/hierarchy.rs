//! Parent/child firm rules.
//!
//! Hierarchies are at most one level deep: a parent never has a parent of
//! its own, and a firm that already heads other firms is never placed
//! under someone else. Advocates never act as parents.

use crate::domain::{Firm, FirmId};

/// Outcome of a proposed parent change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentDecision {
    /// Link the child to this firm.
    Accept(FirmId),
    /// Leave the child's parent unchanged and record the warning.
    Reject(String),
}

impl ParentDecision {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

/// Decide whether `child_code` may be placed under `proposed_code`.
///
/// `proposed` is the firm the code resolved to, if any. A disabled firm only
/// resolves when `parent_listed` says the registry still carries it, since
/// it is re-enabled later in the same run. `child_has_children` reports
/// whether the child currently heads other firms.
pub fn validate_parent(
    child_code: &str,
    proposed_code: &str,
    proposed: Option<&Firm>,
    child_has_children: bool,
    parent_listed: bool,
) -> ParentDecision {
    let Some(parent) = proposed.filter(|p| p.enabled || parent_listed) else {
        return ParentDecision::Reject(format!(
            "Parent firm {proposed_code} not found for firm {child_code}"
        ));
    };

    if parent.code == child_code {
        return ParentDecision::Reject(format!("Firm {child_code} cannot be its own parent"));
    }

    if !parent.firm_type.can_be_parent() {
        return ParentDecision::Reject(format!(
            "Parent firm {proposed_code} is ADVOCATE type and cannot be a parent for firm {child_code}"
        ));
    }

    if parent.parent_id.is_some() {
        return ParentDecision::Reject(format!(
            "Parent firm {proposed_code} already has parent - multi-level hierarchy not allowed for firm {child_code}"
        ));
    }

    if child_has_children {
        return ParentDecision::Reject(format!(
            "Firm {child_code} has child firms - multi-level hierarchy not allowed under parent firm {proposed_code}"
        ));
    }

    ParentDecision::Accept(parent.id)
}
