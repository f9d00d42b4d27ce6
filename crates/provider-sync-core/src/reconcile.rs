//! Snapshot diff.
//!
//! Compares the remote snapshot against local state and emits the ordered
//! command list that brings local state in line. Nothing here touches
//! storage; the commands resolve what they need when they run.
//!
//! Firms are keyed by firm code and offices by office code. Office codes are
//! unique across all firms, so a reassigned office shows up as the same key
//! with a different owning firm.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use serde::Serialize;

use crate::{
    command::{Command, CommandKind},
    domain::{Firm, FirmId, FirmType, Office, RemoteFirmRecord, RemoteOfficeRecord},
};

/// Produce the command list for one run.
///
/// Block order is fixed: firm creates, firm updates, firm disables, firm
/// enables, office creates, office updates, office deletes. Within the update
/// block, firms whose requested parent is itself a root come first so parents
/// are settled before their children. Everything else is ordered by code.
pub fn reconcile(
    remote_firms: &[RemoteFirmRecord],
    remote_offices: &[RemoteOfficeRecord],
    local_firms_by_code: &HashMap<String, Firm>,
    local_offices_by_code: &HashMap<String, Office>,
) -> Vec<Command> {
    let remote_firms_by_code: HashMap<&str, &RemoteFirmRecord> = remote_firms
        .iter()
        .rev()
        .map(|f| (f.firm_number.as_str(), f))
        .collect();
    let remote_offices_by_code: HashMap<&str, &RemoteOfficeRecord> = remote_offices
        .iter()
        .rev()
        .map(|o| (o.account_number.as_str(), o))
        .collect();
    let local_firm_codes: HashMap<FirmId, &str> = local_firms_by_code
        .values()
        .map(|f| (f.id, f.code.as_str()))
        .collect();

    let mut commands = Vec::new();

    // ━━━ Firms ━━━

    let remote_sorted: Vec<&RemoteFirmRecord> = remote_firms_by_code
        .values()
        .copied()
        .sorted_by(|a, b| a.firm_number.cmp(&b.firm_number))
        .collect();

    let (new_firms, existing_firms): (Vec<&RemoteFirmRecord>, Vec<&RemoteFirmRecord>) =
        remote_sorted
            .iter()
            .copied()
            .partition(|f| !local_firms_by_code.contains_key(&f.firm_number));

    commands.extend(new_firms.iter().map(|f| Command::CreateFirm((*f).clone())));

    // New firms get parent wiring through an update once every create has run.
    let depths = requested_depths(&remote_firms_by_code);
    let updates = existing_firms
        .iter()
        .chain(new_firms.iter().filter(|f| f.requested_parent().is_some()))
        .sorted_by(|a, b| {
            let depth = |f: &RemoteFirmRecord| depths.get(f.firm_number.as_str()).copied();
            depth(a)
                .cmp(&depth(b))
                .then_with(|| a.firm_number.cmp(&b.firm_number))
        })
        .map(|f| Command::UpdateFirm((*f).clone()));
    commands.extend(updates);

    commands.extend(
        local_firms_by_code
            .values()
            .filter(|f| f.enabled && !remote_firms_by_code.contains_key(f.code.as_str()))
            .map(|f| f.code.clone())
            .sorted()
            .map(|code| Command::DisableFirm { code }),
    );

    commands.extend(
        existing_firms
            .iter()
            .filter(|f| {
                local_firms_by_code
                    .get(&f.firm_number)
                    .is_some_and(|local| !local.enabled)
            })
            .map(|f| Command::EnableFirm {
                code: f.firm_number.clone(),
            }),
    );

    // ━━━ Offices ━━━

    let offices_sorted: Vec<&RemoteOfficeRecord> = remote_offices_by_code
        .values()
        .copied()
        .sorted_by(|a, b| a.account_number.cmp(&b.account_number))
        .collect();

    commands.extend(
        offices_sorted
            .iter()
            .filter(|o| !local_offices_by_code.contains_key(&o.account_number))
            .map(|o| Command::CreateOffice((*o).clone())),
    );

    commands.extend(
        offices_sorted
            .iter()
            .filter(|o| {
                local_offices_by_code
                    .get(&o.account_number)
                    .is_some_and(|local| office_differs(o, local, &local_firm_codes))
            })
            .map(|o| Command::UpdateOffice((*o).clone())),
    );

    commands.extend(
        local_offices_by_code
            .keys()
            .filter(|code| !remote_offices_by_code.contains_key(code.as_str()))
            .sorted()
            .map(|code| Command::DeleteOffice { code: code.clone() }),
    );

    commands
}

/// Whether applying `remote` to `local` would change anything visible in the
/// snapshot fields. Duplicate-name and hierarchy rules may still turn the
/// update into a no-op at execution time.
pub fn firm_differs(
    remote: &RemoteFirmRecord,
    local: &Firm,
    local_parent_code: Option<&str>,
) -> bool {
    remote.name != local.name
        || remote.requested_parent().as_deref() != local_parent_code
        || FirmType::parse_label(&remote.firm_type_label).ok() != Some(local.firm_type)
}

fn office_differs(
    remote: &RemoteOfficeRecord,
    local: &Office,
    local_firm_codes: &HashMap<FirmId, &str>,
) -> bool {
    local_firm_codes.get(&local.firm_id).copied() != Some(remote.firm_number.as_str())
        || remote.address != local.address
}

/// Depth of each remote firm in the hierarchy it asks for: 0 for roots, 1 for
/// firms whose requested parent is a root, and so on. Cycles and parents
/// missing from the snapshot terminate the walk.
fn requested_depths<'a>(
    remote_by_code: &HashMap<&'a str, &'a RemoteFirmRecord>,
) -> HashMap<&'a str, usize> {
    remote_by_code
        .keys()
        .map(|&code| {
            let mut depth = 0;
            let mut seen = HashSet::from([code]);
            let mut current = code;
            while let Some(parent) = remote_by_code
                .get(current)
                .and_then(|f| f.requested_parent())
            {
                let Some((&parent_code, _)) = remote_by_code.get_key_value(parent.as_str()) else {
                    break;
                };
                if !seen.insert(parent_code) {
                    break;
                }
                depth += 1;
                current = parent_code;
            }
            (code, depth)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// PLAN
// ═══════════════════════════════════════════════════════════════════════════

/// Human-readable summary of a command list, used by preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Every command in execution order.
    pub commands: Vec<String>,
    pub firms_to_create: Vec<String>,
    pub firms_to_update: Vec<String>,
    pub firms_unchanged: usize,
    pub firms_to_disable: Vec<String>,
    pub firms_to_enable: Vec<String>,
    pub offices_to_create: Vec<String>,
    pub offices_to_update: Vec<String>,
    pub offices_to_delete: Vec<String>,
    pub warnings: Vec<String>,
}

impl SyncPlan {
    /// Summarise `commands` against the local state they were diffed from.
    pub fn from_commands(
        commands: &[Command],
        local_firms_by_code: &HashMap<String, Firm>,
    ) -> Self {
        let parent_codes: HashMap<FirmId, &str> = local_firms_by_code
            .values()
            .map(|f| (f.id, f.code.as_str()))
            .collect();
        let mut plan = Self::default();

        for command in commands {
            plan.commands.push(command.describe());
            let code = command.code().to_string();
            match command {
                Command::UpdateFirm(remote) => match local_firms_by_code.get(&remote.firm_number) {
                    Some(local) => {
                        let parent = local.parent_id.and_then(|id| parent_codes.get(&id).copied());
                        if firm_differs(remote, local, parent) {
                            plan.firms_to_update.push(code);
                        } else {
                            plan.firms_unchanged += 1;
                        }
                    }
                    // Parent wiring for a firm created in this run.
                    None => {}
                },
                _ => match command.kind() {
                    CommandKind::CreateFirm => plan.firms_to_create.push(code),
                    CommandKind::DisableFirm => plan.firms_to_disable.push(code),
                    CommandKind::EnableFirm => plan.firms_to_enable.push(code),
                    CommandKind::CreateOffice => plan.offices_to_create.push(code),
                    CommandKind::UpdateOffice => plan.offices_to_update.push(code),
                    CommandKind::DeleteOffice | CommandKind::DeactivateOffice => {
                        plan.offices_to_delete.push(code);
                    }
                    // Firm deletion is decided after execution, never planned.
                    CommandKind::UpdateFirm | CommandKind::DeleteFirm => {}
                },
            }
        }

        plan
    }

    /// Number of planned writes.
    pub fn total_changes(&self) -> usize {
        self.firms_to_create.len()
            + self.firms_to_update.len()
            + self.firms_to_disable.len()
            + self.firms_to_enable.len()
            + self.offices_to_create.len()
            + self.offices_to_update.len()
            + self.offices_to_delete.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{Address, OfficeId};

    use super::*;

    fn remote(code: &str, name: &str, parent: Option<&str>) -> RemoteFirmRecord {
        RemoteFirmRecord {
            firm_number: code.to_string(),
            name: name.to_string(),
            firm_type_label: "Chambers".to_string(),
            parent_firm_number: parent.map(str::to_string),
        }
    }

    fn remote_office(code: &str, firm: &str) -> RemoteOfficeRecord {
        RemoteOfficeRecord {
            account_number: code.to_string(),
            firm_number: firm.to_string(),
            address: Address::default(),
        }
    }

    fn local(id: i64, code: &str, name: &str, enabled: bool) -> (String, Firm) {
        (
            code.to_string(),
            Firm {
                id: FirmId(id),
                code: code.to_string(),
                name: name.to_string(),
                firm_type: FirmType::Chambers,
                enabled,
                parent_id: None,
            },
        )
    }

    fn local_office(id: i64, code: &str, firm: i64) -> (String, Office) {
        (
            code.to_string(),
            Office {
                id: OfficeId(id),
                code: code.to_string(),
                firm_id: FirmId(firm),
                address: Address::default(),
            },
        )
    }

    fn kinds(commands: &[Command]) -> Vec<(CommandKind, &str)> {
        commands.iter().map(|c| (c.kind(), c.code())).collect()
    }

    #[test]
    fn test_empty_local_state_creates_everything() {
        let commands = reconcile(
            &[remote("100", "Acme", None), remote("200", "Beta", Some("100"))],
            &[remote_office("A", "100"), remote_office("B", "200")],
            &HashMap::new(),
            &HashMap::new(),
        );

        assert_eq!(
            kinds(&commands),
            vec![
                (CommandKind::CreateFirm, "100"),
                (CommandKind::CreateFirm, "200"),
                (CommandKind::UpdateFirm, "200"),
                (CommandKind::CreateOffice, "A"),
                (CommandKind::CreateOffice, "B"),
            ]
        );
    }

    #[test]
    fn test_block_order() {
        let locals: HashMap<_, _> = [
            local(1, "100", "Acme", true),
            local(2, "300", "Gone", true),
            local(3, "400", "Back", false),
        ]
        .into_iter()
        .collect();
        let offices: HashMap<_, _> = [local_office(1, "A", 1), local_office(2, "Z", 2)]
            .into_iter()
            .collect();

        let commands = reconcile(
            &[
                remote("100", "Acme", None),
                remote("200", "New", None),
                remote("400", "Back", None),
            ],
            &[remote_office("A", "400"), remote_office("B", "200")],
            &locals,
            &offices,
        );

        assert_eq!(
            kinds(&commands),
            vec![
                (CommandKind::CreateFirm, "200"),
                (CommandKind::UpdateFirm, "100"),
                (CommandKind::UpdateFirm, "400"),
                (CommandKind::DisableFirm, "300"),
                (CommandKind::EnableFirm, "400"),
                (CommandKind::CreateOffice, "B"),
                (CommandKind::UpdateOffice, "A"),
                (CommandKind::DeleteOffice, "Z"),
            ]
        );
    }

    #[test]
    fn test_disabled_local_firm_missing_remotely_is_left_alone() {
        let locals: HashMap<_, _> = [local(1, "100", "Acme", false)].into_iter().collect();
        let commands = reconcile(&[], &[], &locals, &HashMap::new());
        assert!(commands.is_empty());
    }

    #[test]
    fn test_roots_updated_before_children() {
        let locals: HashMap<_, _> = [
            local(1, "A", "A", true),
            local(2, "B", "B", true),
            local(3, "C", "C", true),
        ]
        .into_iter()
        .collect();

        // C asks for B, B asks for A. A must settle before B before C.
        let commands = reconcile(
            &[remote("C", "C", Some("B")), remote("B", "B", Some("A")), remote("A", "A", None)],
            &[],
            &locals,
            &HashMap::new(),
        );

        assert_eq!(
            kinds(&commands),
            vec![
                (CommandKind::UpdateFirm, "A"),
                (CommandKind::UpdateFirm, "B"),
                (CommandKind::UpdateFirm, "C"),
            ]
        );
    }

    #[test]
    fn test_requested_parent_cycle_terminates() {
        let commands = reconcile(
            &[remote("A", "A", Some("B")), remote("B", "B", Some("A"))],
            &[],
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(commands.len(), 4);
    }

    #[test]
    fn test_unchanged_office_emits_nothing() {
        let locals: HashMap<_, _> = [local(1, "100", "Acme", true)].into_iter().collect();
        let offices: HashMap<_, _> = [local_office(1, "A", 1)].into_iter().collect();

        let commands = reconcile(
            &[remote("100", "Acme", None)],
            &[remote_office("A", "100")],
            &locals,
            &offices,
        );

        assert_eq!(kinds(&commands), vec![(CommandKind::UpdateFirm, "100")]);
    }

    #[test]
    fn test_first_remote_record_wins() {
        let commands = reconcile(
            &[remote("100", "First", None), remote("100", "Second", None)],
            &[],
            &HashMap::new(),
            &HashMap::new(),
        );

        assert_eq!(commands, vec![Command::CreateFirm(remote("100", "First", None))]);
    }

    #[test]
    fn test_firm_differs_normalises_type_label() {
        let (_, firm) = local(1, "100", "Acme", true);
        let mut record = remote("100", "Acme", Some("null"));
        record.firm_type_label = "chambers".to_string();
        assert!(!firm_differs(&record, &firm, None));

        record.firm_type_label = "Advocate".to_string();
        assert!(firm_differs(&record, &firm, None));
    }

    #[test]
    fn test_plan_summarises_commands() {
        let locals: HashMap<_, _> = [local(1, "100", "Acme", true), local(2, "300", "Old", true)]
            .into_iter()
            .collect();
        let commands = vec![
            Command::CreateFirm(remote("200", "New", None)),
            Command::UpdateFirm(remote("100", "Acme", None)),
            Command::UpdateFirm(remote("200", "New", Some("100"))),
            Command::DisableFirm {
                code: "300".to_string(),
            },
            Command::DeleteOffice {
                code: "Z".to_string(),
            },
        ];

        let plan = SyncPlan::from_commands(&commands, &locals);

        assert_eq!(plan.firms_to_create, vec!["200"]);
        assert!(plan.firms_to_update.is_empty());
        assert_eq!(plan.firms_unchanged, 1);
        assert_eq!(plan.firms_to_disable, vec!["300"]);
        assert_eq!(plan.offices_to_delete, vec!["Z"]);
        assert_eq!(plan.total_changes(), 3);
        assert_eq!(plan.commands.len(), 5);
        assert_eq!(plan.commands[0], "create firm 200: 'New' (Chambers)");
    }
}
