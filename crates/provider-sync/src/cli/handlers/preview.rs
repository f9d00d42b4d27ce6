use anyhow::Result;
use clap::ArgMatches;
use provider_sync_core::reconcile::SyncPlan;

use crate::app::App;

pub async fn handle(app: &App, matches: &ArgMatches) -> Result<()> {
    let plan = app.scheduler.preview().await?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", render(&plan));
    }
    Ok(())
}

fn render(plan: &SyncPlan) -> String {
    let mut out = String::new();
    let sections = [
        ("Firms to create", &plan.firms_to_create),
        ("Firms to update", &plan.firms_to_update),
        ("Firms to disable", &plan.firms_to_disable),
        ("Firms to re-enable", &plan.firms_to_enable),
        ("Offices to create", &plan.offices_to_create),
        ("Offices to update", &plan.offices_to_update),
        ("Offices to delete", &plan.offices_to_delete),
    ];
    for (title, codes) in sections {
        out.push_str(&format!("{title}: {}\n", codes.len()));
        for code in codes {
            out.push_str(&format!("  {code}\n"));
        }
    }
    out.push_str(&format!("Firms unchanged: {}\n", plan.firms_unchanged));
    if !plan.warnings.is_empty() {
        out.push_str("Warnings:\n");
        for warning in &plan.warnings {
            out.push_str(&format!("  {warning}\n"));
        }
    }
    out
}
