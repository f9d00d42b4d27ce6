use anyhow::Result;
use provider_sync_core::scheduler::CycleOutcome;

use crate::app::App;

pub async fn handle(app: &App) -> Result<()> {
    match app.scheduler.run_cycle().await {
        CycleOutcome::Disabled => {
            println!("Provider data sync is disabled (sync.polling_enabled = false)");
        }
        CycleOutcome::Skipped => println!("Another instance holds the sync lock; nothing done"),
        CycleOutcome::Completed(result) => {
            println!(
                "Sync completed: {} change(s), {} warning(s), {} error(s)",
                result.total_changes(),
                result.warnings.len(),
                result.errors.len()
            );
            for error in &result.errors {
                println!("  error: {error}");
            }
            for warning in &result.warnings {
                println!("  warning: {warning}");
            }
        }
        CycleOutcome::Failed { reason } => anyhow::bail!("Provider data sync failed: {reason}"),
    }
    Ok(())
}
