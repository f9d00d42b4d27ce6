use anyhow::Result;
use chrono::Utc;
use clap::ArgMatches;
use provider_sync_core::lock::DistributedLock;

use crate::app::App;

pub async fn handle(app: &App, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("status", sub_m)) => {
            let key = sub_m
                .get_one::<String>("key")
                .map_or(app.config.sync.lock_key.as_str(), String::as_str);
            status(app, key).await
        }
        _ => anyhow::bail!("Unknown lock subcommand. Run 'provider-sync lock --help' for usage."),
    }
}

async fn status(app: &App, key: &str) -> Result<()> {
    let Some(lease) = app.lock.lease(key).await? else {
        println!("{key}: free (never taken)");
        return Ok(());
    };

    let now = Utc::now();
    if lease.is_expired_at(now) {
        println!(
            "{key}: free (last held by {} until {})",
            lease.locked_by,
            lease.locked_until.to_rfc3339()
        );
    } else {
        let mine = if lease.locked_by == app.lock.holder() { " (this instance)" } else { "" };
        println!(
            "{key}: held by {}{mine} for another {}s",
            lease.locked_by,
            (lease.locked_until - now).num_seconds()
        );
    }
    Ok(())
}
