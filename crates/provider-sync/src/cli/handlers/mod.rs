mod lock;
mod preview;
mod serve;
mod sync;
mod watermark;

use std::path::PathBuf;

use anyhow::Result;
use clap::ArgMatches;
use provider_sync_core::config::load_config;

use crate::app::App;

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let config_path = matches.get_one::<PathBuf>("config");
    let config = load_config(config_path.map(PathBuf::as_path)).await?;
    let app = App::open(config).await?;

    match matches.subcommand() {
        Some(("sync", _)) => sync::handle(&app).await,
        Some(("serve", _)) => serve::handle(&app).await,
        Some(("preview", sub_m)) => preview::handle(&app, sub_m).await,
        Some(("lock", sub_m)) => lock::handle(&app, sub_m).await,
        Some(("watermark", _)) => watermark::handle(&app).await,
        _ => anyhow::bail!("Unknown command. Run 'provider-sync --help' for usage."),
    }
}
