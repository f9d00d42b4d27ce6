use anyhow::Result;
use provider_sync_core::watermark::WatermarkStore;

use crate::app::App;

pub async fn handle(app: &App) -> Result<()> {
    match app.db.watermarks().last_success().await? {
        Some(at) => println!("Last successful sync: {}", at.to_rfc3339()),
        None => println!("No successful sync recorded"),
    }
    Ok(())
}
