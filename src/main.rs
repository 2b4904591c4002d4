use anyhow::Result;
use log::error;

use solarmax_bridge::prelude::Options;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    if let Err(e) = solarmax_bridge::run(options).await {
        error!("Application error: {}", e);
        eprintln!("Application error: {}", e);
        std::process::exit(255);
    }

    Ok(())
}
