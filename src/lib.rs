// Module declarations for the application's core components
pub mod config;   // Configuration management
pub mod error;    // Error types
pub mod options;  // Command line options parsing
pub mod poller;   // Periodic polling of each bus
pub mod prelude;  // Common imports and types
pub mod solarmax; // SolarMax protocol engine

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::poller::Poller;
use crate::prelude::*;
use std::time::Duration;

/// Initialise env_logger with the given default filter; `RUST_LOG` wins.
pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

/// Main application entry point
///
/// Starts one poller per enabled bus and waits for all of them to finish,
/// either after a single round (`--once`) or on the shutdown signal.
pub async fn app(shutdown_tx: broadcast::Sender<()>, options: Options) -> Result<()> {
    let config = Config::new(&options.config_file)?;

    init_logging(&config.loglevel);
    info!(
        "solarmax-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    let config = ConfigWrapper::from_config(config);
    let buses = config.enabled_buses();
    if buses.is_empty() {
        bail!("no enabled buses configured");
    }

    if let Some(secs) = options.runtime {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("Runtime limit of {}s reached", secs);
            let _ = shutdown_tx.send(());
        });
    }

    info!("Starting {} pollers...", buses.len());
    let handles: Vec<_> = buses
        .into_iter()
        .map(|bus| {
            let mut poller = Poller::new(bus, config.tables(), config.poll_interval());
            let shutdown_rx = shutdown_tx.subscribe();
            let once = options.once;
            tokio::spawn(async move { poller.start(shutdown_rx, once).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Poller failed: {}", e),
            Err(e) => error!("Error waiting for poller task: {}", e),
        }
    }

    info!("Application shutdown complete");
    Ok(())
}

/// Application entry point
///
/// Wires ctrl-c to the shutdown broadcast and runs the application.
pub async fn run(options: Options) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    app(shutdown_tx, options).await
}
