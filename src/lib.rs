// Module declarations for the application's core components
pub mod channels;       // Inter-component communication channels
pub mod config;         // Configuration management
pub mod coordinator;    // Frame routing between broker and codecs
pub mod home_assistant; // Home Assistant discovery
pub mod mqtt;           // MQTT client and messaging
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod utils;          // Utility functions
pub mod growatt;        // Growatt wire protocol implementation

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::coordinator::Coordinator;
use crate::growatt::registers::Catalogs;
use crate::mqtt::Mqtt;
use std::error::Error;
use std::sync::Arc;

fn init_logging(loglevel: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(loglevel))
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
}

/// Main application entry point. Wires the MQTT client and the
/// coordinator together and runs until the shutdown signal fires.
pub async fn app(
    mut shutdown_rx: broadcast::Receiver<()>,
    config: Arc<ConfigWrapper>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    init_logging(&config.loglevel());

    info!("growatt-bridge {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();
    let catalogs = match config.registers_dir() {
        Some(dir) => Catalogs::from_dir(&dir)?,
        None => Catalogs::load()?,
    };

    let coordinator = Coordinator::new((*config).clone(), catalogs, channels.clone());
    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("coordinator task failed: {}", e);
        }
    });

    let mqtt = Mqtt::new((*config).clone(), channels.clone());
    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("mqtt task failed: {}", e);
        }
    });

    let _ = shutdown_rx.recv().await;
    info!("shutdown signal received, stopping components");

    coordinator.stop();
    let _ = mqtt.stop().await;

    if let Err(e) = coordinator_handle.await {
        error!("error waiting for coordinator task: {}", e);
    }
    if let Err(e) = mqtt_handle.await {
        error!("error waiting for mqtt task: {}", e);
    }

    coordinator.shared_stats.lock().unwrap().print_summary();
    info!("shutdown complete");

    Ok(())
}
