use std::{path::PathBuf, sync::Arc};

use telescope_controller::{
    config::{create_default_config, init_config},
    controller::TelescopeController,
    logging,
    state_monitor::run_state_monitor,
};
use tracing::{error, info};
use utilities::shutdown::ShutdownCoordinator;

fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if should_create_config() {
        create_default_config(None::<PathBuf>)?;
    }

    let (config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let _log_guard = logging::init(&config.logging);
    info!("Loaded configuration from {}", config_manager.path().display());

    let controller = Arc::new(TelescopeController::new(&config));

    let coordinator = ShutdownCoordinator::new();
    coordinator.register(controller.clone()).await;

    let monitor = tokio::spawn(run_state_monitor(
        Arc::clone(&controller),
        config.monitor.clone(),
        coordinator.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let released = coordinator.shutdown().await;
    if let Err(e) = monitor.await? {
        error!("State monitor failed: {:#}", e);
    }
    released
}
