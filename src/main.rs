//! Pool Mining Client - Main Application

use clap::Parser;
use pool_mining_client::{Config, Error, MiningCoordinator, Result, APP_DESCRIPTION, APP_NAME, APP_VERSION};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    if config.info {
        print_info();
        return Ok(());
    }

    let config = config.resolve().await?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _log_guard = init_logging(&config)?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: pool={}:{}, worker_id={}, workers={}",
        config.host.as_deref().unwrap_or_default(),
        config.port.unwrap_or_default(),
        config.worker_id,
        config.effective_worker_count()
    );

    let coordinator = MiningCoordinator::from_config(&config)?;
    let shutdown = CancellationToken::new();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down gracefully"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_shutdown.cancel();
    });

    if let Err(e) = coordinator.run(shutdown).await {
        error!("Mining coordinator failed: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Set up console logging and the optional rolling log file
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let console = if config.log_json {
        fmt::layer().json().with_target(false).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::config(format!("Invalid log file path: {}", path.display())))?;
            std::fs::create_dir_all(directory)?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("{}", APP_DESCRIPTION);
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
