//! Amp GW - control-surface gateway for networked audio amplifiers

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use amp_gw::api::{self, ApiState};
use amp_gw::config::{AppConfig, ConfigWatcher};
use amp_gw::orchestrator::{ConfigChange, Orchestrator};
use amp_gw::surface::LocalSurface;

/// Amp GW - drive a networked amplifier from a control surface
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "AMP_GW_CONFIG", default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily-rotated log files to this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Override the API port from the config file
    #[arg(long, env = "AMP_GW_API_PORT")]
    api_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref())?;

    info!("Starting Amp GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let (config_watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    run_app(initial_config, config_watcher, args.api_port, shutdown_signal()).await?;

    info!("Amp GW shutdown complete");
    Ok(())
}

async fn run_app(
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
    api_port: Option<u16>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let surface = Arc::new(LocalSurface::new());
    let mut session = Orchestrator::new(config.clone(), surface.clone())
        .context("Failed to create device session")?;
    session.start();

    let api_state = ApiState::new(session.clone(), surface.clone());
    let api_task = if config.api.enabled {
        let state = api_state.clone();
        let port = api_port.unwrap_or(config.api.port);
        Some(tokio::spawn(async move {
            if let Err(e) = api::start_server(state, port).await {
                error!("API server stopped: {:#}", e);
            }
        }))
    } else {
        info!("Control-surface API disabled");
        None
    };
    let mut api_config = config.api;

    info!("Ready to sync {}", config.device.host);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, applying...");
                if new_config.api != api_config {
                    warn!("API settings changed; restart the gateway to apply them");
                    api_config = new_config.api.clone();
                }

                match session.update_config(new_config.clone()) {
                    ConfigChange::Unchanged => debug!("No device-relevant changes"),
                    ConfigChange::Applied => info!("✅ Configuration applied to running session"),
                    ConfigChange::RequiresRebuild => {
                        match Orchestrator::new(new_config, surface.clone()) {
                            Ok(next) => {
                                session.shutdown();
                                next.start();
                                api_state.replace_session(next.clone());
                                session = next;
                                info!("✅ Device session rebuilt");
                            }
                            Err(e) => {
                                warn!("⚠️  Failed to rebuild session (keeping old one): {:#}", e);
                            }
                        }
                    }
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    session.shutdown();
    if let Some(task) = api_task {
        task.abort();
    }

    Ok(())
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "amp-gw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}
