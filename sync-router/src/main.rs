//! sync-router binary entry point.
//!
//! Usage:
//! ```bash
//! sync-router --config router.toml
//! sync-router --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use overlay_sync_router::cleanup::spawn_tombstone_sweeper;
use overlay_sync_router::http::{build_router, health::init_start_time};
use overlay_sync_router::persist::save_model;
use overlay_sync_router::{Config, HeartbeatRunner, Synchronizer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Overlay router state synchronizer.
#[derive(Parser, Debug)]
#[command(name = "sync-router")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "router.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if cli.config.exists() {
        Config::from_file(&cli.config).context("Failed to load configuration")?
    } else {
        tracing::warn!("Config file {:?} not found, using defaults", cli.config);
        Config::default()
    };

    if config.heartbeat.enabled {
        let runner = HeartbeatRunner::new(HeartbeatRunner::MIN_INTERVAL, HeartbeatRunner::MAX_INTERVAL)
            .context("Failed to create heartbeat runner")?;
        runner
            .check_interval("heartbeat", Duration::from_secs(config.heartbeat.interval_secs))
            .context("Invalid heartbeat configuration")?;
    }

    init_start_time();
    let sync = Arc::new(Synchronizer::new(config.clone()));

    let model_path = config.model.path.clone();
    sync.load_model(&model_path).await;

    let mut tasks = Vec::new();
    if config.model.save_enabled {
        tasks.push(sync.start_model_save(
            model_path.clone(),
            Duration::from_secs(config.model.save_interval_secs.max(1)),
        ));
    }
    tasks.push(spawn_tombstone_sweeper(
        Arc::clone(sync.network_sessions()),
        config.sessions.clone(),
        sync.shutdown_signal(),
    ));

    if config.http.enabled {
        let listener = tokio::net::TcpListener::bind(&config.http.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", config.http.bind_address))?;
        tracing::info!("HTTP endpoints listening on {}", config.http.bind_address);

        let app = build_router(Arc::clone(&sync));
        let mut shutdown = sync.shutdown_signal();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!("HTTP server error: {}", e);
            }
        }));
    }

    tracing::info!("sync-router v{} started", env!("CARGO_PKG_VERSION"));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    sync.shutdown();

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Background task failed: {}", e);
        }
    }

    if config.model.save_enabled {
        save_model(&sync.data_model(), &model_path)
            .await
            .context("Failed to save data model on shutdown")?;
    }

    tracing::info!("sync-router stopped");
    Ok(())
}
