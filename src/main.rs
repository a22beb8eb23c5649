//! DocRelay Server — relays documents dropped into watched Drive folders
//! to Paperless.
//!
//! Main entry point that wires all crates together and starts the server.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use docrelay_api::AppState;
use docrelay_core::config::AppConfig;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_storage::ClientManager;
use docrelay_storage::manager::token_store_from_config;
use docrelay_worker::channel::RenewalPolicy;
use docrelay_worker::{AccountDirectory, ChannelMonitor, ChannelRegistry, Clock, Dispatcher, TaskScheduler};

/// DocRelay — Drive to Paperless document relay
#[derive(Debug, Parser)]
#[command(name = "docrelay-server", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (layered over config/default.toml)
    #[arg(short, long, env = "DOCRELAY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> AppResult<()> {
    tracing::info!("Starting DocRelay v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Clients and accounts ─────────────────────────────
    let clients = ClientManager::from_config(&config)?;
    let tokens = token_store_from_config(&config).await?;
    let accounts = Arc::new(AccountDirectory::from_config(&config, &clients)?);
    tracing::info!("Loaded {} account(s)", accounts.len());

    let registry = Arc::new(ChannelRegistry::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&accounts),
        Arc::clone(&registry),
        tokens,
        &config.worker,
    );

    // ── Step 2: Task scheduler ───────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = TaskScheduler::from_config(&config.scheduler, Clock::new());
    let mut scheduler_handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run(shutdown_rx).await }
    });

    // ── Step 3: HTTP server ──────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    let mut server_handle = tokio::spawn(docrelay_api::serve(
        listener,
        AppState::new(dispatcher.clone()),
        async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown...");
        },
    ));

    // ── Step 4: Relay whatever arrived while we were down ────────
    dispatcher.scan_all();

    // ── Step 5: Channel monitors ─────────────────────────────────
    let address = config.server.notification_address();
    let policy = RenewalPolicy::from_config(&config.channel);
    let mut monitors = Vec::with_capacity(accounts.len());

    for account in accounts.all() {
        let monitor = ChannelMonitor::new(
            account.monitor_settings(address.clone(), policy),
            Arc::clone(&account.storage),
            scheduler.clone(),
            Arc::clone(&registry),
        );
        if let Err(e) = monitor.start().await {
            tracing::error!(
                account = %account.name(),
                "Failed to start channel monitor: {}",
                e
            );
        }
        monitors.push(monitor);
    }

    // ── Step 6: Run until shutdown, or until the scheduler dies ──
    let served = tokio::select! {
        joined = &mut server_handle => joined
            .map_err(|e| AppError::internal(format!("Server task failed: {}", e)))
            .and_then(|result| result),
        joined = &mut scheduler_handle => {
            let reason = match joined {
                Ok(Ok(())) => "stopped unexpectedly".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            return Err(AppError::internal(format!("Task scheduler died: {}", reason)));
        }
    };

    // ── Step 7: Graceful shutdown ────────────────────────────────
    for monitor in &monitors {
        monitor.stop(None).await;
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        tracing::error!("Task scheduler panicked: {}", e);
    }

    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    tracing::info!("Waiting up to {}s for queued work to drain...", grace.as_secs());
    if tokio::time::timeout(grace, dispatcher.wait_idle()).await.is_err() {
        tracing::warn!(stats = ?dispatcher.stats(), "Queued work left unfinished at shutdown");
    }

    tracing::info!("DocRelay server shut down gracefully");
    served
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
