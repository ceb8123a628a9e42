use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use snaphunt_sync::config::Config;
use snaphunt_sync::gateway::ForumGateway;
use snaphunt_sync::polling::PollingEngine;
use snaphunt_sync::thread;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    init_tracing()?;

    info!("Starting snaphunt-sync");

    // Load and validate configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(forum = %config.forum_base_url, "Configuration loaded");

    if config.game_post_ids.is_empty() {
        warn!("GAME_POST_IDS is empty, nothing to watch");
    }

    let gateway = Arc::new(ForumGateway::new(&config).context("Failed to build forum gateway")?);
    let engine = Arc::new(PollingEngine::new(gateway.clone(), config.poller_settings()));

    // Attach to each configured game: rebuild its thread from the live
    // comment record, then start polling and log every delivered update.
    for post_id in &config.game_post_ids {
        let game_thread = match thread::recover_thread(gateway.as_ref(), post_id).await {
            Ok(t) => t,
            Err(e) => {
                error!(post_id = %post_id, "Failed to recover game thread: {e:#}");
                continue;
            }
        };
        info!(
            post_id = %post_id,
            rounds = game_thread.round_count(),
            "Watching game"
        );

        let mut updates = engine
            .initialize_game_polling(&game_thread.into_shared())
            .await
            .with_context(|| format!("Failed to start polling for {post_id}"))?;

        let post_id = post_id.clone();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                info!(post_id = %post_id, update = ?update, "Game update");
            }
            info!(post_id = %post_id, "Update stream closed");
        });
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down...");
    engine.stop_all_polling().await;
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,snaphunt_sync=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
