//! # palaver-server
//!
//! Backend for the Palaver messenger.
//!
//! This binary provides:
//! - **REST API** (axum) for users, one-to-one and group chat, file
//!   uploads, and personal/group call signalling
//! - **Call state machine** with ring timeouts that mark unanswered calls
//!   as missed and write a summary message into the conversation
//! - **Pub/sub hub** bridged to clients over WebSocket
//! - **Rate limiting** per user, or per IP for anonymous requests

mod api;
mod auth;
mod blob_store;
mod calls;
mod config;
mod error;
mod events;
mod hub;
mod rate_limit;
mod scheduler;
mod ws;

use std::time::Duration;

use palaver_store::Database;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (RUST_LOG overrides the default filter)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_server=debug")),
        )
        .init();

    info!("Starting Palaver server v{}", env!("CARGO_PKG_VERSION"));

    // Configuration
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        database = %config.database_path.display(),
        ring_timeout_secs = config.ring_timeout.as_secs(),
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // Storage and shared state
    let db = Database::open_at(&config.database_path)?;
    let blob_store =
        BlobStore::new(config.blob_storage_path.clone(), config.max_blob_size).await?;
    let http_addr = config.http_addr;
    let app_state = AppState::new(db, blob_store, config);

    // Calls left ringing by a previous run get their timeout back, or expire now.
    app_state.calls.recover().await?;

    // Housekeeping

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Drop hub channels whose last subscriber went away
    let hub = app_state.hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let pruned = hub.prune().await;
            if pruned > 0 {
                let remaining = hub.channel_count().await;
                debug!(pruned, remaining, "Pruned hub channels");
            }
        }
    });

    // HTTP API until the server fails or Ctrl+C
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
