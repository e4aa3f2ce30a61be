// =============================================================================
// Market Pulse: Main Entry Point
// =============================================================================
//
// Loads configuration and the asset seed, builds the provider client, cache
// and market service, then serves the REST API until Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cache;
mod clock;
mod error;
mod history;
mod market;
mod runtime_config;
mod store;
mod types;
mod upstream;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::clock::SystemClock;
use crate::runtime_config::{RuntimeConfig, CONFIG_PATH};
use crate::store::InMemoryAssetStore;
use crate::upstream::CoinGeckoClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Market Pulse starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    info!(
        upstream = %config.upstream_base_url,
        api_key = config.upstream_api_key.is_some(),
        default_currency = %config.default_currency,
        cache_ttl_secs = config.cache_ttl_secs,
        "Configuration resolved"
    );

    // ── 2. Asset store ───────────────────────────────────────────────────
    let store = InMemoryAssetStore::load(&config.asset_store_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %config.asset_store_path, "No asset seed loaded, starting with an empty store");
        InMemoryAssetStore::default()
    });
    info!(assets = store.asset_count(), "Asset store ready");

    // ── 3. Provider client ───────────────────────────────────────────────
    let upstream = CoinGeckoClient::new(
        config.upstream_base_url.clone(),
        config.upstream_api_key.clone(),
        config.request_timeout(),
        config.upstream_requests_per_minute,
    )
    .context("failed to build provider client")?;

    // ── 4. Build shared state ────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let sweep_interval = config.cache_sweep_interval();
    let state = Arc::new(AppState::new(
        config,
        Arc::new(upstream),
        Arc::new(store),
        Arc::new(SystemClock),
    ));

    // ── 5. Cache sweep loop ──────────────────────────────────────────────
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let removed = sweep_state.cache.purge_expired();
            if removed > 0 {
                info!(removed, remaining = sweep_state.cache.len(), "Swept expired cache entries");
            }
        }
    });

    // ── 6. Start the API server ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");
    server.abort();

    let stats = state.cache.stats();
    info!(hits = stats.hits, misses = stats.misses, "Market Pulse shut down complete.");
    Ok(())
}
