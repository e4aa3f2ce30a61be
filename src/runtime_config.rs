// =============================================================================
// Runtime Configuration: service settings loaded from JSON plus env overrides
// =============================================================================
//
// Every field carries `#[serde(default)]` so an older or partial config file
// still loads. Environment variables (optionally from `.env`) win over the
// file for the handful of settings that differ per deployment.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL_MS};

pub const CONFIG_PATH: &str = "market_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_upstream_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_upstream_requests_per_minute() -> u32 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    (DEFAULT_TTL_MS / 1000) as u64
}

fn default_cache_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_cache_sweep_interval_secs() -> u64 {
    60
}

fn default_currency() -> String {
    "eur".to_string()
}

fn default_fallback_asset_count() -> usize {
    2
}

fn default_asset_store_path() -> String {
    "assets.json".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- HTTP server ---------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // --- Upstream provider ---------------------------------------------------

    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,

    /// Provider API key. Never written back out.
    #[serde(default, skip_serializing)]
    pub upstream_api_key: Option<String>,

    /// Per-request timeout. A timed-out call is reported, not retried.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Local request budget against the provider; 0 disables it.
    #[serde(default = "default_upstream_requests_per_minute")]
    pub upstream_requests_per_minute: u32,

    // --- Response cache ------------------------------------------------------

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// How often expired entries are swept out of the cache.
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: u64,

    // --- Market views --------------------------------------------------------

    /// Quote currency used when a request does not name one.
    #[serde(default = "default_currency")]
    pub default_currency: String,

    #[serde(default = "default_fallback_asset_count")]
    pub fallback_asset_count: usize,

    /// JSON seed for the in-memory asset store.
    #[serde(default = "default_asset_store_path")]
    pub asset_store_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            upstream_base_url: default_upstream_base_url(),
            upstream_api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            upstream_requests_per_minute: default_upstream_requests_per_minute(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            cache_sweep_interval_secs: default_cache_sweep_interval_secs(),
            default_currency: default_currency(),
            fallback_asset_count: default_fallback_asset_count(),
            asset_store_path: default_asset_store_path(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults with
    /// a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            bind_addr = %config.bind_addr,
            upstream = %config.upstream_base_url,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `MARKET_*` / `COINGECKO_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(addr) = get("MARKET_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(url) = get("COINGECKO_BASE_URL") {
            self.upstream_base_url = url;
        }
        if let Some(key) = get("COINGECKO_API_KEY") {
            self.upstream_api_key = Some(key);
        }
        if let Some(path) = get("MARKET_ASSETS_PATH") {
            self.asset_store_path = path;
        }
        if let Some(currency) = get("MARKET_DEFAULT_CURRENCY") {
            self.default_currency = currency.to_ascii_lowercase();
        }

        if self.default_currency.trim().is_empty() {
            warn!("empty default currency configured, using eur");
            self.default_currency = default_currency();
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn cache_ttl_ms(&self) -> i64 {
        i64::try_from(self.cache_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs.max(1))
    }
}
