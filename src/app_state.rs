// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the market service, its cache and the provider client together for the
// REST layer and the background sweep task.
//
// Thread safety:
//   - parking_lot::RwLock for the config and the error log.
//   - Arc wrappers for components that manage their own interior mutability.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::{CacheStats, ResponseCache};
use crate::clock::Clock;
use crate::error::MarketError;
use crate::market::MarketService;
use crate::runtime_config::RuntimeConfig;
use crate::store::AssetStore;
use crate::upstream::rate_limit::BudgetSnapshot;
use crate::upstream::{UpstreamClient, UpstreamPayload};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded provider failure for the error log endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Machine-readable code, e.g. `upstream_429`.
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Serialisable health view.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub server_time: i64,
    pub cache: CacheStats,
    pub upstream_budget: Option<BudgetSnapshot>,
    pub recent_errors: usize,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Market ──────────────────────────────────────────────────────────
    pub market: Arc<MarketService>,
    pub cache: Arc<ResponseCache<UpstreamPayload>>,
    pub upstream: Arc<dyn UpstreamClient>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build the cache and market service from `config` around the given
    /// provider, store and clock.
    pub fn new(
        config: RuntimeConfig,
        upstream: Arc<dyn UpstreamClient>,
        store: Arc<dyn AssetStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(
            config.cache_ttl_ms(),
            config.cache_max_entries,
            clock.clone(),
        ));
        let market = Arc::new(MarketService::new(
            upstream.clone(),
            store,
            cache.clone(),
            clock,
            config.fallback_asset_count,
        ));

        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            market,
            cache,
            upstream,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn default_currency(&self) -> String {
        self.runtime_config.read().default_currency.clone()
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error with an optional machine-readable code. The ring buffer
    /// is capped at [`MAX_RECENT_ERRORS`]; oldest entries are evicted first.
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    /// Log provider failures. Caller mistakes (validation, not found) are not
    /// recorded.
    pub fn record_failure(&self, err: &MarketError) {
        if matches!(err, MarketError::UpstreamUnavailable { .. } | MarketError::Storage(_)) {
            self.push_error_with_code(err.to_string(), Some(err.code()));
        }
    }

    pub fn build_health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            uptime_secs: self.start_time.elapsed().as_secs(),
            server_time: Utc::now().timestamp_millis(),
            cache: self.cache.stats(),
            upstream_budget: self.upstream.budget(),
            recent_errors: self.recent_errors.read().len(),
        }
    }
}
