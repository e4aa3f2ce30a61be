// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are read-only. Domain errors map to
// status codes in one place (`IntoResponse for MarketError`); provider and
// store failures are also written to the in-memory error log.
//
// CORS is configured permissively for development; tighten `allow_origin`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;
use crate::error::{MarketError, Result};
use crate::types::{AssetDetail, MarketSnapshot, OhlcCandle};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/assets", get(list_assets))
        .route("/api/v1/assets/:provider_id", get(asset_detail))
        .route("/api/v1/assets/:provider_id/history/:period", get(asset_history))
        .route("/api/v1/cache/stats", get(cache_stats))
        .route("/api/v1/errors", get(recent_errors))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = match &self {
            MarketError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            MarketError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, Json(body)).into_response()
    }
}

fn tracked<T>(state: &AppState, result: Result<T>) -> Result<T> {
    result.inspect_err(|err| {
        warn!(error = %err, code = %err.code(), "request failed");
        state.record_failure(err);
    })
}

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct MarketQuery {
    #[serde(default)]
    currency: Option<String>,
    /// Comma-separated provider ids.
    #[serde(default)]
    preferred: Option<String>,
}

impl MarketQuery {
    fn currency(&self, state: &AppState) -> String {
        match self.currency.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => state.default_currency(),
        }
    }

    fn preferred_ids(&self) -> Option<Vec<String>> {
        self.preferred.as_deref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

// =============================================================================
// Health & diagnostics
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_health())
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.cache.stats())
}

async fn recent_errors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let errors = state.recent_errors.read().clone();
    Json(errors)
}

// =============================================================================
// Market data
// =============================================================================

async fn list_assets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<Vec<MarketSnapshot>>> {
    let currency = query.currency(&state);
    let preferred = query.preferred_ids();
    let result = state
        .market
        .get_snapshot_list(preferred.as_deref(), &currency)
        .await;
    tracked(&state, result).map(Json)
}

async fn asset_detail(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<AssetDetail>> {
    let currency = query.currency(&state);
    let result = state.market.get_asset_detail(&provider_id, &currency).await;
    tracked(&state, result).map(Json)
}

async fn asset_history(
    State(state): State<Arc<AppState>>,
    Path((provider_id, period)): Path<(String, String)>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<Vec<OhlcCandle>>> {
    let currency = query.currency(&state);
    let result = state
        .market
        .get_history(&provider_id, &currency, &period)
        .await;
    tracked(&state, result).map(Json)
}

// =============================================================================
// Tests
// =============================================================================
