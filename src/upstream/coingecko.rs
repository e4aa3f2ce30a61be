// =============================================================================
// CoinGecko REST client
// =============================================================================
//
// Implements `UpstreamClient` against the CoinGecko v3 API (or any server that
// speaks the same dialect). Requests are plain GETs with query parameters; the
// API key, when configured, is attached the way the target host expects:
//   - public host  (api.coingecko.com)     => `x_cg_demo_api_key` query param
//   - pro host     (pro-api.coingecko.com) => `x-cg-pro-api-key` header
//   - anything else                         => no key
//
// The client never retries. A local request budget refuses calls that would
// exceed the per-minute quota or that arrive during a 429 cooldown.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::rate_limit::{BudgetDenied, BudgetSnapshot, RequestBudget};
use super::{RawAssetDetail, RawMarketRecord, UpstreamClient};
use crate::error::{MarketError, Result};
use crate::types::{OhlcCandle, PricePoint, PriceSeries, SeriesGranularity};

/// Longest slice of an error body kept in the error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Clone, PartialEq, Eq)]
enum ApiKeyMode {
    None,
    DemoQuery(String),
    ProHeader(String),
}

impl ApiKeyMode {
    fn for_host(base_url: &str, api_key: Option<String>) -> Self {
        let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
            return Self::None;
        };
        if base_url.contains("pro-api.coingecko.com") {
            Self::ProHeader(key)
        } else if base_url.contains("api.coingecko.com") {
            Self::DemoQuery(key)
        } else {
            Self::None
        }
    }
}

/// CoinGecko market-data client.
pub struct CoinGeckoClient {
    base_url: Url,
    api_key: ApiKeyMode,
    client: reqwest::Client,
    budget: RequestBudget,
}

impl CoinGeckoClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url`          - e.g. "https://api.coingecko.com/api/v3"
    /// * `api_key`           - optional demo or pro key
    /// * `timeout`           - overall per-request timeout
    /// * `requests_per_min`  - local request budget, 0 for unlimited
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        requests_per_min: u32,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("invalid provider base url '{base_url}': must start with http:// or https://");
        }
        let base_url = Url::parse(&base_url)
            .map_err(|e| anyhow::anyhow!("invalid provider base url '{base_url}': {e}"))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("market-pulse/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let api_key = ApiKeyMode::for_host(base_url.as_str(), api_key);
        debug!(
            base_url = %base_url,
            keyed = api_key != ApiKeyMode::None,
            timeout_ms = timeout.as_millis() as u64,
            "CoinGeckoClient initialised"
        );

        Ok(Self {
            base_url,
            api_key,
            client,
            budget: RequestBudget::new(requests_per_min),
        })
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// Endpoint URL for `segments` under the base path. Each segment is
    /// percent-encoded, so an id can never add path levels or a query.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MarketError::upstream(None, format!("base url '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, String)]) -> Result<T> {
        let now = chrono::Utc::now().timestamp_millis();
        if let Err(denied) = self.budget.try_acquire(now) {
            let message = match denied {
                BudgetDenied::CoolingDown { wait_ms } => {
                    format!("provider cooldown active for another {wait_ms} ms")
                }
                BudgetDenied::Exhausted { wait_ms } => {
                    format!("request budget spent, window resets in {wait_ms} ms")
                }
            };
            return Err(MarketError::upstream(Some(StatusCode::TOO_MANY_REQUESTS.as_u16()), message));
        }

        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let path = path.as_str();
        let mut request = self.client.get(url).query(query);
        match &self.api_key {
            ApiKeyMode::DemoQuery(key) => request = request.query(&[("x_cg_demo_api_key", key)]),
            ApiKeyMode::ProHeader(key) => request = request.header("x-cg-pro-api-key", key),
            ApiKeyMode::None => {}
        }

        let resp = request.send().await.map_err(|e| {
            warn!(path, error = %e, "provider request failed");
            MarketError::from(e)
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            self.budget
                .record_rate_limited(retry_after, chrono::Utc::now().timestamp_millis());
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, path, &body));
        }

        resp.json::<T>().await.map_err(|e| {
            warn!(path, error = %e, "provider payload did not decode");
            MarketError::upstream(Some(status.as_u16()), format!("malformed payload from {path}: {e}"))
        })
    }
}

/// Map a non-2xx provider status to the error taxonomy.
fn classify_status(status: StatusCode, path: &str, body: &str) -> MarketError {
    if status == StatusCode::NOT_FOUND {
        return MarketError::NotFound(format!("{path} not found on provider"));
    }
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    warn!(path, status = status.as_u16(), body = %body, "provider returned error status");
    MarketError::upstream(Some(status.as_u16()), format!("GET {path} returned {status}: {body}"))
}

// -------------------------------------------------------------------------
// Series payloads
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<[f64; 2]>,
}

fn chart_to_points(chart: MarketChart) -> Vec<PricePoint> {
    chart
        .prices
        .into_iter()
        .map(|[ts, price]| PricePoint::new(ts as i64, price))
        .collect()
}

/// `/ohlc` answers `[[time, open, high, low, close], ...]`.
fn rows_to_candles(rows: Vec<[f64; 5]>) -> Vec<OhlcCandle> {
    rows.into_iter()
        .map(|[ts, open, high, low, close]| OhlcCandle {
            bucket_start_ms: ts as i64,
            open,
            high,
            low,
            close,
        })
        .collect()
}

// -------------------------------------------------------------------------
// UpstreamClient
// -------------------------------------------------------------------------

#[async_trait]
impl UpstreamClient for CoinGeckoClient {
    #[instrument(skip(self), name = "coingecko::fetch_snapshots")]
    async fn fetch_snapshots(
        &self,
        provider_ids: &[String],
        currency: &str,
    ) -> Result<Vec<RawMarketRecord>> {
        if provider_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = [
            ("vs_currency", currency.to_string()),
            ("ids", provider_ids.join(",")),
            ("order", "market_cap_desc".to_string()),
            ("per_page", provider_ids.len().to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
            ("price_change_percentage", "24h".to_string()),
        ];

        let records: Vec<RawMarketRecord> = self.get_json(&["coins", "markets"], &query).await?;
        debug!(requested = provider_ids.len(), received = records.len(), "market list fetched");
        Ok(records)
    }

    #[instrument(skip(self), name = "coingecko::fetch_asset_detail")]
    async fn fetch_asset_detail(&self, provider_id: &str, currency: &str) -> Result<RawAssetDetail> {
        // The detail document carries every currency; `currency` only scopes
        // the cache key on the caller side.
        let query = [
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("market_data", "true".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
            ("sparkline", "false".to_string()),
        ];

        let detail: RawAssetDetail = self.get_json(&["coins", provider_id], &query).await?;
        debug!(provider_id, has_market_data = detail.market_data.is_some(), "asset detail fetched");
        Ok(detail)
    }

    #[instrument(skip(self), name = "coingecko::fetch_price_series")]
    async fn fetch_price_series(
        &self,
        provider_id: &str,
        currency: &str,
        window_days: u32,
        granularity: SeriesGranularity,
    ) -> Result<PriceSeries> {
        let query = [
            ("vs_currency", currency.to_string()),
            ("days", window_days.to_string()),
        ];

        let series = match granularity {
            SeriesGranularity::Ohlc => {
                let rows: Vec<[f64; 5]> = self.get_json(&["coins", provider_id, "ohlc"], &query).await?;
                PriceSeries::Candles(rows_to_candles(rows))
            }
            SeriesGranularity::PricesHourly | SeriesGranularity::Prices => {
                let chart: MarketChart = self
                    .get_json(&["coins", provider_id, "market_chart"], &query)
                    .await?;
                PriceSeries::Points(chart_to_points(chart))
            }
        };

        debug!(provider_id, %granularity, samples = series.len(), "price series fetched");
        Ok(series)
    }

    fn budget(&self) -> Option<BudgetSnapshot> {
        Some(self.budget.snapshot())
    }
}

impl std::fmt::Debug for CoinGeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = match self.api_key {
            ApiKeyMode::None => "none",
            ApiKeyMode::DemoQuery(_) => "<redacted demo key>",
            ApiKeyMode::ProHeader(_) => "<redacted pro key>",
        };
        f.debug_struct("CoinGeckoClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &key)
            .field("budget", &self.budget)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_placement_follows_host() {
        let key = Some("k".to_string());
        assert!(matches!(
            ApiKeyMode::for_host("https://api.coingecko.com/api/v3", key.clone()),
            ApiKeyMode::DemoQuery(_)
        ));
        assert!(matches!(
            ApiKeyMode::for_host("https://pro-api.coingecko.com/api/v3", key.clone()),
            ApiKeyMode::ProHeader(_)
        ));
        assert!(ApiKeyMode::for_host("http://localhost:8080", key) == ApiKeyMode::None);
        assert!(ApiKeyMode::for_host("https://api.coingecko.com/api/v3", Some("  ".into())) == ApiKeyMode::None);
    }

    #[test]
    fn not_found_status_maps_to_not_found() {
        let err = classify_status(StatusCode::NOT_FOUND, "/coins/nope", "{\"error\":\"coin not found\"}");
        assert!(matches!(err, MarketError::NotFound(_)));
    }

    #[test]
    fn other_statuses_map_to_unavailable_with_code() {
        let long_body = "x".repeat(1000);
        let err = classify_status(StatusCode::BAD_GATEWAY, "/coins/markets", &long_body);
        match err {
            MarketError::UpstreamUnavailable { status, message } => {
                assert_eq!(status, Some(502));
                assert!(message.len() < 400);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn market_chart_prices_become_points() {
        let json = r#"{
            "prices": [[1700000000000, 100.5], [1700000300000.0, 101.0]],
            "market_caps": [],
            "total_volumes": []
        }"#;
        let chart: MarketChart = serde_json::from_str(json).unwrap();
        let points = chart_to_points(chart);
        assert_eq!(
            points,
            vec![
                PricePoint::new(1_700_000_000_000, 100.5),
                PricePoint::new(1_700_000_300_000, 101.0)
            ]
        );
    }

    #[test]
    fn ohlc_rows_become_candles() {
        let json = "[[1700000000000, 1.0, 2.0, 0.5, 1.5], [1700086400000, 1.5, 1.8, 1.2, 1.3]]";
        let rows: Vec<[f64; 5]> = serde_json::from_str(json).unwrap();
        let candles = rows_to_candles(rows);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].bucket_start_ms, 1_700_000_000_000);
        assert!((candles[1].close - 1.3).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_base_url_without_scheme() {
        let res = CoinGeckoClient::new("api.coingecko.com", None, Duration::from_secs(5), 0);
        assert!(res.is_err());
    }

    #[test]
    fn ids_are_encoded_as_single_path_segments() {
        let client = CoinGeckoClient::new("https://api.coingecko.com/api/v3/", None, Duration::from_secs(1), 0).unwrap();

        let url = client.endpoint(&["coins", "bitcoin", "ohlc"]).unwrap();
        assert_eq!(url.as_str(), "https://api.coingecko.com/api/v3/coins/bitcoin/ohlc");

        let url = client
            .endpoint(&["coins", "bitcoin/ohlc?vs_currency=usd&days=365#", "market_chart"])
            .unwrap();
        assert_eq!(url.path(), "/api/v3/coins/bitcoin%2Fohlc%3Fvs_currency=usd&days=365%23/market_chart");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn bare_host_base_url_gets_no_double_slash() {
        let client = CoinGeckoClient::new("http://127.0.0.1:9", None, Duration::from_secs(1), 0).unwrap();
        let url = client.endpoint(&["coins", "markets"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/coins/markets");
    }

    #[tokio::test]
    async fn exhausted_budget_fails_fast_without_network() {
        // Port 9 (discard) is never contacted: the budget refuses first.
        let client = CoinGeckoClient::new("http://127.0.0.1:9", None, Duration::from_secs(1), 1).unwrap();
        client.budget.try_acquire(chrono::Utc::now().timestamp_millis()).unwrap();

        let err = client
            .fetch_snapshots(&["bitcoin".to_string()], "eur")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "upstream_429");
    }
}
