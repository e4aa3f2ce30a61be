// =============================================================================
// Upstream market-data provider
// =============================================================================
//
// The provider exposes three reads: a batched market list, a single-asset
// detail document, and a price series. Field names below mirror the provider
// payload verbatim. Every numeric field is optional: the provider routinely
// sends `null` for thinly traded assets.
// =============================================================================

pub mod coingecko;
pub mod rate_limit;

pub use coingecko::CoinGeckoClient;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use self::rate_limit::BudgetSnapshot;
use crate::error::Result;
use crate::types::{PriceSeries, SeriesGranularity};

/// Read capabilities of the market-data provider.
///
/// A 404 from the provider maps to `MarketError::NotFound`; every other
/// failure maps to `MarketError::UpstreamUnavailable`. Implementations never
/// retry.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// One batched call for the whole id set.
    async fn fetch_snapshots(
        &self,
        provider_ids: &[String],
        currency: &str,
    ) -> Result<Vec<RawMarketRecord>>;

    async fn fetch_asset_detail(&self, provider_id: &str, currency: &str)
        -> Result<RawAssetDetail>;

    /// `SeriesGranularity::Ohlc` yields provider candles, the other hints yield
    /// raw price points.
    async fn fetch_price_series(
        &self,
        provider_id: &str,
        currency: &str,
        window_days: u32,
        granularity: SeriesGranularity,
    ) -> Result<PriceSeries>;

    /// Local request-budget state, for clients that keep one.
    fn budget(&self) -> Option<BudgetSnapshot> {
        None
    }
}

// ---------------------------------------------------------------------------
// Raw provider records
// ---------------------------------------------------------------------------

/// One row of the batched market list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMarketRecord {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub high_24h: Option<f64>,
    #[serde(default)]
    pub low_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h_in_currency: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

/// Per-currency figures keyed by lower-case currency code.
pub type CurrencyMap = HashMap<String, Option<f64>>;

/// Look up `currency` in a per-currency map, treating `null` as absent.
pub fn in_currency(map: &CurrencyMap, currency: &str) -> Option<f64> {
    map.get(currency).copied().flatten()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawMarketData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_price: CurrencyMap,
    #[serde(default, deserialize_with = "null_as_default")]
    pub high_24h: CurrencyMap,
    #[serde(default, deserialize_with = "null_as_default")]
    pub low_24h: CurrencyMap,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price_change_percentage_24h_in_currency: CurrencyMap,
    /// Currency-agnostic 24h change, used when the per-currency one is missing.
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub market_cap: CurrencyMap,
    #[serde(default)]
    pub total_supply: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawImage {
    #[serde(default)]
    pub large: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawDescription {
    #[serde(default)]
    pub en: Option<String>,
}

/// Single-asset detail document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawAssetDetail {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<RawImage>,
    #[serde(default)]
    pub description: Option<RawDescription>,
    #[serde(default)]
    pub market_data: Option<RawMarketData>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Cached payloads
// ---------------------------------------------------------------------------

/// Everything the response cache holds. Payloads are behind `Arc` so a cache
/// hit is a pointer copy.
#[derive(Debug, Clone)]
pub enum UpstreamPayload {
    Snapshots(Arc<Vec<RawMarketRecord>>),
    Detail(Arc<RawAssetDetail>),
    Series(Arc<PriceSeries>),
}

impl UpstreamPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshots(_) => "snapshots",
            Self::Detail(_) => "detail",
            Self::Series(_) => "series",
        }
    }
}
