// =============================================================================
// Shared types used across the market-data service
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single raw price sample from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp_ms: i64, price: f64) -> Self {
        Self {
            timestamp_ms,
            price,
        }
    }
}

/// Open/high/low/close summary of one fixed time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcCandle {
    pub bucket_start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Locally managed metadata for a tracked asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Local identifier.
    #[serde(default)]
    pub id: String,
    /// Stable identifier on the upstream provider (e.g. "bitcoin").
    pub provider_id: String,
    /// Ticker symbol, upper case.
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Live market data joined with local metadata. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub asset_id: String,
    pub provider_id: String,
    pub code: String,
    pub name: String,
    pub image_url: Option<String>,
    pub current_price: f64,
    pub opening_price: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub pct_change_24h: Option<f64>,
    pub currency: String,
}

/// Single-asset view: the snapshot plus supply and valuation figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetDetail {
    #[serde(flatten)]
    pub snapshot: MarketSnapshot,
    pub market_cap: Option<f64>,
    pub total_supply: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub description: String,
}

/// A provider price series: either raw samples or provider-bucketed candles.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceSeries {
    Points(Vec<PricePoint>),
    Candles(Vec<OhlcCandle>),
}

impl PriceSeries {
    pub fn len(&self) -> usize {
        match self {
            Self::Points(points) => points.len(),
            Self::Candles(candles) => candles.len(),
        }
    }
}

/// Granularity hint passed to the provider when requesting a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesGranularity {
    /// Provider-side daily candles.
    Ohlc,
    /// Raw points at the provider's hourly resolution.
    PricesHourly,
    /// Raw points at the finest resolution the provider offers for the window.
    Prices,
}

impl std::fmt::Display for SeriesGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ohlc => write!(f, "ohlc"),
            Self::PricesHourly => write!(f, "prices_hourly"),
            Self::Prices => write!(f, "prices"),
        }
    }
}
