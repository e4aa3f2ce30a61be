// Test doubles shared by the unit tests of several modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{MarketError, Result};
use crate::store::InMemoryAssetStore;
use crate::types::{AssetMetadata, PriceSeries, SeriesGranularity};
use crate::upstream::{
    CurrencyMap, RawAssetDetail, RawDescription, RawImage, RawMarketData, RawMarketRecord,
    UpstreamClient,
};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Last price-series request seen by [`MockUpstream`].
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRequest {
    pub provider_id: String,
    pub currency: String,
    pub window_days: u32,
    pub granularity: SeriesGranularity,
}

/// Scripted provider. Records every call; fails with `failure` when set.
#[derive(Default)]
pub struct MockUpstream {
    pub records: Mutex<Vec<RawMarketRecord>>,
    pub details: Mutex<HashMap<String, RawAssetDetail>>,
    pub series: Mutex<Option<PriceSeries>>,
    pub failure: Mutex<Option<MarketError>>,

    pub snapshot_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub series_calls: AtomicUsize,
    pub last_snapshot_ids: Mutex<Vec<String>>,
    pub last_series_request: Mutex<Option<SeriesRequest>>,
}

impl MockUpstream {
    pub fn with_records(records: Vec<RawMarketRecord>) -> Self {
        let mock = Self::default();
        *mock.records.lock() = records;
        mock
    }

    pub fn add_detail(&self, detail: RawAssetDetail) {
        self.details.lock().insert(detail.id.clone(), detail);
    }

    pub fn set_series(&self, series: PriceSeries) {
        *self.series.lock() = Some(series);
    }

    pub fn fail_with(&self, err: MarketError) {
        *self.failure.lock() = Some(err);
    }

    pub fn total_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
            + self.detail_calls.load(Ordering::SeqCst)
            + self.series_calls.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self) -> Result<()> {
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn fetch_snapshots(
        &self,
        provider_ids: &[String],
        _currency: &str,
    ) -> Result<Vec<RawMarketRecord>> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_snapshot_ids.lock() = provider_ids.to_vec();
        self.scripted_failure()?;

        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| provider_ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn fetch_asset_detail(&self, provider_id: &str, _currency: &str) -> Result<RawAssetDetail> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.scripted_failure()?;

        self.details
            .lock()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| MarketError::NotFound(format!("coin '{provider_id}'")))
    }

    async fn fetch_price_series(
        &self,
        provider_id: &str,
        currency: &str,
        window_days: u32,
        granularity: SeriesGranularity,
    ) -> Result<PriceSeries> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_series_request.lock() = Some(SeriesRequest {
            provider_id: provider_id.to_string(),
            currency: currency.to_string(),
            window_days,
            granularity,
        });
        self.scripted_failure()?;

        Ok(self
            .series
            .lock()
            .clone()
            .unwrap_or(PriceSeries::Points(Vec::new())))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn asset(provider_id: &str, code: &str, name: &str) -> AssetMetadata {
    AssetMetadata {
        id: format!("local-{provider_id}"),
        provider_id: provider_id.to_string(),
        code: code.to_string(),
        name: name.to_string(),
        image_url: Some(format!("https://local/{provider_id}.png")),
    }
}

/// Store holding `assets` plus the given preference values.
pub fn store_with(assets: Vec<AssetMetadata>, preferences: serde_json::Value) -> Arc<InMemoryAssetStore> {
    let preferences = preferences
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    Arc::new(InMemoryAssetStore::new(assets, preferences))
}

pub fn market_record(id: &str, price: f64, pct_in_currency: Option<f64>) -> RawMarketRecord {
    RawMarketRecord {
        id: id.to_string(),
        symbol: Some(id.chars().take(3).collect()),
        name: Some(id.to_string()),
        image: Some(format!("https://provider/{id}.png")),
        current_price: Some(price),
        high_24h: Some(price * 1.05),
        low_24h: Some(price * 0.95),
        price_change_percentage_24h: None,
        price_change_percentage_24h_in_currency: pct_in_currency,
        market_cap: Some(price * 1_000.0),
    }
}

fn currency_map(currency: &str, value: Option<f64>) -> CurrencyMap {
    let mut map = CurrencyMap::new();
    if let Some(v) = value {
        map.insert(currency.to_string(), Some(v));
    }
    map
}

pub fn detail_record(
    id: &str,
    currency: &str,
    price: Option<f64>,
    pct_in_currency: Option<f64>,
    description: Option<&str>,
) -> RawAssetDetail {
    RawAssetDetail {
        id: id.to_string(),
        symbol: Some(id.chars().take(3).collect()),
        name: Some(id.to_string()),
        image: Some(RawImage {
            large: Some(format!("https://provider/{id}-large.png")),
        }),
        description: Some(RawDescription {
            en: description.map(str::to_string),
        }),
        market_data: Some(RawMarketData {
            current_price: currency_map(currency, price),
            high_24h: currency_map(currency, price.map(|p| p * 1.1)),
            low_24h: currency_map(currency, price.map(|p| p * 0.9)),
            price_change_percentage_24h_in_currency: currency_map(currency, pct_in_currency),
            price_change_percentage_24h: None,
            market_cap: currency_map(currency, Some(900_000_000.0)),
            total_supply: Some(21_000_000.0),
            circulating_supply: Some(19_500_000.0),
        }),
    }
}
