// =============================================================================
// Market Service: joins live provider data with locally managed metadata
// =============================================================================
//
// Every provider read goes through the shared response cache. Keys:
//
//   markets-{sorted ids}-{currency}
//   detail-{provider id}-{currency}
//   chart-{provider id}-{currency}-{window days}-{granularity}
//
// Input is validated before any cache or provider access.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::pricing::{effective_pct, first_sentence, opening_price};
use crate::cache::ResponseCache;
use crate::clock::Clock;
use crate::error::{MarketError, Result};
use crate::history::HistoryPeriod;
use crate::store::{AssetStore, HOMEPAGE_COUNT_KEY};
use crate::types::{AssetDetail, AssetMetadata, MarketSnapshot, OhlcCandle, PriceSeries};
use crate::upstream::{in_currency, RawAssetDetail, RawMarketRecord, UpstreamClient, UpstreamPayload};

pub struct MarketService {
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<dyn AssetStore>,
    cache: Arc<ResponseCache<UpstreamPayload>>,
    clock: Arc<dyn Clock>,
    /// How many local assets to show when neither the requester nor the admin
    /// picked any.
    fallback_asset_count: usize,
}

impl MarketService {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        store: Arc<dyn AssetStore>,
        cache: Arc<ResponseCache<UpstreamPayload>>,
        clock: Arc<dyn Clock>,
        fallback_asset_count: usize,
    ) -> Self {
        Self {
            upstream,
            store,
            cache,
            clock,
            fallback_asset_count,
        }
    }

    // -------------------------------------------------------------------------
    // Snapshot list
    // -------------------------------------------------------------------------

    /// Current snapshots for the requester's preferred assets, the admin's
    /// popular assets, or the first few local assets, in that priority.
    ///
    /// Ids without both local metadata and a live price are dropped.
    pub async fn get_snapshot_list(
        &self,
        preferred: Option<&[String]>,
        currency: &str,
    ) -> Result<Vec<MarketSnapshot>> {
        let currency = normalise_currency(currency)?;
        let targets = self.resolve_targets(preferred).await?;

        if targets.is_empty() {
            debug!("no target assets, skipping provider call");
            return Ok(Vec::new());
        }

        let (metadata, records) = tokio::try_join!(
            self.store.find_by_provider_ids(&targets),
            self.cached_snapshots(&targets, &currency),
        )?;

        let snapshots = join_snapshots(&targets, &metadata, &records, &currency);
        debug!(
            requested = targets.len(),
            returned = snapshots.len(),
            currency = %currency,
            "snapshot list assembled"
        );
        Ok(snapshots)
    }

    async fn resolve_targets(&self, preferred: Option<&[String]>) -> Result<Vec<String>> {
        if let Some(ids) = preferred {
            let ids = dedup_ids(ids);
            if let Some(bad) = ids.iter().find(|id| !is_provider_id(id)) {
                return Err(invalid_provider_id(bad));
            }
            if !ids.is_empty() {
                return Ok(ids);
            }
        }

        // A negative or missing count means "no limit".
        let limit = self
            .store
            .get_configured_count(HOMEPAGE_COUNT_KEY)
            .await?
            .and_then(|n| usize::try_from(n).ok());
        let popular = dedup_ids(&self.store.list_popular_ids(limit).await?);
        if !popular.is_empty() {
            return Ok(popular);
        }

        let fallback = self.store.list_all(self.fallback_asset_count).await?;
        Ok(fallback.into_iter().map(|a| a.provider_id).collect())
    }

    async fn cached_snapshots(&self, targets: &[String], currency: &str) -> Result<Arc<Vec<RawMarketRecord>>> {
        let mut ids = targets.to_vec();
        ids.sort();
        ids.dedup();
        let key = format!("markets-{}-{}", ids.join(","), currency);

        let upstream = &self.upstream;
        let ids = &ids;
        let payload = self
            .cache
            .get_or_fetch(&key, move || async move {
                let records = upstream.fetch_snapshots(ids, currency).await?;
                Ok::<_, MarketError>(UpstreamPayload::Snapshots(Arc::new(records)))
            })
            .await?;

        match payload {
            UpstreamPayload::Snapshots(records) => Ok(records),
            other => Err(unexpected_payload(&key, &other)),
        }
    }

    // -------------------------------------------------------------------------
    // Detail
    // -------------------------------------------------------------------------

    /// Snapshot plus supply, valuation and a one-sentence description for an
    /// asset that is managed locally.
    pub async fn get_asset_detail(&self, provider_id: &str, currency: &str) -> Result<AssetDetail> {
        let provider_id = normalise_provider_id(provider_id)?;
        let currency = normalise_currency(currency)?;

        let meta = self
            .store
            .find_by_provider_id(&provider_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("asset '{provider_id}' is not tracked")))?;

        let key = format!("detail-{provider_id}-{currency}");
        let upstream = &self.upstream;
        let (id, cur) = (provider_id.as_str(), currency.as_str());
        let payload = self
            .cache
            .get_or_fetch(&key, move || async move {
                let detail = upstream.fetch_asset_detail(id, cur).await?;
                Ok::<_, MarketError>(UpstreamPayload::Detail(Arc::new(detail)))
            })
            .await?;

        let raw = match payload {
            UpstreamPayload::Detail(raw) => raw,
            other => return Err(unexpected_payload(&key, &other)),
        };

        build_detail(&meta, &raw, &currency)
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// Candle series for one of the fixed periods. An empty provider series
    /// yields an empty list.
    pub async fn get_history(&self, provider_id: &str, currency: &str, period: &str) -> Result<Vec<OhlcCandle>> {
        let period: HistoryPeriod = period.parse()?;
        let provider_id = normalise_provider_id(provider_id)?;
        let currency = normalise_currency(currency)?;
        let policy = period.policy();

        let key = format!(
            "chart-{provider_id}-{currency}-{}-{}",
            policy.window_days, policy.granularity
        );
        let upstream = &self.upstream;
        let (id, cur) = (provider_id.as_str(), currency.as_str());
        let payload = self
            .cache
            .get_or_fetch(&key, move || async move {
                let series = upstream
                    .fetch_price_series(id, cur, policy.window_days, policy.granularity)
                    .await?;
                Ok::<_, MarketError>(UpstreamPayload::Series(Arc::new(series)))
            })
            .await?;

        let series: Arc<PriceSeries> = match payload {
            UpstreamPayload::Series(series) => series,
            other => return Err(unexpected_payload(&key, &other)),
        };

        let candles = period.shape(&series, self.clock.now_ms());
        info!(
            provider_id = %provider_id,
            period = %period,
            samples = series.len(),
            candles = candles.len(),
            "history computed"
        );
        Ok(candles)
    }
}

// ---------------------------------------------------------------------------
// Joining
// ---------------------------------------------------------------------------

fn join_snapshots(
    targets: &[String],
    metadata: &[AssetMetadata],
    records: &[RawMarketRecord],
    currency: &str,
) -> Vec<MarketSnapshot> {
    let local: HashMap<&str, &AssetMetadata> =
        metadata.iter().map(|m| (m.provider_id.as_str(), m)).collect();
    let live: HashMap<&str, &RawMarketRecord> = records.iter().map(|r| (r.id.as_str(), r)).collect();

    targets
        .iter()
        .filter_map(|id| match (local.get(id.as_str()), live.get(id.as_str())) {
            (Some(meta), Some(record)) => {
                let snapshot = snapshot_from_record(meta, record, currency);
                if snapshot.is_none() {
                    warn!(provider_id = %id, "dropping snapshot: provider sent no current price");
                }
                snapshot
            }
            (meta, record) => {
                warn!(
                    provider_id = %id,
                    has_metadata = meta.is_some(),
                    has_market_data = record.is_some(),
                    "dropping snapshot: metadata mismatch"
                );
                None
            }
        })
        .collect()
}

fn snapshot_from_record(meta: &AssetMetadata, record: &RawMarketRecord, currency: &str) -> Option<MarketSnapshot> {
    let current = record.current_price?;
    let pct_in_currency = record.price_change_percentage_24h_in_currency;
    let pct_generic = record.price_change_percentage_24h;

    Some(MarketSnapshot {
        asset_id: meta.id.clone(),
        provider_id: meta.provider_id.clone(),
        code: meta.code.clone(),
        name: meta.name.clone(),
        image_url: pick_image(record.image.as_deref(), meta),
        current_price: current,
        opening_price: opening_price(current, pct_in_currency, pct_generic),
        high_24h: record.high_24h,
        low_24h: record.low_24h,
        pct_change_24h: effective_pct(pct_in_currency, pct_generic),
        currency: currency.to_string(),
    })
}

fn build_detail(meta: &AssetMetadata, raw: &RawAssetDetail, currency: &str) -> Result<AssetDetail> {
    let market = raw
        .market_data
        .as_ref()
        .ok_or_else(|| MarketError::NotFound(format!("no market data for '{}'", meta.provider_id)))?;

    let current = in_currency(&market.current_price, currency).ok_or_else(|| {
        MarketError::NotFound(format!("no {currency} price for '{}'", meta.provider_id))
    })?;
    let pct_in_currency = in_currency(&market.price_change_percentage_24h_in_currency, currency);
    let pct_generic = market.price_change_percentage_24h;
    let provider_image = raw.image.as_ref().and_then(|i| i.large.as_deref());

    Ok(AssetDetail {
        snapshot: MarketSnapshot {
            asset_id: meta.id.clone(),
            provider_id: meta.provider_id.clone(),
            code: meta.code.clone(),
            name: meta.name.clone(),
            image_url: pick_image(provider_image, meta),
            current_price: current,
            opening_price: opening_price(current, pct_in_currency, pct_generic),
            high_24h: in_currency(&market.high_24h, currency),
            low_24h: in_currency(&market.low_24h, currency),
            pct_change_24h: effective_pct(pct_in_currency, pct_generic),
            currency: currency.to_string(),
        },
        market_cap: in_currency(&market.market_cap, currency),
        total_supply: market.total_supply,
        circulating_supply: market.circulating_supply,
        description: first_sentence(raw.description.as_ref().and_then(|d| d.en.as_deref())),
    })
}

fn pick_image(provider: Option<&str>, meta: &AssetMetadata) -> Option<String> {
    provider
        .filter(|url| !url.trim().is_empty())
        .map(str::to_string)
        .or_else(|| meta.image_url.clone())
}

// ---------------------------------------------------------------------------
// Input normalisation
// ---------------------------------------------------------------------------

fn normalise_currency(currency: &str) -> Result<String> {
    let currency = currency.trim().to_ascii_lowercase();
    if currency.is_empty() || !currency.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(MarketError::Validation(format!(
            "invalid currency '{currency}'"
        )));
    }
    Ok(currency)
}

/// Provider ids are lowercase ASCII letters, digits and hyphens. Anything else
/// is refused before it can reach a cache key or a provider URL.
fn is_provider_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-'))
}

fn invalid_provider_id(id: &str) -> MarketError {
    MarketError::Validation(format!("invalid asset id '{id}'"))
}

fn normalise_provider_id(id: &str) -> Result<String> {
    let id = id.trim();
    if id.is_empty() {
        return Err(MarketError::Validation("asset id must not be empty".to_string()));
    }
    if !is_provider_id(id) {
        return Err(invalid_provider_id(id));
    }
    Ok(id.to_string())
}

/// Trimmed, non-empty ids with duplicates removed, first occurrence kept.
fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
    }
    out
}

fn unexpected_payload(key: &str, payload: &UpstreamPayload) -> MarketError {
    MarketError::upstream(
        None,
        format!("cache key '{key}' held a {} payload", payload.kind()),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
