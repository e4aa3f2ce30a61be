// =============================================================================
// History periods: the three fixed resolutions offered to clients
// =============================================================================
//
//   period  | provider request              | local shaping
//   --------+-------------------------------+-------------------------------------
//   daily   | ohlc candles, 90-day window   | keep the last 60 candles
//   hourly  | raw prices, 2-day window      | 1 h buckets, 48 candles
//   minute  | raw prices, 1-day window      | drop samples older than 2 h,
//           |                               | 1 min buckets, 60 candles
// =============================================================================

use std::str::FromStr;

use serde::Serialize;

use super::aggregator::aggregate_to_ohlc;
use crate::error::MarketError;
use crate::types::{OhlcCandle, PricePoint, PriceSeries, SeriesGranularity};

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Resolution requested by a history caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryPeriod {
    Daily,
    Hourly,
    Minute,
}

impl FromStr for HistoryPeriod {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "hourly" => Ok(Self::Hourly),
            "minute" => Ok(Self::Minute),
            other => Err(MarketError::Validation(format!(
                "invalid period '{other}': must be daily, hourly, or minute"
            ))),
        }
    }
}

impl std::fmt::Display for HistoryPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Hourly => write!(f, "hourly"),
            Self::Minute => write!(f, "minute"),
        }
    }
}

/// How one period is fetched and shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodPolicy {
    pub window_days: u32,
    pub granularity: SeriesGranularity,
    pub bucket_ms: i64,
    pub target: usize,
    /// Samples older than `now - max_age_ms` are discarded before bucketing.
    pub max_age_ms: Option<i64>,
}

impl HistoryPeriod {
    pub fn policy(self) -> PeriodPolicy {
        match self {
            Self::Daily => PeriodPolicy {
                window_days: 90,
                granularity: SeriesGranularity::Ohlc,
                bucket_ms: DAY_MS,
                target: 60,
                max_age_ms: None,
            },
            Self::Hourly => PeriodPolicy {
                window_days: 2,
                granularity: SeriesGranularity::PricesHourly,
                bucket_ms: HOUR_MS,
                target: 48,
                max_age_ms: None,
            },
            Self::Minute => PeriodPolicy {
                window_days: 1,
                granularity: SeriesGranularity::Prices,
                bucket_ms: MINUTE_MS,
                target: 60,
                max_age_ms: Some(2 * HOUR_MS),
            },
        }
    }

    /// Turn a provider series into the candle list for this period.
    ///
    /// Provider candles are only re-sliced (chronological tail); raw points go
    /// through the bucketing primitive.
    pub fn shape(self, series: &PriceSeries, now_ms: i64) -> Vec<OhlcCandle> {
        let policy = self.policy();
        match series {
            PriceSeries::Candles(candles) => tail(candles, policy.target),
            PriceSeries::Points(points) => {
                let eligible = recent_points(points, policy.max_age_ms, now_ms);
                aggregate_to_ohlc(&eligible, policy.bucket_ms, policy.target)
            }
        }
    }
}

/// Keep samples at or after `now_ms - max_age_ms`.
pub fn recent_points(points: &[PricePoint], max_age_ms: Option<i64>, now_ms: i64) -> Vec<PricePoint> {
    match max_age_ms {
        Some(max_age) => {
            let cutoff = now_ms - max_age;
            points
                .iter()
                .copied()
                .filter(|p| p.timestamp_ms >= cutoff)
                .collect()
        }
        None => points.to_vec(),
    }
}

/// Most recent `count` candles in ascending order, one per bucket start.
fn tail(candles: &[OhlcCandle], count: usize) -> Vec<OhlcCandle> {
    let mut ordered = candles.to_vec();
    ordered.sort_by_key(|c| c.bucket_start_ms);
    // Keep the later of two rows that share a start.
    ordered.reverse();
    ordered.dedup_by_key(|c| c.bucket_start_ms);
    ordered.reverse();

    let skip = ordered.len().saturating_sub(count);
    ordered.split_off(skip)
}
