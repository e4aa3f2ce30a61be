// =============================================================================
// OHLC bucketing: raw price samples to fixed-duration candles
// =============================================================================
//
// Algorithm:
//   1. Stable-sort samples by timestamp.
//   2. The first bucket starts at the first sample's timestamp.
//   3. For up to `target` iterations, consume every sample in
//      [start, start + bucket_ms). A non-empty window emits a candle (first
//      price = open, last = close, max = high, min = low); an empty window
//      emits nothing but still uses up an iteration. The start then advances
//      by `bucket_ms`.
//   4. Stop when iterations or samples run out; truncate to `target`.
//
// Buckets are anchored to the first sample, not to wall-clock boundaries.
// =============================================================================

use crate::types::{OhlcCandle, PricePoint};

/// Bucket `points` into at most `target` candles of `bucket_ms` each.
///
/// Total over its inputs: an empty slice, `target == 0` or a non-positive
/// bucket width all yield an empty vec.
pub fn aggregate_to_ohlc(points: &[PricePoint], bucket_ms: i64, target: usize) -> Vec<OhlcCandle> {
    if points.is_empty() || target == 0 || bucket_ms <= 0 {
        return Vec::new();
    }

    let mut sorted = points.to_vec();
    // `sort_by_key` is stable: equal timestamps keep their arrival order.
    sorted.sort_by_key(|p| p.timestamp_ms);

    let last_ts = sorted[sorted.len() - 1].timestamp_ms;
    let mut bucket_start = sorted[0].timestamp_ms;
    let mut cursor = 0;
    let mut candles = Vec::with_capacity(target);

    for _ in 0..target {
        if cursor >= sorted.len() {
            break;
        }
        let bucket_end = bucket_start.saturating_add(bucket_ms);

        let window_start = cursor;
        while cursor < sorted.len() && sorted[cursor].timestamp_ms < bucket_end {
            cursor += 1;
        }
        // Samples are sorted and the first bucket starts at the earliest one,
        // so nothing in the consumed range precedes `bucket_start`.
        let window = &sorted[window_start..cursor];

        if let Some(candle) = summarise(bucket_start, window) {
            candles.push(candle);
        }

        bucket_start = bucket_end;

        // Unreachable before `target` candles exist, kept so the candle count
        // matches the published behaviour exactly.
        if bucket_start > last_ts && candles.len() >= target {
            break;
        }
    }

    candles.truncate(target);
    candles
}

fn summarise(bucket_start: i64, window: &[PricePoint]) -> Option<OhlcCandle> {
    let first = window.first()?;
    let last = window.last()?;

    let (high, low) = window
        .iter()
        .fold((f64::NEG_INFINITY, f64::INFINITY), |(hi, lo), p| {
            (hi.max(p.price), lo.min(p.price))
        });

    Some(OhlcCandle {
        bucket_start_ms: bucket_start,
        open: first.price,
        high,
        low,
        close: last.price,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
