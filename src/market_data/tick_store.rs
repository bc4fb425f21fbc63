// =============================================================================
// Tick Store — append-only tick history with lazy OHLC materialization
// =============================================================================
//
// The store is the single owner of raw price ticks. The feed is the only
// writer; every other subsystem reads. Candles are never stored: they are a
// pure function of the tick window, materialized on demand at any minute
// interval.
//
// Bucketing: bucket key = floor(epoch_secs / (interval * 60)) * interval * 60.
// Empty buckets are skipped, never synthesized from the prior close — the
// returned sequence may have gaps and consumers must tolerate them. The most
// recent bucket is live and keeps changing while ticks arrive.
//
// Thread-safety: many-reader / single-writer via `parking_lot::RwLock`.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One atomic price observation. Written once by the feed; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Observation time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Ounce gold in USD.
    pub ons_usd: Decimal,
    /// USD in local currency.
    pub usd_local: Decimal,
    /// Ounce gold in local currency.
    pub ons_local: Decimal,
    /// Gram gold in local currency (derived from `ons_local` when the feed
    /// omits it).
    pub gram_local: Decimal,
    /// Feed identifier.
    pub source: String,
}

/// One OHLC bucket materialized from the tick stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, UTC.
    pub timestamp: DateTime<Utc>,
    /// Bucket width in minutes.
    pub interval_minutes: u32,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Ticks that fell in the bucket. Doubles as the volume proxy for
    /// indicators that want one.
    pub tick_count: u64,
}

impl Candle {
    /// Body size as an absolute price distance.
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// Full high-low range.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Which price series a candle request materializes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriceField {
    OnsLocal,
    GramLocal,
}

// ---------------------------------------------------------------------------
// TickStore
// ---------------------------------------------------------------------------

/// Bounded in-memory tick window. Appends are idempotent by timestamp and
/// reject out-of-order arrivals; reads hand out owned copies.
pub struct TickStore {
    ticks: RwLock<VecDeque<Tick>>,
    max_ticks: usize,
}

impl TickStore {
    /// Create a store retaining at most `max_ticks` observations.
    pub fn new(max_ticks: usize) -> Self {
        Self {
            ticks: RwLock::new(VecDeque::with_capacity(max_ticks.min(16_384))),
            max_ticks,
        }
    }

    /// Append a validated tick.
    ///
    /// * Re-appending the latest timestamp is a silent no-op (`Ok(false)`).
    /// * A tick older than the latest is rejected as out-of-order.
    /// * Non-positive prices are rejected and logged — the store never holds
    ///   a tick that would poison candle materialization.
    pub fn append(&self, tick: Tick) -> EngineResult<bool> {
        if tick.ons_usd <= Decimal::ZERO
            || tick.usd_local <= Decimal::ZERO
            || tick.ons_local <= Decimal::ZERO
            || tick.gram_local <= Decimal::ZERO
        {
            warn!(timestamp = %tick.timestamp, "rejecting tick with non-positive price");
            return Err(EngineError::InvalidTick(format!(
                "non-positive price at {}",
                tick.timestamp
            )));
        }

        let mut ticks = self.ticks.write();

        if let Some(last) = ticks.back() {
            if tick.timestamp == last.timestamp {
                return Ok(false);
            }
            if tick.timestamp < last.timestamp {
                return Err(EngineError::InvalidTick(format!(
                    "out-of-order tick {} behind {}",
                    tick.timestamp, last.timestamp
                )));
            }
        }

        ticks.push_back(tick);
        while ticks.len() > self.max_ticks {
            ticks.pop_front();
        }

        Ok(true)
    }

    /// The most recent tick, if any.
    pub fn latest(&self) -> Option<Tick> {
        self.ticks.read().back().cloned()
    }

    /// The most recent `n` ticks, oldest-first.
    pub fn latest_n(&self, n: usize) -> Vec<Tick> {
        let ticks = self.ticks.read();
        let start = ticks.len().saturating_sub(n);
        ticks.iter().skip(start).cloned().collect()
    }

    /// All ticks with `from <= timestamp < to`, oldest-first.
    pub fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Tick> {
        self.ticks
            .read()
            .iter()
            .filter(|t| t.timestamp >= from && t.timestamp < to)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ticks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.read().is_empty()
    }

    /// Drop ticks older than `cutoff`. Called by the daily maintenance pass.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut ticks = self.ticks.write();
        let before = ticks.len();
        while matches!(ticks.front(), Some(t) if t.timestamp < cutoff) {
            ticks.pop_front();
        }
        before - ticks.len()
    }

    // -------------------------------------------------------------------------
    // Candle materialization
    // -------------------------------------------------------------------------

    /// Materialize ounce-local OHLC candles at `interval_minutes`, oldest
    /// first, at most `limit` buckets.
    pub fn candles(&self, interval_minutes: u32, limit: usize) -> Vec<Candle> {
        self.materialize(interval_minutes, limit, PriceField::OnsLocal)
    }

    /// Materialize gram-local OHLC candles at `interval_minutes`, oldest
    /// first, at most `limit` buckets.
    pub fn gram_candles(&self, interval_minutes: u32, limit: usize) -> Vec<Candle> {
        self.materialize(interval_minutes, limit, PriceField::GramLocal)
    }

    fn materialize(&self, interval_minutes: u32, limit: usize, field: PriceField) -> Vec<Candle> {
        if interval_minutes == 0 || limit == 0 {
            return Vec::new();
        }

        let bucket_secs = i64::from(interval_minutes) * 60;
        let ticks = self.ticks.read();

        let mut candles: Vec<Candle> = Vec::new();
        let mut current_bucket: Option<i64> = None;

        // Ticks are timestamp-ordered, so each bucket's ticks are contiguous.
        for tick in ticks.iter() {
            let price = match field {
                PriceField::OnsLocal => tick.ons_local,
                PriceField::GramLocal => tick.gram_local,
            };

            let bucket = tick.timestamp.timestamp().div_euclid(bucket_secs) * bucket_secs;

            if current_bucket == Some(bucket) {
                if let Some(candle) = candles.last_mut() {
                    if price > candle.high {
                        candle.high = price;
                    }
                    if price < candle.low {
                        candle.low = price;
                    }
                    candle.close = price;
                    candle.tick_count += 1;
                }
            } else {
                current_bucket = Some(bucket);
                let bucket_start = Utc
                    .timestamp_opt(bucket, 0)
                    .single()
                    .unwrap_or(tick.timestamp);
                candles.push(Candle {
                    timestamp: bucket_start,
                    interval_minutes,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    tick_count: 1,
                });
            }
        }

        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        candles
    }
}

impl std::fmt::Debug for TickStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickStore")
            .field("ticks", &self.len())
            .field("max_ticks", &self.max_ticks)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick_at(epoch_secs: i64, gram: Decimal) -> Tick {
        Tick {
            timestamp: Utc.timestamp_opt(epoch_secs, 0).unwrap(),
            ons_usd: dec!(2000.0),
            usd_local: dec!(32.50),
            ons_local: dec!(65000.0),
            gram_local: gram,
            source: "test".to_string(),
        }
    }

    // ---- append ----------------------------------------------------------

    #[test]
    fn append_then_latest_roundtrip() {
        let store = TickStore::new(100);
        let t = tick_at(1_700_000_000, dec!(2089.95));
        store.append(t.clone()).unwrap();
        assert_eq!(store.latest(), Some(t));
    }

    #[test]
    fn append_is_idempotent_by_timestamp() {
        let store = TickStore::new(100);
        let t = tick_at(1_700_000_000, dec!(2089.95));
        assert!(store.append(t.clone()).unwrap());
        assert!(!store.append(t).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_rejects_out_of_order() {
        let store = TickStore::new(100);
        store.append(tick_at(1_700_000_060, dec!(2090.0))).unwrap();
        let result = store.append(tick_at(1_700_000_000, dec!(2089.0)));
        assert!(result.is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_rejects_non_positive_price() {
        let store = TickStore::new(100);
        let mut t = tick_at(1_700_000_000, dec!(2089.95));
        t.gram_local = Decimal::ZERO;
        assert!(store.append(t).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn ring_trims_to_max() {
        let store = TickStore::new(3);
        for i in 0..5 {
            store
                .append(tick_at(1_700_000_000 + i * 5, dec!(2089.95)))
                .unwrap();
        }
        assert_eq!(store.len(), 3);
        let ticks = store.latest_n(10);
        assert_eq!(ticks[0].timestamp.timestamp(), 1_700_000_010);
    }

    #[test]
    fn latest_n_is_oldest_first() {
        let store = TickStore::new(100);
        for i in 0..4 {
            store
                .append(tick_at(1_700_000_000 + i * 5, Decimal::from(2000 + i)))
                .unwrap();
        }
        let ticks = store.latest_n(2);
        assert_eq!(ticks.len(), 2);
        assert!(ticks[0].timestamp < ticks[1].timestamp);
    }

    #[test]
    fn range_is_half_open() {
        let store = TickStore::new(100);
        for i in 0..4 {
            store
                .append(tick_at(1_700_000_000 + i * 60, dec!(2089.95)))
                .unwrap();
        }
        let from = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        let to = Utc.timestamp_opt(1_700_000_180, 0).unwrap();
        let ticks = store.range(from, to);
        assert_eq!(ticks.len(), 2);
    }

    // ---- candle materialization -----------------------------------------

    #[test]
    fn candle_ohlc_from_bucket() {
        let store = TickStore::new(100);
        // Four ticks inside one 15-minute bucket.
        let base = 1_700_000_130; // not bucket-aligned on purpose
        for (i, gram) in [dec!(2000.0), dec!(2010.0), dec!(1995.0), dec!(2005.0)]
            .iter()
            .enumerate()
        {
            store
                .append(tick_at(base + i as i64 * 10, *gram))
                .unwrap();
        }

        let candles = store.gram_candles(15, 10);
        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(c.open, dec!(2000.0));
        assert_eq!(c.high, dec!(2010.0));
        assert_eq!(c.low, dec!(1995.0));
        assert_eq!(c.close, dec!(2005.0));
        assert_eq!(c.tick_count, 4);
        // Bucket start is floor-aligned to the interval.
        assert_eq!(c.timestamp.timestamp() % (15 * 60), 0);
        assert!(c.low <= c.open && c.open <= c.high);
        assert!(c.low <= c.close && c.close <= c.high);
    }

    #[test]
    fn empty_buckets_are_skipped() {
        let store = TickStore::new(100);
        let bucket: i64 = 15 * 60;
        // One tick in bucket 0, nothing in bucket 1, one tick in bucket 2.
        store
            .append(tick_at(1_699_999_200, dec!(2000.0)))
            .unwrap();
        store
            .append(tick_at(1_699_999_200 + 2 * bucket, dec!(2010.0)))
            .unwrap();

        let candles = store.gram_candles(15, 10);
        assert_eq!(candles.len(), 2);
        let gap = candles[1].timestamp.timestamp() - candles[0].timestamp.timestamp();
        assert_eq!(gap, 2 * bucket);
    }

    #[test]
    fn materialization_is_deterministic() {
        let store = TickStore::new(100);
        for i in 0..50 {
            store
                .append(tick_at(
                    1_700_000_000 + i * 60,
                    Decimal::from(2000 + (i * 7) % 13),
                ))
                .unwrap();
        }
        let a = store.gram_candles(15, 100);
        let b = store.gram_candles(15, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn candles_use_ounce_local_series() {
        let store = TickStore::new(100);
        store.append(tick_at(1_700_000_000, dec!(2089.95))).unwrap();
        let ons = store.candles(15, 10);
        assert_eq!(ons[0].close, dec!(65000.0));
        let gram = store.gram_candles(15, 10);
        assert_eq!(gram[0].close, dec!(2089.95));
    }

    #[test]
    fn limit_keeps_newest_buckets() {
        let store = TickStore::new(1000);
        for i in 0..10 {
            store
                .append(tick_at(1_699_999_200 + i * 900, Decimal::from(2000 + i)))
                .unwrap();
        }
        let candles = store.gram_candles(15, 3);
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[2].close, Decimal::from(2009));
    }

    #[test]
    fn prune_drops_old_ticks() {
        let store = TickStore::new(1000);
        for i in 0..10 {
            store
                .append(tick_at(1_700_000_000 + i * 60, dec!(2000.0)))
                .unwrap();
        }
        let cutoff = Utc.timestamp_opt(1_700_000_300, 0).unwrap();
        let dropped = store.prune_older_than(cutoff);
        assert_eq!(dropped, 5);
        assert_eq!(store.len(), 5);
    }
}
