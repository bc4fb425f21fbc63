// =============================================================================
// Feed boundary — tick validation and prompt hand-off
// =============================================================================
//
// The feed transport is external; the core only sees `on_tick`. The
// dispatcher validates the raw observation, appends it to the tick store and
// hands the accepted tick to a worker channel. The callback itself never
// blocks on persistence or analysis — that work happens on the worker task
// (`run_feed_worker`).
//
// Validation rules:
//   * all prices present must be strictly positive
//   * `gram_local` is derived as ons_local / 31.1035 when absent
//   * prices round to 4 decimal places at this boundary
//   * out-of-order ticks are rejected by the store (idempotent re-sends of
//     the latest timestamp are silently absorbed)
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{EngineError, EngineResult};
use crate::hybrid::orchestrator::HybridOrchestrator;
use crate::market_data::tick_store::{Tick, TickStore};
use crate::storage::Storage;
use crate::types::GRAMS_PER_TROY_OUNCE;

/// Decimal places prices are normalised to at the feed boundary.
const PRICE_DECIMALS: u32 = 4;

/// A raw observation as delivered by the feed transport, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTick {
    pub timestamp: DateTime<Utc>,
    pub ons_usd: Decimal,
    pub usd_local: Decimal,
    pub ons_local: Decimal,
    #[serde(default)]
    pub gram_local: Option<Decimal>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "feed".to_string()
}

/// Validate a raw tick and normalise it into the store representation.
pub fn validate_tick(raw: RawTick) -> EngineResult<Tick> {
    if raw.ons_usd <= Decimal::ZERO
        || raw.usd_local <= Decimal::ZERO
        || raw.ons_local <= Decimal::ZERO
    {
        return Err(EngineError::InvalidTick(format!(
            "non-positive price at {} (ons_usd={}, usd_local={}, ons_local={})",
            raw.timestamp, raw.ons_usd, raw.usd_local, raw.ons_local
        )));
    }

    let gram_local = match raw.gram_local {
        Some(g) if g > Decimal::ZERO => g,
        Some(g) => {
            return Err(EngineError::InvalidTick(format!(
                "non-positive gram price {g} at {}",
                raw.timestamp
            )));
        }
        // Missing-data fallback: derive the gram price from the ounce price.
        None => raw.ons_local / GRAMS_PER_TROY_OUNCE,
    };

    Ok(Tick {
        timestamp: raw.timestamp,
        ons_usd: raw.ons_usd.round_dp(PRICE_DECIMALS),
        usd_local: raw.usd_local.round_dp(PRICE_DECIMALS),
        ons_local: raw.ons_local.round_dp(PRICE_DECIMALS),
        gram_local: gram_local.round_dp(PRICE_DECIMALS),
        source: raw.source,
    })
}

// ---------------------------------------------------------------------------
// FeedDispatcher
// ---------------------------------------------------------------------------

/// Accepts raw ticks from whatever transport the feed uses and hands them to
/// the engine. `on_tick` completes in O(ms): store append plus a bounded
/// channel send.
pub struct FeedDispatcher {
    store: Arc<TickStore>,
    tx: mpsc::Sender<Tick>,
}

impl FeedDispatcher {
    pub fn new(store: Arc<TickStore>, tx: mpsc::Sender<Tick>) -> Self {
        Self { store, tx }
    }

    /// Entry point invoked by the feed for every observation.
    ///
    /// Returns `true` when the tick was accepted and queued for analysis.
    /// Invalid and out-of-order ticks are dropped with a log line; a full
    /// worker queue drops the analysis hand-off but keeps the tick in the
    /// store (the next tick's analysis sees it).
    pub fn on_tick(&self, raw: RawTick) -> bool {
        let tick = match validate_tick(raw) {
            Ok(tick) => tick,
            Err(e) => {
                warn!(error = %e, "feed tick dropped by validator");
                return false;
            }
        };

        match self.store.append(tick.clone()) {
            Ok(true) => {}
            Ok(false) => {
                // Duplicate timestamp — already absorbed.
                debug!(timestamp = %tick.timestamp, "duplicate tick ignored");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "feed tick rejected by store");
                return false;
            }
        }

        if let Err(e) = self.tx.try_send(tick) {
            // Backpressure: never queue unboundedly, never block the feed.
            warn!(error = %e, "analysis hand-off queue full — tick analysis skipped");
        }

        true
    }
}

/// Worker task draining the feed channel: persists each tick and drives the
/// per-timeframe analysis scheduler. Runs until the channel closes.
pub async fn run_feed_worker(
    mut rx: mpsc::Receiver<Tick>,
    storage: Arc<Storage>,
    orchestrator: Arc<HybridOrchestrator>,
) {
    while let Some(tick) = rx.recv().await {
        if let Err(e) = storage.save_tick(&tick) {
            error!(error = %e, timestamp = %tick.timestamp, "failed to persist tick");
        }

        Arc::clone(&orchestrator).analyze(&tick).await;
    }

    debug!("feed worker channel closed — worker exiting");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn raw(gram: Option<Decimal>) -> RawTick {
        RawTick {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            ons_usd: dec!(2000.00),
            usd_local: dec!(32.5000),
            ons_local: dec!(65000.00),
            gram_local: gram,
            source: "test".to_string(),
        }
    }

    #[test]
    fn validate_passes_through_given_gram_price() {
        let tick = validate_tick(raw(Some(dec!(2089.9512)))).unwrap();
        assert_eq!(tick.gram_local, dec!(2089.9512));
    }

    #[test]
    fn validate_derives_missing_gram_price() {
        let tick = validate_tick(raw(None)).unwrap();
        // 65000 / 31.1035 = 2089.7970...
        let expected = (dec!(65000.00) / GRAMS_PER_TROY_OUNCE).round_dp(4);
        assert_eq!(tick.gram_local, expected);
        // Consistency invariant: ons_local ~= ons_usd * usd_local.
        let product = tick.ons_usd * tick.usd_local;
        let rel = ((tick.ons_local - product) / tick.ons_local).abs();
        assert!(rel < dec!(0.000001));
    }

    #[test]
    fn validate_rejects_non_positive_prices() {
        let mut bad = raw(None);
        bad.usd_local = Decimal::ZERO;
        assert!(validate_tick(bad).is_err());

        let mut bad = raw(Some(dec!(-1.0)));
        bad.gram_local = Some(dec!(-1.0));
        assert!(validate_tick(bad).is_err());
    }

    #[test]
    fn validate_rounds_to_four_decimals() {
        let mut r = raw(Some(dec!(2089.123456)));
        r.ons_usd = dec!(2000.987654);
        let tick = validate_tick(r).unwrap();
        assert_eq!(tick.ons_usd, dec!(2000.9877));
        assert_eq!(tick.gram_local, dec!(2089.1235));
    }

    #[tokio::test]
    async fn dispatcher_appends_and_queues() {
        let store = Arc::new(TickStore::new(100));
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = FeedDispatcher::new(store.clone(), tx);

        assert!(dispatcher.on_tick(raw(None)));
        assert_eq!(store.len(), 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn dispatcher_drops_duplicates() {
        let store = Arc::new(TickStore::new(100));
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = FeedDispatcher::new(store.clone(), tx);

        assert!(dispatcher.on_tick(raw(None)));
        assert!(!dispatcher.on_tick(raw(None)));
        assert_eq!(store.len(), 1);

        // Only the first tick reaches the worker queue.
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
