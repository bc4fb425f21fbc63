// =============================================================================
// Hybrid Orchestrator — per-tick, per-timeframe pipeline scheduling
// =============================================================================
//
// For each tick, every timeframe whose analysis interval has elapsed gets one
// pipeline run. Scheduled timeframes run concurrently and independently; a
// failure in one never touches the others, and at most one analysis per
// timeframe is in flight at a time (late runs are skipped, never queued).
//
// One run materializes the gram candles (>= 60% of the requirement),
// executes analyzers -> sub-analyzers -> combiner, persists the
// HybridAnalysisResult (plus a trading-signal row for non-HOLD decisions)
// and refreshes the bounded result cache (<= 10 entries, 30 s TTL).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, warn};

use crate::analyzers::{
    gram, AdvancedAnalysis, AdvancedAnalyzer, CurrencyRiskAnalysis, CurrencyRiskAnalyzer,
    GlobalTrendAnalyzer, GramAnalyzer,
};
use crate::error::EngineResult;
use crate::hybrid::combiner::{
    CombinerInputs, CombinerSettings, MultiDayPattern, SignalCombiner,
};
use crate::hybrid::confluence::{ConfluenceManager, TimeframeSignalSummary};
use crate::hybrid::divergence::DivergenceManager;
use crate::hybrid::momentum::MomentumManager;
use crate::hybrid::smart_money::SmartMoneyManager;
use crate::hybrid::structure::StructureManager;
use crate::hybrid::{HybridAnalysisResult, OscillatorSnapshot};
use crate::market_data::{Tick, TickStore};
use crate::runtime_config::RuntimeConfig;
use crate::storage::Storage;
use crate::types::{RiskLevel, Signal, Timeframe};

/// Bounded result cache parameters.
const CACHE_CAPACITY: usize = 10;
const CACHE_TTL_SECS: u64 = 30;

/// Raw market ticks consulted for the ounce/USD and USD/local series.
const MARKET_WINDOW: usize = 200;

struct CacheEntry {
    inserted_at: Instant,
    result: HybridAnalysisResult,
}

struct TimeframeState {
    last_analysis: RwLock<DateTime<Utc>>,
    in_flight: AtomicBool,
}

pub struct HybridOrchestrator {
    store: Arc<TickStore>,
    storage: Arc<Storage>,
    config: Arc<RuntimeConfig>,

    gram: GramAnalyzer,
    global_trend: GlobalTrendAnalyzer,
    currency_risk: CurrencyRiskAnalyzer,
    advanced: AdvancedAnalyzer,
    divergence: DivergenceManager,
    momentum: MomentumManager,
    structure: StructureManager,
    smart_money: SmartMoneyManager,
    confluence: ConfluenceManager,
    combiner: SignalCombiner,

    timeframes: HashMap<Timeframe, TimeframeState>,
    cache: RwLock<Vec<CacheEntry>>,
    /// Bumped on every persisted result; the dashboard snapshot reads it.
    version: AtomicU64,
}

impl HybridOrchestrator {
    pub fn new(store: Arc<TickStore>, storage: Arc<Storage>, config: Arc<RuntimeConfig>) -> Self {
        let combiner = SignalCombiner::new(CombinerSettings::from_config(&config));

        let timeframes = Timeframe::ALL
            .iter()
            .map(|&tf| {
                (
                    tf,
                    TimeframeState {
                        last_analysis: RwLock::new(DateTime::<Utc>::MIN_UTC),
                        in_flight: AtomicBool::new(false),
                    },
                )
            })
            .collect();

        Self {
            store,
            storage,
            config,
            gram: GramAnalyzer::default(),
            global_trend: GlobalTrendAnalyzer,
            currency_risk: CurrencyRiskAnalyzer,
            advanced: AdvancedAnalyzer,
            divergence: DivergenceManager,
            momentum: MomentumManager,
            structure: StructureManager,
            smart_money: SmartMoneyManager,
            confluence: ConfluenceManager,
            combiner,
            timeframes,
            cache: RwLock::new(Vec::new()),
            version: AtomicU64::new(1),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Schedule due timeframes for this tick and run them concurrently.
    /// Never propagates analyzer failures to the caller.
    pub async fn analyze(self: Arc<Self>, tick: &Tick) {
        let now = tick.timestamp;
        let mut scheduled = Vec::new();

        for &tf in &Timeframe::ALL {
            let state = &self.timeframes[&tf];
            let interval = chrono::Duration::minutes(i64::from(
                self.config.analysis_interval_minutes(tf),
            ));

            let due = now - *state.last_analysis.read() >= interval;
            if !due {
                continue;
            }

            // Skip, never queue: one in-flight analysis per timeframe.
            if state
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(timeframe = %tf, "analysis still in flight — tick skipped");
                continue;
            }

            *state.last_analysis.write() = now;

            let orchestrator = Arc::clone(&self);
            scheduled.push(tokio::spawn(async move {
                let outcome = orchestrator.analyze_one(tf, now);
                orchestrator.timeframes[&tf]
                    .in_flight
                    .store(false, Ordering::SeqCst);
                if let Err(e) = outcome {
                    warn!(timeframe = %tf, error = %e, "hybrid analysis failed");
                }
            }));
        }

        for handle in scheduled {
            if let Err(e) = handle.await {
                warn!(error = %e, "analysis task panicked");
            }
        }
    }

    /// The latest result for a timeframe: cache first, storage as fallback.
    pub fn latest(&self, timeframe: Timeframe) -> Option<HybridAnalysisResult> {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache
                .iter()
                .filter(|e| e.result.timeframe == timeframe)
                .max_by_key(|e| e.result.timestamp)
            {
                return Some(entry.result.clone());
            }
        }

        self.storage
            .latest_hybrid_analysis(Some(timeframe))
            .ok()
            .flatten()
    }

    /// The latest result across all timeframes.
    pub fn latest_any(&self) -> Option<HybridAnalysisResult> {
        self.storage.latest_hybrid_analysis(None).ok().flatten()
    }

    // -------------------------------------------------------------------------
    // One pipeline run
    // -------------------------------------------------------------------------

    fn analyze_one(&self, tf: Timeframe, now: DateTime<Utc>) -> EngineResult<()> {
        // Serve a fresh cached result instead of recomputing.
        if self.cached_fresh(tf) {
            debug!(timeframe = %tf, "cache fresh — skipping recompute");
            return Ok(());
        }

        // ── Materialize candles ──────────────────────────────────────────
        let required = self.config.required_candles(tf);
        let interval_minutes = self.config.analysis_interval_minutes(tf);
        let candles = self.store.gram_candles(interval_minutes, required);

        let minimum = (required as f64 * self.config.candle_fill_ratio).ceil() as usize;
        if candles.len() < minimum {
            debug!(
                timeframe = %tf,
                have = candles.len(),
                need = minimum,
                "insufficient gram candles — no analysis"
            );
            return Ok(());
        }

        let market_ticks = self.store.latest_n(MARKET_WINDOW);
        let ons_prices: Vec<f64> = market_ticks
            .iter()
            .map(|t| t.ons_usd.to_f64().unwrap_or(0.0))
            .collect();
        let usd_rates: Vec<f64> = market_ticks
            .iter()
            .map(|t| t.usd_local.to_f64().unwrap_or(0.0))
            .collect();

        // ── Analyzer stack ───────────────────────────────────────────────
        let gram_analysis = match self.gram.analyze(&candles).ready() {
            Some(analysis) => analysis,
            None => {
                debug!(timeframe = %tf, "gram analyzer: insufficient data");
                return Ok(());
            }
        };

        let global_analysis = match self.global_trend.analyze(&ons_prices).ready() {
            Some(analysis) => analysis,
            None => {
                debug!(timeframe = %tf, "global trend analyzer: insufficient data");
                return Ok(());
            }
        };

        // Currency risk and advanced degrade to neutral defaults rather than
        // blocking the pipeline.
        let currency_analysis = self
            .currency_risk
            .analyze(&usd_rates)
            .ready()
            .unwrap_or(CurrencyRiskAnalysis {
                risk_level: RiskLevel::Medium,
                volatility: 0.0,
                window_change_pct: 0.0,
            });

        let advanced_analysis = self
            .advanced
            .analyze(&candles)
            .ready()
            .unwrap_or(AdvancedAnalysis {
                cci: None,
                mfi: None,
                rsi: None,
                combined_signal: Signal::Hold,
                combined_confidence: 0.0,
            });

        // ── Sub-analyzers ────────────────────────────────────────────────
        let osc = OscillatorSnapshot::from_gram(&gram_analysis);
        let divergence = self.divergence.analyze(&candles, &osc);
        let momentum = self.momentum.analyze(&candles, &osc);
        let structure = self.structure.analyze(&candles);
        let smart_money = self.smart_money.analyze(
            &candles,
            structure
                .nearest_support
                .or_else(|| gram_analysis.support_levels.first().map(|l| l.level)),
            structure
                .nearest_resistance
                .or_else(|| gram_analysis.resistance_levels.first().map(|l| l.level)),
        );

        let multi_day = self.multi_day_pattern(&gram_analysis.price);

        // ── Fusion ───────────────────────────────────────────────────────
        let market_volatility = gram_analysis
            .indicators
            .atr
            .as_ref()
            .map(|a| a.atr_percent)
            .unwrap_or(0.0);

        let inputs = CombinerInputs {
            gram: &gram_analysis,
            global_trend: &global_analysis,
            currency_risk: &currency_analysis,
            advanced: &advanced_analysis,
            patterns: &gram_analysis.patterns,
            divergence: &divergence,
            momentum: &momentum,
            smart_money: &smart_money,
            multi_day,
            timeframe: tf,
            market_volatility,
        };
        let combined = self.combiner.combine(&inputs);

        // ── Risk levels for the FINAL signal ─────────────────────────────
        let (stop_loss, take_profit) = if combined.signal == gram_analysis.signal {
            (gram_analysis.stop_loss, gram_analysis.take_profit)
        } else if combined.signal.is_directional() {
            // An override changed the direction; recompute levels for it.
            let atr = gram_analysis
                .indicators
                .atr
                .as_ref()
                .map(|a| a.atr)
                .unwrap_or(10.0);
            gram::calculate_risk_levels(
                gram_analysis.price.to_f64().unwrap_or(0.0),
                combined.signal,
                atr,
                &gram_analysis.support_levels,
                &gram_analysis.resistance_levels,
            )
        } else {
            (None, None)
        };

        let risk_reward_ratio = match (stop_loss, take_profit) {
            (Some(sl), Some(tp)) => {
                let price = gram_analysis.price;
                let risk = (price - sl).abs();
                if risk > rust_decimal::Decimal::ZERO {
                    ((tp - price).abs() / risk).to_f64().map(|r| (r * 100.0).round() / 100.0)
                } else {
                    None
                }
            }
            _ => None,
        };

        // ── Confluence annotation across timeframes ──────────────────────
        let peer_summaries = self.peer_summaries(tf);
        let confluence = (!peer_summaries.is_empty()).then(|| {
            self.confluence
                .analyze(tf, combined.signal, &peer_summaries)
        });

        let recommendations = build_recommendations(&combined, &global_analysis, &structure);
        let summary = format!(
            "{} {} ({} confidence {:.0}%), global trend {} {}, currency risk {}",
            tf,
            combined.signal,
            combined.strength,
            combined.confidence * 100.0,
            global_analysis.trend_direction,
            global_analysis.trend_strength,
            currency_analysis.risk_level
        );

        let result = HybridAnalysisResult {
            timestamp: now,
            timeframe: tf,
            gram_price: gram_analysis.price,
            signal: combined.signal,
            signal_strength: combined.strength,
            confidence: combined.confidence,
            position_size: combined.position_size,
            stop_loss,
            take_profit,
            risk_reward_ratio,
            global_trend_direction: global_analysis.trend_direction,
            global_trend_strength: global_analysis.trend_strength,
            currency_risk_level: currency_analysis.risk_level,
            recommendations,
            summary,
            dip: combined.dip.clone(),
            gram: gram_analysis,
            global_trend: global_analysis,
            currency_risk: currency_analysis,
            advanced: advanced_analysis,
            confluence,
        };

        // ── Persist (with retry inside storage) and cache ────────────────
        self.storage.save_hybrid_analysis(&result)?;
        if result.signal.is_directional() {
            self.storage.save_trading_signal(&result)?;
        }
        self.insert_cache(result.clone());
        self.version.fetch_add(1, Ordering::SeqCst);

        if result.signal.is_directional() {
            info!(
                timeframe = %tf,
                signal = %result.signal,
                strength = %result.signal_strength,
                confidence = format!("{:.2}", result.confidence),
                price = %result.gram_price,
                stop_loss = ?result.stop_loss,
                take_profit = ?result.take_profit,
                "hybrid signal"
            );
        } else {
            debug!(timeframe = %tf, confidence = result.confidence, "hybrid HOLD");
        }

        Ok(())
    }

    /// Whether the cache already holds a fresh entry for `tf`.
    fn cached_fresh(&self, tf: Timeframe) -> bool {
        let cache = self.cache.read();
        cache.iter().any(|entry| {
            entry.result.timeframe == tf
                && entry.inserted_at.elapsed().as_secs() < CACHE_TTL_SECS
        })
    }

    fn insert_cache(&self, result: HybridAnalysisResult) {
        let mut cache = self.cache.write();
        // One entry per timeframe; oldest evicted past capacity.
        cache.retain(|entry| entry.result.timeframe != result.timeframe);
        cache.push(CacheEntry {
            inserted_at: Instant::now(),
            result,
        });
        while cache.len() > CACHE_CAPACITY {
            cache.remove(0);
        }
    }

    /// Latest analyses of ALL timeframes for the confluence pass.
    fn peer_summaries(&self, _current: Timeframe) -> HashMap<Timeframe, TimeframeSignalSummary> {
        let mut summaries = HashMap::new();
        for &tf in &Timeframe::ALL {
            if let Some(result) = self.latest(tf) {
                summaries.insert(
                    tf,
                    TimeframeSignalSummary {
                        signal: result.signal,
                        confidence: result.confidence,
                        gram_trend: result.gram.trend,
                    },
                );
            }
        }
        summaries
    }

    /// Is the current price near the 3-day extreme? (Feeds the multi-day
    /// override in the combiner.)
    fn multi_day_pattern(&self, price: &rust_decimal::Decimal) -> MultiDayPattern {
        let daily = self.store.gram_candles(1440, 3);
        if daily.is_empty() {
            return MultiDayPattern::default();
        }

        let low = daily.iter().map(|c| c.low).min().unwrap_or_default();
        let high = daily.iter().map(|c| c.high).max().unwrap_or_default();
        let price = *price;

        let near = |level: rust_decimal::Decimal| {
            level > rust_decimal::Decimal::ZERO
                && ((price - level) / level).abs()
                    < rust_decimal::Decimal::new(1, 2) // 1%
        };

        MultiDayPattern {
            is_near_bottom: near(low),
            is_near_top: near(high),
        }
    }
}

fn build_recommendations(
    combined: &crate::hybrid::combiner::CombinedSignal,
    global: &crate::analyzers::GlobalTrendAnalysis,
    structure: &crate::hybrid::structure::StructureAnalysis,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    match combined.signal {
        Signal::Buy => recommendations.push(format!(
            "Buy with {:.0}% of deployable capital",
            combined.position_size.fraction * 100.0
        )),
        Signal::Sell => recommendations.push("Reduce exposure on this timeframe".to_string()),
        Signal::Hold => recommendations.push("No directional edge — stay flat".to_string()),
    }

    if combined.dip.is_dip_opportunity {
        recommendations.push("Dip opportunity: tight stop 1-2% below entry".to_string());
    }

    match global.trend_direction {
        crate::types::TrendDirection::Bullish => {
            recommendations.push("Global trend supports gram longs".to_string())
        }
        crate::types::TrendDirection::Bearish => {
            recommendations.push("Global trend bearish — counter-trend entries need extra confirmation".to_string())
        }
        crate::types::TrendDirection::Neutral => {
            recommendations.push("Global trend flat — follow the local structure".to_string())
        }
    }

    if let Some(zone) = &structure.pullback_zone {
        recommendations.push(format!(
            "Structure pullback zone: {} near {}",
            zone.signal, zone.level
        ));
    }

    recommendations
}
