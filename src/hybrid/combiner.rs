// =============================================================================
// Signal Combiner — weighted fusion of every analyzer into one decision
// =============================================================================
//
// Weights: gram 0.30, global trend 0.40 (60% direction alignment + 40%
// ounce/USD indicator verdict), currency risk 0.05, advanced indicators
// 0.15, pattern recognition 0.10.
//
// Overrides, in order:
//   1. gram override  — a directional gram signal at >= 0.45 confidence (or
//      a confirmed multi-day top/bottom at >= 0.45) bypasses score fusion,
//      the post-filters, the currency down-weight and the mismatch penalty.
//   2. dip override   — in a BEARISH global trend a dip score >= 0.4 forces
//      BUY with confidence = max(current, dip * 1.2), bypassing the
//      post-filters and the mismatch penalty.
//
// Post-filters for everything else, in order: volatility floor, per-timeframe
// confidence floor (x1.1 trading-cost multiplier), elevated-risk floor
// (0.85), strong trend alignment, then the mismatch penalty (x0.85).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::analyzers::{AdvancedAnalysis, CurrencyRiskAnalysis, GlobalTrendAnalysis, GramAnalysis};
use crate::hybrid::divergence::DivergenceAnalysis;
use crate::hybrid::momentum::MomentumAnalysis;
use crate::hybrid::smart_money::SmartMoneyAnalysis;
use crate::indicators::patterns::PatternReport;
use crate::runtime_config::RuntimeConfig;
use crate::types::{RiskLevel, Signal, SignalStrength, Timeframe, TrendDirection, TrendStrength};

// Analyzer family weights (sum ~ 1.0).
const W_GRAM: f64 = 0.30;
const W_GLOBAL: f64 = 0.40;
const W_CURRENCY: f64 = 0.05;
const W_ADVANCED: f64 = 0.15;
const W_PATTERN: f64 = 0.10;

// Dip-detection sub-weights.
const W_DIP_DIVERGENCE: f64 = 0.35;
const W_DIP_OVERSOLD: f64 = 0.25;
const W_DIP_EXHAUSTION: f64 = 0.20;
const W_DIP_SMART_MONEY: f64 = 0.20;

const GRAM_OVERRIDE_CONFIDENCE: f64 = 0.45;
const DIP_OVERRIDE_SCORE: f64 = 0.4;

/// Combiner thresholds lifted from the runtime configuration.
#[derive(Debug, Clone)]
pub struct CombinerSettings {
    pub min_volatility_threshold: f64,
    pub trend_mismatch_penalty: f64,
    pub high_cost_confidence_multiplier: f64,
    /// Per-timeframe confidence floors; missing entries fall back to the
    /// timeframe defaults.
    pub confidence_floors: std::collections::HashMap<Timeframe, f64>,
}

impl CombinerSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            min_volatility_threshold: config.min_volatility_threshold,
            trend_mismatch_penalty: config.global_trend_mismatch_penalty,
            high_cost_confidence_multiplier: config.high_cost_confidence_multiplier,
            confidence_floors: config.min_confidence_thresholds.clone(),
        }
    }

    fn min_confidence_for(&self, tf: Timeframe) -> f64 {
        self.confidence_floors
            .get(&tf)
            .copied()
            .unwrap_or_else(|| tf.default_min_confidence())
    }
}

impl Default for CombinerSettings {
    fn default() -> Self {
        Self {
            min_volatility_threshold: 0.5,
            trend_mismatch_penalty: 0.85,
            high_cost_confidence_multiplier: 1.1,
            confidence_floors: std::collections::HashMap::new(),
        }
    }
}

/// Multi-day extreme context computed from the longer gram history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MultiDayPattern {
    pub is_near_bottom: bool,
    pub is_near_top: bool,
}

/// All analyzer outputs feeding one fusion pass.
pub struct CombinerInputs<'a> {
    pub gram: &'a GramAnalysis,
    pub global_trend: &'a GlobalTrendAnalysis,
    pub currency_risk: &'a CurrencyRiskAnalysis,
    pub advanced: &'a AdvancedAnalysis,
    pub patterns: &'a PatternReport,
    pub divergence: &'a DivergenceAnalysis,
    pub momentum: &'a MomentumAnalysis,
    pub smart_money: &'a SmartMoneyAnalysis,
    pub multi_day: MultiDayPattern,
    pub timeframe: Timeframe,
    /// ATR percent of the gram series.
    pub market_volatility: f64,
}

/// Per-candidate accumulated scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreBoard {
    pub buy: f64,
    pub sell: f64,
    pub hold: f64,
}

impl ScoreBoard {
    fn add(&mut self, signal: Signal, amount: f64) {
        match signal {
            Signal::Buy => self.buy += amount,
            Signal::Sell => self.sell += amount,
            Signal::Hold => self.hold += amount,
        }
    }

    fn get(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Buy => self.buy,
            Signal::Sell => self.sell,
            Signal::Hold => self.hold,
        }
    }

    fn argmax(&self) -> Signal {
        if self.buy >= self.sell && self.buy >= self.hold {
            Signal::Buy
        } else if self.sell >= self.hold {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

/// Dip-detection result carried on every combined signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DipAnalysis {
    pub score: f64,
    pub signals: Vec<String>,
    pub is_dip_opportunity: bool,
}

/// Position-size suggestion persisted as a nested object; read models project
/// the scalar `fraction`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSizeSuggestion {
    /// Fraction of deployable capital, in [0.2, 0.8].
    pub fraction: f64,
    pub risk_multiplier: f64,
}

impl Default for PositionSizeSuggestion {
    fn default() -> Self {
        Self {
            fraction: 0.3,
            risk_multiplier: 1.0,
        }
    }
}

/// Final fused decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSignal {
    pub signal: Signal,
    pub confidence: f64,
    pub strength: SignalStrength,
    pub scores: ScoreBoard,
    pub dip: DipAnalysis,
    pub position_size: PositionSizeSuggestion,
    pub gram_override: bool,
    pub dip_override: bool,
}

pub struct SignalCombiner {
    settings: CombinerSettings,
}

impl SignalCombiner {
    pub fn new(settings: CombinerSettings) -> Self {
        Self { settings }
    }

    pub fn combine(&self, inputs: &CombinerInputs<'_>) -> CombinedSignal {
        let gram_signal = inputs.gram.signal;
        let gram_confidence = inputs.gram.confidence;
        let global_direction = inputs.global_trend.trend_direction;
        let risk_level = inputs.currency_risk.risk_level;

        // ── Dip detection (BEARISH trend only) ───────────────────────────
        let dip = self.analyze_dip(inputs, global_direction);

        // ── Weighted score accumulation ──────────────────────────────────
        let mut scores = ScoreBoard::default();

        // 1. Gram signal at its own weight.
        let gram_contrib = if gram_signal.is_directional() {
            gram_confidence
        } else {
            1.0
        };
        scores.add(gram_signal, W_GRAM * gram_contrib);

        // 2. Global trend: 60% direction alignment + 40% indicator verdict.
        apply_global_trend(&mut scores, global_direction, gram_signal, inputs);

        // 3. Currency risk.
        apply_currency_risk(&mut scores, risk_level, gram_signal);

        // 4. Advanced indicators.
        apply_advanced(&mut scores, inputs);

        // 5. Pattern bonus.
        apply_patterns(&mut scores, inputs.patterns);

        // ── Overrides ────────────────────────────────────────────────────
        let multi_day_override = (inputs.multi_day.is_near_bottom
            && gram_signal == Signal::Buy
            && gram_confidence >= GRAM_OVERRIDE_CONFIDENCE)
            || (inputs.multi_day.is_near_top
                && gram_signal == Signal::Sell
                && gram_confidence >= GRAM_OVERRIDE_CONFIDENCE);

        let gram_override = (gram_signal.is_directional()
            && gram_confidence >= GRAM_OVERRIDE_CONFIDENCE)
            || multi_day_override;

        let mut signal;
        let mut confidence;
        if gram_override {
            signal = gram_signal;
            confidence = gram_confidence;
        } else {
            signal = scores.argmax();
            confidence = self.calculate_confidence(
                signal,
                &scores,
                gram_confidence,
                global_direction,
                risk_level,
            );
        }

        // Dip override: a strong dip read in a BEARISH trend forces BUY.
        let dip_override = global_direction == TrendDirection::Bearish
            && dip.score >= DIP_OVERRIDE_SCORE;
        if dip_override {
            signal = Signal::Buy;
            confidence = confidence.max(dip.score * 1.2).min(1.0);
        }

        // ── Post-filters (bypassed by both overrides) ────────────────────
        let strength;
        if gram_override || dip_override {
            strength = base_strength(confidence, risk_level);
        } else {
            let (filtered, s) = self.apply_filters(
                signal,
                confidence,
                inputs.market_volatility,
                inputs.timeframe,
                global_direction,
                risk_level,
                dip.score,
            );
            signal = filtered;
            strength = s;

            // Mismatch penalty for surviving counter-trend signals.
            if signal.is_directional() {
                confidence = self.apply_mismatch_penalty(
                    signal,
                    global_direction,
                    confidence,
                    dip.score,
                );
            }
        }

        let position_size = position_size_suggestion(dip.score, risk_level);

        CombinedSignal {
            signal,
            confidence: (confidence * 1e6).round() / 1e6,
            strength,
            scores,
            dip,
            position_size,
            gram_override,
            dip_override,
        }
    }

    // -------------------------------------------------------------------------
    // Dip detection
    // -------------------------------------------------------------------------

    fn analyze_dip(
        &self,
        inputs: &CombinerInputs<'_>,
        global_direction: TrendDirection,
    ) -> DipAnalysis {
        if global_direction != TrendDirection::Bearish {
            return DipAnalysis::default();
        }

        let mut score = 0.0;
        let mut signals = Vec::new();

        // 1. Bullish divergence.
        if inputs.divergence.side == TrendDirection::Bullish {
            let factor = match inputs.divergence.strength {
                TrendStrength::Strong => 1.0,
                TrendStrength::Moderate => 0.7,
                TrendStrength::Weak => 0.4,
            };
            score += W_DIP_DIVERGENCE * factor;
            signals.push(format!(
                "{} bullish divergence",
                inputs.divergence.strength
            ));
        }

        // 2. Oversold RSI.
        let rsi = inputs.advanced.rsi;
        if let Some(rsi) = rsi {
            if rsi < 30.0 {
                let severity = (30.0 - rsi) / 30.0;
                score += W_DIP_OVERSOLD * (0.7 + severity * 0.3);
                signals.push(format!("RSI oversold at {rsi:.1}"));
            } else if rsi < 35.0 {
                score += W_DIP_OVERSOLD * 0.5;
                signals.push(format!("RSI approaching oversold at {rsi:.1}"));
            }
        }

        // 3. Momentum exhaustion pointing at a bullish reversal.
        if inputs.momentum.exhaustion_detected
            && inputs.momentum.exhaustion_side == TrendDirection::Bullish
        {
            score += W_DIP_EXHAUSTION * inputs.momentum.exhaustion_score;
            signals.push(format!(
                "momentum exhaustion (score {:.2})",
                inputs.momentum.exhaustion_score
            ));
            if inputs.momentum.volatility.volatility_spike {
                score += 0.1;
                signals.push("volatility spike confirms exhaustion".to_string());
            }
        }

        // 4. Smart money accumulation.
        if inputs.smart_money.direction == TrendDirection::Bullish {
            score += W_DIP_SMART_MONEY * inputs.smart_money.manipulation_score;
            signals.push(format!(
                "smart money accumulation (score {:.2})",
                inputs.smart_money.manipulation_score
            ));
            if inputs.smart_money.stop_hunt.detected
                && inputs.smart_money.stop_hunt.side == TrendDirection::Bullish
            {
                score += 0.15;
                signals.push("bullish stop hunt confirmed".to_string());
            }
        }

        let mut score = score.min(1.0);

        // Nothing concrete but a soft RSI: keep a minimal setup score.
        if score == 0.0 && rsi.map(|r| r < 40.0).unwrap_or(false) {
            score = 0.2;
            signals.push("potential oversold bounce setup".to_string());
        }

        DipAnalysis {
            score: (score * 1000.0).round() / 1000.0,
            signals,
            is_dip_opportunity: score >= 0.6,
        }
    }

    // -------------------------------------------------------------------------
    // Confidence & filters
    // -------------------------------------------------------------------------

    fn calculate_confidence(
        &self,
        signal: Signal,
        scores: &ScoreBoard,
        gram_confidence: f64,
        global_direction: TrendDirection,
        risk_level: RiskLevel,
    ) -> f64 {
        let mut supporting_weight = 0.0;

        if scores.get(signal) > 0.0 {
            supporting_weight += W_GRAM;
        }

        let trend_supports = matches!(
            (signal, global_direction),
            (Signal::Buy, TrendDirection::Bullish)
                | (Signal::Sell, TrendDirection::Bearish)
                | (Signal::Hold, TrendDirection::Neutral)
        );
        if trend_supports {
            supporting_weight += W_GLOBAL;
        }

        let risk_supports = match signal {
            Signal::Hold => risk_level.is_elevated(),
            _ => !risk_level.is_elevated(),
        };
        if risk_supports {
            supporting_weight += W_CURRENCY;
        }

        let score_confidence = if supporting_weight > 0.0 {
            (scores.get(signal) / supporting_weight).min(1.0)
        } else {
            0.3
        };

        if signal == Signal::Hold {
            gram_confidence * 0.7 + score_confidence * 0.3
        } else {
            (gram_confidence * 0.6 + score_confidence * 0.4).max(0.4)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_filters(
        &self,
        signal: Signal,
        confidence: f64,
        volatility: f64,
        timeframe: Timeframe,
        global_direction: TrendDirection,
        risk_level: RiskLevel,
        dip_score: f64,
    ) -> (Signal, SignalStrength) {
        if !signal.is_directional() {
            return (Signal::Hold, SignalStrength::Weak);
        }

        // 1. Volatility floor.
        if volatility < self.settings.min_volatility_threshold {
            return (Signal::Hold, SignalStrength::Weak);
        }

        // 2. Per-timeframe confidence floor, raised for trading costs and
        //    slightly relaxed for a forming dip.
        let mut floor = self.settings.min_confidence_for(timeframe)
            * self.settings.high_cost_confidence_multiplier;
        if dip_score > DIP_OVERRIDE_SCORE
            || (global_direction == TrendDirection::Bearish && signal == Signal::Buy)
        {
            floor *= 0.95;
        }
        if confidence < floor {
            return (Signal::Hold, SignalStrength::Weak);
        }

        // 3. Elevated currency risk wants near-certainty.
        if risk_level.is_elevated() && confidence < 0.85 {
            return (Signal::Hold, SignalStrength::Weak);
        }

        // 4. Strong trend alignment.
        if !trend_aligned(signal, global_direction, confidence) {
            return (Signal::Hold, SignalStrength::Weak);
        }

        (signal, high_cost_strength(confidence, risk_level))
    }

    fn apply_mismatch_penalty(
        &self,
        signal: Signal,
        global_direction: TrendDirection,
        confidence: f64,
        dip_score: f64,
    ) -> f64 {
        let counter_trend_buy = signal == Signal::Buy
            && global_direction == TrendDirection::Bearish
            && dip_score < DIP_OVERRIDE_SCORE;
        let counter_trend_sell =
            signal == Signal::Sell && global_direction == TrendDirection::Bullish;

        if counter_trend_buy || counter_trend_sell {
            confidence * self.settings.trend_mismatch_penalty
        } else {
            confidence
        }
    }
}

// ---------------------------------------------------------------------------
// Score application helpers
// ---------------------------------------------------------------------------

fn apply_global_trend(
    scores: &mut ScoreBoard,
    global_direction: TrendDirection,
    gram_signal: Signal,
    inputs: &CombinerInputs<'_>,
) {
    // Direction-alignment part (60% of the trend weight).
    let (target, multiplier) = match (global_direction, gram_signal) {
        (TrendDirection::Bullish, Signal::Buy) => (Signal::Buy, 1.0),
        (TrendDirection::Bearish, Signal::Sell) => (Signal::Sell, 1.0),
        (TrendDirection::Bullish, Signal::Sell) | (TrendDirection::Bearish, Signal::Buy) => {
            (Signal::Hold, 0.5)
        }
        _ => (Signal::Hold, 0.3),
    };
    scores.add(target, W_GLOBAL * multiplier * 0.6);

    // Ounce/USD indicator verdict (40%).
    let verdict = inputs.global_trend.indicator_signal.verdict;
    let verdict_confidence = inputs.global_trend.indicator_signal.confidence;
    if verdict.is_buy() {
        scores.add(Signal::Buy, W_GLOBAL * verdict_confidence * 0.4);
    } else if verdict.is_sell() {
        scores.add(Signal::Sell, W_GLOBAL * verdict_confidence * 0.4);
    } else {
        scores.add(Signal::Hold, W_GLOBAL * 0.4 * 0.5);
    }
}

fn apply_currency_risk(scores: &mut ScoreBoard, risk_level: RiskLevel, gram_signal: Signal) {
    if risk_level.is_elevated() {
        scores.add(Signal::Hold, W_CURRENCY * 0.7);
        scores.buy *= 0.7;
        scores.sell *= 0.7;
    } else if gram_signal.is_directional() {
        scores.add(gram_signal, W_CURRENCY * 0.5);
    }
}

fn apply_advanced(scores: &mut ScoreBoard, inputs: &CombinerInputs<'_>) {
    let advanced = inputs.advanced;
    if advanced.combined_signal.is_directional() {
        scores.add(
            advanced.combined_signal,
            W_ADVANCED * advanced.combined_confidence,
        );

        // A same-side divergence read reinforces the oscillators.
        let divergence_agrees = matches!(
            (advanced.combined_signal, inputs.divergence.side),
            (Signal::Buy, TrendDirection::Bullish) | (Signal::Sell, TrendDirection::Bearish)
        );
        if divergence_agrees {
            scores.add(advanced.combined_signal, W_ADVANCED * 0.3);
        }
    }
}

fn apply_patterns(scores: &mut ScoreBoard, patterns: &PatternReport) {
    if let Some(signal) = &patterns.signal {
        if signal.signal.is_directional() {
            scores.add(signal.signal, W_PATTERN * signal.confidence);
        }
    }
}

// ---------------------------------------------------------------------------
// Strength & sizing
// ---------------------------------------------------------------------------

fn trend_aligned(signal: Signal, global_direction: TrendDirection, confidence: f64) -> bool {
    match signal {
        Signal::Buy => {
            global_direction == TrendDirection::Bullish
                || (global_direction == TrendDirection::Bearish && confidence >= 0.85)
        }
        Signal::Sell => {
            global_direction == TrendDirection::Bearish
                || (global_direction == TrendDirection::Bullish && confidence >= 0.85)
        }
        Signal::Hold => true,
    }
}

/// Strict bands used after the high-cost filter pass.
fn high_cost_strength(confidence: f64, risk: RiskLevel) -> SignalStrength {
    let base = if confidence >= 0.85 {
        SignalStrength::Strong
    } else if confidence >= 0.75 {
        SignalStrength::Moderate
    } else {
        SignalStrength::Weak
    };

    if risk.is_elevated() {
        base.demoted()
    } else {
        base
    }
}

/// Softer bands for override paths.
fn base_strength(confidence: f64, risk: RiskLevel) -> SignalStrength {
    let base = if confidence >= 0.75 {
        SignalStrength::Strong
    } else if confidence >= 0.55 {
        SignalStrength::Moderate
    } else {
        SignalStrength::Weak
    };

    if risk.is_elevated() {
        base.demoted()
    } else {
        base
    }
}

fn position_size_suggestion(dip_score: f64, risk_level: RiskLevel) -> PositionSizeSuggestion {
    let base = if dip_score >= 0.8 {
        0.7
    } else if dip_score >= 0.6 {
        0.5
    } else {
        0.3
    };

    let risk_multiplier = risk_level.size_multiplier();
    PositionSizeSuggestion {
        fraction: (base * risk_multiplier).clamp(0.2, 0.8),
        risk_multiplier,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::advanced::AdvancedAnalysis;
    use crate::analyzers::currency_risk::CurrencyRiskAnalysis;
    use crate::analyzers::global_trend::{
        GlobalTrendAnalysis, IndicatorSignal, IndicatorVerdict, Momentum, MomentumSignal,
        Volatility, VolatilityBand,
    };
    use crate::analyzers::gram::{GramAnalysis, GramIndicators, RsiDivergence};
    use crate::hybrid::divergence::DivergenceAnalysis;
    use crate::hybrid::momentum::MomentumAnalysis;
    use crate::hybrid::smart_money::SmartMoneyAnalysis;
    use rust_decimal_macros::dec;

    fn gram(signal: Signal, confidence: f64, trend: TrendDirection) -> GramAnalysis {
        GramAnalysis {
            price: dec!(2000.0),
            trend,
            trend_strength: TrendStrength::Moderate,
            indicators: GramIndicators::default(),
            patterns: PatternReport::default(),
            support_levels: Vec::new(),
            resistance_levels: Vec::new(),
            rsi_divergence: RsiDivergence::default(),
            signal,
            confidence,
            stop_loss: signal.is_directional().then(|| dec!(1990.0)),
            take_profit: signal.is_directional().then(|| dec!(2020.0)),
            degraded: false,
        }
    }

    fn global(direction: TrendDirection) -> GlobalTrendAnalysis {
        GlobalTrendAnalysis {
            ons_usd_price: dec!(2000.0),
            trend_direction: direction,
            trend_strength: TrendStrength::Moderate,
            ma20: Some(2000.0),
            ma50: Some(1990.0),
            ma200: Some(1950.0),
            momentum: Momentum {
                roc_10: Some(0.0),
                roc_20: Some(0.0),
                signal: MomentumSignal::Neutral,
            },
            volatility: Volatility {
                daily: 1.0,
                annualized: 15.0,
                level: VolatilityBand::Low,
            },
            key_levels: None,
            indicator_signal: IndicatorSignal {
                verdict: IndicatorVerdict::Neutral,
                confidence: 0.5,
                buy_count: 0,
                sell_count: 0,
                neutral_count: 4,
            },
        }
    }

    fn currency(risk: RiskLevel) -> CurrencyRiskAnalysis {
        CurrencyRiskAnalysis {
            risk_level: risk,
            volatility: 0.2,
            window_change_pct: 0.1,
        }
    }

    fn advanced(rsi: Option<f64>) -> AdvancedAnalysis {
        AdvancedAnalysis {
            cci: Some(0.0),
            mfi: Some(50.0),
            rsi,
            combined_signal: Signal::Hold,
            combined_confidence: 0.0,
        }
    }

    struct Fixture {
        gram: GramAnalysis,
        global: GlobalTrendAnalysis,
        currency: CurrencyRiskAnalysis,
        advanced: AdvancedAnalysis,
        patterns: PatternReport,
        divergence: DivergenceAnalysis,
        momentum: MomentumAnalysis,
        smart_money: SmartMoneyAnalysis,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                gram: gram(Signal::Hold, 0.5, TrendDirection::Neutral),
                global: global(TrendDirection::Neutral),
                currency: currency(RiskLevel::Low),
                advanced: advanced(Some(50.0)),
                patterns: PatternReport::default(),
                divergence: DivergenceAnalysis::default(),
                momentum: MomentumAnalysis::default(),
                smart_money: SmartMoneyAnalysis::default(),
            }
        }

        fn inputs(&self, timeframe: Timeframe, volatility: f64) -> CombinerInputs<'_> {
            CombinerInputs {
                gram: &self.gram,
                global_trend: &self.global,
                currency_risk: &self.currency,
                advanced: &self.advanced,
                patterns: &self.patterns,
                divergence: &self.divergence,
                momentum: &self.momentum,
                smart_money: &self.smart_money,
                multi_day: MultiDayPattern::default(),
                timeframe,
                market_volatility: volatility,
            }
        }
    }

    #[test]
    fn gram_override_bypasses_filters() {
        let mut fixture = Fixture::new();
        // Counter-trend BUY at 0.5 confidence would never survive the
        // filters, but the gram override carries it straight through.
        fixture.gram = gram(Signal::Buy, 0.50, TrendDirection::Bullish);
        fixture.global = global(TrendDirection::Bearish);

        let combiner = SignalCombiner::new(CombinerSettings::default());
        let result = combiner.combine(&fixture.inputs(Timeframe::M15, 1.0));

        assert!(result.gram_override);
        assert_eq!(result.signal, Signal::Buy);
        assert!((result.confidence - 0.50).abs() < 1e-9);
    }

    #[test]
    fn low_volatility_converts_to_hold() {
        let mut fixture = Fixture::new();
        fixture.gram = gram(Signal::Buy, 0.40, TrendDirection::Bullish); // below override
        fixture.global = global(TrendDirection::Bullish);

        let combiner = SignalCombiner::new(CombinerSettings::default());
        let result = combiner.combine(&fixture.inputs(Timeframe::M15, 0.2));

        assert_eq!(result.signal, Signal::Hold);
        assert_eq!(result.strength, SignalStrength::Weak);
    }

    #[test]
    fn elevated_risk_requires_085() {
        // Signal BUY, confidence ~0.80, risk HIGH => HOLD.
        let mut fixture = Fixture::new();
        fixture.gram = gram(Signal::Buy, 0.44, TrendDirection::Bullish);
        fixture.global = global(TrendDirection::Bullish);
        fixture.currency = currency(RiskLevel::High);

        let mut settings = CombinerSettings::default();
        settings.min_volatility_threshold = 0.0;
        // Lower the per-timeframe floor so the risk filter is what trips.
        settings.confidence_floors = Timeframe::ALL.iter().map(|&tf| (tf, 0.1)).collect();
        let combiner = SignalCombiner::new(settings);
        let result = combiner.combine(&fixture.inputs(Timeframe::D1, 1.0));

        assert_eq!(result.signal, Signal::Hold);
    }

    #[test]
    fn dip_override_fires_at_040() {
        let mut fixture = Fixture::new();
        fixture.gram = gram(Signal::Hold, 0.40, TrendDirection::Bearish);
        fixture.global = global(TrendDirection::Bearish);
        // RSI 25 => oversold contribution 0.25 * (0.7 + (5/30)*0.3) ~ 0.187;
        // strong bullish divergence adds 0.35 => ~0.54 total.
        fixture.advanced = advanced(Some(25.0));
        fixture.divergence = DivergenceAnalysis {
            bullish_score: 7.0,
            bearish_score: 0.0,
            total_score: 7.0,
            side: TrendDirection::Bullish,
            strength: TrendStrength::Strong,
            confidence: 0.7,
            hits: Vec::new(),
        };

        let combiner = SignalCombiner::new(CombinerSettings::default());
        let result = combiner.combine(&fixture.inputs(Timeframe::H1, 1.0));

        assert!(result.dip.score >= DIP_OVERRIDE_SCORE, "dip {}", result.dip.score);
        assert!(result.dip_override);
        assert_eq!(result.signal, Signal::Buy);
        assert!(result.confidence >= DIP_OVERRIDE_SCORE * 1.2 - 1e-9);
    }

    #[test]
    fn dip_just_below_threshold_gets_penalty_not_override() {
        let settings = CombinerSettings::default();
        let combiner = SignalCombiner::new(settings);
        // Direct check of the penalty rule at the documented boundary.
        let penalised = combiner.apply_mismatch_penalty(
            Signal::Buy,
            TrendDirection::Bearish,
            1.0,
            0.39,
        );
        assert!((penalised - 0.85).abs() < 1e-12);

        let untouched = combiner.apply_mismatch_penalty(
            Signal::Buy,
            TrendDirection::Bearish,
            1.0,
            0.40,
        );
        assert!((untouched - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sell_in_bullish_trend_penalised() {
        let combiner = SignalCombiner::new(CombinerSettings::default());
        let penalised =
            combiner.apply_mismatch_penalty(Signal::Sell, TrendDirection::Bullish, 0.9, 0.0);
        assert!((penalised - 0.9 * 0.85).abs() < 1e-12);
    }

    #[test]
    fn strength_bands_demote_under_risk() {
        assert_eq!(
            high_cost_strength(0.90, RiskLevel::Low),
            SignalStrength::Strong
        );
        assert_eq!(
            high_cost_strength(0.90, RiskLevel::High),
            SignalStrength::Moderate
        );
        assert_eq!(
            high_cost_strength(0.78, RiskLevel::Medium),
            SignalStrength::Moderate
        );
        assert_eq!(
            high_cost_strength(0.60, RiskLevel::Low),
            SignalStrength::Weak
        );
    }

    #[test]
    fn position_size_clamped() {
        let low = position_size_suggestion(0.0, RiskLevel::Extreme);
        assert!((low.fraction - 0.2).abs() < 1e-12); // 0.3 * 0.5 clamped up

        let high = position_size_suggestion(0.9, RiskLevel::Low);
        assert!((high.fraction - 0.8).abs() < 1e-12); // 0.7 * 1.2 clamped down

        let mid = position_size_suggestion(0.65, RiskLevel::Medium);
        assert!((mid.fraction - 0.5).abs() < 1e-12);
    }

    #[test]
    fn currency_risk_downweights_directional_scores() {
        let mut scores = ScoreBoard {
            buy: 0.4,
            sell: 0.2,
            hold: 0.1,
        };
        apply_currency_risk(&mut scores, RiskLevel::Extreme, Signal::Buy);
        assert!((scores.buy - 0.28).abs() < 1e-12);
        assert!((scores.sell - 0.14).abs() < 1e-12);
        assert!(scores.hold > 0.1);
    }
}
