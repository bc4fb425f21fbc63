// =============================================================================
// Gram Analyzer — local-currency gram-price signal
// =============================================================================
//
// The gram series is the traded instrument, so this analyzer produces the
// pipeline's primary signal:
//
//   1. Compute RSI / MACD / Bollinger / Stochastic / ATR / patterns
//   2. Trend: price vs MA(min(20, n/2)) confirmed by the MACD histogram
//   3. Support/resistance from the last 50 candles
//   4. Weighted integer scoring across all indicator votes
//   5. Decision at 20% of total weight; tie broken by RSI with the trend
//   6. SL/TP from ATR and the nearest S/R level, minimum 1.5:1 reward:risk
//
// Fewer than 10 candles is Insufficient — a value, not an error.
// =============================================================================

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisOutcome;
use crate::indicators::atr::{analyze_atr, AtrResult};
use crate::indicators::bollinger::{calculate_bollinger, BandPosition, BollingerResult};
use crate::indicators::macd::{self, MacdResult};
use crate::indicators::patterns::{detect_patterns, PatternReport};
use crate::indicators::rsi::{calculate_rsi, current_rsi, RsiReading, RsiZone};
use crate::indicators::stochastic::{self, StochasticResult, StochasticZone};
use crate::indicators::{closes, highs, lows, volumes};
use crate::market_data::Candle;
use crate::types::{Signal, TrendDirection, TrendStrength};

/// Minimum candles before any gram analysis is attempted.
const MIN_CANDLES: usize = 10;

/// ATR fallback (price units) when the indicator is unavailable. Results
/// using it carry the `degraded` flag.
const DEFAULT_ATR: f64 = 10.0;

/// S/R level strength label by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelStrength {
    #[serde(rename = "strong")]
    Strong,
    #[serde(rename = "moderate")]
    Moderate,
    #[serde(rename = "weak")]
    Weak,
}

/// One support or resistance level, recomputed each analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportResistanceLevel {
    pub level: Decimal,
    pub strength: LevelStrength,
    pub touches: u32,
}

/// Indicator snapshot attached to the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GramIndicators {
    pub rsi: Option<RsiReading>,
    pub macd: Option<MacdResult>,
    pub bollinger: Option<BollingerResult>,
    pub stochastic: Option<StochasticResult>,
    pub atr: Option<AtrResult>,
}

/// Internally detected price-vs-RSI divergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RsiDivergence {
    pub detected: bool,
    pub bullish: bool,
    pub strength: f64,
}

/// Full gram-price analysis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GramAnalysis {
    pub price: Decimal,
    pub trend: TrendDirection,
    pub trend_strength: TrendStrength,
    pub indicators: GramIndicators,
    pub patterns: PatternReport,
    pub support_levels: Vec<SupportResistanceLevel>,
    pub resistance_levels: Vec<SupportResistanceLevel>,
    pub rsi_divergence: RsiDivergence,
    pub signal: Signal,
    pub confidence: f64,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// True when a neutral fallback (default ATR) stood in for a failed
    /// computation.
    pub degraded: bool,
}

/// Stateless gram-price analyzer. The RSI zone thresholds react earlier than
/// the standard 30/70 because gram gold trends hard in local currency.
pub struct GramAnalyzer {
    rsi_thresholds: (f64, f64),
}

impl Default for GramAnalyzer {
    fn default() -> Self {
        Self {
            rsi_thresholds: (40.0, 60.0),
        }
    }
}

impl GramAnalyzer {
    pub fn new(rsi_thresholds: (f64, f64)) -> Self {
        Self { rsi_thresholds }
    }

    pub fn analyze(&self, candles: &[Candle]) -> AnalysisOutcome<GramAnalysis> {
        if candles.len() < MIN_CANDLES {
            return AnalysisOutcome::Insufficient;
        }

        let prices = closes(candles);
        let current_price = *prices.last().unwrap_or(&0.0);
        if current_price <= 0.0 {
            return AnalysisOutcome::Insufficient;
        }

        // ── 1. Indicators ────────────────────────────────────────────────
        let rsi = current_rsi(&prices, 14, self.rsi_thresholds);
        let macd = macd::calculate(&prices);
        let bollinger = calculate_bollinger(&prices, 20, 2.0);
        let stochastic = stochastic::calculate(candles);
        let atr = analyze_atr(candles, 14);
        let patterns = detect_patterns(candles);

        // ── 2. Trend ─────────────────────────────────────────────────────
        let (trend, trend_strength) = analyze_trend(&prices, macd.as_ref());

        // ── 3. Support / resistance ──────────────────────────────────────
        let (support_levels, resistance_levels) = find_support_resistance(candles);

        // ── 4. Divergence & volume context ───────────────────────────────
        let rsi_divergence = detect_rsi_divergence(&prices);
        let volume_spike_ratio = detect_volume_spike(candles);

        // ── 5. Weighted scoring ──────────────────────────────────────────
        let scoring = ScoringInputs {
            current_price,
            prices: &prices,
            rsi: rsi.as_ref(),
            macd: macd.as_ref(),
            bollinger: bollinger.as_ref(),
            stochastic: stochastic.as_ref(),
            patterns: &patterns,
            resistance_levels: &resistance_levels,
            rsi_divergence: &rsi_divergence,
            volume_spike_ratio,
            trend,
            trend_strength,
        };
        let (signal, confidence) = generate_signal(&scoring);

        // ── 6. Risk levels ───────────────────────────────────────────────
        let atr_value = atr.as_ref().map(|a| a.atr);
        let degraded = signal.is_directional() && atr_value.is_none();
        let (stop_loss, take_profit) = calculate_risk_levels(
            current_price,
            signal,
            atr_value.unwrap_or(DEFAULT_ATR),
            &support_levels,
            &resistance_levels,
        );

        debug!(
            signal = %signal,
            confidence = format!("{confidence:.3}"),
            trend = %trend,
            price = current_price,
            "gram analysis complete"
        );

        AnalysisOutcome::Ready(GramAnalysis {
            price: decimal_price(current_price),
            trend,
            trend_strength,
            indicators: GramIndicators {
                rsi,
                macd,
                bollinger,
                stochastic,
                atr,
            },
            patterns,
            support_levels,
            resistance_levels,
            rsi_divergence,
            signal,
            confidence,
            stop_loss,
            take_profit,
            degraded,
        })
    }
}

fn decimal_price(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(4)
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

fn analyze_trend(prices: &[f64], macd: Option<&MacdResult>) -> (TrendDirection, TrendStrength) {
    let current = prices[prices.len() - 1];

    let ma_period = 20.min((prices.len() / 2).max(2));
    let ma: f64 = prices[prices.len() - ma_period..].iter().sum::<f64>() / ma_period as f64;

    let macd_bullish = macd.map(|m| m.histogram > 0.0).unwrap_or(false);

    let trend = if current > ma && macd_bullish {
        TrendDirection::Bullish
    } else if current < ma && !macd_bullish {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    };

    let strength = if ma > 0.0 {
        let distance = ((current - ma) / ma * 100.0).abs();
        if distance > 3.0 {
            TrendStrength::Strong
        } else if distance > 1.0 {
            TrendStrength::Moderate
        } else {
            TrendStrength::Weak
        }
    } else {
        TrendStrength::Weak
    };

    (trend, strength)
}

// ---------------------------------------------------------------------------
// Support / resistance
// ---------------------------------------------------------------------------

fn find_support_resistance(
    candles: &[Candle],
) -> (Vec<SupportResistanceLevel>, Vec<SupportResistanceLevel>) {
    let look_back = 50.min(candles.len());
    let window = &candles[candles.len() - look_back..];
    let highs = highs(window);
    let lows = lows(window);

    // Unique sorted extremes (4-dp resolution).
    let mut unique_lows: Vec<f64> = lows.clone();
    unique_lows.sort_by(f64::total_cmp);
    unique_lows.dedup_by(|a, b| (*a - *b).abs() < 1e-4);

    let mut unique_highs: Vec<f64> = highs.clone();
    unique_highs.sort_by(|a, b| b.total_cmp(a));
    unique_highs.dedup_by(|a, b| (*a - *b).abs() < 1e-4);

    let touches = |level: f64| -> u32 {
        let close_to = |v: &f64| (v - level).abs() <= level.abs() * 1e-4;
        (highs.iter().filter(|v| close_to(v)).count() + lows.iter().filter(|v| close_to(v)).count())
            as u32
    };

    let strength_for = |rank: usize| match rank {
        0 => LevelStrength::Strong,
        1 | 2 => LevelStrength::Moderate,
        _ => LevelStrength::Weak,
    };

    let supports = unique_lows
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, &level)| SupportResistanceLevel {
            level: decimal_price(level),
            strength: strength_for(i),
            touches: touches(level).max(1),
        })
        .collect();

    let resistances = unique_highs
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, &level)| SupportResistanceLevel {
            level: decimal_price(level),
            strength: strength_for(i),
            touches: touches(level).max(1),
        })
        .collect();

    (supports, resistances)
}

// ---------------------------------------------------------------------------
// RSI divergence & volume spike
// ---------------------------------------------------------------------------

/// Divergence between the last 6 closes and their RSI values: price falling
/// with RSI rising is a bottom signal, the mirror a top signal.
fn detect_rsi_divergence(prices: &[f64]) -> RsiDivergence {
    if prices.len() < 20 {
        return RsiDivergence::default();
    }

    let recent = &prices[prices.len() - 20..];
    let rsi_values = calculate_rsi(recent, 14);
    if rsi_values.len() < 6 {
        return RsiDivergence::default();
    }

    let rsi_tail = &rsi_values[rsi_values.len() - 6..];
    let price_tail = &recent[recent.len() - 6..];

    let price_trend = price_tail[5] - price_tail[0];
    let rsi_trend = rsi_tail[5] - rsi_tail[0];

    if price_trend < 0.0 && rsi_trend > 0.0 {
        let decline_pct = price_trend.abs() / price_tail[0] * 100.0;
        let strength = if decline_pct > 0.5 && rsi_trend > 5.0 {
            ((decline_pct + rsi_trend / 10.0) / 2.0).min(0.8)
        } else {
            0.3
        };
        RsiDivergence {
            detected: true,
            bullish: true,
            strength,
        }
    } else if price_trend > 0.0 && rsi_trend < 0.0 {
        let increase_pct = price_trend / price_tail[0] * 100.0;
        let rsi_drop = rsi_trend.abs();
        let strength = if increase_pct > 0.5 && rsi_drop > 5.0 {
            ((increase_pct + rsi_drop / 10.0) / 2.0).min(0.8)
        } else {
            0.3
        };
        RsiDivergence {
            detected: true,
            bullish: false,
            strength,
        }
    } else {
        RsiDivergence::default()
    }
}

/// Current tick-count against the 20-candle average (spike at >= 1.5x).
/// Returns the ratio only when a spike is present.
fn detect_volume_spike(candles: &[Candle]) -> Option<f64> {
    if candles.len() < 20 {
        return None;
    }

    let volumes = volumes(candles);
    let lookback = &volumes[volumes.len() - 20..];
    let avg: f64 = lookback[..lookback.len() - 1].iter().sum::<f64>() / (lookback.len() - 1) as f64;
    if avg == 0.0 {
        return None;
    }

    let ratio = lookback[lookback.len() - 1] / avg;
    (ratio >= 1.5).then_some(ratio)
}

// ---------------------------------------------------------------------------
// Weighted scoring
// ---------------------------------------------------------------------------

struct ScoringInputs<'a> {
    current_price: f64,
    prices: &'a [f64],
    rsi: Option<&'a RsiReading>,
    macd: Option<&'a MacdResult>,
    bollinger: Option<&'a BollingerResult>,
    stochastic: Option<&'a StochasticResult>,
    patterns: &'a PatternReport,
    resistance_levels: &'a [SupportResistanceLevel],
    rsi_divergence: &'a RsiDivergence,
    volume_spike_ratio: Option<f64>,
    trend: TrendDirection,
    trend_strength: TrendStrength,
}

fn generate_signal(inputs: &ScoringInputs<'_>) -> (Signal, f64) {
    let mut buy = 0.0_f64;
    let mut sell = 0.0_f64;
    let mut total_weight = 0.0_f64;

    // RSI zone
    match inputs.rsi.map(|r| r.zone) {
        Some(RsiZone::Oversold) => {
            buy += 2.0;
            total_weight += 2.0;
        }
        Some(RsiZone::Overbought) => {
            sell += 2.0;
            total_weight += 2.0;
        }
        _ => total_weight += 1.0,
    }

    // RSI divergence bonus
    if inputs.rsi_divergence.detected {
        if inputs.rsi_divergence.bullish {
            buy += inputs.rsi_divergence.strength * 3.0;
        } else {
            sell += inputs.rsi_divergence.strength * 3.0;
        }
        total_weight += 2.0;
    }

    // Volume spike confirms the dominant side
    if let Some(ratio) = inputs.volume_spike_ratio {
        let bonus = ((ratio - 1.0) * 2.0).min(2.0);
        if buy > sell {
            buy += bonus;
        } else if sell > buy {
            sell += bonus;
        }
        total_weight += 1.0;
    }

    // MACD
    let macd_signal = inputs.macd.map(|m| m.signal());
    match macd_signal {
        Some((Some(Signal::Buy), _)) => buy += 3.0,
        Some((Some(Signal::Sell), _)) => sell += 3.0,
        _ => {}
    }
    total_weight += 3.0;

    // Bollinger position
    match inputs.bollinger.map(|b| b.position) {
        Some(BandPosition::BelowLower) => buy += 2.0,
        Some(BandPosition::AboveUpper) => sell += 2.0,
        Some(BandPosition::NearLower) => buy += 1.0,
        Some(BandPosition::NearUpper) => sell += 1.0,
        _ => {}
    }
    total_weight += 2.0;

    // Stochastic zone
    match inputs.stochastic.map(|s| s.zone) {
        Some(StochasticZone::Oversold) => buy += 1.0,
        Some(StochasticZone::Overbought) => sell += 1.0,
        _ => {}
    }
    total_weight += 1.0;

    // Patterns — only explicitly directional names vote
    for hit in &inputs.patterns.patterns {
        let name = hit.name.to_lowercase();
        if name.contains("bullish") {
            buy += 2.0;
        } else if name.contains("bearish") {
            sell += 2.0;
        }
        total_weight += 2.0;
    }

    // Extra sell criteria
    if let Some(rsi) = inputs.rsi {
        if rsi.value > 70.0 {
            sell += 1.5;
            total_weight += 1.5;
        }
    }
    if let Some(macd) = inputs.macd {
        if macd.histogram < 0.0 {
            sell += 1.0;
            total_weight += 1.0;
        }
    }

    // Price pressing against resistance
    for level in inputs.resistance_levels.iter().take(2) {
        let level_f = crate::indicators::to_f64(level.level);
        if level_f > 0.0 && ((inputs.current_price - level_f) / level_f).abs() < 0.005 {
            sell += 1.5;
            total_weight += 1.5;
            break;
        }
    }

    // Trend concordance
    if inputs.trend == TrendDirection::Bullish && buy > sell {
        buy += 1.0;
    } else if inputs.trend == TrendDirection::Bearish && sell > buy {
        sell += 1.0;
    }

    // ── Decision at 20% of total weight ──────────────────────────────────
    let threshold = total_weight * 0.20;
    let rsi_value = inputs.rsi.map(|r| r.value);

    if buy > sell && buy >= threshold {
        let mut confidence = buy / total_weight;
        if inputs.trend == TrendDirection::Bullish {
            confidence = (confidence * 1.2).min(1.0);
        }
        (Signal::Buy, confidence)
    } else if sell > buy && sell >= threshold {
        let mut confidence = sell / total_weight;
        if inputs.trend == TrendDirection::Bearish {
            confidence = (confidence * 1.2).min(1.0);
        }
        (Signal::Sell, confidence)
    } else if buy == sell && buy > 0.0 {
        // Tie with votes on both sides: RSI breaks it along the trend.
        let base = (buy + sell) / (total_weight * 2.0);
        match (inputs.trend, rsi_value) {
            (TrendDirection::Bullish, Some(rsi)) if rsi < 50.0 => (Signal::Buy, base * 0.8),
            (TrendDirection::Bearish, Some(rsi)) if rsi > 50.0 => (Signal::Sell, base * 0.8),
            _ => (Signal::Hold, 0.5),
        }
    } else {
        (Signal::Hold, hold_confidence(inputs, buy, sell, total_weight))
    }
}

/// HOLD confidence: a weighted mix of calm-market sub-metrics, clamped to
/// [0.3, 0.7].
fn hold_confidence(inputs: &ScoringInputs<'_>, buy: f64, sell: f64, total_weight: f64) -> f64 {
    let mut components: Vec<(f64, f64)> = Vec::new();

    if buy + sell > 0.0 && total_weight > 0.0 {
        components.push((1.0 - (buy - sell).abs() / total_weight, 0.15));
    }

    if let Some(rsi) = inputs.rsi {
        components.push((1.0 - (rsi.value - 50.0).abs() / 50.0, 0.15));
    }

    if let Some(bb) = inputs.bollinger {
        if bb.width > 0.0 {
            components.push(((bb.width / 100.0).min(1.0), 0.10));
        }
    }

    if let Some(macd) = inputs.macd {
        components.push((1.0 - (macd.histogram.abs() / 10.0).min(1.0), 0.15));
    }

    if inputs.prices.len() >= 5 {
        let tail = &inputs.prices[inputs.prices.len() - 5..];
        if tail[0] != 0.0 {
            let change = (tail[4] - tail[0]) / tail[0];
            let volatility_score = (change.abs() * 200.0).min(1.0);
            components.push((1.0 - volatility_score, 0.10));
        }
    }

    if inputs.prices.len() >= 10 {
        let tail = &inputs.prices[inputs.prices.len() - 10..];
        let avg: f64 = tail.iter().sum::<f64>() / tail.len() as f64;
        if avg > 0.0 {
            let variance = tail.iter().map(|p| (p - avg).powi(2)).sum::<f64>() / tail.len() as f64;
            let ratio = variance.sqrt() / avg;
            components.push((1.0 - (ratio * 100.0).min(1.0), 0.10));
        }
    }

    if let Some(stoch) = inputs.stochastic {
        components.push((1.0 - (stoch.k - 50.0).abs() / 50.0, 0.10));
    }

    let trend_component = match inputs.trend_strength {
        TrendStrength::Strong => 0.3,
        TrendStrength::Moderate => 0.6,
        TrendStrength::Weak => 0.9,
    };
    components.push((trend_component, 0.15));

    let active = [
        inputs.rsi.is_some(),
        inputs.macd.is_some(),
        inputs.bollinger.is_some(),
        inputs.stochastic.is_some(),
        inputs.patterns.pattern_found(),
    ]
    .iter()
    .filter(|&&b| b)
    .count();
    components.push((active as f64 / 5.0, 0.10));

    components.push(((inputs.prices.len() as f64 / 35.0).min(1.0), 0.10));

    let weight_sum: f64 = components.iter().map(|(_, w)| w).sum();
    let confidence = if weight_sum > 0.0 {
        components.iter().map(|(v, w)| v * w).sum::<f64>() / weight_sum
    } else {
        0.5
    };

    confidence.clamp(0.3, 0.7)
}

// ---------------------------------------------------------------------------
// Risk levels
// ---------------------------------------------------------------------------

/// SL/TP for a directional signal from ATR and the nearest S/R levels. Also
/// used by the orchestrator when an override changes the final direction.
pub(crate) fn calculate_risk_levels(
    current_price: f64,
    signal: Signal,
    atr: f64,
    support_levels: &[SupportResistanceLevel],
    resistance_levels: &[SupportResistanceLevel],
) -> (Option<Decimal>, Option<Decimal>) {
    if !signal.is_directional() {
        return (None, None);
    }

    let atr = if atr.is_finite() && atr > 0.0 {
        atr
    } else {
        DEFAULT_ATR
    };

    let volatility = atr / current_price * 100.0;
    let tp_multiplier = if volatility < 0.5 {
        2.0
    } else if volatility > 1.0 {
        3.5
    } else {
        2.5
    };

    let nearest = |levels: &[SupportResistanceLevel]| -> Option<f64> {
        levels.first().map(|l| crate::indicators::to_f64(l.level))
    };

    let buying = signal == Signal::Buy;

    let mut stop_loss = if buying {
        match nearest(support_levels) {
            Some(support) => (support * 0.995).max(current_price - 1.5 * atr),
            None => current_price - 1.5 * atr,
        }
    } else {
        match nearest(resistance_levels) {
            Some(resistance) => (resistance * 1.005).min(current_price + 1.5 * atr),
            None => current_price + 1.5 * atr,
        }
    };

    let mut take_profit = if buying {
        match nearest(resistance_levels) {
            Some(resistance) if (resistance - current_price) / current_price <= 0.02 => {
                resistance * 0.995
            }
            _ => current_price + tp_multiplier * atr,
        }
    } else {
        match nearest(support_levels) {
            Some(support) if (current_price - support) / current_price <= 0.02 => support * 1.005,
            _ => current_price - tp_multiplier * atr,
        }
    };

    // Degenerate S/R geometry can invert a level; fall back to pure ATR.
    if buying && stop_loss >= current_price {
        stop_loss = current_price - 1.5 * atr;
    }
    if !buying && stop_loss <= current_price {
        stop_loss = current_price + 1.5 * atr;
    }
    if buying && take_profit <= current_price {
        take_profit = current_price + tp_multiplier * atr;
    }
    if !buying && take_profit >= current_price {
        take_profit = current_price - tp_multiplier * atr;
    }

    // Enforce a minimum 1.5:1 reward:risk by widening the target.
    let risk = (current_price - stop_loss).abs();
    let reward = (take_profit - current_price).abs();
    if risk > 0.0 && reward / risk < 1.5 {
        take_profit = if buying {
            current_price + risk * 2.0
        } else {
            current_price - risk * 2.0
        };
    }

    (
        Some(decimal_price(stop_loss)),
        Some(decimal_price(take_profit)),
    )
}
