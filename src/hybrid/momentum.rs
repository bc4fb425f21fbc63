// =============================================================================
// Momentum Manager — exhaustion and volatility-regime analysis
// =============================================================================
//
// Exhaustion evidence, weighted into one score:
//   consecutive  0.3  >= 5 same-direction candles in the last 10
//   anomaly      0.2  candle body >= 2x the 20-candle average (rejection
//                     wicks boost it)
//   indicators   0.3  RSI/Stochastic extremes; two extremes = full weight
//   volatility   0.2  ATR expansion >= 1.5x and Bollinger squeeze < 1%
//
// The exhaustion side is the REVERSAL side: a run of green candles or an
// overbought extreme predicts a bearish turn and vice versa. A side is
// assigned at score >= 0.4; `exhaustion_detected` fires at >= 0.6.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::hybrid::OscillatorSnapshot;
use crate::indicators::to_f64;
use crate::market_data::Candle;
use crate::types::TrendDirection;

const CONSECUTIVE_THRESHOLD: u32 = 5;
const ATR_EXPANSION_THRESHOLD: f64 = 1.5;
const BB_SQUEEZE_THRESHOLD: f64 = 1.0;
const CANDLE_SIZE_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConsecutiveRun {
    pub bullish_count: u32,
    pub bearish_count: u32,
    /// BULLISH = a run of green candles, i.e. a top is near.
    pub run_side: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CandleAnomaly {
    pub detected: bool,
    pub bullish_spike: bool,
    pub size_ratio: f64,
    pub wick_ratio: f64,
    pub rejection: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VolatilityState {
    pub atr_expansion: bool,
    pub bb_squeeze: bool,
    pub volatility_spike: bool,
    pub spike_ratio: f64,
}

/// Aggregate momentum-exhaustion verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MomentumAnalysis {
    pub exhaustion_detected: bool,
    /// Expected reversal side when the score reaches 0.4.
    pub exhaustion_side: TrendDirection,
    pub exhaustion_score: f64,
    pub consecutive: ConsecutiveRun,
    pub anomaly: CandleAnomaly,
    pub volatility: VolatilityState,
}

#[derive(Default)]
pub struct MomentumManager;

impl MomentumManager {
    pub fn analyze(&self, candles: &[Candle], osc: &OscillatorSnapshot) -> MomentumAnalysis {
        // Each evidence class has its own minimum window: consecutive runs
        // from 5 candles, anomaly/volatility from 20, indicator extremes
        // always. Below 10 candles nothing meaningful remains.
        if candles.len() < 10 {
            return MomentumAnalysis::default();
        }

        let consecutive = analyze_consecutive(candles);
        let anomaly = analyze_anomaly(candles);
        let volatility = analyze_volatility(candles, osc);
        let (rsi_extreme, stoch_extreme, extreme_side) = analyze_extremes(osc);

        // Weighted score.
        let mut score = 0.0;
        if consecutive.run_side != TrendDirection::Neutral {
            let run = consecutive.bullish_count.max(consecutive.bearish_count);
            score += 0.3 * (run as f64 / 7.0).min(1.0);
        }
        if anomaly.detected {
            let mut anomaly_score = (anomaly.size_ratio / 3.0).min(1.0);
            if anomaly.rejection {
                anomaly_score = (anomaly_score * 1.5).min(1.0);
            }
            score += 0.2 * anomaly_score;
        }

        let triple_extreme = {
            let macd_extreme = osc
                .macd_histogram
                .map(|h| h.abs() > 0.5)
                .unwrap_or(false);
            [rsi_extreme, stoch_extreme, macd_extreme]
                .iter()
                .filter(|&&b| b)
                .count()
                >= 2
        };
        if triple_extreme {
            score += 0.3;
        } else if rsi_extreme || stoch_extreme {
            score += 0.3 * 0.6;
        }

        if volatility.volatility_spike {
            score += 0.2 * (volatility.spike_ratio / 2.0).min(1.0);
        }
        if volatility.bb_squeeze {
            score += 0.2 * 0.5;
        }
        let score = (score * 1000.0).round() / 1000.0;

        // Reversal side: bullish run or overbought extreme => bearish turn.
        let exhaustion_side = if score >= 0.4 {
            if consecutive.run_side == TrendDirection::Bullish
                || extreme_side == TrendDirection::Bearish
            {
                TrendDirection::Bearish
            } else if consecutive.run_side == TrendDirection::Bearish
                || extreme_side == TrendDirection::Bullish
            {
                TrendDirection::Bullish
            } else {
                TrendDirection::Neutral
            }
        } else {
            TrendDirection::Neutral
        };

        MomentumAnalysis {
            exhaustion_detected: score >= 0.6,
            exhaustion_side,
            exhaustion_score: score,
            consecutive,
            anomaly,
            volatility,
        }
    }
}

// ---------------------------------------------------------------------------
// Evidence gathering
// ---------------------------------------------------------------------------

fn analyze_consecutive(candles: &[Candle]) -> ConsecutiveRun {
    if candles.len() < 5 {
        return ConsecutiveRun::default();
    }

    let recent = &candles[candles.len().saturating_sub(10)..];

    let mut current_bullish = 0u32;
    let mut current_bearish = 0u32;
    let mut max_bullish = 0u32;
    let mut max_bearish = 0u32;

    for candle in recent {
        if candle.is_bullish() {
            current_bullish += 1;
            current_bearish = 0;
            max_bullish = max_bullish.max(current_bullish);
        } else {
            current_bearish += 1;
            current_bullish = 0;
            max_bearish = max_bearish.max(current_bearish);
        }
    }

    let run_side = if max_bullish >= CONSECUTIVE_THRESHOLD {
        TrendDirection::Bullish
    } else if max_bearish >= CONSECUTIVE_THRESHOLD {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    };

    ConsecutiveRun {
        bullish_count: max_bullish,
        bearish_count: max_bearish,
        run_side,
    }
}

fn analyze_anomaly(candles: &[Candle]) -> CandleAnomaly {
    if candles.len() < 20 {
        return CandleAnomaly::default();
    }

    let window = &candles[candles.len() - 20..];
    let avg_body: f64 = window[..window.len() - 1]
        .iter()
        .map(|c| to_f64(c.body()))
        .sum::<f64>()
        / (window.len() - 1) as f64;

    let last = &window[window.len() - 1];
    let last_body = to_f64(last.body());
    let total_range = to_f64(last.range());

    let detected = avg_body > 0.0 && last_body > avg_body * CANDLE_SIZE_MULTIPLIER;
    let wick_ratio = if last_body > 0.0 {
        (total_range - last_body) / last_body
    } else {
        0.0
    };

    CandleAnomaly {
        detected,
        bullish_spike: detected && last.is_bullish(),
        size_ratio: if avg_body > 0.0 {
            last_body / avg_body
        } else {
            1.0
        },
        wick_ratio,
        rejection: wick_ratio > 2.0,
    }
}

fn analyze_volatility(candles: &[Candle], osc: &OscillatorSnapshot) -> VolatilityState {
    let mut state = VolatilityState {
        spike_ratio: 1.0,
        ..Default::default()
    };

    if let Some(ratio) = osc.atr_expansion_ratio {
        state.spike_ratio = ratio;
        state.atr_expansion = ratio >= ATR_EXPANSION_THRESHOLD;
        state.volatility_spike = state.atr_expansion;
    } else if candles.len() >= 20 {
        // Fall back to the last range against the 20-candle average range.
        let window = &candles[candles.len() - 20..];
        let avg_range: f64 = window[..window.len() - 1]
            .iter()
            .map(|c| to_f64(c.range()))
            .sum::<f64>()
            / (window.len() - 1) as f64;
        let last_range = to_f64(window[window.len() - 1].range());
        if avg_range > 0.0 {
            state.spike_ratio = last_range / avg_range;
            state.atr_expansion = state.spike_ratio >= ATR_EXPANSION_THRESHOLD;
            state.volatility_spike = state.atr_expansion;
        }
    }

    if let Some(width) = osc.bollinger_width {
        state.bb_squeeze = width < BB_SQUEEZE_THRESHOLD;
    }

    state
}

/// (rsi_extreme, stoch_extreme, side-of-the-extreme).
fn analyze_extremes(osc: &OscillatorSnapshot) -> (bool, bool, TrendDirection) {
    let mut side = TrendDirection::Neutral;

    let rsi_extreme = match osc.rsi {
        Some(rsi) if rsi > 70.0 => {
            side = TrendDirection::Bearish; // overbought
            true
        }
        Some(rsi) if rsi < 30.0 => {
            side = TrendDirection::Bullish; // oversold
            true
        }
        _ => false,
    };

    let stoch_extreme = match osc.stoch_k {
        Some(k) if k > 80.0 => {
            if side != TrendDirection::Bullish {
                side = TrendDirection::Bearish;
            }
            true
        }
        Some(k) if k < 20.0 => {
            if side != TrendDirection::Bearish {
                side = TrendDirection::Bullish;
            }
            true
        }
        _ => false,
    };

    (rsi_extreme, stoch_extreme, side)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            interval_minutes: 15,
            open: Decimal::from_f64(open).unwrap(),
            high: Decimal::from_f64(high).unwrap(),
            low: Decimal::from_f64(low).unwrap(),
            close: Decimal::from_f64(close).unwrap(),
            tick_count: 50,
        }
    }

    fn green_run(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 1.2, base - 0.2, base + 1.0)
            })
            .collect()
    }

    #[test]
    fn default_on_short_window() {
        let manager = MomentumManager;
        let analysis = manager.analyze(&green_run(9), &OscillatorSnapshot::default());
        assert!(!analysis.exhaustion_detected);
        assert_eq!(analysis.exhaustion_side, TrendDirection::Neutral);
        assert!(analysis.exhaustion_score.abs() < 1e-12);
    }

    #[test]
    fn partial_score_on_short_window() {
        // 10-19 candles: consecutive runs and indicator extremes still
        // score even though anomaly/volatility evidence needs 20.
        let manager = MomentumManager;
        let osc = OscillatorSnapshot {
            rsi: Some(78.0),
            stoch_k: Some(88.0),
            ..Default::default()
        };
        let analysis = manager.analyze(&green_run(12), &osc);
        // consecutive (0.3) + triple extreme (0.3) with no anomaly window.
        assert!(analysis.exhaustion_score >= 0.6 - 1e-9);
        assert!(analysis.exhaustion_detected);
        assert_eq!(analysis.exhaustion_side, TrendDirection::Bearish);
        assert!(!analysis.anomaly.detected);
    }

    #[test]
    fn long_green_run_counts_consecutive() {
        let manager = MomentumManager;
        let analysis = manager.analyze(&green_run(25), &OscillatorSnapshot::default());
        assert_eq!(analysis.consecutive.run_side, TrendDirection::Bullish);
        assert!(analysis.consecutive.bullish_count >= CONSECUTIVE_THRESHOLD);
    }

    #[test]
    fn run_plus_overbought_extremes_is_bearish_exhaustion() {
        let manager = MomentumManager;
        let osc = OscillatorSnapshot {
            rsi: Some(78.0),
            stoch_k: Some(88.0),
            macd_histogram: Some(1.0),
            ..Default::default()
        };
        let analysis = manager.analyze(&green_run(25), &osc);
        // consecutive (0.3 * 10/7 capped) + triple extreme (0.3) >= 0.6.
        assert!(analysis.exhaustion_score >= 0.6, "score {}", analysis.exhaustion_score);
        assert!(analysis.exhaustion_detected);
        assert_eq!(analysis.exhaustion_side, TrendDirection::Bearish);
    }

    #[test]
    fn red_run_with_oversold_is_bullish_exhaustion() {
        let manager = MomentumManager;
        let candles: Vec<Candle> = (0..25)
            .map(|i| {
                let base = 150.0 - i as f64;
                candle(base, base + 0.2, base - 1.2, base - 1.0)
            })
            .collect();
        let osc = OscillatorSnapshot {
            rsi: Some(22.0),
            stoch_k: Some(12.0),
            ..Default::default()
        };
        let analysis = manager.analyze(&candles, &osc);
        assert!(analysis.exhaustion_detected);
        assert_eq!(analysis.exhaustion_side, TrendDirection::Bullish);
    }

    #[test]
    fn giant_candle_flagged_as_anomaly() {
        let mut candles: Vec<Candle> = (0..24)
            .map(|i| {
                let wobble = (i % 2) as f64 * 0.5;
                candle(100.0 + wobble, 100.8 + wobble, 99.8 + wobble, 100.5 + wobble)
            })
            .collect();
        candles.push(candle(100.0, 106.5, 99.9, 106.0)); // 12x body
        let manager = MomentumManager;
        let analysis = manager.analyze(&candles, &OscillatorSnapshot::default());
        assert!(analysis.anomaly.detected);
        assert!(analysis.anomaly.bullish_spike);
        assert!(analysis.anomaly.size_ratio > CANDLE_SIZE_MULTIPLIER);
    }

    #[test]
    fn squeeze_contributes_to_score() {
        let manager = MomentumManager;
        let osc = OscillatorSnapshot {
            bollinger_width: Some(0.4),
            ..Default::default()
        };
        let flat: Vec<Candle> = (0..25)
            .map(|i| {
                let wobble = (i % 2) as f64 * 0.1;
                candle(100.0 + wobble, 100.2 + wobble, 99.8 + wobble, 100.1 + wobble)
            })
            .collect();
        let analysis = manager.analyze(&flat, &osc);
        assert!(analysis.volatility.bb_squeeze);
        assert!(analysis.exhaustion_score >= 0.1 - 1e-9);
    }
}
