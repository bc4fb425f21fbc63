// =============================================================================
// Smart Money Manager — stop hunts, order blocks, FVGs, liquidity sweeps
// =============================================================================
//
// Institutional footprints read from candle geometry alone:
//
//   stop hunt     wick beyond the nearest level by >= 0.3% with a later
//                 close back across it
//   order block   body/range >= 0.7, size >= 0.5% of price, followed by
//                 displacement, still untested
//   FVG           c1.high < c3.low (or inverse), gap >= 0.1%, unfilled
//   sweep         equal highs/lows (0.05% tolerance) penetrated by >= 0.2%
//                 with price back across
//
// manipulation_score in [0,1] sums the evidence; the direction is a simple
// weighted vote (stop hunts count double).
// =============================================================================

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::indicators::to_f64;
use crate::market_data::Candle;
use crate::types::TrendDirection;

/// Candles the scan wants before saying anything.
const LOOKBACK_CANDLES: usize = 20;

const STOP_HUNT_PCT: f64 = 0.3;
const ORDER_BLOCK_MIN_SIZE_PCT: f64 = 0.5;
const FVG_MIN_GAP_PCT: f64 = 0.1;
const SWEEP_PENETRATION_PCT: f64 = 0.2;
const EQUAL_LEVEL_TOLERANCE_PCT: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StopHunt {
    pub detected: bool,
    /// BULLISH = support swept then reclaimed.
    pub side: TrendDirection,
    pub level: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub bullish: bool,
    pub high: Decimal,
    pub low: Decimal,
    pub strength: f64,
    pub tested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    pub bullish: bool,
    pub top: Decimal,
    pub bottom: Decimal,
    /// Gap size as a percent of price.
    pub size: f64,
    pub filled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquiditySweep {
    pub bullish: bool,
    pub level: Decimal,
    pub equal_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SmartMoneyAnalysis {
    pub stop_hunt: StopHunt,
    pub order_blocks: Vec<OrderBlock>,
    pub fair_value_gaps: Vec<FairValueGap>,
    pub liquidity_sweeps: Vec<LiquiditySweep>,
    pub manipulation_score: f64,
    pub direction: TrendDirection,
}

#[derive(Default)]
pub struct SmartMoneyManager;

impl SmartMoneyManager {
    /// `nearest_support` / `nearest_resistance` come from the gram S/R pass.
    pub fn analyze(
        &self,
        candles: &[Candle],
        nearest_support: Option<Decimal>,
        nearest_resistance: Option<Decimal>,
    ) -> SmartMoneyAnalysis {
        if candles.len() < LOOKBACK_CANDLES {
            return SmartMoneyAnalysis::default();
        }

        let stop_hunt = detect_stop_hunt(
            candles,
            nearest_support.map(to_f64),
            nearest_resistance.map(to_f64),
        );
        let order_blocks = find_order_blocks(candles);
        let fair_value_gaps = find_fair_value_gaps(candles);
        let liquidity_sweeps = find_liquidity_sweeps(candles);

        let manipulation_score =
            manipulation_score(&stop_hunt, &order_blocks, &fair_value_gaps, &liquidity_sweeps);
        let direction = determine_direction(&stop_hunt, &order_blocks, &liquidity_sweeps);

        SmartMoneyAnalysis {
            stop_hunt,
            order_blocks,
            fair_value_gaps,
            liquidity_sweeps,
            manipulation_score,
            direction,
        }
    }
}

fn to_decimal(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or_default().round_dp(4)
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

fn detect_stop_hunt(
    candles: &[Candle],
    nearest_support: Option<f64>,
    nearest_resistance: Option<f64>,
) -> StopHunt {
    let last5 = &candles[candles.len() - 5..];

    for i in 0..last5.len() - 1 {
        let low = to_f64(last5[i].low);
        let high = to_f64(last5[i].high);

        if let Some(support) = nearest_support {
            if support > 0.0 && (support - low) / support > STOP_HUNT_PCT / 100.0 {
                // Recovery: a later close back above the swept level.
                let recovered = last5[i + 1..]
                    .iter()
                    .any(|c| to_f64(c.close) > support);
                if recovered {
                    return StopHunt {
                        detected: true,
                        side: TrendDirection::Bullish,
                        level: Some(to_decimal(support)),
                    };
                }
            }
        }

        if let Some(resistance) = nearest_resistance {
            if resistance > 0.0 && (high - resistance) / resistance > STOP_HUNT_PCT / 100.0 {
                let recovered = last5[i + 1..]
                    .iter()
                    .any(|c| to_f64(c.close) < resistance);
                if recovered {
                    return StopHunt {
                        detected: true,
                        side: TrendDirection::Bearish,
                        level: Some(to_decimal(resistance)),
                    };
                }
            }
        }
    }

    StopHunt::default()
}

fn find_order_blocks(candles: &[Candle]) -> Vec<OrderBlock> {
    if candles.len() < 10 {
        return Vec::new();
    }

    let start = candles.len().saturating_sub(20);
    let search = &candles[start..candles.len() - 1];
    let mut blocks = Vec::new();

    for i in 1..search.len().saturating_sub(1) {
        let candle = &search[i];
        let next = &search[i + 1];

        let range = to_f64(candle.range());
        let body = to_f64(candle.body());
        let close = to_f64(candle.close);

        if range <= 0.0 || close <= 0.0 || body / range <= 0.7 {
            continue;
        }

        let size_pct = range / close * 100.0;
        if size_pct < ORDER_BLOCK_MIN_SIZE_PCT {
            continue;
        }

        // Displacement away from the block confirms it.
        if candle.is_bullish() && next.close > candle.high {
            blocks.push(OrderBlock {
                bullish: true,
                high: candle.high,
                low: candle.low,
                strength: (size_pct / ORDER_BLOCK_MIN_SIZE_PCT).min(2.0),
                tested: level_tested(&candles[start + i + 1..], to_f64(candle.low)),
            });
        } else if candle.is_bearish() && next.close < candle.low {
            blocks.push(OrderBlock {
                bullish: false,
                high: candle.high,
                low: candle.low,
                strength: (size_pct / ORDER_BLOCK_MIN_SIZE_PCT).min(2.0),
                tested: level_tested(&candles[start + i + 1..], to_f64(candle.high)),
            });
        }
    }

    blocks.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    blocks.truncate(3);
    blocks
}

fn level_tested(later_candles: &[Candle], level: f64) -> bool {
    later_candles
        .iter()
        .any(|c| to_f64(c.low) <= level && level <= to_f64(c.high))
}

fn find_fair_value_gaps(candles: &[Candle]) -> Vec<FairValueGap> {
    if candles.len() < 3 {
        return Vec::new();
    }

    let mut gaps = Vec::new();
    let n = candles.len();

    for i in 2..15.min(n) {
        let c1 = &candles[n - i - 1];
        let c2 = &candles[n - i];
        let c3 = &candles[n - i + 1];

        let c2_close = to_f64(c2.close);
        if c2_close == 0.0 {
            continue;
        }

        if c1.high < c3.low {
            let gap_pct = to_f64(c3.low - c1.high) / c2_close * 100.0;
            if gap_pct >= FVG_MIN_GAP_PCT {
                gaps.push(FairValueGap {
                    bullish: true,
                    top: c3.low,
                    bottom: c1.high,
                    size: gap_pct,
                    filled: fvg_filled(&candles[n - i + 1..], to_f64(c1.high), to_f64(c3.low)),
                });
            }
        } else if c1.low > c3.high {
            let gap_pct = to_f64(c1.low - c3.high) / c2_close * 100.0;
            if gap_pct >= FVG_MIN_GAP_PCT {
                gaps.push(FairValueGap {
                    bullish: false,
                    top: c1.low,
                    bottom: c3.high,
                    size: gap_pct,
                    filled: fvg_filled(&candles[n - i + 1..], to_f64(c3.high), to_f64(c1.low)),
                });
            }
        }
    }

    gaps.sort_by(|a, b| b.size.total_cmp(&a.size));
    gaps.truncate(3);
    gaps
}

fn fvg_filled(later_candles: &[Candle], bottom: f64, top: f64) -> bool {
    later_candles
        .iter()
        .any(|c| to_f64(c.low) <= bottom && to_f64(c.high) >= top)
}

fn find_liquidity_sweeps(candles: &[Candle]) -> Vec<LiquiditySweep> {
    if candles.len() < 10 {
        return Vec::new();
    }

    let recent = &candles[candles.len() - 10..];
    let current_price = to_f64(recent[recent.len() - 1].close);
    let mut sweeps = Vec::new();

    let equal_highs = find_equal_levels(recent, true);
    let equal_lows = find_equal_levels(recent, false);

    let last5 = &recent[recent.len() - 5..];

    for (level, count) in equal_highs {
        let swept = last5
            .iter()
            .any(|c| to_f64(c.high) > level * (1.0 + SWEEP_PENETRATION_PCT / 100.0));
        if swept && current_price < level {
            sweeps.push(LiquiditySweep {
                bullish: false,
                level: to_decimal(level),
                equal_count: count,
            });
        }
    }

    for (level, count) in equal_lows {
        let swept = last5
            .iter()
            .any(|c| to_f64(c.low) < level * (1.0 - SWEEP_PENETRATION_PCT / 100.0));
        if swept && current_price > level {
            sweeps.push(LiquiditySweep {
                bullish: true,
                level: to_decimal(level),
                equal_count: count,
            });
        }
    }

    sweeps
}

/// Price levels touched by at least two highs (or lows) within tolerance.
fn find_equal_levels(candles: &[Candle], use_highs: bool) -> Vec<(f64, u32)> {
    let values: Vec<f64> = candles
        .iter()
        .map(|c| to_f64(if use_highs { c.high } else { c.low }))
        .collect();

    let mut levels: Vec<(f64, u32)> = Vec::new();
    for (i, &value) in values.iter().enumerate() {
        if value == 0.0 {
            continue;
        }
        let count = values
            .iter()
            .enumerate()
            .filter(|&(j, &other)| {
                j != i && (other - value).abs() / value * 100.0 <= EQUAL_LEVEL_TOLERANCE_PCT
            })
            .count() as u32
            + 1;

        if count >= 2 {
            let duplicate = levels.iter().any(|(existing, _)| {
                (existing - value).abs() / value * 100.0 <= EQUAL_LEVEL_TOLERANCE_PCT
            });
            if !duplicate {
                levels.push((value, count));
            }
        }
    }
    levels
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

fn manipulation_score(
    stop_hunt: &StopHunt,
    order_blocks: &[OrderBlock],
    fvgs: &[FairValueGap],
    sweeps: &[LiquiditySweep],
) -> f64 {
    let mut score = 0.0;

    if stop_hunt.detected {
        score += 0.4;
    }

    let untested_obs = order_blocks.iter().filter(|ob| !ob.tested).count();
    score += (untested_obs as f64 * 0.15).min(0.3);

    let unfilled_fvgs = fvgs.iter().filter(|g| !g.filled).count();
    score += (unfilled_fvgs as f64 * 0.1).min(0.2);

    score += (sweeps.len() as f64 * 0.1).min(0.2);

    score.min(1.0)
}

fn determine_direction(
    stop_hunt: &StopHunt,
    order_blocks: &[OrderBlock],
    sweeps: &[LiquiditySweep],
) -> TrendDirection {
    let mut bullish = 0u32;
    let mut bearish = 0u32;

    match stop_hunt.side {
        TrendDirection::Bullish => bullish += 2,
        TrendDirection::Bearish => bearish += 2,
        TrendDirection::Neutral => {}
    }

    for ob in order_blocks.iter().filter(|ob| !ob.tested) {
        if ob.bullish {
            bullish += 1;
        } else {
            bearish += 1;
        }
    }

    for sweep in sweeps {
        if sweep.bullish {
            bullish += 1;
        } else {
            bearish += 1;
        }
    }

    if bullish > bearish {
        TrendDirection::Bullish
    } else if bearish > bullish {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

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

    fn flat(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let wobble = (i % 3) as f64 * 0.3;
                candle(100.0 + wobble, 100.6 + wobble, 99.4 + wobble, 100.2 + wobble)
            })
            .collect()
    }

    #[test]
    fn default_on_short_window() {
        let manager = SmartMoneyManager;
        let analysis = manager.analyze(&flat(5), None, None);
        assert!(!analysis.stop_hunt.detected);
        assert_eq!(analysis.direction, TrendDirection::Neutral);

        // Still default just under the lookback.
        let analysis = manager.analyze(&flat(19), None, None);
        assert!(analysis.order_blocks.is_empty());
        assert!(analysis.manipulation_score.abs() < 1e-12);
    }

    #[test]
    fn bullish_stop_hunt_detected() {
        let manager = SmartMoneyManager;
        let mut candles = flat(17);
        // Wick 1% below support at 99.0, then closes back above.
        candles.push(candle(99.5, 99.6, 97.9, 98.2));
        candles.push(candle(98.2, 99.8, 98.0, 99.6));
        candles.push(candle(99.6, 100.4, 99.4, 100.2));
        let analysis = manager.analyze(&candles, Some(dec!(99.0)), None);
        assert!(analysis.stop_hunt.detected);
        assert_eq!(analysis.stop_hunt.side, TrendDirection::Bullish);
        assert!(analysis.manipulation_score >= 0.4);
    }

    #[test]
    fn bearish_stop_hunt_detected() {
        let manager = SmartMoneyManager;
        let mut candles = flat(17);
        candles.push(candle(100.5, 102.2, 100.4, 101.6)); // pierce 101.5 by >0.3%
        candles.push(candle(101.6, 101.7, 100.2, 100.5)); // close back below
        candles.push(candle(100.5, 100.8, 100.0, 100.3));
        let analysis = manager.analyze(&candles, None, Some(dec!(101.5)));
        assert!(analysis.stop_hunt.detected);
        assert_eq!(analysis.stop_hunt.side, TrendDirection::Bearish);
    }

    #[test]
    fn bullish_fvg_detected() {
        let manager = SmartMoneyManager;
        let mut candles = flat(17);
        // Gap: c1.high=100.6+? use explicit trio with c1.high < c3.low.
        candles.push(candle(100.0, 100.5, 99.8, 100.4));
        candles.push(candle(100.5, 101.5, 100.4, 101.4));
        candles.push(candle(101.5, 102.2, 101.1, 102.0)); // c3.low 101.1 > c1.high 100.5
        let analysis = manager.analyze(&candles, None, None);
        assert!(
            analysis.fair_value_gaps.iter().any(|g| g.bullish),
            "expected a bullish FVG, got {:?}",
            analysis.fair_value_gaps
        );
    }

    #[test]
    fn order_block_requires_displacement() {
        let manager = SmartMoneyManager;
        let mut candles = flat(17);
        // Solid bullish candle (body/range > 0.7, size > 0.5%)...
        candles.push(candle(100.0, 101.2, 99.95, 101.1));
        // ...followed by a close above its high (displacement).
        candles.push(candle(101.1, 102.5, 101.0, 102.4));
        candles.push(candle(102.4, 103.0, 102.2, 102.8));
        let analysis = manager.analyze(&candles, None, None);
        assert!(analysis.order_blocks.iter().any(|ob| ob.bullish));
    }

    #[test]
    fn equal_lows_sweep_is_bullish() {
        let manager = SmartMoneyManager;
        // Filler context; only the last 10 candles feed the sweep scan.
        let mut candles = flat(10);
        // Two equal lows at 99.0.
        for _ in 0..4 {
            candles.push(candle(100.0, 100.5, 99.0, 100.2));
        }
        for _ in 0..3 {
            candles.push(candle(100.2, 100.6, 99.0, 100.3));
        }
        // Sweep below by > 0.2% then recover above the level.
        candles.push(candle(100.0, 100.2, 98.7, 99.2));
        candles.push(candle(99.2, 100.8, 99.1, 100.6));
        candles.push(candle(100.6, 100.9, 100.2, 100.7));
        let analysis = manager.analyze(&candles, None, None);
        assert!(
            analysis.liquidity_sweeps.iter().any(|s| s.bullish),
            "expected bullish sweep, got {:?}",
            analysis.liquidity_sweeps
        );
    }

    #[test]
    fn score_bounded_to_one() {
        let stop_hunt = StopHunt {
            detected: true,
            side: TrendDirection::Bullish,
            level: Some(dec!(99.0)),
        };
        let obs = vec![
            OrderBlock {
                bullish: true,
                high: dec!(101.0),
                low: dec!(100.0),
                strength: 2.0,
                tested: false,
            };
            5
        ];
        let fvgs = vec![
            FairValueGap {
                bullish: true,
                top: dec!(101.0),
                bottom: dec!(100.0),
                size: 0.5,
                filled: false,
            };
            5
        ];
        let sweeps = vec![
            LiquiditySweep {
                bullish: true,
                level: dec!(99.0),
                equal_count: 2,
            };
            5
        ];
        let score = manipulation_score(&stop_hunt, &obs, &fvgs, &sweeps);
        assert!(score <= 1.0);
        assert!((score - 1.0).abs() < 1e-9); // 0.4 + 0.3 + 0.2 + 0.2 capped
    }
}
