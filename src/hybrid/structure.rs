// =============================================================================
// Structure Manager — market structure (HH/HL vs LL/LH) and breaks
// =============================================================================
//
// Swing highs/lows are found with a 5-candle window (strictly above/below
// the two neighbours on each side) and filtered for minimum swing size.
// The last four swings classify the structure:
//
//   HH + HL  => BULLISH        LL + LH => BEARISH       otherwise NEUTRAL
//
// A structure break is price crossing the prior swing against the current
// structure. After a break, a pullback to within 0.5% of the nearest level
// is an entry zone.
// =============================================================================

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::indicators::{highs, lows, to_f64};
use crate::market_data::Candle;
use crate::types::{Signal, TrendDirection};

/// Candles the structure scan wants before saying anything.
const LOOKBACK_CANDLES: usize = 20;

/// Minimum distance between consecutive swings, percent.
const MIN_SWING_PERCENT: f64 = 0.3;

/// Pullback proximity to a level, fraction.
const PULLBACK_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "LOW")]
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    pub price: f64,
    pub index: usize,
}

/// Entry suggestion when price pulls back to a broken level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullbackZone {
    pub signal: Signal,
    pub level: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StructureAnalysis {
    pub structure: TrendDirection,
    pub structure_break: bool,
    /// Side of the break (BULLISH = prior swing high taken out).
    pub break_side: TrendDirection,
    pub nearest_support: Option<Decimal>,
    pub nearest_resistance: Option<Decimal>,
    pub pullback_zone: Option<PullbackZone>,
    pub swing_count: usize,
    pub confidence: f64,
}

#[derive(Default)]
pub struct StructureManager;

impl StructureManager {
    pub fn analyze(&self, candles: &[Candle]) -> StructureAnalysis {
        if candles.len() < LOOKBACK_CANDLES {
            return StructureAnalysis::default();
        }

        let current_price = to_f64(candles[candles.len() - 1].close);
        let swings = find_swing_points(candles);
        let structure = determine_structure(&swings);
        let (structure_break, break_side) = check_break(&swings, current_price, structure);
        let (nearest_support, nearest_resistance) = key_levels(&swings, current_price);
        let pullback_zone = check_pullback(
            current_price,
            nearest_support,
            nearest_resistance,
            structure_break,
            break_side,
        );

        // Confidence grows with swing evidence and a confirmed break.
        let mut confidence: f64 = 0.3 + (swings.len() as f64 * 0.05).min(0.3);
        if structure_break {
            confidence += 0.2;
        }
        if structure != TrendDirection::Neutral {
            confidence += 0.1;
        }

        StructureAnalysis {
            structure,
            structure_break,
            break_side,
            nearest_support: nearest_support.map(to_decimal),
            nearest_resistance: nearest_resistance.map(to_decimal),
            pullback_zone,
            swing_count: swings.len(),
            confidence: confidence.min(1.0),
        }
    }
}

fn to_decimal(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or_default().round_dp(4)
}

// ---------------------------------------------------------------------------
// Swings and structure
// ---------------------------------------------------------------------------

fn find_swing_points(candles: &[Candle]) -> Vec<SwingPoint> {
    let highs = highs(candles);
    let lows = lows(candles);

    let mut swings = Vec::new();
    for i in 2..candles.len() - 2 {
        let swing_high = highs[i] > highs[i - 1]
            && highs[i] > highs[i - 2]
            && highs[i] > highs[i + 1]
            && highs[i] > highs[i + 2];
        let swing_low = lows[i] < lows[i - 1]
            && lows[i] < lows[i - 2]
            && lows[i] < lows[i + 1]
            && lows[i] < lows[i + 2];

        if swing_high {
            swings.push(SwingPoint {
                kind: SwingKind::High,
                price: highs[i],
                index: i,
            });
        } else if swing_low {
            swings.push(SwingPoint {
                kind: SwingKind::Low,
                price: lows[i],
                index: i,
            });
        }
    }

    // Drop swings that barely move from the previous kept one.
    let mut filtered: Vec<SwingPoint> = Vec::with_capacity(swings.len());
    for swing in swings {
        match filtered.last() {
            Some(prev) if prev.price != 0.0 => {
                let change_pct = ((swing.price - prev.price).abs() / prev.price) * 100.0;
                if change_pct >= MIN_SWING_PERCENT {
                    filtered.push(swing);
                }
            }
            _ => filtered.push(swing),
        }
    }
    filtered
}

fn determine_structure(swings: &[SwingPoint]) -> TrendDirection {
    if swings.len() < 4 {
        return TrendDirection::Neutral;
    }

    let recent = &swings[swings.len() - 4..];
    let highs: Vec<&SwingPoint> = recent.iter().filter(|s| s.kind == SwingKind::High).collect();
    let lows: Vec<&SwingPoint> = recent.iter().filter(|s| s.kind == SwingKind::Low).collect();

    if highs.len() >= 2 && lows.len() >= 2 {
        let hh = highs[highs.len() - 1].price > highs[highs.len() - 2].price;
        let hl = lows[lows.len() - 1].price > lows[lows.len() - 2].price;
        let ll = lows[lows.len() - 1].price < lows[lows.len() - 2].price;
        let lh = highs[highs.len() - 1].price < highs[highs.len() - 2].price;

        if hh && hl {
            return TrendDirection::Bullish;
        }
        if ll && lh {
            return TrendDirection::Bearish;
        }
    }

    TrendDirection::Neutral
}

fn check_break(
    swings: &[SwingPoint],
    current_price: f64,
    structure: TrendDirection,
) -> (bool, TrendDirection) {
    if swings.len() < 2 {
        return (false, TrendDirection::Neutral);
    }

    let last_high = swings.iter().rev().find(|s| s.kind == SwingKind::High);
    let last_low = swings.iter().rev().find(|s| s.kind == SwingKind::Low);

    match structure {
        TrendDirection::Bearish => {
            if let Some(high) = last_high {
                if current_price > high.price {
                    return (true, TrendDirection::Bullish);
                }
            }
        }
        TrendDirection::Bullish => {
            if let Some(low) = last_low {
                if current_price < low.price {
                    return (true, TrendDirection::Bearish);
                }
            }
        }
        TrendDirection::Neutral => {}
    }

    (false, TrendDirection::Neutral)
}

fn key_levels(swings: &[SwingPoint], current_price: f64) -> (Option<f64>, Option<f64>) {
    let support = swings
        .iter()
        .filter(|s| s.kind == SwingKind::Low && s.price < current_price)
        .map(|s| s.price)
        .fold(None::<f64>, |acc, p| Some(acc.map_or(p, |a| a.max(p))));

    let resistance = swings
        .iter()
        .filter(|s| s.kind == SwingKind::High && s.price > current_price)
        .map(|s| s.price)
        .fold(None::<f64>, |acc, p| Some(acc.map_or(p, |a| a.min(p))));

    (support, resistance)
}

fn check_pullback(
    current_price: f64,
    nearest_support: Option<f64>,
    nearest_resistance: Option<f64>,
    structure_break: bool,
    break_side: TrendDirection,
) -> Option<PullbackZone> {
    if !structure_break {
        return None;
    }

    match break_side {
        TrendDirection::Bullish => {
            let support = nearest_support?;
            let distance = (current_price - support).abs() / support;
            (distance <= PULLBACK_TOLERANCE).then(|| PullbackZone {
                signal: Signal::Buy,
                level: to_decimal(support),
            })
        }
        TrendDirection::Bearish => {
            let resistance = nearest_resistance?;
            let distance = (current_price - resistance).abs() / resistance;
            (distance <= PULLBACK_TOLERANCE).then(|| PullbackZone {
                signal: Signal::Sell,
                level: to_decimal(resistance),
            })
        }
        TrendDirection::Neutral => None,
    }
}
