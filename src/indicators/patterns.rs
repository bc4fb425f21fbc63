// =============================================================================
// Pattern Recognition — candlestick and chart formations
// =============================================================================
//
// Single- and multi-candle formations detected from candle geometry alone:
//
//   Candlestick: HAMMER, INVERTED_HAMMER, DOJI, BULLISH/BEARISH_ENGULFING,
//                THREE_WHITE_SOLDIERS, THREE_BLACK_CROWS, MORNING/EVENING_STAR
//   Chart:       DOUBLE_TOP/BOTTOM, ASCENDING/DESCENDING/SYMMETRICAL_TRIANGLE,
//                BULL_FLAG, BEAR_FLAG
//   S/R:         RESISTANCE_BREAKOUT, SUPPORT_BREAKDOWN, BULL_TRAP, BEAR_TRAP
//
// Conflict resolution when both directions are present: take the strongest of
// each side and emit the stronger side with confidence * 0.8.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::{closes, highs, lows, to_f64};
use crate::market_data::Candle;
use crate::types::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

/// One detected formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternHit {
    pub name: String,
    pub kind: PatternKind,
    pub confidence: f64,
    pub description: String,
}

impl PatternHit {
    fn new(name: &str, kind: PatternKind, confidence: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            confidence,
            description: description.to_string(),
        }
    }
}

/// Directional conclusion drawn from all hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub signal: Signal,
    pub confidence: f64,
    pub pattern: String,
}

/// Full pattern scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PatternReport {
    pub patterns: Vec<PatternHit>,
    pub signal: Option<PatternSignal>,
}

impl PatternReport {
    pub fn pattern_found(&self) -> bool {
        !self.patterns.is_empty()
    }
}

/// Scan the candle window for all known formations.
pub fn detect_patterns(candles: &[Candle]) -> PatternReport {
    let mut hits: Vec<PatternHit> = Vec::new();

    if candles.len() >= 2 {
        let prev = &candles[candles.len() - 2];
        let curr = &candles[candles.len() - 1];
        if let Some(hit) = detect_hammer(curr, prev) {
            hits.push(hit);
        }
        if let Some(hit) = detect_doji(curr) {
            hits.push(hit);
        }
        if let Some(hit) = detect_engulfing(prev, curr) {
            hits.push(hit);
        }
    }

    if candles.len() >= 3 {
        let last3 = &candles[candles.len() - 3..];
        if let Some(hit) = detect_three_pattern(last3) {
            hits.push(hit);
        }
        if let Some(hit) = detect_star_pattern(last3) {
            hits.push(hit);
        }
    }

    if let Some(hit) = detect_double_pattern(candles) {
        hits.push(hit);
    }
    if let Some(hit) = detect_triangle_pattern(candles) {
        hits.push(hit);
    }
    if let Some(hit) = detect_flag_pattern(candles) {
        hits.push(hit);
    }
    if let Some(hit) = detect_breakout(candles) {
        hits.push(hit);
    }
    if let Some(hit) = detect_false_breakout(candles) {
        hits.push(hit);
    }

    let signal = resolve_signal(&hits);
    PatternReport {
        patterns: hits,
        signal,
    }
}

// ---------------------------------------------------------------------------
// Candlestick formations
// ---------------------------------------------------------------------------

fn detect_hammer(current: &Candle, previous: &Candle) -> Option<PatternHit> {
    let body = to_f64(current.body());
    let upper_shadow = to_f64(current.high - current.open.max(current.close));
    let lower_shadow = to_f64(current.open.min(current.close) - current.low);
    let total_range = to_f64(current.range());

    if total_range == 0.0 {
        return None;
    }

    // Long lower wick, tiny upper wick, in a falling context.
    if lower_shadow >= body * 2.0 && upper_shadow < body * 0.3 && current.close < previous.close {
        return Some(PatternHit::new(
            "HAMMER",
            PatternKind::Bullish,
            0.7,
            "Hammer — potential bottom",
        ));
    }

    if upper_shadow >= body * 2.0 && lower_shadow < body * 0.3 && current.close < previous.close {
        return Some(PatternHit::new(
            "INVERTED_HAMMER",
            PatternKind::Bullish,
            0.6,
            "Inverted hammer — potential reversal",
        ));
    }

    None
}

fn detect_doji(candle: &Candle) -> Option<PatternHit> {
    let body = to_f64(candle.body());
    let total_range = to_f64(candle.range());

    if total_range == 0.0 {
        return None;
    }

    (body / total_range < 0.1).then(|| {
        PatternHit::new("DOJI", PatternKind::Neutral, 0.5, "Doji — indecision")
    })
}

fn detect_engulfing(prev: &Candle, curr: &Candle) -> Option<PatternHit> {
    let prev_body = to_f64(prev.body());
    let curr_body = to_f64(curr.body());

    if prev.is_bearish()
        && curr.is_bullish()
        && curr.open < prev.close
        && curr.close > prev.open
        && curr_body > prev_body
    {
        return Some(PatternHit::new(
            "BULLISH_ENGULFING",
            PatternKind::Bullish,
            0.8,
            "Bullish engulfing",
        ));
    }

    if prev.is_bullish()
        && curr.is_bearish()
        && curr.open > prev.close
        && curr.close < prev.open
        && curr_body > prev_body
    {
        return Some(PatternHit::new(
            "BEARISH_ENGULFING",
            PatternKind::Bearish,
            0.8,
            "Bearish engulfing",
        ));
    }

    None
}

fn detect_three_pattern(last3: &[Candle]) -> Option<PatternHit> {
    let bodies: Vec<f64> = last3.iter().map(|c| to_f64(c.body())).collect();
    let avg_body = bodies.iter().sum::<f64>() / bodies.len() as f64;
    let solid_bodies = bodies.iter().all(|&b| b > avg_body * 0.5);

    let all_bullish = last3.iter().all(Candle::is_bullish);
    let ascending = last3[1].close > last3[0].close && last3[2].close > last3[1].close;
    if all_bullish && ascending && solid_bodies {
        return Some(PatternHit::new(
            "THREE_WHITE_SOLDIERS",
            PatternKind::Bullish,
            0.85,
            "Three white soldiers",
        ));
    }

    let all_bearish = last3.iter().all(Candle::is_bearish);
    let descending = last3[1].close < last3[0].close && last3[2].close < last3[1].close;
    if all_bearish && descending && solid_bodies {
        return Some(PatternHit::new(
            "THREE_BLACK_CROWS",
            PatternKind::Bearish,
            0.85,
            "Three black crows",
        ));
    }

    None
}

fn detect_star_pattern(last3: &[Candle]) -> Option<PatternHit> {
    let first = &last3[0];
    let middle = &last3[1];
    let last = &last3[2];

    let first_body = to_f64(first.body());
    let middle_body = to_f64(middle.body());

    if first.is_bearish()
        && middle_body < first_body * 0.3
        && last.is_bullish()
        && last.close > first.open
    {
        return Some(PatternHit::new(
            "MORNING_STAR",
            PatternKind::Bullish,
            0.75,
            "Morning star — bottom reversal",
        ));
    }

    if first.is_bullish()
        && middle_body < first_body * 0.3
        && last.is_bearish()
        && last.close < first.open
    {
        return Some(PatternHit::new(
            "EVENING_STAR",
            PatternKind::Bearish,
            0.75,
            "Evening star — top reversal",
        ));
    }

    None
}

// ---------------------------------------------------------------------------
// Chart formations
// ---------------------------------------------------------------------------

fn detect_double_pattern(candles: &[Candle]) -> Option<PatternHit> {
    if candles.len() < 20 {
        return None;
    }

    let highs = highs(candles);
    let lows = lows(candles);

    let mut local_highs = Vec::new();
    let mut local_lows = Vec::new();
    for i in 1..candles.len() - 1 {
        if highs[i] > highs[i - 1] && highs[i] > highs[i + 1] {
            local_highs.push(highs[i]);
        }
        if lows[i] < lows[i - 1] && lows[i] < lows[i + 1] {
            local_lows.push(lows[i]);
        }
    }

    if local_highs.len() >= 2 {
        let pair = &local_highs[local_highs.len() - 2..];
        if pair[0] > 0.0 && (pair[0] - pair[1]).abs() / pair[0] < 0.02 {
            return Some(PatternHit::new(
                "DOUBLE_TOP",
                PatternKind::Bearish,
                0.7,
                "Double top",
            ));
        }
    }

    if local_lows.len() >= 2 {
        let pair = &local_lows[local_lows.len() - 2..];
        if pair[0] > 0.0 && (pair[0] - pair[1]).abs() / pair[0] < 0.02 {
            return Some(PatternHit::new(
                "DOUBLE_BOTTOM",
                PatternKind::Bullish,
                0.7,
                "Double bottom",
            ));
        }
    }

    None
}

fn detect_triangle_pattern(candles: &[Candle]) -> Option<PatternHit> {
    if candles.len() < 10 {
        return None;
    }

    let window = &candles[candles.len() - 10..];
    let highs = highs(window);
    let lows = lows(window);

    let base = highs[0].max(1e-9);
    // Per-candle slope relative to the price level.
    let high_slope = (highs[9] - highs[0]) / 10.0 / base;
    let low_slope = (lows[9] - lows[0]) / 10.0 / base;

    const FLAT: f64 = 0.0005;

    if high_slope.abs() < FLAT && low_slope > FLAT {
        return Some(PatternHit::new(
            "ASCENDING_TRIANGLE",
            PatternKind::Bullish,
            0.65,
            "Ascending triangle",
        ));
    }

    if high_slope < -FLAT && low_slope.abs() < FLAT {
        return Some(PatternHit::new(
            "DESCENDING_TRIANGLE",
            PatternKind::Bearish,
            0.65,
            "Descending triangle",
        ));
    }

    if high_slope < -FLAT && low_slope > FLAT {
        return Some(PatternHit::new(
            "SYMMETRICAL_TRIANGLE",
            PatternKind::Neutral,
            0.6,
            "Symmetrical triangle — breakout pending",
        ));
    }

    None
}

fn detect_flag_pattern(candles: &[Candle]) -> Option<PatternHit> {
    if candles.len() < 15 {
        return None;
    }

    let pole = &candles[candles.len() - 15..candles.len() - 10];
    let flag = &candles[candles.len() - 10..];

    let pole_move = to_f64(pole[pole.len() - 1].close - pole[0].open);
    let pole_range = pole_move.abs();

    let flag_high = highs(flag).iter().cloned().fold(f64::MIN, f64::max);
    let flag_low = lows(flag).iter().cloned().fold(f64::MAX, f64::min);
    let flag_range = flag_high - flag_low;

    if pole_range == 0.0 || flag_range >= pole_range * 0.5 {
        return None;
    }

    if pole_move > 0.0 {
        Some(PatternHit::new(
            "BULL_FLAG",
            PatternKind::Bullish,
            0.7,
            "Bull flag — continuation",
        ))
    } else {
        Some(PatternHit::new(
            "BEAR_FLAG",
            PatternKind::Bearish,
            0.7,
            "Bear flag — continuation",
        ))
    }
}

// ---------------------------------------------------------------------------
// Support/resistance formations
// ---------------------------------------------------------------------------

fn detect_breakout(candles: &[Candle]) -> Option<PatternHit> {
    if candles.len() < 20 {
        return None;
    }

    let context = &candles[candles.len() - 20..candles.len() - 1];
    let recent_high = highs(context).iter().cloned().fold(f64::MIN, f64::max);
    let recent_low = lows(context).iter().cloned().fold(f64::MAX, f64::min);

    let current_close = *closes(candles).last()?;

    if current_close > recent_high {
        return Some(PatternHit::new(
            "RESISTANCE_BREAKOUT",
            PatternKind::Bullish,
            0.75,
            "Resistance breakout",
        ));
    }

    if current_close < recent_low {
        return Some(PatternHit::new(
            "SUPPORT_BREAKDOWN",
            PatternKind::Bearish,
            0.75,
            "Support breakdown",
        ));
    }

    None
}

fn detect_false_breakout(candles: &[Candle]) -> Option<PatternHit> {
    if candles.len() < 20 {
        return None;
    }

    let context = &candles[candles.len() - 20..candles.len() - 5];
    let prev_high = highs(context).iter().cloned().fold(f64::MIN, f64::max);
    let prev_low = lows(context).iter().cloned().fold(f64::MAX, f64::min);

    let recent = &candles[candles.len() - 5..];
    let recent_highs = highs(recent);
    let recent_lows = lows(recent);
    let recent_closes = closes(recent);

    for i in 0..recent.len() - 1 {
        // Break above resistance, then a close back below it.
        if recent_highs[i] > prev_high && recent_closes[i + 1] < prev_high {
            return Some(PatternHit::new(
                "BULL_TRAP",
                PatternKind::Bearish,
                0.8,
                "Bull trap — failed breakout",
            ));
        }
        if recent_lows[i] < prev_low && recent_closes[i + 1] > prev_low {
            return Some(PatternHit::new(
                "BEAR_TRAP",
                PatternKind::Bullish,
                0.8,
                "Bear trap — failed breakdown",
            ));
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Signal resolution
// ---------------------------------------------------------------------------

fn resolve_signal(hits: &[PatternHit]) -> Option<PatternSignal> {
    let strongest = |kind: PatternKind| -> Option<&PatternHit> {
        hits.iter()
            .filter(|h| h.kind == kind)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    };

    let bull = strongest(PatternKind::Bullish);
    let bear = strongest(PatternKind::Bearish);

    match (bull, bear) {
        (Some(b), None) => Some(PatternSignal {
            signal: Signal::Buy,
            confidence: b.confidence,
            pattern: b.name.clone(),
        }),
        (None, Some(s)) => Some(PatternSignal {
            signal: Signal::Sell,
            confidence: s.confidence,
            pattern: s.name.clone(),
        }),
        (Some(b), Some(s)) => {
            // Conflicting directions: stronger side wins at a 0.8 haircut.
            let (winner, signal) = if b.confidence > s.confidence {
                (b, Signal::Buy)
            } else {
                (s, Signal::Sell)
            };
            Some(PatternSignal {
                signal,
                confidence: winner.confidence * 0.8,
                pattern: winner.name.clone(),
            })
        }
        (None, None) => None,
    }
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

    /// Flat filler so window-based detectors have context without firing.
    fn flat(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let wobble = (i % 2) as f64 * 0.4;
                candle(100.0 + wobble, 100.8 + wobble, 99.6 + wobble, 100.2 + wobble)
            })
            .collect()
    }

    #[test]
    fn hammer_detected() {
        let prev = candle(101.0, 101.5, 100.5, 101.0);
        let curr = candle(100.5, 100.6, 96.0, 100.4); // long lower wick
        let hit = detect_hammer(&curr, &prev).unwrap();
        assert_eq!(hit.name, "HAMMER");
        assert_eq!(hit.kind, PatternKind::Bullish);
    }

    #[test]
    fn doji_detected() {
        let c = candle(100.0, 102.0, 98.0, 100.1);
        let hit = detect_doji(&c).unwrap();
        assert_eq!(hit.name, "DOJI");
        assert_eq!(hit.kind, PatternKind::Neutral);
    }

    #[test]
    fn doji_needs_small_body() {
        let c = candle(100.0, 102.0, 98.0, 101.5);
        assert!(detect_doji(&c).is_none());
    }

    #[test]
    fn bullish_engulfing_detected() {
        let prev = candle(101.0, 101.5, 99.5, 100.0); // red
        let curr = candle(99.8, 102.5, 99.5, 102.0); // green, engulfs
        let hit = detect_engulfing(&prev, &curr).unwrap();
        assert_eq!(hit.name, "BULLISH_ENGULFING");
    }

    #[test]
    fn three_white_soldiers_detected() {
        let last3 = [
            candle(100.0, 101.5, 99.8, 101.0),
            candle(101.0, 102.5, 100.8, 102.0),
            candle(102.0, 103.5, 101.8, 103.0),
        ];
        let hit = detect_three_pattern(&last3).unwrap();
        assert_eq!(hit.name, "THREE_WHITE_SOLDIERS");
        assert_eq!(hit.kind, PatternKind::Bullish);
    }

    #[test]
    fn three_black_crows_detected() {
        let last3 = [
            candle(103.0, 103.2, 101.8, 102.0),
            candle(102.0, 102.2, 100.8, 101.0),
            candle(101.0, 101.2, 99.8, 100.0),
        ];
        let hit = detect_three_pattern(&last3).unwrap();
        assert_eq!(hit.name, "THREE_BLACK_CROWS");
    }

    #[test]
    fn morning_star_detected() {
        let last3 = [
            candle(103.0, 103.2, 99.8, 100.0),  // big red
            candle(100.0, 100.5, 99.5, 100.2),  // small body
            candle(100.2, 104.0, 100.0, 103.5), // green closing above first open
        ];
        let hit = detect_star_pattern(&last3).unwrap();
        assert_eq!(hit.name, "MORNING_STAR");
    }

    #[test]
    fn resistance_breakout_detected() {
        let mut candles = flat(25);
        candles.push(candle(100.5, 103.0, 100.4, 102.8)); // close above all prior highs
        let hit = detect_breakout(&candles).unwrap();
        assert_eq!(hit.name, "RESISTANCE_BREAKOUT");
        assert_eq!(hit.kind, PatternKind::Bullish);
    }

    #[test]
    fn support_breakdown_detected() {
        let mut candles = flat(25);
        candles.push(candle(100.0, 100.1, 97.0, 97.2));
        let hit = detect_breakout(&candles).unwrap();
        assert_eq!(hit.name, "SUPPORT_BREAKDOWN");
    }

    #[test]
    fn bull_trap_detected() {
        let mut candles = flat(20);
        // Spike above the prior high, then a close back under it.
        candles.push(candle(100.5, 103.5, 100.4, 103.0));
        candles.push(candle(103.0, 103.2, 99.8, 100.0));
        candles.extend(flat(3));
        let hit = detect_false_breakout(&candles).unwrap();
        assert_eq!(hit.name, "BULL_TRAP");
        assert_eq!(hit.kind, PatternKind::Bearish);
    }

    #[test]
    fn conflict_resolution_takes_stronger_side_with_haircut() {
        let hits = vec![
            PatternHit::new("BULLISH_ENGULFING", PatternKind::Bullish, 0.8, "x"),
            PatternHit::new("DOUBLE_TOP", PatternKind::Bearish, 0.7, "y"),
        ];
        let signal = resolve_signal(&hits).unwrap();
        assert_eq!(signal.signal, Signal::Buy);
        assert!((signal.confidence - 0.8 * 0.8).abs() < 1e-12);
        assert_eq!(signal.pattern, "BULLISH_ENGULFING");
    }

    #[test]
    fn single_side_keeps_full_confidence() {
        let hits = vec![PatternHit::new("DOUBLE_BOTTOM", PatternKind::Bullish, 0.7, "x")];
        let signal = resolve_signal(&hits).unwrap();
        assert_eq!(signal.signal, Signal::Buy);
        assert!((signal.confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn empty_report_for_tiny_window() {
        let report = detect_patterns(&flat(1));
        assert!(!report.pattern_found());
        assert!(report.signal.is_none());
    }
}
