// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the
// analysis pipeline.  Every public function returns `Option<T>` (or an empty
// series) so callers are forced to handle insufficient-data and numerical
// edge cases.  Monetary inputs arrive as `Decimal` candles; indicator math
// runs in `f64` and results are rounded back to fixed-point by the analyzers
// that persist them.

pub mod atr;
pub mod bollinger;
pub mod cci;
pub mod ema;
pub mod macd;
pub mod mfi;
pub mod patterns;
pub mod rsi;
pub mod stochastic;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::market_data::Candle;

/// Lossy fixed-point -> float conversion at the indicator boundary.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| to_f64(c.close)).collect()
}

pub fn opens(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| to_f64(c.open)).collect()
}

pub fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| to_f64(c.high)).collect()
}

pub fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| to_f64(c.low)).collect()
}

/// Tick counts as the volume proxy (ticks carry no traded volume).
pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.tick_count as f64).collect()
}

// ---------------------------------------------------------------------------
// Swing detection — shared by divergence scans and market structure
// ---------------------------------------------------------------------------

/// Indices of local maxima: `values[i]` strictly greater than every value
/// within `window` positions on both sides. Edges never qualify.
pub fn swing_high_indices(values: &[f64], window: usize) -> Vec<usize> {
    swing_indices(values, window, |center, other| center > other)
}

/// Indices of local minima, mirror of [`swing_high_indices`].
pub fn swing_low_indices(values: &[f64], window: usize) -> Vec<usize> {
    swing_indices(values, window, |center, other| center < other)
}

fn swing_indices(values: &[f64], window: usize, dominates: fn(f64, f64) -> bool) -> Vec<usize> {
    if window == 0 || values.len() < 2 * window + 1 {
        return Vec::new();
    }

    let mut result = Vec::new();
    for i in window..values.len() - window {
        let center = values[i];
        let is_swing = (i - window..i + window + 1)
            .filter(|&j| j != i)
            .all(|j| dominates(center, values[j]));
        if is_swing {
            result.push(i);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    pub(crate) fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        use rust_decimal::prelude::FromPrimitive;
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

    #[test]
    fn conversion_helpers() {
        let candles = vec![candle(1.0, 2.0, 0.5, 1.5), candle(1.5, 3.0, 1.0, 2.5)];
        assert_eq!(closes(&candles), vec![1.5, 2.5]);
        assert_eq!(highs(&candles), vec![2.0, 3.0]);
        assert_eq!(lows(&candles), vec![0.5, 1.0]);
        assert_eq!(volumes(&candles), vec![50.0, 50.0]);
        assert_eq!(to_f64(dec!(2.5)), 2.5);
    }

    #[test]
    fn swing_highs_found() {
        //                 0    1    2     3    4    5    6
        let values = [1.0, 2.0, 5.0, 2.0, 1.0, 0.5, 0.2];
        assert_eq!(swing_high_indices(&values, 2), vec![2]);
    }

    #[test]
    fn swing_lows_found() {
        let values = [5.0, 4.0, 1.0, 4.0, 5.0, 6.0, 7.0];
        assert_eq!(swing_low_indices(&values, 2), vec![2]);
    }

    #[test]
    fn swings_need_full_window() {
        let values = [1.0, 5.0, 1.0];
        assert!(swing_high_indices(&values, 2).is_empty());
    }

    #[test]
    fn flat_series_has_no_swings() {
        let values = [2.0; 20];
        assert!(swing_high_indices(&values, 3).is_empty());
        assert!(swing_low_indices(&values, 3).is_empty());
    }
}
