// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
// raw %K      = (close - lowest_low) / (highest_high - lowest_low) * 100
// smoothed %K = SMA(raw %K, smooth)
// %D          = SMA(smoothed %K, d)
//
// Zones: <= 20 OVERSOLD, >= 80 OVERBOUGHT. A %K/%D crossover inside an
// extreme zone is the strongest stochastic signal.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::{closes, highs, lows};
use crate::market_data::Candle;
use crate::types::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StochasticZone {
    #[serde(rename = "OVERSOLD")]
    Oversold,
    #[serde(rename = "NEUTRAL")]
    Neutral,
    #[serde(rename = "OVERBOUGHT")]
    Overbought,
}

/// Latest stochastic reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
    pub k_prev: Option<f64>,
    pub d_prev: Option<f64>,
    pub zone: StochasticZone,
}

impl StochasticResult {
    /// %K/%D crossover signal; stronger when it happens inside an extreme
    /// zone.
    pub fn crossover_signal(&self) -> (Option<Signal>, f64) {
        let (k_prev, d_prev) = match (self.k_prev, self.d_prev) {
            (Some(k), Some(d)) => (k, d),
            _ => return (None, 0.0),
        };

        if k_prev <= d_prev && self.k > self.d {
            let confidence = if self.zone == StochasticZone::Oversold {
                0.8
            } else {
                0.5
            };
            (Some(Signal::Buy), confidence)
        } else if k_prev >= d_prev && self.k < self.d {
            let confidence = if self.zone == StochasticZone::Overbought {
                0.8
            } else {
                0.5
            };
            (Some(Signal::Sell), confidence)
        } else {
            (None, 0.0)
        }
    }
}

/// Smoothed %K series (before %D) — also consumed by the divergence scanner.
pub fn stochastic_k_series(candles: &[Candle], k_period: usize, smooth: usize) -> Vec<f64> {
    if k_period == 0 || smooth == 0 || candles.len() < k_period + smooth - 1 {
        return Vec::new();
    }

    let highs = highs(candles);
    let lows = lows(candles);
    let closes = closes(candles);

    let mut raw_k = Vec::with_capacity(candles.len() - k_period + 1);
    for i in k_period - 1..candles.len() {
        let window_high = highs[i + 1 - k_period..=i]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        let window_low = lows[i + 1 - k_period..=i]
            .iter()
            .cloned()
            .fold(f64::MAX, f64::min);

        let value = if window_high != window_low {
            (closes[i] - window_low) / (window_high - window_low) * 100.0
        } else {
            50.0 // flat window is neutral
        };
        raw_k.push(value);
    }

    // Smooth raw %K with a rolling SMA.
    let mut smoothed = Vec::with_capacity(raw_k.len().saturating_sub(smooth - 1));
    for i in smooth - 1..raw_k.len() {
        let avg: f64 = raw_k[i + 1 - smooth..=i].iter().sum::<f64>() / smooth as f64;
        smoothed.push(avg);
    }
    smoothed
}

/// Compute the latest stochastic reading.
///
/// Returns `None` with fewer than `k_period + smooth + d - 2` candles.
pub fn calculate_stochastic(
    candles: &[Candle],
    k_period: usize,
    d_period: usize,
    smooth: usize,
) -> Option<StochasticResult> {
    if d_period == 0 {
        return None;
    }

    let k_values = stochastic_k_series(candles, k_period, smooth);
    if k_values.len() < d_period {
        return None;
    }

    let mut d_values = Vec::with_capacity(k_values.len() - d_period + 1);
    for i in d_period - 1..k_values.len() {
        let avg: f64 = k_values[i + 1 - d_period..=i].iter().sum::<f64>() / d_period as f64;
        d_values.push(avg);
    }

    let k = *k_values.last()?;
    let d = *d_values.last()?;

    let zone = if k >= 80.0 {
        StochasticZone::Overbought
    } else if k <= 20.0 {
        StochasticZone::Oversold
    } else {
        StochasticZone::Neutral
    };

    Some(StochasticResult {
        k,
        d,
        k_prev: k_values.len().checked_sub(2).map(|i| k_values[i]),
        d_prev: d_values.len().checked_sub(2).map(|i| d_values[i]),
        zone,
    })
}

/// Convenience wrapper with the standard 14/3/3 parameters.
pub fn calculate(candles: &[Candle]) -> Option<StochasticResult> {
    calculate_stochastic(candles, 14, 3, 3)
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

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            interval_minutes: 15,
            open: Decimal::from_f64(close).unwrap(),
            high: Decimal::from_f64(high).unwrap(),
            low: Decimal::from_f64(low).unwrap(),
            close: Decimal::from_f64(close).unwrap(),
            tick_count: 50,
        }
    }

    #[test]
    fn stochastic_insufficient_data() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(10.0 + i as f64, i as f64, 5.0 + i as f64)).collect();
        assert!(calculate(&candles).is_none());
    }

    #[test]
    fn close_at_window_high_is_100() {
        // Monotonic rise closing at each candle's high.
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base - 1.0, base)
            })
            .collect();
        let result = calculate(&candles).unwrap();
        assert!(result.k > 95.0);
        assert_eq!(result.zone, StochasticZone::Overbought);
    }

    #[test]
    fn close_at_window_low_is_oversold() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 - i as f64;
                candle(base + 1.0, base, base)
            })
            .collect();
        let result = calculate(&candles).unwrap();
        assert!(result.k < 5.0);
        assert_eq!(result.zone, StochasticZone::Oversold);
    }

    #[test]
    fn flat_window_is_neutral_50() {
        let candles: Vec<Candle> = (0..30).map(|_| candle(100.0, 100.0, 100.0)).collect();
        let result = calculate(&candles).unwrap();
        assert!((result.k - 50.0).abs() < 1e-10);
        assert_eq!(result.zone, StochasticZone::Neutral);
    }

    #[test]
    fn crossover_signal_in_oversold_zone() {
        let result = StochasticResult {
            k: 15.0,
            d: 12.0,
            k_prev: Some(10.0),
            d_prev: Some(11.0),
            zone: StochasticZone::Oversold,
        };
        let (signal, confidence) = result.crossover_signal();
        assert_eq!(signal, Some(Signal::Buy));
        assert!((confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn no_crossover_without_history() {
        let result = StochasticResult {
            k: 55.0,
            d: 50.0,
            k_prev: None,
            d_prev: None,
            zone: StochasticZone::Neutral,
        };
        assert_eq!(result.crossover_signal(), (None, 0.0));
    }
}
