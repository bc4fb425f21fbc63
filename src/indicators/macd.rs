// =============================================================================
// MACD (Moving Average Convergence Divergence)
// =============================================================================
//
// macd_line   = EMA(fast) - EMA(slow)
// signal_line = EMA(macd_line, signal_period)
// histogram   = macd_line - signal_line
//
// Crossover is defined on the last two histogram values crossing zero.
// Divergence compares the last two swing highs/lows of price against the
// MACD line over a window of at most 50 points.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::ema::calculate_ema;
use crate::types::Signal;

/// Zero-line crossover of the histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crossover {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "NONE")]
    None,
}

/// Price/oscillator divergence direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Divergence {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "NONE")]
    None,
}

/// Five-band trend classification of the histogram tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacdTrend {
    #[serde(rename = "STRONG_BULLISH")]
    StrongBullish,
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "NEUTRAL")]
    Neutral,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "STRONG_BEARISH")]
    StrongBearish,
}

/// Full MACD reading for the latest close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacdResult {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
    pub histogram_prev: Option<f64>,
    pub crossover: Crossover,
    pub divergence: Divergence,
    pub trend: MacdTrend,
    /// Histogram magnitude normalised against its recent average, in [0,1].
    pub strength: f64,
}

impl MacdResult {
    /// Directional signal plus confidence, for the gram analyzer's weighted
    /// scoring. Crossovers dominate; divergences either confirm (+0.2) or
    /// stand alone (0.6); a strong trend alone is a weak signal.
    pub fn signal(&self) -> (Option<Signal>, f64) {
        let mut signal = None;
        let mut confidence: f64 = 0.0;

        match self.crossover {
            Crossover::Bullish => {
                signal = Some(Signal::Buy);
                confidence = 0.8;
            }
            Crossover::Bearish => {
                signal = Some(Signal::Sell);
                confidence = 0.8;
            }
            Crossover::None => {}
        }

        match self.divergence {
            Divergence::Bullish => {
                if signal == Some(Signal::Buy) {
                    confidence = (confidence + 0.2).min(1.0);
                } else {
                    signal = Some(Signal::Buy);
                    confidence = 0.6;
                }
            }
            Divergence::Bearish => {
                if signal == Some(Signal::Sell) {
                    confidence = (confidence + 0.2).min(1.0);
                } else {
                    signal = Some(Signal::Sell);
                    confidence = 0.6;
                }
            }
            Divergence::None => {}
        }

        if signal.is_none() {
            match self.trend {
                MacdTrend::StrongBullish => {
                    signal = Some(Signal::Buy);
                    confidence = 0.5 * self.strength;
                }
                MacdTrend::StrongBearish => {
                    signal = Some(Signal::Sell);
                    confidence = 0.5 * self.strength;
                }
                _ => {}
            }
        }

        (signal, confidence)
    }
}

/// Compute the MACD reading for the latest close.
///
/// Returns `None` when fewer than `slow + signal` closes are available or an
/// intermediate value is non-finite.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow <= fast || signal_period == 0 {
        return None;
    }
    if closes.len() < slow + signal_period {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);
    if ema_slow.is_empty() {
        return None;
    }

    // Align the two EMA series on the slow start index.
    let offset = slow - fast;
    let macd_line: Vec<f64> = ema_slow
        .iter()
        .enumerate()
        .map(|(i, &slow_v)| ema_fast[offset + i] - slow_v)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);
    if signal_line.is_empty() {
        return None;
    }

    let hist_offset = macd_line.len() - signal_line.len();
    let histogram: Vec<f64> = signal_line
        .iter()
        .enumerate()
        .map(|(i, &sig)| macd_line[hist_offset + i] - sig)
        .collect();

    let last_macd = *macd_line.last()?;
    let last_signal = *signal_line.last()?;
    let last_hist = *histogram.last()?;
    if !last_macd.is_finite() || !last_signal.is_finite() || !last_hist.is_finite() {
        return None;
    }

    let window = macd_line.len().min(closes.len()).min(50);

    Some(MacdResult {
        macd_line: last_macd,
        signal_line: last_signal,
        histogram: last_hist,
        histogram_prev: histogram.len().checked_sub(2).map(|i| histogram[i]),
        crossover: detect_crossover(&histogram),
        divergence: detect_divergence(
            &closes[closes.len() - window..],
            &macd_line[macd_line.len() - window..],
        ),
        trend: determine_trend(&histogram),
        strength: calculate_strength(&histogram),
    })
}

/// Convenience wrapper with the standard 12/26/9 parameters.
pub fn calculate(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd(closes, 12, 26, 9)
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Zero-line crossing of the last two histogram values.
fn detect_crossover(histogram: &[f64]) -> Crossover {
    if histogram.len() < 2 {
        return Crossover::None;
    }
    let current = histogram[histogram.len() - 1];
    let previous = histogram[histogram.len() - 2];

    if current > 0.0 && previous <= 0.0 {
        Crossover::Bullish
    } else if current < 0.0 && previous >= 0.0 {
        Crossover::Bearish
    } else {
        Crossover::None
    }
}

/// Compare the last two interior extremes of price and MACD.
///
/// Bullish: price makes a lower low while MACD makes a higher low.
/// Bearish: price makes a higher high while MACD makes a lower high.
fn detect_divergence(prices: &[f64], macd: &[f64]) -> Divergence {
    if prices.len() < 20 || macd.len() < 20 {
        return Divergence::None;
    }

    let price_lows = interior_extremes(prices, false);
    let macd_lows = interior_extremes(macd, false);
    if price_lows.len() >= 2 && macd_lows.len() >= 2 {
        let p = &price_lows[price_lows.len() - 2..];
        let m = &macd_lows[macd_lows.len() - 2..];
        if p[1] < p[0] && m[1] > m[0] {
            return Divergence::Bullish;
        }
    }

    let price_highs = interior_extremes(prices, true);
    let macd_highs = interior_extremes(macd, true);
    if price_highs.len() >= 2 && macd_highs.len() >= 2 {
        let p = &price_highs[price_highs.len() - 2..];
        let m = &macd_highs[macd_highs.len() - 2..];
        if p[1] > p[0] && m[1] < m[0] {
            return Divergence::Bearish;
        }
    }

    Divergence::None
}

/// Values of strict one-neighbour extremes (peaks when `highs`, troughs
/// otherwise), in order of appearance.
fn interior_extremes(values: &[f64], highs: bool) -> Vec<f64> {
    let mut result = Vec::new();
    for i in 1..values.len().saturating_sub(1) {
        let is_extreme = if highs {
            values[i] > values[i - 1] && values[i] > values[i + 1]
        } else {
            values[i] < values[i - 1] && values[i] < values[i + 1]
        };
        if is_extreme {
            result.push(values[i]);
        }
    }
    result
}

fn determine_trend(histogram: &[f64]) -> MacdTrend {
    if histogram.len() < 5 {
        return MacdTrend::Neutral;
    }

    let recent = &histogram[histogram.len() - 5..];
    let last = recent[4];

    if recent.iter().all(|&h| h > 0.0) && last > recent[0] {
        MacdTrend::StrongBullish
    } else if last > 0.0 {
        MacdTrend::Bullish
    } else if recent.iter().all(|&h| h < 0.0) && last < recent[0] {
        MacdTrend::StrongBearish
    } else if last < 0.0 {
        MacdTrend::Bearish
    } else {
        MacdTrend::Neutral
    }
}

/// Histogram magnitude normalised against twice its 20-sample average.
fn calculate_strength(histogram: &[f64]) -> f64 {
    let last = match histogram.last() {
        Some(&h) => h.abs(),
        None => return 0.0,
    };

    let start = histogram.len().saturating_sub(20);
    let recent = &histogram[start..];
    let avg: f64 = recent.iter().map(|h| h.abs()).sum::<f64>() / recent.len() as f64;

    if avg == 0.0 {
        return 0.0;
    }
    (last / (avg * 2.0)).min(1.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        // Needs slow + signal = 35 closes.
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_degenerate_parameters() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
        assert!(calculate_macd(&closes, 12, 26, 0).is_none());
    }

    #[test]
    fn macd_uptrend_is_positive() {
        let closes: Vec<f64> = (1..=80).map(|x| x as f64).collect();
        let result = calculate(&closes).unwrap();
        // Fast EMA tracks a rising series more closely than the slow one.
        assert!(result.macd_line > 0.0);
        assert!(result.histogram.is_finite());
        assert!((0.0..=1.0).contains(&result.strength));
    }

    #[test]
    fn crossover_bullish_on_zero_crossing() {
        // The documented boundary: histogram [-1, -0.5, 0.1] => BULLISH.
        assert_eq!(detect_crossover(&[-1.0, -0.5, 0.1]), Crossover::Bullish);
    }

    #[test]
    fn crossover_bearish_on_zero_crossing() {
        assert_eq!(detect_crossover(&[1.0, 0.5, -0.1]), Crossover::Bearish);
    }

    #[test]
    fn crossover_none_without_sign_change() {
        assert_eq!(detect_crossover(&[0.2, 0.3]), Crossover::None);
        assert_eq!(detect_crossover(&[0.3]), Crossover::None);
    }

    #[test]
    fn trend_strong_bullish_for_rising_positive_tail() {
        let hist = [0.1, 0.2, 0.3, 0.4, 0.5];
        assert_eq!(determine_trend(&hist), MacdTrend::StrongBullish);
    }

    #[test]
    fn trend_bearish_for_negative_last() {
        let hist = [0.5, 0.2, -0.1, 0.2, -0.3];
        assert_eq!(determine_trend(&hist), MacdTrend::Bearish);
    }

    #[test]
    fn divergence_bullish_detected() {
        // Price: two troughs, second lower. MACD: two troughs, second higher.
        let prices = [
            10.0, 9.0, 8.0, 9.0, 10.0, 9.5, 9.0, 8.5, 7.5, 8.5, 9.5, 10.0, 9.0, 8.0, 7.0, 8.0,
            9.0, 10.0, 11.0, 12.0, 11.0,
        ];
        let macd = [
            -1.0, -1.5, -2.0, -1.5, -1.0, -1.2, -1.4, -1.6, -1.8, -1.4, -1.0, -0.8, -1.0, -1.2,
            -1.3, -1.1, -0.9, -0.7, -0.5, -0.3, -0.4,
        ];
        assert_eq!(detect_divergence(&prices, &macd), Divergence::Bullish);
    }

    #[test]
    fn signal_prefers_crossover() {
        let result = MacdResult {
            macd_line: 1.0,
            signal_line: 0.5,
            histogram: 0.5,
            histogram_prev: Some(-0.1),
            crossover: Crossover::Bullish,
            divergence: Divergence::None,
            trend: MacdTrend::Bullish,
            strength: 0.5,
        };
        let (signal, confidence) = result.signal();
        assert_eq!(signal, Some(Signal::Buy));
        assert!((confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn signal_divergence_confirms_crossover() {
        let result = MacdResult {
            macd_line: -1.0,
            signal_line: -0.5,
            histogram: -0.5,
            histogram_prev: Some(0.1),
            crossover: Crossover::Bearish,
            divergence: Divergence::Bearish,
            trend: MacdTrend::Bearish,
            strength: 0.5,
        };
        let (signal, confidence) = result.signal();
        assert_eq!(signal, Some(Signal::Sell));
        assert!((confidence - 1.0).abs() < 1e-12);
    }
}
