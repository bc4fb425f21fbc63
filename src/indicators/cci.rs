// =============================================================================
// Commodity Channel Index (CCI)
// =============================================================================
//
// typical price = (high + low + close) / 3
// CCI = (TP - SMA(TP, period)) / (0.015 * mean_deviation)
//
// Readings beyond +/-100 mark overbought / oversold extremes.
// =============================================================================

use crate::indicators::{closes, highs, lows};
use crate::market_data::Candle;

/// CCI series, one value per candle starting at index `period - 1`.
pub fn cci_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    let highs = highs(candles);
    let lows = lows(candles);
    let closes = closes(candles);

    let typical: Vec<f64> = (0..candles.len())
        .map(|i| (highs[i] + lows[i] + closes[i]) / 3.0)
        .collect();

    let mut result = Vec::with_capacity(candles.len() - period + 1);
    for i in period - 1..typical.len() {
        let window = &typical[i + 1 - period..=i];
        let sma: f64 = window.iter().sum::<f64>() / period as f64;
        let mean_dev: f64 =
            window.iter().map(|tp| (tp - sma).abs()).sum::<f64>() / period as f64;

        let cci = if mean_dev > 0.0 {
            (typical[i] - sma) / (0.015 * mean_dev)
        } else {
            0.0
        };
        result.push(cci);
    }
    result
}

/// Most recent CCI value.
pub fn calculate_cci(candles: &[Candle], period: usize) -> Option<f64> {
    cci_series(candles, period).last().copied().filter(|v| v.is_finite())
}
