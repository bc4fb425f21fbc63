// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Derived readings:
//   atr_percent      = ATR / current close * 100
//   volatility level = banded atr_percent
//   trend            = 10-window vs 20-window ATR averages
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::{closes, highs, lows};
use crate::market_data::Candle;

/// Banded ATR-percent volatility classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    #[serde(rename = "VERY_LOW")]
    VeryLow,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "EXTREME")]
    Extreme,
}

impl VolatilityLevel {
    fn from_percent(pct: f64) -> Self {
        if pct < 0.5 {
            Self::VeryLow
        } else if pct < 1.0 {
            Self::Low
        } else if pct < 2.0 {
            Self::Normal
        } else if pct < 3.0 {
            Self::High
        } else {
            Self::Extreme
        }
    }
}

/// Whether the volatility regime is widening or tightening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtrTrend {
    #[serde(rename = "EXPANDING")]
    Expanding,
    #[serde(rename = "CONTRACTING")]
    Contracting,
    #[serde(rename = "STABLE")]
    Stable,
}

/// Full ATR reading for the latest candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtrResult {
    pub atr: f64,
    pub atr_percent: f64,
    pub volatility: VolatilityLevel,
    pub trend: AtrTrend,
    /// Current ATR relative to its 20-window average (>= 1.5 means
    /// expansion for the momentum analyzer).
    pub expansion_ratio: f64,
}

/// True Range for each consecutive candle pair, oldest first.
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    if candles.len() < 2 {
        return Vec::new();
    }

    let highs = highs(candles);
    let lows = lows(candles);
    let closes = closes(candles);

    let mut tr_values = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        tr_values.push(hl.max(hc).max(lc));
    }
    tr_values
}

/// Full ATR series (one value per candle starting at index `period`).
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let tr_values = true_ranges(candles);
    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut series = Vec::with_capacity(tr_values.len() - period + 1);
    series.push(seed);

    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            break;
        }
        series.push(atr);
    }
    series
}

/// Most recent ATR value.
///
/// Returns `None` when `period` is zero, there are fewer than `period + 1`
/// candles, or an intermediate value is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied()
}

/// Full ATR reading with percent, volatility band, expansion ratio and the
/// 10-vs-20-window regime trend.
pub fn analyze_atr(candles: &[Candle], period: usize) -> Option<AtrResult> {
    let series = atr_series(candles, period);
    let atr = *series.last()?;

    let last_close = closes(candles).last().copied()?;
    if last_close <= 0.0 {
        return None;
    }
    let atr_percent = atr / last_close * 100.0;

    let avg = |window: usize| -> f64 {
        let start = series.len().saturating_sub(window);
        let slice = &series[start..];
        slice.iter().sum::<f64>() / slice.len() as f64
    };

    let avg_10 = avg(10);
    let avg_20 = avg(20);

    let trend = if series.len() < 20 || avg_20 == 0.0 {
        AtrTrend::Stable
    } else {
        let ratio = avg_10 / avg_20;
        if ratio > 1.1 {
            AtrTrend::Expanding
        } else if ratio < 0.9 {
            AtrTrend::Contracting
        } else {
            AtrTrend::Stable
        }
    };

    let expansion_ratio = if avg_20 > 0.0 { atr / avg_20 } else { 1.0 };

    Some(AtrResult {
        atr,
        atr_percent,
        volatility: VolatilityLevel::from_percent(atr_percent),
        trend,
        expansion_ratio,
    })
}
