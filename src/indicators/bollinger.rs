// =============================================================================
// Bollinger Bands
// =============================================================================
//
// middle = SMA(period), upper/lower = middle +/- k * sigma (sample stdev).
//
// Derived readings:
//   %B       = (price - lower) / (upper - lower)
//   position = banded %B (below_lower .. above_upper)
//   squeeze  = current band width < 0.7x the mean of the last 20 widths
// =============================================================================

use serde::{Deserialize, Serialize};

/// Where the latest price sits relative to the bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandPosition {
    #[serde(rename = "below_lower")]
    BelowLower,
    #[serde(rename = "near_lower")]
    NearLower,
    #[serde(rename = "middle")]
    Middle,
    #[serde(rename = "near_upper")]
    NearUpper,
    #[serde(rename = "above_upper")]
    AboveUpper,
}

impl BandPosition {
    fn from_percent_b(percent_b: f64) -> Self {
        if percent_b < 0.0 {
            Self::BelowLower
        } else if percent_b < 0.2 {
            Self::NearLower
        } else if percent_b > 1.0 {
            Self::AboveUpper
        } else if percent_b > 0.8 {
            Self::NearUpper
        } else {
            Self::Middle
        }
    }
}

/// Result of a Bollinger Band calculation on the latest close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// (upper - lower) / middle * 100.
    pub width: f64,
    pub percent_b: f64,
    pub position: BandPosition,
    pub squeeze: bool,
}

/// Calculate Bollinger Bands for the given closing prices.
///
/// Returns `None` when:
/// - Fewer than `period` data points or `period < 2` (sample stdev needs it).
/// - Middle band is zero (degenerate input).
/// - Any derived value is non-finite.
pub fn calculate_bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerResult> {
    if period < 2 || closes.len() < period {
        return None;
    }

    let (upper, middle, lower) = bands_at(&closes[closes.len() - period..], k)?;

    let band_width = upper - lower;
    let price = *closes.last()?;
    let percent_b = if band_width > 0.0 {
        (price - lower) / band_width
    } else {
        0.5
    };

    let width = band_width / middle * 100.0;
    if !width.is_finite() || !percent_b.is_finite() {
        return None;
    }

    // Squeeze: compare against the widths of the last 20 rolling windows.
    let mut historical_widths = Vec::new();
    let window_count = (closes.len() - period + 1).min(20);
    for offset in 0..window_count {
        let end = closes.len() - offset;
        if let Some((u, _, l)) = bands_at(&closes[end - period..end], k) {
            historical_widths.push(u - l);
        }
    }
    let squeeze = if historical_widths.len() >= 20 {
        let mean_width: f64 =
            historical_widths.iter().sum::<f64>() / historical_widths.len() as f64;
        mean_width > 0.0 && band_width < 0.7 * mean_width
    } else {
        false
    };

    Some(BollingerResult {
        upper,
        middle,
        lower,
        width,
        percent_b,
        position: BandPosition::from_percent_b(percent_b),
        squeeze,
    })
}

/// Bands over exactly one window. `window.len()` is the period.
fn bands_at(window: &[f64], k: f64) -> Option<(f64, f64, f64)> {
    let n = window.len();
    let middle = window.iter().sum::<f64>() / n as f64;
    if middle == 0.0 || !middle.is_finite() {
        return None;
    }

    // Sample standard deviation.
    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std_dev = variance.sqrt();
    if !std_dev.is_finite() {
        return None;
    }

    Some((middle + k * std_dev, middle, middle - k * std_dev))
}
