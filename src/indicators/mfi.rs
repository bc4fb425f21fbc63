// =============================================================================
// Money Flow Index (MFI)
// =============================================================================
//
// typical price = (high + low + close) / 3
// raw flow      = typical price * volume
// MFI           = 100 - 100 / (1 + positive_flow / negative_flow)
//
// Ticks carry no traded volume, so the candle tick count stands in as the
// volume proxy. The proxy preserves the oscillator's divergence behaviour,
// which is what the divergence scanner consumes it for.
// =============================================================================

use crate::indicators::{closes, highs, lows, volumes};
use crate::market_data::Candle;

/// MFI series, one value per candle starting at index `period`.
pub fn mfi_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let highs = highs(candles);
    let lows = lows(candles);
    let closes = closes(candles);
    let volumes = volumes(candles);

    let typical: Vec<f64> = (0..candles.len())
        .map(|i| (highs[i] + lows[i] + closes[i]) / 3.0)
        .collect();

    // Signed raw money flow per candle (index 1..).
    let mut flows = Vec::with_capacity(candles.len() - 1);
    for i in 1..typical.len() {
        let raw = typical[i] * volumes[i];
        if typical[i] > typical[i - 1] {
            flows.push(raw);
        } else if typical[i] < typical[i - 1] {
            flows.push(-raw);
        } else {
            flows.push(0.0);
        }
    }

    let mut result = Vec::with_capacity(flows.len() - period + 1);
    for i in period - 1..flows.len() {
        let window = &flows[i + 1 - period..=i];
        let positive: f64 = window.iter().filter(|&&f| f > 0.0).sum();
        let negative: f64 = window.iter().filter(|&&f| f < 0.0).map(|f| f.abs()).sum();

        let mfi = if negative == 0.0 && positive == 0.0 {
            50.0
        } else if negative == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + positive / negative)
        };
        result.push(mfi);
    }
    result
}

/// Most recent MFI value in [0, 100].
pub fn calculate_mfi(candles: &[Candle], period: usize) -> Option<f64> {
    mfi_series(candles, period).last().copied().filter(|v| v.is_finite())
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

    fn candle(high: f64, low: f64, close: f64, ticks: u64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            interval_minutes: 15,
            open: Decimal::from_f64(close).unwrap(),
            high: Decimal::from_f64(high).unwrap(),
            low: Decimal::from_f64(low).unwrap(),
            close: Decimal::from_f64(close).unwrap(),
            tick_count: ticks,
        }
    }

    #[test]
    fn mfi_insufficient_data() {
        let candles = vec![candle(101.0, 99.0, 100.0, 10); 10];
        assert!(calculate_mfi(&candles, 14).is_none());
    }

    #[test]
    fn mfi_all_rising_is_100() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base + 1.0, base - 1.0, base, 10)
            })
            .collect();
        let mfi = calculate_mfi(&candles, 14).unwrap();
        assert!((mfi - 100.0).abs() < 1e-10);
    }

    #[test]
    fn mfi_all_falling_is_0() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 100.0 - i as f64;
                candle(base + 1.0, base - 1.0, base, 10)
            })
            .collect();
        let mfi = calculate_mfi(&candles, 14).unwrap();
        assert!(mfi.abs() < 1e-10);
    }

    #[test]
    fn mfi_flat_is_neutral() {
        let candles = vec![candle(100.0, 100.0, 100.0, 10); 20];
        let mfi = calculate_mfi(&candles, 14).unwrap();
        assert!((mfi - 50.0).abs() < 1e-10);
    }

    #[test]
    fn mfi_weights_by_tick_count() {
        // One heavy up-candle against many light down-candles keeps MFI high.
        let mut candles: Vec<Candle> = (0..16)
            .map(|i| {
                let base = 100.0 - i as f64 * 0.1;
                candle(base + 0.5, base - 0.5, base, 1)
            })
            .collect();
        candles.push(candle(110.0, 100.0, 109.0, 1000));
        let mfi = calculate_mfi(&candles, 14).unwrap();
        assert!(mfi > 90.0, "heavy up-flow should dominate, got {mfi}");
    }
}
