// =============================================================================
// Global Trend Analyzer — ounce/USD direction, momentum and volatility
// =============================================================================
//
// The ounce/USD series sets the global context for the gram signal:
//
//   trend     BULLISH when price > MA50 > MA200, BEARISH mirrored; with a
//             short history, the 20-sample % change at +/-2% decides
//   momentum  average of 10- and 20-period ROC, banded at +/-2 and +/-5
//   vol       stdev of 20 one-step returns, banded at 1.5% / 3%
//   levels    max/min of the last 50 plus the classic pivot
//   signal    RSI/MACD/Bollinger/Stochastic votes fused into a five-band
//             STRONG_BUY..STRONG_SELL with confidence = matching / total
// =============================================================================

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisOutcome;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::macd::{self, MacdTrend};
use crate::indicators::rsi::calculate_rsi;
use crate::types::{TrendDirection, TrendStrength};

/// Minimum ounce/USD samples before a trend analysis is attempted.
const MIN_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumSignal {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityBand {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

/// Fused five-band verdict of the ounce/USD indicator stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorVerdict {
    #[serde(rename = "STRONG_BUY")]
    StrongBuy,
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "NEUTRAL")]
    Neutral,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "STRONG_SELL")]
    StrongSell,
}

impl IndicatorVerdict {
    pub fn is_buy(self) -> bool {
        matches!(self, Self::StrongBuy | Self::Buy)
    }

    pub fn is_sell(self) -> bool {
        matches!(self, Self::StrongSell | Self::Sell)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Momentum {
    pub roc_10: Option<f64>,
    pub roc_20: Option<f64>,
    pub signal: MomentumSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volatility {
    /// Stdev of one-step returns over the last 20 steps, in percent.
    pub daily: f64,
    pub annualized: f64,
    pub level: VolatilityBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLevels {
    pub resistance: Decimal,
    pub support: Decimal,
    pub pivot: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSignal {
    pub verdict: IndicatorVerdict,
    pub confidence: f64,
    pub buy_count: u32,
    pub sell_count: u32,
    pub neutral_count: u32,
}

/// Full ounce/USD context analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTrendAnalysis {
    pub ons_usd_price: Decimal,
    pub trend_direction: TrendDirection,
    pub trend_strength: TrendStrength,
    pub ma20: Option<f64>,
    pub ma50: Option<f64>,
    pub ma200: Option<f64>,
    pub momentum: Momentum,
    pub volatility: Volatility,
    pub key_levels: Option<KeyLevels>,
    pub indicator_signal: IndicatorSignal,
}

/// Stateless ounce/USD analyzer.
#[derive(Default)]
pub struct GlobalTrendAnalyzer;

impl GlobalTrendAnalyzer {
    pub fn analyze(&self, ons_prices: &[f64]) -> AnalysisOutcome<GlobalTrendAnalysis> {
        if ons_prices.len() < MIN_SAMPLES {
            return AnalysisOutcome::Insufficient;
        }

        let current = ons_prices[ons_prices.len() - 1];
        if current <= 0.0 {
            return AnalysisOutcome::Insufficient;
        }

        let ma = |period: usize| -> Option<f64> {
            (ons_prices.len() >= period).then(|| {
                ons_prices[ons_prices.len() - period..].iter().sum::<f64>() / period as f64
            })
        };
        let ma20 = ma(20);
        let ma50 = ma(50);
        let ma200 = ma(200);

        let trend_direction = determine_direction(current, ma50, ma200, ons_prices);
        let trend_strength = determine_strength(ons_prices, ma50);
        let momentum = calculate_momentum(ons_prices);
        let volatility = calculate_volatility(ons_prices);
        let key_levels = find_key_levels(ons_prices);
        let indicator_signal = indicator_votes(ons_prices);

        debug!(
            direction = %trend_direction,
            strength = %trend_strength,
            verdict = ?indicator_signal.verdict,
            price = current,
            "global trend analysis complete"
        );

        AnalysisOutcome::Ready(GlobalTrendAnalysis {
            ons_usd_price: Decimal::from_f64(current).unwrap_or_default().round_dp(4),
            trend_direction,
            trend_strength,
            ma20,
            ma50,
            ma200,
            momentum,
            volatility,
            key_levels,
            indicator_signal,
        })
    }
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

fn determine_direction(
    current: f64,
    ma50: Option<f64>,
    ma200: Option<f64>,
    prices: &[f64],
) -> TrendDirection {
    match (ma50, ma200) {
        (Some(ma50), Some(ma200)) => {
            if current > ma50 && ma50 > ma200 {
                TrendDirection::Bullish
            } else if current < ma50 && ma50 < ma200 {
                TrendDirection::Bearish
            } else {
                TrendDirection::Neutral
            }
        }
        (Some(ma50), None) => {
            if current > ma50 {
                TrendDirection::Bullish
            } else {
                TrendDirection::Bearish
            }
        }
        _ => {
            // Short history: the 20-sample % change decides at +/-2%.
            let base = prices[prices.len() - 20];
            if base <= 0.0 {
                return TrendDirection::Neutral;
            }
            let recent = (current - base) / base * 100.0;
            if recent > 2.0 {
                TrendDirection::Bullish
            } else if recent < -2.0 {
                TrendDirection::Bearish
            } else {
                TrendDirection::Neutral
            }
        }
    }
}

fn determine_strength(prices: &[f64], ma50: Option<f64>) -> TrendStrength {
    let current = prices[prices.len() - 1];

    let change_20d = if prices.len() >= 20 {
        let base = prices[prices.len() - 20];
        if base != 0.0 {
            (current - base) / base * 100.0
        } else {
            0.0
        }
    } else {
        0.0
    };

    let distance_from_ma = ma50
        .filter(|&ma| ma != 0.0)
        .map(|ma| ((current - ma) / ma * 100.0).abs())
        .unwrap_or(0.0);

    if change_20d.abs() > 5.0 && distance_from_ma > 3.0 {
        TrendStrength::Strong
    } else if change_20d.abs() > 2.0 || distance_from_ma > 1.5 {
        TrendStrength::Moderate
    } else {
        TrendStrength::Weak
    }
}

// ---------------------------------------------------------------------------
// Momentum & volatility
// ---------------------------------------------------------------------------

fn roc(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }
    let base = prices[prices.len() - period];
    (base != 0.0).then(|| (prices[prices.len() - 1] - base) / base * 100.0)
}

fn calculate_momentum(prices: &[f64]) -> Momentum {
    let roc_10 = roc(prices, 10);
    let roc_20 = roc(prices, 20);

    let values: Vec<f64> = [roc_10, roc_20].iter().filter_map(|v| *v).collect();
    let signal = if values.is_empty() {
        MomentumSignal::Neutral
    } else {
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        if avg > 5.0 {
            MomentumSignal::StrongBullish
        } else if avg > 2.0 {
            MomentumSignal::Bullish
        } else if avg < -5.0 {
            MomentumSignal::StrongBearish
        } else if avg < -2.0 {
            MomentumSignal::Bearish
        } else {
            MomentumSignal::Neutral
        }
    };

    Momentum {
        roc_10,
        roc_20,
        signal,
    }
}

fn calculate_volatility(prices: &[f64]) -> Volatility {
    if prices.len() < 21 {
        return Volatility {
            daily: 0.0,
            annualized: 0.0,
            level: VolatilityBand::Low,
        };
    }

    let recent = &prices[prices.len() - 21..];
    let returns: Vec<f64> = recent
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    let mean = returns.iter().sum::<f64>() / returns.len().max(1) as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / returns.len().max(1) as f64;
    let daily = variance.sqrt() * 100.0;

    let level = if daily > 3.0 {
        VolatilityBand::High
    } else if daily > 1.5 {
        VolatilityBand::Medium
    } else {
        VolatilityBand::Low
    };

    Volatility {
        daily,
        annualized: daily * (252.0_f64).sqrt(),
        level,
    }
}

fn find_key_levels(prices: &[f64]) -> Option<KeyLevels> {
    if prices.len() < 50 {
        return None;
    }

    let recent = &prices[prices.len() - 50..];
    let max = recent.iter().cloned().fold(f64::MIN, f64::max);
    let min = recent.iter().cloned().fold(f64::MAX, f64::min);
    let last = recent[recent.len() - 1];

    let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default().round_dp(4);

    Some(KeyLevels {
        resistance: dec(max),
        support: dec(min),
        pivot: dec((max + min + last) / 3.0),
    })
}

// ---------------------------------------------------------------------------
// Indicator vote fusion
// ---------------------------------------------------------------------------

fn indicator_votes(prices: &[f64]) -> IndicatorSignal {
    let mut buy = 0u32;
    let mut sell = 0u32;
    let mut neutral = 0u32;

    // RSI at the standard 30/70 thresholds.
    match calculate_rsi(prices, 14).last() {
        Some(&rsi) if rsi < 30.0 => buy += 1,
        Some(&rsi) if rsi > 70.0 => sell += 1,
        _ => neutral += 1,
    }

    // MACD histogram trend.
    match macd::calculate(prices).map(|m| m.trend) {
        Some(MacdTrend::Bullish | MacdTrend::StrongBullish) => buy += 1,
        Some(MacdTrend::Bearish | MacdTrend::StrongBearish) => sell += 1,
        _ => neutral += 1,
    }

    // Bollinger %B extremes.
    match calculate_bollinger(prices, 20, 2.0).map(|b| b.percent_b) {
        Some(pb) if pb <= 0.05 => buy += 1,
        Some(pb) if pb >= 0.95 => sell += 1,
        _ => neutral += 1,
    }

    // Stochastic over pseudo highs/lows (rolling 5-window extremes).
    match pseudo_stochastic_k(prices) {
        Some(k) if k <= 20.0 => buy += 1,
        Some(k) if k >= 80.0 => sell += 1,
        _ => neutral += 1,
    }

    let total = buy + sell + neutral;
    let (verdict, confidence) = if total == 0 {
        (IndicatorVerdict::Neutral, 0.0)
    } else if buy >= 3 {
        (IndicatorVerdict::StrongBuy, buy as f64 / total as f64)
    } else if buy >= 2 {
        (IndicatorVerdict::Buy, buy as f64 / total as f64)
    } else if sell >= 3 {
        (IndicatorVerdict::StrongSell, sell as f64 / total as f64)
    } else if sell >= 2 {
        (IndicatorVerdict::Sell, sell as f64 / total as f64)
    } else {
        (IndicatorVerdict::Neutral, 0.5)
    };

    IndicatorSignal {
        verdict,
        confidence,
        buy_count: buy,
        sell_count: sell,
        neutral_count: neutral,
    }
}

/// Smoothed stochastic %K over a price-only series, using rolling 5-window
/// extremes as pseudo highs/lows.
fn pseudo_stochastic_k(prices: &[f64]) -> Option<f64> {
    const K_PERIOD: usize = 14;
    const SMOOTH: usize = 3;

    if prices.len() < K_PERIOD + SMOOTH {
        return None;
    }

    let window_extreme = |i: usize| -> (f64, f64) {
        let start = i.saturating_sub(5);
        let slice = &prices[start..=i];
        (
            slice.iter().cloned().fold(f64::MIN, f64::max),
            slice.iter().cloned().fold(f64::MAX, f64::min),
        )
    };

    let mut raw = Vec::new();
    for i in K_PERIOD - 1..prices.len() {
        let mut high = f64::MIN;
        let mut low = f64::MAX;
        for j in i + 1 - K_PERIOD..=i {
            let (h, l) = window_extreme(j);
            high = high.max(h);
            low = low.min(l);
        }
        let k = if high != low {
            (prices[i] - low) / (high - low) * 100.0
        } else {
            50.0
        };
        raw.push(k);
    }

    if raw.len() < SMOOTH {
        return None;
    }
    Some(raw[raw.len() - SMOOTH..].iter().sum::<f64>() / SMOOTH as f64)
}
