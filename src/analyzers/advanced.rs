// =============================================================================
// Advanced Indicator Block — CCI + MFI fusion
// =============================================================================
//
// A second oscillator opinion alongside the gram analyzer, fed to the
// combiner at its own weight and to the dip detector (which wants the raw
// RSI value):
//
//   CCI  < -100 buy vote, > +100 sell vote
//   MFI  <   20 buy vote, >   80 sell vote
//
// Both agreeing is a strong reading (0.8), one alone is moderate (0.5).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::AnalysisOutcome;
use crate::indicators::cci::calculate_cci;
use crate::indicators::closes;
use crate::indicators::mfi::calculate_mfi;
use crate::indicators::rsi::calculate_rsi;
use crate::market_data::Candle;
use crate::types::Signal;

/// Minimum candles for the CCI-20 / MFI-14 / RSI-14 stack.
const MIN_CANDLES: usize = 21;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedAnalysis {
    pub cci: Option<f64>,
    pub mfi: Option<f64>,
    pub rsi: Option<f64>,
    pub combined_signal: Signal,
    pub combined_confidence: f64,
}

#[derive(Default)]
pub struct AdvancedAnalyzer;

impl AdvancedAnalyzer {
    pub fn analyze(&self, candles: &[Candle]) -> AnalysisOutcome<AdvancedAnalysis> {
        if candles.len() < MIN_CANDLES {
            return AnalysisOutcome::Insufficient;
        }

        let cci = calculate_cci(candles, 20);
        let mfi = calculate_mfi(candles, 14);
        let prices = closes(candles);
        let rsi = calculate_rsi(&prices, 14).last().copied();

        let mut buy_votes = 0u32;
        let mut sell_votes = 0u32;

        if let Some(cci) = cci {
            if cci < -100.0 {
                buy_votes += 1;
            } else if cci > 100.0 {
                sell_votes += 1;
            }
        }

        if let Some(mfi) = mfi {
            if mfi < 20.0 {
                buy_votes += 1;
            } else if mfi > 80.0 {
                sell_votes += 1;
            }
        }

        let (combined_signal, combined_confidence) = if buy_votes > sell_votes {
            (Signal::Buy, if buy_votes >= 2 { 0.8 } else { 0.5 })
        } else if sell_votes > buy_votes {
            (Signal::Sell, if sell_votes >= 2 { 0.8 } else { 0.5 })
        } else {
            (Signal::Hold, 0.0)
        };

        AnalysisOutcome::Ready(AdvancedAnalysis {
            cci,
            mfi,
            rsi,
            combined_signal,
            combined_confidence,
        })
    }
}
