// =============================================================================
// Currency Risk Analyzer — USD/local volatility band
// =============================================================================
//
// The local-currency leg can move violently regardless of what gold does, so
// positions carry an extra risk haircut when the USD/local rate is unstable.
//
// risk = stdev of one-step USD/local returns over the last 20 steps, in
// percent, banded: < 0.3 LOW, < 0.6 MEDIUM, < 1.2 HIGH, else EXTREME.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::AnalysisOutcome;
use crate::types::RiskLevel;

/// Minimum USD/local samples for a risk read (20 returns need 21 rates).
const MIN_SAMPLES: usize = 21;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRiskAnalysis {
    pub risk_level: RiskLevel,
    /// Return stdev over the window, percent.
    pub volatility: f64,
    /// % change across the whole window.
    pub window_change_pct: f64,
}

#[derive(Default)]
pub struct CurrencyRiskAnalyzer;

impl CurrencyRiskAnalyzer {
    pub fn analyze(&self, usd_local_rates: &[f64]) -> AnalysisOutcome<CurrencyRiskAnalysis> {
        if usd_local_rates.len() < MIN_SAMPLES {
            return AnalysisOutcome::Insufficient;
        }

        let window = &usd_local_rates[usd_local_rates.len() - MIN_SAMPLES..];
        if window.iter().any(|&r| r <= 0.0) {
            return AnalysisOutcome::Insufficient;
        }

        let returns: Vec<f64> = window.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let volatility = variance.sqrt() * 100.0;

        let risk_level = if volatility < 0.3 {
            RiskLevel::Low
        } else if volatility < 0.6 {
            RiskLevel::Medium
        } else if volatility < 1.2 {
            RiskLevel::High
        } else {
            RiskLevel::Extreme
        };

        let window_change_pct = (window[window.len() - 1] - window[0]) / window[0] * 100.0;

        AnalysisOutcome::Ready(CurrencyRiskAnalysis {
            risk_level,
            volatility,
            window_change_pct,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_below_window() {
        let analyzer = CurrencyRiskAnalyzer;
        assert!(analyzer.analyze(&vec![32.5; 20]).is_insufficient());
    }

    #[test]
    fn stable_rate_is_low_risk() {
        let analyzer = CurrencyRiskAnalyzer;
        let analysis = analyzer.analyze(&vec![32.5; 30]).ready().unwrap();
        assert_eq!(analysis.risk_level, RiskLevel::Low);
        assert!(analysis.volatility.abs() < 1e-9);
    }

    #[test]
    fn wild_swings_are_extreme_risk() {
        let analyzer = CurrencyRiskAnalyzer;
        let rates: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 32.0 } else { 33.5 }) // ~4.7% swings
            .collect();
        let analysis = analyzer.analyze(&rates).ready().unwrap();
        assert_eq!(analysis.risk_level, RiskLevel::Extreme);
    }

    #[test]
    fn moderate_drift_is_medium() {
        let analyzer = CurrencyRiskAnalyzer;
        // Alternating ~0.45% steps.
        let rates: Vec<f64> = (0..30)
            .map(|i| 32.0 + if i % 2 == 0 { 0.0 } else { 0.145 })
            .collect();
        let analysis = analyzer.analyze(&rates).ready().unwrap();
        assert_eq!(analysis.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn non_positive_rate_rejected() {
        let analyzer = CurrencyRiskAnalyzer;
        let mut rates = vec![32.5; 30];
        rates[25] = 0.0;
        assert!(analyzer.analyze(&rates).is_insufficient());
    }
}
