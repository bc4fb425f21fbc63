// =============================================================================
// Confluence Manager — cross-timeframe agreement
// =============================================================================
//
// Each timeframe's latest analysis votes on the current signal with the
// hierarchy weights 15m=0.20, 1h=0.30, 4h=0.35, 1d=0.15:
//
//   same signal            1.0
//   HOLD, trend agreeing   0.7
//   HOLD, trend against    0.3
//   opposite signal        0.0
//
// score = sum(vote * confidence * weight) / sum(weight) * 100, boosted by
// 1.2x (capped at 100) when every non-HOLD timeframe agrees. Parent
// confirmation walks one level up: 15m needs 1h, 1h needs 4h, 4h needs 1d.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Signal, Timeframe, TrendDirection};

/// Minimal view of another timeframe's latest analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSignalSummary {
    pub signal: Signal,
    pub confidence: f64,
    pub gram_trend: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceAnalysis {
    /// 0..100.
    pub score: f64,
    pub parent_confirmation: bool,
    pub conflicts: Vec<Timeframe>,
    pub supports: Vec<Timeframe>,
}

#[derive(Default)]
pub struct ConfluenceManager;

impl ConfluenceManager {
    pub fn analyze(
        &self,
        current_tf: Timeframe,
        current_signal: Signal,
        analyses: &HashMap<Timeframe, TimeframeSignalSummary>,
    ) -> ConfluenceAnalysis {
        if analyses.is_empty() {
            return ConfluenceAnalysis {
                score: 50.0,
                parent_confirmation: true,
                conflicts: Vec::new(),
                supports: Vec::new(),
            };
        }

        let parent_confirmation = check_parent(current_tf, current_signal, analyses);

        let mut total_score = 0.0;
        let mut total_weight = 0.0;
        let mut conflicts = Vec::new();
        let mut supports = Vec::new();

        for (&tf, summary) in analyses {
            let weight = tf.confluence_weight();

            let vote = if summary.signal == current_signal {
                supports.push(tf);
                1.0
            } else if summary.signal == Signal::Hold {
                let trend_agrees = matches!(
                    (current_signal, summary.gram_trend),
                    (Signal::Buy, TrendDirection::Bullish)
                        | (Signal::Sell, TrendDirection::Bearish)
                );
                if trend_agrees {
                    0.7
                } else {
                    0.3
                }
            } else {
                conflicts.push(tf);
                0.0
            };

            total_score += vote * summary.confidence * weight;
            total_weight += weight;
        }

        let mut score = if total_weight > 0.0 {
            total_score / total_weight * 100.0
        } else {
            50.0
        };

        // Full-agreement bonus: every directional timeframe matches.
        let all_agree = analyses
            .values()
            .filter(|s| s.signal != Signal::Hold)
            .all(|s| s.signal == current_signal);
        if all_agree {
            score = (score * 1.2).min(100.0);
        }

        conflicts.sort_by_key(|tf| tf.minutes());
        supports.sort_by_key(|tf| tf.minutes());

        ConfluenceAnalysis {
            score: (score * 10.0).round() / 10.0,
            parent_confirmation,
            conflicts,
            supports,
        }
    }
}

fn check_parent(
    current_tf: Timeframe,
    signal: Signal,
    analyses: &HashMap<Timeframe, TimeframeSignalSummary>,
) -> bool {
    let parent_tf = match current_tf.parent() {
        Some(tf) => tf,
        None => return true,
    };

    let parent = match analyses.get(&parent_tf) {
        Some(summary) => summary,
        None => return true, // no parent data counts as confirmed
    };

    if signal == parent.signal {
        return true;
    }

    if parent.signal == Signal::Hold {
        return matches!(
            (signal, parent.gram_trend),
            (Signal::Buy, TrendDirection::Bullish | TrendDirection::Neutral)
                | (Signal::Sell, TrendDirection::Bearish | TrendDirection::Neutral)
        );
    }

    false
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn summary(signal: Signal, confidence: f64, trend: TrendDirection) -> TimeframeSignalSummary {
        TimeframeSignalSummary {
            signal,
            confidence,
            gram_trend: trend,
        }
    }

    #[test]
    fn empty_map_is_neutral_midpoint() {
        let manager = ConfluenceManager;
        let analysis = manager.analyze(Timeframe::M15, Signal::Buy, &HashMap::new());
        assert!((analysis.score - 50.0).abs() < 1e-9);
        assert!(analysis.parent_confirmation);
    }

    #[test]
    fn full_agreement_hits_cap() {
        let manager = ConfluenceManager;
        let mut analyses = HashMap::new();
        for tf in Timeframe::ALL {
            analyses.insert(tf, summary(Signal::Buy, 1.0, TrendDirection::Bullish));
        }
        let analysis = manager.analyze(Timeframe::M15, Signal::Buy, &analyses);
        assert!((analysis.score - 100.0).abs() < 1e-9);
        assert!(analysis.parent_confirmation);
        assert_eq!(analysis.supports.len(), 4);
        assert!(analysis.conflicts.is_empty());
    }

    #[test]
    fn opposite_parent_blocks_confirmation() {
        let manager = ConfluenceManager;
        let mut analyses = HashMap::new();
        analyses.insert(Timeframe::H1, summary(Signal::Sell, 0.9, TrendDirection::Bearish));
        let analysis = manager.analyze(Timeframe::M15, Signal::Buy, &analyses);
        assert!(!analysis.parent_confirmation);
        assert_eq!(analysis.conflicts, vec![Timeframe::H1]);
    }

    #[test]
    fn hold_parent_with_agreeing_trend_confirms() {
        let manager = ConfluenceManager;
        let mut analyses = HashMap::new();
        analyses.insert(Timeframe::H4, summary(Signal::Hold, 0.5, TrendDirection::Bullish));
        let analysis = manager.analyze(Timeframe::H1, Signal::Buy, &analyses);
        assert!(analysis.parent_confirmation);
    }

    #[test]
    fn daily_has_no_parent() {
        let manager = ConfluenceManager;
        let mut analyses = HashMap::new();
        analyses.insert(Timeframe::M15, summary(Signal::Sell, 0.9, TrendDirection::Bearish));
        let analysis = manager.analyze(Timeframe::D1, Signal::Buy, &analyses);
        assert!(analysis.parent_confirmation);
    }

    #[test]
    fn weighted_score_formula() {
        let manager = ConfluenceManager;
        let mut analyses = HashMap::new();
        // One agreeing 1h at 0.8 confidence, one conflicting 4h.
        analyses.insert(Timeframe::H1, summary(Signal::Buy, 0.8, TrendDirection::Bullish));
        analyses.insert(Timeframe::H4, summary(Signal::Sell, 0.9, TrendDirection::Bearish));
        let analysis = manager.analyze(Timeframe::M15, Signal::Buy, &analyses);
        // (1.0*0.8*0.3 + 0.0) / (0.3 + 0.35) * 100 = 36.9
        assert!((analysis.score - 36.9).abs() < 0.05, "score {}", analysis.score);
        assert_eq!(analysis.conflicts, vec![Timeframe::H4]);
    }
}
