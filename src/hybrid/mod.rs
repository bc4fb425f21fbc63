// =============================================================================
// Hybrid Strategy Module
// =============================================================================
//
// The layered signal pipeline:
// - five sub-analyzers (divergence, momentum, structure, smart money,
//   confluence) feeding
// - the weighted signal combiner, scheduled per timeframe by
// - the orchestrator, which persists one HybridAnalysisResult per
//   (timeframe, analysis tick).

pub mod combiner;
pub mod confluence;
pub mod divergence;
pub mod momentum;
pub mod orchestrator;
pub mod smart_money;
pub mod structure;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::analyzers::{AdvancedAnalysis, CurrencyRiskAnalysis, GlobalTrendAnalysis, GramAnalysis};
use crate::types::{RiskLevel, Signal, SignalStrength, Timeframe, TrendDirection, TrendStrength};

pub use combiner::{CombinedSignal, DipAnalysis, PositionSizeSuggestion, SignalCombiner};
pub use confluence::{ConfluenceAnalysis, ConfluenceManager, TimeframeSignalSummary};
pub use divergence::{DivergenceAnalysis, DivergenceManager};
pub use momentum::{MomentumAnalysis, MomentumManager};
pub use orchestrator::HybridOrchestrator;
pub use smart_money::{SmartMoneyAnalysis, SmartMoneyManager};
pub use structure::{StructureAnalysis, StructureManager};

/// Oscillator readings handed down from the gram indicator pass so the
/// sub-analyzers do not recompute them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OscillatorSnapshot {
    pub rsi: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub stoch_k: Option<f64>,
    pub bollinger_width: Option<f64>,
    pub atr_expansion_ratio: Option<f64>,
}

impl OscillatorSnapshot {
    pub fn from_gram(gram: &GramAnalysis) -> Self {
        Self {
            rsi: gram.indicators.rsi.map(|r| r.value),
            macd_histogram: gram.indicators.macd.as_ref().map(|m| m.histogram),
            stoch_k: gram.indicators.stochastic.as_ref().map(|s| s.k),
            bollinger_width: gram.indicators.bollinger.as_ref().map(|b| b.width),
            atr_expansion_ratio: gram.indicators.atr.as_ref().map(|a| a.expansion_ratio),
        }
    }
}

/// One complete hybrid analysis for a (timeframe, analysis tick) pair.
/// Written once; consumed by the simulator and the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridAnalysisResult {
    pub timestamp: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub gram_price: Decimal,
    pub signal: Signal,
    pub signal_strength: SignalStrength,
    pub confidence: f64,
    pub position_size: PositionSizeSuggestion,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub risk_reward_ratio: Option<f64>,
    pub global_trend_direction: TrendDirection,
    pub global_trend_strength: TrendStrength,
    pub currency_risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    pub summary: String,
    pub dip: DipAnalysis,
    // Nested detail blobs.
    pub gram: GramAnalysis,
    pub global_trend: GlobalTrendAnalysis,
    pub currency_risk: CurrencyRiskAnalysis,
    pub advanced: AdvancedAnalysis,
    pub confluence: Option<ConfluenceAnalysis>,
}

impl HybridAnalysisResult {
    /// Reverse-signal check used by the simulator's exit gate.
    pub fn reverses(&self, position_is_long: bool) -> bool {
        match self.signal {
            Signal::Sell => position_is_long,
            Signal::Buy => !position_is_long,
            Signal::Hold => false,
        }
    }
}
