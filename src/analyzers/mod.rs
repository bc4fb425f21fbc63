// =============================================================================
// Analyzers Module
// =============================================================================
//
// The three price-context analyzers feeding the signal combiner:
// - gram:          local-currency gram price (the traded series)
// - global_trend:  ounce/USD direction, momentum and volatility
// - currency_risk: USD/local volatility risk band
// - advanced:      CCI + MFI fusion block
//
// All are pure readers of candles/ticks; none holds cross-invocation state.

pub mod advanced;
pub mod currency_risk;
pub mod global_trend;
pub mod gram;

pub use advanced::{AdvancedAnalysis, AdvancedAnalyzer};
pub use currency_risk::{CurrencyRiskAnalysis, CurrencyRiskAnalyzer};
pub use global_trend::{GlobalTrendAnalysis, GlobalTrendAnalyzer};
pub use gram::{GramAnalysis, GramAnalyzer, LevelStrength, SupportResistanceLevel};
