// =============================================================================
// Shared types used across the Aurum analysis engine
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Grams per troy ounce — the conversion between ounce and gram gold prices.
pub const GRAMS_PER_TROY_OUNCE: Decimal = dec!(31.1035);

/// Directional trading decision produced by the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "HOLD")]
    Hold,
}

impl Signal {
    /// The signal that would close a position opened on `self`.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Hold => Self::Hold,
        }
    }

    pub fn is_directional(self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::Hold
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// How convincing a directional signal is, derived from its confidence and
/// the prevailing currency risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStrength {
    #[serde(rename = "STRONG")]
    Strong,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "WEAK")]
    Weak,
}

impl SignalStrength {
    /// One band weaker (STRONG -> MODERATE -> WEAK -> WEAK).
    pub fn demoted(self) -> Self {
        match self {
            Self::Strong => Self::Moderate,
            Self::Moderate | Self::Weak => Self::Weak,
        }
    }
}

impl std::fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "STRONG"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::Weak => write!(f, "WEAK"),
        }
    }
}

/// Market direction over the analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

impl Default for TrendDirection {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// How pronounced a trend is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendStrength {
    #[serde(rename = "STRONG")]
    Strong,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "WEAK")]
    Weak,
}

impl Default for TrendStrength {
    fn default() -> Self {
        Self::Weak
    }
}

impl std::fmt::Display for TrendStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "STRONG"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::Weak => write!(f, "WEAK"),
        }
    }
}

/// Currency-risk band derived from USD/local volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "EXTREME")]
    Extreme,
}

impl RiskLevel {
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::High | Self::Extreme)
    }

    /// Position-size multiplier applied by the combiner's sizing suggestion.
    pub fn size_multiplier(self) -> f64 {
        match self {
            Self::Low => 1.2,
            Self::Medium => 1.0,
            Self::High => 0.7,
            Self::Extreme => 0.5,
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// The four candle intervals over which analyses are scheduled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All timeframes, shortest first. Iteration order matters for the
    /// orchestrator's scheduling and for confluence hierarchy lookups.
    pub const ALL: [Timeframe; 4] = [Self::M15, Self::H1, Self::H4, Self::D1];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            "4h" => Some(Self::H4),
            "1d" => Some(Self::D1),
            _ => None,
        }
    }

    /// Candle width and analysis cadence in minutes.
    pub fn minutes(self) -> u32 {
        match self {
            Self::M15 => 15,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1440,
        }
    }

    /// Default number of candles the hybrid pipeline wants for this
    /// timeframe. The orchestrator accepts >= 60% of this.
    pub fn default_required_candles(self) -> usize {
        match self {
            Self::M15 => 35,
            Self::H1 => 26,
            Self::H4 => 20,
            Self::D1 => 20,
        }
    }

    /// Default maximum holding period for a simulated position, in hours.
    pub fn default_time_limit_hours(self) -> u32 {
        match self {
            Self::M15 => 4,
            Self::H1 => 24,
            Self::H4 => 72,
            Self::D1 => 168,
        }
    }

    /// Default minimum combiner confidence for a directional signal.
    pub fn default_min_confidence(self) -> f64 {
        match self {
            Self::M15 => 0.80,
            Self::H1 => 0.75,
            Self::H4 => 0.70,
            Self::D1 => 0.65,
        }
    }

    /// The next timeframe up in the confluence hierarchy (15m -> 1h -> 4h
    /// -> 1d). The daily timeframe has no parent.
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::M15 => Some(Self::H1),
            Self::H1 => Some(Self::H4),
            Self::H4 => Some(Self::D1),
            Self::D1 => None,
        }
    }

    /// Hierarchy weight used by the confluence score.
    pub fn confluence_weight(self) -> f64 {
        match self {
            Self::M15 => 0.20,
            Self::H1 => 0.30,
            Self::H4 => 0.35,
            Self::D1 => 0.15,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
