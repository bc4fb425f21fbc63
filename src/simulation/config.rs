// =============================================================================
// Simulation Configuration — immutable strategy parameters
// =============================================================================
//
// Capital is denominated in grams of gold; costs (spread, minimum notional)
// in local-currency units. Every strategy starts from the same 1000 g split
// 250 g per timeframe; the high-cost variant raises the cost model and the
// confidence floor instead of changing the capital split.
// =============================================================================

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::Timeframe;

/// Lifecycle of a simulation aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl SimulationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "PAUSED" => Some(Self::Paused),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Entry-filter family a simulation trades with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyType {
    #[serde(rename = "MAIN")]
    Main,
    #[serde(rename = "CONSERVATIVE")]
    Conservative,
    #[serde(rename = "MOMENTUM")]
    Momentum,
    #[serde(rename = "MEAN_REVERSION")]
    MeanReversion,
    #[serde(rename = "HIGH_COST_MAIN")]
    HighCostMain,
}

impl StrategyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "MAIN",
            Self::Conservative => "CONSERVATIVE",
            Self::Momentum => "MOMENTUM",
            Self::MeanReversion => "MEAN_REVERSION",
            Self::HighCostMain => "HIGH_COST_MAIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MAIN" => Some(Self::Main),
            "CONSERVATIVE" => Some(Self::Conservative),
            "MOMENTUM" => Some(Self::Momentum),
            "MEAN_REVERSION" => Some(Self::MeanReversion),
            "HIGH_COST_MAIN" => Some(Self::HighCostMain),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_capital_distribution() -> HashMap<Timeframe, Decimal> {
    Timeframe::ALL
        .iter()
        .map(|&tf| (tf, dec!(250.0)))
        .collect()
}

fn default_time_limits() -> HashMap<Timeframe, u32> {
    Timeframe::ALL
        .iter()
        .map(|&tf| (tf, tf.default_time_limit_hours()))
        .collect()
}

/// Immutable after creation; the engine never mutates a config in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub name: String,
    pub strategy_type: StrategyType,
    /// Grams of gold.
    pub initial_capital: Decimal,
    pub min_confidence: f64,
    /// Max fraction of the pool risked per trade.
    pub max_risk: f64,
    /// Daily realized-loss limit as a fraction of capital.
    pub max_daily_risk: f64,
    /// Flat cost per trade leg, local-currency units.
    pub spread: Decimal,
    pub commission_rate: f64,
    #[serde(default = "default_capital_distribution")]
    pub capital_distribution: HashMap<Timeframe, Decimal>,
    pub trading_hours: (u32, u32),
    pub atr_multiplier_sl: f64,
    pub risk_reward_ratio: f64,
    /// Fraction of the way to TP at which the trailing stop arms.
    pub trailing_stop_activation: f64,
    /// Fraction of the peak profit given back before the trail fires.
    pub trailing_stop_distance: f64,
    #[serde(default = "default_time_limits")]
    pub time_limits_hours: HashMap<Timeframe, u32>,
    /// Close any open position at the end of the trading day.
    #[serde(default)]
    pub close_at_end_of_day: bool,
}

impl SimulationConfig {
    /// Base template every fleet member derives from.
    pub fn main(name: &str) -> Self {
        Self {
            name: name.to_string(),
            strategy_type: StrategyType::Main,
            initial_capital: dec!(1000.0),
            min_confidence: 0.35,
            max_risk: 0.02,
            max_daily_risk: 0.02,
            spread: dec!(2.0),
            commission_rate: 0.0003,
            capital_distribution: default_capital_distribution(),
            trading_hours: (9, 17),
            atr_multiplier_sl: 1.5,
            risk_reward_ratio: 2.0,
            trailing_stop_activation: 0.5,
            trailing_stop_distance: 0.3,
            time_limits_hours: default_time_limits(),
            close_at_end_of_day: false,
        }
    }

    pub fn time_limit_hours(&self, tf: Timeframe) -> u32 {
        self.time_limits_hours
            .get(&tf)
            .copied()
            .unwrap_or_else(|| tf.default_time_limit_hours())
    }

    pub fn allocated_capital(&self, tf: Timeframe) -> Decimal {
        self.capital_distribution
            .get(&tf)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// The CONSERVATIVE gate multiplies the floor by 1.5.
    pub fn effective_min_confidence(&self) -> f64 {
        match self.strategy_type {
            StrategyType::Conservative => self.min_confidence * 1.5,
            _ => self.min_confidence,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(EngineError::Config(format!(
                "simulation {}: min_confidence out of [0,1]",
                self.name
            )));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(EngineError::Config(format!(
                "simulation {}: non-positive initial capital",
                self.name
            )));
        }
        if self.capital_distribution.is_empty() {
            return Err(EngineError::Config(format!(
                "simulation {}: empty capital distribution",
                self.name
            )));
        }
        if self.max_risk <= 0.0 || self.max_risk > 0.5 {
            return Err(EngineError::Config(format!(
                "simulation {}: max_risk out of (0, 0.5]",
                self.name
            )));
        }
        let (start, end) = self.trading_hours;
        if start >= end || end > 24 {
            return Err(EngineError::Config(format!(
                "simulation {}: invalid trading hours {start}..{end}",
                self.name
            )));
        }
        Ok(())
    }
}

/// The default fleet seeded when the simulations table is empty.
pub fn default_fleet() -> Vec<SimulationConfig> {
    let main = SimulationConfig::main("Main Strategy");

    let conservative = SimulationConfig {
        name: "Conservative".to_string(),
        strategy_type: StrategyType::Conservative,
        min_confidence: 0.45,
        max_risk: 0.015,
        ..SimulationConfig::main("Conservative")
    };

    let momentum = SimulationConfig {
        name: "Momentum".to_string(),
        strategy_type: StrategyType::Momentum,
        min_confidence: 0.40,
        ..SimulationConfig::main("Momentum")
    };

    let mean_reversion = SimulationConfig {
        name: "Mean Reversion".to_string(),
        strategy_type: StrategyType::MeanReversion,
        min_confidence: 0.40,
        ..SimulationConfig::main("Mean Reversion")
    };

    let high_cost = SimulationConfig {
        name: "High Cost Main".to_string(),
        strategy_type: StrategyType::HighCostMain,
        min_confidence: 0.60,
        spread: dec!(5.0),
        commission_rate: 0.00045,
        close_at_end_of_day: true,
        ..SimulationConfig::main("High Cost Main")
    };

    vec![main, conservative, momentum, mean_reversion, high_cost]
}
