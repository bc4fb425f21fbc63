// =============================================================================
// Simulation Module
// =============================================================================
//
// The paper-trading engine: per-simulation, per-timeframe capital pools
// consuming hybrid analysis results.
//
// - config:      immutable strategy configuration + the default fleet
// - position:    position lifecycle state machine and PnL arithmetic
// - signal_gate: entry filters and ordered exit checks
// - statistics:  win rate / profit factor / drawdown / daily rows
// - manager:     the 60-second engine loop

pub mod config;
pub mod manager;
pub mod position;
pub mod signal_gate;
pub mod statistics;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use config::{SimulationConfig, SimulationStatus, StrategyType};
pub use manager::SimulationEngine;
pub use position::{ExitReason, PositionStatus, PositionType, SimulationPosition, TimeframeCapital};
pub use statistics::SimulationStats;

/// One paper-trading account: immutable config, live capital, statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub id: i64,
    pub config: SimulationConfig,
    pub status: SimulationStatus,
    pub current_capital: Decimal,
    pub stats: SimulationStats,
    pub start_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Simulation {
    pub fn is_active(&self) -> bool {
        self.status == SimulationStatus::Active
    }
}
