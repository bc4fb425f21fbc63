// =============================================================================
// Central Application State
// =============================================================================
//
// The single handle tying the subsystems together: the tick store (owned by
// the feed), the result store, the orchestrator and the simulation engine.
// The dashboard API reads everything through this; nothing here mutates core
// state.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::hybrid::HybridOrchestrator;
use crate::market_data::{Tick, TickStore};
use crate::runtime_config::RuntimeConfig;
use crate::simulation::manager::SimulationSummary;
use crate::simulation::SimulationEngine;
use crate::storage::Storage;
use crate::types::{Signal, Timeframe};

/// Shared across all tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub tick_store: Arc<TickStore>,
    pub storage: Arc<Storage>,
    pub orchestrator: Arc<HybridOrchestrator>,
    pub simulation_engine: Arc<SimulationEngine>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: Arc<RuntimeConfig>,
        tick_store: Arc<TickStore>,
        storage: Arc<Storage>,
        orchestrator: Arc<HybridOrchestrator>,
        simulation_engine: Arc<SimulationEngine>,
    ) -> Self {
        Self {
            config,
            tick_store,
            storage,
            orchestrator,
            simulation_engine,
            start_time: std::time::Instant::now(),
        }
    }

    /// Aggregate snapshot for the dashboard.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let latest_tick = self.tick_store.latest();

        let analyses: Vec<TimeframeAnalysisSummary> = Timeframe::ALL
            .iter()
            .filter_map(|&tf| {
                self.orchestrator.latest(tf).map(|result| TimeframeAnalysisSummary {
                    timeframe: tf,
                    timestamp: result.timestamp.to_rfc3339(),
                    signal: result.signal,
                    confidence: result.confidence,
                    gram_price: result.gram_price.to_string(),
                })
            })
            .collect();

        let simulations: Vec<SimulationSummary> = self
            .simulation_engine
            .simulation_ids()
            .into_iter()
            .filter_map(|id| self.simulation_engine.simulation_status(id))
            .collect();

        StateSnapshot {
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            analysis_version: self.orchestrator.version(),
            tick_window: self.tick_store.len(),
            latest_tick,
            analyses,
            simulations,
        }
    }
}

/// Full engine state snapshot sent to the dashboard.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub server_time: i64,
    pub uptime_secs: u64,
    /// Monotonic counter bumped on every persisted analysis.
    pub analysis_version: u64,
    pub tick_window: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_tick: Option<Tick>,
    pub analyses: Vec<TimeframeAnalysisSummary>,
    pub simulations: Vec<SimulationSummary>,
}

/// One line per timeframe in the snapshot header.
#[derive(Debug, Serialize)]
pub struct TimeframeAnalysisSummary {
    pub timeframe: Timeframe,
    pub timestamp: String,
    pub signal: Signal,
    pub confidence: f64,
    pub gram_price: String,
}
