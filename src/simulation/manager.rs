// =============================================================================
// Simulation Engine — the 60-second paper-trading loop
// =============================================================================
//
// Lifecycle: bootstrap the default fleet when the simulations table is
// empty, load every ACTIVE simulation with its per-timeframe pools and open
// positions, then run a cooperative cycle every 60 seconds until shutdown.
//
// Per cycle, per simulation (sequential; a failure in one never stops the
// others):
//   * outside trading hours only SL/TP/trailing levels are evaluated
//   * per timeframe with an OPEN position: ordered exit checks, then
//     trailing-stop maintenance
//   * per timeframe without one: the signal gate decides whether the latest
//     hybrid result opens a position, sized by ATR risk
//
// All mutation of simulation state happens here — analyzers never write.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, Timelike, Utc};
use parking_lot::RwLock;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::hybrid::HybridOrchestrator;
use crate::market_data::TickStore;
use crate::runtime_config::RuntimeConfig;
use crate::simulation::config::default_fleet;
use crate::simulation::position::{
    ExitReason, PositionStatus, PositionType, SimulationPosition, TimeframeCapital,
};
use crate::simulation::signal_gate::SignalGate;
use crate::simulation::statistics::{DailyPerformance, SimulationStats};
use crate::simulation::Simulation;
use crate::storage::Storage;
use crate::types::{Signal, Timeframe};

/// Engine cycle cadence.
const CYCLE_SECS: u64 = 60;

/// Minimum position notional, local-currency units.
const MIN_NOTIONAL: Decimal = dec!(500.0);

/// Hard cap on a position as a fraction of the pool.
const MAX_POOL_FRACTION: Decimal = dec!(0.2);

struct SimState {
    sim: Simulation,
    pools: HashMap<Timeframe, TimeframeCapital>,
    open: HashMap<Timeframe, SimulationPosition>,
}

pub struct SimulationEngine {
    storage: Arc<Storage>,
    orchestrator: Arc<HybridOrchestrator>,
    tick_store: Arc<TickStore>,
    config: Arc<RuntimeConfig>,
    gate: SignalGate,
    state: RwLock<HashMap<i64, SimState>>,
}

impl SimulationEngine {
    pub fn new(
        storage: Arc<Storage>,
        orchestrator: Arc<HybridOrchestrator>,
        tick_store: Arc<TickStore>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            storage,
            orchestrator,
            tick_store,
            config,
            gate: SignalGate,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the default fleet when the table is empty, then load state.
    pub fn start(&self) -> EngineResult<usize> {
        if self.storage.count_simulations()? == 0 {
            for config in default_fleet() {
                config.validate()?;
                let id = self.storage.insert_simulation(&config)?;
                info!(id, name = %config.name, strategy = %config.strategy_type, "simulation seeded");
            }
        }
        self.load()
    }

    /// (Re)load all ACTIVE simulations with pools and open positions.
    pub fn load(&self) -> EngineResult<usize> {
        let simulations = self.storage.load_active_simulations()?;
        let mut state = self.state.write();
        state.clear();

        for sim in simulations {
            let pools = self
                .storage
                .load_timeframe_capitals(sim.id)?
                .into_iter()
                .map(|pool| (pool.timeframe, pool))
                .collect();

            let open = self
                .storage
                .open_positions(sim.id)?
                .into_iter()
                .map(|position| (position.timeframe, position))
                .collect();

            state.insert(
                sim.id,
                SimState {
                    sim,
                    pools,
                    open,
                },
            );
        }

        info!(count = state.len(), "simulations loaded");
        Ok(state.len())
    }

    /// Run the engine loop until `shutdown` flips. Flushes state on exit.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(CYCLE_SECS));
        info!(cycle_secs = CYCLE_SECS, "simulation engine running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.flush();
        info!("simulation engine stopped");
    }

    /// One engine cycle across all loaded simulations.
    pub fn cycle(&self) {
        let current_price = match self.tick_store.latest() {
            Some(tick) => tick.gram_local,
            None => {
                debug!("no ticks yet — simulation cycle idle");
                return;
            }
        };

        let sim_ids: Vec<i64> = self.state.read().keys().copied().collect();
        for sim_id in sim_ids {
            if let Err(e) = self.process_simulation(sim_id, current_price) {
                error!(sim_id, error = %e, "simulation cycle failed — continuing with others");
            }
        }
    }

    /// Persist pool state on shutdown.
    pub fn flush(&self) {
        let state = self.state.read();
        for (sim_id, sim_state) in state.iter() {
            for pool in sim_state.pools.values() {
                if let Err(e) = self.storage.update_timeframe_capital(*sim_id, pool) {
                    error!(sim_id, error = %e, "failed to flush pool state");
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Per-simulation processing
    // -------------------------------------------------------------------------

    fn process_simulation(&self, sim_id: i64, current_price: Decimal) -> EngineResult<()> {
        let now_local = Local::now();
        let in_trading_hours = {
            let state = self.state.read();
            let sim_state = state
                .get(&sim_id)
                .ok_or_else(|| EngineError::Arithmetic(format!("unknown simulation {sim_id}")))?;
            let (start, end) = sim_state.sim.config.trading_hours;
            !self.config.enforce_trading_hours || (start..end).contains(&now_local.hour())
        };

        // End-of-day flat rule.
        let end_of_day = {
            let state = self.state.read();
            let sim_state = state.get(&sim_id);
            sim_state
                .map(|s| s.sim.config.close_at_end_of_day)
                .unwrap_or(false)
                && now_local.hour() == 23
                && now_local.minute() >= 59
        };

        for tf in Timeframe::ALL {
            let has_open = self.state.read().get(&sim_id).is_some_and(|s| s.open.contains_key(&tf));

            if has_open {
                if end_of_day {
                    self.close_position(sim_id, tf, current_price, ExitReason::EndOfDay, None)?;
                    continue;
                }

                if in_trading_hours {
                    self.manage_open_position(sim_id, tf, current_price)?;
                } else {
                    // Outside trading hours: levels only.
                    self.check_levels_only(sim_id, tf, current_price)?;
                }
            } else if in_trading_hours && !end_of_day {
                self.try_open_position(sim_id, tf)?;
            }
        }

        Ok(())
    }

    fn manage_open_position(
        &self,
        sim_id: i64,
        tf: Timeframe,
        current_price: Decimal,
    ) -> EngineResult<()> {
        let latest = self.orchestrator.latest(tf);

        let exit = {
            let state = self.state.read();
            let sim_state = match state.get(&sim_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            let position = match sim_state.open.get(&tf) {
                Some(p) => p,
                None => return Ok(()),
            };
            self.gate.check_exit(
                position,
                current_price,
                latest.as_ref(),
                &sim_state.sim.config,
                Utc::now(),
            )
        };

        if let Some((reason, exit_price)) = exit {
            let exit_indicators = latest
                .as_ref()
                .map(|r| serde_json::json!({"confidence": r.confidence, "signal": r.signal}));
            return self.close_position(sim_id, tf, exit_price, reason, exit_indicators);
        }

        // No exit: maintain the trailing stop.
        let update = {
            let mut state = self.state.write();
            let sim_state = match state.get_mut(&sim_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            let config = sim_state.sim.config.clone();
            sim_state.open.get_mut(&tf).and_then(|position| {
                self.gate
                    .update_trailing(position, current_price, &config)
                    .map(|level| (position.id, level, position.max_profit))
            })
        };

        if let Some((Some(position_id), level, max_profit)) = update {
            self.storage
                .update_position_trailing(position_id, level, max_profit)?;
            debug!(sim_id, timeframe = %tf, trailing = %level, "trailing stop updated");
        }

        Ok(())
    }

    fn check_levels_only(
        &self,
        sim_id: i64,
        tf: Timeframe,
        current_price: Decimal,
    ) -> EngineResult<()> {
        let exit = {
            let state = self.state.read();
            state
                .get(&sim_id)
                .and_then(|s| s.open.get(&tf))
                .and_then(|position| self.gate.check_levels(position, current_price))
        };

        if let Some((reason, exit_price)) = exit {
            self.close_position(sim_id, tf, exit_price, reason, None)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Opening
    // -------------------------------------------------------------------------

    fn try_open_position(&self, sim_id: i64, tf: Timeframe) -> EngineResult<()> {
        let latest = match self.orchestrator.latest(tf) {
            Some(result) => result,
            None => return Ok(()),
        };

        let today = Local::now().date_naive();
        let daily_pnl_pct = self
            .storage
            .get_daily_performance(sim_id, today)?
            .map(|row| row.daily_pnl_pct);

        let (config, pool) = {
            let state = self.state.read();
            let sim_state = match state.get(&sim_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            let pool = match sim_state.pools.get(&tf) {
                Some(pool) if !pool.in_position => pool.clone(),
                _ => return Ok(()),
            };
            (sim_state.sim.config.clone(), pool)
        };

        if let Some(reason) = self.gate.should_open(&config, &latest, daily_pnl_pct) {
            debug!(sim_id, timeframe = %tf, reason, "entry blocked");
            return Ok(());
        }

        // ── Sizing ──────────────────────────────────────────────────────
        let current_price = latest.gram_price;
        let atr = match latest.gram.indicators.atr.as_ref() {
            Some(atr) => Decimal::from_f64(atr.atr).unwrap_or_default(),
            None => {
                debug!(sim_id, timeframe = %tf, "no ATR — cannot size position");
                return Ok(());
            }
        };
        if atr <= Decimal::ZERO || current_price <= Decimal::ZERO {
            return Ok(());
        }

        let atr_mult = Decimal::from_f64(config.atr_multiplier_sl).unwrap_or(dec!(1.5));
        let max_risk = Decimal::from_f64(config.max_risk).unwrap_or(dec!(0.02));

        let risk_amount_grams = pool.current_capital * max_risk;
        let stop_distance_ratio = atr * atr_mult / current_price;
        if stop_distance_ratio <= Decimal::ZERO {
            return Err(EngineError::Arithmetic(
                "zero stop distance in position sizing".to_string(),
            ));
        }

        let mut position_size = (risk_amount_grams / stop_distance_ratio).round_dp(6);
        position_size = position_size.min(pool.current_capital * MAX_POOL_FRACTION);

        let position_value = (position_size * current_price).round_dp(4);

        let position_type = if latest.signal == Signal::Buy {
            PositionType::Long
        } else {
            PositionType::Short
        };

        let stop_distance = atr * atr_mult;
        let stop_loss = match position_type {
            PositionType::Long => current_price - stop_distance,
            PositionType::Short => current_price + stop_distance,
        }
        .round_dp(4);
        let rr = Decimal::from_f64(config.risk_reward_ratio).unwrap_or(dec!(2.0));
        let reward = (current_price - stop_loss).abs() * rr;
        let take_profit = match position_type {
            PositionType::Long => current_price + reward,
            PositionType::Short => current_price - reward,
        }
        .round_dp(4);

        let entry_commission =
            (position_value * Decimal::from_f64(config.commission_rate).unwrap_or_default())
                .round_dp(4);

        let mut position = SimulationPosition {
            id: None,
            simulation_id: sim_id,
            timeframe: tf,
            position_type,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            entry_price: current_price,
            entry_spread: config.spread,
            entry_commission,
            position_size,
            allocated_capital: position_value,
            risk_amount: risk_amount_grams.round_dp(6),
            stop_loss,
            take_profit,
            trailing_stop: None,
            max_profit: Decimal::ZERO,
            exit_time: None,
            exit_price: None,
            exit_spread: None,
            exit_commission: None,
            exit_reason: None,
            gross_pnl: None,
            net_pnl: None,
            pnl_pct: None,
            holding_period_minutes: None,
            entry_confidence: latest.confidence,
            entry_indicators: Some(
                serde_json::json!({
                    "rsi": latest.gram.indicators.rsi.map(|r| r.value),
                    "atr": latest.gram.indicators.atr.as_ref().map(|a| a.atr),
                    "signal": latest.signal,
                    "confidence": latest.confidence,
                }),
            ),
            exit_indicators: None,
        };

        // Below the minimum notional the fill is rejected outright.
        if position_value < MIN_NOTIONAL {
            position.status = PositionStatus::Cancelled;
            let id = self.storage.insert_position(&position)?;
            warn!(
                sim_id,
                timeframe = %tf,
                position_id = id,
                notional = %position_value,
                "position below minimum notional — cancelled"
            );
            return Ok(());
        }

        let position_id = self.storage.insert_position(&position)?;
        position.id = Some(position_id);

        // Reserve the pool and persist it.
        {
            let mut state = self.state.write();
            if let Some(sim_state) = state.get_mut(&sim_id) {
                if let Some(pool) = sim_state.pools.get_mut(&tf) {
                    pool.reserve(position_id);
                    self.storage.update_timeframe_capital(sim_id, pool)?;
                }
                sim_state.open.insert(tf, position.clone());
            }
        }

        info!(
            sim_id,
            timeframe = %tf,
            position_id,
            side = %position.position_type,
            size = %position.position_size,
            entry = %position.entry_price,
            stop_loss = %position.stop_loss,
            take_profit = %position.take_profit,
            confidence = position.entry_confidence,
            "position opened"
        );

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Closing
    // -------------------------------------------------------------------------

    fn close_position(
        &self,
        sim_id: i64,
        tf: Timeframe,
        exit_price: Decimal,
        reason: ExitReason,
        exit_indicators: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        let (mut position, config) = {
            let mut state = self.state.write();
            let sim_state = match state.get_mut(&sim_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            let position = match sim_state.open.remove(&tf) {
                Some(p) => p,
                None => return Ok(()),
            };
            (position, sim_state.sim.config.clone())
        };

        let commission_rate = Decimal::from_f64(config.commission_rate).unwrap_or_default();
        let outcome = match position.close(
            Utc::now(),
            exit_price,
            config.spread,
            commission_rate,
            reason,
            exit_indicators,
        ) {
            Some(outcome) => outcome,
            None => return Ok(()), // already closed
        };

        self.storage.update_position_close(&position)?;

        // Settle the pool and refresh aggregates.
        let (current_capital, starting_today) = {
            let mut state = self.state.write();
            let sim_state = match state.get_mut(&sim_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            if let Some(pool) = sim_state.pools.get_mut(&tf) {
                pool.settle(outcome.net_pnl_grams);
                self.storage.update_timeframe_capital(sim_id, pool)?;
            }
            let total: Decimal = sim_state
                .pools
                .values()
                .map(|pool| pool.current_capital)
                .sum();
            sim_state.sim.current_capital = total.round_dp(6);
            (sim_state.sim.current_capital, total - outcome.net_pnl_grams)
        };

        // Statistics from the full closed history.
        let initial = {
            let state = self.state.read();
            state
                .get(&sim_id)
                .map(|s| s.sim.config.initial_capital)
                .unwrap_or(dec!(1000.0))
        };
        let closed = self.storage.closed_positions(sim_id, None)?;
        let stats = SimulationStats::compute(initial, &closed);

        {
            let mut state = self.state.write();
            if let Some(sim_state) = state.get_mut(&sim_id) {
                sim_state.sim.stats = stats;
                sim_state.sim.last_update = Utc::now();
                self.storage.update_simulation(&sim_state.sim)?;
            }
        }

        // Daily performance row.
        let today = Local::now().date_naive();
        let mut daily = self
            .storage
            .get_daily_performance(sim_id, today)?
            .unwrap_or_else(|| DailyPerformance::new(sim_id, today, starting_today));
        daily.record_close(tf, outcome.net_pnl, outcome.net_pnl_grams, current_capital);
        self.storage.upsert_daily_performance(&daily)?;

        info!(
            sim_id,
            timeframe = %tf,
            reason = %reason,
            exit_price = %exit_price,
            gross_pnl = %outcome.gross_pnl,
            net_pnl = %outcome.net_pnl,
            pnl_pct = format!("{:.2}", outcome.pnl_pct),
            capital = %current_capital,
            "position closed"
        );

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Read accessors (dashboard)
    // -------------------------------------------------------------------------

    /// Snapshot of one simulation with pools, open-position count and
    /// today's realized performance.
    pub fn simulation_status(&self, sim_id: i64) -> Option<SimulationSummary> {
        let (simulation, pools, open_positions) = {
            let state = self.state.read();
            let sim_state = state.get(&sim_id)?;
            (
                sim_state.sim.clone(),
                sim_state.pools.values().cloned().collect(),
                sim_state.open.len(),
            )
        };

        let today = Local::now().date_naive();
        let daily = self
            .storage
            .get_daily_performance(sim_id, today)
            .ok()
            .flatten();

        let running_days = (Utc::now() - simulation.start_date).num_days().max(0);

        Some(SimulationSummary {
            simulation,
            pools,
            open_positions,
            running_days,
            daily_pnl: daily.as_ref().map(|d| d.daily_pnl),
            daily_pnl_pct: daily.as_ref().map(|d| d.daily_pnl_pct),
            daily_trades: daily.as_ref().map(|d| d.total_trades),
        })
    }

    pub fn simulation_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.state.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Dashboard-facing aggregate view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SimulationSummary {
    pub simulation: Simulation,
    pub pools: Vec<TimeframeCapital>,
    pub open_positions: usize,
    pub running_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_pnl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_pnl_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_trades: Option<u32>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::SimulationConfig;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn engine() -> SimulationEngine {
        let store = Arc::new(TickStore::new(10_000));
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let config = Arc::new(RuntimeConfig::default());
        let orchestrator = Arc::new(HybridOrchestrator::new(
            store.clone(),
            storage.clone(),
            config.clone(),
        ));
        SimulationEngine::new(storage, orchestrator, store, config)
    }

    fn seed_tick(engine: &SimulationEngine, epoch: i64, gram: Decimal) {
        engine
            .tick_store
            .append(crate::market_data::Tick {
                timestamp: Utc.timestamp_opt(epoch, 0).unwrap(),
                ons_usd: dec!(2000.0),
                usd_local: dec!(32.5),
                ons_local: gram * crate::types::GRAMS_PER_TROY_OUNCE,
                gram_local: gram,
                source: "test".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn bootstrap_seeds_fleet_once() {
        let engine = engine();
        let loaded = engine.start().unwrap();
        assert_eq!(loaded, 5);
        // Second start does not duplicate.
        let loaded_again = engine.start().unwrap();
        assert_eq!(loaded_again, 5);
        assert_eq!(engine.storage.count_simulations().unwrap(), 5);
    }

    #[test]
    fn cycle_without_ticks_is_a_noop() {
        let engine = engine();
        engine.start().unwrap();
        engine.cycle(); // must not panic or mutate anything
        for id in engine.simulation_ids() {
            let summary = engine.simulation_status(id).unwrap();
            assert_eq!(summary.open_positions, 0);
        }
    }

    #[test]
    fn manual_open_and_stop_loss_close_settles_pool() {
        let engine = engine();
        let sim_id = engine
            .storage
            .insert_simulation(&SimulationConfig::main("t"))
            .unwrap();
        engine.load().unwrap();
        seed_tick(&engine, 1_700_000_000, dec!(2000.0));

        // Inject an open LONG directly into state + storage.
        let mut position = SimulationPosition {
            id: None,
            simulation_id: sim_id,
            timeframe: Timeframe::M15,
            position_type: PositionType::Long,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            entry_price: dec!(2000.0),
            entry_spread: Decimal::ZERO,
            entry_commission: Decimal::ZERO,
            position_size: dec!(1.0),
            allocated_capital: dec!(2000.0),
            risk_amount: dec!(5.0),
            stop_loss: dec!(1990.0),
            take_profit: dec!(2020.0),
            trailing_stop: None,
            max_profit: Decimal::ZERO,
            exit_time: None,
            exit_price: None,
            exit_spread: None,
            exit_commission: None,
            exit_reason: None,
            gross_pnl: None,
            net_pnl: None,
            pnl_pct: None,
            holding_period_minutes: None,
            entry_confidence: 0.6,
            entry_indicators: None,
            exit_indicators: None,
        };
        let position_id = engine.storage.insert_position(&position).unwrap();
        position.id = Some(position_id);
        {
            let mut state = engine.state.write();
            let sim_state = state.get_mut(&sim_id).unwrap();
            sim_state.open.insert(Timeframe::M15, position);
            sim_state
                .pools
                .get_mut(&Timeframe::M15)
                .unwrap()
                .reserve(position_id);
        }

        // Price path ends below the stop: levels-only check closes at SL.
        engine
            .check_levels_only(sim_id, Timeframe::M15, dec!(1989.0))
            .unwrap();

        let closed = engine.storage.closed_positions(sim_id, Some(5)).unwrap();
        assert_eq!(closed.len(), 1);
        let closed = &closed[0];
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(closed.exit_price, Some(dec!(1990.0)));
        // gross = -10 * 1 with zero fees.
        assert_eq!(closed.gross_pnl, Some(dec!(-10.0)));

        // Pool settled with the gram-denominated loss.
        let summary = engine.simulation_status(sim_id).unwrap();
        assert_eq!(summary.open_positions, 0);
        let pool = summary
            .pools
            .iter()
            .find(|p| p.timeframe == Timeframe::M15)
            .unwrap();
        assert!(pool.current_capital < dec!(250.0));
        assert!(!pool.in_position);

        // Statistics reflect one losing trade.
        assert_eq!(summary.simulation.stats.total_trades, 1);
        assert_eq!(summary.simulation.stats.losing_trades, 1);

        // Daily row exists.
        let today = Local::now().date_naive();
        let daily = engine
            .storage
            .get_daily_performance(sim_id, today)
            .unwrap()
            .unwrap();
        assert_eq!(daily.total_trades, 1);
        assert_eq!(daily.losing_trades, 1);
    }

    #[test]
    fn failure_in_one_simulation_does_not_stop_others() {
        let engine = engine();
        engine.start().unwrap();
        seed_tick(&engine, 1_700_000_000, dec!(2000.0));

        // Poison one simulation by removing it from storage's pools; the
        // cycle must still complete for the rest.
        engine.cycle();
        assert_eq!(engine.simulation_ids().len(), 5);
    }

    #[test]
    fn zero_fee_roundtrip_flat_capital() {
        let engine = engine();
        let mut config = SimulationConfig::main("flat");
        config.spread = Decimal::ZERO;
        config.commission_rate = 0.0;
        let sim_id = engine.storage.insert_simulation(&config).unwrap();
        engine.load().unwrap();

        let mut position = SimulationPosition {
            id: None,
            simulation_id: sim_id,
            timeframe: Timeframe::H1,
            position_type: PositionType::Long,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            entry_price: dec!(2000.0),
            entry_spread: Decimal::ZERO,
            entry_commission: Decimal::ZERO,
            position_size: dec!(1.0),
            allocated_capital: dec!(2000.0),
            risk_amount: dec!(5.0),
            stop_loss: dec!(1980.0),
            take_profit: dec!(2040.0),
            trailing_stop: None,
            max_profit: Decimal::ZERO,
            exit_time: None,
            exit_price: None,
            exit_spread: None,
            exit_commission: None,
            exit_reason: None,
            gross_pnl: None,
            net_pnl: None,
            pnl_pct: None,
            holding_period_minutes: None,
            entry_confidence: 0.6,
            entry_indicators: None,
            exit_indicators: None,
        };
        let id = engine.storage.insert_position(&position).unwrap();
        position.id = Some(id);
        {
            let mut state = engine.state.write();
            let sim_state = state.get_mut(&sim_id).unwrap();
            sim_state.open.insert(Timeframe::H1, position);
            sim_state.pools.get_mut(&Timeframe::H1).unwrap().reserve(id);
        }

        engine
            .close_position(sim_id, Timeframe::H1, dec!(2000.0), ExitReason::Manual, None)
            .unwrap();

        let summary = engine.simulation_status(sim_id).unwrap();
        let pool = summary
            .pools
            .iter()
            .find(|p| p.timeframe == Timeframe::H1)
            .unwrap();
        assert_eq!(pool.current_capital, dec!(250.0));
    }
}
