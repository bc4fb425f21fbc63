// =============================================================================
// Storage — SQLite result/state store
// =============================================================================
//
// Single bundled-SQLite connection behind a mutex; schema created
// idempotently at open. Monetary values are persisted as fixed-point TEXT
// (never binary floats); timestamps as RFC 3339 UTC.
//
// Logical tables:
//   price_data            append-only raw ticks, UNIQUE(timestamp)
//   hybrid_analysis       append-only analysis log, indexed (timeframe, ts DESC)
//   trading_signals       compact non-HOLD signal log
//   simulations           one row per paper-trading account
//   sim_timeframe_capital UNIQUE(simulation_id, timeframe)
//   sim_positions         full position lifecycle rows
//   sim_daily_performance UNIQUE(simulation_id, date)
//
// Transient write failures retry up to 3 times with exponential backoff,
// then surface as EngineError::Persistence.
// =============================================================================

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::hybrid::HybridAnalysisResult;
use crate::market_data::Tick;
use crate::simulation::config::{SimulationConfig, SimulationStatus};
use crate::simulation::position::{
    PositionStatus, PositionType, SimulationPosition, TimeframeCapital,
};
use crate::simulation::statistics::{DailyPerformance, SimulationStats, TimeframeDaily};
use crate::simulation::Simulation;
use crate::types::{Signal, Timeframe};

const WRITE_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        info!(path = %path.as_ref().display(), "storage opened");
        Ok(storage)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS price_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL UNIQUE,
                ons_usd TEXT NOT NULL,
                usd_local TEXT NOT NULL,
                ons_local TEXT NOT NULL,
                gram_local TEXT,
                source TEXT NOT NULL DEFAULT 'feed'
            );
            CREATE INDEX IF NOT EXISTS idx_price_data_ts ON price_data(timestamp);

            CREATE TABLE IF NOT EXISTS hybrid_analysis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                gram_price TEXT NOT NULL,
                signal TEXT NOT NULL,
                signal_strength TEXT NOT NULL,
                confidence REAL NOT NULL,
                position_size_json TEXT NOT NULL,
                stop_loss TEXT,
                take_profit TEXT,
                risk_reward_ratio REAL,
                global_trend TEXT NOT NULL,
                global_trend_strength TEXT NOT NULL,
                currency_risk_level TEXT NOT NULL,
                recommendations_json TEXT NOT NULL,
                summary TEXT NOT NULL,
                dip_json TEXT NOT NULL,
                gram_json TEXT NOT NULL,
                global_json TEXT NOT NULL,
                currency_json TEXT NOT NULL,
                advanced_json TEXT NOT NULL,
                pattern_json TEXT NOT NULL,
                confluence_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_hybrid_tf_ts
                ON hybrid_analysis(timeframe, timestamp DESC);

            CREATE TABLE IF NOT EXISTS trading_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                price_level TEXT NOT NULL,
                confidence REAL NOT NULL,
                risk_level TEXT NOT NULL,
                target_price TEXT,
                stop_loss TEXT,
                reasons_json TEXT
            );

            CREATE TABLE IF NOT EXISTS simulations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                strategy_type TEXT NOT NULL,
                status TEXT NOT NULL,
                initial_capital TEXT NOT NULL,
                current_capital TEXT NOT NULL,
                total_trades INTEGER NOT NULL DEFAULT 0,
                winning_trades INTEGER NOT NULL DEFAULT 0,
                losing_trades INTEGER NOT NULL DEFAULT 0,
                win_rate REAL NOT NULL DEFAULT 0,
                profit_factor REAL NOT NULL DEFAULT 0,
                max_drawdown_pct REAL NOT NULL DEFAULT 0,
                total_net_pnl TEXT NOT NULL DEFAULT '0',
                avg_win REAL NOT NULL DEFAULT 0,
                avg_loss REAL NOT NULL DEFAULT 0,
                start_date TEXT NOT NULL,
                last_update TEXT NOT NULL,
                config_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sim_timeframe_capital (
                simulation_id INTEGER NOT NULL,
                timeframe TEXT NOT NULL,
                allocated_capital TEXT NOT NULL,
                current_capital TEXT NOT NULL,
                in_position INTEGER NOT NULL DEFAULT 0,
                open_position_id INTEGER,
                UNIQUE(simulation_id, timeframe)
            );

            CREATE TABLE IF NOT EXISTS sim_positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                simulation_id INTEGER NOT NULL,
                timeframe TEXT NOT NULL,
                position_type TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                entry_spread TEXT NOT NULL,
                entry_commission TEXT NOT NULL,
                position_size TEXT NOT NULL,
                allocated_capital TEXT NOT NULL,
                risk_amount TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                trailing_stop TEXT,
                max_profit TEXT NOT NULL DEFAULT '0',
                entry_confidence REAL NOT NULL,
                entry_indicators_json TEXT,
                exit_time TEXT,
                exit_price TEXT,
                exit_spread TEXT,
                exit_commission TEXT,
                exit_reason TEXT,
                gross_pnl TEXT,
                net_pnl TEXT,
                pnl_pct REAL,
                holding_period_minutes INTEGER,
                exit_indicators_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sim_positions_open
                ON sim_positions(simulation_id, status);

            CREATE TABLE IF NOT EXISTS sim_daily_performance (
                simulation_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                starting_capital TEXT NOT NULL,
                ending_capital TEXT NOT NULL,
                daily_pnl TEXT NOT NULL,
                daily_pnl_pct REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                winning_trades INTEGER NOT NULL,
                losing_trades INTEGER NOT NULL,
                timeframe_json TEXT NOT NULL,
                UNIQUE(simulation_id, date)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Run `op` with retry/backoff for transient failures.
    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> EngineResult<T> {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=WRITE_RETRIES {
            let result = {
                let conn = self.conn.lock();
                op(&conn)
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt == WRITE_RETRIES => {
                    return Err(EngineError::Persistence(e));
                }
                Err(e) => {
                    warn!(what, attempt, error = %e, "storage operation failed — retrying");
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    // -------------------------------------------------------------------------
    // Price data
    // -------------------------------------------------------------------------

    /// Append one tick; duplicates by timestamp are ignored.
    pub fn save_tick(&self, tick: &Tick) -> EngineResult<()> {
        self.with_retry("save_tick", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO price_data
                   (timestamp, ons_usd, usd_local, ons_local, gram_local, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tick.timestamp.to_rfc3339(),
                    tick.ons_usd.to_string(),
                    tick.usd_local.to_string(),
                    tick.ons_local.to_string(),
                    tick.gram_local.to_string(),
                    tick.source,
                ],
            )
            .map(|_| ())
        })
    }

    pub fn prune_ticks_before(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        self.with_retry("prune_ticks", |conn| {
            conn.execute(
                "DELETE FROM price_data WHERE timestamp < ?1",
                params![cutoff.to_rfc3339()],
            )
        })
    }

    pub fn tick_count(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM price_data", [], |row| row.get(0))?;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Hybrid analysis
    // -------------------------------------------------------------------------

    pub fn save_hybrid_analysis(&self, result: &HybridAnalysisResult) -> EngineResult<i64> {
        let position_size_json = serde_json::to_string(&result.position_size).unwrap_or_default();
        let recommendations_json =
            serde_json::to_string(&result.recommendations).unwrap_or_default();
        let dip_json = serde_json::to_string(&result.dip).unwrap_or_default();
        let gram_json = serde_json::to_string(&result.gram).unwrap_or_default();
        let global_json = serde_json::to_string(&result.global_trend).unwrap_or_default();
        let currency_json = serde_json::to_string(&result.currency_risk).unwrap_or_default();
        let advanced_json = serde_json::to_string(&result.advanced).unwrap_or_default();
        let pattern_json = serde_json::to_string(&result.gram.patterns).unwrap_or_default();
        let confluence_json = result
            .confluence
            .as_ref()
            .map(|c| serde_json::to_string(c).unwrap_or_default());

        self.with_retry("save_hybrid_analysis", |conn| {
            conn.execute(
                "INSERT INTO hybrid_analysis
                   (timestamp, timeframe, gram_price, signal, signal_strength, confidence,
                    position_size_json, stop_loss, take_profit, risk_reward_ratio,
                    global_trend, global_trend_strength, currency_risk_level,
                    recommendations_json, summary, dip_json,
                    gram_json, global_json, currency_json, advanced_json, pattern_json,
                    confluence_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                params![
                    result.timestamp.to_rfc3339(),
                    result.timeframe.as_str(),
                    result.gram_price.to_string(),
                    result.signal.to_string(),
                    result.signal_strength.to_string(),
                    result.confidence,
                    position_size_json,
                    result.stop_loss.map(|d| d.to_string()),
                    result.take_profit.map(|d| d.to_string()),
                    result.risk_reward_ratio,
                    result.global_trend_direction.to_string(),
                    result.global_trend_strength.to_string(),
                    result.currency_risk_level.to_string(),
                    recommendations_json,
                    result.summary,
                    dip_json,
                    gram_json,
                    global_json,
                    currency_json,
                    advanced_json,
                    pattern_json,
                    confluence_json,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn latest_hybrid_analysis(
        &self,
        timeframe: Option<Timeframe>,
    ) -> EngineResult<Option<HybridAnalysisResult>> {
        let conn = self.conn.lock();
        let result = match timeframe {
            Some(tf) => conn
                .query_row(
                    "SELECT * FROM hybrid_analysis WHERE timeframe = ?1
                     ORDER BY timestamp DESC LIMIT 1",
                    params![tf.as_str()],
                    row_to_hybrid,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT * FROM hybrid_analysis ORDER BY timestamp DESC LIMIT 1",
                    [],
                    row_to_hybrid,
                )
                .optional()?,
        };
        Ok(result)
    }

    /// Paged history, newest first, optionally filtered by timeframe,
    /// signal type and date range.
    pub fn hybrid_analysis_history(
        &self,
        timeframe: Option<Timeframe>,
        page: u32,
        per_page: u32,
        signal: Option<Signal>,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> EngineResult<Vec<HybridAnalysisResult>> {
        let per_page = per_page.clamp(1, 200);
        let offset = page.saturating_sub(1) * per_page;

        let mut sql = String::from("SELECT * FROM hybrid_analysis WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(tf) = timeframe {
            sql.push_str(" AND timeframe = ?");
            args.push(tf.as_str().to_string());
        }
        if let Some(sig) = signal {
            sql.push_str(" AND signal = ?");
            args.push(sig.to_string());
        }
        if let Some((from, to)) = date_range {
            sql.push_str(" AND timestamp >= ? AND timestamp < ?");
            args.push(from.to_rfc3339());
            args.push(to.to_rfc3339());
        }
        sql.push_str(&format!(
            " ORDER BY timestamp DESC LIMIT {per_page} OFFSET {offset}"
        ));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_hybrid)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Compact signal log row for every non-HOLD decision.
    pub fn save_trading_signal(&self, result: &HybridAnalysisResult) -> EngineResult<()> {
        let reasons = serde_json::json!({
            "summary": result.summary,
            "timeframe": result.timeframe.as_str(),
            "strength": result.signal_strength.to_string(),
            "recommendations": result.recommendations,
        })
        .to_string();

        self.with_retry("save_trading_signal", |conn| {
            conn.execute(
                "INSERT INTO trading_signals
                   (timestamp, signal_type, price_level, confidence, risk_level,
                    target_price, stop_loss, reasons_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    result.timestamp.to_rfc3339(),
                    result.signal.to_string(),
                    result.gram_price.to_string(),
                    result.confidence,
                    result.currency_risk_level.to_string(),
                    result.take_profit.map(|d| d.to_string()),
                    result.stop_loss.map(|d| d.to_string()),
                    reasons,
                ],
            )
            .map(|_| ())
        })
    }

    // -------------------------------------------------------------------------
    // Simulations
    // -------------------------------------------------------------------------

    pub fn count_simulations(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM simulations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Insert a new simulation with its per-timeframe pools.
    pub fn insert_simulation(&self, config: &SimulationConfig) -> EngineResult<i64> {
        let config_json = serde_json::to_string(config).unwrap_or_default();
        let now = Utc::now().to_rfc3339();
        let initial = config.initial_capital.to_string();

        self.with_retry("insert_simulation", move |conn| {
            conn.execute(
                "INSERT INTO simulations
                   (name, strategy_type, status, initial_capital, current_capital,
                    start_date, last_update, config_json)
                 VALUES (?1, ?2, 'ACTIVE', ?3, ?3, ?4, ?4, ?5)",
                params![
                    config.name,
                    config.strategy_type.as_str(),
                    initial,
                    now,
                    config_json,
                ],
            )?;
            let sim_id = conn.last_insert_rowid();

            for (&tf, &allocated) in &config.capital_distribution {
                conn.execute(
                    "INSERT INTO sim_timeframe_capital
                       (simulation_id, timeframe, allocated_capital, current_capital, in_position)
                     VALUES (?1, ?2, ?3, ?3, 0)",
                    params![sim_id, tf.as_str(), allocated.to_string()],
                )?;
            }
            Ok(sim_id)
        })
    }

    pub fn load_active_simulations(&self) -> EngineResult<Vec<Simulation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, status, current_capital, total_trades, winning_trades, losing_trades,
                    win_rate, profit_factor, max_drawdown_pct, total_net_pnl, avg_win, avg_loss,
                    start_date, last_update, config_json
             FROM simulations WHERE status = 'ACTIVE'",
        )?;

        let rows = stmt.query_map([], row_to_simulation)?;
        let mut simulations = Vec::new();
        for row in rows {
            simulations.push(row?);
        }
        Ok(simulations)
    }

    pub fn get_simulation(&self, sim_id: i64) -> EngineResult<Option<Simulation>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                "SELECT id, status, current_capital, total_trades, winning_trades, losing_trades,
                        win_rate, profit_factor, max_drawdown_pct, total_net_pnl, avg_win, avg_loss,
                        start_date, last_update, config_json
                 FROM simulations WHERE id = ?1",
                params![sim_id],
                row_to_simulation,
            )
            .optional()?;
        Ok(result)
    }

    /// Persist refreshed statistics and capital for one simulation.
    pub fn update_simulation(&self, sim: &Simulation) -> EngineResult<()> {
        let stats = &sim.stats;
        self.with_retry("update_simulation", |conn| {
            conn.execute(
                "UPDATE simulations SET
                   status = ?2, current_capital = ?3, total_trades = ?4,
                   winning_trades = ?5, losing_trades = ?6, win_rate = ?7,
                   profit_factor = ?8, max_drawdown_pct = ?9, total_net_pnl = ?10,
                   avg_win = ?11, avg_loss = ?12, last_update = ?13
                 WHERE id = ?1",
                params![
                    sim.id,
                    sim.status.as_str(),
                    sim.current_capital.to_string(),
                    stats.total_trades,
                    stats.winning_trades,
                    stats.losing_trades,
                    stats.win_rate,
                    if stats.profit_factor.is_finite() {
                        stats.profit_factor
                    } else {
                        f64::MAX
                    },
                    stats.max_drawdown_pct,
                    stats.total_net_pnl.to_string(),
                    stats.avg_win,
                    stats.avg_loss,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map(|_| ())
        })
    }

    // -------------------------------------------------------------------------
    // Timeframe capital pools
    // -------------------------------------------------------------------------

    pub fn load_timeframe_capitals(&self, sim_id: i64) -> EngineResult<Vec<TimeframeCapital>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timeframe, allocated_capital, current_capital, in_position, open_position_id
             FROM sim_timeframe_capital WHERE simulation_id = ?1",
        )?;

        let rows = stmt.query_map(params![sim_id], |row| {
            let tf: String = row.get(0)?;
            let allocated: String = row.get(1)?;
            let current: String = row.get(2)?;
            let in_position: bool = row.get(3)?;
            let open_position_id: Option<i64> = row.get(4)?;
            Ok(TimeframeCapital {
                timeframe: Timeframe::parse(&tf).unwrap_or(Timeframe::M15),
                allocated_capital: parse_decimal(&allocated),
                current_capital: parse_decimal(&current),
                in_position,
                open_position_id,
            })
        })?;

        let mut pools = Vec::new();
        for row in rows {
            pools.push(row?);
        }
        Ok(pools)
    }

    pub fn update_timeframe_capital(
        &self,
        sim_id: i64,
        pool: &TimeframeCapital,
    ) -> EngineResult<()> {
        self.with_retry("update_timeframe_capital", |conn| {
            conn.execute(
                "UPDATE sim_timeframe_capital SET
                   current_capital = ?3, in_position = ?4, open_position_id = ?5
                 WHERE simulation_id = ?1 AND timeframe = ?2",
                params![
                    sim_id,
                    pool.timeframe.as_str(),
                    pool.current_capital.to_string(),
                    pool.in_position,
                    pool.open_position_id,
                ],
            )
            .map(|_| ())
        })
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    pub fn insert_position(&self, position: &SimulationPosition) -> EngineResult<i64> {
        let entry_indicators = position
            .entry_indicators
            .as_ref()
            .map(|v| v.to_string());

        self.with_retry("insert_position", |conn| {
            conn.execute(
                "INSERT INTO sim_positions
                   (simulation_id, timeframe, position_type, status,
                    entry_time, entry_price, entry_spread, entry_commission,
                    position_size, allocated_capital, risk_amount,
                    stop_loss, take_profit, trailing_stop, max_profit,
                    entry_confidence, entry_indicators_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17)",
                params![
                    position.simulation_id,
                    position.timeframe.as_str(),
                    position.position_type.as_str(),
                    position.status.as_str(),
                    position.entry_time.to_rfc3339(),
                    position.entry_price.to_string(),
                    position.entry_spread.to_string(),
                    position.entry_commission.to_string(),
                    position.position_size.to_string(),
                    position.allocated_capital.to_string(),
                    position.risk_amount.to_string(),
                    position.stop_loss.to_string(),
                    position.take_profit.to_string(),
                    position.trailing_stop.map(|d| d.to_string()),
                    position.max_profit.to_string(),
                    position.entry_confidence,
                    entry_indicators,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_position_trailing(
        &self,
        position_id: i64,
        trailing_stop: Decimal,
        max_profit: Decimal,
    ) -> EngineResult<()> {
        self.with_retry("update_position_trailing", |conn| {
            conn.execute(
                "UPDATE sim_positions SET trailing_stop = ?2, max_profit = ?3 WHERE id = ?1",
                params![
                    position_id,
                    trailing_stop.to_string(),
                    max_profit.to_string()
                ],
            )
            .map(|_| ())
        })
    }

    /// Write all exit fields of a closed (or cancelled) position.
    pub fn update_position_close(&self, position: &SimulationPosition) -> EngineResult<()> {
        let exit_indicators = position.exit_indicators.as_ref().map(|v| v.to_string());

        self.with_retry("update_position_close", |conn| {
            conn.execute(
                "UPDATE sim_positions SET
                   status = ?2, exit_time = ?3, exit_price = ?4, exit_spread = ?5,
                   exit_commission = ?6, exit_reason = ?7, gross_pnl = ?8, net_pnl = ?9,
                   pnl_pct = ?10, holding_period_minutes = ?11, exit_indicators_json = ?12
                 WHERE id = ?1",
                params![
                    position.id,
                    position.status.as_str(),
                    position.exit_time.map(|t| t.to_rfc3339()),
                    position.exit_price.map(|d| d.to_string()),
                    position.exit_spread.map(|d| d.to_string()),
                    position.exit_commission.map(|d| d.to_string()),
                    position.exit_reason.map(|r| r.as_str()),
                    position.gross_pnl.map(|d| d.to_string()),
                    position.net_pnl.map(|d| d.to_string()),
                    position.pnl_pct,
                    position.holding_period_minutes,
                    exit_indicators,
                ],
            )
            .map(|_| ())
        })
    }

    pub fn open_positions(&self, sim_id: i64) -> EngineResult<Vec<SimulationPosition>> {
        self.positions_by_status(sim_id, PositionStatus::Open, None)
    }

    pub fn closed_positions(
        &self,
        sim_id: i64,
        limit: Option<u32>,
    ) -> EngineResult<Vec<SimulationPosition>> {
        self.positions_by_status(sim_id, PositionStatus::Closed, limit)
    }

    fn positions_by_status(
        &self,
        sim_id: i64,
        status: PositionStatus,
        limit: Option<u32>,
    ) -> EngineResult<Vec<SimulationPosition>> {
        let conn = self.conn.lock();
        let sql = match limit {
            Some(n) => format!(
                "SELECT * FROM sim_positions WHERE simulation_id = ?1 AND status = ?2
                 ORDER BY entry_time DESC LIMIT {n}"
            ),
            None => "SELECT * FROM sim_positions WHERE simulation_id = ?1 AND status = ?2
                     ORDER BY entry_time ASC"
                .to_string(),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![sim_id, status.as_str()], row_to_position)?;
        let mut positions = Vec::new();
        for row in rows {
            positions.push(row?);
        }
        Ok(positions)
    }

    // -------------------------------------------------------------------------
    // Daily performance
    // -------------------------------------------------------------------------

    pub fn get_daily_performance(
        &self,
        sim_id: i64,
        date: NaiveDate,
    ) -> EngineResult<Option<DailyPerformance>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                "SELECT starting_capital, ending_capital, daily_pnl, daily_pnl_pct,
                        total_trades, winning_trades, losing_trades, timeframe_json
                 FROM sim_daily_performance WHERE simulation_id = ?1 AND date = ?2",
                params![sim_id, date.to_string()],
                |row| {
                    let starting: String = row.get(0)?;
                    let ending: String = row.get(1)?;
                    let daily_pnl: String = row.get(2)?;
                    let tf_json: String = row.get(7)?;
                    Ok(DailyPerformance {
                        simulation_id: sim_id,
                        date,
                        starting_capital: parse_decimal(&starting),
                        ending_capital: parse_decimal(&ending),
                        daily_pnl: parse_decimal(&daily_pnl),
                        daily_pnl_pct: row.get(3)?,
                        total_trades: row.get(4)?,
                        winning_trades: row.get(5)?,
                        losing_trades: row.get(6)?,
                        per_timeframe: serde_json::from_str::<
                            std::collections::HashMap<Timeframe, TimeframeDaily>,
                        >(&tf_json)
                        .unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    pub fn upsert_daily_performance(&self, row: &DailyPerformance) -> EngineResult<()> {
        let tf_json = serde_json::to_string(&row.per_timeframe).unwrap_or_default();
        self.with_retry("upsert_daily_performance", |conn| {
            conn.execute(
                "INSERT INTO sim_daily_performance
                   (simulation_id, date, starting_capital, ending_capital, daily_pnl,
                    daily_pnl_pct, total_trades, winning_trades, losing_trades, timeframe_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(simulation_id, date) DO UPDATE SET
                   ending_capital = excluded.ending_capital,
                   daily_pnl = excluded.daily_pnl,
                   daily_pnl_pct = excluded.daily_pnl_pct,
                   total_trades = excluded.total_trades,
                   winning_trades = excluded.winning_trades,
                   losing_trades = excluded.losing_trades,
                   timeframe_json = excluded.timeframe_json",
                params![
                    row.simulation_id,
                    row.date.to_string(),
                    row.starting_capital.to_string(),
                    row.ending_capital.to_string(),
                    row.daily_pnl.to_string(),
                    row.daily_pnl_pct,
                    row.total_trades,
                    row.winning_trades,
                    row.losing_trades,
                    tf_json,
                ],
            )
            .map(|_| ())
        })
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a bare enum tag (e.g. "BUY") via its serde representation.
fn parse_tag<T: DeserializeOwned>(s: &str) -> Option<T> {
    serde_json::from_str(&format!("\"{s}\"")).ok()
}

fn row_to_hybrid(row: &Row<'_>) -> rusqlite::Result<HybridAnalysisResult> {
    let timestamp: String = row.get("timestamp")?;
    let timeframe: String = row.get("timeframe")?;
    let gram_price: String = row.get("gram_price")?;
    let signal: String = row.get("signal")?;
    let strength: String = row.get("signal_strength")?;
    let position_size_json: String = row.get("position_size_json")?;
    let stop_loss: Option<String> = row.get("stop_loss")?;
    let take_profit: Option<String> = row.get("take_profit")?;
    let global_trend: String = row.get("global_trend")?;
    let global_strength: String = row.get("global_trend_strength")?;
    let risk: String = row.get("currency_risk_level")?;
    let recommendations_json: String = row.get("recommendations_json")?;
    let dip_json: String = row.get("dip_json")?;
    let gram_json: String = row.get("gram_json")?;
    let global_json: String = row.get("global_json")?;
    let currency_json: String = row.get("currency_json")?;
    let advanced_json: String = row.get("advanced_json")?;
    let confluence_json: Option<String> = row.get("confluence_json")?;

    let invalid = |field: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unparseable {field}").into(),
        )
    };

    Ok(HybridAnalysisResult {
        timestamp: parse_time(&timestamp),
        timeframe: Timeframe::parse(&timeframe).ok_or_else(|| invalid("timeframe"))?,
        gram_price: parse_decimal(&gram_price),
        signal: parse_tag(&signal).ok_or_else(|| invalid("signal"))?,
        signal_strength: parse_tag(&strength).ok_or_else(|| invalid("signal_strength"))?,
        confidence: row.get("confidence")?,
        position_size: serde_json::from_str(&position_size_json)
            .map_err(|_| invalid("position_size"))?,
        stop_loss: stop_loss.as_deref().map(parse_decimal),
        take_profit: take_profit.as_deref().map(parse_decimal),
        risk_reward_ratio: row.get("risk_reward_ratio")?,
        global_trend_direction: parse_tag(&global_trend).ok_or_else(|| invalid("global_trend"))?,
        global_trend_strength: parse_tag(&global_strength)
            .ok_or_else(|| invalid("global_trend_strength"))?,
        currency_risk_level: parse_tag(&risk).ok_or_else(|| invalid("currency_risk_level"))?,
        recommendations: serde_json::from_str(&recommendations_json).unwrap_or_default(),
        summary: row.get("summary")?,
        dip: serde_json::from_str(&dip_json).unwrap_or_default(),
        gram: serde_json::from_str(&gram_json).map_err(|_| invalid("gram_json"))?,
        global_trend: serde_json::from_str(&global_json).map_err(|_| invalid("global_json"))?,
        currency_risk: serde_json::from_str(&currency_json)
            .map_err(|_| invalid("currency_json"))?,
        advanced: serde_json::from_str(&advanced_json).map_err(|_| invalid("advanced_json"))?,
        confluence: confluence_json.and_then(|json| serde_json::from_str(&json).ok()),
    })
}

fn row_to_simulation(row: &Row<'_>) -> rusqlite::Result<Simulation> {
    let status: String = row.get("status")?;
    let current_capital: String = row.get("current_capital")?;
    let total_net_pnl: String = row.get("total_net_pnl")?;
    let start_date: String = row.get("start_date")?;
    let last_update: String = row.get("last_update")?;
    let config_json: String = row.get("config_json")?;

    let config: SimulationConfig = serde_json::from_str(&config_json).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            "unparseable config_json".into(),
        )
    })?;

    Ok(Simulation {
        id: row.get("id")?,
        config,
        status: SimulationStatus::parse(&status).unwrap_or(SimulationStatus::Paused),
        current_capital: parse_decimal(&current_capital),
        stats: SimulationStats {
            total_trades: row.get("total_trades")?,
            winning_trades: row.get("winning_trades")?,
            losing_trades: row.get("losing_trades")?,
            win_rate: row.get("win_rate")?,
            profit_factor: row.get("profit_factor")?,
            total_net_pnl: parse_decimal(&total_net_pnl),
            max_drawdown_pct: row.get("max_drawdown_pct")?,
            avg_win: row.get("avg_win")?,
            avg_loss: row.get("avg_loss")?,
        },
        start_date: parse_time(&start_date),
        last_update: parse_time(&last_update),
    })
}

fn row_to_position(row: &Row<'_>) -> rusqlite::Result<SimulationPosition> {
    let get_dec = |name: &str| -> rusqlite::Result<Decimal> {
        let s: String = row.get(name)?;
        Ok(parse_decimal(&s))
    };
    let get_opt_dec = |name: &str| -> rusqlite::Result<Option<Decimal>> {
        let s: Option<String> = row.get(name)?;
        Ok(s.as_deref().map(parse_decimal))
    };

    let timeframe: String = row.get("timeframe")?;
    let position_type: String = row.get("position_type")?;
    let status: String = row.get("status")?;
    let entry_time: String = row.get("entry_time")?;
    let exit_time: Option<String> = row.get("exit_time")?;
    let exit_reason: Option<String> = row.get("exit_reason")?;
    let entry_indicators: Option<String> = row.get("entry_indicators_json")?;
    let exit_indicators: Option<String> = row.get("exit_indicators_json")?;

    Ok(SimulationPosition {
        id: Some(row.get("id")?),
        simulation_id: row.get("simulation_id")?,
        timeframe: Timeframe::parse(&timeframe).unwrap_or(Timeframe::M15),
        position_type: PositionType::parse(&position_type).unwrap_or(PositionType::Long),
        status: PositionStatus::parse(&status).unwrap_or(PositionStatus::Closed),
        entry_time: parse_time(&entry_time),
        entry_price: get_dec("entry_price")?,
        entry_spread: get_dec("entry_spread")?,
        entry_commission: get_dec("entry_commission")?,
        position_size: get_dec("position_size")?,
        allocated_capital: get_dec("allocated_capital")?,
        risk_amount: get_dec("risk_amount")?,
        stop_loss: get_dec("stop_loss")?,
        take_profit: get_dec("take_profit")?,
        trailing_stop: get_opt_dec("trailing_stop")?,
        max_profit: get_dec("max_profit")?,
        exit_time: exit_time.as_deref().map(parse_time),
        exit_price: get_opt_dec("exit_price")?,
        exit_spread: get_opt_dec("exit_spread")?,
        exit_commission: get_opt_dec("exit_commission")?,
        exit_reason: exit_reason.as_deref().and_then(crate::simulation::position::ExitReason::parse),
        gross_pnl: get_opt_dec("gross_pnl")?,
        net_pnl: get_opt_dec("net_pnl")?,
        pnl_pct: row.get("pnl_pct")?,
        holding_period_minutes: row.get("holding_period_minutes")?,
        entry_confidence: row.get("entry_confidence")?,
        entry_indicators: entry_indicators.and_then(|s| serde_json::from_str(&s).ok()),
        exit_indicators: exit_indicators.and_then(|s| serde_json::from_str(&s).ok()),
    })
}
