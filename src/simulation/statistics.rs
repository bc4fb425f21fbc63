// =============================================================================
// Simulation Statistics — aggregate and daily performance rows
// =============================================================================
//
// Recomputed from the closed-position history after every close:
//   win rate       winners / total
//   profit factor  sum(wins) / sum(|losses|)
//   drawdown       peak-to-trough on the gram equity curve, percent of peak
// =============================================================================

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::simulation::position::SimulationPosition;
use crate::types::Timeframe;

/// Cumulative statistics for one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimulationStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Local-currency net PnL across all closed trades.
    pub total_net_pnl: Decimal,
    pub max_drawdown_pct: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

impl SimulationStats {
    /// Rebuild from the full closed-position history (oldest first).
    pub fn compute(initial_capital_grams: Decimal, closed: &[SimulationPosition]) -> Self {
        let mut wins = 0u32;
        let mut losses = 0u32;
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;
        let mut total_net = Decimal::ZERO;

        for position in closed {
            let net = position.net_pnl.unwrap_or(Decimal::ZERO);
            total_net += net;
            if net > Decimal::ZERO {
                wins += 1;
                gross_profit += net;
            } else if net < Decimal::ZERO {
                losses += 1;
                gross_loss += -net;
            } else {
                // Flat trades count against the win rate but not the factor.
                losses += 1;
            }
        }

        let total = closed.len() as u32;
        let win_rate = if total > 0 {
            f64::from(wins) / f64::from(total)
        } else {
            0.0
        };

        let profit_factor = if gross_loss > Decimal::ZERO {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        } else if gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if wins > 0 {
            (gross_profit / Decimal::from(wins)).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        let avg_loss = if losses > 0 {
            (gross_loss / Decimal::from(losses)).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        Self {
            total_trades: total,
            winning_trades: wins,
            losing_trades: losses,
            win_rate,
            profit_factor,
            total_net_pnl: total_net.round_dp(4),
            max_drawdown_pct: max_drawdown_pct(initial_capital_grams, closed),
            avg_win,
            avg_loss,
        }
    }
}

/// Peak-to-trough drawdown on the gram-denominated equity curve.
fn max_drawdown_pct(initial_capital_grams: Decimal, closed: &[SimulationPosition]) -> f64 {
    let mut equity = initial_capital_grams;
    let mut peak = equity;
    let mut max_drawdown = 0.0_f64;

    for position in closed {
        let net = position.net_pnl.unwrap_or(Decimal::ZERO);
        let exit_price = position.exit_price.unwrap_or(Decimal::ZERO);
        let net_grams = if exit_price > Decimal::ZERO {
            net / exit_price
        } else {
            Decimal::ZERO
        };
        equity += net_grams;

        if equity > peak {
            peak = equity;
        } else if peak > Decimal::ZERO {
            let drawdown = ((peak - equity) / peak * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0);
            max_drawdown = max_drawdown.max(drawdown);
        }
    }

    max_drawdown
}

/// Per-timeframe slice of a daily row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeframeDaily {
    pub trades: u32,
    pub pnl: Decimal,
}

/// One `(simulation, date)` performance row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPerformance {
    pub simulation_id: i64,
    pub date: NaiveDate,
    /// Grams at the start of the day.
    pub starting_capital: Decimal,
    pub ending_capital: Decimal,
    /// Local-currency net PnL realized today.
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub per_timeframe: HashMap<Timeframe, TimeframeDaily>,
}

impl DailyPerformance {
    pub fn new(simulation_id: i64, date: NaiveDate, starting_capital: Decimal) -> Self {
        Self {
            simulation_id,
            date,
            starting_capital,
            ending_capital: starting_capital,
            daily_pnl: Decimal::ZERO,
            daily_pnl_pct: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            per_timeframe: HashMap::new(),
        }
    }

    /// Fold one closed trade into the row.
    pub fn record_close(
        &mut self,
        timeframe: Timeframe,
        net_pnl: Decimal,
        net_pnl_grams: Decimal,
        ending_capital: Decimal,
    ) {
        self.total_trades += 1;
        if net_pnl > Decimal::ZERO {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
        self.daily_pnl += net_pnl;
        self.ending_capital = ending_capital;

        let _ = net_pnl_grams; // grams are already folded into ending_capital

        if self.starting_capital > Decimal::ZERO {
            // Percent against the gram capital converted at each exit is the
            // sum of per-trade percentages; keep it simple and exact: pnl in
            // grams over starting grams.
            let gram_change = self.ending_capital - self.starting_capital;
            self.daily_pnl_pct = (gram_change / self.starting_capital * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0);
        }

        let slot = self.per_timeframe.entry(timeframe).or_default();
        slot.trades += 1;
        slot.pnl += net_pnl;
    }
}
