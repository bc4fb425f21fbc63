// =============================================================================
// Simulation Position — lifecycle state machine and PnL arithmetic
// =============================================================================
//
// OPEN -> CLOSED via exactly one exit reason; CANCELLED is reserved for
// pre-fill rejection (e.g. below minimum notional). Once CLOSED all exit
// fields are present and immutable.
//
// Economics are exact fixed-point:
//   gross = (exit - entry) * size          (inverted for SHORT)
//   net   = gross - entry_spread - entry_commission
//                 - exit_spread - exit_commission
//   net_grams = net / exit_price           (capital pools live in grams)
//   pct   = net / allocated_capital * 100
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionType {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl PositionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            _ => None,
        }
    }

    pub fn is_long(self) -> bool {
        matches!(self, Self::Long)
    }
}

impl std::fmt::Display for PositionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a position left the OPEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "STOP_LOSS")]
    StopLoss,
    #[serde(rename = "TAKE_PROFIT")]
    TakeProfit,
    #[serde(rename = "TRAILING_STOP")]
    TrailingStop,
    #[serde(rename = "REVERSE_SIGNAL")]
    ReverseSignal,
    #[serde(rename = "CONFIDENCE_DROP")]
    ConfidenceDrop,
    #[serde(rename = "TIME_LIMIT")]
    TimeLimit,
    #[serde(rename = "DAILY_LIMIT")]
    DailyLimit,
    #[serde(rename = "END_OF_DAY")]
    EndOfDay,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "STOP_LOSS",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TrailingStop => "TRAILING_STOP",
            Self::ReverseSignal => "REVERSE_SIGNAL",
            Self::ConfidenceDrop => "CONFIDENCE_DROP",
            Self::TimeLimit => "TIME_LIMIT",
            Self::DailyLimit => "DAILY_LIMIT",
            Self::EndOfDay => "END_OF_DAY",
            Self::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOP_LOSS" => Some(Self::StopLoss),
            "TAKE_PROFIT" => Some(Self::TakeProfit),
            "TRAILING_STOP" => Some(Self::TrailingStop),
            "REVERSE_SIGNAL" => Some(Self::ReverseSignal),
            "CONFIDENCE_DROP" => Some(Self::ConfidenceDrop),
            "TIME_LIMIT" => Some(Self::TimeLimit),
            "DAILY_LIMIT" => Some(Self::DailyLimit),
            "END_OF_DAY" => Some(Self::EndOfDay),
            "MANUAL" => Some(Self::Manual),
        _ => None,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One timeframe's slice of a simulation's capital. Mutated atomically at
/// position open and close; at most one OPEN position per pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeCapital {
    pub timeframe: Timeframe,
    pub allocated_capital: Decimal,
    pub current_capital: Decimal,
    pub in_position: bool,
    pub open_position_id: Option<i64>,
}

impl TimeframeCapital {
    pub fn new(timeframe: Timeframe, allocated: Decimal) -> Self {
        Self {
            timeframe,
            allocated_capital: allocated,
            current_capital: allocated,
            in_position: false,
            open_position_id: None,
        }
    }

    /// Apply a closed position's PnL (in grams) and release the pool.
    pub fn settle(&mut self, net_pnl_grams: Decimal) {
        self.current_capital += net_pnl_grams;
        self.in_position = false;
        self.open_position_id = None;
    }

    pub fn reserve(&mut self, position_id: i64) {
        self.in_position = true;
        self.open_position_id = Some(position_id);
    }
}

/// One simulated trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationPosition {
    pub id: Option<i64>,
    pub simulation_id: i64,
    pub timeframe: Timeframe,
    pub position_type: PositionType,
    pub status: PositionStatus,

    // Entry.
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub entry_spread: Decimal,
    pub entry_commission: Decimal,

    // Size and risk.
    /// Grams of gold.
    pub position_size: Decimal,
    /// Local-currency notional at entry.
    pub allocated_capital: Decimal,
    /// Grams at risk.
    pub risk_amount: Decimal,

    // Risk management.
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub trailing_stop: Option<Decimal>,
    /// Highest net PnL seen while open (local units).
    pub max_profit: Decimal,

    // Exit.
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_spread: Option<Decimal>,
    pub exit_commission: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,

    // Result.
    pub gross_pnl: Option<Decimal>,
    pub net_pnl: Option<Decimal>,
    pub pnl_pct: Option<f64>,
    pub holding_period_minutes: Option<i64>,

    // Analysis context.
    pub entry_confidence: f64,
    pub entry_indicators: Option<serde_json::Value>,
    pub exit_indicators: Option<serde_json::Value>,
}

/// Outcome of closing a position: what the pool and statistics consume.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    /// PnL converted to grams at the exit price.
    pub net_pnl_grams: Decimal,
    pub pnl_pct: f64,
}

impl SimulationPosition {
    /// Gross PnL (local units) at `price`, before costs.
    pub fn gross_pnl_at(&self, price: Decimal) -> Decimal {
        match self.position_type {
            PositionType::Long => (price - self.entry_price) * self.position_size,
            PositionType::Short => (self.entry_price - price) * self.position_size,
        }
    }

    /// Net unrealized PnL at `price`, assuming exit costs mirror entry.
    pub fn unrealized_net_pnl(&self, price: Decimal, commission_rate: Decimal) -> Decimal {
        let exit_commission = price * self.position_size * commission_rate;
        self.gross_pnl_at(price) - self.entry_spread - self.entry_commission
            - self.entry_spread
            - exit_commission
    }

    /// Whether the trailing stop should arm: unrealized gain has covered
    /// `activation` of the distance to TP.
    pub fn trailing_should_activate(&self, price: Decimal, activation: f64) -> bool {
        let (price_diff, target_diff) = match self.position_type {
            PositionType::Long => (price - self.entry_price, self.take_profit - self.entry_price),
            PositionType::Short => (self.entry_price - price, self.entry_price - self.take_profit),
        };

        if target_diff <= Decimal::ZERO {
            return false;
        }

        let progress = price_diff / target_diff;
        let activation = Decimal::try_from(activation).unwrap_or(Decimal::ONE);
        progress >= activation
    }

    /// Trailing level preserving `(1 - distance)` of the peak profit. The
    /// stop only ever ratchets toward price, never away.
    pub fn trailing_level(
        &mut self,
        price: Decimal,
        commission_rate: Decimal,
        distance: f64,
    ) -> Option<Decimal> {
        let net = self.unrealized_net_pnl(price, commission_rate);
        if net > self.max_profit {
            self.max_profit = net;
        }
        if self.max_profit <= Decimal::ZERO || self.position_size == Decimal::ZERO {
            return None;
        }

        let keep = Decimal::ONE - Decimal::try_from(distance).ok()?;
        let protected_profit = self.max_profit * keep;
        let offset = protected_profit / self.position_size;

        let candidate = match self.position_type {
            PositionType::Long => self.entry_price + offset,
            PositionType::Short => self.entry_price - offset,
        };

        match (self.position_type, self.trailing_stop) {
            (PositionType::Long, Some(current)) if candidate <= current => None,
            (PositionType::Short, Some(current)) if candidate >= current => None,
            _ => Some(candidate.round_dp(4)),
        }
    }

    /// Settle the position at `exit_price`. Returns the economics; the
    /// caller persists and updates the pool. A non-OPEN position returns
    /// `None` — CLOSED is terminal.
    pub fn close(
        &mut self,
        exit_time: DateTime<Utc>,
        exit_price: Decimal,
        exit_spread: Decimal,
        commission_rate: Decimal,
        reason: ExitReason,
        exit_indicators: Option<serde_json::Value>,
    ) -> Option<CloseOutcome> {
        if self.status != PositionStatus::Open {
            return None;
        }

        let exit_commission = (exit_price * self.position_size * commission_rate).round_dp(4);
        let gross = self.gross_pnl_at(exit_price).round_dp(4);
        let net =
            gross - self.entry_spread - self.entry_commission - exit_spread - exit_commission;

        let net_pnl_grams = if exit_price > Decimal::ZERO {
            (net / exit_price).round_dp(6)
        } else {
            Decimal::ZERO
        };

        let pnl_pct = if self.allocated_capital > Decimal::ZERO {
            (net / self.allocated_capital * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        self.status = PositionStatus::Closed;
        self.exit_time = Some(exit_time);
        self.exit_price = Some(exit_price);
        self.exit_spread = Some(exit_spread);
        self.exit_commission = Some(exit_commission);
        self.exit_reason = Some(reason);
        self.gross_pnl = Some(gross);
        self.net_pnl = Some(net);
        self.pnl_pct = Some(pnl_pct);
        self.holding_period_minutes =
            Some((exit_time - self.entry_time).num_minutes());
        self.exit_indicators = exit_indicators;

        Some(CloseOutcome {
            gross_pnl: gross,
            net_pnl: net,
            net_pnl_grams,
            pnl_pct,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn open_long(entry: Decimal, size: Decimal, sl: Decimal, tp: Decimal) -> SimulationPosition {
        SimulationPosition {
            id: Some(1),
            simulation_id: 1,
            timeframe: Timeframe::M15,
            position_type: PositionType::Long,
            status: PositionStatus::Open,
            entry_time: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
            entry_price: entry,
            entry_spread: Decimal::ZERO,
            entry_commission: Decimal::ZERO,
            position_size: size,
            allocated_capital: entry * size,
            risk_amount: dec!(5.0),
            stop_loss: sl,
            take_profit: tp,
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
        }
    }

    #[test]
    fn zero_fee_roundtrip_is_flat() {
        let mut pos = open_long(dec!(2000.0), dec!(1.0), dec!(1990.0), dec!(2020.0));
        let exit_time = pos.entry_time + Duration::minutes(30);
        let outcome = pos
            .close(
                exit_time,
                dec!(2000.0),
                Decimal::ZERO,
                Decimal::ZERO,
                ExitReason::Manual,
                None,
            )
            .unwrap();
        assert_eq!(outcome.gross_pnl, Decimal::ZERO);
        assert_eq!(outcome.net_pnl, Decimal::ZERO);
        assert_eq!(outcome.net_pnl_grams, Decimal::ZERO);
        assert_eq!(pos.holding_period_minutes, Some(30));
    }

    #[test]
    fn net_pnl_identity_holds_exactly() {
        let mut pos = open_long(dec!(2000.0), dec!(2.0), dec!(1990.0), dec!(2020.0));
        pos.entry_spread = dec!(2.0);
        pos.entry_commission = dec!(1.2);
        let outcome = pos
            .close(
                pos.entry_time + Duration::hours(1),
                dec!(2010.0),
                dec!(2.0),
                dec!(0.0003),
                ExitReason::TakeProfit,
                None,
            )
            .unwrap();

        let exit_commission = pos.exit_commission.unwrap();
        assert_eq!(
            outcome.net_pnl,
            outcome.gross_pnl - dec!(2.0) - dec!(1.2) - dec!(2.0) - exit_commission
        );
        assert_eq!(outcome.gross_pnl, dec!(20.0)); // (2010-2000)*2
    }

    #[test]
    fn short_gross_is_inverted() {
        let mut pos = open_long(dec!(2000.0), dec!(1.5), dec!(2010.0), dec!(1980.0));
        pos.position_type = PositionType::Short;
        let outcome = pos
            .close(
                pos.entry_time + Duration::hours(2),
                dec!(1990.0),
                Decimal::ZERO,
                Decimal::ZERO,
                ExitReason::TakeProfit,
                None,
            )
            .unwrap();
        assert_eq!(outcome.gross_pnl, dec!(15.0)); // (2000-1990)*1.5
    }

    #[test]
    fn closed_position_cannot_close_again() {
        let mut pos = open_long(dec!(2000.0), dec!(1.0), dec!(1990.0), dec!(2020.0));
        let t = pos.entry_time + Duration::minutes(5);
        assert!(pos
            .close(t, dec!(2005.0), Decimal::ZERO, Decimal::ZERO, ExitReason::Manual, None)
            .is_some());
        assert!(pos
            .close(t, dec!(2010.0), Decimal::ZERO, Decimal::ZERO, ExitReason::Manual, None)
            .is_none());
        assert_eq!(pos.exit_price, Some(dec!(2005.0)));
    }

    #[test]
    fn trailing_activates_exactly_at_threshold() {
        let pos = open_long(dec!(2000.0), dec!(1.0), dec!(1990.0), dec!(2020.0));
        // Activation 0.5 of (TP - entry) = 10 above entry.
        assert!(!pos.trailing_should_activate(dec!(2009.99), 0.5));
        assert!(pos.trailing_should_activate(dec!(2010.0), 0.5));
        assert!(pos.trailing_should_activate(dec!(2015.0), 0.5));
    }

    #[test]
    fn trailing_ratchets_up_never_down() {
        let mut pos = open_long(dec!(2000.0), dec!(1.0), dec!(1990.0), dec!(2020.0));
        let first = pos
            .trailing_level(dec!(2015.0), Decimal::ZERO, 0.3)
            .unwrap();
        pos.trailing_stop = Some(first);
        assert!(first > pos.entry_price);

        // Price retreats: no lower level is emitted.
        assert!(pos.trailing_level(dec!(2008.0), Decimal::ZERO, 0.3).is_none());

        // New high: the stop moves up.
        let second = pos
            .trailing_level(dec!(2019.0), Decimal::ZERO, 0.3)
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn pool_settles_in_grams() {
        let mut pool = TimeframeCapital::new(Timeframe::H1, dec!(250.0));
        pool.reserve(7);
        assert!(pool.in_position);
        pool.settle(dec!(0.5));
        assert_eq!(pool.current_capital, dec!(250.5));
        assert!(!pool.in_position);
        assert_eq!(pool.open_position_id, None);
    }

    #[test]
    fn pnl_pct_uses_allocated_capital() {
        let mut pos = open_long(dec!(2000.0), dec!(1.0), dec!(1990.0), dec!(2020.0));
        let outcome = pos
            .close(
                pos.entry_time + Duration::minutes(10),
                dec!(2020.0),
                Decimal::ZERO,
                Decimal::ZERO,
                ExitReason::TakeProfit,
                None,
            )
            .unwrap();
        // 20 profit on 2000 allocated = 1%.
        assert!((outcome.pnl_pct - 1.0).abs() < 1e-9);
    }
}
