// =============================================================================
// Signal Gate — entry filters and ordered exit checks
// =============================================================================
//
// Entry: a layered gate where any layer can veto with a reason —
//   1. directional signal present
//   2. confidence above the strategy's floor (CONSERVATIVE floor x1.5)
//   3. strategy family filter (MOMENTUM wants RSI outside 30-70,
//      MEAN_REVERSION wants price outside the Bollinger bands)
//   4. daily-loss guard (realized daily PnL under the configured limit)
//
// Exit conditions are evaluated in a fixed order; the first match wins:
//   stop-loss, take-profit, trailing stop, reverse signal, confidence drop
//   below 0.4, holding-time limit. SL/TP/trailing close at the level, the
//   rest at the current price.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::hybrid::HybridAnalysisResult;
use crate::indicators::bollinger::BandPosition;
use crate::simulation::config::{SimulationConfig, StrategyType};
use crate::simulation::position::{ExitReason, SimulationPosition};

/// Confidence under which an open position is abandoned.
const CONFIDENCE_EXIT_FLOOR: f64 = 0.4;

#[derive(Default)]
pub struct SignalGate;

impl SignalGate {
    /// `daily_pnl_pct` is today's realized PnL percent, when a daily row
    /// exists. Returns the blocking reason, or `None` to open.
    pub fn should_open(
        &self,
        config: &SimulationConfig,
        result: &HybridAnalysisResult,
        daily_pnl_pct: Option<f64>,
    ) -> Option<String> {
        if !result.signal.is_directional() {
            return Some("no directional signal".to_string());
        }

        let floor = config.effective_min_confidence();
        if result.confidence < floor {
            return Some(format!(
                "confidence {:.3} below floor {:.3}",
                result.confidence, floor
            ));
        }

        if let Some(reason) = self.strategy_filter(config, result) {
            return Some(reason);
        }

        // Daily-loss guard.
        let daily_limit = -(config.max_daily_risk * 100.0);
        if let Some(pct) = daily_pnl_pct {
            if pct <= daily_limit {
                return Some(format!(
                    "daily loss limit reached ({pct:.2}% <= {daily_limit:.2}%)"
                ));
            }
        }

        None
    }

    fn strategy_filter(
        &self,
        config: &SimulationConfig,
        result: &HybridAnalysisResult,
    ) -> Option<String> {
        match config.strategy_type {
            StrategyType::Main | StrategyType::HighCostMain => None,
            // CONSERVATIVE is handled by the raised confidence floor.
            StrategyType::Conservative => None,
            StrategyType::Momentum => {
                let rsi = result.gram.indicators.rsi.map(|r| r.value);
                match rsi {
                    Some(rsi) if !(30.0..=70.0).contains(&rsi) => None,
                    Some(rsi) => Some(format!("momentum filter: RSI {rsi:.1} inside 30-70")),
                    None => Some("momentum filter: RSI unavailable".to_string()),
                }
            }
            StrategyType::MeanReversion => {
                let position = result
                    .gram
                    .indicators
                    .bollinger
                    .as_ref()
                    .map(|b| b.position);
                match position {
                    Some(BandPosition::AboveUpper | BandPosition::BelowLower) => None,
                    Some(_) => Some("mean-reversion filter: price inside bands".to_string()),
                    None => Some("mean-reversion filter: bands unavailable".to_string()),
                }
            }
        }
    }

    /// Full exit evaluation. Returns `(reason, exit_price)` for the first
    /// matching condition.
    pub fn check_exit(
        &self,
        position: &SimulationPosition,
        current_price: Decimal,
        latest: Option<&HybridAnalysisResult>,
        config: &SimulationConfig,
        now: DateTime<Utc>,
    ) -> Option<(ExitReason, Decimal)> {
        if let Some(exit) = self.check_levels(position, current_price) {
            return Some(exit);
        }

        let is_long = position.position_type.is_long();

        // Reverse signal from the strategy.
        if let Some(latest) = latest {
            if latest.reverses(is_long) {
                return Some((ExitReason::ReverseSignal, current_price));
            }

            // Confidence collapse.
            if latest.confidence < CONFIDENCE_EXIT_FLOOR {
                return Some((ExitReason::ConfidenceDrop, current_price));
            }
        }

        // Holding-time limit.
        let limit_hours = i64::from(config.time_limit_hours(position.timeframe));
        let held_minutes = (now - position.entry_time).num_minutes();
        if held_minutes >= limit_hours * 60 {
            return Some((ExitReason::TimeLimit, current_price));
        }

        None
    }

    /// SL / TP / trailing only — the outside-trading-hours check.
    pub fn check_levels(
        &self,
        position: &SimulationPosition,
        current_price: Decimal,
    ) -> Option<(ExitReason, Decimal)> {
        let is_long = position.position_type.is_long();

        let sl_hit = if is_long {
            current_price <= position.stop_loss
        } else {
            current_price >= position.stop_loss
        };
        if sl_hit {
            return Some((ExitReason::StopLoss, position.stop_loss));
        }

        let tp_hit = if is_long {
            current_price >= position.take_profit
        } else {
            current_price <= position.take_profit
        };
        if tp_hit {
            return Some((ExitReason::TakeProfit, position.take_profit));
        }

        if let Some(trail) = position.trailing_stop {
            let trail_hit = if is_long {
                current_price <= trail
            } else {
                current_price >= trail
            };
            if trail_hit {
                return Some((ExitReason::TrailingStop, trail));
            }
        }

        None
    }

    /// Arm or ratchet the trailing stop. Returns the new level when it
    /// changed; the caller persists it.
    pub fn update_trailing(
        &self,
        position: &mut SimulationPosition,
        current_price: Decimal,
        config: &SimulationConfig,
    ) -> Option<Decimal> {
        if !position.trailing_should_activate(current_price, config.trailing_stop_activation) {
            return None;
        }

        let commission_rate = Decimal::try_from(config.commission_rate).ok()?;
        let level =
            position.trailing_level(current_price, commission_rate, config.trailing_stop_distance)?;
        position.trailing_stop = Some(level);
        Some(level)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::advanced::AdvancedAnalysis;
    use crate::analyzers::currency_risk::CurrencyRiskAnalysis;
    use crate::analyzers::global_trend::{
        GlobalTrendAnalysis, IndicatorSignal, IndicatorVerdict, Momentum, MomentumSignal,
        Volatility, VolatilityBand,
    };
    use crate::analyzers::gram::{GramAnalysis, GramIndicators, RsiDivergence};
    use crate::hybrid::combiner::{DipAnalysis, PositionSizeSuggestion};
    use crate::indicators::patterns::PatternReport;
    use crate::indicators::rsi::{RsiReading, RsiZone};
    use crate::simulation::position::{PositionStatus, PositionType};
    use crate::types::{RiskLevel, Signal, SignalStrength, Timeframe, TrendDirection, TrendStrength};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn result(signal: Signal, confidence: f64, rsi: Option<f64>) -> HybridAnalysisResult {
        let gram = GramAnalysis {
            price: dec!(2000.0),
            trend: TrendDirection::Neutral,
            trend_strength: TrendStrength::Weak,
            indicators: GramIndicators {
                rsi: rsi.map(|value| RsiReading {
                    value,
                    zone: RsiZone::Neutral,
                }),
                ..GramIndicators::default()
            },
            patterns: PatternReport::default(),
            support_levels: Vec::new(),
            resistance_levels: Vec::new(),
            rsi_divergence: RsiDivergence::default(),
            signal,
            confidence,
            stop_loss: None,
            take_profit: None,
            degraded: false,
        };

        HybridAnalysisResult {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
            timeframe: Timeframe::M15,
            gram_price: dec!(2000.0),
            signal,
            signal_strength: SignalStrength::Moderate,
            confidence,
            position_size: PositionSizeSuggestion::default(),
            stop_loss: None,
            take_profit: None,
            risk_reward_ratio: None,
            global_trend_direction: TrendDirection::Neutral,
            global_trend_strength: TrendStrength::Weak,
            currency_risk_level: RiskLevel::Medium,
            recommendations: Vec::new(),
            summary: String::new(),
            dip: DipAnalysis::default(),
            gram,
            global_trend: GlobalTrendAnalysis {
                ons_usd_price: dec!(2000.0),
                trend_direction: TrendDirection::Neutral,
                trend_strength: TrendStrength::Weak,
                ma20: None,
                ma50: None,
                ma200: None,
                momentum: Momentum {
                    roc_10: None,
                    roc_20: None,
                    signal: MomentumSignal::Neutral,
                },
                volatility: Volatility {
                    daily: 0.5,
                    annualized: 8.0,
                    level: VolatilityBand::Low,
                },
                key_levels: None,
                indicator_signal: IndicatorSignal {
                    verdict: IndicatorVerdict::Neutral,
                    confidence: 0.5,
                    buy_count: 0,
                    sell_count: 0,
                    neutral_count: 4,
                },
            },
            currency_risk: CurrencyRiskAnalysis {
                risk_level: RiskLevel::Medium,
                volatility: 0.2,
                window_change_pct: 0.0,
            },
            advanced: AdvancedAnalysis {
                cci: None,
                mfi: None,
                rsi: None,
                combined_signal: Signal::Hold,
                combined_confidence: 0.0,
            },
            confluence: None,
        }
    }

    fn long_position() -> SimulationPosition {
        SimulationPosition {
            id: Some(1),
            simulation_id: 1,
            timeframe: Timeframe::M15,
            position_type: PositionType::Long,
            status: PositionStatus::Open,
            entry_time: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
            entry_price: dec!(2000.0),
            entry_spread: dec!(2.0),
            entry_commission: dec!(1.0),
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
        }
    }

    // ---- should_open -----------------------------------------------------

    #[test]
    fn hold_signal_is_blocked() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t");
        let block = gate.should_open(&config, &result(Signal::Hold, 0.9, None), None);
        assert!(block.is_some());
    }

    #[test]
    fn low_confidence_is_blocked() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t"); // floor 0.35
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.30, None), None)
            .is_some());
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.40, None), None)
            .is_none());
    }

    #[test]
    fn conservative_floor_is_raised() {
        let gate = SignalGate;
        let config = SimulationConfig {
            strategy_type: StrategyType::Conservative,
            min_confidence: 0.35,
            ..SimulationConfig::main("c")
        };
        // Effective floor 0.525.
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.50, None), None)
            .is_some());
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.55, None), None)
            .is_none());
    }

    #[test]
    fn momentum_needs_rsi_extreme() {
        let gate = SignalGate;
        let config = SimulationConfig {
            strategy_type: StrategyType::Momentum,
            ..SimulationConfig::main("m")
        };
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.8, Some(50.0)), None)
            .is_some());
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.8, Some(25.0)), None)
            .is_none());
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.8, Some(75.0)), None)
            .is_none());
    }

    #[test]
    fn daily_loss_guard_blocks() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t"); // max_daily_risk 0.02 => -2%
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.8, None), Some(-2.5))
            .is_some());
        assert!(gate
            .should_open(&config, &result(Signal::Buy, 0.8, None), Some(-1.0))
            .is_none());
    }

    // ---- exits -----------------------------------------------------------

    #[test]
    fn stop_loss_closes_at_level() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t");
        let position = long_position();
        let now = position.entry_time + Duration::minutes(10);

        let (reason, price) = gate
            .check_exit(&position, dec!(1989.0), None, &config, now)
            .unwrap();
        assert_eq!(reason, ExitReason::StopLoss);
        assert_eq!(price, dec!(1990.0));
    }

    #[test]
    fn take_profit_closes_at_level() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t");
        let position = long_position();
        let now = position.entry_time + Duration::minutes(10);

        let (reason, price) = gate
            .check_exit(&position, dec!(2021.0), None, &config, now)
            .unwrap();
        assert_eq!(reason, ExitReason::TakeProfit);
        assert_eq!(price, dec!(2020.0));
    }

    #[test]
    fn stop_loss_outranks_reverse_signal() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t");
        let position = long_position();
        let now = position.entry_time + Duration::minutes(10);
        let reverse = result(Signal::Sell, 0.9, None);

        let (reason, _) = gate
            .check_exit(&position, dec!(1989.0), Some(&reverse), &config, now)
            .unwrap();
        assert_eq!(reason, ExitReason::StopLoss);
    }

    #[test]
    fn reverse_signal_closes_at_market() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t");
        let position = long_position();
        let now = position.entry_time + Duration::minutes(10);
        let reverse = result(Signal::Sell, 0.9, None);

        let (reason, price) = gate
            .check_exit(&position, dec!(2005.0), Some(&reverse), &config, now)
            .unwrap();
        assert_eq!(reason, ExitReason::ReverseSignal);
        assert_eq!(price, dec!(2005.0));
    }

    #[test]
    fn confidence_drop_closes() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t");
        let position = long_position();
        let now = position.entry_time + Duration::minutes(10);
        let weak = result(Signal::Hold, 0.35, None);

        let (reason, _) = gate
            .check_exit(&position, dec!(2005.0), Some(&weak), &config, now)
            .unwrap();
        assert_eq!(reason, ExitReason::ConfidenceDrop);
    }

    #[test]
    fn time_limit_closes() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t"); // 15m limit = 4h
        let position = long_position();
        let now = position.entry_time + Duration::hours(4);
        let steady = result(Signal::Buy, 0.8, None);

        let (reason, _) = gate
            .check_exit(&position, dec!(2005.0), Some(&steady), &config, now)
            .unwrap();
        assert_eq!(reason, ExitReason::TimeLimit);
    }

    #[test]
    fn no_exit_when_everything_holds() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t");
        let position = long_position();
        let now = position.entry_time + Duration::minutes(30);
        let steady = result(Signal::Buy, 0.8, None);

        assert!(gate
            .check_exit(&position, dec!(2005.0), Some(&steady), &config, now)
            .is_none());
    }

    #[test]
    fn trailing_armed_then_triggers() {
        let gate = SignalGate;
        let config = SimulationConfig::main("t"); // activation 0.5, distance 0.3
        let mut position = long_position();
        position.entry_spread = Decimal::ZERO;
        position.entry_commission = Decimal::ZERO;

        // Not yet at 50% of the way to TP: no trail.
        assert!(gate
            .update_trailing(&mut position, dec!(2005.0), &config)
            .is_none());

        // Beyond activation: trail arms above entry.
        let level = gate
            .update_trailing(&mut position, dec!(2015.0), &config)
            .unwrap();
        assert!(level > position.entry_price);

        // Price falls back onto the trail: level exit fires.
        let (reason, price) = gate.check_levels(&position, level).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
        assert_eq!(price, level);
    }
}
