// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the analysis engine.  Every tunable threshold
// of the signal pipeline lives here so that the engine can be reconfigured
// without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// Impossible values (confidence outside [0,1], inverted trading hours) are
// rejected by `validate()` at startup — the engine refuses to run on them.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_min_confidence_thresholds() -> HashMap<Timeframe, f64> {
    Timeframe::ALL
        .iter()
        .map(|&tf| (tf, tf.default_min_confidence()))
        .collect()
}

fn default_candle_requirements() -> HashMap<Timeframe, usize> {
    Timeframe::ALL
        .iter()
        .map(|&tf| (tf, tf.default_required_candles()))
        .collect()
}

fn default_analysis_intervals() -> HashMap<Timeframe, u32> {
    Timeframe::ALL
        .iter()
        .map(|&tf| (tf, tf.minutes()))
        .collect()
}

fn default_min_volatility_threshold() -> f64 {
    0.5
}

fn default_trend_mismatch_penalty() -> f64 {
    0.85
}

fn default_high_cost_confidence_multiplier() -> f64 {
    1.1
}

fn default_trading_hours() -> (u32, u32) {
    (9, 17)
}

fn default_candle_fill_ratio() -> f64 {
    0.6
}

fn default_tick_retention_days() -> u32 {
    30
}

fn default_database_path() -> String {
    "aurum.db".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the analysis engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Signal pipeline thresholds ------------------------------------------

    /// Minimum combiner confidence per timeframe for a directional signal.
    #[serde(default = "default_min_confidence_thresholds")]
    pub min_confidence_thresholds: HashMap<Timeframe, f64>,

    /// Minimum market volatility (percent) below which BUY/SELL converts to
    /// HOLD.
    #[serde(default = "default_min_volatility_threshold")]
    pub min_volatility_threshold: f64,

    /// Confidence multiplier applied when a signal disagrees with the global
    /// trend.
    #[serde(default = "default_trend_mismatch_penalty")]
    pub global_trend_mismatch_penalty: f64,

    /// Extra multiplier on the per-timeframe confidence floors, covering
    /// trading costs.
    #[serde(default = "default_high_cost_confidence_multiplier")]
    pub high_cost_confidence_multiplier: f64,

    // --- Candle materialization ----------------------------------------------

    /// Candles the hybrid pipeline wants per timeframe.
    #[serde(default = "default_candle_requirements")]
    pub candle_requirements: HashMap<Timeframe, usize>,

    /// Fraction of `candle_requirements` that must actually materialize
    /// before an analysis runs.
    #[serde(default = "default_candle_fill_ratio")]
    pub candle_fill_ratio: f64,

    /// Analysis cadence per timeframe, in minutes.
    #[serde(default = "default_analysis_intervals")]
    pub analysis_intervals: HashMap<Timeframe, u32>,

    // --- Simulation gating ---------------------------------------------------

    /// Local-time hours during which simulations may open positions.
    #[serde(default = "default_trading_hours")]
    pub trading_hours: (u32, u32),

    /// Whether the trading-hours window is enforced. Outside the window only
    /// SL/TP exits are evaluated.
    #[serde(default = "default_true")]
    pub enforce_trading_hours: bool,

    // --- Housekeeping --------------------------------------------------------

    /// Days of raw tick history kept in the store before pruning.
    #[serde(default = "default_tick_retention_days")]
    pub tick_retention_days: u32,

    /// SQLite database path.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            min_confidence_thresholds: default_min_confidence_thresholds(),
            min_volatility_threshold: default_min_volatility_threshold(),
            global_trend_mismatch_penalty: default_trend_mismatch_penalty(),
            high_cost_confidence_multiplier: default_high_cost_confidence_multiplier(),
            candle_requirements: default_candle_requirements(),
            candle_fill_ratio: default_candle_fill_ratio(),
            analysis_intervals: default_analysis_intervals(),
            trading_hours: default_trading_hours(),
            enforce_trading_hours: true,
            tick_retention_days: default_tick_retention_days(),
            database_path: default_database_path(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            enforce_trading_hours = config.enforce_trading_hours,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Reject impossible configurations. Called once at startup; a failure
    /// here is fatal.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (&tf, &threshold) in &self.min_confidence_thresholds {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EngineError::Config(format!(
                    "min confidence for {tf} out of [0,1]: {threshold}"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.global_trend_mismatch_penalty) {
            return Err(EngineError::Config(format!(
                "trend mismatch penalty out of [0,1]: {}",
                self.global_trend_mismatch_penalty
            )));
        }

        if self.min_volatility_threshold < 0.0 {
            return Err(EngineError::Config(format!(
                "negative volatility threshold: {}",
                self.min_volatility_threshold
            )));
        }

        let (start, end) = self.trading_hours;
        if start >= end || end > 24 {
            return Err(EngineError::Config(format!(
                "invalid trading hours: {start}..{end}"
            )));
        }

        if !(0.0..=1.0).contains(&self.candle_fill_ratio) || self.candle_fill_ratio == 0.0 {
            return Err(EngineError::Config(format!(
                "candle fill ratio out of (0,1]: {}",
                self.candle_fill_ratio
            )));
        }

        for &tf in &Timeframe::ALL {
            if self.candle_requirements.get(&tf).copied().unwrap_or(0) == 0 {
                return Err(EngineError::Config(format!(
                    "missing candle requirement for {tf}"
                )));
            }
            if self.analysis_intervals.get(&tf).copied().unwrap_or(0) == 0 {
                return Err(EngineError::Config(format!(
                    "missing analysis interval for {tf}"
                )));
            }
        }

        Ok(())
    }

    /// Minimum confidence floor for a timeframe, with the built-in default
    /// as fallback for partially-specified maps.
    pub fn min_confidence(&self, tf: Timeframe) -> f64 {
        self.min_confidence_thresholds
            .get(&tf)
            .copied()
            .unwrap_or_else(|| tf.default_min_confidence())
    }

    pub fn required_candles(&self, tf: Timeframe) -> usize {
        self.candle_requirements
            .get(&tf)
            .copied()
            .unwrap_or_else(|| tf.default_required_candles())
    }

    pub fn analysis_interval_minutes(&self, tf: Timeframe) -> u32 {
        self.analysis_intervals
            .get(&tf)
            .copied()
            .unwrap_or_else(|| tf.minutes())
    }

    /// Whether `hour` (local) is inside the trading window. Always true when
    /// enforcement is off.
    pub fn is_trading_hour(&self, hour: u32) -> bool {
        if !self.enforce_trading_hours {
            return true;
        }
        let (start, end) = self.trading_hours;
        (start..end).contains(&hour)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.trading_hours, (9, 17));
        assert!(cfg.enforce_trading_hours);
        assert!((cfg.min_volatility_threshold - 0.5).abs() < f64::EPSILON);
        assert!((cfg.global_trend_mismatch_penalty - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.required_candles(Timeframe::M15), 35);
        assert_eq!(cfg.required_candles(Timeframe::H1), 26);
        assert_eq!(cfg.analysis_interval_minutes(Timeframe::D1), 1440);
        assert!((cfg.min_confidence(Timeframe::H4) - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "min_volatility_threshold": 0.8, "trading_hours": [10, 16] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.min_volatility_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.trading_hours, (10, 16));
        assert!(cfg.enforce_trading_hours);
    }

    #[test]
    fn invalid_trading_hours_rejected() {
        let cfg = RuntimeConfig {
            trading_hours: (17, 9),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.min_confidence_thresholds.insert(Timeframe::M15, 1.4);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn trading_hour_gate() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.is_trading_hour(9));
        assert!(cfg.is_trading_hour(16));
        assert!(!cfg.is_trading_hour(17));
        assert!(!cfg.is_trading_hour(3));

        let open = RuntimeConfig {
            enforce_trading_hours: false,
            ..Default::default()
        };
        assert!(open.is_trading_hour(3));
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.trading_hours, cfg2.trading_hours);
        assert_eq!(
            cfg.required_candles(Timeframe::M15),
            cfg2.required_candles(Timeframe::M15)
        );
    }
}
