//! Serializable session configuration with validation.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use deskrun_core::PipelineConfig;

use crate::market_hours;

/// Hard cap on concurrent ticker workers.
pub const MAX_PARALLEL_LIMIT: usize = 10;

/// How the driver schedules batches over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One batch, then back to idle.
    Single,
    /// Repeat batches on a fixed interval until stopped.
    Loop,
    /// Repeat batches, but only launch inside configured market-hour
    /// windows on trading days.
    MarketHours,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunMode::Single => "single",
            RunMode::Loop => "loop",
            RunMode::MarketHours => "market_hours",
        };
        f.write_str(name)
    }
}

/// Stagger jitter applied before each ticker start, spreading API load
/// across the batch. A scheduling courtesy, not a correctness mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaggerRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for StaggerRange {
    fn default() -> Self {
        Self {
            min_ms: 100,
            max_ms: 500,
        }
    }
}

/// Full configuration for one run session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Concurrent ticker workers (1-10).
    pub max_parallel: usize,
    /// Seconds between loop-mode iterations.
    pub loop_interval_secs: u64,
    /// Times of day that gate market-hours iterations.
    pub market_hour_windows: Vec<NaiveTime>,
    /// How long after a window opens an iteration may still launch.
    pub window_tolerance_mins: i64,
    pub stagger: StaggerRange,
    /// Per-ticker pipeline settings (analysts, rounds, auto-execute...).
    pub pipeline: PipelineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            loop_interval_secs: 3_600,
            market_hour_windows: Vec::new(),
            window_tolerance_mins: 5,
            stagger: StaggerRange::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(raw)?;
        config.validate(None)?;
        Ok(config)
    }

    /// Validate the config, including mode-specific requirements when the
    /// mode is known.
    pub fn validate(&self, mode: Option<RunMode>) -> Result<(), ConfigError> {
        if self.max_parallel < 1 || self.max_parallel > MAX_PARALLEL_LIMIT {
            return Err(ConfigError::MaxParallelOutOfRange {
                value: self.max_parallel,
            });
        }
        if self.stagger.min_ms > self.stagger.max_ms {
            return Err(ConfigError::InvalidStagger {
                min_ms: self.stagger.min_ms,
                max_ms: self.stagger.max_ms,
            });
        }
        if self.window_tolerance_mins < 1 {
            return Err(ConfigError::InvalidTolerance {
                value: self.window_tolerance_mins,
            });
        }
        if self.pipeline.analysts.is_empty() {
            return Err(ConfigError::NoAnalysts);
        }
        if self.pipeline.debate_rounds < 1 || self.pipeline.risk_rounds < 1 {
            return Err(ConfigError::InvalidRounds {
                debate: self.pipeline.debate_rounds,
                risk: self.pipeline.risk_rounds,
            });
        }
        if self.pipeline.order_notional <= 0.0 {
            return Err(ConfigError::InvalidNotional {
                value: self.pipeline.order_notional,
            });
        }
        for &window in &self.market_hour_windows {
            if window < market_hours::market_open() || window > market_hours::market_close() {
                return Err(ConfigError::InvalidWindow {
                    window: window.format("%H:%M").to_string(),
                    reason: "outside regular trading hours (9:30-16:00)".to_string(),
                });
            }
        }
        match mode {
            Some(RunMode::Loop) if self.loop_interval_secs == 0 => {
                Err(ConfigError::InvalidInterval)
            }
            Some(RunMode::MarketHours) if self.market_hour_windows.is_empty() => {
                Err(ConfigError::NoWindows)
            }
            _ => Ok(()),
        }
    }
}

/// Rejected session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_parallel must be 1-{MAX_PARALLEL_LIMIT}, got {value}")]
    MaxParallelOutOfRange { value: usize },
    #[error("loop_interval_secs must be positive in loop mode")]
    InvalidInterval,
    #[error("market-hours mode requires at least one window")]
    NoWindows,
    #[error("invalid market-hour window '{window}': {reason}")]
    InvalidWindow { window: String, reason: String },
    #[error("window tolerance must be at least 1 minute, got {value}")]
    InvalidTolerance { value: i64 },
    #[error("stagger range is inverted: min {min_ms}ms > max {max_ms}ms")]
    InvalidStagger { min_ms: u64, max_ms: u64 },
    #[error("at least one analyst must be selected")]
    NoAnalysts,
    #[error("debate/risk rounds must be at least 1, got {debate}/{risk}")]
    InvalidRounds { debate: u32, risk: u32 },
    #[error("order notional must be positive, got {value}")]
    InvalidNotional { value: f64 },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
