//! Configuration types for the transport control loop
//!
//! Every field carries a serde default so a partial TOML file only needs to
//! name the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ControlError;

/// Bitrate controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitrateConfig {
    /// Starting bitrate in bits/sec (default: 3_000_000)
    #[serde(default = "default_initial_bitrate")]
    pub initial_bitrate: u64,

    /// Lower bound in bits/sec (default: 500_000)
    #[serde(default = "default_min_bitrate")]
    pub min_bitrate: u64,

    /// Upper bound in bits/sec (default: 8_000_000)
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate: u64,

    /// Weight kept on the current bitrate when moving toward the target (default: 0.8)
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,

    /// Samples kept for loss/RTT statistics (default: 100)
    #[serde(default = "default_stats_window")]
    pub stats_window: usize,

    /// Throughput samples kept for trend detection (default: 50)
    #[serde(default = "default_throughput_window")]
    pub throughput_window: usize,
}

fn default_initial_bitrate() -> u64 {
    3_000_000
}

fn default_min_bitrate() -> u64 {
    500_000
}

fn default_max_bitrate() -> u64 {
    8_000_000
}

fn default_smoothing() -> f64 {
    0.8
}

fn default_stats_window() -> usize {
    100
}

fn default_throughput_window() -> usize {
    50
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            initial_bitrate: default_initial_bitrate(),
            min_bitrate: default_min_bitrate(),
            max_bitrate: default_max_bitrate(),
            smoothing: default_smoothing(),
            stats_window: default_stats_window(),
            throughput_window: default_throughput_window(),
        }
    }
}

impl BitrateConfig {
    /// Default bounds with a caller-supplied starting bitrate
    pub fn with_initial(initial_bitrate: u64) -> Self {
        Self {
            initial_bitrate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if self.min_bitrate == 0 {
            return Err(invalid("min_bitrate must be greater than zero"));
        }
        if self.min_bitrate > self.max_bitrate {
            return Err(invalid(format!(
                "min_bitrate {} exceeds max_bitrate {}",
                self.min_bitrate, self.max_bitrate
            )));
        }
        if !(self.min_bitrate..=self.max_bitrate).contains(&self.initial_bitrate) {
            return Err(invalid(format!(
                "initial_bitrate {} outside [{}, {}]",
                self.initial_bitrate, self.min_bitrate, self.max_bitrate
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(invalid(format!(
                "smoothing {} outside [0, 1)",
                self.smoothing
            )));
        }
        // Detection needs 10 stats samples and 20 throughput samples.
        if self.stats_window < 10 {
            return Err(invalid("stats_window must hold at least 10 samples"));
        }
        if self.throughput_window < 20 {
            return Err(invalid("throughput_window must hold at least 20 samples"));
        }
        Ok(())
    }
}

/// Send-buffer manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Buffer capacity, same units as the reported buffer level (default: 1000)
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Levels kept for the utilization figure (default: 100)
    #[serde(default = "default_history")]
    pub utilization_history: usize,

    /// Drop timestamps kept (default: 100)
    #[serde(default = "default_history")]
    pub drop_log: usize,
}

fn default_max_size() -> u64 {
    1000
}

fn default_history() -> usize {
    100
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            utilization_history: default_history(),
            drop_log: default_history(),
        }
    }
}

impl BufferConfig {
    pub fn with_max_size(max_size: u64) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if self.max_size == 0 {
            return Err(invalid("max_size must be greater than zero"));
        }
        if self.utilization_history == 0 || self.drop_log == 0 {
            return Err(invalid("buffer histories must have non-zero capacity"));
        }
        Ok(())
    }
}

/// Congestion window configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionConfig {
    /// Starting congestion window (default: 1000)
    #[serde(default = "default_initial_window")]
    pub initial_window: f64,

    /// Starting slow-start threshold (default: 10000)
    #[serde(default = "default_initial_ssthresh")]
    pub initial_ssthresh: f64,

    /// Duplicate ACKs that trigger fast retransmit (default: 3)
    #[serde(default = "default_dup_ack_threshold")]
    pub dup_ack_threshold: u32,

    /// RTT samples kept for statistics (default: 100)
    #[serde(default = "default_history")]
    pub rtt_window: usize,
}

fn default_initial_window() -> f64 {
    1000.0
}

fn default_initial_ssthresh() -> f64 {
    10000.0
}

fn default_dup_ack_threshold() -> u32 {
    3
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            initial_window: default_initial_window(),
            initial_ssthresh: default_initial_ssthresh(),
            dup_ack_threshold: default_dup_ack_threshold(),
            rtt_window: default_history(),
        }
    }
}

impl CongestionConfig {
    pub fn new(initial_window: f64, initial_ssthresh: f64) -> Self {
        Self {
            initial_window,
            initial_ssthresh,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if !self.initial_window.is_finite() || self.initial_window < 1.0 {
            return Err(invalid(format!(
                "initial_window {} must be at least 1",
                self.initial_window
            )));
        }
        if !self.initial_ssthresh.is_finite() || self.initial_ssthresh < 2.0 {
            return Err(invalid(format!(
                "initial_ssthresh {} must be at least 2",
                self.initial_ssthresh
            )));
        }
        if self.dup_ack_threshold == 0 {
            return Err(invalid("dup_ack_threshold must be greater than zero"));
        }
        if self.rtt_window == 0 {
            return Err(invalid("rtt_window must have non-zero capacity"));
        }
        Ok(())
    }
}

/// Top-level optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub bitrate: BitrateConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub congestion: CongestionConfig,

    /// Decisions retained in memory (default: 1000)
    #[serde(default = "default_decision_log")]
    pub decision_log: usize,

    /// Decisions included in a report (default: 10)
    #[serde(default = "default_recent_decisions")]
    pub recent_decisions: usize,

    /// Session label in decision log lines (default: "stream")
    #[serde(default = "default_session")]
    pub session: String,
}

fn default_decision_log() -> usize {
    1000
}

fn default_recent_decisions() -> usize {
    10
}

fn default_session() -> String {
    "stream".to_string()
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            bitrate: BitrateConfig::default(),
            buffer: BufferConfig::default(),
            congestion: CongestionConfig::default(),
            decision_log: default_decision_log(),
            recent_decisions: default_recent_decisions(),
            session: default_session(),
        }
    }
}

impl OptimizerConfig {
    pub fn read_from_file(path: &Path) -> Result<Self, ControlError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        self.bitrate.validate()?;
        self.buffer.validate()?;
        self.congestion.validate()?;
        if self.decision_log == 0 {
            return Err(invalid("decision_log must have non-zero capacity"));
        }
        if self.recent_decisions == 0 {
            return Err(invalid("recent_decisions must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ControlError {
    ControlError::InvalidConfig(msg.into())
}
