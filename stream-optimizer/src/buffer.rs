//! Send-buffer occupancy tracking and hard backpressure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::BufferConfig;
use crate::error::ControlError;
use crate::window::{mean, SlidingWindow};

/// Low watermark as a fraction of capacity
const LOW_WATERMARK: f64 = 0.2;
/// High watermark as a fraction of capacity
const HIGH_WATERMARK: f64 = 0.8;
/// Levels averaged into the reported utilization
const UTILIZATION_SAMPLES: usize = 10;

/// Buffer occupancy classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    /// At or below the low watermark
    Low,
    #[default]
    Normal,
    /// At or above the high watermark
    High,
}

impl BufferState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Buffer snapshot included in every decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    pub current_size: u64,
    pub max_size: u64,
    pub state: BufferState,
    /// Mean of the most recent levels, 0 before any level is reported
    pub utilization: f64,
    pub drop_count: u64,
}

#[derive(Debug)]
struct Occupancy {
    current_size: u64,
    state: BufferState,
    drop_count: u64,
    levels: SlidingWindow<u64>,
    drops: SlidingWindow<DateTime<Utc>>,
}

/// Tracks the transport's send-buffer level and decides when to drop data
#[derive(Debug)]
pub struct BufferManager {
    max_size: u64,
    low_threshold: u64,
    high_threshold: u64,
    occupancy: Mutex<Occupancy>,
}

impl BufferManager {
    /// Create a manager for a buffer of `max_size` units
    pub fn new(max_size: u64) -> Result<Self, ControlError> {
        Self::with_config(BufferConfig::with_max_size(max_size))
    }

    pub fn with_config(config: BufferConfig) -> Result<Self, ControlError> {
        config.validate()?;
        let max = config.max_size as f64;
        Ok(Self {
            max_size: config.max_size,
            low_threshold: (max * LOW_WATERMARK) as u64,
            high_threshold: (max * HIGH_WATERMARK) as u64,
            occupancy: Mutex::new(Occupancy {
                current_size: 0,
                state: BufferState::Normal,
                drop_count: 0,
                levels: SlidingWindow::new(config.utilization_history),
                drops: SlidingWindow::new(config.drop_log),
            }),
        })
    }

    /// Record the current buffer level.
    ///
    /// Levels beyond capacity saturate at `max_size`. Returns the stats as of
    /// this update.
    pub fn update_level(&self, level: u64) -> BufferStats {
        let size = if level > self.max_size {
            tracing::debug!(level, max = self.max_size, "Buffer level above capacity, saturating");
            self.max_size
        } else {
            level
        };

        let state = if size <= self.low_threshold {
            BufferState::Low
        } else if size >= self.high_threshold {
            BufferState::High
        } else {
            BufferState::Normal
        };

        let mut occupancy = self.lock();
        if occupancy.state != state {
            tracing::debug!(
                from = occupancy.state.as_str(),
                to = state.as_str(),
                size,
                "Buffer state changed"
            );
        }
        occupancy.current_size = size;
        occupancy.state = state;
        occupancy.levels.push(size);
        self.stats_of(&occupancy)
    }

    /// Whether outgoing data must be dropped right now.
    ///
    /// Only a full buffer triggers a drop; each positive answer is counted.
    pub fn should_drop_packets(&self) -> bool {
        let mut occupancy = self.lock();
        if occupancy.current_size < self.max_size {
            return false;
        }

        occupancy.drop_count += 1;
        occupancy.drops.push(Utc::now());
        tracing::warn!(
            size = occupancy.current_size,
            drops = occupancy.drop_count,
            "Send buffer full, dropping"
        );
        true
    }

    pub fn stats(&self) -> BufferStats {
        self.stats_of(&self.lock())
    }

    fn stats_of(&self, occupancy: &Occupancy) -> BufferStats {
        BufferStats {
            current_size: occupancy.current_size,
            max_size: self.max_size,
            state: occupancy.state,
            utilization: mean(
                occupancy
                    .levels
                    .recent(UTILIZATION_SAMPLES)
                    .map(|&level| level as f64),
            )
            .unwrap_or(0.0),
            drop_count: occupancy.drop_count,
        }
    }

    pub fn state(&self) -> BufferState {
        self.lock().state
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Timestamps of the most recent drops, oldest first
    pub fn recent_drops(&self) -> Vec<DateTime<Utc>> {
        self.lock().drops.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Occupancy> {
        self.occupancy.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
