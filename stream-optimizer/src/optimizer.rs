//! Per-tick orchestration of the three controllers
//!
//! Each tick feeds the sample to the bitrate controller and buffer manager,
//! reads the congestion window and emits one [`OptimizationDecision`] that is
//! appended to a bounded log. Every tenth decision is also logged as one
//! compact line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::bitrate::{BitrateController, NetworkState};
use crate::buffer::{BufferManager, BufferStats};
use crate::config::{BitrateConfig, OptimizerConfig};
use crate::congestion::{CongestionController, CongestionPhase, CongestionStats};
use crate::error::ControlError;
use crate::metrics;
use crate::sample::TelemetrySample;
use crate::window::SlidingWindow;

/// Every Nth decision is written to the log
const DECISION_LOG_INTERVAL: u64 = 10;

/// Control output for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationDecision {
    pub timestamp: DateTime<Utc>,
    pub optimal_bitrate: u64,
    pub congestion_window: u64,
    pub buffer_stats: BufferStats,
    pub network_state: NetworkState,
    pub congestion_state: CongestionPhase,
}

/// Session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub runtime_seconds: f64,
    pub total_bytes_sent: u64,
    pub final_bitrate: u64,
    pub network_state: NetworkState,
    pub buffer_stats: BufferStats,
    pub congestion: CongestionStats,
    /// Decisions produced over the whole session, including evicted ones
    pub decision_count: u64,
    pub recent_decisions: Vec<OptimizationDecision>,
}

#[derive(Debug)]
struct DecisionLog {
    entries: SlidingWindow<OptimizationDecision>,
    total: u64,
}

/// Transport optimizer for one stream session
#[derive(Debug)]
pub struct Optimizer {
    bitrate: BitrateController,
    buffer: BufferManager,
    congestion: CongestionController,
    session: String,
    started: Instant,
    total_bytes_sent: AtomicU64,
    recent_decisions: usize,
    log: Mutex<DecisionLog>,
}

impl Optimizer {
    /// Create an optimizer with default settings starting at `initial_bitrate`
    pub fn new(initial_bitrate: u64) -> Result<Self, ControlError> {
        Self::with_config(OptimizerConfig {
            bitrate: BitrateConfig::with_initial(initial_bitrate),
            ..OptimizerConfig::default()
        })
    }

    pub fn with_config(config: OptimizerConfig) -> Result<Self, ControlError> {
        config.validate()?;
        Ok(Self {
            bitrate: BitrateController::with_config(config.bitrate)?,
            buffer: BufferManager::with_config(config.buffer)?,
            congestion: CongestionController::with_config(config.congestion)?,
            session: config.session,
            started: Instant::now(),
            total_bytes_sent: AtomicU64::new(0),
            recent_decisions: config.recent_decisions,
            log: Mutex::new(DecisionLog {
                entries: SlidingWindow::new(config.decision_log),
                total: 0,
            }),
        })
    }

    /// Run one control tick.
    ///
    /// An invalid sample is rejected before any controller sees it and no
    /// decision is logged. Concurrent ticks are serialized on the decision
    /// log, so log order matches update order.
    pub fn tick(&self, sample: &TelemetrySample) -> Result<OptimizationDecision, ControlError> {
        let mut log = self.lock_log();

        let bitrate = self.bitrate.update(sample)?;
        let buffer_stats = self.buffer.update_level(sample.buffer_level);
        let congestion = self.congestion.stats();
        let decision = OptimizationDecision {
            timestamp: Utc::now(),
            optimal_bitrate: bitrate.current_bitrate,
            congestion_window: congestion.window,
            buffer_stats,
            network_state: bitrate.network_state,
            congestion_state: congestion.state,
        };

        log.entries.push(decision.clone());
        log.total += 1;
        if log.total % DECISION_LOG_INTERVAL == 0 {
            metrics::log_decision(&decision, &self.session);
        }
        tracing::debug!(
            tick = log.total,
            bitrate = decision.optimal_bitrate,
            cwnd = decision.congestion_window,
            buffer = decision.buffer_stats.current_size,
            "Decision recorded"
        );

        Ok(decision)
    }

    /// Add to the running count of bytes the transport has sent
    pub fn record_bytes_sent(&self, bytes: u64) {
        self.total_bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.total_bytes_sent.load(Ordering::Relaxed)
    }

    /// See [`BufferManager::should_drop_packets`]
    pub fn should_drop_packets(&self) -> bool {
        self.buffer.should_drop_packets()
    }

    /// Session label used in log lines
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn decision_count(&self) -> u64 {
        self.lock_log().total
    }

    pub fn latest_decision(&self) -> Option<OptimizationDecision> {
        self.lock_log().entries.latest().cloned()
    }

    /// All retained decisions, oldest first
    pub fn decisions(&self) -> Vec<OptimizationDecision> {
        self.lock_log().entries.iter().cloned().collect()
    }

    pub fn report(&self) -> OptimizationReport {
        let (decision_count, recent_decisions) = {
            let log = self.lock_log();
            let recent = log.entries.recent(self.recent_decisions).cloned().collect();
            (log.total, recent)
        };
        let bitrate = self.bitrate.snapshot();

        OptimizationReport {
            runtime_seconds: self.started.elapsed().as_secs_f64(),
            total_bytes_sent: self.total_bytes_sent(),
            final_bitrate: bitrate.current_bitrate,
            network_state: bitrate.network_state,
            buffer_stats: self.buffer.stats(),
            congestion: self.congestion.stats(),
            decision_count,
            recent_decisions,
        }
    }

    pub fn bitrate(&self) -> &BitrateController {
        &self.bitrate
    }

    pub fn buffer(&self) -> &BufferManager {
        &self.buffer
    }

    /// Congestion controller, driven by the transport's ACK/loss path
    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    fn lock_log(&self) -> MutexGuard<'_, DecisionLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Optimizer handle that can be cloned across threads and tasks.
///
/// The telemetry tick and the transport's ACK/loss events usually arrive on
/// different tasks; both go through the same handle.
#[derive(Debug, Clone)]
pub struct SharedOptimizer {
    inner: Arc<Optimizer>,
}

impl SharedOptimizer {
    pub fn new(optimizer: Optimizer) -> Self {
        Self {
            inner: Arc::new(optimizer),
        }
    }

    pub fn tick(&self, sample: &TelemetrySample) -> Result<OptimizationDecision, ControlError> {
        self.inner.tick(sample)
    }

    pub fn report(&self) -> OptimizationReport {
        self.inner.report()
    }

    pub fn record_bytes_sent(&self, bytes: u64) {
        self.inner.record_bytes_sent(bytes)
    }

    pub fn should_drop_packets(&self) -> bool {
        self.inner.should_drop_packets()
    }

    pub fn on_packet_loss(&self, is_timeout: bool) {
        self.inner.congestion.on_packet_loss(is_timeout)
    }

    pub fn on_ack_received(&self, bytes_acked: u64) {
        self.inner.congestion.on_ack_received(bytes_acked)
    }

    pub fn on_duplicate_ack(&self) -> bool {
        self.inner.congestion.on_duplicate_ack()
    }

    /// Access the underlying optimizer
    pub fn optimizer(&self) -> &Optimizer {
        &self.inner
    }
}

impl From<Optimizer> for SharedOptimizer {
    fn from(optimizer: Optimizer) -> Self {
        Self::new(optimizer)
    }
}
