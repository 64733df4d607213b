//! Reno-style congestion window state machine
//!
//! Driven by delivery events (ACKs, duplicate ACKs, losses) from the transport
//! rather than by the periodic telemetry tick. The window is advisory: the
//! optimizer reports it next to the bitrate but never feeds it back into the
//! bitrate bounds.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::CongestionConfig;
use crate::error::ControlError;
use crate::window::{mean, SlidingWindow};

/// Slow-start threshold floor
const MIN_SSTHRESH: f64 = 2.0;
/// Segments added on entering fast recovery (the three duplicate ACKs)
const FAST_RECOVERY_INFLATION: f64 = 3.0;

/// Congestion control phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CongestionPhase {
    #[default]
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

impl CongestionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SlowStart => "slow_start",
            Self::CongestionAvoidance => "congestion_avoidance",
            Self::FastRecovery => "fast_recovery",
        }
    }
}

/// Congestion controller snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionStats {
    pub window: u64,
    pub slow_start_threshold: f64,
    pub state: CongestionPhase,
    /// Retransmission timeouts
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    pub bytes_acked: u64,
    pub mean_rtt_ms: Option<f64>,
    pub min_rtt_ms: Option<f64>,
}

#[derive(Debug)]
struct WindowState {
    window: f64,
    ssthresh: f64,
    phase: CongestionPhase,
    retransmissions: u64,
    fast_retransmits: u64,
    bytes_acked: u64,
    duplicate_acks: u32,
    rtt_samples: SlidingWindow<f64>,
}

impl WindowState {
    fn on_loss(&mut self, is_timeout: bool) {
        self.ssthresh = (self.window / 2.0).floor().max(MIN_SSTHRESH);
        self.duplicate_acks = 0;

        if is_timeout {
            self.window = 1.0;
            self.retransmissions += 1;
            self.enter(CongestionPhase::SlowStart);
        } else {
            self.window = self.ssthresh + FAST_RECOVERY_INFLATION;
            self.fast_retransmits += 1;
            self.enter(CongestionPhase::FastRecovery);
        }
    }

    fn enter(&mut self, phase: CongestionPhase) {
        if self.phase != phase {
            tracing::info!(
                from = self.phase.as_str(),
                to = phase.as_str(),
                cwnd = self.window,
                ssthresh = self.ssthresh,
                "Congestion phase changed"
            );
        }
        self.phase = phase;
    }
}

/// Congestion window controller for one stream session
#[derive(Debug)]
pub struct CongestionController {
    dup_ack_threshold: u32,
    state: Mutex<WindowState>,
}

impl CongestionController {
    pub fn new() -> Self {
        let config = CongestionConfig::default();
        Self::build(&config)
    }

    pub fn with_config(config: CongestionConfig) -> Result<Self, ControlError> {
        config.validate()?;
        Ok(Self::build(&config))
    }

    fn build(config: &CongestionConfig) -> Self {
        Self {
            dup_ack_threshold: config.dup_ack_threshold,
            state: Mutex::new(WindowState {
                window: config.initial_window,
                ssthresh: config.initial_ssthresh,
                phase: CongestionPhase::SlowStart,
                retransmissions: 0,
                fast_retransmits: 0,
                bytes_acked: 0,
                duplicate_acks: 0,
                rtt_samples: SlidingWindow::new(config.rtt_window),
            }),
        }
    }

    /// Handle a loss signal.
    ///
    /// A timeout collapses the window to 1 and restarts slow start; otherwise
    /// the loss is a fast retransmit and the controller enters fast recovery.
    pub fn on_packet_loss(&self, is_timeout: bool) {
        self.lock().on_loss(is_timeout);
    }

    /// Handle a new cumulative ACK.
    ///
    /// The window grows per ACK, not per byte; `bytes_acked` only feeds the
    /// delivered-bytes counter.
    pub fn on_ack_received(&self, bytes_acked: u64) {
        let mut state = self.lock();
        state.bytes_acked = state.bytes_acked.saturating_add(bytes_acked);
        state.duplicate_acks = 0;

        match state.phase {
            CongestionPhase::SlowStart => {
                state.window += 1.0;
                if state.window >= state.ssthresh {
                    state.enter(CongestionPhase::CongestionAvoidance);
                }
            }
            CongestionPhase::CongestionAvoidance => {
                // Roughly one segment per round trip
                state.window += 1.0 / state.window;
            }
            CongestionPhase::FastRecovery => {
                state.window = state.ssthresh;
                state.enter(CongestionPhase::CongestionAvoidance);
            }
        }
    }

    /// Count a duplicate ACK, entering fast retransmit at the threshold.
    ///
    /// Returns true when this ACK triggered the fast retransmit.
    pub fn on_duplicate_ack(&self) -> bool {
        let mut state = self.lock();
        if state.phase == CongestionPhase::FastRecovery {
            return false;
        }

        state.duplicate_acks += 1;
        if state.duplicate_acks >= self.dup_ack_threshold {
            state.on_loss(false);
            return true;
        }
        false
    }

    /// Record a round-trip time measurement in milliseconds
    pub fn on_rtt_sample(&self, rtt_ms: f64) -> Result<(), ControlError> {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            return Err(ControlError::InvalidSample(format!(
                "rtt sample must be a non-negative number, got {}",
                rtt_ms
            )));
        }
        self.lock().rtt_samples.push(rtt_ms);
        Ok(())
    }

    /// Current window in whole segments
    pub fn window(&self) -> u64 {
        self.lock().window.floor() as u64
    }

    pub fn state(&self) -> CongestionPhase {
        self.lock().phase
    }

    pub fn slow_start_threshold(&self) -> f64 {
        self.lock().ssthresh
    }

    pub fn stats(&self) -> CongestionStats {
        let state = self.lock();
        CongestionStats {
            window: state.window.floor() as u64,
            slow_start_threshold: state.ssthresh,
            state: state.phase,
            retransmissions: state.retransmissions,
            fast_retransmits: state.fast_retransmits,
            bytes_acked: state.bytes_acked,
            mean_rtt_ms: mean(state.rtt_samples.iter().copied()),
            min_rtt_ms: state.rtt_samples.iter().copied().reduce(f64::min),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(window: f64, ssthresh: f64) -> CongestionController {
        CongestionController::with_config(CongestionConfig::new(window, ssthresh)).unwrap()
    }

    #[test]
    fn test_slow_start_to_avoidance() {
        let cc = controller(1.0, 10.0);
        for _ in 0..8 {
            cc.on_ack_received(1200);
        }
        assert_eq!(cc.window(), 9);
        assert_eq!(cc.state(), CongestionPhase::SlowStart);

        cc.on_ack_received(1200);
        assert_eq!(cc.window(), 10);
        assert_eq!(cc.state(), CongestionPhase::CongestionAvoidance);
        assert_eq!(cc.stats().bytes_acked, 9 * 1200);
    }

    #[test]
    fn test_avoidance_grows_fractionally() {
        let cc = controller(1.0, 10.0);
        for _ in 0..9 {
            cc.on_ack_received(0);
        }
        // 10 ACKs at 1/cwnd each add a little under one segment
        for _ in 0..10 {
            cc.on_ack_received(0);
        }
        assert_eq!(cc.window(), 10);
        for _ in 0..2 {
            cc.on_ack_received(0);
        }
        assert_eq!(cc.window(), 11);
        assert_eq!(cc.state(), CongestionPhase::CongestionAvoidance);
    }

    #[test]
    fn test_timeout_resets_window() {
        let cc = controller(16.0, 100.0);
        cc.on_packet_loss(true);

        assert_eq!(cc.slow_start_threshold(), 8.0);
        assert_eq!(cc.window(), 1);
        assert_eq!(cc.state(), CongestionPhase::SlowStart);
        assert_eq!(cc.stats().retransmissions, 1);
    }

    #[test]
    fn test_fast_retransmit_and_recovery() {
        let cc = controller(20.0, 100.0);
        cc.on_packet_loss(false);

        assert_eq!(cc.slow_start_threshold(), 10.0);
        assert_eq!(cc.window(), 13);
        assert_eq!(cc.state(), CongestionPhase::FastRecovery);

        // Recovery ends on the next new ACK
        cc.on_ack_received(1200);
        assert_eq!(cc.window(), 10);
        assert_eq!(cc.state(), CongestionPhase::CongestionAvoidance);

        let stats = cc.stats();
        assert_eq!(stats.fast_retransmits, 1);
        assert_eq!(stats.retransmissions, 0);
    }

    #[test]
    fn test_odd_window_threshold_rounds_down() {
        let cc = controller(11.0, 100.0);
        cc.on_packet_loss(true);
        assert_eq!(cc.slow_start_threshold(), 5.0);
        assert_eq!(cc.window(), 1);

        for _ in 0..3 {
            cc.on_ack_received(1200);
        }
        assert_eq!(cc.window(), 4);
        assert_eq!(cc.state(), CongestionPhase::SlowStart);

        cc.on_ack_received(1200);
        assert_eq!(cc.window(), 5);
        assert_eq!(cc.state(), CongestionPhase::CongestionAvoidance);

        let cc = controller(11.0, 100.0);
        cc.on_packet_loss(false);
        assert_eq!(cc.slow_start_threshold(), 5.0);
        assert_eq!(cc.window(), 8);
        assert_eq!(cc.state(), CongestionPhase::FastRecovery);

        cc.on_ack_received(1200);
        assert_eq!(cc.window(), 5);
        assert_eq!(cc.state(), CongestionPhase::CongestionAvoidance);
    }

    #[test]
    fn test_threshold_floor() {
        let cc = controller(1.0, 10.0);
        cc.on_packet_loss(true);
        assert_eq!(cc.slow_start_threshold(), 2.0);
        assert_eq!(cc.window(), 1);

        cc.on_packet_loss(false);
        assert_eq!(cc.slow_start_threshold(), 2.0);
        assert_eq!(cc.window(), 5);
    }

    #[test]
    fn test_window_never_below_one() {
        let cc = controller(1.0, 2.0);
        for i in 0..500u32 {
            match i % 7 {
                0 => cc.on_packet_loss(true),
                3 => cc.on_packet_loss(false),
                5 => {
                    cc.on_duplicate_ack();
                }
                _ => cc.on_ack_received(1000),
            }
            assert!(cc.window() >= 1);
            assert!(cc.slow_start_threshold() >= 2.0);
        }
    }

    #[test]
    fn test_duplicate_acks_trigger_fast_retransmit() {
        let cc = controller(40.0, 100.0);
        assert!(!cc.on_duplicate_ack());
        assert!(!cc.on_duplicate_ack());
        assert!(cc.on_duplicate_ack());
        assert_eq!(cc.state(), CongestionPhase::FastRecovery);
        assert_eq!(cc.window(), 23);

        // Further duplicates during recovery change nothing
        assert!(!cc.on_duplicate_ack());
        assert_eq!(cc.window(), 23);
        assert_eq!(cc.stats().fast_retransmits, 1);
    }

    #[test]
    fn test_new_ack_resets_duplicate_count() {
        let cc = controller(40.0, 100.0);
        cc.on_duplicate_ack();
        cc.on_duplicate_ack();
        cc.on_ack_received(1000);
        assert!(!cc.on_duplicate_ack());
        assert_eq!(cc.state(), CongestionPhase::SlowStart);
    }

    #[test]
    fn test_rtt_samples() {
        let cc = CongestionController::new();
        assert_eq!(cc.stats().mean_rtt_ms, None);

        cc.on_rtt_sample(30.0).unwrap();
        cc.on_rtt_sample(50.0).unwrap();
        cc.on_rtt_sample(40.0).unwrap();
        assert!(cc.on_rtt_sample(-1.0).is_err());

        let stats = cc.stats();
        assert_eq!(stats.mean_rtt_ms, Some(40.0));
        assert_eq!(stats.min_rtt_ms, Some(30.0));
    }

    #[test]
    fn test_defaults() {
        let cc = CongestionController::default();
        assert_eq!(cc.window(), 1000);
        assert_eq!(cc.slow_start_threshold(), 10000.0);
        assert_eq!(cc.state(), CongestionPhase::SlowStart);
    }
}
