//! Throughput-driven bitrate controller
//!
//! Classifies the network from windows of telemetry samples and walks the
//! bitrate toward a target with exponential smoothing. Classification and
//! adjustment happen under a single lock acquisition so readers never see a
//! new network state paired with a stale bitrate.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::BitrateConfig;
use crate::error::ControlError;
use crate::sample::TelemetrySample;
use crate::window::{mean, variance, SlidingWindow};

/// Samples needed before congestion detection runs
const DETECTION_SAMPLES: usize = 10;
/// Mean loss rate above which the link is congested
const LOSS_THRESHOLD: f64 = 0.05;
/// RTT variance (ms^2) above which the link is unstable
const RTT_VARIANCE_THRESHOLD: f64 = 100.0;
/// Recent throughput below this fraction of the previous period means degraded
const THROUGHPUT_DROP_RATIO: f64 = 0.8;
/// Throughput samples averaged for the increase decision
const SMOOTHING_SAMPLES: usize = 5;
/// Smoothed throughput must exceed the bitrate by this factor to step up
const INCREASE_HEADROOM: f64 = 1.2;
/// Multiplier applied when stepping up
const INCREASE_FACTOR: f64 = 1.1;

/// Network classification produced by congestion detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    #[default]
    Stable,
    /// Sustained packet loss
    Congested,
    /// RTT jitter
    Unstable,
    /// Throughput falling relative to the previous period
    Degraded,
}

impl NetworkState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Congested => "congested",
            Self::Unstable => "unstable",
            Self::Degraded => "degraded",
        }
    }

    /// Multiplier applied to the bitrate while congestion is detected
    fn reduction_factor(self) -> f64 {
        match self {
            Self::Congested => 0.5,
            Self::Unstable => 0.8,
            Self::Degraded | Self::Stable => 0.7,
        }
    }
}

/// Consistent view of the controller taken under one lock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BitrateSnapshot {
    pub current_bitrate: u64,
    pub target_bitrate: u64,
    pub network_state: NetworkState,
    pub congestion_detected: bool,
    pub samples: usize,
}

#[derive(Debug)]
struct BitrateState {
    stats: SlidingWindow<TelemetrySample>,
    throughput: SlidingWindow<f64>,
    current_bitrate: u64,
    target_bitrate: u64,
    network_state: NetworkState,
    congestion_detected: bool,
}

impl BitrateState {
    fn new(config: &BitrateConfig) -> Self {
        Self {
            stats: SlidingWindow::new(config.stats_window),
            throughput: SlidingWindow::new(config.throughput_window),
            current_bitrate: config.initial_bitrate,
            target_bitrate: config.initial_bitrate,
            network_state: NetworkState::Stable,
            congestion_detected: false,
        }
    }

    fn snapshot(&self) -> BitrateSnapshot {
        BitrateSnapshot {
            current_bitrate: self.current_bitrate,
            target_bitrate: self.target_bitrate,
            network_state: self.network_state,
            congestion_detected: self.congestion_detected,
            samples: self.stats.len(),
        }
    }

    /// Classify the link from the most recent samples.
    ///
    /// Leaves the previous classification untouched until enough samples exist.
    fn detect_congestion(&mut self) {
        if self.stats.len() < DETECTION_SAMPLES {
            return;
        }

        let avg_loss = mean(self.stats.recent(DETECTION_SAMPLES).map(|s| s.packet_loss_rate))
            .unwrap_or(0.0);
        if avg_loss > LOSS_THRESHOLD {
            self.classify(NetworkState::Congested);
            return;
        }

        let rtt_variance =
            variance(self.stats.recent(DETECTION_SAMPLES).map(|s| s.rtt_ms)).unwrap_or(0.0);
        if rtt_variance > RTT_VARIANCE_THRESHOLD {
            self.classify(NetworkState::Unstable);
            return;
        }

        if self.throughput.len() >= 2 * DETECTION_SAMPLES {
            let recent = mean(self.throughput.recent(DETECTION_SAMPLES).copied());
            let previous = mean(self.throughput.span(DETECTION_SAMPLES, DETECTION_SAMPLES).copied());
            if let (Some(recent), Some(previous)) = (recent, previous) {
                if recent < previous * THROUGHPUT_DROP_RATIO {
                    self.classify(NetworkState::Degraded);
                    return;
                }
            }
        }

        self.classify(NetworkState::Stable);
    }

    fn classify(&mut self, state: NetworkState) {
        self.network_state = state;
        self.congestion_detected = state != NetworkState::Stable;
    }

    fn adjust_bitrate(&mut self, config: &BitrateConfig) {
        let Some(smoothed_throughput) = mean(self.throughput.recent(SMOOTHING_SAMPLES).copied())
        else {
            return;
        };

        let current = self.current_bitrate as f64;
        if self.congestion_detected {
            let reduced = (current * self.network_state.reduction_factor()) as u64;
            self.target_bitrate = reduced.max(config.min_bitrate);
        } else if smoothed_throughput > current * INCREASE_HEADROOM {
            let raised = (current * INCREASE_FACTOR) as u64;
            self.target_bitrate = raised.min(config.max_bitrate);
        }

        let gamma = config.smoothing;
        let next = (gamma * current + (1.0 - gamma) * self.target_bitrate as f64).round() as u64;
        self.current_bitrate = next.clamp(config.min_bitrate, config.max_bitrate);
    }
}

/// Bitrate controller for one stream session
#[derive(Debug)]
pub struct BitrateController {
    config: BitrateConfig,
    state: Mutex<BitrateState>,
}

impl BitrateController {
    /// Create a controller with default bounds starting at `initial_bitrate`
    pub fn new(initial_bitrate: u64) -> Result<Self, ControlError> {
        Self::with_config(BitrateConfig::with_initial(initial_bitrate))
    }

    pub fn with_config(config: BitrateConfig) -> Result<Self, ControlError> {
        config.validate()?;
        let state = BitrateState::new(&config);
        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Feed one telemetry sample: detect congestion, then adjust the bitrate.
    ///
    /// Invalid samples are rejected before touching any state. Returns the
    /// snapshot taken inside the same critical section as the adjustment.
    pub fn update(&self, sample: &TelemetrySample) -> Result<BitrateSnapshot, ControlError> {
        if let Err(e) = sample.validate() {
            tracing::warn!("Rejected telemetry sample: {}", e);
            return Err(e);
        }

        let mut state = self.lock();
        state.stats.push(*sample);
        state.throughput.push(sample.throughput_bps);

        let previous = state.network_state;
        state.detect_congestion();
        state.adjust_bitrate(&self.config);

        if state.network_state != previous {
            tracing::info!(
                from = previous.as_str(),
                to = state.network_state.as_str(),
                bitrate = state.current_bitrate,
                "Network state changed"
            );
        }
        tracing::debug!(
            bitrate = state.current_bitrate,
            target = state.target_bitrate,
            state = state.network_state.as_str(),
            "Bitrate updated"
        );
        Ok(state.snapshot())
    }

    pub fn current_bitrate(&self) -> u64 {
        self.lock().current_bitrate
    }

    pub fn target_bitrate(&self) -> u64 {
        self.lock().target_bitrate
    }

    pub fn network_state(&self) -> NetworkState {
        self.lock().network_state
    }

    pub fn congestion_detected(&self) -> bool {
        self.lock().congestion_detected
    }

    pub fn snapshot(&self) -> BitrateSnapshot {
        self.lock().snapshot()
    }

    pub fn config(&self) -> &BitrateConfig {
        &self.config
    }

    /// Reset to the initial bitrate and drop all history
    ///
    /// Call this on reconnection to start fresh.
    pub fn reset(&self) {
        *self.lock() = BitrateState::new(&self.config);
    }

    fn lock(&self) -> MutexGuard<'_, BitrateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_logs;
    use std::sync::Arc;

    fn sample(loss: f64, rtt: f64, throughput: f64) -> TelemetrySample {
        TelemetrySample::new(rtt, throughput, loss, 0)
    }

    #[test]
    fn test_first_tick_steps_toward_increase() {
        let controller = BitrateController::new(3_000_000).unwrap();
        controller.update(&sample(0.0, 50.0, 4_000_000.0)).unwrap();

        assert_eq!(controller.target_bitrate(), 3_300_000);
        assert_eq!(controller.current_bitrate(), 3_060_000);
        assert_eq!(controller.network_state(), NetworkState::Stable);
    }

    #[test]
    fn test_detection_skipped_below_ten_samples() {
        let controller = BitrateController::new(3_000_000).unwrap();
        for _ in 0..9 {
            controller.update(&sample(0.5, 50.0, 1_000_000.0)).unwrap();
        }
        assert_eq!(controller.network_state(), NetworkState::Stable);
        assert!(!controller.congestion_detected());

        controller.update(&sample(0.5, 50.0, 1_000_000.0)).unwrap();
        assert_eq!(controller.network_state(), NetworkState::Congested);
        assert!(controller.congestion_detected());
    }

    #[test]
    fn test_sustained_loss_converges_downward() {
        let controller = BitrateController::new(3_000_000).unwrap();
        for _ in 0..10 {
            controller.update(&sample(0.10, 50.0, 1_000_000.0)).unwrap();
        }
        assert_eq!(controller.network_state(), NetworkState::Congested);

        let mut previous = controller.current_bitrate();
        for _ in 0..200 {
            controller.update(&sample(0.10, 50.0, 1_000_000.0)).unwrap();
            let current = controller.current_bitrate();
            assert!(current <= previous, "bitrate rose from {} to {}", previous, current);
            assert!(current >= 500_000);
            previous = current;
        }

        // Fixed point reached
        controller.update(&sample(0.10, 50.0, 1_000_000.0)).unwrap();
        assert_eq!(controller.current_bitrate(), previous);
        assert!(previous < 500_010);
    }

    #[test]
    fn test_rtt_jitter_is_unstable() {
        let controller = BitrateController::new(3_000_000).unwrap();
        for i in 0..10 {
            let rtt = if i % 2 == 0 { 20.0 } else { 60.0 };
            controller.update(&sample(0.0, rtt, 3_000_000.0)).unwrap();
        }
        assert_eq!(controller.network_state(), NetworkState::Unstable);
        // 0.8 reduction: target below current, current drifting down
        assert!(controller.target_bitrate() < 3_000_000);
        assert!(controller.current_bitrate() < 3_000_000);
    }

    #[test]
    fn test_throughput_drop_is_degraded() {
        let controller = BitrateController::new(3_000_000).unwrap();
        for _ in 0..10 {
            controller.update(&sample(0.0, 50.0, 3_000_000.0)).unwrap();
        }
        for _ in 0..9 {
            controller.update(&sample(0.0, 50.0, 1_500_000.0)).unwrap();
        }
        assert_eq!(controller.network_state(), NetworkState::Stable);

        controller.update(&sample(0.0, 50.0, 1_500_000.0)).unwrap();
        assert_eq!(controller.network_state(), NetworkState::Degraded);
    }

    #[test]
    fn test_loss_takes_precedence_over_jitter() {
        let controller = BitrateController::new(3_000_000).unwrap();
        for i in 0..10 {
            let rtt = if i % 2 == 0 { 10.0 } else { 200.0 };
            controller.update(&sample(0.2, rtt, 3_000_000.0)).unwrap();
        }
        assert_eq!(controller.network_state(), NetworkState::Congested);
    }

    #[test]
    fn test_recovers_to_stable() {
        let controller = BitrateController::new(3_000_000).unwrap();
        for _ in 0..10 {
            controller.update(&sample(0.2, 50.0, 3_000_000.0)).unwrap();
        }
        assert!(controller.congestion_detected());

        for _ in 0..10 {
            controller.update(&sample(0.0, 50.0, 3_000_000.0)).unwrap();
        }
        assert_eq!(controller.network_state(), NetworkState::Stable);
        assert!(!controller.congestion_detected());
    }

    #[test]
    fn test_increase_capped_at_max() {
        let controller = BitrateController::new(7_900_000).unwrap();
        for _ in 0..100 {
            controller.update(&sample(0.0, 50.0, 50_000_000.0)).unwrap();
            assert!(controller.current_bitrate() <= 8_000_000);
            assert!(controller.target_bitrate() <= 8_000_000);
        }
        assert!(controller.current_bitrate() > 7_900_000);
    }

    #[test]
    fn test_bounds_hold_for_mixed_traffic() {
        let controller = BitrateController::new(1_000_000).unwrap();
        for i in 0..500u32 {
            let phase = f64::from(i);
            let loss = if i % 37 < 12 { 0.2 } else { 0.0 };
            let rtt = 50.0 + 40.0 * (phase * 0.7).sin();
            let throughput = 5_000_000.0 + 4_500_000.0 * (phase * 0.13).sin();
            controller.update(&sample(loss, rtt, throughput)).unwrap();

            let bitrate = controller.current_bitrate();
            assert!((500_000..=8_000_000).contains(&bitrate));
        }
    }

    #[test]
    fn test_invalid_sample_leaves_state_untouched() {
        let controller = BitrateController::new(3_000_000).unwrap();
        let before = controller.snapshot();

        let result = controller.update(&sample(1.5, 50.0, 4_000_000.0));
        assert!(matches!(result, Err(ControlError::InvalidSample(_))));
        assert_eq!(controller.snapshot(), before);
    }

    #[test]
    fn test_update_returns_post_update_snapshot() {
        let controller = BitrateController::new(3_000_000).unwrap();
        let returned = controller.update(&sample(0.0, 50.0, 4_000_000.0)).unwrap();

        assert_eq!(returned.current_bitrate, 3_060_000);
        assert_eq!(returned.target_bitrate, 3_300_000);
        assert_eq!(returned.samples, 1);
        assert_eq!(returned, controller.snapshot());
    }

    #[test]
    fn test_rejected_sample_is_warned() {
        let controller = BitrateController::new(3_000_000).unwrap();
        let (result, output) =
            capture_logs(|| controller.update(&sample(0.0, -5.0, 1_000_000.0)));

        assert!(result.is_err());
        assert!(output.contains("WARN"));
        assert!(output.contains("Rejected telemetry sample"));
    }

    #[test]
    fn test_reset() {
        let controller = BitrateController::new(3_000_000).unwrap();
        for _ in 0..20 {
            controller.update(&sample(0.3, 50.0, 1_000_000.0)).unwrap();
        }
        assert_ne!(controller.current_bitrate(), 3_000_000);

        controller.reset();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.current_bitrate, 3_000_000);
        assert_eq!(snapshot.network_state, NetworkState::Stable);
        assert_eq!(snapshot.samples, 0);
    }

    #[test]
    fn test_rejects_initial_outside_bounds() {
        assert!(BitrateController::new(100_000).is_err());
        assert!(BitrateController::new(9_000_000).is_err());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let controller = Arc::new(BitrateController::new(3_000_000).unwrap());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let loss = if (i + t) % 3 == 0 { 0.1 } else { 0.0 };
                        controller
                            .update(&sample(loss, 40.0, 6_000_000.0))
                            .unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let snapshot = controller.snapshot();
                    assert!((500_000..=8_000_000).contains(&snapshot.current_bitrate));
                    assert_eq!(
                        snapshot.congestion_detected,
                        snapshot.network_state != NetworkState::Stable
                    );
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(controller.snapshot().samples, 100);
    }
}
