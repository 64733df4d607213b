//! Adaptive Transport Control for Live Streams
//!
//! This crate turns periodic network telemetry into per-tick control
//! decisions: a target bitrate, a congestion window and a send-buffer
//! backpressure state. It does not move bytes itself; the caller owns the
//! transport and feeds samples and ACK/loss events in.
//!
//! # Components
//!
//! - [`BitrateController`]: network classification and smoothed bitrate adaptation
//! - [`BufferManager`]: send-buffer occupancy and drop decisions
//! - [`CongestionController`]: Reno-style congestion window state machine
//! - [`Optimizer`]: per-tick orchestration, decision log and reports
//! - [`SharedOptimizer::start_tick_task`]: periodic tick task on a tokio interval
//! - [`OptimizerConfig`]: configuration types, loadable from TOML

mod bitrate;
mod buffer;
mod config;
mod congestion;
mod driver;
mod error;
pub mod metrics;
mod optimizer;
mod sample;
#[cfg(test)]
mod test_support;
mod window;

pub use bitrate::{BitrateController, BitrateSnapshot, NetworkState};
pub use buffer::{BufferManager, BufferState, BufferStats};
pub use config::{BitrateConfig, BufferConfig, CongestionConfig, OptimizerConfig};
pub use congestion::{CongestionController, CongestionPhase, CongestionStats};
pub use driver::TelemetrySource;
pub use error::ControlError;
pub use optimizer::{OptimizationDecision, OptimizationReport, Optimizer, SharedOptimizer};
pub use sample::TelemetrySample;
pub use window::{mean, variance, SlidingWindow};
