//! Telemetry samples reported by the transport each measurement interval

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// One periodic measurement of transport health.
///
/// Counters are cumulative. The remaining fields describe the interval that
/// just ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Round-trip time in milliseconds
    pub rtt_ms: f64,
    /// Measured throughput in bits/sec
    pub throughput_bps: f64,
    /// Fraction of packets lost, 0.0 to 1.0
    pub packet_loss_rate: f64,
    /// Send-buffer occupancy, same units as the buffer capacity
    pub buffer_level: u64,
}

impl TelemetrySample {
    /// Sample carrying only the signals the controllers read
    pub fn new(rtt_ms: f64, throughput_bps: f64, packet_loss_rate: f64, buffer_level: u64) -> Self {
        Self {
            rtt_ms,
            throughput_bps,
            packet_loss_rate,
            buffer_level,
            ..Self::default()
        }
    }

    /// Set the cumulative transfer counters
    pub fn with_counters(
        mut self,
        bytes_sent: u64,
        bytes_received: u64,
        packets_sent: u64,
        packets_received: u64,
    ) -> Self {
        self.bytes_sent = bytes_sent;
        self.bytes_received = bytes_received;
        self.packets_sent = packets_sent;
        self.packets_received = packets_received;
        self
    }

    /// Reject values that would corrupt the smoothing state.
    pub fn validate(&self) -> Result<(), ControlError> {
        if !self.rtt_ms.is_finite() || self.rtt_ms < 0.0 {
            return Err(ControlError::InvalidSample(format!(
                "rtt_ms must be a non-negative number, got {}",
                self.rtt_ms
            )));
        }
        if !self.throughput_bps.is_finite() || self.throughput_bps < 0.0 {
            return Err(ControlError::InvalidSample(format!(
                "throughput_bps must be a non-negative number, got {}",
                self.throughput_bps
            )));
        }
        if !(0.0..=1.0).contains(&self.packet_loss_rate) {
            return Err(ControlError::InvalidSample(format!(
                "packet_loss_rate must be within [0, 1], got {}",
                self.packet_loss_rate
            )));
        }
        Ok(())
    }
}
