//! Compact log lines for control decisions

use crate::optimizer::{OptimizationDecision, OptimizationReport};

/// Log one decision as a single line.
///
/// Format: `[ABR:session] bitrate=3.06Mbps cwnd=1000 buffer=150/1000 (low) net=stable cc=slow_start`
pub fn log_decision(decision: &OptimizationDecision, session: &str) {
    tracing::info!("{}", format_decision(decision, session));
}

/// Log the session summary as a single line
pub fn log_report(report: &OptimizationReport, session: &str) {
    tracing::info!(
        "[ABR:{}] runtime={:.1}s decisions={} final={} sent={} drops={} net={}",
        session,
        report.runtime_seconds,
        report.decision_count,
        format_bitrate(report.final_bitrate),
        format_bytes(report.total_bytes_sent),
        report.buffer_stats.drop_count,
        report.network_state.as_str()
    );
}

pub fn format_decision(decision: &OptimizationDecision, session: &str) -> String {
    let buffer = &decision.buffer_stats;
    format!(
        "[ABR:{}] bitrate={} cwnd={} buffer={}/{} ({}) net={} cc={}",
        session,
        format_bitrate(decision.optimal_bitrate),
        decision.congestion_window,
        buffer.current_size,
        buffer.max_size,
        buffer.state.as_str(),
        decision.network_state.as_str(),
        decision.congestion_state.as_str()
    )
}

pub fn format_bitrate(bits_per_sec: u64) -> String {
    if bits_per_sec >= 1_000_000 {
        format!("{:.2}Mbps", bits_per_sec as f64 / 1_000_000.0)
    } else if bits_per_sec >= 1_000 {
        format!("{:.1}kbps", bits_per_sec as f64 / 1_000.0)
    } else {
        format!("{}bps", bits_per_sec)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000 {
        format!("{:.1}MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1}KB", bytes as f64 / 1_000.0)
    } else {
        format!("{}B", bytes)
    }
}
