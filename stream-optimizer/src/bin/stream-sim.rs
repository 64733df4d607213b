use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use stream_optimizer::{metrics, Optimizer, OptimizerConfig, SharedOptimizer, TelemetrySample};
use tracing_subscriber::EnvFilter;

/// Bytes acknowledged per ACK on the simulated link
const SEGMENT_SIZE: u64 = 1200;
/// ACKs delivered per transport tick
const ACKS_PER_TICK: u64 = 8;
/// Ticks of heavy loss injected by --burst-start
const BURST_TICKS: u64 = 15;

#[derive(Parser, Debug)]
#[command(name = "stream-sim")]
#[command(about = "Run the transport control loop against a synthetic link")]
#[command(version)]
struct Args {
    /// Path to an optimizer TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the starting bitrate (bits/sec)
    #[arg(long)]
    initial_bitrate: Option<u64>,

    /// Number of telemetry ticks to simulate
    #[arg(short, long, default_value_t = 50)]
    ticks: u64,

    /// Milliseconds between ticks
    #[arg(long, default_value_t = 20)]
    interval_ms: u64,

    /// Tick at which to inject a burst of heavy packet loss
    #[arg(long)]
    burst_start: Option<u64>,

    /// Session name used in log lines (overrides the config file)
    #[arg(short, long)]
    session: Option<String>,
}

/// Sinusoidal link: throughput, RTT, loss and buffer level all oscillate
struct SyntheticLink {
    tick: u64,
    ticks: u64,
    burst_start: Option<u64>,
}

impl SyntheticLink {
    fn in_burst(&self) -> bool {
        self.burst_start
            .is_some_and(|start| (start..start.saturating_add(BURST_TICKS)).contains(&self.tick))
    }
}

impl Iterator for SyntheticLink {
    type Item = TelemetrySample;

    fn next(&mut self) -> Option<TelemetrySample> {
        if self.tick >= self.ticks {
            return None;
        }

        let i = self.tick;
        let phase = i as f64;
        let loss = if self.in_burst() {
            0.12
        } else {
            (0.01 * (phase * 0.3).sin()).max(0.0)
        };
        let sample = TelemetrySample::new(
            50.0 + 10.0 * (phase * 0.1).sin(),
            2_500_000.0 + 500_000.0 * (phase * 0.2).sin(),
            loss,
            (100.0 + 50.0 * (phase * 0.1).sin()) as u64,
        )
        .with_counters(1_000_000 + i * 10_000, 500_000 + i * 5_000, 1000 + i, 950 + i);

        self.tick += 1;
        Some(sample)
    }
}

/// Deliver ACKs with periodic fast retransmits and timeouts
async fn simulate_transport(optimizer: SharedOptimizer, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut round = 0u64;
    loop {
        ticker.tick().await;
        round += 1;

        if round % 150 == 0 {
            optimizer.on_packet_loss(true);
        } else if round % 40 == 0 {
            for _ in 0..3 {
                optimizer.on_duplicate_ack();
            }
        } else {
            for _ in 0..ACKS_PER_TICK {
                optimizer.on_ack_received(SEGMENT_SIZE);
            }
            optimizer.record_bytes_sent(ACKS_PER_TICK * SEGMENT_SIZE);
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match &args.config {
        Some(path) => OptimizerConfig::read_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OptimizerConfig::default(),
    };
    if let Some(bitrate) = args.initial_bitrate {
        config.bitrate.initial_bitrate = bitrate;
    }
    if let Some(session) = args.session {
        config.session = session;
    }

    let optimizer = SharedOptimizer::new(Optimizer::with_config(config)?);
    let interval = Duration::from_millis(args.interval_ms.max(1));

    tracing::info!(
        ticks = args.ticks,
        interval_ms = args.interval_ms,
        bitrate = optimizer.optimizer().bitrate().current_bitrate(),
        "Starting simulation"
    );

    let link = SyntheticLink {
        tick: 0,
        ticks: args.ticks,
        burst_start: args.burst_start,
    };
    let ticks = optimizer.start_tick_task(link, interval);
    let transport_task = tokio::spawn(simulate_transport(optimizer.clone(), interval));

    let accepted = ticks.await.context("tick task failed")?;
    transport_task.abort();

    let report = optimizer.report();
    metrics::log_report(&report, optimizer.optimizer().session());
    tracing::info!(accepted, "Simulation finished");
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
