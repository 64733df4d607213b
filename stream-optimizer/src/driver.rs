//! Periodic tick driver
//!
//! Pulls samples from a [`TelemetrySource`] on a fixed interval and feeds them
//! to a [`SharedOptimizer`]. Missed ticks are skipped rather than replayed in a
//! burst; the sample windows simply age out.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::optimizer::SharedOptimizer;
use crate::sample::TelemetrySample;

/// Produces one telemetry sample per tick
pub trait TelemetrySource: Send + 'static {
    /// Next sample, or `None` once the source is exhausted
    fn next_sample(&mut self) -> Option<TelemetrySample>;
}

impl<I> TelemetrySource for I
where
    I: Iterator<Item = TelemetrySample> + Send + 'static,
{
    fn next_sample(&mut self) -> Option<TelemetrySample> {
        self.next()
    }
}

impl SharedOptimizer {
    /// Start a background task that ticks once per `interval`.
    ///
    /// Invalid samples are skipped; the controller warns about each one. The
    /// task ends when the source is exhausted and yields the number of
    /// accepted samples.
    pub fn start_tick_task<S: TelemetrySource>(
        &self,
        mut source: S,
        interval: Duration,
    ) -> JoinHandle<u64> {
        let optimizer = self.clone();
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut accepted = 0u64;
            loop {
                ticker.tick().await;
                let Some(sample) = source.next_sample() else {
                    break;
                };
                match optimizer.tick(&sample) {
                    Ok(_) => accepted += 1,
                    Err(e) => tracing::debug!("Skipping telemetry sample: {}", e),
                }
            }

            tracing::info!(accepted, "Telemetry source exhausted, tick task stopped");
            accepted
        })
    }
}
