//! Diurnal load curve.
//!
//! Every simulated day at the kickoff hour the ramp starts adding worker
//! batches at randomized intervals until the peak hour. Each batch is given a
//! lifetime that runs out at the drop-off hour, so load falls back to the
//! initial pool in the evening. The next kickoff is always computed from the
//! simulated time of day.

use crate::clock::{self, SimClock};
use crate::config::{self, UsageConfig};
use crate::pool::WorkerPool;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Number of batches spawned between kickoff and peak.
pub fn windup_intervals(usage: &UsageConfig) -> u32 {
    let per_hour = 60 / usage.increase_interval_mins.max(1);
    usage.peak_hour.saturating_sub(usage.kickoff_hour) * per_hour
}

/// `value` plus or minus half of itself.
fn around<T>(value: T) -> RangeInclusive<T>
where
    T: Copy + std::ops::Add<Output = T> + std::ops::Sub<Output = T> + std::ops::Div<Output = T> + From<u8>,
{
    let half = value / T::from(2u8);
    (value - half)..=(value + half)
}

pub fn batch_size_range(usage: &UsageConfig) -> RangeInclusive<usize> {
    around(usage.increase_volume)
}

pub fn interval_mins_range(usage: &UsageConfig) -> RangeInclusive<u32> {
    around(usage.increase_interval_mins)
}

/// Simulated seconds a batch spawned `since_kickoff` seconds into the ramp
/// has left until the drop-off hour.
pub fn batch_lifetime_secs(usage: &UsageConfig, since_kickoff: f64) -> f64 {
    let span = f64::from(usage.dropoff_hour.saturating_sub(usage.kickoff_hour)) * 3600.0;
    (span - since_kickoff).max(0.0)
}

pub struct DiurnalRamp {
    pool: Arc<WorkerPool>,
    usage: UsageConfig,
    clock: SimClock,
    time_scale: f64,
    rng: StdRng,
}

impl DiurnalRamp {
    pub fn new(pool: Arc<WorkerPool>, usage: UsageConfig, clock: SimClock, time_scale: f64) -> Self {
        Self {
            pool,
            usage,
            clock,
            time_scale,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Wait for each kickoff and wind up, until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let wait = clock::seconds_until(self.usage.kickoff_hour, self.clock.now());
            debug!(simulated_secs = wait, "waiting for usage kickoff");
            if !self.pause(self.scaled(wait), &cancel).await {
                break;
            }
            if !self.wind_up(&cancel).await {
                break;
            }
            // Land past the kickoff hour so the next wait targets tomorrow.
            if clock::seconds_until(self.usage.kickoff_hour, self.clock.now()) == 0.0
                && !self.pause(self.scaled(1.0), &cancel).await
            {
                break;
            }
        }
        debug!("usage ramp stopped");
    }

    /// One morning ramp. Returns false if cancelled.
    pub async fn wind_up(&mut self, cancel: &CancellationToken) -> bool {
        let intervals = windup_intervals(&self.usage);
        info!(intervals, "usage ramp kicking off");

        for _ in 0..intervals {
            let since = clock::seconds_since(self.usage.kickoff_hour, self.clock.now());
            let lifetime = batch_lifetime_secs(&self.usage, since);
            if lifetime <= 0.0 {
                break;
            }

            let batch = self.rng.random_range(batch_size_range(&self.usage));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                spawned = self.pool.spawn(batch, self.scaled(lifetime)) => {
                    debug!(spawned, lifetime_secs = lifetime, "usage ramp batch started");
                }
            }

            let mins = self.rng.random_range(interval_mins_range(&self.usage));
            if !self.pause(self.scaled(f64::from(mins) * 60.0), cancel).await {
                return false;
            }
        }

        info!(active = self.pool.len(), "usage ramp reached peak");
        true
    }

    fn scaled(&self, secs: f64) -> Duration {
        config::scale_secs(secs, self.time_scale)
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
