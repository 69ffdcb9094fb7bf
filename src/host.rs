//! Per-host synthetic resource counters.

use crate::config::SimConfig;
use crate::simulation::transaction::Outcome;
use crate::window::SlidingWindowCounter;
use rand::Rng;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// CPU (%), memory (MB) and disk (%) figures of one host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostUsage {
    pub cpu: f64,
    pub memory_mb: f64,
    pub disk: f64,
}

/// Shared state of one simulated host.
///
/// Transaction workers mutate it after every transaction and the metric worker
/// for the host reads it; both go through the same lock.
pub struct HostState {
    name: String,
    usage: Mutex<HostUsage>,
    recent: SlidingWindowCounter<Outcome>,
}

impl HostState {
    pub fn new<R: Rng + ?Sized>(name: impl Into<String>, config: &SimConfig, rng: &mut R) -> Self {
        let usage = HostUsage {
            cpu: config.cpu.base_usage.sample(rng) as f64,
            memory_mb: config.memory.base_used_mb.sample(rng) as f64,
            disk: config.disk.base_usage.sample(rng) as f64,
        };
        Self {
            name: name.into(),
            usage: Mutex::new(usage),
            recent: SlidingWindowCounter::new(config.scaled(config.oauth.recent_window_secs)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Account for one finished transaction and resample CPU and memory.
    ///
    /// Both are a fresh random base plus one random increment per transaction
    /// still in the recent window; disk grows by a fixed step up to 100%.
    pub fn record_transaction<R: Rng + ?Sized>(
        &self,
        outcome: Outcome,
        config: &SimConfig,
        rng: &mut R,
    ) -> HostUsage {
        let mut usage = self.lock();
        let recent = self.recent.add_and_count(outcome);

        usage.disk = (usage.disk + config.disk.usage_increment_per_transaction).min(100.0);

        let cpu_load: f64 = (0..recent)
            .map(|_| rng.random::<f64>() * config.cpu.max_usage_per_transaction)
            .sum();
        usage.cpu = config.cpu.base_usage.sample(rng) as f64 + cpu_load;

        let per_tx = config.memory.max_usage_per_transaction_mb as f64;
        let memory_load: f64 = (0..recent)
            .map(|_| (rng.random::<f64>() * per_tx).ceil())
            .sum();
        usage.memory_mb = (config.memory.base_used_mb.sample(rng) as f64 + memory_load)
            .min(config.memory.total_mb as f64);

        *usage
    }

    /// Current figures and the number of recent transactions.
    pub fn snapshot(&self) -> (HostUsage, usize) {
        let usage = self.lock();
        (*usage, self.recent.count())
    }

    /// Periodic cleanup: disk usage falls back to a fresh base value.
    pub fn reset_disk<R: Rng + ?Sized>(&self, config: &SimConfig, rng: &mut R) {
        self.lock().disk = config.disk.base_usage.sample(rng) as f64;
    }

    fn lock(&self) -> MutexGuard<'_, HostUsage> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
