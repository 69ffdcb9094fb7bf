//! Simulator configuration.
//!
//! Every field has a default matching the stock mock deployment, so a config
//! file only needs to name the values it overrides. All durations are in
//! simulated seconds and are converted to wall-clock time through
//! [`SimConfig::scaled`].

use crate::error::ConfigError;
use rand::Rng;
use rand::distr::uniform::SampleUniform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOG_DIR: &str = "/var/log/mock";

/// Upper bound on `time_scale`. One simulated second may last at most a
/// wall-clock hour.
pub const MAX_TIME_SCALE: f64 = 3600.0;

/// Longest wall-clock wait any scaled duration is allowed to reach.
pub const MAX_SCALED_WAIT: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

pub const AUDIT_LOG: &str = "audit.log";
pub const CPU_USAGE_LOG: &str = "cpu.log";
pub const DISK_USAGE_LOG: &str = "df.log";
pub const MEMORY_USAGE_LOG: &str = "mem.log";

pub const DEFAULT_HOSTS: &[&str] = &[
    "solsyspingfed1",
    "solsyspingfed2",
    "solsyspingfed3",
    "solsyspingfed4",
    "solsyspingfed5",
    "solsyspingfed6",
    "solsyspingfed7",
    "solsyspingfed8",
    "solsyspingfed9",
    "solsyspingfed10",
];

/// Inclusive `[min, max]` range sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T> Bounds<T>
where
    T: SampleUniform + PartialOrd + Copy,
{
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        if self.min >= self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }

    fn check(&self, name: &str) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::Invalid(format!("{name}: min exceeds max")));
        }
        Ok(())
    }
}

/// What a sink does when its queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// The producer waits for space.
    #[default]
    Block,
    /// The record is rejected and counted as dropped.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub rollover_bytes: u64,
    pub queue_capacity: usize,
    pub queue_policy: QueuePolicy,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            rollover_bytes: 100 * 1024 * 1024,
            queue_capacity: 10_000,
            queue_policy: QueuePolicy::Block,
        }
    }
}

/// Probability of each early exit in the transaction state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchProbabilities {
    pub authn_failure: f64,
    pub authz_code_failure: f64,
    /// Only drawn when the authorization code did not already fail.
    pub authz_code_expiry: f64,
    pub introspection_expiry: f64,
    pub validation_expiry: f64,
    pub refresh_failure: f64,
}

impl Default for BranchProbabilities {
    fn default() -> Self {
        Self {
            authn_failure: 0.10,
            authz_code_failure: 0.10,
            authz_code_expiry: 0.02,
            introspection_expiry: 0.03,
            validation_expiry: 0.03,
            refresh_failure: 0.02,
        }
    }
}

impl BranchProbabilities {
    fn check(&self) -> Result<(), ConfigError> {
        let all = [
            ("authn_failure", self.authn_failure),
            ("authz_code_failure", self.authz_code_failure),
            ("authz_code_expiry", self.authz_code_expiry),
            ("introspection_expiry", self.introspection_expiry),
            ("validation_expiry", self.validation_expiry),
            ("refresh_failure", self.refresh_failure),
        ];
        for (name, p) in all {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!(
                    "probability {name} must be within [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Bimodal response time: mostly fast, occasionally slow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseTimeConfig {
    pub slow_probability: f64,
    pub fast_ms: Bounds<u64>,
    pub slow_ms: Bounds<u64>,
}

impl Default for ResponseTimeConfig {
    fn default() -> Self {
        Self {
            slow_probability: 0.05,
            fast_ms: Bounds::new(5, 100),
            slow_ms: Bounds::new(1000, 5000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Size of the worker batch started with the simulator.
    pub initial_workers: Bounds<usize>,
    /// Trailing window of transactions that feed the resource figures.
    pub recent_window_secs: f64,
    pub authn_secs: Bounds<f64>,
    pub refresh_wait_secs: Bounds<f64>,
    pub auth_code_lifetime_secs: f64,
    pub access_token_lifetime_secs: f64,
    pub refresh_token_lifetime_secs: f64,
    pub iteration_delay_secs: Bounds<f64>,
    /// Upper bound of the random pause between two worker starts.
    pub spawn_stagger_secs: f64,
    pub probabilities: BranchProbabilities,
    pub response_time: ResponseTimeConfig,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            initial_workers: Bounds::new(15, 20),
            recent_window_secs: 300.0,
            authn_secs: Bounds::new(5.0, 10.0),
            refresh_wait_secs: Bounds::new(10.0, 15.0),
            auth_code_lifetime_secs: 15.0,
            access_token_lifetime_secs: 60.0,
            refresh_token_lifetime_secs: 120.0,
            iteration_delay_secs: Bounds::new(1.0, 3.0),
            spawn_stagger_secs: 2.0,
            probabilities: BranchProbabilities::default(),
            response_time: ResponseTimeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub base_usage: Bounds<u32>,
    pub max_usage_per_transaction: f64,
    pub nice_max: f64,
    pub system_max: f64,
    pub wait_max: f64,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            base_usage: Bounds::new(5, 10),
            max_usage_per_transaction: 0.25,
            nice_max: 5.0,
            system_max: 20.0,
            wait_max: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub total_mb: u64,
    pub base_used_mb: Bounds<u64>,
    pub max_usage_per_transaction_mb: u64,
    pub processes: Bounds<u64>,
    pub threads: Bounds<u64>,
    pub interrupts: Bounds<u64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            total_mb: 32 * 1024,
            base_used_mb: Bounds::new(1000, 2500),
            max_usage_per_transaction_mb: 100,
            processes: Bounds::new(100, 150),
            threads: Bounds::new(300, 400),
            interrupts: Bounds::new(500, 750),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub base_usage: Bounds<u32>,
    pub usage_increment_per_transaction: f64,
    pub size_gb: u64,
    pub filesystem: String,
    pub mount_path: String,
    /// Period of the cleanup that resets every host to a fresh base usage.
    pub cleanup_interval_secs: f64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            base_usage: Bounds::new(5, 25),
            usage_increment_per_transaction: 0.01,
            size_gb: 100,
            filesystem: "none".to_string(),
            mount_path: "/".to_string(),
            cleanup_interval_secs: 2.0 * 3600.0,
        }
    }
}

/// Shape of the daily load curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub enabled: bool,
    pub kickoff_hour: u32,
    pub peak_hour: u32,
    pub dropoff_hour: u32,
    pub increase_interval_mins: u32,
    pub increase_volume: usize,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kickoff_hour: 6,
            peak_hour: 11,
            dropoff_hour: 20,
            increase_interval_mins: 5,
            increase_volume: 5,
        }
    }
}

impl UsageConfig {
    fn check(&self) -> Result<(), ConfigError> {
        if self.dropoff_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "dropoff_hour must be within 0-23, got {}",
                self.dropoff_hour
            )));
        }
        if !(self.kickoff_hour <= self.peak_hour && self.peak_hour <= self.dropoff_hour) {
            return Err(ConfigError::Invalid(
                "usage hours must satisfy kickoff <= peak <= dropoff".to_string(),
            ));
        }
        if self.increase_interval_mins == 0 {
            return Err(ConfigError::Invalid(
                "increase_interval_mins must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub log_dir: PathBuf,
    pub hosts: Vec<String>,
    /// Wall-clock seconds per simulated second.
    pub time_scale: f64,
    pub metric_interval_secs: f64,
    pub sink: SinkConfig,
    pub oauth: OAuthConfig,
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub disk: DiskConfig,
    pub usage: UsageConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            hosts: DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect(),
            time_scale: 1.0,
            metric_interval_secs: 60.0,
            sink: SinkConfig::default(),
            oauth: OAuthConfig::default(),
            cpu: CpuConfig::default(),
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            usage: UsageConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::Invalid("hosts must not be empty".to_string()));
        }
        if !(self.time_scale.is_finite() && self.time_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "time_scale must be positive, got {}",
                self.time_scale
            )));
        }
        if self.time_scale > MAX_TIME_SCALE {
            return Err(ConfigError::Invalid(format!(
                "time_scale must be at most {MAX_TIME_SCALE}, got {}",
                self.time_scale
            )));
        }
        if !(self.metric_interval_secs.is_finite() && self.metric_interval_secs > 0.0) {
            return Err(ConfigError::Invalid(
                "metric_interval_secs must be positive".to_string(),
            ));
        }
        self.check_scalable("metric_interval_secs", self.metric_interval_secs)?;
        self.check_scalable("disk.cleanup_interval_secs", self.disk.cleanup_interval_secs)?;
        self.check_scalable("oauth.spawn_stagger_secs", self.oauth.spawn_stagger_secs)?;
        self.check_scalable("oauth.authn_secs.max", self.oauth.authn_secs.max)?;
        self.check_scalable("oauth.refresh_wait_secs.max", self.oauth.refresh_wait_secs.max)?;
        self.check_scalable(
            "oauth.iteration_delay_secs.max",
            self.oauth.iteration_delay_secs.max,
        )?;
        if self.sink.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sink.queue_capacity must be positive".to_string(),
            ));
        }
        if !(self.disk.cleanup_interval_secs.is_finite() && self.disk.cleanup_interval_secs > 0.0) {
            return Err(ConfigError::Invalid(
                "disk.cleanup_interval_secs must be positive".to_string(),
            ));
        }

        let oauth = &self.oauth;
        oauth.initial_workers.check("oauth.initial_workers")?;
        oauth.authn_secs.check("oauth.authn_secs")?;
        oauth.refresh_wait_secs.check("oauth.refresh_wait_secs")?;
        oauth.iteration_delay_secs.check("oauth.iteration_delay_secs")?;
        oauth.response_time.fast_ms.check("oauth.response_time.fast_ms")?;
        oauth.response_time.slow_ms.check("oauth.response_time.slow_ms")?;
        if !(0.0..=1.0).contains(&oauth.response_time.slow_probability) {
            return Err(ConfigError::Invalid(
                "oauth.response_time.slow_probability must be within [0, 1]".to_string(),
            ));
        }
        oauth.probabilities.check()?;

        self.cpu.base_usage.check("cpu.base_usage")?;
        self.memory.base_used_mb.check("memory.base_used_mb")?;
        self.memory.processes.check("memory.processes")?;
        self.memory.threads.check("memory.threads")?;
        self.memory.interrupts.check("memory.interrupts")?;
        self.disk.base_usage.check("disk.base_usage")?;
        self.usage.check()?;
        Ok(())
    }

    /// Convert simulated seconds to wall-clock time.
    pub fn scaled(&self, secs: f64) -> Duration {
        scale_secs(secs, self.time_scale)
    }

    fn check_scalable(&self, field: &str, secs: f64) -> Result<(), ConfigError> {
        let wall = secs * self.time_scale;
        if !wall.is_finite() || wall > MAX_SCALED_WAIT.as_secs_f64() {
            return Err(ConfigError::Invalid(format!(
                "{field} scaled by time_scale exceeds {} seconds",
                MAX_SCALED_WAIT.as_secs()
            )));
        }
        Ok(())
    }

    pub fn log_path(&self, file_name: &str) -> PathBuf {
        self.log_dir.join(file_name)
    }
}

/// `secs * time_scale` as a wall-clock duration, clamped to
/// `[0, MAX_SCALED_WAIT]`. NaN maps to zero.
pub fn scale_secs(secs: f64, time_scale: f64) -> Duration {
    let wall = (secs * time_scale).max(0.0);
    Duration::try_from_secs_f64(wall)
        .unwrap_or(MAX_SCALED_WAIT)
        .min(MAX_SCALED_WAIT)
}
