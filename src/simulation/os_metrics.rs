//! Per-host OS metric lines (df, cpu and memory).
//!
//! Lines are tab-delimited and CRLF-terminated, one per host per interval:
//!
//! ```text
//! df:  timestamp  host  fs  sizeG  usedG  availG  pct%  mount
//! cpu: timestamp  host  core  %usr  %nice  %sys  %wait  %idle
//! mem: timestamp  host  totalMB  freeMB  usedMB  free%  used%  processes  threads  interrupts/s
//! ```

use crate::config::SimConfig;
use crate::context::SimContext;
use crate::error::IterationError;
use crate::host::{HostState, HostUsage};
use crate::sink::LogRecord;
use crate::simulation::timestamp;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const CORE_ALL: &str = "all";

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct DiskLine {
    pub timestamp: String,
    pub host: String,
    pub filesystem: String,
    pub size_gb: u64,
    pub used_gb: u64,
    pub available_gb: u64,
    pub percent: u64,
    pub mount_path: String,
}

impl DiskLine {
    pub fn new(host: &str, usage: &HostUsage, config: &SimConfig) -> Self {
        let size = config.disk.size_gb;
        let percent = usage.disk.ceil().clamp(0.0, 100.0) as u64;
        let used = percent * size / 100;
        Self {
            timestamp: timestamp(),
            host: host.to_string(),
            filesystem: config.disk.filesystem.clone(),
            size_gb: size,
            used_gb: used,
            available_gb: size - used,
            percent,
            mount_path: config.disk.mount_path.clone(),
        }
    }
}

impl fmt::Display for DiskLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t\t{}\t\t{}\t\t{}G\t\t{}G\t\t{}G\t\t{}%\t\t{}\r\n",
            self.timestamp,
            self.host,
            self.filesystem,
            self.size_gb,
            self.used_gb,
            self.available_gb,
            self.percent,
            self.mount_path,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuLine {
    pub timestamp: String,
    pub host: String,
    pub core: &'static str,
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub wait: f64,
    pub idle: f64,
}

impl CpuLine {
    pub fn new<R: Rng + ?Sized>(
        host: &str,
        usage: &HostUsage,
        config: &SimConfig,
        rng: &mut R,
    ) -> Self {
        let user = usage.cpu;
        let nice = rng.random::<f64>() * config.cpu.nice_max;
        let system = rng.random::<f64>() * config.cpu.system_max;
        let wait = rng.random::<f64>() * config.cpu.wait_max;
        Self {
            timestamp: timestamp(),
            host: host.to_string(),
            core: CORE_ALL,
            user,
            nice,
            system,
            wait,
            idle: (100.0 - (user + nice + system + wait)).max(0.0),
        }
    }
}

impl fmt::Display for CpuLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t\t{}\t\t{}\t\t{:.2}\t\t{:.2}\t\t{:.2}\t\t{:.2}\t\t{:.2}\r\n",
            self.timestamp, self.host, self.core, self.user, self.nice, self.system, self.wait, self.idle,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLine {
    pub timestamp: String,
    pub host: String,
    pub total_mb: u64,
    pub free_mb: u64,
    pub used_mb: u64,
    pub free_percent: f64,
    pub used_percent: f64,
    pub processes: u64,
    pub threads: u64,
    pub interrupts: u64,
}

impl MemoryLine {
    /// `recent` is the host's count of transactions in the trailing window.
    pub fn new<R: Rng + ?Sized>(
        host: &str,
        usage: &HostUsage,
        recent: usize,
        config: &SimConfig,
        rng: &mut R,
    ) -> Self {
        let memory = &config.memory;
        let total = memory.total_mb;
        let used = (usage.memory_mb.round().max(0.0) as u64).min(total);
        let free = total - used;
        let free_percent = if total == 0 {
            0.0
        } else {
            free as f64 / total as f64 * 100.0
        };
        let recent = recent as u64;

        Self {
            timestamp: timestamp(),
            host: host.to_string(),
            total_mb: total,
            free_mb: free,
            used_mb: used,
            free_percent,
            used_percent: 100.0 - free_percent,
            processes: memory.processes.sample(rng) + recent,
            threads: memory.threads.sample(rng) + recent * 2,
            interrupts: memory.interrupts.sample(rng) + recent,
        }
    }
}

impl fmt::Display for MemoryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t\t{}\t\t{}\t\t{}\t\t{}\t\t{:.1}\t\t{:.1}\t\t{}\t\t{}\t\t{:.2}\r\n",
            self.timestamp,
            self.host,
            self.total_mb,
            self.free_mb,
            self.used_mb,
            self.free_percent,
            self.used_percent,
            self.processes,
            self.threads,
            self.interrupts as f64,
        )
    }
}

/// Writes one df, cpu and memory line for its host every metric interval.
pub struct MetricWorker {
    host: Arc<HostState>,
    ctx: Arc<SimContext>,
    cancel: CancellationToken,
    rng: StdRng,
}

impl MetricWorker {
    pub fn new(host: Arc<HostState>, ctx: Arc<SimContext>, cancel: CancellationToken) -> Self {
        Self {
            host,
            ctx,
            cancel,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    pub async fn run(mut self) {
        info!(host = self.host.name(), "metric worker started");
        let period = self
            .ctx
            .scaled(self.ctx.config().metric_interval_secs)
            .max(MIN_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.emit().await {
                warn!(host = self.host.name(), error = %e, "metric iteration failed");
            }
        }

        info!(host = self.host.name(), "metric worker stopped");
    }

    /// Write the three lines for the host's current figures.
    pub async fn emit(&mut self) -> Result<(), IterationError> {
        let config = self.ctx.config();
        let (usage, recent) = self.host.snapshot();
        let name = self.host.name();

        let disk = DiskLine::new(name, &usage, config);
        let cpu = CpuLine::new(name, &usage, config, &mut self.rng);
        let memory = MemoryLine::new(name, &usage, recent, config, &mut self.rng);

        let sinks = self.ctx.sinks();
        sinks.disk.write(LogRecord::new(disk.to_string())).await?;
        sinks.cpu.write(LogRecord::new(cpu.to_string())).await?;
        sinks.memory.write(LogRecord::new(memory.to_string())).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CPU_USAGE_LOG, DISK_USAGE_LOG, MEMORY_USAGE_LOG};
    use tempfile::TempDir;

    fn usage(cpu: f64, memory_mb: f64, disk: f64) -> HostUsage {
        HostUsage { cpu, memory_mb, disk }
    }

    fn fields(line: &str) -> Vec<&str> {
        line.trim_end_matches("\r\n").split("\t\t").collect()
    }

    #[test]
    fn test_disk_line_rounds_usage_up() {
        let config = SimConfig::default();
        let line = DiskLine::new("solsyspingfed7", &usage(7.0, 1500.0, 5.2), &config);

        assert_eq!(line.percent, 6);
        assert_eq!(line.used_gb, 6);
        assert_eq!(line.available_gb, 94);

        let text = line.to_string();
        assert!(text.ends_with("\r\n"));
        assert_eq!(
            &fields(&text)[1..],
            ["solsyspingfed7", "none", "100G", "6G", "94G", "6%", "/"]
        );
    }

    #[test]
    fn test_cpu_line_components_sum_to_hundred() {
        let config = SimConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let line = CpuLine::new("h", &usage(31.39, 1500.0, 10.0), &config, &mut rng);

        assert_eq!(line.core, CORE_ALL);
        assert!(line.nice < 5.0 && line.system < 20.0 && line.wait < 15.0);
        let total = line.user + line.nice + line.system + line.wait + line.idle;
        assert!((total - 100.0).abs() < 1e-9);

        let text = line.to_string();
        assert_eq!(fields(&text).len(), 8);
        assert_eq!(fields(&text)[3], "31.39");
    }

    #[test]
    fn test_cpu_idle_never_negative() {
        let config = SimConfig::default();
        let mut rng = StdRng::seed_from_u64(4);
        let line = CpuLine::new("h", &usage(99.0, 1500.0, 10.0), &config, &mut rng);
        assert!(line.idle >= 0.0);
    }

    #[test]
    fn test_memory_line_counts_follow_recent_transactions() {
        let config = SimConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let line = MemoryLine::new("h", &usage(7.0, 1558.0, 10.0), 10, &config, &mut rng);

        assert_eq!(line.total_mb, 32768);
        assert_eq!(line.used_mb, 1558);
        assert_eq!(line.free_mb, 32768 - 1558);
        assert!((line.free_percent + line.used_percent - 100.0).abs() < 1e-9);
        assert!((110..=160).contains(&line.processes));
        assert!((320..=420).contains(&line.threads));
        assert!((510..=760).contains(&line.interrupts));
        assert_eq!(fields(&line.to_string()).len(), 10);
    }

    #[tokio::test]
    async fn test_emit_writes_one_line_per_stream() {
        let dir = TempDir::new().unwrap();
        let config = SimConfig {
            log_dir: dir.path().to_path_buf(),
            hosts: vec!["idp-a".to_string()],
            ..SimConfig::default()
        };
        let ctx = Arc::new(SimContext::new(config).unwrap());
        let host = Arc::clone(ctx.host("idp-a").unwrap());
        let mut worker = MetricWorker::new(host, Arc::clone(&ctx), CancellationToken::new());

        worker.emit().await.unwrap();
        ctx.sinks().stop_all().await.unwrap();

        for file in [DISK_USAGE_LOG, CPU_USAGE_LOG, MEMORY_USAGE_LOG] {
            let content = std::fs::read_to_string(dir.path().join(file)).unwrap();
            assert_eq!(content.matches("\r\n").count(), 1, "{file}");
            assert_eq!(fields(&content)[1], "idp-a");
        }
    }
}
