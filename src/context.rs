//! Shared simulation environment: configuration, hosts and log sinks.

use crate::config::{AUDIT_LOG, CPU_USAGE_LOG, DISK_USAGE_LOG, MEMORY_USAGE_LOG, SimConfig};
use crate::error::{IterationError, SimError, SinkError};
use crate::host::HostState;
use crate::sink::LogSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// One sink per log stream.
pub struct Sinks {
    pub audit: LogSink,
    pub cpu: LogSink,
    pub disk: LogSink,
    pub memory: LogSink,
}

impl Sinks {
    pub fn open(config: &SimConfig) -> Result<Self, SinkError> {
        Ok(Self {
            audit: LogSink::open(config.log_path(AUDIT_LOG), &config.sink)?,
            cpu: LogSink::open(config.log_path(CPU_USAGE_LOG), &config.sink)?,
            disk: LogSink::open(config.log_path(DISK_USAGE_LOG), &config.sink)?,
            memory: LogSink::open(config.log_path(MEMORY_USAGE_LOG), &config.sink)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogSink> {
        [&self.audit, &self.cpu, &self.disk, &self.memory].into_iter()
    }

    /// Drain and close every sink, even if one fails. Returns the first error.
    pub async fn stop_all(&self) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in self.iter() {
            match sink.stop().await {
                Ok(()) => info!(path = %sink.path().display(), "log sink stopped"),
                Err(e) => {
                    error!(path = %sink.path().display(), error = %e, "log sink failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

pub struct SimContext {
    config: SimConfig,
    hosts: Vec<Arc<HostState>>,
    index: HashMap<String, usize>,
    sinks: Sinks,
}

impl SimContext {
    /// Validate `config`, seed every host and open the log sinks.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;

        let mut rng = rand::rng();
        let hosts: Vec<Arc<HostState>> = config
            .hosts
            .iter()
            .map(|name| Arc::new(HostState::new(name.as_str(), &config, &mut rng)))
            .collect();
        let index = config
            .hosts
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let sinks = Sinks::open(&config)?;

        Ok(Self {
            config,
            hosts,
            index,
            sinks,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn hosts(&self) -> &[Arc<HostState>] {
        &self.hosts
    }

    pub fn host(&self, name: &str) -> Result<&Arc<HostState>, IterationError> {
        self.index
            .get(name)
            .and_then(|i| self.hosts.get(*i))
            .ok_or_else(|| IterationError::UnknownHost(name.to_string()))
    }

    pub fn host_names(&self) -> &[String] {
        &self.config.hosts
    }

    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }

    pub fn scaled(&self, secs: f64) -> Duration {
        self.config.scaled(secs)
    }
}
