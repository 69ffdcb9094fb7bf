//! Error types shared across the simulator.

use std::io;
use std::path::PathBuf;

/// Failures raised by a [`crate::sink::LogSink`] or its writer thread.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write to {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The writer cannot guarantee the sink is still writable after this.
    #[error("failed to roll over {}: {source}", .path.display())]
    Rotation { path: PathBuf, source: io::Error },

    #[error("queue for {} is full, record dropped", .0.display())]
    QueueFull(PathBuf),

    #[error("sink for {} is closed", .0.display())]
    Closed(PathBuf),

    #[error("writer thread for {} panicked", .0.display())]
    WriterPanicked(PathBuf),
}

/// A failure inside a single transaction or metric iteration.
///
/// The owning worker logs it and carries on with its next iteration.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("unknown host {0}")]
    UnknownHost(String),

    #[error("no hosts configured")]
    NoHosts,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level errors surfaced by [`crate::simulator::Simulator`].
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_display() {
        let error = SinkError::Rotation {
            path: PathBuf::from("/var/log/mock/audit.log"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            error.to_string(),
            "failed to roll over /var/log/mock/audit.log: denied"
        );

        let error = SinkError::Closed(PathBuf::from("cpu.log"));
        assert_eq!(error.to_string(), "sink for cpu.log is closed");
    }

    #[test]
    fn test_iteration_error_wraps_sink_error() {
        let error: IterationError = SinkError::QueueFull(PathBuf::from("df.log")).into();
        assert!(matches!(error, IterationError::Sink(SinkError::QueueFull(_))));
        assert_eq!(error.to_string(), "queue for df.log is full, record dropped");
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Invalid("hosts must not be empty".to_string());
        assert_eq!(
            error.to_string(),
            "invalid configuration: hosts must not be empty"
        );
    }
}
