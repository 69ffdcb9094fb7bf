//! # authsim - mock OAuth audit and OS metric log generator
//!
//! Produces realistic-looking telemetry for a fictitious authentication
//! service: a pipe-delimited audit log with one line per OAuth transaction
//! stage, plus per-host df, cpu and memory logs whose figures follow the
//! transaction volume.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Simulator                               │
//! │                                                                      │
//! │   TimerSet ── DiurnalRamp ──┐          disk cleanup (periodic)       │
//! │                             ▼                                        │
//! │                       ┌────────────┐                                 │
//! │                       │ WorkerPool │                                 │
//! │                       └─────┬──────┘                                 │
//! │                             │ spawn / retire_batch                   │
//! │                             ▼                                        │
//! │   ┌─────────────────────────────────────┐   ┌────────────────────┐   │
//! │   │ TransactionWorker × N               │   │ MetricWorker × host│   │
//! │   │  plan → sleep → AuditEntry per stage│   │  df / cpu / mem    │   │
//! │   └───────┬──────────────────┬──────────┘   └───┬──────────┬─────┘   │
//! │           │ record_transaction                  │ snapshot │         │
//! │           ▼                  │                  ▼          │         │
//! │   ┌────────────────────────┐ │   ┌─────────────────────┐   │         │
//! │   │ HostState (per host)   │◄┼───┤ SlidingWindowCounter│   │         │
//! │   └────────────────────────┘ │   └─────────────────────┘   │         │
//! │                              ▼                             ▼         │
//! │        LogSink: bounded queue → writer thread → file (+ .1 backup)   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use authsim::{SimConfig, Simulator};
//!
//! # async fn demo() -> Result<(), authsim::SimError> {
//! let config = SimConfig {
//!     log_dir: "/tmp/mock".into(),
//!     time_scale: 0.01,
//!     ..SimConfig::default()
//! };
//! let simulator = Simulator::start(config)?;
//! tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//! simulator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod pool;
pub mod ramp;
pub mod simulation;
pub mod simulator;
pub mod sink;
pub mod timer;
pub mod window;

pub use config::{QueuePolicy, SimConfig};
pub use context::SimContext;
pub use error::{ConfigError, IterationError, SimError, SinkError};
pub use pool::WorkerPool;
pub use simulator::Simulator;
pub use sink::{LogRecord, LogSink};
pub use timer::{TimerHandle, TimerSet};
pub use window::SlidingWindowCounter;
