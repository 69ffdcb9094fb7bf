//! Simulator lifecycle: start everything, then tear it down in order.

use crate::clock::SimClock;
use crate::config::SimConfig;
use crate::context::SimContext;
use crate::error::SimError;
use crate::pool::WorkerPool;
use crate::ramp::DiurnalRamp;
use crate::simulation::MetricWorker;
use crate::timer::TimerSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// A running simulation.
pub struct Simulator {
    ctx: Arc<SimContext>,
    timers: Arc<TimerSet>,
    pool: Arc<WorkerPool>,
    metrics: TaskTracker,
    metrics_cancel: CancellationToken,
}

impl Simulator {
    /// Open the sinks and start the initial worker batch, one metric worker
    /// per host, the disk cleanup timer and (if enabled) the usage ramp.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: SimConfig) -> Result<Self, SimError> {
        let ctx = Arc::new(SimContext::new(config)?);
        let config = ctx.config();
        let timers = Arc::new(TimerSet::new());
        let pool = Arc::new(WorkerPool::new(Arc::clone(&ctx), Arc::clone(&timers)));

        let metrics = TaskTracker::new();
        let metrics_cancel = CancellationToken::new();
        for host in ctx.hosts() {
            let worker = MetricWorker::new(
                Arc::clone(host),
                Arc::clone(&ctx),
                metrics_cancel.child_token(),
            );
            metrics.spawn(worker.run());
        }

        let cleanup_ctx = Arc::clone(&ctx);
        timers.schedule_every(ctx.scaled(config.disk.cleanup_interval_secs), move || {
            let mut rng = rand::rng();
            for host in cleanup_ctx.hosts() {
                host.reset_disk(cleanup_ctx.config(), &mut rng);
            }
            debug!("disk cleanup reset host disk usage");
        });

        if config.usage.enabled {
            let ramp = DiurnalRamp::new(
                Arc::clone(&pool),
                config.usage.clone(),
                SimClock::new(config.time_scale),
                config.time_scale,
            );
            timers.spawn_task(move |token| ramp.run(token));
        }

        let initial = config.oauth.initial_workers.sample(&mut rand::rng());
        let initial_pool = Arc::clone(&pool);
        timers.spawn_task(move |token| async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = initial_pool.spawn(initial, Duration::ZERO) => {}
            }
        });

        info!(
            hosts = ctx.hosts().len(),
            initial_workers = initial,
            log_dir = %config.log_dir.display(),
            "simulator started"
        );

        Ok(Self {
            ctx,
            timers,
            pool,
            metrics,
            metrics_cancel,
        })
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Stop timers, transaction workers, metric workers and finally the sinks,
    /// so no sink closes while something may still write to it.
    pub async fn shutdown(self) -> Result<(), SimError> {
        info!("shutting down");

        self.timers.cancel_all().await;
        debug!("timers cancelled");

        self.pool.shutdown().await;
        debug!("transaction workers stopped");

        self.metrics_cancel.cancel();
        self.metrics.close();
        self.metrics.wait().await;
        debug!("metric workers stopped");

        self.ctx.sinks().stop_all().await?;
        info!("shutdown complete");
        Ok(())
    }
}
