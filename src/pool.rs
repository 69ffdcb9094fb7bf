//! Transaction worker pool.
//!
//! Workers are kept in spawn order so that retiring a batch always stops the
//! most recently started ones first.

use crate::context::SimContext;
use crate::simulation::TransactionWorker;
use crate::timer::TimerSet;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct WorkerHandle {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct WorkerPool {
    ctx: Arc<SimContext>,
    timers: Arc<TimerSet>,
    workers: Mutex<BTreeMap<u64, WorkerHandle>>,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(ctx: Arc<SimContext>, timers: Arc<TimerSet>) -> Self {
        Self {
            ctx,
            timers,
            workers: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start `count` workers with a short random pause between starts.
    ///
    /// A non-zero `lifetime` schedules the retirement of the same number of
    /// workers once it has elapsed. Returns how many workers were started,
    /// which is fewer than `count` only if the pool shuts down meanwhile.
    pub async fn spawn(self: &Arc<Self>, count: usize, lifetime: Duration) -> usize {
        let stagger_secs = self.ctx.config().oauth.spawn_stagger_secs;
        let mut spawned = 0;

        for i in 0..count {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.spawn_one();
            spawned += 1;

            if i + 1 < count {
                let stagger = self.ctx.scaled(rand::random::<f64>() * stagger_secs);
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(stagger) => {}
                }
            }
        }

        if spawned > 0 && !lifetime.is_zero() {
            let pool = Arc::clone(self);
            let scheduled = self.timers.schedule(lifetime, async move {
                pool.retire_batch(spawned).await;
            });
            if scheduled.is_none() {
                debug!(spawned, "pool timers cancelled, batch lifetime not enforced");
            }
        }

        info!(spawned, active = self.len(), "spawned transaction workers");
        spawned
    }

    /// Stop and join the `count` most recently started workers, or all of
    /// them when `count` is 0 or not smaller than the pool.
    pub async fn retire_batch(&self, count: usize) -> usize {
        let retired: Vec<WorkerHandle> = {
            let mut workers = self.lock();
            let n = if count == 0 || count >= workers.len() {
                workers.len()
            } else {
                count
            };
            (0..n)
                .filter_map(|_| workers.pop_last().map(|(_, handle)| handle))
                .collect()
        };

        for handle in &retired {
            handle.cancel.cancel();
        }

        let total = retired.len();
        for WorkerHandle { id, task, .. } in retired {
            match task.await {
                Ok(()) => debug!(worker = %id, "transaction worker joined"),
                Err(e) => warn!(worker = %id, error = %e, "transaction worker panicked"),
            }
        }

        info!(retired = total, active = self.len(), "retired transaction workers");
        total
    }

    /// Stop every worker and refuse further spawns.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.retire_batch(0).await;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn spawn_one(&self) {
        let cancel = self.shutdown.child_token();
        let worker = TransactionWorker::new(Arc::clone(&self.ctx), cancel.clone());
        let id = worker.id();
        let task = tokio::spawn(worker.run());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(seq, WorkerHandle { id, cancel, task });
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use tempfile::TempDir;

    fn pool(dir: &TempDir) -> (Arc<SimContext>, Arc<TimerSet>, Arc<WorkerPool>) {
        let config = SimConfig {
            log_dir: dir.path().to_path_buf(),
            hosts: vec!["idp-pool".to_string()],
            time_scale: 0.001,
            ..SimConfig::default()
        };
        let ctx = Arc::new(SimContext::new(config).unwrap());
        let timers = Arc::new(TimerSet::new());
        let pool = Arc::new(WorkerPool::new(Arc::clone(&ctx), Arc::clone(&timers)));
        (ctx, timers, pool)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_retires_after_lifetime() {
        let dir = TempDir::new().unwrap();
        let (ctx, timers, pool) = pool(&dir);

        let spawned = pool.spawn(5, ctx.scaled(2.0)).await;
        assert_eq!(spawned, 5);
        assert_eq!(pool.len(), 5);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.len(), 0);

        timers.cancel_all().await;
        ctx.sinks().stop_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retire_batch_zero_retires_everything() {
        let dir = TempDir::new().unwrap();
        let (ctx, timers, pool) = pool(&dir);

        pool.spawn(5, Duration::ZERO).await;
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.retire_batch(0).await, 5);
        assert!(pool.is_empty());

        timers.cancel_all().await;
        ctx.sinks().stop_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_partial_retire_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let (ctx, timers, pool) = pool(&dir);

        pool.spawn(5, Duration::ZERO).await;
        assert_eq!(pool.retire_batch(2).await, 2);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.retire_batch(10).await, 3);

        pool.spawn(2, Duration::ZERO).await;
        pool.shutdown().await;
        assert!(pool.is_empty());
        assert_eq!(pool.spawn(3, Duration::ZERO).await, 0);

        timers.cancel_all().await;
        ctx.sinks().stop_all().await.unwrap();
    }
}
