//! Cancellable deferred and periodic callbacks.
//!
//! All timers of a [`TimerSet`] hang off one cancellation token and one task
//! tracker, so [`TimerSet::cancel_all`] can stop every pending timer and then
//! wait for callbacks that already started.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to one scheduled timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Cancel the timer. Has no effect on a callback that already started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the callback has started (at least once, for periodic timers).
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub struct TimerSet {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`.
    ///
    /// Returns `None` if the set was already cancelled.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Option<TimerHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (token, handle) = self.handle("one-shot")?;
        let fired = Arc::clone(&handle.fired);

        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            fired.store(true, Ordering::Release);
            callback.await;
        });
        Some(handle)
    }

    /// Run `tick` every `period` until cancelled.
    pub fn schedule_every<F>(&self, period: Duration, mut tick: F) -> Option<TimerHandle>
    where
        F: FnMut() + Send + 'static,
    {
        let (token, handle) = self.handle("periodic")?;
        let fired = Arc::clone(&handle.fired);
        let period = period.max(MIN_PERIOD);

        self.tracker.spawn(async move {
            let mut next = Instant::now() + period;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(next) => {}
                }
                fired.store(true, Ordering::Release);
                tick();
                next += period;
            }
        });
        Some(handle)
    }

    /// Run a long-lived task that is handed its own cancellation token.
    pub fn spawn_task<F, Fut>(&self, task: F) -> Option<TimerHandle>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (token, handle) = self.handle("task")?;
        handle.fired.store(true, Ordering::Release);
        self.tracker.spawn(task(token));
        Some(handle)
    }

    /// Cancel every pending timer and wait for running callbacks to return.
    pub async fn cancel_all(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Timers and tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    fn handle(&self, kind: &str) -> Option<(CancellationToken, TimerHandle)> {
        if self.cancel.is_cancelled() {
            debug!(kind, "timer scheduled after cancel_all, ignoring");
            return None;
        }
        let token = self.cancel.child_token();
        let handle = TimerHandle {
            cancel: token.clone(),
            fired: Arc::new(AtomicBool::new(false)),
        };
        Some((token, handle))
    }
}
