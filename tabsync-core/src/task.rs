//! Cancellable background tasks and timers.
//!
//! Every listener, cadence and one-shot timer a context arms is held as a
//! [`TaskHandle`]. Dropping the handle aborts the task, so tearing down the
//! owner leaves nothing running.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default)]
pub struct TaskHandle {
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `fut` on the current Tokio runtime.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(fut)),
        }
    }

    /// Single-shot timer: run `fut` once after `delay`.
    pub fn after<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        })
    }

    /// Fixed cadence: run `tick` immediately, then every `period`.
    ///
    /// Ticks never overlap; a slow tick delays the next one.
    pub fn every<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(async move {
            // `interval` rejects a zero period.
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        })
    }

    /// A handle that owns nothing.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Whether the task is still scheduled or running.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
