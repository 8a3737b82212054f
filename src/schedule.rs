//! Poll scheduling
//!
//! All waiting in the watcher goes through [`Clock`], so tests can swap in a
//! [`ManualClock`] and run retry loops without real sleeps.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Source of delays between polls
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the tokio timer
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that records requested sleeps and returns immediately
#[cfg(test)]
#[derive(Default)]
pub struct ManualClock {
    slept: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl ManualClock {
    /// Clock with no recorded sleeps
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().expect("ManualClock lock poisoned").clone()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .expect("ManualClock lock poisoned")
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// Fixed-interval poller
///
/// Runs a check, and while it reports `false`, sleeps one interval on the
/// clock before checking again.
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    interval: Duration,
}

impl<'a> Poller<'a> {
    /// Create a poller ticking every `interval`
    pub fn new(clock: &'a dyn Clock, interval: Duration) -> Self {
        Self { clock, interval }
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `check` until it returns `true`
    ///
    /// Returns the number of checks performed, including the successful one.
    pub async fn until<F, Fut>(&self, mut check: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut polls = 0;
        loop {
            polls += 1;
            if check().await {
                return polls;
            }
            debug!(polls, interval_secs = self.interval.as_secs(), "Condition not met, sleeping");
            self.clock.sleep(self.interval).await;
        }
    }
}
