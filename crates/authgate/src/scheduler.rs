//! Delayed job scheduling for the refresh loop.
//!
//! The client never sleeps itself: it hands a job and a delay to a
//! [`Scheduler`]. [`TokioScheduler`] runs jobs on the tokio runtime;
//! [`ManualScheduler`] queues them so tests decide when time passes.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

/// A scheduled unit of work.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs jobs after a delay.
pub trait Scheduler: Send + Sync {
    /// Runs `job` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, job: Job);
}

/// [`Scheduler`] backed by `tokio::spawn` and `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Scheduling job in {delay:?}");
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    job.await;
                });
            }
            Err(e) => warn!("No tokio runtime, dropping scheduled job: {e}"),
        }
    }
}

/// [`Scheduler`] that only runs jobs when asked.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<(Duration, Job)>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().map_or(0, |queue| queue.len())
    }

    /// Delays of the queued jobs, oldest first.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.queue
            .lock()
            .map(|queue| queue.iter().map(|(delay, _)| *delay).collect())
            .unwrap_or_default()
    }

    /// Runs the oldest queued job; returns false if none was queued.
    pub async fn run_next(&self) -> bool {
        let next = self.queue.lock().ok().and_then(|mut queue| queue.pop_front());
        match next {
            Some((_, job)) => {
                job.await;
                true
            }
            None => false,
        }
    }

    /// Drops every queued job.
    pub fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back((delay, job));
        }
    }
}
