//! Periodic jobs running user callbacks on a fixed interval.
//!
//! Jobs are created paused; `start()` begins ticking on the shared tokio
//! pool and `cancel()` pauses again — a job can be restarted any number of
//! times. Ticks that would overlap a still-running callback are skipped
//! unless a misfire grace allows late execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

/// The work a job performs on each tick.
///
/// Returning `Err` is logged; with `cancel_on_error` it also cancels the
/// job.
pub type JobCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct JobInner {
    callback: JobCallback,
    interval: Duration,
    cancel_on_error: bool,
    misfire_grace: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

/// A periodic job handle.
///
/// Dropping the handle cancels the job.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

/// Creates a paused job calling `callback` every `interval`.
///
/// With `cancel_on_error` a failing callback cancels the job after
/// logging. A non-zero `misfire_grace` lets ticks that were delayed (e.g.
/// by a long previous callback) still run instead of being skipped.
#[must_use]
pub fn get_job(
    callback: JobCallback,
    interval: Duration,
    cancel_on_error: bool,
    misfire_grace: Duration,
) -> Job {
    Job {
        inner: Arc::new(JobInner {
            callback,
            interval,
            cancel_on_error,
            misfire_grace,
            ticker: Mutex::new(None),
            active: AtomicBool::new(false),
        }),
    }
}

impl Job {
    /// Begins ticking; a no-op when already running. The first callback
    /// runs one interval after this call. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return;
        }
        // The task holds only a weak reference: dropping the last handle
        // drops the inner state, which aborts the ticker.
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.interval;
        let misfire_grace = self.inner.misfire_grace;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(if misfire_grace.is_zero() {
                MissedTickBehavior::Skip
            } else {
                MissedTickBehavior::Burst
            });
            // The first tick of a tokio interval completes immediately;
            // jobs fire one interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.active.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = (inner.callback)() {
                    tracing::warn!(%err, "periodic job callback failed");
                    if inner.cancel_on_error {
                        inner.active.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });
        if let Ok(mut slot) = self.inner.ticker.lock() {
            *slot = Some(handle);
        }
    }

    /// Pauses the job; `start()` resumes it. Idempotent.
    pub fn cancel(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.ticker.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }

    /// True while the job is ticking.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

impl Drop for JobInner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.ticker.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("interval", &self.inner.interval)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(interval: Duration, cancel_on_error: bool, fail: bool) -> (Job, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        let job = get_job(
            Arc::new(move || {
                hits_cb.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(crate::error::Error::WrongUsage("tick failed".to_string()))
                } else {
                    Ok(())
                }
            }),
            interval,
            cancel_on_error,
            Duration::ZERO,
        );
        (job, hits)
    }

    #[tokio::test]
    async fn test_job_created_paused() {
        let (job, hits) = counting_job(Duration::from_millis(5), false, false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!job.is_active());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_job_ticks_until_cancelled() {
        let (job, hits) = counting_job(Duration::from_millis(10), false, false);
        job.start();
        tokio::time::sleep(Duration::from_millis(55)).await;
        job.cancel();
        let after_cancel = hits.load(Ordering::SeqCst);
        assert!(after_cancel >= 2, "expected a few ticks, got {after_cancel}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_job_restartable_after_cancel() {
        let (job, hits) = counting_job(Duration::from_millis(10), false, false);
        job.start();
        tokio::time::sleep(Duration::from_millis(25)).await;
        job.cancel();
        let first_run = hits.load(Ordering::SeqCst);

        job.start();
        tokio::time::sleep(Duration::from_millis(25)).await;
        job.cancel();
        assert!(hits.load(Ordering::SeqCst) > first_run);
    }

    #[tokio::test]
    async fn test_cancel_on_error_stops_job() {
        let (job, hits) = counting_job(Duration::from_millis(10), true, true);
        job.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!job.is_active());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_without_cancel_keeps_ticking() {
        let (job, hits) = counting_job(Duration::from_millis(10), false, true);
        job.start();
        tokio::time::sleep(Duration::from_millis(55)).await;
        job.cancel();
        assert!(hits.load(Ordering::SeqCst) >= 2);
    }
}
