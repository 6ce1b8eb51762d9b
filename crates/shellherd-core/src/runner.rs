//! Execution engine carrying observers to completion.
//!
//! Every started observer gets a watchdog task on the shared tokio pool.
//! The task wakes on one of three signals: the observer completed, its
//! wall-clock timeout elapsed, or it was cancelled (cancellation completes
//! the observer, so the first signal covers it). Line parsing itself
//! happens on the connection pump, not here.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::observer::ObserverCore;

/// Handle to the shared observer execution pool.
///
/// Cloning is cheap; clones share the active-task counter. Observers
/// across many devices run concurrently — the model is parallel workers,
/// not a single cooperative loop.
#[derive(Clone, Debug, Default)]
pub struct Runner {
    active: Arc<AtomicUsize>,
}

impl Runner {
    /// Creates a runner handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of observers currently being watched, for diagnostics.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Spawns the watchdog task for a started observer.
    ///
    /// With a timeout, the watchdog stores [`Error::Timeout`] into the
    /// observer when the deadline passes first; an observer that completed
    /// in the meantime is left untouched. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, core: Arc<ObserverCore>, timeout: Option<Duration>) {
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            match timeout {
                Some(limit) => {
                    if tokio::time::timeout(limit, core.wait_done()).await.is_err() {
                        tracing::debug!(observer = %core.name(), ?limit, "observer timed out");
                        // A completion racing the deadline wins; ignore the
                        // rejected write.
                        let _ = core.set_exception(Error::Timeout {
                            observer: core.name().to_string(),
                            after: limit,
                        });
                    }
                }
                None => core.wait_done().await,
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

/// Picks the effective timeout: the smaller positive one of the caller's
/// and the configuration's; a lone positive value wins; no positive value
/// means unbounded.
#[must_use]
pub fn effective_timeout(
    caller: Option<Duration>,
    configured: Option<Duration>,
) -> Option<Duration> {
    let positive = |d: &Duration| !d.is_zero();
    match (
        caller.filter(positive),
        configured.filter(positive),
    ) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
