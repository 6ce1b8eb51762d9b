//! Shared lifecycle state of connection observers.
//!
//! Commands and events are both "watch the stream until X happens" units;
//! everything they share — the created/running/done lifecycle, the
//! write-once result and error slots, cancellation, done callbacks and the
//! completion latch callers park on — lives in [`ObserverCore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;

use crate::connection::{ObservableConnection, SubscriberId};
use crate::error::{Error, Result};
use crate::sink;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phases of an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, not yet started.
    Created,
    /// Subscribed and watching the stream.
    Running,
    /// Finished: result set, error set, or cancelled.
    Done,
}

/// Callback invoked once after the observer completes.
pub type DoneCallback = Box<dyn FnOnce(&ObserverCore) + Send>;

struct CoreState {
    lifecycle: Lifecycle,
    cancelled: bool,
    result: Option<Value>,
    error: Option<Error>,
    error_retrieved: bool,
    timeout: Option<Duration>,
    started_at: Option<DateTime<Utc>>,
    last_data_at: Option<DateTime<Utc>>,
    subscription: Option<SubscriberId>,
    done_callbacks: Vec<DoneCallback>,
}

/// Shared observer state: lifecycle, result/error slots, completion latch.
///
/// Invariants: `result` and `error` are mutually exclusive and each is set
/// at most once; `done == result-set ∨ error-set ∨ cancelled`; once done
/// the observer unsubscribes itself from its connection.
pub struct ObserverCore {
    id: u64,
    name: String,
    connection: Arc<ObservableConnection>,
    state: Mutex<CoreState>,
    done: Notify,
}

impl ObserverCore {
    /// Creates a fresh observer core bound to a connection.
    #[must_use]
    pub fn new(name: impl Into<String>, connection: Arc<ObservableConnection>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            connection,
            state: Mutex::new(CoreState {
                lifecycle: Lifecycle::Created,
                cancelled: false,
                result: None,
                error: None,
                error_retrieved: false,
                timeout: None,
                started_at: None,
                last_data_at: None,
                subscription: None,
                done_callbacks: Vec::new(),
            }),
            done: Notify::new(),
        })
    }

    /// Unique observer id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Observer name, used in logs and error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection this observer watches.
    #[must_use]
    pub fn connection(&self) -> &Arc<ObservableConnection> {
        &self.connection
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().map_or(Lifecycle::Done, |s| s.lifecycle)
    }

    /// True once the observer finished for any reason.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.lifecycle() == Lifecycle::Done
    }

    /// True when the observer was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().is_ok_and(|s| s.cancelled)
    }

    /// The effective timeout set at start, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().ok().and_then(|s| s.timeout)
    }

    /// Timestamp of the most recent data this observer processed.
    #[must_use]
    pub fn last_data_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ok().and_then(|s| s.last_data_at)
    }

    /// Records that data arrived; machines call this per chunk.
    pub fn note_data(&self, when: DateTime<Utc>) {
        if let Ok(mut s) = self.state.lock() {
            s.last_data_at = Some(when);
        }
    }

    /// Transitions `Created → Running`, recording the connection
    /// subscription and effective timeout.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyStarted`] on a second start, or with the
    /// stored cancellation when the observer was cancelled before start.
    pub fn mark_started(
        &self,
        subscription: SubscriberId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| Error::WrongUsage("observer state poisoned".to_string()))?;
        match s.lifecycle {
            Lifecycle::Created => {
                s.lifecycle = Lifecycle::Running;
                s.subscription = Some(subscription);
                s.timeout = timeout;
                s.started_at = Some(Utc::now());
                tracing::debug!(observer = %self.name, id = self.id, ?timeout, "started");
                Ok(())
            }
            Lifecycle::Running | Lifecycle::Done => {
                Err(Error::AlreadyStarted(self.name.clone()))
            }
        }
    }

    /// Stores the successful result; first writer wins.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ResultAlreadySet`] when a result or error was
    /// already stored.
    pub fn set_result(&self, value: Value) -> Result<()> {
        let callbacks = {
            let mut s = self
                .state
                .lock()
                .map_err(|_| Error::WrongUsage("observer state poisoned".to_string()))?;
            if s.lifecycle == Lifecycle::Done {
                return Err(Error::ResultAlreadySet(self.name.clone()));
            }
            s.result = Some(value);
            self.finish_locked(&mut s)
        };
        self.after_finish(callbacks);
        Ok(())
    }

    /// Stores a failure; first writer wins.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ResultAlreadySet`] when a result or error was
    /// already stored.
    pub fn set_exception(&self, error: Error) -> Result<()> {
        let callbacks = {
            let mut s = self
                .state
                .lock()
                .map_err(|_| Error::WrongUsage("observer state poisoned".to_string()))?;
            if s.lifecycle == Lifecycle::Done {
                return Err(Error::ResultAlreadySet(self.name.clone()));
            }
            tracing::debug!(observer = %self.name, id = self.id, %error, "failed");
            s.error = Some(error);
            self.finish_locked(&mut s)
        };
        self.after_finish(callbacks);
        Ok(())
    }

    /// Cancels the observer unless it already finished.
    ///
    /// Idempotent, never blocks, never fails. Returns true when this call
    /// performed the cancellation.
    pub fn cancel(&self, reason: &str) -> bool {
        let callbacks = {
            let Ok(mut s) = self.state.lock() else {
                return false;
            };
            if s.lifecycle == Lifecycle::Done {
                return false;
            }
            tracing::debug!(observer = %self.name, id = self.id, reason, "cancelled");
            s.cancelled = true;
            s.error = Some(Error::Cancelled {
                observer: self.name.clone(),
                reason: reason.to_string(),
            });
            self.finish_locked(&mut s)
        };
        self.after_finish(callbacks);
        true
    }

    fn finish_locked(&self, s: &mut CoreState) -> (Option<SubscriberId>, Vec<DoneCallback>) {
        s.lifecycle = Lifecycle::Done;
        (s.subscription.take(), std::mem::take(&mut s.done_callbacks))
    }

    fn after_finish(&self, (subscription, callbacks): (Option<SubscriberId>, Vec<DoneCallback>)) {
        if let Some(id) = subscription {
            self.connection.unsubscribe(id);
        }
        for callback in callbacks {
            callback(self);
        }
        self.done.notify_waiters();
    }

    /// Registers a callback to run right after completion.
    ///
    /// When the observer is already done the callback runs immediately on
    /// the calling thread. Callbacks must not block.
    pub fn add_done_callback(&self, callback: DoneCallback) {
        let run_now = {
            match self.state.lock() {
                Ok(mut s) => {
                    if s.lifecycle == Lifecycle::Done {
                        true
                    } else {
                        s.done_callbacks.push(callback);
                        return;
                    }
                }
                Err(_) => return,
            }
        };
        if run_now {
            callback(self);
        }
    }

    /// Waits until the observer completes, with no deadline.
    pub async fn wait_done(&self) {
        loop {
            let notified = self.done.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Waits for completion and returns the result.
    ///
    /// # Errors
    ///
    /// [`Error::StillRunning`] when `timeout` elapses first; otherwise the
    /// stored failure, re-raised on the waiting caller.
    pub async fn await_done(&self, timeout: Option<Duration>) -> Result<Value> {
        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, self.wait_done()).await.is_err() {
                    return Err(Error::StillRunning(self.name.clone()));
                }
            }
            None => self.wait_done().await,
        }
        self.result()
    }

    /// Returns the stored result, or re-raises the stored failure.
    ///
    /// # Errors
    ///
    /// [`Error::StillRunning`] before completion; the stored error after a
    /// failed or cancelled run.
    pub fn result(&self) -> Result<Value> {
        let Ok(mut s) = self.state.lock() else {
            return Err(Error::WrongUsage("observer state poisoned".to_string()));
        };
        if s.lifecycle != Lifecycle::Done {
            return Err(Error::StillRunning(self.name.clone()));
        }
        if let Some(error) = s.error.clone() {
            s.error_retrieved = true;
            return Err(error);
        }
        s.result
            .clone()
            .ok_or_else(|| Error::StillRunning(self.name.clone()))
    }
}

impl Drop for ObserverCore {
    fn drop(&mut self) {
        if let Ok(s) = self.state.lock()
            && let Some(error) = &s.error
            && !s.error_retrieved
            // Deliberate cancellation is not a silent failure.
            && !matches!(error, Error::Cancelled { .. })
        {
            sink::report_unraised(&self.name, error.clone());
        }
    }
}

impl std::fmt::Debug for ObserverCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn core() -> Arc<ObserverCore> {
        ObserverCore::new("probe", ObservableConnection::new("test"))
    }

    #[test]
    fn test_result_set_once() {
        let core = core();
        assert!(core.set_result(json!({"ok": true})).is_ok());
        assert!(matches!(
            core.set_result(json!({"ok": false})),
            Err(Error::ResultAlreadySet(_))
        ));
        assert!(matches!(
            core.set_exception(Error::WrongUsage("late".to_string())),
            Err(Error::ResultAlreadySet(_))
        ));
    }

    #[test]
    fn test_exception_then_result_rejected() {
        let core = core();
        assert!(core.set_exception(Error::WrongUsage("bad".to_string())).is_ok());
        assert!(matches!(
            core.set_result(json!(1)),
            Err(Error::ResultAlreadySet(_))
        ));
        assert!(matches!(core.result(), Err(Error::WrongUsage(_))));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let core = core();
        assert!(core.cancel("first"));
        assert!(!core.cancel("second"));
        assert!(core.is_cancelled());
        assert!(matches!(core.result(), Err(Error::Cancelled { .. })));
    }

    #[test]
    fn test_cancel_after_done_is_noop() {
        let core = core();
        core.set_result(json!(42)).unwrap_or(());
        assert!(!core.cancel("too late"));
        assert!(!core.is_cancelled());
    }

    #[test]
    fn test_second_start_fails() {
        let core = core();
        assert!(core.mark_started(1, None).is_ok());
        assert!(matches!(
            core.mark_started(2, None),
            Err(Error::AlreadyStarted(_))
        ));
    }

    #[test]
    fn test_done_callback_runs_on_completion() {
        let core = core();
        let hits = Arc::new(AtomicU64::new(0));
        let hits_cb = Arc::clone(&hits);
        core.add_done_callback(Box::new(move |_| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        core.set_result(json!(null)).unwrap_or(());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_done_callback_after_done_runs_immediately() {
        let core = core();
        core.set_result(json!(null)).unwrap_or(());
        let hits = Arc::new(AtomicU64::new(0));
        let hits_cb = Arc::clone(&hits);
        core.add_done_callback(Box::new(move |_| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_await_done_returns_result() {
        let core = core();
        let waiter = Arc::clone(&core);
        let task = tokio::spawn(async move { waiter.await_done(None).await });
        tokio::task::yield_now().await;
        core.set_result(json!({"USER": "operator"})).unwrap_or(());
        let value = task.await.unwrap_or_else(|_| Err(Error::WrongUsage("join".into())));
        assert_eq!(value.ok(), Some(json!({"USER": "operator"})));
    }

    #[tokio::test]
    async fn test_await_done_times_out_with_still_running() {
        let core = core();
        let out = core.await_done(Some(Duration::from_millis(20))).await;
        assert!(matches!(out, Err(Error::StillRunning(_))));
    }

    #[test]
    fn test_unretrieved_failure_reaches_sink() {
        crate::sink::take_unraised_failures();
        {
            let core = ObserverCore::new("doomed", ObservableConnection::new("test"));
            core.set_exception(Error::WrongUsage("boom".to_string())).unwrap_or(());
        }
        let failures = crate::sink::take_unraised_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].observer, "doomed");
    }

    #[test]
    fn test_retrieved_failure_stays_out_of_sink() {
        crate::sink::take_unraised_failures();
        {
            let core = ObserverCore::new("looked-at", ObservableConnection::new("test"));
            core.set_exception(Error::WrongUsage("boom".to_string())).unwrap_or(());
            let _ = core.result();
        }
        assert!(crate::sink::take_unraised_failures().is_empty());
    }
}
