//! Process-wide sink for observer failures nobody retrieved.
//!
//! An observer that fails in the background stores its error until the
//! owner calls `result()` or `await_done()`. If the owner never looks, the
//! failure would vanish silently when the observer is dropped. Dropped,
//! unretrieved failures land here instead, where a test harness (or any
//! caller) can drain and inspect them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::Error;

/// A failure that was stored in an observer but never retrieved.
#[derive(Debug, Clone)]
pub struct UnraisedFailure {
    /// Name of the observer that failed.
    pub observer: String,
    /// The stored error.
    pub error: Error,
    /// When the failure was reported to the sink.
    pub when: DateTime<Utc>,
}

static SINK: Mutex<Vec<UnraisedFailure>> = Mutex::new(Vec::new());

/// Records a failure that was never retrieved by the observer's owner.
pub(crate) fn report_unraised(observer: &str, error: Error) {
    tracing::warn!(observer, %error, "failure was never retrieved");
    let failure = UnraisedFailure {
        observer: observer.to_string(),
        error,
        when: Utc::now(),
    };
    if let Ok(mut sink) = SINK.lock() {
        sink.push(failure);
    }
}

/// Drains and returns all failures collected so far.
#[must_use]
pub fn take_unraised_failures() -> Vec<UnraisedFailure> {
    SINK.lock().map(|mut sink| std::mem::take(&mut *sink)).unwrap_or_default()
}
