//! Waiting on groups of observers.

use std::time::Duration;

use crate::observer::Observing;

/// Polling interval while waiting on a group.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Helpers for driving several observers as one unit.
#[derive(Debug, Clone, Copy)]
pub struct EventAwaiter;

impl EventAwaiter {
    /// Waits until every observer is done or `timeout` elapses.
    /// Returns true when all finished in time.
    pub async fn wait_for_all(timeout: Duration, observers: &[&dyn Observing]) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if observers.iter().all(|o| o.observer_core().is_done()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until at least one observer is done or `timeout` elapses.
    /// Returns true when any finished in time.
    pub async fn wait_for_any(timeout: Duration, observers: &[&dyn Observing]) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if observers.iter().any(|o| o.observer_core().is_done()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Splits observers into (done, not-done) by index.
    #[must_use]
    pub fn separate_done(observers: &[&dyn Observing]) -> (Vec<usize>, Vec<usize>) {
        let mut done = Vec::new();
        let mut pending = Vec::new();
        for (idx, observer) in observers.iter().enumerate() {
            if observer.observer_core().is_done() {
                done.push(idx);
            } else {
                pending.push(idx);
            }
        }
        (done, pending)
    }

    /// Cancels every observer in the group.
    pub fn cancel_all(observers: &[&dyn Observing]) {
        for observer in observers {
            observer.observer_core().cancel("cancelled by awaiter");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::{Io, MemoryIo};
    use crate::observer::{Event, MatchMode};
    use regex::Regex;

    fn watcher(conn: &std::sync::Arc<crate::connection::ObservableConnection>, pat: &str) -> Event {
        Event::builder("w", std::sync::Arc::clone(conn))
            .patterns(vec![Regex::new(pat).unwrap()])
            .mode(MatchMode::Any)
            .occurrences(1)
            .build()
    }

    #[tokio::test]
    async fn test_wait_for_all_and_any() {
        let (io, conn) = MemoryIo::wire("mem");
        io.open().unwrap();

        let first = watcher(&conn, "alpha");
        let second = watcher(&conn, "beta");
        first.start(None).await.unwrap();
        second.start(None).await.unwrap();

        io.inject("alpha\n");
        let group: Vec<&dyn Observing> = vec![&first, &second];
        assert!(EventAwaiter::wait_for_any(Duration::from_millis(200), &group).await);
        assert!(!EventAwaiter::wait_for_all(Duration::from_millis(50), &group).await);

        io.inject("beta\n");
        assert!(EventAwaiter::wait_for_all(Duration::from_millis(200), &group).await);

        let (done, pending) = EventAwaiter::separate_done(&group);
        assert_eq!(done, vec![0, 1]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (io, conn) = MemoryIo::wire("mem");
        io.open().unwrap();

        let first = watcher(&conn, "alpha");
        let second = watcher(&conn, "beta");
        first.start(None).await.unwrap();
        second.start(None).await.unwrap();

        let group: Vec<&dyn Observing> = vec![&first, &second];
        EventAwaiter::cancel_all(&group);
        assert!(first.is_done());
        assert!(second.is_done());
    }
}
