//! Error types for the runtime core.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving observers, connections and devices.
///
/// The enum is `Clone` so a failure stored inside an observer can surface
/// both through `await_done()` and through a later `result()` call without
/// consuming it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// Received bytes could not be decoded as text.
    #[error("undecodable data on connection '{connection}': {reason}")]
    Decode {
        /// Connection name.
        connection: String,
        /// Description of the decoding problem.
        reason: String,
    },

    /// Operation attempted on a closed connection.
    #[error("connection '{0}' is closed")]
    ConnectionClosed(String),

    /// `start()` called twice on the same observer.
    #[error("observer '{0}' has already been started")]
    AlreadyStarted(String),

    /// Second write to an observer's result or error slot.
    #[error("result of observer '{0}' has already been set")]
    ResultAlreadySet(String),

    /// `await_done()` gave up waiting; the observer is still running.
    #[error("observer '{0}' is still running; result not available yet")]
    StillRunning(String),

    /// Observer exceeded its timeout.
    #[error("observer '{observer}' timed out after {after:?}")]
    Timeout {
        /// Observer name.
        observer: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Observer was cancelled before completing.
    #[error("observer '{observer}' was cancelled: {reason}")]
    Cancelled {
        /// Observer name.
        observer: String,
        /// Why the observer was cancelled.
        reason: String,
    },

    /// Command parser latched a textual failure, or the command reached
    /// its prompt without collecting any required result data.
    #[error("command '{command}' failed: {reason}")]
    CommandFailure {
        /// Command name.
        command: String,
        /// Failure description, usually the offending output line.
        reason: String,
    },

    /// Command was created in one device state but started in another.
    #[error("command '{command}' created in state '{created_in}' but device is now in '{current}'")]
    CommandWrongState {
        /// Command name.
        command: String,
        /// State the command was created for.
        created_in: String,
        /// State the device moved to.
        current: String,
    },

    /// Event was created in one device state but started in another.
    #[error("event '{event}' created in state '{created_in}' but device is now in '{current}'")]
    EventWrongState {
        /// Event name.
        event: String,
        /// State the event was created for.
        created_in: String,
        /// State the device moved to.
        current: String,
    },

    /// Event started without any detect patterns.
    #[error("event '{0}' started with an empty pattern list")]
    NoDetectPatternProvided(String),

    /// State-machine lookup failed: unknown command, missing required
    /// parameter, ambiguous prompts or an unreachable state.
    #[error("device '{device}' failure: {reason}")]
    DeviceFailure {
        /// Device name.
        device: String,
        /// Failure description.
        reason: String,
    },

    /// A hop command of a state transition failed.
    #[error("device '{device}' failed to change state from '{from}' to '{to}'")]
    DeviceChangeStateFailure {
        /// Device name.
        device: String,
        /// State the hop started from.
        from: String,
        /// State the hop was heading to.
        to: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// API misuse: contradictory or missing arguments, duplicate names.
    #[error("wrong usage: {0}")]
    WrongUsage(String),

    /// Configuration could not be loaded or is incompatible with the
    /// already-loaded configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_cloneable() {
        let err = Error::Timeout {
            observer: "ping".to_string(),
            after: Duration::from_secs(4),
        };
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_change_state_failure_preserves_source() {
        use std::error::Error as _;

        let inner = Error::Timeout {
            observer: "ssh".to_string(),
            after: Duration::from_secs(7),
        };
        let outer = Error::DeviceChangeStateFailure {
            device: "lab1".to_string(),
            from: "UNIX_LOCAL".to_string(),
            to: "UNIX_REMOTE".to_string(),
            source: Box::new(inner),
        };
        let source = outer.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("observer 'ssh' timed out after 7s"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
