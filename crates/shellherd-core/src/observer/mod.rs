//! Connection observers: the abstract lifecycle plus the command and
//! event specializations built on it.

mod command;
mod core;
mod event;

pub use command::{
    Command, CommandBuilder, CommandContext, CommandParser, DEFAULT_COMMAND_TIMEOUT,
    ParseControl, StartValidator,
};
pub use self::core::{DoneCallback, Lifecycle, ObserverCore};
pub use event::{Event, EventBuilder, MatchMode, OccurrenceCallback};

use std::sync::Arc;

/// Anything carrying an [`ObserverCore`]; lets helpers treat commands and
/// events uniformly.
pub trait Observing {
    /// The shared observer state.
    fn observer_core(&self) -> Arc<ObserverCore>;
}

impl Observing for Command {
    fn observer_core(&self) -> Arc<ObserverCore> {
        Arc::clone(self.core())
    }
}

impl Observing for Event {
    fn observer_core(&self) -> Arc<ObserverCore> {
        Arc::clone(self.core())
    }
}
