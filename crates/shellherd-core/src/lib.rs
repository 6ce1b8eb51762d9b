//! # shellherd-core
//!
//! Runtime core for driving interactive text devices — Unix shells behind
//! terminals or SSH, embedded CLIs, AT modems — while concurrently parsing
//! their streaming output into structured results.
//!
//! ## The model
//!
//! One [`connection::ObservableConnection`] owns the byte stream of a
//! device and fans every received chunk out to any number of subscribed
//! *observers*. An observer watches the stream until its predicate holds:
//!
//! - a [`observer::Command`] writes a command line, consumes the shell's
//!   echo of it, feeds each output line to its grammar and completes when
//!   the expected prompt returns, yielding a structured result;
//! - an [`observer::Event`] fires callbacks on occurrences of detect
//!   patterns and completes only by occurrence count, timeout or
//!   cancellation.
//!
//! The [`runner::Runner`] arms a watchdog per started observer enforcing
//! wall-clock timeouts; callers park on an async completion latch via
//! `await_done`. Failures nobody retrieves drain into a process-wide
//! [`sink`] so background problems cannot vanish silently.
//!
//! ## Quick start
//!
//! ```ignore
//! use shellherd_core::connection::{Io, MemoryIo};
//! use shellherd_core::observer::Command;
//!
//! # async fn demo() -> shellherd_core::Result<()> {
//! let (io, connection) = MemoryIo::wire("lab");
//! io.open()?;
//!
//! let whoami = Command::builder("whoami", connection)
//!     .prompt(regex::Regex::new(r"^herd_bash#")?)
//!     .build(Box::new(my_grammar));
//! let result = whoami.run(None).await?;
//! println!("user = {}", result["USER"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: observable connection, transport boundary, memory I/O
//! - [`text`]: incremental decoding, line assembly, terminal sanitizing
//! - [`observer`]: observer lifecycle, command and event envelopes
//! - [`runner`]: watchdog execution of observers
//! - [`scheduler`]: periodic background jobs
//! - [`awaiter`]: waiting on observer groups
//! - [`sink`]: unretrieved-failure sink
//! - [`testing`]: assertions for test harnesses

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod awaiter;
pub mod connection;
mod error;
pub mod observer;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod testing;
pub mod text;

pub use awaiter::EventAwaiter;
pub use connection::{DataSubscriber, Io, MemoryIo, ObservableConnection};
pub use error::{Error, Result};
pub use observer::{
    Command, CommandContext, CommandParser, Event, MatchMode, ObserverCore, Observing,
    ParseControl,
};
pub use runner::Runner;
pub use sink::{UnraisedFailure, take_unraised_failures};
