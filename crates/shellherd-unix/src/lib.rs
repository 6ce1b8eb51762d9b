//! # shellherd-unix
//!
//! Unix command and event grammars for the shellherd runtime, plus the
//! registration glue that makes them discoverable by name under the
//! `"unix"` catalogue namespace.
//!
//! Each command grammar is small and independent: it builds its command
//! string from typed parameters and turns matched output lines into
//! result entries. The runtime — echo consumption, prompt matching,
//! timeouts, cancellation — lives in `shellherd-core`; the state-aware
//! lookup lives in `shellherd-device`.
//!
//! Call [`register_all`] once at program start:
//!
//! ```ignore
//! shellherd_unix::register_all();
//! shellherd_device::classes::register_builtin_classes();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cmd;
pub mod events;

use std::sync::{Arc, Once};

use shellherd_device::{register_command, register_event};

/// Catalogue namespace the grammars register under.
pub const NAMESPACE: &str = "unix";

/// Registers every Unix command and event grammar; idempotent.
pub fn register_all() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_command(NAMESPACE, "cd", Arc::new(|p| Ok(Box::new(cmd::cd::Cd::from_params(p)))));
        register_command(NAMESPACE, "df", Arc::new(|p| Ok(Box::new(cmd::df::Df::from_params(p)))));
        register_command(
            NAMESPACE,
            "exit",
            Arc::new(|p| Ok(Box::new(cmd::exit::Exit::from_params(p)))),
        );
        register_command(
            NAMESPACE,
            "ifconfig",
            Arc::new(|p| Ok(Box::new(cmd::ifconfig::Ifconfig::from_params(p)))),
        );
        register_command(NAMESPACE, "ls", Arc::new(|p| Ok(Box::new(cmd::ls::Ls::from_params(p)))));
        register_command(
            NAMESPACE,
            "ping",
            Arc::new(|p| Ok(Box::new(cmd::ping::Ping::from_params(p)))),
        );
        register_command(NAMESPACE, "ps", Arc::new(|p| Ok(Box::new(cmd::ps::Ps::from_params(p)))));
        register_command(
            NAMESPACE,
            "ssh",
            Arc::new(|p| Ok(Box::new(cmd::ssh::Ssh::from_params(p)))),
        );
        register_command(NAMESPACE, "su", Arc::new(|p| Ok(Box::new(cmd::su::Su::from_params(p)))));
        register_command(
            NAMESPACE,
            "sudo",
            Arc::new(|p| Ok(Box::new(cmd::sudo::Sudo::from_params(p)))),
        );
        register_command(
            NAMESPACE,
            "whoami",
            Arc::new(|p| Ok(Box::new(cmd::whoami::Whoami::from_params(p)))),
        );

        register_event(NAMESPACE, "wait4", Arc::new(events::wait4));
        register_event(NAMESPACE, "ping_response", Arc::new(events::ping_response));
        register_event(NAMESPACE, "ping_no_response", Arc::new(events::ping_no_response));
        register_event(NAMESPACE, "shutdown", Arc::new(events::shutdown));
    });
}
