//! Built-in device classes.

mod unix_local;
mod unix_remote;

pub use unix_local::UnixLocal;
pub use unix_remote::UnixRemote;

use std::sync::{Arc, Once};

use crate::registry::register_device_class;
use crate::sm::TransitionTable;

/// Prompt of the local shell under the runtime's control; the terminal
/// transport exports `PS1` accordingly when it spawns the shell.
pub const LOCAL_PROMPT: &str = "^herd_bash#";

/// State labels shared by the Unix device classes.
pub mod states {
    /// Shell on the machine running the runtime.
    pub const UNIX_LOCAL: &str = "UNIX_LOCAL";
    /// Intermediate jump host.
    pub const PROXY_PC: &str = "PROXY_PC";
    /// Shell on the target machine.
    pub const UNIX_REMOTE: &str = "UNIX_REMOTE";
    /// Root shell on the target machine.
    pub const UNIX_REMOTE_ROOT: &str = "UNIX_REMOTE_ROOT";
}

/// Registers the built-in device classes; idempotent.
pub fn register_builtin_classes() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_device_class(Arc::new(UnixLocal));
        register_device_class(Arc::new(UnixRemote));
    });
}

/// The prompt configured on the transition entering a state, if any.
pub(crate) fn prompt_of_entering_transition(
    transitions: &TransitionTable,
    from: &str,
    to: &str,
) -> Option<String> {
    transitions
        .get(from)
        .and_then(|targets| targets.get(to))
        .and_then(|rule| rule.expected_prompt())
        .map(ToString::to_string)
}
