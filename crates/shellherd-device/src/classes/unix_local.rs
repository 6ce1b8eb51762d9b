//! Local Unix shell device.

use std::collections::HashMap;

use serde_json::{Value, json};

use super::{LOCAL_PROMPT, states};
use crate::sm::{DeviceClass, HopTable, NOT_CONNECTED, TransitionTable};

/// A shell on the machine running the runtime. Two states: the transport
/// is open and a local prompt answers, or it is not.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixLocal;

impl DeviceClass for UnixLocal {
    fn name(&self) -> &'static str {
        "UnixLocal"
    }

    fn initial_state(&self) -> &'static str {
        states::UNIX_LOCAL
    }

    fn connected_state(&self) -> &'static str {
        states::UNIX_LOCAL
    }

    fn default_hops_with_proxy(&self) -> Value {
        // A local shell has no proxy variant.
        self.default_hops_without_proxy()
    }

    fn default_hops_without_proxy(&self) -> Value {
        json!({
            NOT_CONNECTED: {
                (states::UNIX_LOCAL): {"action": "open_connection"}
            },
            (states::UNIX_LOCAL): {
                NOT_CONNECTED: {"action": "close_connection"}
            }
        })
    }

    fn hop_table(&self, _use_proxy: bool) -> HopTable {
        // Both states are directly connected; no hops needed.
        HopTable::new()
    }

    fn state_prompts(&self, _transitions: &TransitionTable) -> HashMap<String, String> {
        HashMap::from([(states::UNIX_LOCAL.to_string(), LOCAL_PROMPT.to_string())])
    }

    fn command_namespaces(&self, state: &str) -> Vec<&'static str> {
        if state == states::UNIX_LOCAL {
            vec!["unix"]
        } else {
            Vec::new()
        }
    }

    fn event_namespaces(&self, state: &str) -> Vec<&'static str> {
        self.command_namespaces(state)
    }

    fn always_on_events(&self) -> Vec<&'static str> {
        vec!["shutdown"]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions_present() {
        let hops = UnixLocal.default_hops_without_proxy();
        assert_eq!(
            hops[NOT_CONNECTED][states::UNIX_LOCAL]["action"],
            json!("open_connection")
        );
        assert_eq!(
            hops[states::UNIX_LOCAL][NOT_CONNECTED]["action"],
            json!("close_connection")
        );
    }

    #[test]
    fn test_local_prompt_configured() {
        let prompts = UnixLocal.state_prompts(&TransitionTable::new());
        assert_eq!(prompts[states::UNIX_LOCAL], LOCAL_PROMPT);
    }
}
