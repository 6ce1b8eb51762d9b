//! State-machine tables: transitions, hops and per-state prompts.
//!
//! States are strings. Transitions are declared as a nested mapping
//! `from → to → rule`; indirect transitions use a precomputed hop table —
//! routing at runtime is pure lookup, never graph search.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Every device starts here.
pub const NOT_CONNECTED: &str = "NOT_CONNECTED";

/// What a transition step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    /// Run the configured command and wait for the target prompt.
    #[default]
    ExecuteCommand,
    /// Open the device's I/O transport.
    OpenConnection,
    /// Close the device's I/O transport.
    CloseConnection,
}

/// One step of the state machine: which command enters the target state,
/// with which parameters.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TransitionRule {
    /// Command name resolved in the source state's catalogue.
    #[serde(default)]
    pub execute_command: String,
    /// Default parameters, overlaid by user configuration.
    #[serde(default)]
    pub command_params: Map<String, Value>,
    /// Parameters that must be present when the transition runs.
    #[serde(default)]
    pub required_command_params: Vec<String>,
    /// Step kind; almost always `execute_command`.
    #[serde(default)]
    pub action: TransitionAction,
    /// Per-transition timeout in seconds from configuration.
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl TransitionRule {
    /// The prompt of the target state, when configured.
    #[must_use]
    pub fn expected_prompt(&self) -> Option<&str> {
        self.command_params
            .get("expected_prompt")
            .and_then(Value::as_str)
    }
}

/// Transition table: `from-state → to-state → rule`.
pub type TransitionTable = HashMap<String, HashMap<String, TransitionRule>>;

/// Hop table: `from-state → { destination → next hop }`.
pub type HopTable = HashMap<String, HashMap<String, String>>;

/// A device class: the static shape of one kind of device.
///
/// Classes provide two pure default-configuration functions (with and
/// without an intermediate proxy host); the runtime overlays user
/// configuration with a recursive map merge — there is no cooperative
/// method overriding.
pub trait DeviceClass: Send + Sync {
    /// Registry name of the class, e.g. `"UnixRemote"`.
    fn name(&self) -> &'static str;

    /// State entered by `establish_connection` when none is configured.
    fn initial_state(&self) -> &'static str;

    /// State reached right after the transport opens.
    fn connected_state(&self) -> &'static str;

    /// Default transition configuration for setups going through a proxy
    /// host, as a nested `from → to → rule` value.
    fn default_hops_with_proxy(&self) -> Value;

    /// Default transition configuration for direct setups.
    fn default_hops_without_proxy(&self) -> Value;

    /// Precomputed next-hop routing for indirect transitions.
    fn hop_table(&self, use_proxy: bool) -> HopTable;

    /// Per-state prompt patterns derived from the merged transition
    /// table (the prompt of a state is configured on the transitions
    /// entering it).
    fn state_prompts(&self, transitions: &TransitionTable) -> HashMap<String, String>;

    /// Command-catalogue namespaces searched in the given state.
    fn command_namespaces(&self, state: &str) -> Vec<&'static str>;

    /// Event-catalogue namespaces searched in the given state.
    fn event_namespaces(&self, state: &str) -> Vec<&'static str>;

    /// Names of events armed for the device's whole lifetime.
    fn always_on_events(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_deserializes_from_nested_config() {
        let value = json!({
            "execute_command": "ssh",
            "command_params": {
                "host": "10.0.0.2",
                "expected_prompt": "remote#",
                "target_newline": "\n"
            },
            "required_command_params": ["host", "login", "password", "expected_prompt"]
        });
        let rule: TransitionRule = serde_json::from_value(value).unwrap();
        assert_eq!(rule.execute_command, "ssh");
        assert_eq!(rule.action, TransitionAction::ExecuteCommand);
        assert_eq!(rule.expected_prompt(), Some("remote#"));
        assert_eq!(rule.required_command_params.len(), 4);
    }

    #[test]
    fn test_action_deserializes_snake_case() {
        let rule: TransitionRule =
            serde_json::from_value(json!({"action": "open_connection"})).unwrap();
        assert_eq!(rule.action, TransitionAction::OpenConnection);
    }
}
