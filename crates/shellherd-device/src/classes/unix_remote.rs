//! Remote Unix shell device reached over ssh, optionally via a jump
//! host.
//!
//! Configuration shape (user overlay for the direct setup):
//!
//! ```yaml
//! CONNECTION_HOPS:
//!   UNIX_LOCAL:
//!     UNIX_REMOTE:
//!       execute_command: ssh        # default
//!       command_params:
//!         host: 10.0.0.2
//!         login: ute
//!         password: ute
//!         expected_prompt: "remote#"
//! ```
//!
//! With a `PROXY_PC` branch present in the overlay, the proxy defaults
//! apply instead and routing goes through the jump host.

use std::collections::HashMap;

use serde_json::{Value, json};

use super::{LOCAL_PROMPT, prompt_of_entering_transition, states};
use crate::sm::{DeviceClass, HopTable, NOT_CONNECTED, TransitionTable};

/// A shell on a remote machine, reachable directly or through a proxy
/// host, with an optional root shell on top.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixRemote;

impl DeviceClass for UnixRemote {
    fn name(&self) -> &'static str {
        "UnixRemote"
    }

    fn initial_state(&self) -> &'static str {
        states::UNIX_REMOTE
    }

    fn connected_state(&self) -> &'static str {
        states::UNIX_LOCAL
    }

    fn default_hops_with_proxy(&self) -> Value {
        json!({
            NOT_CONNECTED: {
                (states::UNIX_LOCAL): {"action": "open_connection"}
            },
            (states::UNIX_LOCAL): {
                NOT_CONNECTED: {"action": "close_connection"},
                (states::PROXY_PC): {
                    "execute_command": "ssh",
                    "command_params": {"target_newline": "\n"},
                    "required_command_params": [
                        "host", "login", "password", "expected_prompt"
                    ]
                }
            },
            (states::PROXY_PC): {
                (states::UNIX_LOCAL): {
                    "execute_command": "exit",
                    "command_params": {
                        "expected_prompt": LOCAL_PROMPT,
                        "target_newline": "\n"
                    }
                },
                (states::UNIX_REMOTE): {
                    "execute_command": "ssh",
                    "command_params": {"target_newline": "\n"},
                    "required_command_params": [
                        "host", "login", "password", "expected_prompt"
                    ]
                }
            },
            (states::UNIX_REMOTE): {
                (states::PROXY_PC): {
                    "execute_command": "exit",
                    "command_params": {"target_newline": "\n"},
                    "required_command_params": ["expected_prompt"]
                },
                (states::UNIX_REMOTE_ROOT): {
                    "execute_command": "su",
                    "command_params": {
                        "password": "root_password",
                        "expected_prompt": "remote_root_prompt",
                        "target_newline": "\n"
                    }
                }
            },
            (states::UNIX_REMOTE_ROOT): {
                (states::UNIX_REMOTE): {
                    "execute_command": "exit",
                    "command_params": {
                        "expected_prompt": "remote_user_prompt",
                        "target_newline": "\n"
                    }
                }
            }
        })
    }

    fn default_hops_without_proxy(&self) -> Value {
        json!({
            NOT_CONNECTED: {
                (states::UNIX_LOCAL): {"action": "open_connection"}
            },
            (states::UNIX_LOCAL): {
                NOT_CONNECTED: {"action": "close_connection"},
                (states::UNIX_REMOTE): {
                    "execute_command": "ssh",
                    "command_params": {"target_newline": "\n"},
                    "required_command_params": [
                        "host", "login", "password", "expected_prompt"
                    ]
                }
            },
            (states::UNIX_REMOTE): {
                (states::UNIX_LOCAL): {
                    "execute_command": "exit",
                    "command_params": {
                        "expected_prompt": LOCAL_PROMPT,
                        "target_newline": "\n"
                    }
                },
                (states::UNIX_REMOTE_ROOT): {
                    "execute_command": "su",
                    "command_params": {
                        "password": "root_password",
                        "expected_prompt": "remote_root_prompt",
                        "target_newline": "\n"
                    }
                }
            },
            (states::UNIX_REMOTE_ROOT): {
                (states::UNIX_REMOTE): {
                    "execute_command": "exit",
                    "command_params": {
                        "expected_prompt": "remote_user_prompt",
                        "target_newline": "\n"
                    }
                }
            }
        })
    }

    fn hop_table(&self, use_proxy: bool) -> HopTable {
        let mut hops = HopTable::new();
        if use_proxy {
            hops.insert(
                NOT_CONNECTED.to_string(),
                HashMap::from([
                    (states::PROXY_PC.to_string(), states::UNIX_LOCAL.to_string()),
                    (states::UNIX_REMOTE.to_string(), states::UNIX_LOCAL.to_string()),
                    (
                        states::UNIX_REMOTE_ROOT.to_string(),
                        states::UNIX_LOCAL.to_string(),
                    ),
                ]),
            );
            hops.insert(
                states::UNIX_LOCAL.to_string(),
                HashMap::from([
                    (states::UNIX_REMOTE.to_string(), states::PROXY_PC.to_string()),
                    (
                        states::UNIX_REMOTE_ROOT.to_string(),
                        states::PROXY_PC.to_string(),
                    ),
                ]),
            );
            hops.insert(
                states::PROXY_PC.to_string(),
                HashMap::from([
                    (
                        states::UNIX_REMOTE_ROOT.to_string(),
                        states::UNIX_REMOTE.to_string(),
                    ),
                    (NOT_CONNECTED.to_string(), states::UNIX_LOCAL.to_string()),
                ]),
            );
            hops.insert(
                states::UNIX_REMOTE.to_string(),
                HashMap::from([
                    (states::UNIX_LOCAL.to_string(), states::PROXY_PC.to_string()),
                    (NOT_CONNECTED.to_string(), states::PROXY_PC.to_string()),
                ]),
            );
            hops.insert(
                states::UNIX_REMOTE_ROOT.to_string(),
                HashMap::from([
                    (states::UNIX_LOCAL.to_string(), states::UNIX_REMOTE.to_string()),
                    (states::PROXY_PC.to_string(), states::UNIX_REMOTE.to_string()),
                    (NOT_CONNECTED.to_string(), states::UNIX_REMOTE.to_string()),
                ]),
            );
        } else {
            hops.insert(
                NOT_CONNECTED.to_string(),
                HashMap::from([
                    (states::UNIX_REMOTE.to_string(), states::UNIX_LOCAL.to_string()),
                    (
                        states::UNIX_REMOTE_ROOT.to_string(),
                        states::UNIX_LOCAL.to_string(),
                    ),
                ]),
            );
            hops.insert(
                states::UNIX_LOCAL.to_string(),
                HashMap::from([(
                    states::UNIX_REMOTE_ROOT.to_string(),
                    states::UNIX_REMOTE.to_string(),
                )]),
            );
            hops.insert(
                states::UNIX_REMOTE.to_string(),
                HashMap::from([(NOT_CONNECTED.to_string(), states::UNIX_LOCAL.to_string())]),
            );
            hops.insert(
                states::UNIX_REMOTE_ROOT.to_string(),
                HashMap::from([
                    (states::UNIX_LOCAL.to_string(), states::UNIX_REMOTE.to_string()),
                    (NOT_CONNECTED.to_string(), states::UNIX_REMOTE.to_string()),
                ]),
            );
        }
        hops
    }

    fn state_prompts(&self, transitions: &TransitionTable) -> HashMap<String, String> {
        let mut prompts = HashMap::new();

        prompts.insert(
            states::UNIX_LOCAL.to_string(),
            prompt_of_entering_transition(transitions, states::UNIX_REMOTE, states::UNIX_LOCAL)
                .or_else(|| {
                    prompt_of_entering_transition(
                        transitions,
                        states::PROXY_PC,
                        states::UNIX_LOCAL,
                    )
                })
                .unwrap_or_else(|| LOCAL_PROMPT.to_string()),
        );
        if let Some(proxy) =
            prompt_of_entering_transition(transitions, states::UNIX_LOCAL, states::PROXY_PC)
        {
            prompts.insert(states::PROXY_PC.to_string(), proxy);
        }
        if let Some(remote) =
            prompt_of_entering_transition(transitions, states::UNIX_LOCAL, states::UNIX_REMOTE)
                .or_else(|| {
                    prompt_of_entering_transition(
                        transitions,
                        states::PROXY_PC,
                        states::UNIX_REMOTE,
                    )
                })
        {
            prompts.insert(states::UNIX_REMOTE.to_string(), remote);
        }
        if let Some(root) = prompt_of_entering_transition(
            transitions,
            states::UNIX_REMOTE,
            states::UNIX_REMOTE_ROOT,
        ) {
            prompts.insert(states::UNIX_REMOTE_ROOT.to_string(), root);
        }

        prompts
    }

    fn command_namespaces(&self, state: &str) -> Vec<&'static str> {
        match state {
            s if s == states::UNIX_LOCAL
                || s == states::PROXY_PC
                || s == states::UNIX_REMOTE
                || s == states::UNIX_REMOTE_ROOT =>
            {
                vec!["unix"]
            }
            _ => Vec::new(),
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
    use crate::merge::merge_values;

    fn merged_transitions(overlay: Value) -> TransitionTable {
        let mut defaults = UnixRemote.default_hops_without_proxy();
        merge_values(&mut defaults, &overlay);
        serde_json::from_value(defaults).unwrap()
    }

    #[test]
    fn test_ssh_rule_requires_credentials() {
        let table = merged_transitions(json!({}));
        let rule = &table[states::UNIX_LOCAL][states::UNIX_REMOTE];
        assert_eq!(rule.execute_command, "ssh");
        assert!(rule.required_command_params.contains(&"host".to_string()));
        assert!(rule.required_command_params.contains(&"password".to_string()));
    }

    #[test]
    fn test_remote_prompt_comes_from_user_overlay() {
        let table = merged_transitions(json!({
            (states::UNIX_LOCAL): {
                (states::UNIX_REMOTE): {
                    "command_params": {
                        "host": "h", "login": "l", "password": "p",
                        "expected_prompt": "remote#"
                    }
                }
            }
        }));
        let prompts = UnixRemote.state_prompts(&table);
        assert_eq!(prompts[states::UNIX_REMOTE], "remote#");
        assert_eq!(prompts[states::UNIX_LOCAL], LOCAL_PROMPT);
    }

    #[test]
    fn test_hop_routing_not_connected_to_remote_goes_via_local() {
        let hops = UnixRemote.hop_table(false);
        assert_eq!(hops[NOT_CONNECTED][states::UNIX_REMOTE], states::UNIX_LOCAL);
        assert_eq!(
            hops[states::UNIX_LOCAL][states::UNIX_REMOTE_ROOT],
            states::UNIX_REMOTE
        );
    }

    #[test]
    fn test_proxy_routing_inserts_jump_host() {
        let hops = UnixRemote.hop_table(true);
        assert_eq!(hops[states::UNIX_LOCAL][states::UNIX_REMOTE], states::PROXY_PC);
        assert_eq!(
            hops[states::UNIX_REMOTE][states::UNIX_LOCAL],
            states::PROXY_PC
        );
    }
}
