//! Recursive merging of nested configuration maps.
//!
//! Device classes contribute default transition configuration; user
//! configuration overlays it. Maps merge key by key, everything else is
//! replaced by the overlay.

use serde_json::Value;

/// Merges `overlay` into `base` recursively.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_maps_merge_key_by_key() {
        let mut base = json!({
            "UNIX_LOCAL": {
                "UNIX_REMOTE": {
                    "execute_command": "ssh",
                    "command_params": {"target_newline": "\n"}
                }
            }
        });
        let overlay = json!({
            "UNIX_LOCAL": {
                "UNIX_REMOTE": {
                    "command_params": {"host": "10.0.0.2", "login": "ute"}
                }
            }
        });

        merge_values(&mut base, &overlay);

        let params = &base["UNIX_LOCAL"]["UNIX_REMOTE"]["command_params"];
        assert_eq!(params["target_newline"], json!("\n"));
        assert_eq!(params["host"], json!("10.0.0.2"));
        assert_eq!(params["login"], json!("ute"));
    }

    #[test]
    fn test_scalars_are_replaced() {
        let mut base = json!({"timeout": 30, "keep": true});
        merge_values(&mut base, &json!({"timeout": 7}));
        assert_eq!(base, json!({"timeout": 7, "keep": true}));
    }

    #[test]
    fn test_new_branches_are_added() {
        let mut base = json!({});
        merge_values(&mut base, &json!({"PROXY_PC": {"UNIX_REMOTE": {}}}));
        assert!(base["PROXY_PC"].is_object());
    }
}
