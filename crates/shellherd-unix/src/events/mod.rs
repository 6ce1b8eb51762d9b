//! Unix event specifications.
//!
//! Events are declarative: each factory turns a parameter map into an
//! [`EventSpec`] (patterns, match mode, occurrence target) and the device
//! wraps it into a running observer on its connection.

use serde_json::{Map, Value};

use shellherd_core::observer::MatchMode;
use shellherd_core::{Error, Result};
use shellherd_device::EventSpec;

/// `wait4`: the universal line watcher — caller-supplied patterns,
/// match mode and occurrence target.
///
/// Parameters: `detect_patterns` (list of regex strings), `match`
/// (`any` / `all` / `sequence`, default `any`), `till_occurs_times`
/// (default −1, unbounded), `process_full_lines_only`.
///
/// # Errors
///
/// [`Error::WrongUsage`] for an unknown match mode.
pub fn wait4(params: &Map<String, Value>) -> Result<EventSpec> {
    let patterns = params
        .get("detect_patterns")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mode = match params.get("match").and_then(Value::as_str) {
        None | Some("any") => MatchMode::Any,
        Some("all") => MatchMode::All,
        Some("sequence") => MatchMode::Sequence,
        Some(other) => {
            return Err(Error::WrongUsage(format!(
                "'{other}' is not supported; possible choices: 'any', 'all' or 'sequence'"
            )));
        }
    };
    Ok(EventSpec {
        patterns,
        mode,
        occurrences: occurs(params),
        full_lines_only: params
            .get("process_full_lines_only")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// `ping_response`: fires on every successful ping reply line.
///
/// # Errors
///
/// None; the signature matches the factory seam.
pub fn ping_response(params: &Map<String, Value>) -> Result<EventSpec> {
    Ok(EventSpec {
        patterns: vec![r"\d+\s+bytes\s+from\s+.*time[=<][\d.]+\s*ms".to_string()],
        mode: MatchMode::Any,
        occurrences: occurs(params),
        full_lines_only: true,
    })
}

/// `ping_no_response`: fires when ping reports a missing answer or an
/// unreachable destination.
///
/// # Errors
///
/// None; the signature matches the factory seam.
pub fn ping_no_response(params: &Map<String, Value>) -> Result<EventSpec> {
    Ok(EventSpec {
        patterns: vec![
            r"(no\s+answer\s+yet\s+for.*)|(.*Destination\s+Host\s+Unreachable)".to_string(),
        ],
        mode: MatchMode::Any,
        occurrences: occurs(params),
        full_lines_only: true,
    })
}

/// `shutdown`: fires when the system announces it is going down.
///
/// # Errors
///
/// None; the signature matches the factory seam.
pub fn shutdown(params: &Map<String, Value>) -> Result<EventSpec> {
    Ok(EventSpec {
        patterns: vec![r"(?i)system\s+is\s+going\s+down".to_string()],
        mode: MatchMode::Any,
        occurrences: occurs(params),
        full_lines_only: true,
    })
}

fn occurs(params: &Map<String, Value>) -> i64 {
    params
        .get("till_occurs_times")
        .and_then(Value::as_i64)
        .unwrap_or(-1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wait4_reads_parameters() {
        let spec = wait4(
            json!({
                "detect_patterns": [r"number (\d5)", r"(?P<LN>Line\d+)"],
                "match": "all",
                "till_occurs_times": 1
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(spec.patterns.len(), 2);
        assert_eq!(spec.mode, MatchMode::All);
        assert_eq!(spec.occurrences, 1);
    }

    #[test]
    fn test_wait4_rejects_unknown_mode() {
        let out = wait4(json!({"match": "most"}).as_object().unwrap());
        assert!(matches!(out, Err(Error::WrongUsage(_))));
    }

    #[test]
    fn test_ping_events_default_unbounded() {
        let response = ping_response(&Map::new()).unwrap();
        assert_eq!(response.occurrences, -1);
        let silence = ping_no_response(&Map::new()).unwrap();
        assert_eq!(silence.occurrences, -1);
    }
}
