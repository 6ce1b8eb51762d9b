//! Unix command grammars.
//!
//! Every grammar implements [`shellherd_core::observer::CommandParser`]:
//! build the command string from typed parameters, match output lines
//! with regexes, update the result map, latch failures for known error
//! output. The runtime envelope owns echo consumption, prompt matching
//! and completion.

pub mod cd;
pub mod df;
pub mod exit;
pub mod ifconfig;
pub mod ls;
pub mod ping;
pub mod ps;
pub mod ssh;
pub mod su;
pub mod sudo;
pub mod whoami;

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Error output shared by most Unix commands; a line matching any of
/// these latches a command failure.
#[allow(clippy::unwrap_used)]
static FAILURE_INDICATIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"command not found",
        r"No such file or directory",
        r"Permission denied",
        r"running it may require superuser privileges",
        r"Cannot find device",
        r"Input/output error",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// True when the line carries a generic Unix error indication.
#[must_use]
pub fn is_failure_indication(line: &str) -> bool {
    FAILURE_INDICATIONS.iter().any(|re| re.is_match(line))
}

/// String parameter with a default.
#[must_use]
pub(crate) fn str_param(params: &Map<String, Value>, key: &str, default: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Optional string parameter.
#[must_use]
pub(crate) fn opt_param(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(ToString::to_string)
}

/// Digit-only text becomes an integer, decimal text a float, everything
/// else stays a string.
#[must_use]
pub(crate) fn convert_field(text: &str) -> Value {
    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = text.parse::<f64>() {
        return Value::from(float);
    }
    Value::from(text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_indications() {
        assert!(is_failure_indication("bash: frob: command not found"));
        assert!(is_failure_indication("cat: x: No such file or directory"));
        assert!(!is_failure_indication("all good here"));
    }

    #[test]
    fn test_convert_field() {
        assert_eq!(convert_field("1817"), Value::from(1817));
        assert_eq!(convert_field("0.5"), Value::from(0.5));
        assert_eq!(convert_field("python"), Value::from("python"));
    }
}
