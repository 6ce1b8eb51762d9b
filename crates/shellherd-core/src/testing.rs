//! Assertions for test harnesses built on the runtime.

use crate::sink::take_unraised_failures;

/// Panics when any observer failure was dropped without being retrieved.
///
/// Call at the end of a test to make background failures fail the test
/// instead of disappearing. Draining the sink is part of the check, so a
/// passing test leaves it empty for the next one.
///
/// # Panics
///
/// Panics listing every unretrieved failure found in the sink.
pub fn assert_no_unraised_failures() {
    let failures = take_unraised_failures();
    assert!(
        failures.is_empty(),
        "observer failures were never retrieved: {:?}",
        failures
            .iter()
            .map(|f| format!("{}: {}", f.observer, f.error))
            .collect::<Vec<_>>()
    );
}
