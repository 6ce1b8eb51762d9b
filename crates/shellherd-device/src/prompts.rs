//! Always-on prompt tracking.
//!
//! Every device keeps one watcher subscribed to its connection with the
//! union of its per-state prompt patterns. Each incoming line (prompts
//! arrive as partial lines) is checked against the set; a match moves the
//! device to the matching state. With multi-check enabled every pattern is
//! tried on every line so ambiguous prompt configurations are caught and
//! recorded instead of silently winning by order.

use std::sync::Weak;

use chrono::{DateTime, Utc};
use regex::Regex;

use shellherd_core::connection::DataSubscriber;
use shellherd_core::Result;
use shellherd_core::text::LineAssembler;

/// Marker left behind when one line matched the prompts of more than one
/// state. Test suites assert it stays `None`.
#[derive(Debug, Clone)]
pub struct PromptCollision {
    /// The offending line.
    pub line: String,
    /// Every state whose prompt matched it.
    pub states: Vec<String>,
    /// When the collision was seen.
    pub time: DateTime<Utc>,
}

/// Receiver of prompt-tracking outcomes; implemented by the device.
pub(crate) trait PromptSink: Send + Sync {
    fn prompt_matched(&self, state: &str, line: &str);
    fn prompt_collision(&self, collision: PromptCollision);
}

/// Options controlling how lines are checked against the prompt set.
#[derive(Debug, Clone, Copy)]
pub struct PromptCheckOptions {
    /// Try every pattern on every line to spot ambiguous configurations;
    /// when off the first match wins and checking stops.
    pub check_all: bool,
    /// Check patterns in reverse declaration order (more specific
    /// prompts registered later win).
    pub reverse_order: bool,
}

impl Default for PromptCheckOptions {
    fn default() -> Self {
        Self {
            check_all: true,
            reverse_order: false,
        }
    }
}

pub(crate) struct PromptWatcher {
    sink: Weak<dyn PromptSink>,
    patterns: Vec<(Regex, String)>,
    options: PromptCheckOptions,
    assembler: LineAssembler,
}

impl PromptWatcher {
    pub(crate) fn new(
        sink: Weak<dyn PromptSink>,
        patterns: Vec<(Regex, String)>,
        options: PromptCheckOptions,
    ) -> Self {
        Self {
            sink,
            patterns,
            options,
            assembler: LineAssembler::new(),
        }
    }

    /// Swaps the pattern set atomically with respect to line processing.
    pub(crate) fn set_patterns(&mut self, patterns: Vec<(Regex, String)>) {
        self.patterns = patterns;
    }

    pub(crate) fn set_options(&mut self, options: PromptCheckOptions) {
        self.options = options;
    }

    /// Returns true when the line matched at least one prompt.
    fn check_line(&self, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }
        let Some(sink) = self.sink.upgrade() else {
            return false;
        };

        let mut matched: Vec<&String> = Vec::new();
        let forward = self.patterns.iter();
        let reversed = self.patterns.iter().rev();
        let ordered: Box<dyn Iterator<Item = &(Regex, String)>> = if self.options.reverse_order {
            Box::new(reversed)
        } else {
            Box::new(forward)
        };
        for (pattern, state) in ordered {
            if pattern.is_match(line) {
                if !matched.contains(&state) {
                    matched.push(state);
                }
                if !self.options.check_all {
                    break;
                }
            }
        }

        let Some(first) = matched.first() else {
            return false;
        };
        if matched.len() > 1 {
            tracing::warn!(line, states = ?matched, "line matches prompts of several states");
            sink.prompt_collision(PromptCollision {
                line: line.to_string(),
                states: matched.iter().map(|s| (*s).clone()).collect(),
                time: Utc::now(),
            });
        }
        sink.prompt_matched(first, line);
        true
    }
}

impl DataSubscriber for PromptWatcher {
    fn data_received(&mut self, chunk: &str, _when: DateTime<Utc>) -> Result<()> {
        for line in self.assembler.assemble(chunk) {
            // A matched prompt fragment is consumed so the completed line
            // does not re-trigger the state change; unmatched fragments
            // stay buffered in case the prompt is split across chunks.
            if self.check_line(&line.text) && !line.is_full {
                self.assembler.consume_tail();
            }
        }
        Ok(())
    }

    fn connection_closed(&mut self, _reason: &str) {}
}
