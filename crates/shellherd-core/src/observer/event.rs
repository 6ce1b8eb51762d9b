//! Event observers: fire callbacks on occurrences of patterns.
//!
//! Unlike a command, an event never succeeds on its own — it keeps
//! watching until it is cancelled, times out, or collected its configured
//! number of occurrence cycles. Three match modes mirror how operators
//! think about log watching: `Any` fires per matching line, `All` fires
//! once every pattern of the set has been seen (order-free), `Sequence`
//! insists on declaration order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::connection::{DataSubscriber, ObservableConnection};
use crate::error::{Error, Result};
use crate::observer::core::ObserverCore;
use crate::runner::{Runner, effective_timeout};
use crate::text::LineAssembler;

/// How a multi-pattern event decides that it "occurred".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Every matching line is one occurrence.
    #[default]
    Any,
    /// One occurrence once each pattern matched at least once, in any
    /// order; then the set resets for the next cycle.
    All,
    /// Patterns must match in declaration order; the last one completes
    /// the cycle.
    Sequence,
}

/// Callback invoked with each fired occurrence (or occurrence cycle).
pub type OccurrenceCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Number-converts a capture the way result consumers expect: digit-only
/// text becomes an integer, decimal text a float, anything else stays.
fn convert_capture(text: &str) -> Value {
    if let Ok(int) = text.parse::<i64>() {
        return json!(int);
    }
    if let Ok(float) = text.parse::<f64>() {
        return json!(float);
    }
    json!(text)
}

/// Builds one occurrence record from a regex match.
fn occurrence_record(
    pattern: &Regex,
    captures: &regex::Captures<'_>,
    line: &str,
    when: DateTime<Utc>,
) -> Value {
    let mut named = Map::new();
    for name in pattern.capture_names().flatten() {
        if let Some(group) = captures.name(name) {
            named.insert(name.to_string(), convert_capture(group.as_str()));
        }
    }
    let positional: Vec<Value> = captures
        .iter()
        .skip(1)
        .map(|group| group.map_or(Value::Null, |g| convert_capture(g.as_str())))
        .collect();
    json!({
        "line": line,
        "matched": captures.get(0).map_or("", |g| g.as_str()),
        "named_groups": Value::Object(named),
        "groups": positional,
        "time": when.to_rfc3339(),
    })
}

struct EventMachine {
    core: Arc<ObserverCore>,
    patterns: Vec<Regex>,
    mode: MatchMode,
    /// Pattern indices still missing in the current `All` cycle.
    pending: Vec<usize>,
    /// Next expected pattern in a `Sequence` cycle.
    next_in_sequence: usize,
    /// Records of the unfinished cycle, keyed by pattern index.
    cycle: Vec<(usize, Value)>,
    /// Every fired occurrence (or cycle) so far; becomes the result.
    occurrences: Vec<Value>,
    target: i64,
    cycles_fired: i64,
    callbacks: Vec<OccurrenceCallback>,
    assembler: LineAssembler,
    process_full_lines_only: bool,
    last_data_at: DateTime<Utc>,
}

impl EventMachine {
    fn reset_cycle(&mut self) {
        self.pending = (0..self.patterns.len()).collect();
        self.next_in_sequence = 0;
        self.cycle.clear();
    }

    /// Returns true when the line fired an occurrence (the assembler tail
    /// is then consumed so a completed line is not matched twice).
    fn process_line(&mut self, line: &str, is_full: bool) -> bool {
        if self.process_full_lines_only && !is_full {
            return false;
        }
        match self.mode {
            MatchMode::Any => self.catch_any(line),
            MatchMode::All => self.catch_all(line),
            MatchMode::Sequence => self.catch_sequence(line),
        }
    }

    fn catch_any(&mut self, line: &str) -> bool {
        let when = self.last_data_at;
        let record = self.patterns.iter().find_map(|pattern| {
            pattern
                .captures(line)
                .map(|captures| occurrence_record(pattern, &captures, line, when))
        });
        match record {
            Some(record) => {
                self.fire(record);
                true
            }
            None => false,
        }
    }

    fn catch_all(&mut self, line: &str) -> bool {
        let when = self.last_data_at;
        let hit = self.pending.iter().enumerate().find_map(|(slot, &idx)| {
            self.patterns[idx].captures(line).map(|captures| {
                let record = occurrence_record(&self.patterns[idx], &captures, line, when);
                (slot, idx, record)
            })
        });
        let Some((slot, idx, record)) = hit else {
            return false;
        };
        self.pending.remove(slot);
        self.cycle.push((idx, record));
        if self.pending.is_empty() {
            let data = self.take_cycle();
            self.fire(data);
            self.reset_cycle();
        }
        true
    }

    fn catch_sequence(&mut self, line: &str) -> bool {
        let Some(pattern) = self.patterns.get(self.next_in_sequence) else {
            return false;
        };
        if let Some(captures) = pattern.captures(line) {
            let record = occurrence_record(pattern, &captures, line, self.last_data_at);
            let idx = self.next_in_sequence;
            self.cycle.push((idx, record));
            self.next_in_sequence += 1;
            if self.next_in_sequence == self.patterns.len() {
                let data = self.take_cycle();
                self.fire(data);
                self.reset_cycle();
            }
            return true;
        }
        false
    }

    /// Drains the finished cycle as an array ordered by pattern index, so
    /// the delivered list is deterministic regardless of arrival order.
    fn take_cycle(&mut self) -> Value {
        let mut cycle = std::mem::take(&mut self.cycle);
        cycle.sort_by_key(|(idx, _)| *idx);
        Value::Array(cycle.into_iter().map(|(_, record)| record).collect())
    }

    fn fire(&mut self, data: Value) {
        self.occurrences.push(data.clone());
        self.cycles_fired += 1;
        for callback in &self.callbacks {
            callback(&data);
        }
        if self.target > 0 && self.cycles_fired >= self.target {
            let _ = self
                .core
                .set_result(Value::Array(self.occurrences.clone()));
        }
    }
}

impl DataSubscriber for EventMachine {
    fn data_received(&mut self, chunk: &str, when: DateTime<Utc>) -> Result<()> {
        if self.core.is_done() {
            return Ok(());
        }
        self.core.note_data(when);
        self.last_data_at = when;
        let lines = self.assembler.assemble(chunk);
        for line in lines {
            if self.core.is_done() {
                break;
            }
            if self.process_line(&line.text, line.is_full) && !line.is_full {
                self.assembler.consume_tail();
            }
        }
        Ok(())
    }

    fn connection_closed(&mut self, reason: &str) {
        self.core.cancel(reason);
    }
}

/// A runnable event observer.
pub struct Event {
    core: Arc<ObserverCore>,
    machine: Arc<Mutex<EventMachine>>,
    runner: Runner,
    default_timeout: Option<Duration>,
    validators: Mutex<Vec<super::command::StartValidator>>,
}

impl Event {
    /// Starts building an event bound to a connection.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        connection: Arc<ObservableConnection>,
    ) -> EventBuilder {
        EventBuilder {
            name: name.into(),
            connection,
            runner: Runner::default(),
            patterns: Vec::new(),
            mode: MatchMode::Any,
            target: -1,
            process_full_lines_only: false,
            default_timeout: None,
        }
    }

    /// Shared observer state.
    #[must_use]
    pub fn core(&self) -> &Arc<ObserverCore> {
        &self.core
    }

    /// Adds a start-time validator; all must pass before subscribing.
    pub fn add_start_validator(&self, validator: super::command::StartValidator) {
        if let Ok(mut validators) = self.validators.lock() {
            validators.push(validator);
        }
    }

    /// Registers a callback fired on every occurrence (or cycle).
    pub fn on_occurrence(&self, callback: OccurrenceCallback) {
        if let Ok(mut machine) = self.machine.lock() {
            machine.callbacks.push(callback);
        }
    }

    /// Subscribes to the connection and arms the watchdog.
    ///
    /// # Errors
    ///
    /// [`Error::NoDetectPatternProvided`] with an empty pattern list,
    /// [`Error::AlreadyStarted`] on a second start, or a validator error.
    pub async fn start(&self, timeout: Option<Duration>) -> Result<()> {
        {
            let validators = self
                .validators
                .lock()
                .map_err(|_| Error::WrongUsage("validator list poisoned".to_string()))?;
            for validator in validators.iter() {
                validator()?;
            }
        }
        let empty = self.machine.lock().is_ok_and(|m| m.patterns.is_empty());
        if empty {
            return Err(Error::NoDetectPatternProvided(self.core.name().to_string()));
        }

        let effective = effective_timeout(timeout, self.default_timeout);
        let subscription = {
            let cloned = Arc::clone(&self.machine);
            let dynamic: Arc<Mutex<dyn DataSubscriber>> = cloned;
            self.core.connection().subscribe(Arc::downgrade(&dynamic))
        };
        if let Err(err) = self.core.mark_started(subscription, effective) {
            self.core.connection().unsubscribe(subscription);
            return Err(err);
        }
        self.runner.submit(Arc::clone(&self.core), effective);
        Ok(())
    }

    /// Waits until the event completes (by occurrence target, timeout or
    /// cancellation) and returns the list of fired occurrences.
    ///
    /// # Errors
    ///
    /// [`Error::StillRunning`] when `timeout` elapses first; otherwise the
    /// stored failure.
    pub async fn await_done(&self, timeout: Option<Duration>) -> Result<Value> {
        self.core.await_done(timeout).await
    }

    /// Swaps the detect-pattern set atomically with respect to line
    /// processing; the current cycle restarts.
    pub fn change_patterns(&self, patterns: Vec<Regex>) {
        if let Ok(mut machine) = self.machine.lock() {
            machine.patterns = patterns;
            machine.reset_cycle();
        }
    }

    /// Snapshot of the occurrences fired so far.
    #[must_use]
    pub fn occurrences(&self) -> Vec<Value> {
        self.machine
            .lock()
            .map(|m| m.occurrences.clone())
            .unwrap_or_default()
    }

    /// The most recent fired occurrence, if any.
    #[must_use]
    pub fn last_occurrence(&self) -> Option<Value> {
        self.machine
            .lock()
            .ok()
            .and_then(|m| m.occurrences.last().cloned())
    }

    /// Stops processing lines; data arriving while paused is discarded.
    pub fn pause(&self) {
        if let Ok(mut machine) = self.machine.lock() {
            machine.assembler.pause();
        }
    }

    /// Resumes line processing from the next chunk.
    pub fn resume(&self) {
        if let Ok(mut machine) = self.machine.lock() {
            machine.assembler.resume();
        }
    }

    /// Cancels the event; the usual way to end an unbounded watcher.
    pub fn cancel(&self) -> bool {
        self.core.cancel("cancelled by caller")
    }

    /// True once the event finished for any reason.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.core.name())
            .field("lifecycle", &self.core.lifecycle())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Event`].
pub struct EventBuilder {
    name: String,
    connection: Arc<ObservableConnection>,
    runner: Runner,
    patterns: Vec<Regex>,
    mode: MatchMode,
    target: i64,
    process_full_lines_only: bool,
    default_timeout: Option<Duration>,
}

impl EventBuilder {
    /// Uses the given runner instead of a fresh default handle.
    #[must_use]
    pub fn runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    /// Detect patterns, in declaration order.
    #[must_use]
    pub fn patterns(mut self, patterns: Vec<Regex>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Match mode; defaults to [`MatchMode::Any`].
    #[must_use]
    pub const fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Number of occurrence cycles to collect before completing;
    /// -1 keeps the event open until cancelled.
    #[must_use]
    pub const fn occurrences(mut self, target: i64) -> Self {
        self.target = target;
        self
    }

    /// Skips partial lines; only newline-terminated lines are matched.
    #[must_use]
    pub const fn full_lines_only(mut self, full_only: bool) -> Self {
        self.process_full_lines_only = full_only;
        self
    }

    /// Default timeout applied when `start` gets none.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Assembles the event.
    #[must_use]
    pub fn build(self) -> Event {
        let core = ObserverCore::new(self.name, self.connection);
        let pattern_count = self.patterns.len();
        let machine = Arc::new(Mutex::new(EventMachine {
            core: Arc::clone(&core),
            patterns: self.patterns,
            mode: self.mode,
            pending: (0..pattern_count).collect(),
            next_in_sequence: 0,
            cycle: Vec::new(),
            occurrences: Vec::new(),
            target: self.target,
            cycles_fired: 0,
            callbacks: Vec::new(),
            assembler: LineAssembler::new(),
            process_full_lines_only: self.process_full_lines_only,
            last_data_at: Utc::now(),
        }));
        Event {
            core,
            machine,
            runner: self.runner,
            default_timeout: self.default_timeout,
            validators: Mutex::new(Vec::new()),
        }
    }
}
