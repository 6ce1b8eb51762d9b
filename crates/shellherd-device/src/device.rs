//! The text device: command factory plus state machine in one object.
//!
//! A device has two responsibilities: hand out command/event observers
//! valid for its current state, and walk the state machine that controls
//! which state the device is in. State routing is pure lookup — the hop
//! table answers "given where I am, what is the next hop toward the
//! destination" and every hop runs one configured command.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{Map, Value};

use shellherd_core::connection::{
    ConnectionEvent, DataSubscriber, Io, ObservableConnection,
};
use shellherd_core::observer::{Command, Event, MatchMode};
use shellherd_core::runner::effective_timeout;
use shellherd_core::{Error, Result, Runner};

use crate::merge::merge_values;
use crate::prompts::{PromptCheckOptions, PromptCollision, PromptSink, PromptWatcher};
use crate::registry::{self, IoBundle};
use crate::sm::{
    DeviceClass, HopTable, NOT_CONNECTED, TransitionAction, TransitionRule, TransitionTable,
};

/// Prompt used when a state has no configured pattern.
const FALLBACK_PROMPT: &str = r"^[^<]*[\$%#>~]\s*$";

/// Literal echoed back when probing an unknown prompt.
const PROMPT_PROBE: &str = "echo PROMPT-PROBE";

/// Everything needed to construct a [`TextDevice`].
pub struct DeviceSpec {
    /// Device name, used in logs and errors.
    pub name: String,
    /// The device class providing defaults and routing.
    pub class: Arc<dyn DeviceClass>,
    /// Transport and connection.
    pub io: IoBundle,
    /// User overlay for the class's transition defaults.
    pub connection_hops: Option<Value>,
    /// State `establish_connection` drives to; class default when `None`.
    pub initial_state: Option<String>,
    /// Observer execution pool.
    pub runner: Runner,
    /// Prompt-checking options for the always-on tracker.
    pub prompt_options: PromptCheckOptions,
}

pub(crate) struct DeviceInner {
    name: String,
    class: Arc<dyn DeviceClass>,
    connection: Arc<ObservableConnection>,
    io: Arc<dyn Io>,
    runner: Runner,
    state: Mutex<String>,
    transitions: TransitionTable,
    hops: HopTable,
    prompts: Mutex<HashMap<String, String>>,
    watcher: Arc<Mutex<PromptWatcher>>,
    collision: Mutex<Option<PromptCollision>>,
    transition_lock: tokio::sync::Mutex<()>,
    initial_state: String,
    always_on: Mutex<Vec<Event>>,
    remove_handlers: Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>,
}

impl DeviceInner {
    fn current_state(&self) -> String {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn set_state(&self, state: &str) {
        let Ok(mut current) = self.state.lock() else {
            return;
        };
        if *current != state {
            tracing::info!(device = %self.name, from = %*current, to = %state, "state changed");
            *current = state.to_string();
        }
    }
}

impl PromptSink for DeviceInner {
    fn prompt_matched(&self, state: &str, _line: &str) {
        self.set_state(state);
    }

    fn prompt_collision(&self, collision: PromptCollision) {
        if let Ok(mut slot) = self.collision.lock() {
            *slot = Some(collision);
        }
    }
}

/// Handle of a background state transition started with
/// [`TextDevice::goto_state_bg`].
pub struct StateTransfer {
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl StateTransfer {
    /// Waits for the background transition to finish.
    ///
    /// # Errors
    ///
    /// The transition's failure, or [`Error::DeviceFailure`] when the
    /// task itself died.
    pub async fn await_done(self) -> Result<()> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(Error::DeviceFailure {
                device: String::new(),
                reason: format!("background transition task failed: {join_err}"),
            }),
        }
    }
}

/// A named, stateful device driving one connection.
///
/// Cheap to clone; clones share the same underlying device.
#[derive(Clone)]
pub struct TextDevice {
    inner: Arc<DeviceInner>,
}

impl TextDevice {
    /// Builds a device from its specification. The device starts in
    /// [`NOT_CONNECTED`]; call [`Self::establish_connection`] to open I/O
    /// and reach the initial state.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the merged transition configuration does
    /// not deserialize; [`Error::DeviceFailure`] for invalid prompt
    /// patterns.
    pub fn build(spec: DeviceSpec) -> Result<Self> {
        let use_proxy = spec
            .connection_hops
            .as_ref()
            .and_then(Value::as_object)
            .is_some_and(|map| map.contains_key("PROXY_PC"));

        let mut merged = if use_proxy {
            spec.class.default_hops_with_proxy()
        } else {
            spec.class.default_hops_without_proxy()
        };
        if let Some(user_hops) = &spec.connection_hops {
            merge_values(&mut merged, user_hops);
        }
        let transitions: TransitionTable = serde_json::from_value(merged)
            .map_err(|err| Error::Config(format!("bad CONNECTION_HOPS for '{}': {err}", spec.name)))?;

        let prompts = spec.class.state_prompts(&transitions);
        let compiled = compile_prompts(&spec.name, &prompts)?;
        let hops = spec.class.hop_table(use_proxy);
        let initial_state = spec
            .initial_state
            .unwrap_or_else(|| spec.class.initial_state().to_string());

        let name = spec.name;
        let class = spec.class;
        let connection = spec.io.connection;
        let io = spec.io.io;
        let runner = spec.runner;
        let prompt_options = spec.prompt_options;

        let inner = Arc::new_cyclic(|weak: &Weak<DeviceInner>| {
            let sink: Weak<dyn PromptSink> = weak.clone();
            DeviceInner {
                name,
                class,
                connection,
                io,
                runner,
                state: Mutex::new(NOT_CONNECTED.to_string()),
                transitions,
                hops,
                prompts: Mutex::new(prompts),
                watcher: Arc::new(Mutex::new(PromptWatcher::new(
                    sink,
                    compiled,
                    prompt_options,
                ))),
                collision: Mutex::new(None),
                transition_lock: tokio::sync::Mutex::new(()),
                initial_state,
                always_on: Mutex::new(Vec::new()),
                remove_handlers: Mutex::new(Vec::new()),
            }
        });

        // The tracker watches the connection for the device's lifetime.
        {
            let cloned = Arc::clone(&inner.watcher);
            let dynamic: Arc<Mutex<dyn DataSubscriber>> = cloned;
            inner.connection.subscribe(Arc::downgrade(&dynamic));
        }

        let lifecycle = Arc::downgrade(&inner);
        inner.connection.add_listener(move |event| {
            let Some(inner) = lifecycle.upgrade() else {
                return;
            };
            match event {
                ConnectionEvent::Made => inner.set_state(inner.class.connected_state()),
                ConnectionEvent::Lost => inner.set_state(NOT_CONNECTED),
            }
        });

        Ok(Self { inner })
    }

    /// Device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registered name of the device's class.
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        self.inner.class.name()
    }

    /// The connection this device drives.
    #[must_use]
    pub fn connection(&self) -> &Arc<ObservableConnection> {
        &self.inner.connection
    }

    /// The device's transport.
    #[must_use]
    pub fn io(&self) -> &Arc<dyn Io> {
        &self.inner.io
    }

    /// Current state label.
    #[must_use]
    pub fn current_state(&self) -> String {
        self.inner.current_state()
    }

    /// State driven to by [`Self::establish_connection`].
    #[must_use]
    pub fn initial_state(&self) -> &str {
        &self.inner.initial_state
    }

    /// True once the device left [`NOT_CONNECTED`].
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.current_state() != NOT_CONNECTED
    }

    /// Opens I/O and drives the state machine to the initial state.
    ///
    /// # Errors
    ///
    /// Any [`Self::goto_state`] failure.
    pub async fn establish_connection(&self) -> Result<()> {
        self.start_always_on_events().await;
        let initial = self.inner.initial_state.clone();
        self.goto_state(&initial, None).await
    }

    /// Moves the device to `dest`, running one configured command per
    /// hop. A no-op when already there. Transitions are serialized per
    /// device; concurrent calls queue on the transition lock.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceFailure`] for unroutable states or missing
    /// required parameters; [`Error::DeviceChangeStateFailure`] when a
    /// hop's command fails — the device then stays at that hop's source
    /// state.
    pub async fn goto_state(&self, dest: &str, timeout: Option<Duration>) -> Result<()> {
        if self.current_state() == dest {
            return Ok(());
        }
        let _serialized = self.inner.transition_lock.lock().await;
        let started = Instant::now();

        while self.current_state() != dest {
            let current = self.current_state();
            let next = self.next_hop(&current, dest);
            tracing::debug!(device = %self.inner.name, %current, %next, %dest, "state hop");

            let remaining = match timeout {
                Some(limit) => {
                    let left = limit.saturating_sub(started.elapsed());
                    if left.is_zero() {
                        return Err(Error::DeviceChangeStateFailure {
                            device: self.inner.name.clone(),
                            from: current,
                            to: dest.to_string(),
                            source: Box::new(Error::Timeout {
                                observer: format!("goto_state({dest})"),
                                after: limit,
                            }),
                        });
                    }
                    Some(left)
                }
                None => None,
            };
            self.trigger_change_state(&current, &next, remaining).await?;
        }
        Ok(())
    }

    /// Starts a state transition in the background.
    #[must_use]
    pub fn goto_state_bg(&self, dest: &str, timeout: Option<Duration>) -> StateTransfer {
        let device = self.clone();
        let dest = dest.to_string();
        StateTransfer {
            handle: tokio::spawn(async move { device.goto_state(&dest, timeout).await }),
        }
    }

    fn next_hop(&self, current: &str, dest: &str) -> String {
        self.inner
            .hops
            .get(current)
            .and_then(|routes| routes.get(dest))
            .cloned()
            .unwrap_or_else(|| dest.to_string())
    }

    async fn trigger_change_state(
        &self,
        from: &str,
        next: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let rule = self
            .inner
            .transitions
            .get(from)
            .and_then(|targets| targets.get(next))
            .cloned()
            .ok_or_else(|| Error::DeviceFailure {
                device: self.inner.name.clone(),
                reason: format!(
                    "no transition from '{from}' to '{next}'; known states: {:?}",
                    self.states()
                ),
            })?;

        match rule.action {
            TransitionAction::OpenConnection => {
                self.inner.io.open()?;
                self.inner.set_state(next);
                Ok(())
            }
            TransitionAction::CloseConnection => {
                self.inner.io.close()?;
                self.inner.set_state(NOT_CONNECTED);
                Ok(())
            }
            TransitionAction::ExecuteCommand => {
                for required in &rule.required_command_params {
                    if !rule.command_params.contains_key(required) {
                        return Err(Error::DeviceFailure {
                            device: self.inner.name.clone(),
                            reason: format!(
                                "transition '{from}' -> '{next}' misses required parameter '{required}'"
                            ),
                        });
                    }
                }

                let config_timeout = rule.timeout.map(Duration::from_secs_f64);
                let hop_timeout = effective_timeout(timeout, config_timeout);

                let command = self.build_transition_command(from, &rule)?;
                match command.run(hop_timeout).await {
                    Ok(_) => {
                        self.inner.set_state(next);
                        Ok(())
                    }
                    Err(err) => Err(Error::DeviceChangeStateFailure {
                        device: self.inner.name.clone(),
                        from: from.to_string(),
                        to: next.to_string(),
                        source: Box::new(err),
                    }),
                }
            }
        }
    }

    fn build_transition_command(&self, from: &str, rule: &TransitionRule) -> Result<Command> {
        // The transition lock already serializes state changes, so the
        // hop command skips the created-vs-started state check.
        self.make_command(
            &rule.execute_command,
            rule.command_params.clone(),
            from,
            false,
        )
    }

    /// Builds a command looked up in the current state's catalogue.
    ///
    /// The returned command validates at start time that the device is
    /// still in the state it was created for; a change in between fails
    /// the start with [`Error::CommandWrongState`].
    ///
    /// # Errors
    ///
    /// [`Error::DeviceFailure`] for names unknown in the current state or
    /// invalid parameters.
    pub fn get_cmd(&self, name: &str, params: Value) -> Result<Command> {
        let state = self.current_state();
        self.get_cmd_for_state(name, params, &state, true)
    }

    /// Builds a command for an explicit state, optionally skipping the
    /// start-time state check.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_cmd`].
    pub fn get_cmd_for_state(
        &self,
        name: &str,
        params: Value,
        for_state: &str,
        check_state: bool,
    ) -> Result<Command> {
        let params = into_params(&self.inner.name, params)?;
        self.make_command(name, params, for_state, check_state)
    }

    fn make_command(
        &self,
        name: &str,
        params: Map<String, Value>,
        for_state: &str,
        check_state: bool,
    ) -> Result<Command> {
        let namespaces = self.inner.class.command_namespaces(for_state);
        let factory = registry::lookup_command(&namespaces, name).ok_or_else(|| {
            Error::DeviceFailure {
                device: self.inner.name.clone(),
                reason: format!("'{name}' command is unknown for state '{for_state}'"),
            }
        })?;
        let parser = factory(&params)?;

        let prompt = match params.get("expected_prompt").and_then(Value::as_str) {
            Some(pattern) => compile_prompt(&self.inner.name, pattern)?,
            None => self.get_prompt(),
        };
        let newline = params
            .get("target_newline")
            .and_then(Value::as_str)
            .unwrap_or("\n");

        let command = Command::builder(name, Arc::clone(&self.inner.connection))
            .runner(self.inner.runner.clone())
            .prompt(prompt)
            .newline(newline)
            .build(parser);

        if check_state {
            command.add_start_validator(self.state_validator(name, for_state, true));
        }
        Ok(command)
    }

    /// Builds an event looked up in the current state's catalogue.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceFailure`] for names unknown in the current state or
    /// invalid patterns.
    pub fn get_event(&self, name: &str, params: Value) -> Result<Event> {
        let state = self.current_state();
        self.get_event_for_state(name, params, &state, true)
    }

    /// Builds an event for an explicit state, optionally skipping the
    /// start-time state check.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_event`].
    pub fn get_event_for_state(
        &self,
        name: &str,
        params: Value,
        for_state: &str,
        check_state: bool,
    ) -> Result<Event> {
        let params = into_params(&self.inner.name, params)?;
        let namespaces = self.inner.class.event_namespaces(for_state);
        let factory = registry::lookup_event(&namespaces, name).ok_or_else(|| {
            Error::DeviceFailure {
                device: self.inner.name.clone(),
                reason: format!("'{name}' event is unknown for state '{for_state}'"),
            }
        })?;
        let spec = factory(&params)?;

        let mut patterns = Vec::with_capacity(spec.patterns.len());
        for pattern in &spec.patterns {
            patterns.push(compile_prompt(&self.inner.name, pattern)?);
        }

        let event = Event::builder(name, Arc::clone(&self.inner.connection))
            .runner(self.inner.runner.clone())
            .patterns(patterns)
            .mode(spec.mode)
            .occurrences(spec.occurrences)
            .full_lines_only(spec.full_lines_only)
            .build();

        if check_state {
            event.add_start_validator(self.state_validator(name, for_state, false));
        }
        Ok(event)
    }

    /// Convenience: build, start and await a command in one call.
    ///
    /// # Errors
    ///
    /// Any construction, start or run failure.
    pub async fn run_cmd(&self, name: &str, params: Value) -> Result<Value> {
        let command = self.get_cmd(name, params)?;
        command.run(None).await
    }

    fn state_validator(
        &self,
        observer: &str,
        created_in: &str,
        is_command: bool,
    ) -> shellherd_core::observer::StartValidator {
        let weak = Arc::downgrade(&self.inner);
        let observer = observer.to_string();
        let created_in = created_in.to_string();
        Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return Err(Error::WrongUsage("device no longer exists".to_string()));
            };
            let current = inner.current_state();
            if current == created_in {
                Ok(())
            } else if is_command {
                Err(Error::CommandWrongState {
                    command: observer.clone(),
                    created_in: created_in.clone(),
                    current,
                })
            } else {
                Err(Error::EventWrongState {
                    event: observer.clone(),
                    created_in: created_in.clone(),
                    current,
                })
            }
        })
    }

    /// Sets the device state; a no-op when already there. Normally driven
    /// by the prompt tracker.
    pub fn set_state(&self, state: &str) {
        self.inner.set_state(state);
    }

    /// All states appearing in the transition table.
    #[must_use]
    pub fn states(&self) -> Vec<String> {
        let mut states: Vec<String> = self.inner.transitions.keys().cloned().collect();
        for targets in self.inner.transitions.values() {
            for state in targets.keys() {
                if !states.contains(state) {
                    states.push(state.clone());
                }
            }
        }
        states.sort();
        states
    }

    /// Prompt of the current state, or the generic fallback.
    #[must_use]
    pub fn get_prompt(&self) -> Regex {
        let state = self.current_state();
        self.state_prompt(&state)
            .and_then(|pattern| Regex::new(&pattern).ok())
            .or_else(|| Regex::new(FALLBACK_PROMPT).ok())
            .unwrap_or_else(|| unreachable_prompt())
    }

    /// Configured prompt pattern of a state.
    #[must_use]
    pub fn state_prompt(&self, state: &str) -> Option<String> {
        self.inner
            .prompts
            .lock()
            .ok()
            .and_then(|prompts| prompts.get(state).cloned())
    }

    /// Installs or replaces a state's prompt pattern; the reverse map and
    /// the always-on tracker pick the change up atomically.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceFailure`] for an invalid pattern.
    pub fn set_state_prompt(&self, state: &str, pattern: &str) -> Result<()> {
        compile_prompt(&self.inner.name, pattern)?;
        {
            let mut prompts = self
                .inner
                .prompts
                .lock()
                .map_err(|_| Error::WrongUsage("prompt table poisoned".to_string()))?;
            prompts.insert(state.to_string(), pattern.to_string());
            let compiled = compile_prompts(&self.inner.name, &prompts)?;
            if let Ok(mut watcher) = self.inner.watcher.lock() {
                watcher.set_patterns(compiled);
            }
        }
        tracing::debug!(device = %self.inner.name, state, pattern, "prompt updated");
        Ok(())
    }

    /// Reconfigures how the tracker checks prompt patterns.
    pub fn set_prompt_options(&self, options: PromptCheckOptions) {
        if let Ok(mut watcher) = self.inner.watcher.lock() {
            watcher.set_options(options);
        }
    }

    /// The collision marker set when one line matched several states'
    /// prompts; `None` on a healthy configuration.
    #[must_use]
    pub fn last_wrong_prompt_occurrence(&self) -> Option<PromptCollision> {
        self.inner.collision.lock().ok().and_then(|slot| slot.clone())
    }

    /// Probes the device for the actual prompt of the current state —
    /// used right after opening a shell whose prompt is arbitrary. The
    /// text preceding the probe's echo becomes the state's prompt.
    ///
    /// # Errors
    ///
    /// Probe start/await failures, or prompt-table update failures.
    pub async fn detect_prompt(&self, timeout: Option<Duration>) -> Result<()> {
        let limit = timeout.unwrap_or(Duration::from_secs(10));
        let pattern = format!("^(.+){}", regex::escape(PROMPT_PROBE));
        let probe = Event::builder("prompt-probe", Arc::clone(&self.inner.connection))
            .runner(self.inner.runner.clone())
            .patterns(vec![compile_prompt(&self.inner.name, &pattern)?])
            .mode(MatchMode::Any)
            .occurrences(2)
            .build();
        probe.start(Some(limit)).await?;

        // Twice, with blank lines around, so a noisy banner cannot fake
        // the capture.
        self.inner.connection.sendline("")?;
        self.inner.connection.sendline(PROMPT_PROBE)?;
        self.inner.connection.sendline("")?;
        self.inner.connection.sendline(PROMPT_PROBE)?;

        probe.await_done(Some(limit)).await?;
        let captured = probe
            .last_occurrence()
            .and_then(|occ| occ["groups"][0].as_str().map(ToString::to_string))
            .ok_or_else(|| Error::DeviceFailure {
                device: self.inner.name.clone(),
                reason: "prompt probe matched nothing".to_string(),
            })?;

        let state = self.current_state();
        let escaped = format!("^{}", regex::escape(captured.trim_end()));
        self.set_state_prompt(&state, &escaped)
    }

    /// Registers a handler invoked by [`Self::remove`], e.g. the factory
    /// forgetting the device.
    pub fn add_remove_handler(&self, handler: Box<dyn Fn(&str) + Send + Sync>) {
        if let Ok(mut handlers) = self.inner.remove_handlers.lock() {
            handlers.push(handler);
        }
    }

    /// Tears the device down: cancels its always-on events, closes the
    /// connection (cancelling every subscribed observer with reason
    /// "connection closing"), closes I/O and notifies remove handlers.
    pub fn remove(&self) {
        tracing::info!(device = %self.inner.name, "removing device");
        if let Ok(mut events) = self.inner.always_on.lock() {
            for event in events.drain(..) {
                event.cancel();
            }
        }
        self.inner.connection.close("connection closing");
        if let Err(err) = self.inner.io.close() {
            tracing::warn!(device = %self.inner.name, %err, "transport close failed");
        }
        if let Ok(handlers) = self.inner.remove_handlers.lock() {
            for handler in handlers.iter() {
                handler(&self.inner.name);
            }
        }
    }

    async fn start_always_on_events(&self) {
        // Always-on events are catalogued under the initial state, not
        // whatever state the device happens to be in when armed.
        let catalogue_state = self.inner.initial_state.clone();
        for name in self.inner.class.always_on_events() {
            match self.get_event_for_state(name, Value::Null, &catalogue_state, false) {
                Ok(event) => {
                    if let Err(err) = event.start(None).await {
                        tracing::warn!(device = %self.inner.name, event = name, %err,
                            "always-on event failed to start");
                        continue;
                    }
                    if let Ok(mut events) = self.inner.always_on.lock() {
                        events.push(event);
                    }
                }
                Err(err) => {
                    tracing::debug!(device = %self.inner.name, event = name, %err,
                        "always-on event not available");
                }
            }
        }
    }

    /// The resolved rule for one transition, for diagnostics and clone
    /// parity checks.
    #[must_use]
    pub fn resolved_transition(&self, from: &str, to: &str) -> Option<TransitionRule> {
        self.inner
            .transitions
            .get(from)
            .and_then(|targets| targets.get(to))
            .cloned()
    }
}

impl std::fmt::Debug for TextDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextDevice")
            .field("name", &self.inner.name)
            .field("class", &self.inner.class.name())
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

fn into_params(device: &str, params: Value) -> Result<Map<String, Value>> {
    match params {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::WrongUsage(format!(
            "parameters for device '{device}' must be a map, got {other}"
        ))),
    }
}

fn compile_prompt(device: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| Error::DeviceFailure {
        device: device.to_string(),
        reason: format!("invalid pattern '{pattern}': {err}"),
    })
}

fn compile_prompts(
    device: &str,
    prompts: &HashMap<String, String>,
) -> Result<Vec<(Regex, String)>> {
    let mut ordered: Vec<(&String, &String)> = prompts.iter().collect();
    // Deterministic order so first-match behavior is stable.
    ordered.sort_by(|a, b| a.0.cmp(b.0));
    ordered
        .into_iter()
        .map(|(state, pattern)| Ok((compile_prompt(device, pattern)?, state.clone())))
        .collect()
}

// The fallback pattern is a valid literal; this path cannot be hit.
#[allow(clippy::unwrap_used)]
fn unreachable_prompt() -> Regex {
    Regex::new(r"\$").unwrap()
}
