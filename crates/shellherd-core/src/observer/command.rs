//! Command observers: issue a line, parse the reply, match the prompt.
//!
//! The envelope here owns everything generic about running a shell
//! command: sending the built command string, consuming the shell's echo
//! of it, feeding each output line to the command's parser, and completing
//! when the expected prompt returns. A command author only writes the
//! grammar — a [`CommandParser`] that builds the command string and turns
//! matched lines into result entries.

use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::connection::{DataSubscriber, ObservableConnection};
use crate::error::{Error, Result};
use crate::observer::core::ObserverCore;
use crate::runner::{Runner, effective_timeout};
use crate::text::LineAssembler;

/// Fallback prompt matching common idle shells.
#[allow(clippy::unwrap_used)]
static DEFAULT_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^<]*[\$%#>~]\s*$").unwrap());

/// Commands wait for their reply for this long unless told otherwise.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Flow control returned by a parser for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseControl {
    /// Keep feeding lines.
    Continue,
    /// This line is fully handled; same as `Continue` for the envelope,
    /// kept distinct so grammars can short-circuit their own match chain.
    Stop,
}

/// Mutable parsing state handed to the parser line by line.
pub struct CommandContext {
    command: String,
    ret: Map<String, Value>,
    latched: Option<Error>,
    replies: Vec<String>,
}

impl CommandContext {
    /// Creates an empty context; grammars use this to test their line
    /// parsing without a running command.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_name(command.into())
    }

    fn with_name(command: String) -> Self {
        Self {
            command,
            ret: Map::new(),
            latched: None,
            replies: Vec::new(),
        }
    }

    /// Name of the command being parsed.
    #[must_use]
    pub fn command_name(&self) -> &str {
        &self.command
    }

    /// Read access to the accumulated result map.
    #[must_use]
    pub fn ret(&self) -> &Map<String, Value> {
        &self.ret
    }

    /// Write access to the accumulated result map.
    pub fn ret_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.ret
    }

    /// Inserts one result entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.ret.insert(key.into(), value);
    }

    /// Latches a textual failure; the command completes with it once the
    /// prompt arrives. The first latched failure wins.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.latched.is_none() {
            self.latched = Some(Error::CommandFailure {
                command: self.command.clone(),
                reason: reason.into(),
            });
        }
    }

    /// True once a failure was latched.
    #[must_use]
    pub fn has_failure(&self) -> bool {
        self.latched.is_some()
    }

    /// Queues a line to send back to the device, e.g. a password when the
    /// grammar spotted a password prompt. Sent after the parser returns.
    pub fn reply(&mut self, line: impl Into<String>) {
        self.replies.push(line.into());
    }
}

/// The grammar of one concrete command.
///
/// Implementations are regex-driven: match the line, update the result
/// map, latch failures for known error output. Returning `Err` is for
/// broken invariants only — it terminates the command immediately.
pub trait CommandParser: Send {
    /// Builds the command string from the typed parameters, without the
    /// trailing newline.
    fn build_command_string(&self) -> String;

    /// Parses one line of output. `is_full_line` is false for the
    /// trailing fragment of a chunk — prompt lines arrive that way, and a
    /// grammar may pull data from the prompt line itself.
    ///
    /// # Errors
    ///
    /// An error terminates the command at once with that failure.
    fn on_new_line(
        &mut self,
        ctx: &mut CommandContext,
        line: &str,
        is_full_line: bool,
    ) -> Result<ParseControl>;

    /// Whether an empty result map at the prompt is a failure.
    fn ret_required(&self) -> bool {
        true
    }
}

/// Validator run by [`Command::start`] before anything is sent; devices
/// use it to reject commands whose device left the creation state.
pub type StartValidator = Box<dyn Fn() -> Result<()> + Send + Sync>;

struct CommandMachine {
    core: Arc<ObserverCore>,
    parser: Box<dyn CommandParser>,
    ctx: CommandContext,
    assembler: LineAssembler,
    command_string: String,
    prompt: Regex,
    ret_required: bool,
    echo_consumed: bool,
}

impl CommandMachine {
    fn process_line(&mut self, line: &str, is_full: bool) {
        if !self.echo_consumed {
            if line.contains(self.command_string.as_str()) {
                self.echo_consumed = true;
            }
            // The echo is the shell talking, not command output.
            return;
        }

        match self.parser.on_new_line(&mut self.ctx, line, is_full) {
            Ok(ParseControl::Continue | ParseControl::Stop) => {}
            Err(err) => {
                let _ = self.core.set_exception(err);
                return;
            }
        }

        if self.prompt.is_match(line) {
            self.complete();
        }
    }

    fn complete(&mut self) {
        if let Some(latched) = self.ctx.latched.take() {
            let _ = self.core.set_exception(latched);
        } else if self.ret_required && self.ctx.ret.is_empty() {
            let _ = self.core.set_exception(Error::CommandFailure {
                command: self.core.name().to_string(),
                reason: "prompt reached without any result data".to_string(),
            });
        } else {
            let _ = self.core.set_result(Value::Object(self.ctx.ret.clone()));
        }
    }
}

impl DataSubscriber for CommandMachine {
    fn data_received(&mut self, chunk: &str, when: DateTime<Utc>) -> Result<()> {
        if self.core.is_done() {
            return Ok(());
        }
        self.core.note_data(when);
        for line in self.assembler.assemble(chunk) {
            if self.core.is_done() {
                break;
            }
            self.process_line(&line.text, line.is_full);
            for reply in std::mem::take(&mut self.ctx.replies) {
                self.core.connection().sendline(&reply)?;
            }
        }
        Ok(())
    }

    fn connection_closed(&mut self, reason: &str) {
        self.core.cancel(reason);
    }
}

/// A runnable command observer.
///
/// One-shot: once finished it cannot be started again; retrying means
/// building a fresh command.
pub struct Command {
    core: Arc<ObserverCore>,
    machine: Arc<Mutex<CommandMachine>>,
    runner: Runner,
    newline: String,
    default_timeout: Option<Duration>,
    validators: Mutex<Vec<StartValidator>>,
}

impl Command {
    /// Starts building a command bound to a connection.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        connection: Arc<ObservableConnection>,
    ) -> CommandBuilder {
        CommandBuilder {
            name: name.into(),
            connection,
            runner: Runner::default(),
            prompt: None,
            newline: "\n".to_string(),
            default_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            ret_required: None,
        }
    }

    /// Observer name.
    #[must_use]
    pub fn name(&self) -> String {
        self.core.name().to_string()
    }

    /// Shared observer state.
    #[must_use]
    pub fn core(&self) -> &Arc<ObserverCore> {
        &self.core
    }

    /// The command string that will be (or was) sent, newline excluded.
    #[must_use]
    pub fn command_string(&self) -> String {
        self.machine
            .lock()
            .map(|m| m.command_string.clone())
            .unwrap_or_default()
    }

    /// Adds a start-time validator; all must pass before the command is
    /// sent.
    pub fn add_start_validator(&self, validator: StartValidator) {
        if let Ok(mut validators) = self.validators.lock() {
            validators.push(validator);
        }
    }

    /// Subscribes to the connection, arms the watchdog and sends the
    /// command string.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] on a second start, a validator's error
    /// (e.g. wrong device state), or a send failure — which also
    /// terminates the observer.
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

        let command_string = self.command_string();
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

        tracing::debug!(command = %self.core.name(), line = %command_string, "sending command");
        let mut outbound = command_string;
        outbound.push_str(&self.newline);
        if let Err(err) = self.core.connection().send(&outbound) {
            let _ = self.core.set_exception(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Waits for completion and returns the result map.
    ///
    /// # Errors
    ///
    /// [`Error::StillRunning`] when `timeout` elapses before completion;
    /// otherwise the stored failure.
    pub async fn await_done(&self, timeout: Option<Duration>) -> Result<Value> {
        self.core.await_done(timeout).await
    }

    /// Runs the command to completion: `start` + wait.
    ///
    /// # Errors
    ///
    /// Any start failure, or the command's stored failure.
    pub async fn run(&self, timeout: Option<Duration>) -> Result<Value> {
        self.start(timeout).await?;
        self.await_done(None).await
    }

    /// Cancels the command; idempotent, never blocks.
    pub fn cancel(&self) -> bool {
        self.core.cancel("cancelled by caller")
    }

    /// True once the command finished for any reason.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Returns the stored result or re-raises the stored failure.
    ///
    /// # Errors
    ///
    /// See [`ObserverCore::result`].
    pub fn result(&self) -> Result<Value> {
        self.core.result()
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.core.name())
            .field("lifecycle", &self.core.lifecycle())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Command`].
pub struct CommandBuilder {
    name: String,
    connection: Arc<ObservableConnection>,
    runner: Runner,
    prompt: Option<Regex>,
    newline: String,
    default_timeout: Option<Duration>,
    ret_required: Option<bool>,
}

impl CommandBuilder {
    /// Uses the given runner instead of a fresh default handle.
    #[must_use]
    pub fn runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    /// Expected prompt ending the command's output.
    #[must_use]
    pub fn prompt(mut self, prompt: Regex) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Newline appended to the command string (some devices want `\r\n`).
    #[must_use]
    pub fn newline(mut self, newline: impl Into<String>) -> Self {
        self.newline = newline.into();
        self
    }

    /// Default timeout used when `start` gets none. `Duration::ZERO`
    /// makes the command unbounded.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Overrides the parser's `ret_required` answer.
    #[must_use]
    pub const fn ret_required(mut self, required: bool) -> Self {
        self.ret_required = Some(required);
        self
    }

    /// Assembles the command around its grammar.
    #[must_use]
    pub fn build(self, parser: Box<dyn CommandParser>) -> Command {
        let core = ObserverCore::new(self.name, self.connection);
        let command_string = parser.build_command_string();
        let ret_required = self.ret_required.unwrap_or_else(|| parser.ret_required());
        let machine = Arc::new(Mutex::new(CommandMachine {
            core: Arc::clone(&core),
            ctx: CommandContext::with_name(core.name().to_string()),
            parser,
            assembler: LineAssembler::new(),
            command_string,
            prompt: self.prompt.unwrap_or_else(|| DEFAULT_PROMPT.clone()),
            ret_required,
            echo_consumed: false,
        }));
        Command {
            core,
            machine,
            runner: self.runner,
            newline: self.newline,
            default_timeout: self.default_timeout,
            validators: Mutex::new(Vec::new()),
        }
    }
}
