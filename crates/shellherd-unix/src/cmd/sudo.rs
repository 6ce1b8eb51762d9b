//! `sudo` command grammar wrapping another command line.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::{is_failure_indication, str_param};

#[allow(clippy::unwrap_used)]
static SUDO_PASSWORD_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[sudo\] password for .*:\s*$").unwrap());

#[allow(clippy::unwrap_used)]
static SUDO_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sorry, try again|is not in the sudoers file|sudo: .* command not found").unwrap()
});

/// Grammar of `sudo <command>`.
pub struct Sudo {
    command: String,
    password: String,
    password_sent: bool,
}

impl Sudo {
    /// Creates the grammar from its parameter map (`command`,
    /// `password`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            command: str_param(params, "command", ""),
            password: str_param(params, "password", ""),
            password_sent: false,
        }
    }
}

impl CommandParser for Sudo {
    fn build_command_string(&self) -> String {
        format!("sudo {}", self.command)
    }

    fn on_new_line(
        &mut self,
        ctx: &mut CommandContext,
        line: &str,
        is_full_line: bool,
    ) -> Result<ParseControl> {
        if SUDO_FAILURE.is_match(line) || (is_full_line && is_failure_indication(line)) {
            ctx.fail(line);
            return Ok(ParseControl::Stop);
        }
        if !self.password_sent && SUDO_PASSWORD_PROMPT.is_match(line) {
            self.password_sent = true;
            tracing::debug!(command = %self.command, "answering sudo password prompt");
            ctx.reply(self.password.clone());
            return Ok(ParseControl::Stop);
        }
        Ok(ParseControl::Continue)
    }

    fn ret_required(&self) -> bool {
        false
    }
}
