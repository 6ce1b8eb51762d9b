//! `ssh` command grammar.
//!
//! Used both interactively and as the transition command entering a
//! remote state: answers the host-key question and the password prompt,
//! latches authentication failures, succeeds once the remote prompt (the
//! envelope's expected prompt) shows up.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::{opt_param, str_param};

#[allow(clippy::unwrap_used)]
static PASSWORD_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)password:?\s*$").unwrap());

#[allow(clippy::unwrap_used)]
static HOST_KEY_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Are you sure you want to continue connecting.*\?").unwrap()
});

#[allow(clippy::unwrap_used)]
static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Permission denied|Authentication failed|Connection refused|Could not resolve")
        .unwrap()
});

/// Grammar of `TERM=xterm-mono ssh [options] -l <login> <host>`.
pub struct Ssh {
    host: String,
    login: String,
    password: String,
    options: Option<String>,
    password_sent: bool,
}

impl Ssh {
    /// Creates the grammar from its parameter map (`host`, `login`,
    /// `password`, `options`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            host: str_param(params, "host", ""),
            login: str_param(params, "login", ""),
            password: str_param(params, "password", ""),
            options: opt_param(params, "options"),
            password_sent: false,
        }
    }
}

impl CommandParser for Ssh {
    fn build_command_string(&self) -> String {
        let mut cmd = "TERM=xterm-mono ssh".to_string();
        if let Some(options) = &self.options {
            cmd.push(' ');
            cmd.push_str(options);
        }
        cmd.push_str(&format!(" -l {} {}", self.login, self.host));
        cmd
    }

    fn on_new_line(
        &mut self,
        ctx: &mut CommandContext,
        line: &str,
        _is_full_line: bool,
    ) -> Result<ParseControl> {
        if AUTH_FAILURE.is_match(line) {
            ctx.fail(line);
            return Ok(ParseControl::Stop);
        }
        if HOST_KEY_QUESTION.is_match(line) {
            ctx.reply("yes");
            return Ok(ParseControl::Stop);
        }
        if !self.password_sent && PASSWORD_PROMPT.is_match(line) {
            self.password_sent = true;
            tracing::debug!(host = %self.host, login = %self.login, "answering password prompt");
            ctx.reply(self.password.clone());
            return Ok(ParseControl::Stop);
        }
        Ok(ParseControl::Continue)
    }

    fn ret_required(&self) -> bool {
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grammar() -> Ssh {
        Ssh::from_params(
            json!({"host": "10.0.0.2", "login": "ute", "password": "sekret"})
                .as_object()
                .unwrap(),
        )
    }

    #[test]
    fn test_build_command_string() {
        assert_eq!(
            grammar().build_command_string(),
            "TERM=xterm-mono ssh -l ute 10.0.0.2"
        );
    }

    #[test]
    fn test_password_answered_once() {
        let mut ssh = grammar();
        let mut ctx = CommandContext::new("ssh");
        ssh.on_new_line(&mut ctx, "ute@10.0.0.2's password:", false).unwrap();
        ssh.on_new_line(&mut ctx, "wrong password:", false).unwrap();
        // The second prompt is not answered again; a retry loop would
        // hide a bad credential behind repeated sends.
        assert!(ssh.password_sent);
    }

    #[test]
    fn test_host_key_question_confirmed() {
        let mut ssh = grammar();
        let mut ctx = CommandContext::new("ssh");
        ssh.on_new_line(
            &mut ctx,
            "Are you sure you want to continue connecting (yes/no)?",
            false,
        )
        .unwrap();
        assert!(!ctx.has_failure());
    }

    #[test]
    fn test_permission_denied_latches_failure() {
        let mut ssh = grammar();
        let mut ctx = CommandContext::new("ssh");
        ssh.on_new_line(&mut ctx, "Permission denied (publickey,password).", true)
            .unwrap();
        assert!(ctx.has_failure());
    }
}
