//! `su` command grammar.

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
static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"su: Authentication failure|su: incorrect password|su: user \S+ does not exist")
        .unwrap()
});

/// Grammar of `su [- user]`.
pub struct Su {
    user: Option<String>,
    password: String,
    password_sent: bool,
}

impl Su {
    /// Creates the grammar from its parameter map (`user`, `password`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            user: opt_param(params, "user"),
            password: str_param(params, "password", ""),
            password_sent: false,
        }
    }
}

impl CommandParser for Su {
    fn build_command_string(&self) -> String {
        match &self.user {
            Some(user) => format!("su - {user}"),
            None => "su -".to_string(),
        }
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
        if !self.password_sent && PASSWORD_PROMPT.is_match(line) {
            self.password_sent = true;
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

    #[test]
    fn test_build_command_string() {
        let bare = Su::from_params(&Map::new());
        assert_eq!(bare.build_command_string(), "su -");
        let named = Su::from_params(json!({"user": "admin"}).as_object().unwrap());
        assert_eq!(named.build_command_string(), "su - admin");
    }

    #[test]
    fn test_auth_failure_latched() {
        let mut su = Su::from_params(&Map::new());
        let mut ctx = CommandContext::new("su");
        su.on_new_line(&mut ctx, "su: Authentication failure", true).unwrap();
        assert!(ctx.has_failure());
    }
}
