//! `whoami` command grammar.

use serde_json::{Map, Value};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::is_failure_indication;

/// Grammar of `whoami`: the first non-empty output line is the user.
#[derive(Debug, Default)]
pub struct Whoami;

impl Whoami {
    /// Creates the grammar; `whoami` takes no parameters.
    #[must_use]
    pub fn from_params(_params: &Map<String, Value>) -> Self {
        Self
    }
}

impl CommandParser for Whoami {
    fn build_command_string(&self) -> String {
        "whoami".to_string()
    }

    fn on_new_line(
        &mut self,
        ctx: &mut CommandContext,
        line: &str,
        is_full_line: bool,
    ) -> Result<ParseControl> {
        if !is_full_line {
            return Ok(ParseControl::Continue);
        }
        if is_failure_indication(line) {
            ctx.fail(line);
            return Ok(ParseControl::Stop);
        }
        let user = line.trim();
        if !user.is_empty() && !ctx.ret().contains_key("USER") {
            ctx.insert("USER", Value::from(user));
            return Ok(ParseControl::Stop);
        }
        Ok(ParseControl::Continue)
    }
}
