//! `cd` command grammar.

use serde_json::{Map, Value};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::{is_failure_indication, str_param};

/// Grammar of `cd <path>`; success is silent, so an empty result at the
/// prompt is fine.
pub struct Cd {
    path: String,
}

impl Cd {
    /// Creates the grammar from its parameter map (`path`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            path: str_param(params, "path", ""),
        }
    }
}

impl CommandParser for Cd {
    fn build_command_string(&self) -> String {
        if self.path.is_empty() {
            "cd".to_string()
        } else {
            format!("cd {}", self.path)
        }
    }

    fn on_new_line(
        &mut self,
        ctx: &mut CommandContext,
        line: &str,
        is_full_line: bool,
    ) -> Result<ParseControl> {
        if is_full_line && is_failure_indication(line) {
            ctx.fail(line);
            return Ok(ParseControl::Stop);
        }
        Ok(ParseControl::Continue)
    }

    fn ret_required(&self) -> bool {
        false
    }
}
