//! `exit` command grammar.

use serde_json::{Map, Value};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

/// Grammar of `exit`: leaves the current shell; done when the previous
/// shell's prompt (the envelope's expected prompt) is back.
#[derive(Debug, Default)]
pub struct Exit;

impl Exit {
    /// Creates the grammar; `exit` takes no parameters.
    #[must_use]
    pub fn from_params(_params: &Map<String, Value>) -> Self {
        Self
    }
}

impl CommandParser for Exit {
    fn build_command_string(&self) -> String {
        "exit".to_string()
    }

    fn on_new_line(
        &mut self,
        _ctx: &mut CommandContext,
        _line: &str,
        _is_full_line: bool,
    ) -> Result<ParseControl> {
        Ok(ParseControl::Continue)
    }

    fn ret_required(&self) -> bool {
        false
    }
}
