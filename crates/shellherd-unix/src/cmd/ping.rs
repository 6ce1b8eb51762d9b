//! `ping` command grammar.
//!
//! Ping keeps running until cancelled or timed out; the grammar collects
//! round-trip times and loss statistics on the way so whatever was seen
//! is available once the command ends.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::{opt_param, str_param};

#[allow(clippy::unwrap_used)]
static REPLY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time[=<](?P<TIME>[\d.]+)\s*ms").unwrap()
});

#[allow(clippy::unwrap_used)]
static STATS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<SENT>\d+) packets transmitted, (?P<RECEIVED>\d+) (?:packets )?received")
        .unwrap()
});

/// Grammar of `ping [options] <destination>`.
pub struct Ping {
    destination: String,
    options: Option<String>,
}

impl Ping {
    /// Creates the grammar from its parameter map (`destination`,
    /// `options`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            destination: str_param(params, "destination", "localhost"),
            options: opt_param(params, "options"),
        }
    }
}

impl CommandParser for Ping {
    fn build_command_string(&self) -> String {
        match &self.options {
            Some(options) => format!("ping {} {}", options, self.destination),
            None => format!("ping {}", self.destination),
        }
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
        if let Some(captures) = REPLY_LINE.captures(line) {
            let time: f64 = captures
                .name("TIME")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or_default();
            let times = ctx
                .ret_mut()
                .entry("times_ms")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = times {
                list.push(Value::from(time));
            }
            return Ok(ParseControl::Stop);
        }
        if let Some(captures) = STATS_LINE.captures(line) {
            let sent = captures
                .name("SENT")
                .and_then(|m| m.as_str().parse::<i64>().ok());
            let received = captures
                .name("RECEIVED")
                .and_then(|m| m.as_str().parse::<i64>().ok());
            ctx.insert("packets_transmitted", Value::from(sent));
            ctx.insert("packets_received", Value::from(received));
            return Ok(ParseControl::Stop);
        }
        Ok(ParseControl::Continue)
    }

    fn ret_required(&self) -> bool {
        false
    }
}
