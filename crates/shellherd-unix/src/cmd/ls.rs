//! `ls` command grammar.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::{is_failure_indication, str_param};

#[allow(clippy::unwrap_used)]
static LONG_FORMAT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<PERMISSIONS>[bcdlps-][rwxXsStT-]{9})\s+(?P<HARD_LINKS>\d+)\s+(?P<OWNER>\S+)\s+(?P<GROUP>\S+)\s+(?P<SIZE>\d+)\s+(?P<DATE>\S+\s+\S+\s+\S+)\s+(?P<NAME>\S.*?)(?:\s+->\s+(?P<LINK>\S.*))?$",
    )
    .unwrap()
});

/// Grammar of `ls [options]`.
///
/// Long-format rows become detail records under `"details"`, every name
/// (from either format) lands in `"files"`.
pub struct Ls {
    options: String,
}

impl Ls {
    /// Creates the grammar from its parameter map (`options`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            options: str_param(params, "options", ""),
        }
    }

    fn push_file(ctx: &mut CommandContext, name: &str) {
        let files = ctx
            .ret_mut()
            .entry("files")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = files {
            list.push(Value::from(name));
        }
    }
}

impl CommandParser for Ls {
    fn build_command_string(&self) -> String {
        if self.options.is_empty() {
            "ls".to_string()
        } else {
            format!("ls {}", self.options)
        }
    }

    fn on_new_line(
        &mut self,
        ctx: &mut CommandContext,
        line: &str,
        is_full_line: bool,
    ) -> Result<ParseControl> {
        if !is_full_line || line.trim().is_empty() {
            return Ok(ParseControl::Continue);
        }
        if is_failure_indication(line) {
            ctx.fail(line);
            return Ok(ParseControl::Stop);
        }
        if line.starts_with("total ") {
            return Ok(ParseControl::Stop);
        }

        if let Some(captures) = LONG_FORMAT_LINE.captures(line) {
            let name = captures.name("NAME").map_or("", |m| m.as_str()).to_string();
            let mut record = json!({
                "permissions": captures.name("PERMISSIONS").map_or("", |m| m.as_str()),
                "hard_links": captures.name("HARD_LINKS")
                    .and_then(|m| m.as_str().parse::<i64>().ok()),
                "owner": captures.name("OWNER").map_or("", |m| m.as_str()),
                "group": captures.name("GROUP").map_or("", |m| m.as_str()),
                "size_bytes": captures.name("SIZE")
                    .and_then(|m| m.as_str().parse::<i64>().ok()),
                "date": captures.name("DATE").map_or("", |m| m.as_str()),
            });
            if let Some(link) = captures.name("LINK") {
                record["link"] = json!(link.as_str());
            }
            let details = ctx
                .ret_mut()
                .entry("details")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = details {
                map.insert(name.clone(), record);
            }
            Self::push_file(ctx, &name);
            return Ok(ParseControl::Stop);
        }

        // Plain multi-column listing.
        let names: Vec<&str> = line.split_whitespace().collect();
        for name in names {
            Self::push_file(ctx, name);
        }
        Ok(ParseControl::Stop)
    }
}
