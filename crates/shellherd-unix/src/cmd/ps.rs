//! `ps` command grammar.
//!
//! The header line names the columns; each following row becomes one
//! process record keyed by those names, the last column swallowing the
//! remainder of the line (the command line contains spaces).

use serde_json::{Map, Value};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::{convert_field, is_failure_indication, str_param};

/// Grammar of `ps [options]`.
pub struct Ps {
    options: String,
    headers: Option<Vec<String>>,
}

impl Ps {
    /// Creates the grammar from its parameter map (`options`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            options: str_param(params, "options", ""),
            headers: None,
        }
    }

    fn looks_like_header(fields: &[String]) -> bool {
        fields.iter().any(|f| f == "PID")
            && fields
                .iter()
                .all(|f| f.chars().all(|c| c.is_ascii_uppercase() || c == '%'))
    }
}

impl CommandParser for Ps {
    fn build_command_string(&self) -> String {
        if self.options.is_empty() {
            "ps".to_string()
        } else {
            format!("ps {}", self.options)
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

        let fields: Vec<String> = line.split_whitespace().map(ToString::to_string).collect();
        let Some(headers) = &self.headers else {
            if Self::looks_like_header(&fields) {
                self.headers = Some(fields);
            }
            return Ok(ParseControl::Continue);
        };

        if fields.len() < headers.len() {
            return Ok(ParseControl::Continue);
        }

        let mut row = Map::new();
        for (idx, header) in headers.iter().enumerate() {
            let value = if idx + 1 == headers.len() {
                // Last column keeps its internal spaces.
                fields[idx..].join(" ")
            } else {
                fields[idx].clone()
            };
            row.insert(header.clone(), convert_field(&value));
        }

        let processes = ctx
            .ret_mut()
            .entry("processes")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = processes {
            list.push(Value::Object(row));
        }
        Ok(ParseControl::Stop)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(output: &str) -> Map<String, Value> {
        let mut parser = Ps::from_params(json!({"options": "-ef"}).as_object().unwrap());
        let mut ctx = CommandContext::new("ps");
        for line in output.lines() {
            parser.on_new_line(&mut ctx, line, true).unwrap();
        }
        ctx.ret().clone()
    }

    const OUTPUT: &str = "\
UID          PID    PPID  C STIME TTY          TIME CMD
root           1       0  0 09:00 ?        00:00:01 /sbin/init
avahi        870       1  0 09:00 ?        00:00:00 avahi-daemon: running
ute         1817    1698  0 09:15 pts/0    00:00:00 /usr/bin/python3 foo.py --verbose";

    #[test]
    fn test_rows_keyed_by_header() {
        let ret = parse(OUTPUT);
        let processes = ret["processes"].as_array().unwrap();
        assert_eq!(processes.len(), 3);
        assert_eq!(processes[0]["UID"], json!("root"));
        assert_eq!(processes[0]["PID"], json!(1));
    }

    #[test]
    fn test_last_column_keeps_spaces() {
        let ret = parse(OUTPUT);
        let processes = ret["processes"].as_array().unwrap();
        assert_eq!(
            processes[2]["CMD"],
            json!("/usr/bin/python3 foo.py --verbose")
        );
        assert_eq!(processes[2]["PID"], json!(1817));
    }

    #[test]
    fn test_build_command_string() {
        let with = Ps::from_params(json!({"options": "-ef"}).as_object().unwrap());
        assert_eq!(with.build_command_string(), "ps -ef");
        let bare = Ps::from_params(&Map::new());
        assert_eq!(bare.build_command_string(), "ps");
    }
}
