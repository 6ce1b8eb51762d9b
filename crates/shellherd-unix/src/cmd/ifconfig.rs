//! `ifconfig` command grammar.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::{is_failure_indication, str_param};

#[allow(clippy::unwrap_used)]
static INTERFACE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<NAME>\S+?):?\s+(?:flags=|Link encap)").unwrap());

#[allow(clippy::unwrap_used)]
static INET_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"inet\s+(?:addr:)?(?P<ADDR>\d+\.\d+\.\d+\.\d+)").unwrap()
});

/// Grammar of `ifconfig [options]`.
///
/// Reconfiguration calls (`ifconfig lo down`) are silent; listing calls
/// produce one record per interface.
pub struct Ifconfig {
    options: String,
    current_interface: Option<String>,
}

impl Ifconfig {
    /// Creates the grammar from its parameter map (`options`).
    #[must_use]
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            options: str_param(params, "options", ""),
            current_interface: None,
        }
    }
}

impl CommandParser for Ifconfig {
    fn build_command_string(&self) -> String {
        if self.options.is_empty() {
            "ifconfig".to_string()
        } else {
            format!("ifconfig {}", self.options)
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
        if is_failure_indication(line) {
            ctx.fail(line);
            return Ok(ParseControl::Stop);
        }
        if let Some(captures) = INTERFACE_LINE.captures(line) {
            let name = captures.name("NAME").map_or("", |m| m.as_str()).to_string();
            ctx.ret_mut()
                .entry("interfaces")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(Value::Object(map)) = ctx.ret_mut().get_mut("interfaces") {
                map.insert(name.clone(), json!({}));
            }
            self.current_interface = Some(name);
            return Ok(ParseControl::Stop);
        }
        if let (Some(interface), Some(captures)) =
            (&self.current_interface, INET_LINE.captures(line))
        {
            let addr = captures.name("ADDR").map_or("", |m| m.as_str());
            if let Some(Value::Object(map)) = ctx.ret_mut().get_mut("interfaces")
                && let Some(Value::Object(record)) = map.get_mut(interface)
            {
                record.insert("inet".to_string(), json!(addr));
            }
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

    #[test]
    fn test_build_command_string() {
        let down = Ifconfig::from_params(json!({"options": "lo down"}).as_object().unwrap());
        assert_eq!(down.build_command_string(), "ifconfig lo down");
    }

    #[test]
    fn test_interfaces_parsed() {
        let mut parser = Ifconfig::from_params(&Map::new());
        let mut ctx = CommandContext::new("ifconfig");
        parser
            .on_new_line(&mut ctx, "lo: flags=73<UP,LOOPBACK,RUNNING>  mtu 65536", true)
            .unwrap();
        parser
            .on_new_line(&mut ctx, "        inet 127.0.0.1  netmask 255.0.0.0", true)
            .unwrap();
        assert_eq!(ctx.ret()["interfaces"]["lo"]["inet"], json!("127.0.0.1"));
    }
}
