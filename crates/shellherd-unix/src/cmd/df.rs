//! `df` command grammar.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use shellherd_core::observer::{CommandContext, CommandParser, ParseControl};
use shellherd_core::Result;

use super::is_failure_indication;

#[allow(clippy::unwrap_used)]
static FILESYSTEM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<FS>\S+)\s+(?P<TYPE>\S+)\s+(?P<SIZE>\d+)M\s+(?P<USED>\d+)M\s+(?P<AVAIL>\d+)M\s+(?P<USE>\d+)%\s+(?P<MOUNT>\S+)$",
    )
    .unwrap()
});

/// Grammar of `df -BM -T -P`: each filesystem row is indexed twice, by
/// filesystem and by mountpoint.
#[derive(Debug, Default)]
pub struct Df;

impl Df {
    /// Creates the grammar; the option set is fixed so rows parse
    /// uniformly.
    #[must_use]
    pub fn from_params(_params: &Map<String, Value>) -> Self {
        Self
    }
}

impl CommandParser for Df {
    fn build_command_string(&self) -> String {
        "df -BM -T -P".to_string()
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
        let Some(captures) = FILESYSTEM_LINE.captures(line) else {
            return Ok(ParseControl::Continue);
        };

        let field = |name: &str| captures.name(name).map_or("", |m| m.as_str()).to_string();
        let number = |name: &str| {
            captures
                .name(name)
                .and_then(|m| m.as_str().parse::<i64>().ok())
        };
        let record = json!({
            "filesystem": field("FS"),
            "type": field("TYPE"),
            "size_mb": number("SIZE"),
            "used_mb": number("USED"),
            "avail_mb": number("AVAIL"),
            "use_percent": number("USE"),
            "mounted_on": field("MOUNT"),
        });

        for (index, key) in [("by_fs", "FS"), ("by_mountpoint", "MOUNT")] {
            let bucket = ctx
                .ret_mut()
                .entry(index)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = bucket {
                map.insert(field(key), record.clone());
            }
        }
        Ok(ParseControl::Stop)
    }
}
