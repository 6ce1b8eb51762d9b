//! YAML / value configuration of named devices.
//!
//! Top-level layout:
//!
//! ```yaml
//! LOGGER:
//!   PATH: /tmp/logs
//!   DEBUG_LEVEL: debug
//! DEVICES:
//!   lab1:
//!     DEVICE_CLASS: UnixRemote
//!     CONNECTION_DESC: { io_type: memory }
//!     CONNECTION_HOPS:
//!       UNIX_LOCAL:
//!         UNIX_REMOTE:
//!           execute_command: ssh
//!           command_params:
//!             host: 10.0.0.2
//!             login: ute
//!             password: ute
//!             expected_prompt: "remote#"
//!     INITIAL_STATE: UNIX_REMOTE
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use shellherd_core::{Error, Result};

/// Environment variable consulted by [`load_config_from_env`]
/// (re-exported through the factory).
pub const CONFIG_ENV_VAR: &str = "SHELLHERD_CONFIG";

/// Whole configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Logging preferences; applied by binaries, not by the library.
    #[serde(rename = "LOGGER", default)]
    pub logger: Option<LoggerConfig>,
    /// Named device definitions.
    #[serde(rename = "DEVICES", default)]
    pub devices: HashMap<String, DeviceDefinition>,
}

/// Logging preferences from the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LoggerConfig {
    /// Directory for log files.
    #[serde(rename = "PATH", default)]
    pub path: Option<String>,
    /// Also write the raw byte stream.
    #[serde(rename = "RAW_LOG", default)]
    pub raw_log: bool,
    /// Timestamp format for log lines.
    #[serde(rename = "DATE_FORMAT", default)]
    pub date_format: Option<String>,
    /// Log level name, e.g. `debug`.
    #[serde(rename = "DEBUG_LEVEL", default)]
    pub debug_level: Option<String>,
}

impl LoggerConfig {
    /// Tracing filter directive derived from `DEBUG_LEVEL`; feed it to a
    /// `tracing-subscriber` env filter.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        self.debug_level
            .as_deref()
            .map_or_else(|| "info".to_string(), str::to_lowercase)
    }
}

/// One named device.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeviceDefinition {
    /// Registered device-class name.
    #[serde(rename = "DEVICE_CLASS")]
    pub device_class: String,
    /// Transport selection; the process default applies when omitted.
    #[serde(rename = "CONNECTION_DESC", default)]
    pub connection_desc: Option<ConnectionDesc>,
    /// User overlay for the class's transition defaults.
    #[serde(rename = "CONNECTION_HOPS", default)]
    pub connection_hops: Option<Value>,
    /// State to drive to on creation.
    #[serde(rename = "INITIAL_STATE", default)]
    pub initial_state: Option<String>,
    /// Passed through to the device constructor.
    #[serde(rename = "ADDITIONAL_PARAMS", default)]
    pub additional_params: Map<String, Value>,
}

/// Transport selection for one device.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConnectionDesc {
    /// Transport kind, e.g. `memory`.
    pub io_type: String,
    /// Implementation variant of the transport.
    #[serde(default)]
    pub variant: Option<String>,
    /// Remote host, for network transports.
    #[serde(default)]
    pub host: Option<String>,
    /// Login name, for network transports.
    #[serde(default)]
    pub login: Option<String>,
    /// Password, for network transports.
    #[serde(default)]
    pub password: Option<String>,
}

impl ConnectionDesc {
    /// The process-wide default: the in-memory transport.
    #[must_use]
    pub fn default_memory() -> Self {
        Self {
            io_type: "memory".to_string(),
            variant: None,
            host: None,
            login: None,
            password: None,
        }
    }
}

/// Parses a configuration document from YAML text.
///
/// # Errors
///
/// [`Error::Config`] when the document does not match the layout.
pub fn parse_config(yaml: &str) -> Result<RuntimeConfig> {
    serde_yaml::from_str(yaml).map_err(|err| Error::Config(err.to_string()))
}

/// Reads and parses a configuration file.
///
/// # Errors
///
/// [`Error::Config`] on read or parse failure.
pub fn read_config_file(path: &str) -> Result<RuntimeConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("cannot read '{path}': {err}")))?;
    parse_config(&text)
}
