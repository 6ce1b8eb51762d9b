//! String-keyed registries for parsers, events, device classes and I/O
//! types.
//!
//! The catalogue is discovered by name at runtime but populated by
//! explicit registration at program start — there is no reflective class
//! loading. Parser crates call the `register_*` functions once; devices
//! look names up through their per-state namespace lists.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use serde_json::{Map, Value};

use shellherd_core::connection::{Io, ObservableConnection};
use shellherd_core::observer::{CommandParser, MatchMode};
use shellherd_core::{Error, MemoryIo, Result};

use crate::config::ConnectionDesc;
use crate::sm::DeviceClass;

/// Builds a command grammar from its parameter map.
pub type CommandFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn CommandParser>> + Send + Sync>;

/// Event shape produced by an event factory; the device wraps it into a
/// running `Event` bound to its connection.
#[derive(Debug, Clone)]
pub struct EventSpec {
    /// Detect patterns, in declaration order.
    pub patterns: Vec<String>,
    /// Match mode.
    pub mode: MatchMode,
    /// Occurrence cycles to collect; -1 keeps the event open.
    pub occurrences: i64,
    /// Skip partial lines.
    pub full_lines_only: bool,
}

/// Builds an event specification from its parameter map.
pub type EventFactory = Arc<dyn Fn(&Map<String, Value>) -> Result<EventSpec> + Send + Sync>;

/// Transport plus the connection it feeds, as handed to a new device.
pub struct IoBundle {
    /// The transport.
    pub io: Arc<dyn Io>,
    /// The connection the transport publishes into.
    pub connection: Arc<ObservableConnection>,
}

/// Builds a transport for a connection description.
pub type IoFactory = Arc<dyn Fn(&str, &ConnectionDesc) -> Result<IoBundle> + Send + Sync>;

static COMMANDS: LazyLock<RwLock<HashMap<(String, String), CommandFactory>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
static EVENTS: LazyLock<RwLock<HashMap<(String, String), EventFactory>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
static CLASSES: LazyLock<RwLock<HashMap<String, Arc<dyn DeviceClass>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
static IO_TYPES: LazyLock<RwLock<HashMap<String, IoFactory>>> = LazyLock::new(|| {
    let mut map: HashMap<String, IoFactory> = HashMap::new();
    map.insert(
        "memory".to_string(),
        Arc::new(|name, _desc| {
            let (io, connection) = MemoryIo::wire(name);
            Ok(IoBundle { io, connection })
        }),
    );
    RwLock::new(map)
});

/// Registers a command grammar under `namespace/name`. Re-registering
/// replaces the previous factory.
pub fn register_command(namespace: &str, name: &str, factory: CommandFactory) {
    if let Ok(mut commands) = COMMANDS.write() {
        commands.insert((namespace.to_string(), name.to_string()), factory);
    }
}

/// Registers an event under `namespace/name`.
pub fn register_event(namespace: &str, name: &str, factory: EventFactory) {
    if let Ok(mut events) = EVENTS.write() {
        events.insert((namespace.to_string(), name.to_string()), factory);
    }
}

/// Looks a command up through an ordered namespace list.
#[must_use]
pub fn lookup_command(namespaces: &[&str], name: &str) -> Option<CommandFactory> {
    let commands = COMMANDS.read().ok()?;
    namespaces
        .iter()
        .find_map(|ns| commands.get(&((*ns).to_string(), name.to_string())).cloned())
}

/// Looks an event up through an ordered namespace list.
#[must_use]
pub fn lookup_event(namespaces: &[&str], name: &str) -> Option<EventFactory> {
    let events = EVENTS.read().ok()?;
    namespaces
        .iter()
        .find_map(|ns| events.get(&((*ns).to_string(), name.to_string())).cloned())
}

/// Registers a device class under its name.
pub fn register_device_class(class: Arc<dyn DeviceClass>) {
    if let Ok(mut classes) = CLASSES.write() {
        classes.insert(class.name().to_string(), class);
    }
}

/// Resolves a device class by registry name.
///
/// # Errors
///
/// [`Error::WrongUsage`] for an unknown class name.
pub fn lookup_device_class(name: &str) -> Result<Arc<dyn DeviceClass>> {
    CLASSES
        .read()
        .ok()
        .and_then(|classes| classes.get(name).cloned())
        .ok_or_else(|| Error::WrongUsage(format!("unknown device class '{name}'")))
}

/// Registers a transport builder for an `io_type` string.
pub fn register_io_type(io_type: &str, factory: IoFactory) {
    if let Ok(mut io_types) = IO_TYPES.write() {
        io_types.insert(io_type.to_string(), factory);
    }
}

/// Builds the transport for a connection description.
///
/// # Errors
///
/// [`Error::WrongUsage`] for an unknown `io_type`.
pub fn build_io(name: &str, desc: &ConnectionDesc) -> Result<IoBundle> {
    let factory = IO_TYPES
        .read()
        .ok()
        .and_then(|io_types| io_types.get(&desc.io_type).cloned())
        .ok_or_else(|| {
            Error::WrongUsage(format!("unknown io_type '{}' for connection", desc.io_type))
        })?;
    factory(name, desc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use shellherd_core::observer::{CommandContext, ParseControl};

    struct NoopGrammar;
    impl CommandParser for NoopGrammar {
        fn build_command_string(&self) -> String {
            "true".to_string()
        }
        fn on_new_line(
            &mut self,
            _ctx: &mut CommandContext,
            _line: &str,
            _is_full_line: bool,
        ) -> Result<ParseControl> {
            Ok(ParseControl::Continue)
        }
    }

    #[test]
    fn test_command_lookup_respects_namespace_order() {
        register_command("ns-a", "probe", Arc::new(|_| Ok(Box::new(NoopGrammar))));
        register_command("ns-b", "probe", Arc::new(|_| Ok(Box::new(NoopGrammar))));

        assert!(lookup_command(&["ns-a", "ns-b"], "probe").is_some());
        assert!(lookup_command(&["ns-c"], "probe").is_none());
        assert!(lookup_command(&["ns-b"], "missing").is_none());
    }

    #[test]
    fn test_event_lookup() {
        register_event(
            "ns-a",
            "wait4",
            Arc::new(|params| {
                let patterns = params
                    .get("detect_patterns")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(EventSpec {
                    patterns,
                    mode: MatchMode::Any,
                    occurrences: -1,
                    full_lines_only: false,
                })
            }),
        );

        let factory = lookup_event(&["ns-a"], "wait4").unwrap();
        let spec = factory(
            json!({"detect_patterns": ["a", "b"]})
                .as_object()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(spec.patterns, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_memory_io_type_is_builtin() {
        let desc = ConnectionDesc {
            io_type: "memory".to_string(),
            variant: None,
            host: None,
            login: None,
            password: None,
        };
        let bundle = build_io("registry-test", &desc).unwrap();
        assert_eq!(bundle.connection.name(), "registry-test");
    }

    #[test]
    fn test_unknown_io_type_rejected() {
        let desc = ConnectionDesc {
            io_type: "carrier-pigeon".to_string(),
            variant: None,
            host: None,
            login: None,
            password: None,
        };
        assert!(build_io("x", &desc).is_err());
    }
}
