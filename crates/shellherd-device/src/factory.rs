//! Process-wide device factory: named construction, caching, cloning.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use serde_json::Value;

use shellherd_core::{Error, Result, Runner};

use crate::config::{
    CONFIG_ENV_VAR, ConnectionDesc, DeviceDefinition, LoggerConfig, RuntimeConfig, parse_config,
    read_config_file,
};
use crate::device::{DeviceSpec, TextDevice};
use crate::prompts::PromptCheckOptions;
use crate::registry;

/// Request for [`DeviceFactory::get_device`]. Exactly one of `name` and
/// `device_class` must be set.
#[derive(Debug, Clone, Default)]
pub struct DeviceRequest {
    /// Configured device name.
    pub name: Option<String>,
    /// Device class for an unnamed, ad-hoc device.
    pub device_class: Option<String>,
    /// Transport selection; the process default applies when omitted.
    pub connection_desc: Option<ConnectionDesc>,
    /// User overlay for the class's transition defaults.
    pub connection_hops: Option<Value>,
    /// State to drive to on creation.
    pub initial_state: Option<String>,
    /// Open I/O and drive to the initial state right away.
    pub establish_connection: bool,
}

impl DeviceRequest {
    /// Request for a configured device by name, establishing right away.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            establish_connection: true,
            ..Self::default()
        }
    }

    /// Request for an ad-hoc device of a class, establishing right away.
    #[must_use]
    pub fn of_class(class: impl Into<String>) -> Self {
        Self {
            device_class: Some(class.into()),
            establish_connection: true,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
struct StoredParams {
    class_name: String,
    connection_desc: ConnectionDesc,
    connection_hops: Option<Value>,
    initial_state: Option<String>,
    cloned_from: Option<String>,
}

struct FactoryState {
    devices: HashMap<String, TextDevice>,
    params: HashMap<String, StoredParams>,
    config: HashMap<String, DeviceDefinition>,
    logger: Option<LoggerConfig>,
    default_connection: ConnectionDesc,
    /// How many times each public name was created; reused names get a
    /// suffixed internal name.
    incarnations: HashMap<String, u32>,
    anon_seq: u64,
}

static STATE: LazyLock<Mutex<FactoryState>> = LazyLock::new(|| {
    Mutex::new(FactoryState {
        devices: HashMap::new(),
        params: HashMap::new(),
        config: HashMap::new(),
        logger: None,
        default_connection: ConnectionDesc::default_memory(),
        incarnations: HashMap::new(),
        anon_seq: 0,
    })
});

fn state() -> Result<std::sync::MutexGuard<'static, FactoryState>> {
    STATE
        .lock()
        .map_err(|_| Error::WrongUsage("device factory state poisoned".to_string()))
}

/// The process-wide device registry and construction entry point.
#[derive(Debug, Clone, Copy)]
pub struct DeviceFactory;

impl DeviceFactory {
    /// Returns the device for a request, constructing it on first use.
    ///
    /// A cached device is returned as-is (re-established when the
    /// request asks for it); otherwise the device class is resolved from
    /// the registry, the transport built and the device optionally
    /// driven to its initial state.
    ///
    /// # Errors
    ///
    /// [`Error::WrongUsage`] when both or neither of `name` and
    /// `device_class` are given; [`Error::Config`] for unknown names;
    /// construction and establishment failures.
    pub async fn get_device(request: DeviceRequest) -> Result<TextDevice> {
        match (&request.name, &request.device_class) {
            (None, None) => {
                return Err(Error::WrongUsage(
                    "provide either 'name' or 'device_class' (none given)".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(Error::WrongUsage(
                    "use either 'name' or 'device_class' (not both)".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(name) = &request.name
            && let Some(cached) = state()?.devices.get(name).cloned()
        {
            if request.establish_connection && !cached.is_established() {
                cached.establish_connection().await?;
            }
            return Ok(cached);
        }

        let (public_name, device, resolved) = Self::construct(&request)?;
        if resolved.establish_connection {
            device.establish_connection().await?;
        }
        Self::remember(&public_name, &device, &resolved)?;
        Ok(device)
    }

    /// Creates every device of the loaded configuration.
    ///
    /// # Errors
    ///
    /// The first failing construction.
    pub async fn create_all_devices() -> Result<()> {
        let names: Vec<String> = state()?.config.keys().cloned().collect();
        for name in names {
            Self::get_device(DeviceRequest::named(name)).await?;
        }
        Ok(())
    }

    /// Creates (or returns) an independent device copying the source's
    /// configuration onto a fresh connection. A clone remembers its
    /// source; asking for an existing clone name with a different source
    /// fails. Clones of clones are allowed.
    ///
    /// # Errors
    ///
    /// [`Error::WrongUsage`] on a clone-name conflict; construction and
    /// establishment failures.
    pub async fn get_cloned_device(
        source: &str,
        new_name: &str,
        initial_state: Option<String>,
        establish_connection: bool,
    ) -> Result<TextDevice> {
        // Resolve (or create) the source without forcing it online;
        // cloning copies configuration, not connection state.
        let source_device = Self::get_device(DeviceRequest {
            name: Some(source.to_string()),
            establish_connection: false,
            ..DeviceRequest::default()
        })
        .await?;

        {
            let state = state()?;
            if state.devices.contains_key(new_name) {
                let cloned_from = state
                    .params
                    .get(new_name)
                    .and_then(|p| p.cloned_from.clone());
                if cloned_from.as_deref() == Some(source) {
                    return state.devices.get(new_name).cloned().ok_or_else(|| {
                        Error::WrongUsage(format!("device '{new_name}' disappeared"))
                    });
                }
                return Err(Error::WrongUsage(format!(
                    "cannot create device '{new_name}' as clone of '{source}': \
                     name already used{}",
                    cloned_from
                        .map(|from| format!(" as clone of '{from}'"))
                        .unwrap_or_default()
                )));
            }
        }

        let source_params = state()?
            .params
            .get(source)
            .cloned()
            .ok_or_else(|| Error::WrongUsage(format!("device '{source}' has no stored parameters")))?;

        let request = DeviceRequest {
            name: Some(new_name.to_string()),
            device_class: None,
            connection_desc: Some(source_params.connection_desc.clone()),
            connection_hops: source_params.connection_hops.clone(),
            initial_state: initial_state.or_else(|| Some(source_device.current_state())),
            establish_connection,
        };

        let class_name = source_params.class_name.clone();
        let (public_name, device) = Self::construct_with_class(&request, &class_name)?;
        if establish_connection {
            device.establish_connection().await?;
        }
        Self::remember(&public_name, &device, &request)?;
        if let Ok(mut state) = STATE.lock()
            && let Some(params) = state.params.get_mut(new_name)
        {
            params.cloned_from = Some(source.to_string());
        }
        Ok(device)
    }

    /// Device names currently alive in the registry.
    ///
    /// # Errors
    ///
    /// [`Error::WrongUsage`] when the registry lock is poisoned.
    pub fn device_names() -> Result<Vec<String>> {
        let mut names: Vec<String> = state()?.devices.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Devices of one registered class name.
    ///
    /// # Errors
    ///
    /// [`Error::WrongUsage`] when the registry lock is poisoned.
    pub fn devices_by_class(class_name: &str) -> Result<Vec<TextDevice>> {
        Ok(state()?
            .devices
            .values()
            .filter(|device| device.class_name() == class_name)
            .cloned()
            .collect())
    }

    /// Tears a device down and forgets it; the name is reusable
    /// afterwards (the re-created device gets a suffixed internal name).
    ///
    /// # Errors
    ///
    /// [`Error::WrongUsage`] for unknown names.
    pub fn remove(name: &str) -> Result<()> {
        let device = {
            let mut state = state()?;
            state.params.remove(name);
            state.config.remove(name);
            state
                .devices
                .remove(name)
                .ok_or_else(|| Error::WrongUsage(format!("device '{name}' is not known")))?
        };
        device.remove();
        Ok(())
    }

    /// Forgets a device without touching it; wired as the device's
    /// remove handler.
    pub(crate) fn forget(name: &str) {
        if let Ok(mut state) = STATE.lock() {
            state.devices.remove(name);
            state.params.remove(name);
            state.config.remove(name);
        }
    }

    /// Removes every device and clears the loaded configuration. Test
    /// support.
    pub fn clear() {
        let devices: Vec<TextDevice> = STATE
            .lock()
            .map(|mut state| {
                state.params.clear();
                state.config.clear();
                state.logger = None;
                state.default_connection = ConnectionDesc::default_memory();
                state.devices.drain().map(|(_, d)| d).collect()
            })
            .unwrap_or_default();
        for device in devices {
            device.remove();
        }
    }

    /// Loads configuration from YAML text, merging it over what is
    /// already loaded.
    ///
    /// Reload is allowed only when every already-created device keeps an
    /// identical definition; new devices may be added freely.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] on parse failures or incompatible redefinition.
    pub fn load_config_str(yaml: &str) -> Result<()> {
        let parsed = parse_config(yaml)?;
        Self::apply_config(parsed)
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// See [`Self::load_config_str`].
    pub fn load_config_file(path: &str) -> Result<()> {
        let parsed = read_config_file(path)?;
        Self::apply_config(parsed)
    }

    /// Loads configuration from the file named by `SHELLHERD_CONFIG`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the variable is unset, plus the usual load
    /// failures.
    pub fn load_config_from_env() -> Result<()> {
        let path = std::env::var(CONFIG_ENV_VAR).map_err(|_| {
            Error::Config(format!("environment variable {CONFIG_ENV_VAR} is not set"))
        })?;
        Self::load_config_file(&path)
    }

    /// The logging preferences of the loaded configuration.
    #[must_use]
    pub fn logger_config() -> Option<LoggerConfig> {
        STATE.lock().ok().and_then(|state| state.logger.clone())
    }

    /// Sets the transport used when a device definition has no
    /// `CONNECTION_DESC`.
    ///
    /// # Errors
    ///
    /// [`Error::WrongUsage`] when the registry lock is poisoned.
    pub fn set_default_connection(desc: ConnectionDesc) -> Result<()> {
        state()?.default_connection = desc;
        Ok(())
    }

    fn apply_config(parsed: RuntimeConfig) -> Result<()> {
        let mut state = state()?;
        for (name, definition) in &parsed.devices {
            if state.devices.contains_key(name)
                && state.config.get(name) != Some(definition)
            {
                return Err(Error::Config(format!(
                    "incompatible reload: device '{name}' is already created \
                     with a different definition"
                )));
            }
        }
        for (name, definition) in parsed.devices {
            state.config.insert(name, definition);
        }
        if parsed.logger.is_some() {
            state.logger = parsed.logger;
        }
        Ok(())
    }

    /// Resolves a request into a constructed (not yet established)
    /// device, its public name and the request with configuration
    /// defaults filled in.
    fn construct(request: &DeviceRequest) -> Result<(String, TextDevice, DeviceRequest)> {
        let mut request = request.clone();
        let class_name = match (&request.name, &request.device_class) {
            (Some(name), None) => {
                let definition = state()?.config.get(name).cloned();
                match definition {
                    Some(def) => {
                        if request.connection_desc.is_none() {
                            request.connection_desc = def.connection_desc.clone();
                        }
                        if request.connection_hops.is_none() {
                            request.connection_hops = def.connection_hops.clone();
                        }
                        if request.initial_state.is_none() {
                            request.initial_state = def.initial_state.clone();
                        }
                        def.device_class
                    }
                    None => {
                        return Err(Error::Config(format!(
                            "device named '{name}' was not defined inside configuration"
                        )));
                    }
                }
            }
            (None, Some(class)) => class.clone(),
            _ => unreachable!("validated by get_device"),
        };

        let (public_name, device) = Self::construct_with_class(&request, &class_name)?;
        Ok((public_name, device, request))
    }

    fn construct_with_class(
        request: &DeviceRequest,
        class_name: &str,
    ) -> Result<(String, TextDevice)> {
        let class = registry::lookup_device_class(class_name)?;

        let (public_name, internal_name, desc) = {
            let mut state = state()?;
            let public_name = match &request.name {
                Some(name) => name.clone(),
                None => {
                    state.anon_seq += 1;
                    format!("{}-{}", class_name, state.anon_seq)
                }
            };
            let count = state
                .incarnations
                .entry(public_name.clone())
                .and_modify(|c| *c += 1)
                .or_insert(1);
            let internal_name = if *count > 1 {
                format!("{public_name}#{count}")
            } else {
                public_name.clone()
            };
            let desc = request
                .connection_desc
                .clone()
                .unwrap_or_else(|| state.default_connection.clone());
            (public_name, internal_name, desc)
        };

        let io = registry::build_io(&internal_name, &desc)?;
        let device = TextDevice::build(DeviceSpec {
            name: internal_name,
            class,
            io,
            connection_hops: request.connection_hops.clone(),
            initial_state: request.initial_state.clone(),
            runner: Runner::new(),
            prompt_options: PromptCheckOptions::default(),
        })?;

        let forget_name = public_name.clone();
        device.add_remove_handler(Box::new(move |_| Self::forget(&forget_name)));

        tracing::info!(device = %public_name, class = class_name, "device created");
        Ok((public_name, device))
    }

    fn remember(public_name: &str, device: &TextDevice, request: &DeviceRequest) -> Result<()> {
        let mut state = state()?;
        let desc = request
            .connection_desc
            .clone()
            .unwrap_or_else(|| state.default_connection.clone());
        state.devices.insert(public_name.to_string(), device.clone());
        state.params.insert(
            public_name.to_string(),
            StoredParams {
                class_name: device.class_name().to_string(),
                connection_desc: desc,
                connection_hops: request.connection_hops.clone(),
                initial_state: request.initial_state.clone(),
                cloned_from: None,
            },
        );
        Ok(())
    }
}
