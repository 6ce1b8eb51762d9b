//! # shellherd-device
//!
//! Devices for the shellherd runtime: the per-device state machine with
//! multi-hop routing, always-on prompt tracking, the process-wide device
//! factory and the YAML configuration that wires it all together.
//!
//! ## The model
//!
//! A [`TextDevice`] has two responsibilities:
//!
//! - **command factory** — hand out command/event observers valid for
//!   its current state ([`TextDevice::get_cmd`],
//!   [`TextDevice::get_event`]);
//! - **state machine** — control which state the device is in
//!   ([`TextDevice::goto_state`]): each hop of a transition runs one
//!   configured command and a state's arrival is confirmed by its prompt.
//!
//! Device classes ([`classes::UnixLocal`], [`classes::UnixRemote`])
//! describe the static shape — default transitions, hop routing, prompt
//! derivation, catalogue namespaces — while user configuration overlays
//! hosts, credentials and prompts.
//!
//! ## Quick start
//!
//! ```ignore
//! use shellherd_device::{DeviceFactory, DeviceRequest};
//!
//! # async fn demo() -> shellherd_core::Result<()> {
//! shellherd_device::classes::register_builtin_classes();
//! DeviceFactory::load_config_file("devices.yml")?;
//!
//! let lab = DeviceFactory::get_device(DeviceRequest::named("lab1")).await?;
//! lab.goto_state("UNIX_REMOTE", None).await?;
//! let files = lab.run_cmd("ls", serde_json::json!({"options": "-la"})).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod classes;
pub mod config;
mod device;
mod factory;
mod merge;
pub mod prompts;
pub mod registry;
pub mod sm;

pub use config::{ConnectionDesc, DeviceDefinition, LoggerConfig, RuntimeConfig};
pub use device::{DeviceSpec, StateTransfer, TextDevice};
pub use factory::{DeviceFactory, DeviceRequest};
pub use merge::merge_values;
pub use prompts::{PromptCheckOptions, PromptCollision};
pub use registry::{
    CommandFactory, EventFactory, EventSpec, IoBundle, register_command, register_event,
    register_io_type,
};
pub use sm::{DeviceClass, NOT_CONNECTED, TransitionAction, TransitionRule};
