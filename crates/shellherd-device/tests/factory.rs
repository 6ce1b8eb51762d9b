//! Factory, configuration and cloning tests.
//!
//! The factory registry is process-wide; every test uses its own device
//! names so tests can run concurrently.

#![allow(clippy::unwrap_used)]

use shellherd_core::Error;
use shellherd_device::classes::{register_builtin_classes, states};
use shellherd_device::{DeviceFactory, DeviceRequest};

fn config_for(name: &str, class: &str) -> String {
    format!(
        r#"
DEVICES:
  {name}:
    DEVICE_CLASS: {class}
    CONNECTION_DESC:
      io_type: memory
"#
    )
}

fn remote_config(name: &str) -> String {
    format!(
        r#"
DEVICES:
  {name}:
    DEVICE_CLASS: UnixRemote
    CONNECTION_DESC:
      io_type: memory
    CONNECTION_HOPS:
      UNIX_LOCAL:
        UNIX_REMOTE:
          command_params:
            host: 10.0.0.7
            login: ute
            password: ute-pass
            expected_prompt: "^lab7#"
    INITIAL_STATE: UNIX_LOCAL
"#
    )
}

#[tokio::test]
async fn test_get_device_requires_name_xor_class() {
    register_builtin_classes();

    let neither = DeviceFactory::get_device(DeviceRequest::default()).await;
    assert!(matches!(neither, Err(Error::WrongUsage(_))));

    let both = DeviceFactory::get_device(DeviceRequest {
        name: Some("x".to_string()),
        device_class: Some("UnixLocal".to_string()),
        ..DeviceRequest::default()
    })
    .await;
    assert!(matches!(both, Err(Error::WrongUsage(_))));
}

#[tokio::test]
async fn test_unknown_named_device_is_config_error() {
    register_builtin_classes();
    let out = DeviceFactory::get_device(DeviceRequest::named("never-defined")).await;
    assert!(matches!(out, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_named_device_is_cached() {
    register_builtin_classes();
    DeviceFactory::load_config_str(&config_for("fac-cache", "UnixLocal")).unwrap();

    let first = DeviceFactory::get_device(DeviceRequest::named("fac-cache")).await.unwrap();
    assert_eq!(first.current_state(), states::UNIX_LOCAL);

    let second = DeviceFactory::get_device(DeviceRequest::named("fac-cache")).await.unwrap();
    assert_eq!(second.name(), first.name());
    assert!(DeviceFactory::device_names().unwrap().contains(&"fac-cache".to_string()));
}

#[tokio::test]
async fn test_removed_name_reusable_with_suffixed_internal_name() {
    register_builtin_classes();
    DeviceFactory::load_config_str(&config_for("fac-reuse", "UnixLocal")).unwrap();

    let first = DeviceFactory::get_device(DeviceRequest::named("fac-reuse")).await.unwrap();
    assert_eq!(first.name(), "fac-reuse");

    DeviceFactory::remove("fac-reuse").unwrap();
    assert!(!DeviceFactory::device_names().unwrap().contains(&"fac-reuse".to_string()));

    DeviceFactory::load_config_str(&config_for("fac-reuse", "UnixLocal")).unwrap();
    let second = DeviceFactory::get_device(DeviceRequest::named("fac-reuse")).await.unwrap();
    // Public name is reused; the internal name disambiguates.
    assert_eq!(second.name(), "fac-reuse#2");
}

#[tokio::test]
async fn test_clone_has_identical_resolved_configuration() {
    register_builtin_classes();
    DeviceFactory::load_config_str(&remote_config("fac-clone-src")).unwrap();

    let source = DeviceFactory::get_device(DeviceRequest {
        name: Some("fac-clone-src".to_string()),
        establish_connection: false,
        ..DeviceRequest::default()
    })
    .await
    .unwrap();

    let clone =
        DeviceFactory::get_cloned_device("fac-clone-src", "fac-clone-copy", None, false)
            .await
            .unwrap();

    for (from, to) in [
        (states::UNIX_LOCAL, states::UNIX_REMOTE),
        (states::UNIX_REMOTE, states::UNIX_LOCAL),
        (states::UNIX_REMOTE, states::UNIX_REMOTE_ROOT),
    ] {
        let original = source.resolved_transition(from, to).unwrap();
        let copied = clone.resolved_transition(from, to).unwrap();
        assert_eq!(original, copied, "transition {from} -> {to} differs");
    }
    for state in [states::UNIX_LOCAL, states::UNIX_REMOTE] {
        assert_eq!(source.state_prompt(state), clone.state_prompt(state));
    }

    // Fresh connection, not a shared one.
    assert!(!std::ptr::eq(
        std::sync::Arc::as_ptr(source.connection()),
        std::sync::Arc::as_ptr(clone.connection()),
    ));
}

#[tokio::test]
async fn test_clone_of_clone_and_name_conflicts() {
    register_builtin_classes();
    DeviceFactory::load_config_str(&remote_config("fac-reclone-src")).unwrap();

    let _source = DeviceFactory::get_device(DeviceRequest {
        name: Some("fac-reclone-src".to_string()),
        establish_connection: false,
        ..DeviceRequest::default()
    })
    .await
    .unwrap();

    let _first = DeviceFactory::get_cloned_device("fac-reclone-src", "fac-reclone-a", None, false)
        .await
        .unwrap();
    let _second = DeviceFactory::get_cloned_device("fac-reclone-a", "fac-reclone-b", None, false)
        .await
        .unwrap();

    // Same clone request again returns the cached clone.
    let again = DeviceFactory::get_cloned_device("fac-reclone-src", "fac-reclone-a", None, false)
        .await
        .unwrap();
    assert_eq!(again.name(), "fac-reclone-a");

    // The name is taken by a clone of a different source.
    let conflict =
        DeviceFactory::get_cloned_device("fac-reclone-b", "fac-reclone-a", None, false).await;
    assert!(matches!(conflict, Err(Error::WrongUsage(_))));
}

#[tokio::test]
async fn test_incompatible_reload_rejected() {
    register_builtin_classes();
    DeviceFactory::load_config_str(&config_for("fac-reload", "UnixLocal")).unwrap();
    let _device = DeviceFactory::get_device(DeviceRequest::named("fac-reload")).await.unwrap();

    // Same definition again: fine.
    DeviceFactory::load_config_str(&config_for("fac-reload", "UnixLocal")).unwrap();

    // Redefining a created device differently: rejected.
    let out = DeviceFactory::load_config_str(&remote_config("fac-reload"));
    assert!(matches!(out, Err(Error::Config(_))));

    // New devices may be added freely.
    DeviceFactory::load_config_str(&config_for("fac-reload-extra", "UnixLocal")).unwrap();
}

#[tokio::test]
async fn test_devices_by_class() {
    register_builtin_classes();
    DeviceFactory::load_config_str(&config_for("fac-byclass", "UnixLocal")).unwrap();
    let _device = DeviceFactory::get_device(DeviceRequest::named("fac-byclass")).await.unwrap();

    let locals = DeviceFactory::devices_by_class("UnixLocal").unwrap();
    assert!(locals.iter().any(|d| d.name().starts_with("fac-byclass")));
}
