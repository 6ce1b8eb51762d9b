//! Detecting a network outage with always-on events.
//!
//! One device pings in the background while two watchers stamp the
//! moment the replies stop and the moment they return. The remote side
//! is played by the in-memory transport so the example runs anywhere:
//!
//! ```text
//! cargo run --example network_outage
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use shellherd_core::{MemoryIo, Runner};
use shellherd_device::classes::{UnixLocal, register_builtin_classes, states};
use shellherd_device::prompts::PromptCheckOptions;
use shellherd_device::registry::IoBundle;
use shellherd_device::{DeviceSpec, TextDevice};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("shellherd_core=info,shellherd_device=info")
        .init();
    shellherd_unix::register_all();
    register_builtin_classes();

    let (io, connection) = MemoryIo::wire("outage-demo");
    let device = TextDevice::build(DeviceSpec {
        name: "outage-demo".to_string(),
        class: Arc::new(UnixLocal),
        io: IoBundle {
            io: io.clone(),
            connection,
        },
        connection_hops: None,
        initial_state: None,
        runner: Runner::new(),
        prompt_options: PromptCheckOptions::default(),
    })?;
    device.goto_state(states::UNIX_LOCAL, None).await?;

    let outage = device.get_event("ping_no_response", json!({"till_occurs_times": 1}))?;
    outage.start(Some(Duration::from_secs(60))).await?;

    let ping = device.get_cmd("ping", json!({"options": "-O", "destination": "localhost"}))?;
    ping.start(Some(Duration::from_secs(60))).await?;

    // The "network": a good reply, then silence.
    io.inject("64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=0.040 ms\n");
    io.inject("no answer yet for icmp_seq=2\n");

    outage.await_done(Some(Duration::from_secs(5))).await?;
    let down = outage.last_occurrence().and_then(|o| o["time"].as_str().map(String::from));
    println!("outage seen at   {}", down.unwrap_or_default());

    // Watch for the recovery only once the outage is a fact.
    let recovery = device.get_event("ping_response", json!({"till_occurs_times": 1}))?;
    recovery.start(Some(Duration::from_secs(60))).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    io.inject("64 bytes from 127.0.0.1: icmp_seq=3 ttl=64 time=0.044 ms\n");

    recovery.await_done(Some(Duration::from_secs(5))).await?;
    let up = recovery.last_occurrence().and_then(|o| o["time"].as_str().map(String::from));
    println!("recovery seen at {}", up.unwrap_or_default());

    ping.cancel();
    Ok(())
}
