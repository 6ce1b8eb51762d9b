//! End-to-end scenarios: devices driving scripted shells through the
//! full stack — factory-style construction, state machine, command and
//! event observers, prompt tracking.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serde_json::{Value, json};

use shellherd_core::testing::assert_no_unraised_failures;
use shellherd_core::{MemoryIo, Runner};
use shellherd_device::registry::IoBundle;
use shellherd_device::classes::{UnixLocal, UnixRemote, register_builtin_classes, states};
use shellherd_device::prompts::PromptCheckOptions;
use shellherd_device::{DeviceSpec, TextDevice};

const LOCAL_PROMPT_LINE: &str = "herd_bash# ";

fn init() {
    shellherd_unix::register_all();
    register_builtin_classes();
    let _ = tracing_subscriber::fmt()
        .with_env_filter("shellherd_core=debug,shellherd_device=debug")
        .try_init();
}

fn local_device(name: &str) -> (TextDevice, Arc<MemoryIo>) {
    init();
    let (io, connection) = MemoryIo::wire(name);
    let device = TextDevice::build(DeviceSpec {
        name: name.to_string(),
        class: Arc::new(UnixLocal),
        io: IoBundle {
            io: io.clone(),
            connection,
        },
        connection_hops: None,
        initial_state: None,
        runner: Runner::new(),
        prompt_options: PromptCheckOptions::default(),
    })
    .unwrap();
    (device, io)
}

fn remote_device(name: &str) -> (TextDevice, Arc<MemoryIo>) {
    init();
    let (io, connection) = MemoryIo::wire(name);
    io.add_response(
        "TERM=xterm-mono ssh -l ute 10.0.0.2",
        "ute@10.0.0.2's password:",
    );
    io.add_response("ute-pass", "Last login: Thu Nov 23 10:38:16\nremote# ");
    io.add_response("exit", &format!("logout\n{LOCAL_PROMPT_LINE}"));

    let hops = json!({
        "UNIX_LOCAL": {
            "UNIX_REMOTE": {
                "command_params": {
                    "host": "10.0.0.2",
                    "login": "ute",
                    "password": "ute-pass",
                    "expected_prompt": "^remote#"
                }
            }
        }
    });
    let device = TextDevice::build(DeviceSpec {
        name: name.to_string(),
        class: Arc::new(UnixRemote),
        io: IoBundle {
            io: io.clone(),
            connection,
        },
        connection_hops: Some(hops),
        initial_state: None,
        runner: Runner::new(),
        prompt_options: PromptCheckOptions::default(),
    })
    .unwrap();
    (device, io)
}

const PS_OUTPUT: &str = "\
UID          PID    PPID  C STIME TTY          TIME CMD
root           1       0  0 09:00 ?        00:00:01 /sbin/init
ute         1698    1100  0 09:14 pts/0    00:00:00 -bash
ute         1817    1698  0 09:15 pts/0    00:00:00 /usr/bin/python foo.py
herd_bash# ";

#[tokio::test]
async fn test_simple_command_foreground() {
    let (device, io) = local_device("scenario-ps");
    device.goto_state(states::UNIX_LOCAL, None).await.unwrap();
    io.add_response("ps -ef", PS_OUTPUT);

    let ps = device.get_cmd("ps", json!({"options": "-ef"})).unwrap();
    let result = ps.run(Some(Duration::from_secs(5))).await.unwrap();

    let processes = result["processes"].as_array().unwrap();
    let python = processes
        .iter()
        .find(|row| row["PID"] == json!(1817))
        .expect("pid 1817 missing from ps output");
    assert!(
        python["CMD"].as_str().unwrap().contains("python"),
        "unexpected command line: {python}"
    );

    assert_no_unraised_failures();
}

#[tokio::test]
async fn test_background_and_foreground_on_one_device() {
    let (device, io) = local_device("scenario-bg");
    device.goto_state(states::UNIX_LOCAL, None).await.unwrap();
    io.add_response("ps -ef", PS_OUTPUT);
    io.add_response("whoami", &format!("ute\n{LOCAL_PROMPT_LINE}"));

    let ps = device.get_cmd("ps", json!({"options": "-ef"})).unwrap();
    ps.start(Some(Duration::from_secs(5))).await.unwrap();

    let whoami = device.get_cmd("whoami", json!({})).unwrap();
    let user = whoami.run(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(user["USER"], json!("ute"));

    // Completion order is not guaranteed; both must finish in time.
    let ps_result = ps.await_done(Some(Duration::from_secs(5))).await.unwrap();
    assert!(!ps_result["processes"].as_array().unwrap().is_empty());

    assert_no_unraised_failures();
}

#[tokio::test]
async fn test_state_machine_hop_to_remote_and_back() {
    let (device, io) = remote_device("scenario-sm");

    device
        .goto_state(states::UNIX_REMOTE, Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(device.current_state(), states::UNIX_REMOTE);

    // The remote prompt is active now: a remote ls completes against it.
    io.add_response("ls", "bin  docs  run.sh\nremote# ");
    let ls = device.get_cmd("ls", json!({})).unwrap();
    let listing = ls.run(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(listing["files"], json!(["bin", "docs", "run.sh"]));

    device
        .goto_state(states::UNIX_LOCAL, Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(device.current_state(), states::UNIX_LOCAL);
    assert_eq!(
        device.state_prompt(states::UNIX_LOCAL).as_deref(),
        Some("^herd_bash#")
    );

    assert_no_unraised_failures();
}

#[tokio::test]
async fn test_wait4_all_mode_fires_once_with_ordered_records() {
    let (device, io) = local_device("scenario-wait4");
    device.goto_state(states::UNIX_LOCAL, None).await.unwrap();

    let wait4 = device
        .get_event(
            "wait4",
            json!({
                "detect_patterns": [r"number (\d5)", r"(?P<LN>Line\d+)\s+.*\s+number 20"],
                "match": "all",
                "till_occurs_times": 1
            }),
        )
        .unwrap();
    wait4.start(Some(Duration::from_secs(5))).await.unwrap();

    io.inject("Line1 contains message number 20\nLine2 contains message number 15\n");
    let result = wait4.await_done(Some(Duration::from_secs(5))).await.unwrap();

    let fired = result.as_array().unwrap();
    assert_eq!(fired.len(), 1, "all-mode must fire exactly once");
    let records = fired[0].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["named_groups"]["LN"], json!("Line1"));

    assert_no_unraised_failures();
}

#[tokio::test]
async fn test_network_outage_detection() {
    let (device_a, io_a) = local_device("scenario-outage-a");
    device_a.goto_state(states::UNIX_LOCAL, None).await.unwrap();
    let (device_b, io_b) = local_device("scenario-outage-b");
    device_b.goto_state(states::UNIX_LOCAL, None).await.unwrap();

    // Always-on watchers on device A.
    let no_response = device_a
        .get_event("ping_no_response", json!({"till_occurs_times": 1}))
        .unwrap();
    let response = device_a
        .get_event("ping_response", json!({"till_occurs_times": 1}))
        .unwrap();
    no_response.start(Some(Duration::from_secs(30))).await.unwrap();
    response.start(Some(Duration::from_secs(30))).await.unwrap();

    // Device A pings in the background.
    let ping = device_a
        .get_cmd("ping", json!({"options": "-O", "destination": "localhost"}))
        .unwrap();
    ping.start(Some(Duration::from_secs(30))).await.unwrap();

    // Device B takes the interface down, waits, brings it back up.
    io_b.add_response("sudo ifconfig lo down", LOCAL_PROMPT_LINE);
    io_b.add_response("sudo ifconfig lo up", LOCAL_PROMPT_LINE);
    device_b
        .run_cmd("sudo", json!({"command": "ifconfig lo down"}))
        .await
        .unwrap();

    io_a.inject("no answer yet for icmp_seq=33\n");
    tokio::time::sleep(Duration::from_millis(300)).await;
    io_a.inject("64 bytes from 127.0.0.1: icmp_seq=34 ttl=64 time=0.045 ms\n");

    device_b
        .run_cmd("sudo", json!({"command": "ifconfig lo up"}))
        .await
        .unwrap();

    no_response.await_done(Some(Duration::from_secs(5))).await.unwrap();
    response.await_done(Some(Duration::from_secs(5))).await.unwrap();

    let t_down = occurrence_time(&no_response.last_occurrence().unwrap());
    let t_up = occurrence_time(&response.last_occurrence().unwrap());
    let outage = (t_up - t_down).num_milliseconds();
    assert!(outage >= 0, "recovery must come after the outage");
    assert!(outage < 6_000, "outage lasted {outage} ms");

    ping.cancel();
    assert_no_unraised_failures();
}

fn occurrence_time(occurrence: &Value) -> DateTime<chrono::Utc> {
    DateTime::parse_from_rfc3339(occurrence["time"].as_str().unwrap())
        .unwrap()
        .with_timezone(&chrono::Utc)
}

#[tokio::test]
async fn test_prompt_autodetection_adopts_real_prompt() {
    let (device, io) = local_device("scenario-detect");
    device.goto_state(states::UNIX_LOCAL, None).await.unwrap();

    // The shell behind this session has an arbitrary prompt; the probe's
    // echo carries it as a prefix.
    io.add_response(
        "echo PROMPT-PROBE",
        "lab-7:~$ echo PROMPT-PROBE\nPROMPT-PROBE\nlab-7:~$ ",
    );
    device.detect_prompt(Some(Duration::from_secs(5))).await.unwrap();

    let adopted = device.state_prompt(states::UNIX_LOCAL).unwrap();
    assert!(adopted.contains("lab"), "unexpected prompt: {adopted}");

    // Commands now complete against the adopted prompt.
    io.add_response("whoami", "ute\nlab-7:~$ ");
    let whoami = device.get_cmd("whoami", json!({})).unwrap();
    let user = whoami.run(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(user["USER"], json!("ute"));

    assert_no_unraised_failures();
}

#[tokio::test]
async fn test_ambiguous_prompt_configuration_is_detected() {
    init();
    let (io, connection) = MemoryIo::wire("scenario-ambiguous");
    let hops = json!({
        "UNIX_LOCAL": {
            "UNIX_REMOTE": {
                "command_params": {
                    "host": "10.0.0.2",
                    "login": "ute",
                    "password": "ute-pass",
                    // Also matches the local 'herd_bash#' prompt line.
                    "expected_prompt": "bash#"
                }
            }
        }
    });
    let device = TextDevice::build(DeviceSpec {
        name: "scenario-ambiguous".to_string(),
        class: Arc::new(UnixRemote),
        io: IoBundle {
            io: io.clone(),
            connection,
        },
        connection_hops: Some(hops),
        initial_state: None,
        runner: Runner::new(),
        prompt_options: PromptCheckOptions::default(),
    })
    .unwrap();

    device.goto_state(states::UNIX_LOCAL, None).await.unwrap();
    assert!(device.last_wrong_prompt_occurrence().is_none());

    io.inject(LOCAL_PROMPT_LINE);

    let collision = device
        .last_wrong_prompt_occurrence()
        .expect("ambiguous prompts must be recorded");
    assert_eq!(collision.states.len(), 2);
    assert!(collision.line.contains("bash#"));
}
