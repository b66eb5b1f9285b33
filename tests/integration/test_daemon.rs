#[path = "common.rs"]
mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::TestDaemon;
use predicates::prelude::*;
use serde_json::json;
use std::time::Duration;

#[test]
fn test_ping_reports_daemon_pid() {
    let daemon = TestDaemon::start(&[], None);

    let reply = daemon.ping();
    assert_eq!(reply["ok"], true);
    assert!(reply["pid"].as_u64().is_some_and(|pid| pid > 0));
    assert!(reply["uptimeSecs"].is_u64());
}

#[test]
fn test_discovery_file_matches_running_daemon() {
    let daemon = TestDaemon::start(&[], None);

    let contents = std::fs::read_to_string(&daemon.info_path).expect("read info file");
    let info: serde_json::Value = serde_json::from_str(&contents).expect("parse info file");

    assert_eq!(info["socketPath"], daemon.socket_path.to_string_lossy().as_ref());

    let published_pid = info["pid"].as_u64().expect("pid in info file");
    let reply = daemon.ping();
    assert_eq!(reply["pid"].as_u64(), Some(published_pid));
}

#[test]
fn test_unknown_command_gets_error_reply() {
    let daemon = TestDaemon::start(&[], None);

    let reply = daemon.exchange(&json!({ "type": "bogus" }));
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], "invalid_request");

    // One bad client must not take the daemon down.
    assert_eq!(daemon.ping()["ok"], true);
}

#[test]
fn test_malformed_json_gets_error_reply() {
    let daemon = TestDaemon::start(&[], None);

    let body = daemon.exchange_raw("{not json");
    let reply: serde_json::Value = serde_json::from_str(&body).expect("parse reply");
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], "invalid_request");

    assert_eq!(daemon.ping()["ok"], true);
}

#[test]
fn test_shutdown_command_stops_daemon_and_cleans_up() {
    let mut daemon = TestDaemon::start(&[], None);

    let reply = daemon.exchange(&json!({ "type": "shutdown" }));
    assert_eq!(reply["ok"], true);

    assert!(daemon.wait_exit(Duration::from_secs(10)), "daemon did not exit after shutdown");
    assert!(!daemon.info_path.exists(), "discovery file should be removed on shutdown");
    assert!(!daemon.socket_path.exists(), "socket file should be removed on shutdown");
}

#[test]
fn test_status_without_daemon_reports_not_running() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut cmd = cargo_bin_cmd!("diagd");
    cmd.arg("--info-file")
        .arg(dir.path().join("missing.json"))
        .arg("daemon")
        .arg("status");

    cmd.assert().failure().stdout(predicate::str::contains("not running"));
}

#[test]
fn test_oversized_check_timeout_is_rejected_at_start() {
    // A deadline past the cap would let the daemon out-wait its clients'
    // exchange ceiling, so start must refuse it before spawning anything.
    let dir = tempfile::tempdir().expect("tempdir");

    let mut cmd = cargo_bin_cmd!("diagd");
    cmd.arg("--socket")
        .arg(dir.path().join("daemon.sock"))
        .arg("--info-file")
        .arg(dir.path().join("daemon.json"))
        .arg("--workspace")
        .arg(dir.path())
        .args(["daemon", "start", "--foreground", "--server", "does-not-matter"])
        .args(["--check-timeout-ms", "60000"]);

    cmd.assert().failure().stderr(predicate::str::contains("exceeds the maximum"));
    assert!(!dir.path().join("daemon.json").exists());
}

#[test]
fn test_sigterm_shuts_down_gracefully() {
    let mut daemon = TestDaemon::start(&[], None);

    let contents = std::fs::read_to_string(&daemon.info_path).expect("read info file");
    let info: serde_json::Value = serde_json::from_str(&contents).expect("parse info file");
    let pid = info["pid"].as_u64().expect("pid") as i32;

    // SAFETY: sending SIGTERM to the child we spawned.
    #[allow(unsafe_code)]
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    assert!(daemon.wait_exit(Duration::from_secs(10)), "daemon did not exit on SIGTERM");
    assert!(!daemon.info_path.exists());
    assert!(!daemon.socket_path.exists());
}
