#[path = "common.rs"]
mod common;

use common::TestDaemon;
use std::time::Duration;

#[test]
fn test_check_reports_diagnostics_with_positions() {
    let daemon = TestDaemon::start(&[], None);

    let reply = daemon.check(&daemon.file_path("app.py"), "ok line\nhas ERR here\n");

    let diagnostics = reply.as_array().expect("diagnostics array");
    assert_eq!(diagnostics.len(), 1);

    let diag = &diagnostics[0];
    assert_eq!(diag["message"], "found forbidden token");
    assert_eq!(diag["severity"], 1);
    assert_eq!(diag["source"], "mock-ls");
    assert_eq!(diag["range"]["start"]["line"], 1);
    assert_eq!(diag["range"]["start"]["character"], 4);
    assert_eq!(diag["range"]["end"]["character"], 7);
}

#[test]
fn test_check_clean_content_returns_empty_array() {
    let daemon = TestDaemon::start(&[], None);

    let reply = daemon.check(&daemon.file_path("clean.py"), "nothing wrong here\n");
    assert_eq!(reply, serde_json::json!([]));
}

#[test]
fn test_repeated_checks_increment_document_version() {
    let daemon = TestDaemon::start(&[], None);
    let path = daemon.file_path("versioned.py");

    // mock-ls echoes the didOpen/didChange version in the diagnostic code.
    let first = daemon.check(&path, "ERR\n");
    assert_eq!(first[0]["code"], 1);

    let second = daemon.check(&path, "ERR again\n");
    assert_eq!(second[0]["code"], 2);

    let third = daemon.check(&path, "ERR still\n");
    assert_eq!(third[0]["code"], 3);
}

#[test]
fn test_checks_on_different_files_are_independent() {
    let daemon = TestDaemon::start(&[], None);

    let a = daemon.check(&daemon.file_path("a.py"), "ERR\n");
    let b = daemon.check(&daemon.file_path("b.py"), "fine\n");

    assert_eq!(a.as_array().map(Vec::len), Some(1));
    assert_eq!(b, serde_json::json!([]));

    // Each file carries its own version counter.
    assert_eq!(daemon.check(&daemon.file_path("a.py"), "ERR\n")[0]["code"], 2);
}

#[test]
fn test_concurrent_check_on_same_file_is_rejected_busy() {
    // Slow publishes keep the first check in flight long enough for the
    // second to collide with it.
    let daemon = TestDaemon::start(&["--publish-delay-ms", "1500"], Some(5000));
    let path = daemon.file_path("contended.py");

    let first = std::thread::spawn({
        let daemon_socket = daemon.socket_path.clone();
        let path = path.clone();
        move || {
            let mut stream =
                std::os::unix::net::UnixStream::connect(&daemon_socket).expect("connect");
            stream.set_read_timeout(Some(Duration::from_secs(20))).expect("timeout");
            let body = serde_json::json!({
                "type": "check",
                "filePath": path,
                "content": "ERR\n",
            })
            .to_string();
            let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
            use std::io::Write;
            stream.write_all(frame.as_bytes()).expect("write");
            common::read_frame(&mut stream).expect("first reply")
        }
    });

    // Let the first check register its waiter before colliding.
    std::thread::sleep(Duration::from_millis(300));
    let second = daemon.check(&path, "ERR\n");
    assert_eq!(second["ok"], false);
    assert_eq!(second["error"]["code"], "busy");

    // The first check still completes normally.
    let first_body = first.join().expect("first thread");
    let first_reply: serde_json::Value = serde_json::from_str(&first_body).expect("parse");
    assert_eq!(first_reply.as_array().map(Vec::len), Some(1));
}

#[test]
fn test_slow_server_falls_back_to_cached_diagnostics() {
    // Publish delay far beyond the check deadline.
    let daemon = TestDaemon::start(&["--publish-delay-ms", "3000"], Some(300));

    // Nothing cached yet, so the timed-out check yields an empty array.
    let reply = daemon.check(&daemon.file_path("slow.py"), "ERR\n");
    assert_eq!(reply, serde_json::json!([]));
}

#[test]
fn test_delayed_publish_for_previous_version_is_not_reported() {
    // Publishes land after the check deadline, so the results for one
    // document version are still in flight when the next check runs.
    let daemon = TestDaemon::start(&["--publish-delay-ms", "500"], Some(300));
    let path = daemon.file_path("edited.py");

    // The broken version times out before its diagnostics arrive.
    let first = daemon.check(&path, "ERR\n");
    assert_eq!(first, serde_json::json!([]));

    // The late publish for version 1 must not answer the version 2 check:
    // the fixed content is clean, so the reply has to be empty.
    let second = daemon.check(&path, "all fixed\n");
    assert_eq!(second, serde_json::json!([]));
}

#[test]
fn test_server_crash_shuts_daemon_down() {
    let mut daemon = TestDaemon::start(&[], None);

    // mock-ls exits when it sees this token; the reply may be lost in the
    // teardown race, so only the daemon's own cleanup is asserted.
    let path = daemon.file_path("doomed.py");
    let body = serde_json::json!({
        "type": "check",
        "filePath": path,
        "content": "CRASH\n",
    })
    .to_string();
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| daemon.exchange_raw(&body)));

    assert!(daemon.wait_exit(Duration::from_secs(10)), "daemon did not exit after server crash");
    assert!(!daemon.info_path.exists(), "discovery file should be removed after crash");
}
