use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// A daemon instance running against the mock language server, with its
/// socket and discovery file isolated in a tempdir.
pub struct TestDaemon {
    pub socket_path: PathBuf,
    pub info_path: PathBuf,
    pub workspace: tempfile::TempDir,
    child: Child,
}

impl TestDaemon {
    /// Start a foreground daemon wired to `mock-ls`. Extra flags are
    /// appended to the mock server command line.
    pub fn start(mock_flags: &[&str], check_timeout_ms: Option<u64>) -> Self {
        let workspace = tempfile::tempdir().expect("tempdir");
        let socket_path = workspace.path().join("daemon.sock");
        let info_path = workspace.path().join("daemon.json");

        let mock_bin = assert_cmd::cargo::cargo_bin!("mock-ls");
        let mut server_command = mock_bin.to_string_lossy().into_owned();
        for flag in mock_flags {
            server_command.push(' ');
            server_command.push_str(flag);
        }

        let diagd_bin = assert_cmd::cargo::cargo_bin!("diagd");
        let mut cmd = Command::new(&diagd_bin);
        cmd.arg("--socket")
            .arg(&socket_path)
            .arg("--info-file")
            .arg(&info_path)
            .arg("--workspace")
            .arg(workspace.path())
            .arg("daemon")
            .arg("start")
            .arg("--foreground")
            .arg("--server")
            .arg(&server_command);
        if let Some(ms) = check_timeout_ms {
            cmd.arg("--check-timeout-ms").arg(ms.to_string());
        }

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn diagd");

        let daemon = Self { socket_path, info_path, workspace, child };
        daemon.wait_ready();
        daemon
    }

    /// The discovery file is published only after the daemon is serving.
    fn wait_ready(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.info_path.exists() && self.socket_path.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("daemon did not publish its discovery file in time");
    }

    /// Send one raw body over a fresh connection and return the reply body.
    pub fn exchange_raw(&self, body: &str) -> String {
        let mut stream = UnixStream::connect(&self.socket_path).expect("connect to daemon");
        stream
            .set_read_timeout(Some(Duration::from_secs(20)))
            .expect("set read timeout");

        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        stream.write_all(frame.as_bytes()).expect("write command");
        stream.flush().expect("flush command");

        read_frame(&mut stream).expect("read reply frame")
    }

    /// Send a command as JSON and parse the reply.
    pub fn exchange(&self, command: &serde_json::Value) -> serde_json::Value {
        let body = self.exchange_raw(&command.to_string());
        serde_json::from_str(&body).expect("parse reply JSON")
    }

    pub fn check(&self, file_path: &str, content: &str) -> serde_json::Value {
        self.exchange(&serde_json::json!({
            "type": "check",
            "filePath": file_path,
            "content": content,
        }))
    }

    pub fn ping(&self) -> serde_json::Value {
        self.exchange(&serde_json::json!({ "type": "ping" }))
    }

    /// Path of a file inside the daemon's workspace (need not exist).
    pub fn file_path(&self, name: &str) -> String {
        self.workspace.path().join(name).to_string_lossy().into_owned()
    }

    /// Wait for the daemon process to exit on its own.
    pub fn wait_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(_) => return false,
            }
        }
        false
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Read one Content-Length framed body from a blocking stream.
pub fn read_frame(stream: &mut UnixStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(body) = parse_frame(&buffer) {
            return Some(body);
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return parse_frame(&buffer),
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

fn parse_frame(buffer: &[u8]) -> Option<String> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;
    let length: usize = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok())?
    })?;

    let start = header_end + 4;
    if buffer.len() < start + length {
        return None;
    }
    String::from_utf8(buffer[start..start + length].to_vec()).ok()
}
