//! Client side of the control socket, used by the CLI commands.
//!
//! Each exchange is one connection: connect, send one framed command,
//! read one framed reply, done. Lifecycle helpers spawn the daemon in
//! the background and poll the discovery file as the readiness signal.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::daemon::info::DaemonInfo;
use crate::daemon::protocol::{ControlCommand, ControlReply};
use crate::lsp::framing::{encode_frame, FrameDecoder};
use crate::lsp::protocol::Diagnostic;

/// Ceiling for one command/reply exchange. Derived from the largest check
/// deadline a daemon will accept, plus slack, so timeouts resolve
/// server-side (as cached results) rather than client-side (as errors).
const EXCHANGE_TIMEOUT: Duration =
    Duration::from_secs(crate::daemon::server::MAX_CHECK_TIMEOUT.as_secs() + 5);

/// How long `daemon start` waits for the background child to publish its
/// discovery file before giving up.
const STARTUP_RETRIES: usize = 50;
const STARTUP_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Send one command to the daemon at `socket_path` and return its reply.
pub async fn exchange(socket_path: &Path, command: &ControlCommand) -> Result<ControlReply> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", socket_path.display()))?;

    let body = serde_json::to_string(command).context("Failed to serialize command")?;

    timeout(EXCHANGE_TIMEOUT, async {
        stream.write_all(&encode_frame(&body)).await.context("Failed to send command")?;
        stream.flush().await.context("Failed to flush command")?;
        read_reply(&mut stream).await
    })
    .await
    .context("Daemon did not reply in time")?
}

async fn read_reply(stream: &mut UnixStream) -> Result<ControlReply> {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 4096];

    loop {
        if let Some(body) = decoder.next_frame() {
            return serde_json::from_str(&body).context("Malformed reply from daemon");
        }
        let n = stream.read(&mut chunk).await.context("Failed to read reply")?;
        if n == 0 {
            bail!("Daemon closed the connection before replying");
        }
        decoder.extend(&chunk[..n]);
    }
}

/// Liveness probe. Ok(true) means the daemon answered `{"ok":true}`.
pub async fn ping(socket_path: &Path) -> Result<bool> {
    match exchange(socket_path, &ControlCommand::Ping).await? {
        ControlReply::Ack(ack) => Ok(ack.ok),
        ControlReply::Failure(f) => bail!("daemon error: {}", f.error.message),
        ControlReply::Diagnostics(_) => bail!("unexpected reply to ping"),
    }
}

/// Run a diagnostics check for `file_path` with the given content.
pub async fn check(socket_path: &Path, file_path: &str, content: &str) -> Result<Vec<Diagnostic>> {
    let command = ControlCommand::Check {
        file_path: file_path.to_string(),
        content: content.to_string(),
    };
    match exchange(socket_path, &command).await? {
        ControlReply::Diagnostics(diagnostics) => Ok(diagnostics),
        ControlReply::Failure(f) => bail!("daemon error: {}", f.error.message),
        ControlReply::Ack(_) => bail!("unexpected reply to check"),
    }
}

/// Ask the daemon to shut down gracefully, then wait (bounded) for the
/// discovery file to disappear.
pub async fn stop(info_path: &Path) -> Result<()> {
    let info = match DaemonInfo::load(info_path) {
        Ok(info) => info,
        Err(_) => {
            tracing::debug!("No daemon info file, nothing to stop");
            return Ok(());
        }
    };

    match exchange(&info.socket_path, &ControlCommand::Shutdown).await {
        Ok(_) => {}
        Err(e) => {
            // Daemon gone but left stale state behind. Clean it up.
            tracing::warn!("Daemon unreachable ({e}), removing stale files");
            DaemonInfo::unpublish(info_path);
            let _ = std::fs::remove_file(&info.socket_path);
            return Ok(());
        }
    }

    for _ in 0..STARTUP_RETRIES {
        if !info_path.exists() {
            return Ok(());
        }
        tokio::time::sleep(STARTUP_RETRY_DELAY).await;
    }
    bail!("Daemon acknowledged shutdown but did not exit in time")
}

/// Options forwarded to a background `daemon start --foreground`.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub server_command: String,
    pub workspace_root: PathBuf,
    pub socket_path: Option<PathBuf>,
    pub info_path: PathBuf,
    pub language_id: Option<String>,
    pub check_timeout_ms: Option<u64>,
}

/// Make sure a daemon is running, spawning one in the background if the
/// discovery file is absent or stale. Returns the active daemon's info.
pub async fn ensure_running(options: &SpawnOptions) -> Result<DaemonInfo> {
    if let Ok(info) = DaemonInfo::load(&options.info_path) {
        if ping(&info.socket_path).await.unwrap_or(false) {
            tracing::debug!("Daemon already running (pid {})", info.pid);
            return Ok(info);
        }
        tracing::warn!("Stale daemon info found, cleaning up");
        DaemonInfo::unpublish(&options.info_path);
        let _ = std::fs::remove_file(&info.socket_path);
    }

    tracing::info!("Starting daemon...");
    spawn_background(options)?;
    wait_ready(&options.info_path).await
}

/// Spawn the current executable as a detached background daemon.
fn spawn_background(options: &SpawnOptions) -> Result<()> {
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut cmd = Command::new(exe);
    cmd.arg("--info-file")
        .arg(&options.info_path)
        .arg("daemon")
        .arg("start")
        .arg("--foreground")
        .arg("--server")
        .arg(&options.server_command)
        .arg("--workspace")
        .arg(&options.workspace_root);
    if let Some(socket) = &options.socket_path {
        cmd.arg("--socket").arg(socket);
    }
    if let Some(language) = &options.language_id {
        cmd.arg("--language-id").arg(language);
    }
    if let Some(ms) = options.check_timeout_ms {
        cmd.arg("--check-timeout-ms").arg(ms.to_string());
    }

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    tracing::debug!("Spawned daemon process with PID {}", child.id());
    Ok(())
}

/// Poll the discovery file, then confirm with a ping.
async fn wait_ready(info_path: &Path) -> Result<DaemonInfo> {
    for attempt in 0..STARTUP_RETRIES {
        tokio::time::sleep(STARTUP_RETRY_DELAY).await;

        let Ok(info) = DaemonInfo::load(info_path) else { continue };
        match timeout(Duration::from_millis(500), ping(&info.socket_path)).await {
            Ok(Ok(true)) => {
                tracing::info!("Daemon ready (pid {})", info.pid);
                return Ok(info);
            }
            Ok(Ok(false) | Err(_)) | Err(_) => {
                tracing::debug!("Readiness attempt {} failed", attempt + 1);
            }
        }
    }
    bail!("Daemon failed to become ready within {:?}", STARTUP_RETRIES as u32 * STARTUP_RETRY_DELAY)
}
