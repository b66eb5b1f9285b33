//! The daemon: control-socket accept loop wired to one LSP session.
//!
//! Startup order matters: the language server is spawned and the
//! `initialize` handshake completed before the socket is bound and the
//! discovery file published, so clients can never reach a half-ready
//! daemon. Connections are handled concurrently (each exchange is short
//! and deadline-bounded), while all shared state sits behind its own
//! lock and every frame to the subprocess goes through one serialized
//! writer.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};

use crate::daemon::info::DaemonInfo;
use crate::daemon::protocol::{ControlCommand, ControlErrorCode, ControlReply};
use crate::lsp::client::{LspClient, ServerEvent};
use crate::lsp::diagnostics::DiagnosticsCorrelator;
use crate::lsp::documents::{DocumentAction, DocumentStore};
use crate::lsp::framing::{encode_frame, FrameDecoder};
use crate::lsp::server::ServerCommand;

/// How long a connected client may take to deliver its command before the
/// connection is dropped. Keeps a stalled client from pinning a task.
const COMMAND_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for the configurable check deadline. The control client's
/// exchange ceiling is derived from this bound, so a daemon can never be
/// configured to out-wait its own clients.
pub const MAX_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Daemon configuration resolved from CLI flags.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub info_path: PathBuf,
    pub server_command: ServerCommand,
    pub workspace_root: String,
    pub default_language: String,
    /// Deadline for a `check` to receive fresh diagnostics before falling
    /// back to the cache.
    pub check_timeout: Duration,
}

/// Why the accept loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownKind {
    /// Shutdown command or SIGTERM: full LSP goodbye.
    Graceful,
    /// SIGINT: skip the LSP goodbye, still clean up published state.
    Immediate,
    /// The subprocess died on its own; nothing left to say goodbye to.
    ServerExited,
}

struct DaemonServer {
    config: DaemonConfig,
    session: LspClient,
    documents: DocumentStore,
    correlator: DiagnosticsCorrelator,
    shutdown_tx: broadcast::Sender<ShutdownKind>,
    started: Instant,
}

/// Run the daemon to completion: spawn the server, serve the socket,
/// tear everything down. Blocks until shutdown.
pub async fn run(config: DaemonConfig) -> Result<()> {
    anyhow::ensure!(
        config.check_timeout <= MAX_CHECK_TIMEOUT,
        "check timeout of {}ms exceeds the maximum of {}ms",
        config.check_timeout.as_millis(),
        MAX_CHECK_TIMEOUT.as_millis(),
    );

    let (session, events) = LspClient::start(&config.server_command, &config.workspace_root)
        .await
        .context("Failed to start language server session")?;

    // Stale socket from a crashed instance.
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)
            .context("Failed to remove existing socket file")?;
    }

    let listener =
        UnixListener::bind(&config.socket_path).context("Failed to bind Unix socket")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&config.socket_path, permissions)
            .context("Failed to set socket permissions")?;
    }

    tracing::info!("Daemon listening on {}", config.socket_path.display());

    let (shutdown_tx, _) = broadcast::channel(4);
    let server = Arc::new(DaemonServer {
        documents: DocumentStore::new(config.default_language.clone()),
        correlator: DiagnosticsCorrelator::new(),
        config,
        session,
        shutdown_tx,
        started: Instant::now(),
    });

    let info = DaemonInfo {
        socket_path: server.config.socket_path.clone(),
        pid: std::process::id(),
    };
    info.publish(&server.config.info_path)?;

    tokio::spawn(dispatch_events(events, Arc::clone(&server)));

    let kind = accept_loop(&server, listener).await;
    cleanup(&server, kind).await
}

/// Forward typed server events into the correlator; a server exit turns
/// into a daemon shutdown.
async fn dispatch_events(mut events: mpsc::Receiver<ServerEvent>, server: Arc<DaemonServer>) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Diagnostics(params) => {
                server.correlator.publish(&params.uri, params.version, params.diagnostics);
            }
            ServerEvent::Exited => {
                tracing::warn!("Language server exited unexpectedly, shutting down");
                // Answer in-flight checks with whatever is cached before
                // the daemon goes away.
                server.correlator.resolve_all_with_cache();
                let _ = server.shutdown_tx.send(ShutdownKind::ServerExited);
                break;
            }
        }
    }
}

async fn accept_loop(server: &Arc<DaemonServer>, listener: UnixListener) -> ShutdownKind {
    let mut shutdown_rx = server.shutdown_tx.subscribe();

    let (mut sigterm, mut sigint) = match signal_streams() {
        Ok(streams) => streams,
        Err(e) => {
            tracing::error!("Failed to install signal handlers: {e}");
            return ShutdownKind::Immediate;
        }
    };

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let server = Arc::clone(server);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&server, stream).await {
                                tracing::debug!("Connection error: {e}");
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {e}"),
                }
            }

            kind = shutdown_rx.recv() => {
                return kind.unwrap_or(ShutdownKind::Immediate);
            }

            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down gracefully");
                return ShutdownKind::Graceful;
            }

            _ = sigint.recv() => {
                tracing::info!("SIGINT received, exiting immediately");
                return ShutdownKind::Immediate;
            }
        }
    }
}

fn signal_streams() -> Result<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)> {
    use tokio::signal::unix::{signal, SignalKind};
    Ok((
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
    ))
}

/// One connection, one framed command, one framed reply, close.
async fn handle_connection(server: &Arc<DaemonServer>, mut stream: UnixStream) -> Result<()> {
    let command = match read_command(&mut stream).await {
        Ok(Some(command)) => command,
        // EOF before a complete frame: client went away, nothing to answer.
        Ok(None) => return Ok(()),
        Err(reply) => {
            write_reply(&mut stream, &reply).await?;
            return Ok(());
        }
    };

    tracing::debug!("Received command: {command:?}");
    let reply = handle_command(server, command).await;
    write_reply(&mut stream, &reply).await
}

/// Read exactly one framed command. A malformed frame or command shape is
/// answered (via `Err(reply)`) rather than crashing the connection task.
async fn read_command(stream: &mut UnixStream) -> Result<Option<ControlCommand>, ControlReply> {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 4096];

    let body = loop {
        if let Some(body) = decoder.next_frame() {
            break body;
        }
        let read = tokio::time::timeout(COMMAND_READ_TIMEOUT, stream.read(&mut chunk)).await;
        match read {
            Ok(Ok(0)) => return Ok(None),
            Ok(Ok(n)) => decoder.extend(&chunk[..n]),
            Ok(Err(_)) => return Ok(None),
            Err(_) => {
                return Err(ControlReply::error(
                    ControlErrorCode::InvalidRequest,
                    "timed out waiting for a framed command",
                ))
            }
        }
    };

    serde_json::from_str(&body).map(Some).map_err(|e| {
        ControlReply::error(ControlErrorCode::InvalidRequest, format!("bad command: {e}"))
    })
}

async fn write_reply(stream: &mut UnixStream, reply: &ControlReply) -> Result<()> {
    let body = serde_json::to_string(reply).context("Failed to serialize reply")?;
    stream.write_all(&encode_frame(&body)).await.context("Failed to write reply")?;
    stream.flush().await.context("Failed to flush reply")?;
    stream.shutdown().await.context("Failed to close connection")?;
    Ok(())
}

async fn handle_command(server: &Arc<DaemonServer>, command: ControlCommand) -> ControlReply {
    match command {
        ControlCommand::Ping => {
            ControlReply::ok_with_status(std::process::id(), server.started.elapsed().as_secs())
        }
        ControlCommand::Shutdown => {
            tracing::info!("Shutdown requested over control socket");
            let _ = server.shutdown_tx.send(ShutdownKind::Graceful);
            ControlReply::ok()
        }
        ControlCommand::Check { file_path, content } => {
            handle_check(server, &file_path, &content).await
        }
    }
}

/// The check flow: push the document version, wait (bounded) for the
/// matching publish, fall back to the cache on timeout.
async fn handle_check(server: &Arc<DaemonServer>, file_path: &str, content: &str) -> ControlReply {
    if server.session.is_closed() {
        return ControlReply::error(
            ControlErrorCode::ServerExited,
            "language server is no longer running",
        );
    }

    let handle = match server.documents.open_or_update(std::path::Path::new(file_path)) {
        Ok(handle) => handle,
        Err(e) => return ControlReply::error(ControlErrorCode::Internal, e.to_string()),
    };

    // Subscribe before sending so a fast publish cannot be missed.
    let rx = match server.correlator.subscribe(&handle.uri, handle.version) {
        Ok(rx) => rx,
        Err(busy) => return ControlReply::error(ControlErrorCode::Busy, busy.to_string()),
    };

    let sent = match handle.action {
        DocumentAction::Open => {
            server
                .session
                .did_open(&handle.uri, &handle.language_id, handle.version, content)
                .await
        }
        DocumentAction::Change => {
            server.session.did_change(&handle.uri, handle.version, content).await
        }
    };

    if let Err(e) = sent {
        server.correlator.cancel(&handle.uri);
        let code = if server.session.is_closed() {
            ControlErrorCode::ServerExited
        } else {
            ControlErrorCode::Internal
        };
        return ControlReply::error(code, e.to_string());
    }

    let diagnostics = server
        .correlator
        .wait(&handle.uri, handle.version, rx, server.config.check_timeout)
        .await;
    ControlReply::Diagnostics(diagnostics)
}

async fn cleanup(server: &Arc<DaemonServer>, kind: ShutdownKind) -> Result<()> {
    tracing::info!("Cleaning up daemon resources ({kind:?})");

    DaemonInfo::unpublish(&server.config.info_path);
    if server.config.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&server.config.socket_path) {
            tracing::warn!("Failed to remove socket file: {e}");
        }
    }

    match kind {
        ShutdownKind::Graceful => server.session.shutdown().await?,
        ShutdownKind::Immediate | ShutdownKind::ServerExited => server.session.terminate().await,
    }

    Ok(())
}
