//! RPC channel to the language-server subprocess.
//!
//! Owns the serialized stdin writer, the pending-request map, and the
//! background reader task that decodes frames off the server's stdout and
//! routes them: responses to their waiting callers, notifications into a
//! typed [`ServerEvent`] stream for the daemon to dispatch.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};

use crate::lsp::framing::{encode_frame, FrameDecoder};
use crate::lsp::protocol::{
    classify_message, InboundMessage, PublishDiagnosticsParams, RpcNotification, RpcRequest,
    RpcResponse,
};
use crate::lsp::server::{LanguageServerProcess, ServerCommand};
use crate::lsp::state::{SessionState, SharedState};

/// Grace period for the subprocess to exit after LSP `shutdown`/`exit`.
const EXIT_GRACE: Duration = Duration::from_secs(3);

/// Timeout on the LSP `shutdown` request during graceful teardown.
const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Typed events surfaced from the server's notification stream.
#[derive(Debug)]
pub enum ServerEvent {
    /// `textDocument/publishDiagnostics` arrived.
    Diagnostics(PublishDiagnosticsParams),
    /// The subprocess's stdout reached EOF; the server is gone.
    Exited,
}

/// The single shared write path to the subprocess's stdin. All frames go
/// through one mutex so concurrent tasks can never interleave partial
/// writes.
struct Outbound {
    stdin: tokio::sync::Mutex<ChildStdin>,
}

impl Outbound {
    async fn write_frame(&self, body: &str) -> Result<()> {
        let frame = encode_frame(body);
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&frame).await.context("Failed to write to language server stdin")?;
        stdin.flush().await.context("Failed to flush language server stdin")?;
        Ok(())
    }
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<RpcResponse>>>>;

/// Client half of the LSP session: request/notification sending plus the
/// `initialize` handshake and shutdown sequencing.
pub struct LspClient {
    server: tokio::sync::Mutex<LanguageServerProcess>,
    outbound: Arc<Outbound>,
    request_id: AtomicI64,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    state: SharedState,
}

impl LspClient {
    /// Spawn the server, wire up the reader, and run the handshake.
    ///
    /// Returns only once the session is `Ready`; callers must not accept
    /// `check` traffic before that.
    pub async fn start(
        command: &ServerCommand,
        workspace_root: &str,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        let state = SharedState::new();
        state.set(SessionState::Starting);

        let mut server = LanguageServerProcess::spawn(command, workspace_root)
            .await
            .context("Failed to start language server")?;
        let stdin = server.take_stdin()?;
        let stdout = server.take_stdout()?;

        let outbound = Arc::new(Outbound { stdin: tokio::sync::Mutex::new(stdin) });
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::channel(64);

        // The reader must be running before initialize is sent, otherwise
        // the handshake response is never consumed and we deadlock.
        tokio::spawn(run_reader(
            stdout,
            Arc::clone(&outbound),
            Arc::clone(&pending),
            Arc::clone(&closed),
            state.clone(),
            events_tx,
        ));

        let client = Self {
            server: tokio::sync::Mutex::new(server),
            outbound,
            request_id: AtomicI64::new(1),
            pending,
            closed,
            state,
        };

        client.state.set(SessionState::Initializing);
        client.initialize(workspace_root).await.context("LSP initialize handshake failed")?;
        client.state.set(SessionState::Ready);
        tracing::debug!("Language server session ready");

        Ok((client, events_rx))
    }

    /// Whether the channel has been torn down (server exited or shutdown).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn initialize(&self, workspace_root: &str) -> Result<()> {
        let params = serde_json::json!({
            "processId": std::process::id(),
            "rootUri": format!("file://{workspace_root}"),
            "capabilities": {
                "textDocument": {
                    "synchronization": {
                        "dynamicRegistration": false,
                        "didSave": false
                    },
                    "publishDiagnostics": {
                        "relatedInformation": false,
                        "versionSupport": true
                    }
                }
            }
        });

        let response = self.send_request("initialize", params).await?;
        if let Some(error) = response.error {
            bail!("initialize rejected by server: {} (code {})", error.message, error.code);
        }

        self.send_notification("initialized", serde_json::json!({})).await?;
        Ok(())
    }

    /// Send a request and wait for the matching response.
    ///
    /// Fails fast when the channel is closed, and resolves with a terminal
    /// error if the server exits while the request is outstanding.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<RpcResponse> {
        if self.is_closed() {
            bail!("language server channel is closed");
        }

        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending map mutex poisoned");
            pending.insert(id, tx);
        }

        let request = RpcRequest::new(id, method, params);
        let body = serde_json::to_string(&request).context("Failed to serialize request")?;
        tracing::debug!("-> {method} (id: {id})");

        if let Err(e) = self.outbound.write_frame(&body).await {
            let mut pending = self.pending.lock().expect("pending map mutex poisoned");
            pending.remove(&id);
            return Err(e);
        }

        // The sender is dropped by the reader when the stream dies, which
        // surfaces here as a terminal error instead of a hang.
        rx.await.context("language server exited before responding")
    }

    /// Fire-and-forget notification.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        if self.is_closed() {
            bail!("language server channel is closed");
        }
        let notification = RpcNotification::new(method, params);
        let body =
            serde_json::to_string(&notification).context("Failed to serialize notification")?;
        tracing::debug!("-> {method}");
        self.outbound.write_frame(&body).await
    }

    pub async fn did_open(
        &self,
        uri: &str,
        language_id: &str,
        version: i32,
        text: &str,
    ) -> Result<()> {
        self.send_notification(
            "textDocument/didOpen",
            serde_json::json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": version,
                    "text": text
                }
            }),
        )
        .await
    }

    /// Full-document sync: the whole new content replaces the old.
    pub async fn did_change(&self, uri: &str, version: i32, text: &str) -> Result<()> {
        self.send_notification(
            "textDocument/didChange",
            serde_json::json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": [ { "text": text } ]
            }),
        )
        .await
    }

    /// Graceful teardown: LSP `shutdown` request, `exit` notification,
    /// then kill the subprocess if it lingers past the grace period.
    pub async fn shutdown(&self) -> Result<()> {
        self.state.set(SessionState::ShuttingDown);

        if !self.is_closed() {
            match tokio::time::timeout(
                SHUTDOWN_REQUEST_TIMEOUT,
                self.send_request("shutdown", Value::Null),
            )
            .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("shutdown request failed: {e}"),
                Err(_) => tracing::debug!("shutdown request timed out"),
            }
            if let Err(e) = self.send_notification("exit", Value::Null).await {
                tracing::debug!("exit notification failed: {e}");
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        let mut server = self.server.lock().await;
        server.wait_or_kill(EXIT_GRACE).await?;
        self.state.set(SessionState::Stopped);
        Ok(())
    }

    /// Immediate teardown for interrupt-style exits: skip the LSP goodbye
    /// and kill the subprocess right away.
    pub async fn terminate(&self) {
        self.state.set(SessionState::ShuttingDown);
        self.closed.store(true, Ordering::SeqCst);
        let mut server = self.server.lock().await;
        if let Err(e) = server.wait_or_kill(Duration::from_millis(100)).await {
            tracing::debug!("kill on terminate failed: {e}");
        }
        self.state.set(SessionState::Stopped);
    }
}

/// Background task reading framed messages off the server's stdout.
async fn run_reader(
    mut stdout: ChildStdout,
    outbound: Arc<Outbound>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    state: SharedState,
    events: mpsc::Sender<ServerEvent>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 8192];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!("Language server stdout closed (EOF)");
                break;
            }
            Ok(n) => {
                decoder.extend(&chunk[..n]);
                while let Some(body) = decoder.next_frame() {
                    dispatch(&body, &outbound, &pending, &events).await;
                }
            }
            Err(e) => {
                tracing::debug!("Language server stdout read error: {e}");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    if state.get() != SessionState::ShuttingDown {
        state.set(SessionState::Stopped);
    }

    // Dropping the senders resolves every outstanding request with a
    // terminal error instead of leaving callers pending.
    {
        let mut pending = pending.lock().expect("pending map mutex poisoned");
        let outstanding = pending.len();
        if outstanding > 0 {
            tracing::debug!("Failing {outstanding} in-flight requests after server exit");
        }
        pending.clear();
    }

    let _ = events.send(ServerEvent::Exited).await;
}

/// Route one decoded message. Unparseable bodies are logged and dropped;
/// a corrupt frame must not take the session down.
async fn dispatch(
    body: &str,
    outbound: &Arc<Outbound>,
    pending: &PendingMap,
    events: &mpsc::Sender<ServerEvent>,
) {
    let Some(message) = classify_message(body) else {
        tracing::warn!(
            "Dropping unparseable server message: {}",
            body.chars().take(200).collect::<String>()
        );
        return;
    };

    match message {
        InboundMessage::Response(response) => {
            let Some(id) = response.id.as_i64() else {
                tracing::debug!("Response with non-numeric id: {:?}", response.id);
                return;
            };
            let waiter = {
                let mut pending = pending.lock().expect("pending map mutex poisoned");
                pending.remove(&id)
            };
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => tracing::debug!("Response for unknown request id {id}"),
            }
        }
        InboundMessage::Notification(notification) => {
            handle_notification(notification, events).await;
        }
        InboundMessage::Request(request) => {
            // Minimal server-to-client support: acknowledge with a null
            // result so servers waiting on configuration or registration
            // replies do not stall the session.
            tracing::debug!("<- server request {} (id: {}), replying null", request.method, request.id);
            let reply = RpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Value::from(request.id),
                result: Some(Value::Null),
                error: None,
            };
            if let Ok(body) = serde_json::to_string(&reply) {
                if let Err(e) = outbound.write_frame(&body).await {
                    tracing::debug!("Failed to answer server request: {e}");
                }
            }
        }
    }
}

async fn handle_notification(notification: RpcNotification, events: &mpsc::Sender<ServerEvent>) {
    match notification.method.as_str() {
        "textDocument/publishDiagnostics" => {
            match serde_json::from_value::<PublishDiagnosticsParams>(notification.params) {
                Ok(params) => {
                    tracing::debug!(
                        "<- publishDiagnostics for {} ({} items)",
                        params.uri,
                        params.diagnostics.len()
                    );
                    let _ = events.send(ServerEvent::Diagnostics(params)).await;
                }
                Err(e) => tracing::warn!("Malformed publishDiagnostics params: {e}"),
            }
        }
        "window/logMessage" | "window/showMessage" => {
            let text = notification.params.get("message").and_then(Value::as_str).unwrap_or("");
            tracing::debug!("server log: {text}");
        }
        other => tracing::trace!("Ignoring notification {other}"),
    }
}
