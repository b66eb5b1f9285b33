//! Control-socket command protocol.
//!
//! Each client connection carries exactly one Content-Length-framed JSON
//! command and receives exactly one framed reply, then the server closes
//! the connection. Commands are tagged by `type`; a successful `check`
//! replies with the bare diagnostics array, everything else replies with
//! an `{"ok": …}` object.

use crate::lsp::protocol::Diagnostic;
use serde::{Deserialize, Serialize};

/// Commands accepted over the control socket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Liveness probe, used by the startup script to confirm readiness.
    Ping,

    /// Diagnose one file with the given in-memory content.
    Check {
        #[serde(rename = "filePath")]
        file_path: String,
        content: String,
    },

    /// Gracefully stop the daemon.
    Shutdown,
}

/// Machine-readable error categories for control replies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlErrorCode {
    /// Request was not valid JSON or not a known command shape.
    InvalidRequest,
    /// A check for the same file is already in flight.
    Busy,
    /// The language server has exited; the daemon is going down.
    ServerExited,
    /// Anything else that went wrong while handling the command.
    Internal,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControlError {
    pub code: ControlErrorCode,
    pub message: String,
}

/// Replies sent back over the socket.
///
/// Serialized untagged: a `check` success is the plain diagnostics array,
/// acks are `{"ok":true, …}` and failures `{"ok":false,"error":{…}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ControlReply {
    Diagnostics(Vec<Diagnostic>),
    Failure(FailureReply),
    Ack(AckReply),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AckReply {
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(rename = "uptimeSecs", skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FailureReply {
    pub ok: bool,
    pub error: ControlError,
}

impl ControlReply {
    pub fn ok() -> Self {
        Self::Ack(AckReply { ok: true, pid: None, uptime_secs: None })
    }

    pub fn ok_with_status(pid: u32, uptime_secs: u64) -> Self {
        Self::Ack(AckReply { ok: true, pid: Some(pid), uptime_secs: Some(uptime_secs) })
    }

    pub fn error(code: ControlErrorCode, message: impl Into<String>) -> Self {
        Self::Failure(FailureReply {
            ok: false,
            error: ControlError { code, message: message.into() },
        })
    }
}
