//! JSON-RPC 2.0 message types for the language-server stream, plus the
//! diagnostic payloads the daemon cares about.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

fn default_null() -> Value {
    Value::Null
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, method: method.into(), params }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: Value,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), method: method.into(), params }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One decoded inbound message, classified by shape: a response carries an
/// `id` without a `method`, a notification a `method` without an `id`, and
/// a server-to-client request both.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Response(RpcResponse),
    Notification(RpcNotification),
    Request(RpcRequest),
}

/// Classify a raw JSON body from the server stream.
///
/// Returns `None` for bodies that are valid JSON but not valid JSON-RPC;
/// the caller logs and drops those rather than killing the stream.
pub fn classify_message(body: &str) -> Option<InboundMessage> {
    let value: Value = serde_json::from_str(body).ok()?;
    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();

    match (has_id, has_method) {
        (true, true) => serde_json::from_value(value).ok().map(InboundMessage::Request),
        (true, false) => serde_json::from_value(value).ok().map(InboundMessage::Response),
        (false, true) => serde_json::from_value(value).ok().map(InboundMessage::Notification),
        (false, false) => None,
    }
}

// ---------------------------------------------------------------------------
// Diagnostics payloads
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Severity level of a diagnostic (LSP numeric encoding).
#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

/// Diagnostic code; servers send either a number or a string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DiagnosticCode {
    Number(i64),
    String(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub range: Range,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosticSeverity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<DiagnosticCode>,

    /// Source of the diagnostic (e.g. "ty", "rust-analyzer")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub message: String,
}

/// Params of a `textDocument/publishDiagnostics` notification.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublishDiagnosticsParams {
    pub uri: String,

    /// Document version the diagnostics were computed against, when the
    /// server reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,

    pub diagnostics: Vec<Diagnostic>,
}
