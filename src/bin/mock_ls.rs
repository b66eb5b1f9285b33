//! A scriptable stand-in language server for integration tests.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout. Diagnostics
//! are derived from the document text itself so tests can control the
//! outcome by what they send:
//!
//! - every line containing the token `ERR` yields an error diagnostic
//!   spanning the token
//! - the diagnostic `code` carries the document version from the last
//!   didOpen/didChange, so tests can observe version increments
//! - text containing `CRASH` makes the process exit, simulating a
//!   language server that dies mid-session
//!
//! No tokio: blocking reads plus `std::thread` for delayed publishes.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "mock-ls")]
struct Args {
    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    publish_delay_ms: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_publish: bool,
}

type Writer = Arc<Mutex<std::io::Stdout>>;

fn main() {
    let args = Args::parse();
    let writer = Arc::new(Mutex::new(std::io::stdout()));
    let mut stdin = std::io::stdin().lock();

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stdin.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }

        while let Some((body, consumed)) = take_frame(&buffer) {
            buffer.drain(..consumed);
            let Ok(message) = serde_json::from_str::<Value>(&body) else {
                continue;
            };
            handle_message(&args, &writer, &message);
        }
    }
}

fn handle_message(args: &Args, writer: &Writer, message: &Value) {
    let method = message.get("method").and_then(Value::as_str);
    let id = message.get("id");

    match (method, id) {
        (Some("initialize"), Some(id)) => {
            send(
                writer,
                &json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "capabilities": {
                            "textDocumentSync": { "openClose": true, "change": 1 },
                        }
                    }
                }),
            );
        }
        (Some("shutdown"), Some(id)) => {
            send(writer, &json!({ "jsonrpc": "2.0", "id": id, "result": null }));
        }
        (Some("exit"), None) => std::process::exit(0),
        (Some("textDocument/didOpen"), None) => {
            let params = &message["params"]["textDocument"];
            let uri = params["uri"].as_str().unwrap_or_default().to_string();
            let text = params["text"].as_str().unwrap_or_default().to_string();
            let version = params["version"].as_i64().unwrap_or(0);
            analyze(args, writer, uri, &text, version);
        }
        (Some("textDocument/didChange"), None) => {
            let params = &message["params"];
            let uri = params["textDocument"]["uri"].as_str().unwrap_or_default().to_string();
            let version = params["textDocument"]["version"].as_i64().unwrap_or(0);
            let text = params["contentChanges"]
                .as_array()
                .and_then(|changes| changes.last())
                .and_then(|change| change["text"].as_str())
                .unwrap_or_default()
                .to_string();
            analyze(args, writer, uri, &text, version);
        }
        (Some(_), Some(id)) => {
            // Unknown request: answer so the client is not left hanging.
            send(writer, &json!({ "jsonrpc": "2.0", "id": id, "result": null }));
        }
        _ => {}
    }
}

fn analyze(args: &Args, writer: &Writer, uri: String, text: &str, version: i64) {
    if text.contains("CRASH") {
        std::process::exit(1);
    }
    if args.no_publish {
        return;
    }

    let diagnostics = diagnostics_for(text, version);
    let delay = args.publish_delay_ms;
    let writer = Arc::clone(writer);

    if delay > 0 {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay));
            publish(&writer, &uri, version, &diagnostics);
        });
    } else {
        publish(&writer, &uri, version, &diagnostics);
    }
}

fn diagnostics_for(text: &str, version: i64) -> Vec<Value> {
    let mut diagnostics = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        if let Some(col) = line.find("ERR") {
            diagnostics.push(json!({
                "range": {
                    "start": { "line": line_idx, "character": col },
                    "end": { "line": line_idx, "character": col + 3 }
                },
                "severity": 1,
                "code": version,
                "source": "mock-ls",
                "message": "found forbidden token"
            }));
        }
    }
    diagnostics
}

fn publish(writer: &Writer, uri: &str, version: i64, diagnostics: &[Value]) {
    send(
        writer,
        &json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "version": version, "diagnostics": diagnostics }
        }),
    );
}

fn send(writer: &Writer, value: &Value) {
    let Ok(body) = serde_json::to_string(value) else { return };
    let Ok(mut out) = writer.lock() else { return };
    let _ = write!(out, "Content-Length: {}\r\n\r\n{body}", body.len());
    let _ = out.flush();
}

fn take_frame(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line.split_once(':').and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;
    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_flag_err_lines() {
        let diagnostics = diagnostics_for("ok line\nhas ERR here\n", 3);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0]["range"]["start"]["line"], 1);
        assert_eq!(diagnostics[0]["range"]["start"]["character"], 4);
        assert_eq!(diagnostics[0]["range"]["end"]["character"], 7);
        assert_eq!(diagnostics[0]["code"], 3);
        assert_eq!(diagnostics[0]["severity"], 1);
    }

    #[test]
    fn test_clean_text_has_no_diagnostics() {
        assert!(diagnostics_for("all good\n", 1).is_empty());
    }

    #[test]
    fn test_take_frame_split_input() {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let framed = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let bytes = framed.as_bytes();

        // Incomplete header, then incomplete body, then the whole thing.
        assert!(take_frame(&bytes[..5]).is_none());
        assert!(take_frame(&bytes[..bytes.len() - 1]).is_none());
        let (parsed, consumed) = take_frame(bytes).expect("complete frame");
        assert_eq!(parsed, body);
        assert_eq!(consumed, bytes.len());
    }
}
