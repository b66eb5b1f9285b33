//! Per-URI open/version tracking for documents pushed to the server.
//!
//! The language server uses version numbers to discard stale edits, so
//! versions are strictly increasing per URI for the daemon's lifetime.
//! Documents are never closed; the daemon is short-lived and restarted
//! per session.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Which LSP notification the caller must send for this update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentAction {
    /// First time this URI is seen: send `textDocument/didOpen`.
    Open,
    /// Already open: send `textDocument/didChange`.
    Change,
}

/// Resolved document identity for one update.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub action: DocumentAction,
}

struct DocumentEntry {
    language_id: String,
    version: i32,
}

/// Tracks which URIs are open and at what version.
pub struct DocumentStore {
    default_language: String,
    docs: Mutex<HashMap<String, DocumentEntry>>,
}

impl DocumentStore {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self { default_language: default_language.into(), docs: Mutex::new(HashMap::new()) }
    }

    /// Register an update for `path`, returning the URI, the version to
    /// send, and whether this is a fresh open or a change.
    pub fn open_or_update(&self, path: &Path) -> Result<DocumentHandle> {
        let uri = file_uri(path)?;
        let mut docs = self.docs.lock().expect("document store mutex poisoned");

        if let Some(entry) = docs.get_mut(&uri) {
            entry.version += 1;
            return Ok(DocumentHandle {
                uri,
                language_id: entry.language_id.clone(),
                version: entry.version,
                action: DocumentAction::Change,
            });
        }

        let language_id = language_id_for(path, &self.default_language);
        docs.insert(uri.clone(), DocumentEntry { language_id: language_id.clone(), version: 1 });
        Ok(DocumentHandle { uri, language_id, version: 1, action: DocumentAction::Open })
    }
}

/// Build a `file://` URI from a path, canonicalizing when possible so two
/// spellings of the same file share one document entry.
fn file_uri(path: &Path) -> Result<String> {
    let absolute = match std::fs::canonicalize(path) {
        Ok(p) => p,
        // File may not exist on disk yet; the content travels over the
        // socket. Fall back to lexical absolutization.
        Err(_) => {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir().context("Failed to resolve current directory")?.join(path)
            }
        }
    };
    Ok(format!("file://{}", absolute.display()))
}

/// Map a file extension to an LSP language id.
fn language_id_for(path: &Path, fallback: &str) -> String {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "java" => "java",
        "rb" => "ruby",
        "json" => "json",
        "toml" => "toml",
        "yml" | "yaml" => "yaml",
        "md" => "markdown",
        _ => fallback,
    }
    .to_string()
}
