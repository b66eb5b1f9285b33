//! Correlating `publishDiagnostics` pushes with document updates.
//!
//! After a document version is pushed, the caller registers a waiter for
//! that URI and blocks (with a deadline) until the server's next publish
//! for the URI arrives. Language servers do not analyze synchronously, so
//! the contract is "freshest available answer within the time budget":
//! on timeout the caller gets whatever is cached for the URI, which may
//! be stale or empty.

use crate::lsp::protocol::Diagnostic;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Only one waiter per URI is honored at a time; a second concurrent
/// check on the same file is rejected rather than silently replacing or
/// queuing behind the first.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("a diagnostics check for {uri} is already in flight")]
pub struct BusyError {
    pub uri: String,
}

struct Waiter {
    /// Document version the caller pushed; publishes for older versions
    /// must not resolve this waiter.
    version: i32,
    tx: oneshot::Sender<Vec<Diagnostic>>,
}

struct CacheEntry {
    /// Version the server reported with the publish, when it did.
    version: Option<i32>,
    diagnostics: Vec<Diagnostic>,
}

struct Inner {
    /// Latest publish per URI, updated on every notification whether or
    /// not anyone is waiting. Bounded by the number of distinct files
    /// touched in a session.
    cache: HashMap<String, CacheEntry>,
    waiters: HashMap<String, Waiter>,
}

/// Cache plus single-waiter registry for diagnostics pushes.
pub struct DiagnosticsCorrelator {
    inner: Mutex<Inner>,
}

impl DiagnosticsCorrelator {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { cache: HashMap::new(), waiters: HashMap::new() }) }
    }

    /// Record a publish from the server: update the cache and resolve the
    /// URI's waiter, but only when the publish is not for an older
    /// document version than the waiter pushed. A publish without a
    /// version is treated as current.
    pub fn publish(&self, uri: &str, version: Option<i32>, diagnostics: Vec<Diagnostic>) {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        inner
            .cache
            .insert(uri.to_string(), CacheEntry { version, diagnostics: diagnostics.clone() });

        let resolves = inner
            .waiters
            .get(uri)
            .is_some_and(|waiter| version.map_or(true, |v| v >= waiter.version));
        if resolves {
            if let Some(waiter) = inner.waiters.remove(uri) {
                // Receiver may have gone away (client disconnect); the
                // cache update above already happened, so just drop the
                // send result.
                let _ = waiter.tx.send(diagnostics);
            }
        } else if inner.waiters.contains_key(uri) {
            tracing::debug!("Holding waiter on {uri}: publish is for version {version:?}");
        }
    }

    /// Register a waiter for the next publish on `uri` at or past
    /// `version`.
    ///
    /// Must be called before the document notification is written so a
    /// fast publish cannot slip past unobserved.
    pub fn subscribe(
        &self,
        uri: &str,
        version: i32,
    ) -> Result<oneshot::Receiver<Vec<Diagnostic>>, BusyError> {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        if inner.waiters.contains_key(uri) {
            return Err(BusyError { uri: uri.to_string() });
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(uri.to_string(), Waiter { version, tx });
        Ok(rx)
    }

    /// Wait for the subscribed publish, falling back to the cache when
    /// the deadline elapses or the channel is torn down. The fallback
    /// skips cache entries the server marked as older than `version`, so
    /// a delayed publish for a previous document state is never reported
    /// as the current answer.
    ///
    /// Never errors and never hangs: a timeout is the defined best-effort
    /// answer, not a failure.
    pub async fn wait(
        &self,
        uri: &str,
        version: i32,
        rx: oneshot::Receiver<Vec<Diagnostic>>,
        deadline: Duration,
    ) -> Vec<Diagnostic> {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(diagnostics)) => diagnostics,
            // Timeout, or sender dropped during shutdown.
            Ok(Err(_)) | Err(_) => {
                self.cancel(uri);
                tracing::debug!("No publish for {uri} within {deadline:?}, returning cached");
                self.cached_at_least(uri, version)
            }
        }
    }

    /// Cached diagnostics for a URI, unless the cache entry is known to
    /// predate `version`.
    fn cached_at_least(&self, uri: &str, version: i32) -> Vec<Diagnostic> {
        let inner = self.inner.lock().expect("correlator mutex poisoned");
        match inner.cache.get(uri) {
            Some(entry) if entry.version.map_or(true, |v| v >= version) => {
                entry.diagnostics.clone()
            }
            _ => Vec::new(),
        }
    }

    /// Resolve every outstanding waiter with whatever is cached for its
    /// URI, regardless of version. Called when the server dies so no
    /// check is left pending.
    pub fn resolve_all_with_cache(&self) {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        let waiters = std::mem::take(&mut inner.waiters);
        for (uri, waiter) in waiters {
            let cached =
                inner.cache.get(&uri).map(|entry| entry.diagnostics.clone()).unwrap_or_default();
            let _ = waiter.tx.send(cached);
        }
    }

    /// Drop the waiter for a URI without resolving it, e.g. when the
    /// notification it was registered for could not be sent.
    pub fn cancel(&self, uri: &str) {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        inner.waiters.remove(uri);
    }
}

impl Default for DiagnosticsCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
