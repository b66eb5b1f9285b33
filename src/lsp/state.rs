//! Language-server session lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of the supervised language-server session.
///
/// Transitions only move forward: `NotStarted → Starting → Initializing →
/// Ready → ShuttingDown → Stopped`. An unexpected subprocess exit jumps
/// straight to `Stopped` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    /// Subprocess spawned, stdio being wired up.
    Starting,
    /// `initialize` sent, waiting for the handshake to complete.
    Initializing,
    /// Handshake done; the control socket may serve `check` commands.
    Ready,
    /// LSP `shutdown`/`exit` in flight.
    ShuttingDown,
    Stopped,
}

impl SessionState {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Starting,
            2 => Self::Initializing,
            3 => Self::Ready,
            4 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Starting => 1,
            Self::Initializing => 2,
            Self::Ready => 3,
            Self::ShuttingDown => 4,
            Self::Stopped => 5,
        }
    }
}

/// Shared, atomically updated view of the session state.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SessionState::NotStarted.as_u8())))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: SessionState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
