//! LSP session plumbing: framing, JSON-RPC channel, document tracking,
//! and diagnostics correlation for one supervised language server.

pub mod client;
pub mod diagnostics;
pub mod documents;
pub mod framing;
pub mod protocol;
pub mod server;
pub mod state;
