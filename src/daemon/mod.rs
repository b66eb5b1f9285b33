pub mod client;
pub mod info;
pub mod protocol;
pub mod server;
