//! chat-relay - relays multi-modal chat messages to an external processor
//! and broadcasts its replies to every connected WebSocket client.
//!
//! This library provides the server used by the `chat-relay` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod protocol;

#[cfg(test)]
mod test_utils;

// Re-export Args for the binary
pub use cli::Args;
