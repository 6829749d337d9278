//! Wire formats: push frames to clients and the processor exchange.

pub mod client;
pub mod processor;
