//! Relay gateway - HTTP ingest, processor relay, and WebSocket fan-out.
//!
//! ```text
//!  POST /api/message ──► ingest ──► uploads ──► relay ──► processor
//!                                                 │
//!  POST /webhook/<path> ──► callback ─────┐       │ reply / fallback
//!                                         ▼       ▼
//!                                      broadcast ──► client_mgr ──► /ws clients
//! ```

pub mod broadcast;
pub mod callback;
pub mod client_mgr;
pub mod ingest;
pub mod relay;
pub mod server;
pub mod uploads;
