//! Callback receiver - out-of-band replies posted by the processor.
//!
//! No correlation with earlier relay calls: every accepted callback is
//! broadcast to all current connections.

use crate::error::CallbackError;
use crate::gateway::server::RelayState;
use crate::protocol::client::ReplyPayload;
use crate::protocol::processor::ProcessorReply;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// POST /webhook/<callback path>
pub async fn callback_handler(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> Result<Json<Value>, CallbackError> {
    let reply = ProcessorReply::from_slice(&body)?;

    let payload = ReplyPayload::success(reply.text, reply.audio);
    let report = state.broadcaster.broadcast(&payload);
    info!(
        delivered = report.delivered,
        failed = report.failed,
        "forwarded processor callback"
    );

    Ok(Json(json!({ "success": true })))
}
