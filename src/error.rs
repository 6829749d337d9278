//! HTTP-facing errors for the ingest and callback endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Why `POST /api/message` refused a request before relaying it.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("{field} exceeds the {limit} byte upload limit")]
    PayloadTooLarge { field: String, limit: u64 },

    #[error("request body is too large")]
    BodyTooLarge,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::PayloadTooLarge { .. } | IngestError::BodyTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            IngestError::Validation(message) => json!({
                "error": "validation_error",
                "message": message,
            }),
            IngestError::PayloadTooLarge { .. } | IngestError::BodyTooLarge => json!({
                "error": "payload_too_large",
                "message": self.to_string(),
            }),
            IngestError::Internal(e) => {
                tracing::error!(error = %e, "message ingest failed");
                json!({ "error": "Internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}

/// The callback body could not be turned into a reply.
#[derive(Debug, thiserror::Error)]
#[error("undecodable callback body: {0}")]
pub struct CallbackError(#[from] pub crate::protocol::processor::ReplyDecodeError);

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "rejecting processor callback");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Internal server error" })),
        )
            .into_response()
    }
}
