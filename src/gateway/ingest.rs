//! Message ingest - `POST /api/message`.
//!
//! Parses the multipart request, stores attachments, validates, then hands the
//! message to a tracked background task that relays it and broadcasts the
//! outcome. The HTTP caller only learns that the hand-off happened.

use crate::error::IngestError;
use crate::gateway::relay::InboundMessage;
use crate::gateway::server::RelayState;
use crate::gateway::uploads::{StoreError, UploadStore};
use crate::protocol::client::ReplyPayload;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const FIELD_TEXT: &str = "text";
pub const FIELD_AUDIO: &str = "audio";
pub const FIELD_IMAGE: &str = "image";

/// POST /api/message
pub async fn message_handler(
    State(state): State<Arc<RelayState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, IngestError> {
    let multipart = multipart.map_err(|e| {
        IngestError::Validation(format!("expected a multipart body: {}", e.body_text()))
    })?;

    let message = parse_message(&state.uploads, multipart).await?;
    if message.is_empty() {
        return Err(IngestError::Validation(
            "message must contain text, audio or image".to_string(),
        ));
    }

    info!(
        has_text = message.text.is_some(),
        has_audio = message.audio.is_some(),
        has_image = message.image.is_some(),
        "received message"
    );

    dispatch(&state, message);

    Ok(Json(json!({
        "success": true,
        "message": "Message received",
    })))
}

/// Read every field. Any error drops what was stored so far, which
/// deletes those files before anything is relayed.
pub async fn parse_message(
    uploads: &UploadStore,
    mut multipart: Multipart,
) -> Result<InboundMessage, IngestError> {
    let mut message = InboundMessage::default();
    let mut seen_text = false;
    let mut seen_audio = false;
    let mut seen_image = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FIELD_TEXT => {
                if std::mem::replace(&mut seen_text, true) {
                    return Err(duplicate(FIELD_TEXT));
                }
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    message.text = Some(text);
                }
            }
            FIELD_AUDIO | FIELD_IMAGE => {
                let seen = if name == FIELD_AUDIO {
                    &mut seen_audio
                } else {
                    &mut seen_image
                };
                if std::mem::replace(seen, true) {
                    return Err(duplicate(&name));
                }

                let original_name = field.file_name().unwrap_or(&name).to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let stored = uploads
                    .store(&name, &original_name, &mime_type, Box::pin(field))
                    .await
                    .map_err(|e| store_error(&name, e))?;

                if name == FIELD_AUDIO {
                    message.audio = stored;
                } else {
                    message.image = stored;
                }
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Ok(message)
}

/// Relay in the background and broadcast exactly one payload.
pub fn dispatch(state: &Arc<RelayState>, message: InboundMessage) {
    let relay = state.relay.clone();
    let broadcaster = state.broadcaster.clone();

    state.tasks.spawn(async move {
        let payload = match AssertUnwindSafe(relay.relay(&message)).catch_unwind().await {
            Ok(payload) => payload,
            Err(_) => {
                error!("relay panicked, broadcasting fallback");
                ReplyPayload::fallback()
            }
        };
        // Attachments are released as soon as the relay call is over.
        message.release().await;
        broadcaster.broadcast(&payload);
    });
}

fn duplicate(field: &str) -> IngestError {
    IngestError::Validation(format!("field `{}` may appear at most once", field))
}

fn multipart_error(e: MultipartError) -> IngestError {
    classify_multipart(e.status(), e.body_text())
}

fn classify_multipart(status: StatusCode, detail: String) -> IngestError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        IngestError::BodyTooLarge
    } else {
        IngestError::Validation(format!("malformed multipart body: {}", detail))
    }
}

fn store_error(field: &str, e: StoreError) -> IngestError {
    match e {
        StoreError::TooLarge { limit } => IngestError::PayloadTooLarge {
            field: field.to_string(),
            limit,
        },
        StoreError::Read(source) => match source.downcast_ref::<MultipartError>() {
            Some(me) => classify_multipart(me.status(), me.body_text()),
            None => IngestError::Validation(format!("failed to read `{}`: {}", field, source)),
        },
        StoreError::Io(io) => IngestError::Internal(
            anyhow::Error::new(io).context(format!("failed to store `{}`", field)),
        ),
    }
}
