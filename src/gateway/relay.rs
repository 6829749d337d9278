//! Relay client - forwards one message to the external processor over HTTP.
//!
//! One attempt per message, bounded by a hard timeout. Every failure mode is
//! downgraded to the fallback [`ReplyPayload`] so the caller always has
//! something to broadcast.

use crate::gateway::uploads::Attachment;
use crate::protocol::client::ReplyPayload;
use crate::protocol::processor::{Envelope, ProcessorReply, ReplyDecodeError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::{Duration, Instant};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Default hard timeout for one relay call
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// A message accepted by ingest. Dropping it releases its attachments.
#[derive(Debug, Default)]
pub struct InboundMessage {
    pub text: Option<String>,
    pub audio: Option<Attachment>,
    pub image: Option<Attachment>,
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.audio.is_none() && self.image.is_none()
    }

    /// Delete both attachment files without blocking the runtime
    pub async fn release(self) {
        if let Some(audio) = self.audio {
            audio.release().await;
        }
        if let Some(image) = self.image {
            image.release().await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("processor did not answer within {0:?}")]
    Timeout(Duration),

    #[error("request to processor failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("processor answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("undecodable processor reply: {0}")]
    Decode(#[from] ReplyDecodeError),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to open attachment: {0}")]
    Attachment(#[source] std::io::Error),
}

/// Anything that can turn a message into a reply.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Never fails: errors come back as an error payload.
    async fn relay(&self, message: &InboundMessage) -> ReplyPayload;
}

/// HTTP client for the external processor endpoint
pub struct ProcessorClient {
    http: reqwest::Client,
    endpoint: String,
    chat_id: String,
    timeout: Duration,
}

impl ProcessorClient {
    pub fn new(endpoint: &str, chat_id: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            chat_id: chat_id.to_string(),
            timeout,
        })
    }

    /// One attempt, no timeout applied here
    async fn send(&self, message: &InboundMessage) -> Result<ProcessorReply, RelayError> {
        let form = self.build_form(message).await?;
        let response = self.http.post(&self.endpoint).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status));
        }

        let body = response.bytes().await?;
        Ok(ProcessorReply::from_slice(&body)?)
    }

    async fn build_form(&self, message: &InboundMessage) -> Result<Form, RelayError> {
        let voice = message.audio.as_ref().map(Attachment::file_name);
        let photo = message.image.as_ref().map(Attachment::file_name);
        let envelope = Envelope::new(
            &self.chat_id,
            message.text.as_deref(),
            voice.as_deref(),
            photo.as_deref(),
        );

        let mut form = Form::new().text("data", serde_json::to_string(&envelope)?);
        if let Some(audio) = &message.audio {
            form = form.part("audio", file_part(audio).await?);
        }
        if let Some(image) = &message.image {
            form = form.part("image", file_part(image).await?);
        }
        Ok(form)
    }
}

/// Stream the attachment from disk rather than buffering it
async fn file_part(attachment: &Attachment) -> Result<Part, RelayError> {
    let file = tokio::fs::File::open(&attachment.temp_path)
        .await
        .map_err(RelayError::Attachment)?;
    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    let part = Part::stream_with_length(body, attachment.size_bytes)
        .file_name(attachment.original_name.clone())
        .mime_str(&attachment.mime_type)?;
    Ok(part)
}

#[async_trait]
impl Relay for ProcessorClient {
    async fn relay(&self, message: &InboundMessage) -> ReplyPayload {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(self.timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => {
                info!(elapsed_ms, has_audio = reply.audio.is_some(), "processor replied");
                debug!(text = ?reply.text, "processor reply text");
                ReplyPayload::success(reply.text, reply.audio)
            }
            Err(e) => {
                warn!(elapsed_ms, error = %e, endpoint = %self.endpoint, "relay failed");
                ReplyPayload::fallback()
            }
        }
    }
}
