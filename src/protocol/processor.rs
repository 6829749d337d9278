//! Protocol between the relay and the external processor.
//!
//! Outbound: a multipart POST whose `data` part holds a JSON [`Envelope`].
//! Inbound: a JSON object carrying `text` (or `output`) and optionally `audio`,
//! received either as the synchronous HTTP reply or on the callback endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope wrapped around every outbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message: EnvelopeMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMessage {
    pub chat: ChatRef,
    /// Empty string when the user sent attachments only
    pub text: String,
    pub voice: Option<FileRef>,
    pub photo: Option<Vec<FileRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: String,
}

/// Reference to an attachment part by its stored file name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

impl Envelope {
    pub fn new(
        chat_id: &str,
        text: Option<&str>,
        voice_file: Option<&str>,
        photo_file: Option<&str>,
    ) -> Self {
        Self {
            message: EnvelopeMessage {
                chat: ChatRef {
                    id: chat_id.to_string(),
                },
                text: text.unwrap_or_default().to_string(),
                voice: voice_file.map(|f| FileRef {
                    file_id: f.to_string(),
                }),
                photo: photo_file.map(|f| {
                    vec![FileRef {
                        file_id: f.to_string(),
                    }]
                }),
            },
        }
    }
}

/// Reply fields extracted from a processor body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorReply {
    pub text: Option<String>,
    pub audio: Option<String>,
}

/// Why a processor body could not be read as a reply
#[derive(Debug, thiserror::Error)]
pub enum ReplyDecodeError {
    #[error("reply is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reply is not a JSON object (got {0})")]
    NotAnObject(&'static str),
}

impl ProcessorReply {
    /// Parse a raw body. Fails on anything that is not a JSON object.
    pub fn from_slice(body: &[u8]) -> Result<Self, ReplyDecodeError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(&value)
    }

    /// `text` wins over `output`; empty strings count as missing.
    pub fn from_value(value: &Value) -> Result<Self, ReplyDecodeError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ReplyDecodeError::NotAnObject(json_kind(value)))?;

        let field = |name: &str| {
            obj.get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            text: field("text").or_else(|| field("output")),
            audio: field("audio"),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
