//! Relay server configuration.

use crate::cli::Args;
use crate::gateway::relay::DEFAULT_RELAY_TIMEOUT;
use crate::gateway::uploads::DEFAULT_MAX_UPLOAD_BYTES;
use std::path::PathBuf;
use std::time::Duration;

/// Headroom for the text field and multipart framing
const BODY_OVERHEAD_BYTES: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("processor URL must not be empty")]
    MissingProcessorUrl,
    #[error("processor URL must start with http:// or https:// (got {0})")]
    InvalidProcessorUrl(String),
    #[error("relay timeout must be greater than zero")]
    ZeroTimeout,
    #[error("upload limit must be greater than zero")]
    ZeroUploadLimit,
    #[error("invalid callback path: {0:?}")]
    InvalidCallbackPath(String),
}

/// Validated server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    pub processor_url: String,
    /// Path segment(s) after `/webhook/`, without leading or trailing slashes
    pub callback_path: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub relay_timeout: Duration,
    pub chat_id: String,
    pub cors_origin: String,
    pub static_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3001,
            processor_url: String::new(),
            callback_path: "n8n-response".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            chat_id: "web-interface".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            static_dir: Some(PathBuf::from("public")),
        }
    }
}

impl RelayConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let config = Self {
            bind: args.bind.clone(),
            port: args.port,
            processor_url: args.processor_url.trim().to_string(),
            callback_path: args.callback_path.trim_matches('/').to_string(),
            upload_dir: args.upload_dir.clone(),
            max_upload_bytes: args.max_upload_bytes,
            relay_timeout: Duration::from_secs(args.relay_timeout_secs),
            chat_id: args.chat_id.clone(),
            cors_origin: args.cors_origin.clone(),
            static_dir: Some(args.static_dir.clone()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor_url.is_empty() {
            return Err(ConfigError::MissingProcessorUrl);
        }
        if !(self.processor_url.starts_with("http://") || self.processor_url.starts_with("https://"))
        {
            return Err(ConfigError::InvalidProcessorUrl(self.processor_url.clone()));
        }
        if self.relay_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ZeroUploadLimit);
        }
        let path = &self.callback_path;
        if path.trim_matches('/').is_empty()
            || path.contains(['{', '}', '*', '?', '#'])
            || path
                .split('/')
                .any(|segment| segment.is_empty() || segment.starts_with(':'))
        {
            return Err(ConfigError::InvalidCallbackPath(path.clone()));
        }
        Ok(())
    }

    /// Route the processor posts callbacks to
    pub fn callback_route(&self) -> String {
        format!("/webhook/{}", self.callback_path)
    }

    /// Whole-request limit for `/api/message`: two attachments plus headroom
    pub fn max_body_bytes(&self) -> usize {
        self.max_upload_bytes
            .saturating_mul(2)
            .saturating_add(BODY_OVERHEAD_BYTES)
            .try_into()
            .unwrap_or(usize::MAX)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
