//! Command-line arguments. Every option can also come from the environment
//! (or a `.env` file).

use crate::gateway::uploads::DEFAULT_MAX_UPLOAD_BYTES;
use crate::logging::LogFormat;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "chat-relay",
    version,
    about = "Relays chat messages to an external processor and broadcasts replies over WebSocket"
)]
pub struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Processor endpoint that receives every message
    #[arg(long, env = "RELAY_PROCESSOR_URL")]
    pub processor_url: String,

    /// Path segment of the callback endpoint (`/webhook/<path>`)
    #[arg(long, env = "RELAY_CALLBACK_PATH", default_value = "n8n-response")]
    pub callback_path: String,

    /// Directory for temporary attachment files
    #[arg(long, env = "RELAY_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Per-attachment size limit in bytes
    #[arg(long, env = "RELAY_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Hard timeout for one relay call, in seconds
    #[arg(long, env = "RELAY_TIMEOUT_SECS", default_value_t = 30)]
    pub relay_timeout_secs: u64,

    /// Chat id placed in the outbound envelope
    #[arg(long, env = "RELAY_CHAT_ID", default_value = "web-interface")]
    pub chat_id: String,

    /// Allowed CORS origin (`*` for any)
    #[arg(long, env = "RELAY_CORS_ORIGIN", default_value = "http://localhost:5173")]
    pub cors_origin: String,

    /// Directory of static files served when it exists
    #[arg(long, env = "RELAY_STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Log output format
    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}
