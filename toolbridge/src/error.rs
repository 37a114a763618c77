//! Error types for the tool bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to spawn tool server: {0}")]
    Spawn(String),

    #[error("bridge is not running")]
    NotRunning,

    #[error("bridge is already started")]
    AlreadyRunning,

    #[error("bridge is not ready: handshake has not completed")]
    NotReady,

    #[error("tool server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("tool call failed: {0}")]
    ToolFailed(String),

    #[error("tool server process crashed: {0}")]
    Crashed(String),

    #[error("bridge stopped")]
    Stopped,

    #[error("response channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
