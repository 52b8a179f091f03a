//! Error types for brbridge.

use bridge_client::{CursorStoreError, PollerError, RpcError, StreamError, TargetError};

/// Errors that stop the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Allow-list store error.
    #[error("allow-list error: {0}")]
    AllowList(#[from] crate::allowlist::AllowListError),

    /// Cursor store error.
    #[error("cursor store error: {0}")]
    CursorStore(#[from] CursorStoreError),

    /// Source connection error.
    #[error("source error: {0}")]
    Source(#[from] RpcError),

    /// Target API error.
    #[error("target error: {0}")]
    Target(#[from] TargetError),

    /// A notification stream ended.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// The target sync loop ended.
    #[error("sync error: {0}")]
    Poller(#[from] PollerError),

    /// A relay direction ended.
    #[error("relay error: {0}")]
    Relay(#[from] crate::relay::RelayError),

    /// Logging could not be set up.
    #[error("logging error: {0}")]
    Logging(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True if the error was caused by shutdown.
    pub fn is_cancelled(&self) -> bool {
        match self {
            BridgeError::Source(e) => e.is_cancelled(),
            BridgeError::Target(e) => e.is_cancelled(),
            BridgeError::Stream(e) => e.is_cancelled(),
            BridgeError::Poller(e) => e.is_cancelled(),
            BridgeError::Relay(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
