//! Error types for bridge wire types.

use thiserror::Error;

/// Errors that can occur while building or decoding bridge wire types.
#[derive(Debug, Error)]
pub enum BridgeTypesError {
    /// A short identity could not be decoded to 32 bytes.
    #[error("invalid short id: {0}")]
    InvalidShortId(String),

    /// A JSON-RPC frame could not be decoded.
    #[error("invalid rpc frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    /// A JSON-RPC frame could not be encoded.
    #[error("rpc frame encoding failed: {0}")]
    FrameEncoding(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BridgeTypesError::InvalidShortId("zz".into());
        assert_eq!(err.to_string(), "invalid short id: zz");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BridgeTypesError>();
    }
}
