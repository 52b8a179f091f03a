//! JSON-RPC 2.0 frames exchanged with the source network's RPC daemon.
//!
//! Unary calls get exactly one response frame. Streaming calls get one
//! response frame per pushed item, all carrying the id of the request that
//! opened the stream; an error frame ends the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::BridgeTypesError;

/// Protocol version string carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always [`JSONRPC_VERSION`]
    pub jsonrpc: String,
    /// Fully-qualified method, e.g. `ChatService.GCMStream`
    pub method: String,
    /// Method parameters
    pub params: Value,
    /// Correlation id
    pub id: u64,
}

impl RpcRequest {
    /// Build a request frame.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Serialize to the text sent over the websocket.
    pub fn to_text(&self) -> Result<String, BridgeTypesError> {
        serde_json::to_string(self).map_err(BridgeTypesError::FrameEncoding)
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code
    pub code: i64,
    /// Human readable message
    pub message: String,
    /// Optional extra data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

/// A response frame (one per unary call, one per item for streams).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always [`JSONRPC_VERSION`]
    #[serde(default)]
    pub jsonrpc: String,
    /// Id of the request this frame answers; absent on parse errors
    #[serde(default)]
    pub id: Option<u64>,
    /// Result payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// A successful frame.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// A failed frame.
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Parse a frame received over the websocket.
    pub fn from_text(text: &str) -> Result<Self, BridgeTypesError> {
        serde_json::from_str(text).map_err(BridgeTypesError::InvalidFrame)
    }

    /// Split into the result payload or the error object. A frame with
    /// neither yields `null`.
    pub fn into_result(self) -> Result<Value, RpcErrorObject> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = RpcRequest::new(7, "ChatService.AckReceivedGCM", json!({"sequence_id": 3}));
        let text = req.to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "ChatService.AckReceivedGCM");
        assert_eq!(value["params"]["sequence_id"], 3);
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn response_success_and_failure() {
        let ok = RpcResponse::from_text(r#"{"jsonrpc":"2.0","id":1,"result":{"x":1}}"#).unwrap();
        assert_eq!(ok.id, Some(1));
        assert_eq!(ok.into_result().unwrap()["x"], 1);

        let err =
            RpcResponse::from_text(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-1,"message":"boom"}}"#)
                .unwrap();
        let obj = err.into_result().unwrap_err();
        assert_eq!(obj.code, -1);
        assert_eq!(obj.to_string(), "rpc error -1: boom");
    }

    #[test]
    fn empty_result_is_null() {
        let resp = RpcResponse::from_text(r#"{"jsonrpc":"2.0","id":3}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn garbage_frame_is_error() {
        assert!(matches!(
            RpcResponse::from_text("not json"),
            Err(BridgeTypesError::InvalidFrame(_))
        ));
    }
}
