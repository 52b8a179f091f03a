//! Source network RPC abstraction.
//!
//! The source network is reached through a client RPC daemon. This module
//! defines the operations the bridge needs from it:
//! - `open_stream()` opens a per-category server-push stream
//! - `ack()` acknowledges a received sequence id
//! - `send_gc()` posts a message to a group chat
//! - `accept_gc_invite()` joins a group chat after an invitation
//!
//! [`WsSource`] speaks JSON-RPC over a TLS websocket; [`MockSource`] is an
//! in-memory server for tests.

mod mock;
mod ws;

pub use mock::MockSource;
pub use ws::{SourceTlsConfig, WsDriver, WsSource};

use async_trait::async_trait;
use bridge_types::{BridgeTypesError, Category, RpcErrorObject, SequenceId};
use serde_json::Value;
use thiserror::Error;

/// Source RPC errors.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The shared shutdown signal fired.
    #[error("cancelled")]
    Cancelled,

    /// The RPC connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// Could not connect or configure the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The daemon answered with an error frame.
    #[error("{0}")]
    Remote(RpcErrorObject),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Frame(#[from] BridgeTypesError),

    /// A result payload did not match the expected type.
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Websocket transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// True if the error was caused by shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }
}

/// An open server-push stream yielding raw JSON items.
#[async_trait]
pub trait RawStream: Send {
    /// Receive the next item. Blocks until one arrives or the stream ends.
    async fn recv(&mut self) -> Result<Value, RpcError>;
}

/// Operations consumed from the source network.
#[async_trait]
pub trait SourceRpc: Send + Sync {
    /// Open the stream for `category`, replaying unacknowledged items from
    /// `unacked_from` (inclusive).
    async fn open_stream(
        &self,
        category: Category,
        unacked_from: SequenceId,
    ) -> Result<Box<dyn RawStream>, RpcError>;

    /// Acknowledge `seq` on `category`. Idempotent.
    async fn ack(&self, category: Category, seq: SequenceId) -> Result<(), RpcError>;

    /// Send `msg` to the group chat `gc`.
    async fn send_gc(&self, gc: &str, msg: &str) -> Result<(), RpcError>;

    /// Accept a group chat invitation.
    async fn accept_gc_invite(&self, invite_id: u64) -> Result<(), RpcError>;
}

/// Stream method for a category.
pub fn stream_method(category: Category) -> &'static str {
    match category {
        Category::GroupMessages => "ChatService.GCMStream",
        Category::Invites => "GCService.ReceivedGCInvites",
        Category::PrivateMessages => "ChatService.PMStream",
        Category::KxCompleted => "ChatService.KXStream",
        Category::Posts => "PostsService.PostsStream",
        Category::PostStatus => "PostsService.PostsStatusStream",
        Category::TipProgress => "PaymentsService.TipProgress",
    }
}

/// Acknowledgment method for a category.
pub fn ack_method(category: Category) -> &'static str {
    match category {
        Category::GroupMessages => "ChatService.AckReceivedGCM",
        Category::Invites => "GCService.AckReceivedGCInvites",
        Category::PrivateMessages => "ChatService.AckReceivedPM",
        Category::KxCompleted => "ChatService.AckKXCompleted",
        Category::Posts => "PostsService.AckReceivedPost",
        Category::PostStatus => "PostsService.AckReceivedPostStatus",
        Category::TipProgress => "PaymentsService.AckTipProgress",
    }
}

/// Group chat send method.
pub const SEND_GC_METHOD: &str = "GCService.GCM";

/// Invite accept method.
pub const ACCEPT_GC_INVITE_METHOD: &str = "GCService.AcceptGCInvite";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn methods_are_unique_per_category() {
        let streams: HashSet<_> = Category::ALL.iter().map(|c| stream_method(*c)).collect();
        let acks: HashSet<_> = Category::ALL.iter().map(|c| ack_method(*c)).collect();
        assert_eq!(streams.len(), 7);
        assert_eq!(acks.len(), 7);
        assert!(streams.is_disjoint(&acks));
    }

    #[test]
    fn only_cancelled_is_cancelled() {
        assert!(RpcError::Cancelled.is_cancelled());
        assert!(!RpcError::ConnectionClosed.is_cancelled());
        assert!(!RpcError::Transport("reset".into()).is_cancelled());
    }
}
