//! # bridge-types
//!
//! Wire format types for the Bison Relay <-> Matrix bridge.
//!
//! This crate provides the foundational types used across all bridge crates:
//! - [`SequenceId`], [`ShortId`], [`SyncCursor`] - Identity and ordering types
//! - [`Category`] and the per-category notifications delivered by the
//!   source network's server-push streams
//! - [`RpcRequest`] / [`RpcResponse`] - JSON-RPC frames spoken with the
//!   source network's client RPC daemon
//! - [`BridgedMessage`] - a chat line decoded from either network
//! - [`BridgeTypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod rpc;

pub use error::BridgeTypesError;
pub use ids::{SequenceId, ShortId, SyncCursor};
pub use messages::{
    BridgedMessage, Category, GcInvite, GcReceivedMsg, GroupMessage, KxCompleted, Network,
    Notification, PostSummary, PrivateMessage, ReceivedGcInvite, ReceivedPm, ReceivedPost,
    ReceivedPostStatus, TipProgressEvent,
};
pub use rpc::{RpcErrorObject, RpcRequest, RpcResponse, JSONRPC_VERSION};
