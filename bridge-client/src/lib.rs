//! # bridge-client
//!
//! Network clients and stream engines for the Bison Relay <-> Matrix bridge.
//!
//! ## Components
//!
//! - **Source RPC**: JSON-RPC over a client-authenticated TLS websocket
//!   ([`WsSource`]), or in memory ([`MockSource`])
//! - **SequenceAckStream**: one reconnecting, acknowledging consumer per
//!   notification category
//! - **Target API**: Matrix client-server calls over HTTP ([`MatrixClient`]),
//!   or scripted ([`MockTarget`])
//! - **CursorSyncPoller**: long-poll sync loop with a persisted cursor
//!
//! ## Example
//!
//! ```ignore
//! use bridge_client::{SequenceAckStream, WsSource};
//! use bridge_types::GcReceivedMsg;
//!
//! let (source, driver) = WsSource::connect(&tls).await?;
//! tokio::spawn(driver.run(token.clone()));
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel::<GcReceivedMsg>(16);
//! let stream = SequenceAckStream::new(Arc::new(source), token);
//! tokio::spawn(async move { stream.run(tx).await });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor_store;
pub mod files;
pub mod poller;
pub mod source;
pub mod stream;
pub mod target;

pub use cursor_store::{CursorStore, CursorStoreError, FileCursorStore, MemoryCursorStore, CURSOR_FILE};
pub use poller::{CursorSyncPoller, PollerError, DEFAULT_LONG_BACKOFF, DEFAULT_SHORT_BACKOFF};
pub use source::{MockSource, RpcError, SourceRpc, SourceTlsConfig, WsDriver, WsSource};
pub use stream::{SequenceAckStream, StreamError, DEFAULT_STREAM_BACKOFF};
pub use target::{
    ImageInfo, MatrixClient, MatrixConfig, MockTarget, RoomMessageContent, TargetApi, TargetError,
    MAX_DOWNLOAD_BYTES,
};
