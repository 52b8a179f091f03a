//! Target network (Matrix) abstraction.
//!
//! [`TargetApi`] lists the client-server API calls the bridge makes.
//! [`MatrixClient`] implements them over HTTP; [`MockTarget`] records calls
//! and replays scripted sync responses for tests.

mod matrix;
mod mock;

pub use matrix::{MatrixClient, MatrixConfig};
pub use mock::MockTarget;

use async_trait::async_trait;
use bridge_types::SyncCursor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Largest attachment fetched from the target network.
pub const MAX_DOWNLOAD_BYTES: usize = 1024 * 1024;

/// Server-side wait requested on incremental syncs.
pub const SYNC_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Target API errors.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The shared shutdown signal fired.
    #[error("cancelled")]
    Cancelled,

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request could not be completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Downloaded content exceeded the limit.
    #[error("content is larger than {limit} bytes")]
    TooLarge {
        /// Byte limit
        limit: usize,
    },

    /// Not an `mxc://server/media` reference.
    #[error("invalid content uri {0:?}")]
    InvalidContentUri(String),

    /// The upload response carried no content uri.
    #[error("content_uri on upload response is empty")]
    MissingContentUri,

    /// The homeserver URL could not be used.
    #[error("invalid homeserver url: {0}")]
    InvalidUrl(String),
}

impl TargetError {
    /// True if the error was caused by shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TargetError::Cancelled)
    }

    /// True for non-2xx responses.
    pub fn is_status(&self) -> bool {
        matches!(self, TargetError::Status { .. })
    }
}

/// Reply to a password login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginResponse {
    /// Fully-qualified user id
    pub user_id: String,
    /// Bearer token for subsequent calls
    pub access_token: String,
    /// Device id assigned to the session
    pub device_id: String,
}

/// Reply to a sync request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncResponse {
    /// Cursor for the next sync
    pub next_batch: String,
    /// Room updates
    pub rooms: SyncRooms,
}

/// Room section of a sync reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRooms {
    /// Joined rooms by room id
    pub join: BTreeMap<String, JoinedRoom>,
}

/// Updates for one joined room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinedRoom {
    /// New timeline events
    pub timeline: Timeline,
}

/// Timeline slice of a joined room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeline {
    /// Events in arrival order
    pub events: Vec<RoomEvent>,
}

/// A timeline event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomEvent {
    /// Event id
    pub event_id: String,
    /// Sender user id
    pub sender: String,
    /// Server timestamp in milliseconds
    pub origin_server_ts: i64,
    /// Event type, e.g. `m.room.message`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event content
    pub content: EventContent,
}

/// Content of message and membership events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventContent {
    /// Message text (or file name for attachments)
    pub body: String,
    /// Message type, e.g. `m.text`, `m.image`
    pub msgtype: String,
    /// Membership state for `m.room.member`
    pub membership: String,
    /// Display name for `m.room.member`
    pub displayname: Option<String>,
    /// Content reference for attachments
    pub url: String,
    /// Attachment metadata
    pub info: Option<ImageInfo>,
}

/// Attachment metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageInfo {
    /// Width in pixels
    pub w: u32,
    /// Height in pixels
    pub h: u32,
    /// Size in bytes
    pub size: u64,
    /// MIME type
    pub mimetype: String,
}

/// Outgoing `m.room.message` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessageContent {
    /// `m.text` or `m.image`
    pub msgtype: String,
    /// Text, or file name for images
    pub body: String,
    /// Content reference for images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Image metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ImageInfo>,
}

impl RoomMessageContent {
    /// A plain text message.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.text".to_string(),
            body: body.into(),
            url: None,
            info: None,
        }
    }

    /// An image referencing uploaded content.
    pub fn image(filename: impl Into<String>, content_uri: impl Into<String>, info: ImageInfo) -> Self {
        Self {
            msgtype: "m.image".to_string(),
            body: filename.into(),
            url: Some(content_uri.into()),
            info: Some(info),
        }
    }

    /// True for `m.image`.
    pub fn is_image(&self) -> bool {
        self.msgtype == "m.image"
    }
}

/// Split `mxc://server/media` into `(server, media)`.
pub fn parse_content_uri(uri: &str) -> Result<(&str, &str), TargetError> {
    let invalid = || TargetError::InvalidContentUri(uri.to_string());
    let rest = uri.strip_prefix("mxc://").ok_or_else(invalid)?;
    let (server, media) = rest.split_once('/').ok_or_else(invalid)?;
    if server.is_empty() || media.is_empty() || media.contains('/') {
        return Err(invalid());
    }
    Ok((server, media))
}

/// Client-server API calls used by the bridge.
#[async_trait]
pub trait TargetApi: Send + Sync {
    /// Exchange a password for an access token. The token is used for all
    /// later calls.
    async fn login(&self, user: &str, password: &str) -> Result<LoginResponse, TargetError>;

    /// Join a room.
    async fn join(&self, room: &str) -> Result<(), TargetError>;

    /// Leave a room.
    async fn leave(&self, room: &str) -> Result<(), TargetError>;

    /// Set the bridge user's presence, e.g. `online`.
    async fn set_presence(&self, presence: &str) -> Result<(), TargetError>;

    /// Mark `event_id` as fully read in `room`.
    async fn send_read_receipt(&self, room: &str, event_id: &str) -> Result<(), TargetError>;

    /// Profile display name of `user_id` (may be empty).
    async fn display_name(&self, user_id: &str) -> Result<String, TargetError>;

    /// Upload media, returning its content reference.
    async fn upload(&self, filename: &str, mime_type: &str, data: Vec<u8>) -> Result<String, TargetError>;

    /// Download media, failing with [`TargetError::TooLarge`] past `max_bytes`.
    async fn download(&self, content_uri: &str, max_bytes: usize) -> Result<Vec<u8>, TargetError>;

    /// Send a message with a fresh transaction id, returning the event id.
    async fn send_message(&self, room: &str, content: &RoomMessageContent) -> Result<String, TargetError>;

    /// Long-poll for events after `since`. An empty cursor requests an
    /// initial sync.
    async fn sync(&self, since: &SyncCursor, timeout: Option<Duration>) -> Result<SyncResponse, TargetError>;
}
