//! Notifications pushed by the source network and the decoded chat line
//! handed between the two sides of the bridge.
//!
//! Field names follow the RPC daemon's JSON encoding (proto names). Every
//! field is defaulted so that additions on the daemon side never break
//! decoding.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BridgeTypesError, SequenceId, ShortId};

/// Notification categories exposed as independent server-push streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Group chat messages
    GroupMessages,
    /// Group chat invitations
    Invites,
    /// Private messages
    PrivateMessages,
    /// Completed key exchanges
    KxCompleted,
    /// New posts
    Posts,
    /// Post status updates (comments, hearts)
    PostStatus,
    /// Progress of outbound tips
    TipProgress,
}

impl Category {
    /// Every category, in the order streams are started.
    pub const ALL: [Category; 7] = [
        Category::GroupMessages,
        Category::Invites,
        Category::PrivateMessages,
        Category::KxCompleted,
        Category::Posts,
        Category::PostStatus,
        Category::TipProgress,
    ];

    /// Short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::GroupMessages => "gc",
            Category::Invites => "invite",
            Category::PrivateMessages => "pm",
            Category::KxCompleted => "kx",
            Category::Posts => "post",
            Category::PostStatus => "post_status",
            Category::TipProgress => "tip",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed item of one notification category.
pub trait Notification: DeserializeOwned + fmt::Debug + Send + 'static {
    /// The stream this notification arrives on.
    const CATEGORY: Category;

    /// Sequence number assigned by the server.
    fn sequence_id(&self) -> SequenceId;
}

/// Body of a group chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMessage {
    /// Group chat identifier
    pub id: String,
    /// Message text (may contain embed tags)
    pub message: String,
}

/// A message received in a group chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcReceivedMsg {
    /// Sender identity
    pub uid: String,
    /// Sender nick
    pub nick: String,
    /// Local alias of the group chat (the bridged room identifier)
    pub gc_alias: String,
    /// Message body; absent for empty messages
    pub msg: Option<GroupMessage>,
    /// Server timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Stream sequence number
    pub sequence_id: SequenceId,
}

/// Group chat invitation details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcInvite {
    /// Group chat name
    pub name: String,
    /// Group chat identifier
    pub id: String,
}

/// An invitation to join a group chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivedGcInvite {
    /// Identity of the inviter, as encoded on the wire
    pub inviter_uid: String,
    /// Nick of the inviter
    pub inviter_nick: String,
    /// Invite identifier used to accept the invite
    pub invite_id: u64,
    /// Invite details
    pub invite: Option<GcInvite>,
    /// Stream sequence number
    pub sequence_id: SequenceId,
}

/// Body of a private message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivateMessage {
    /// Message text
    pub message: String,
}

/// A private message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivedPm {
    /// Sender identity
    pub uid: String,
    /// Sender nick
    pub nick: String,
    /// Message body
    pub msg: Option<PrivateMessage>,
    /// Server timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Stream sequence number
    pub sequence_id: SequenceId,
}

/// A completed key exchange with a new contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KxCompleted {
    /// Identity of the new contact
    pub uid: String,
    /// Nick of the new contact
    pub nick: String,
    /// Stream sequence number
    pub sequence_id: SequenceId,
}

/// Summary of a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostSummary {
    /// Post identifier
    pub id: String,
    /// Author identity
    pub from: String,
    /// Author nick
    pub author_nick: String,
    /// Post title
    pub title: String,
}

/// A post relayed by a contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivedPost {
    /// Identity of the relayer
    pub relayer_uid: String,
    /// Post summary
    pub summary: Option<PostSummary>,
    /// Stream sequence number
    pub sequence_id: SequenceId,
}

/// A status update (comment, heart) on a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivedPostStatus {
    /// Identity of the relayer
    pub relayer_uid: String,
    /// Post identifier
    pub post_id: String,
    /// Identity of the status author
    pub status_from: String,
    /// Nick of the status author
    pub status_from_nick: String,
    /// Stream sequence number
    pub sequence_id: SequenceId,
}

/// Progress of a tip sent to a contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TipProgressEvent {
    /// Identity of the tip receiver
    pub uid: String,
    /// Nick of the tip receiver
    pub nick: String,
    /// Amount in milli-atoms
    pub amount_matoms: i64,
    /// Whether the tip completed
    pub completed: bool,
    /// Attempt number
    pub attempt: i32,
    /// Stream sequence number
    pub sequence_id: SequenceId,
}

impl ReceivedGcInvite {
    /// Decode the inviter identity.
    pub fn inviter(&self) -> Result<ShortId, BridgeTypesError> {
        ShortId::from_wire(&self.inviter_uid)
    }
}

macro_rules! impl_notification {
    ($($ty:ty => $category:expr),+ $(,)?) => {
        $(
            impl Notification for $ty {
                const CATEGORY: Category = $category;

                fn sequence_id(&self) -> SequenceId {
                    self.sequence_id
                }
            }
        )+
    };
}

impl_notification! {
    GcReceivedMsg => Category::GroupMessages,
    ReceivedGcInvite => Category::Invites,
    ReceivedPm => Category::PrivateMessages,
    KxCompleted => Category::KxCompleted,
    ReceivedPost => Category::Posts,
    ReceivedPostStatus => Category::PostStatus,
    TipProgressEvent => Category::TipProgress,
}

/// The network a [`BridgedMessage`] originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// Bison Relay (the source network)
    BisonRelay,
    /// Matrix (the target network)
    Matrix,
}

/// A chat line decoded from one network, ready to be relayed to the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgedMessage {
    /// Network the line was received on
    pub network: Network,
    /// Resolved sender nick
    pub nick: String,
    /// Text, with attachments encoded as embed tags
    pub msg: String,
    /// Room identifier on the originating network
    pub room: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn gc_message_decodes_with_string_sequence() {
        let json = r#"{
            "uid": "ab",
            "nick": "alice",
            "gc_alias": "dev",
            "msg": {"id": "x", "message": "hello"},
            "sequence_id": "17",
            "unknown_field": true
        }"#;
        let msg: GcReceivedMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sequence_id(), SequenceId::new(17));
        assert_eq!(msg.gc_alias, "dev");
        assert_eq!(msg.msg.unwrap().message, "hello");
    }

    #[test]
    fn missing_fields_default() {
        let msg: GcReceivedMsg = serde_json::from_str("{}").unwrap();
        assert!(msg.msg.is_none());
        assert_eq!(msg.sequence_id, SequenceId::zero());
    }

    #[test]
    fn notification_categories_are_distinct() {
        assert_eq!(GcReceivedMsg::CATEGORY, Category::GroupMessages);
        assert_eq!(ReceivedGcInvite::CATEGORY, Category::Invites);
        assert_eq!(ReceivedPm::CATEGORY, Category::PrivateMessages);
        assert_eq!(KxCompleted::CATEGORY, Category::KxCompleted);
        assert_eq!(ReceivedPost::CATEGORY, Category::Posts);
        assert_eq!(ReceivedPostStatus::CATEGORY, Category::PostStatus);
        assert_eq!(TipProgressEvent::CATEGORY, Category::TipProgress);
    }

    #[test]
    fn invite_inviter_from_base64_bytes() {
        let id = ShortId::random();
        let json = serde_json::json!({
            "inviter_uid": base64::engine::general_purpose::STANDARD.encode(id.as_bytes()),
            "invite_id": 9,
            "invite": {"name": "dev"},
            "sequence_id": 3
        });
        let invite: ReceivedGcInvite = serde_json::from_value(json).unwrap();
        assert_eq!(invite.inviter().unwrap(), id);
        assert_eq!(invite.invite_id, 9);
    }

    #[test]
    fn category_labels() {
        assert_eq!(Category::ALL.len(), 7);
        assert_eq!(Category::GroupMessages.to_string(), "gc");
        assert_eq!(Category::TipProgress.to_string(), "tip");
    }
}
