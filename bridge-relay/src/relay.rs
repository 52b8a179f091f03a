//! Relay: forwards decoded messages from each network to the other.
//!
//! Source messages become an image message per inline embed plus one
//! attributed text line with the embed tags stripped. Target messages become
//! a single attributed group chat line. Per-item failures are logged and the
//! item is dropped; only cancellation stops a direction.

use bridge_client::{ImageInfo, RoomMessageContent, RpcError, SourceRpc, TargetApi, TargetError};
use bridge_core::{
    attachment_file_name, escape_nick, find_embeds, strip_embeds, EmbedDescriptor, ImageError,
    ImageKind, RoomMapping,
};
use bridge_types::{BridgedMessage, GcReceivedMsg, Network};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Per-item relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The shared shutdown signal fired.
    #[error("cancelled")]
    Cancelled,

    /// An embed references shared content instead of carrying it inline.
    #[error("embed carries no inline data")]
    NotInline,

    /// Attachment rejected before upload.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Target network call failed.
    #[error("target: {0}")]
    Target(#[from] TargetError),

    /// Source network call failed.
    #[error("source: {0}")]
    Source(#[from] RpcError),
}

impl RelayError {
    /// True if the error was caused by shutdown.
    pub fn is_cancelled(&self) -> bool {
        match self {
            RelayError::Cancelled => true,
            RelayError::Target(e) => e.is_cancelled(),
            RelayError::Source(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Attribution prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPrefixes {
    /// Shown on the target for source-origin lines
    pub source: String,
    /// Shown on the source for target-origin lines
    pub target: String,
}

impl Default for RelayPrefixes {
    fn default() -> Self {
        Self {
            source: "[br]".to_string(),
            target: "[m]".to_string(),
        }
    }
}

/// Bridged form of a received group chat message; `None` if it has no body.
pub fn from_group_message(gcm: GcReceivedMsg) -> Option<BridgedMessage> {
    let msg = gcm.msg?;
    Some(BridgedMessage {
        network: Network::BisonRelay,
        nick: gcm.nick,
        msg: msg.message,
        room: gcm.gc_alias,
    })
}

/// Both relay directions over one room mapping.
pub struct Relay<S: SourceRpc + ?Sized, T: TargetApi + ?Sized> {
    source: Arc<S>,
    target: Arc<T>,
    rooms: Arc<RoomMapping>,
    prefixes: RelayPrefixes,
    token: CancellationToken,
}

impl<S: SourceRpc + ?Sized, T: TargetApi + ?Sized> Clone for Relay<S, T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            target: Arc::clone(&self.target),
            rooms: Arc::clone(&self.rooms),
            prefixes: self.prefixes.clone(),
            token: self.token.clone(),
        }
    }
}

impl<S: SourceRpc + ?Sized, T: TargetApi + ?Sized> Relay<S, T> {
    /// Create a relay.
    pub fn new(
        source: Arc<S>,
        target: Arc<T>,
        rooms: Arc<RoomMapping>,
        prefixes: RelayPrefixes,
        token: CancellationToken,
    ) -> Self {
        Self {
            source,
            target,
            rooms,
            prefixes,
            token,
        }
    }

    /// Forward group chat messages to the target until cancelled or the
    /// queue closes.
    pub async fn run_source_to_target(&self, mut rx: mpsc::Receiver<GcReceivedMsg>) -> Result<(), RelayError> {
        loop {
            let gcm = tokio::select! {
                _ = self.token.cancelled() => return Err(RelayError::Cancelled),
                gcm = rx.recv() => gcm,
            };
            let Some(gcm) = gcm else {
                info!("source message queue closed");
                return Ok(());
            };
            let Some(message) = from_group_message(gcm) else {
                trace!("empty group chat message");
                continue;
            };
            self.forward_to_target(&message).await?;
        }
    }

    /// Forward target messages to the source until cancelled or the queue
    /// closes.
    pub async fn run_target_to_source(&self, mut rx: mpsc::Receiver<BridgedMessage>) -> Result<(), RelayError> {
        loop {
            let message = tokio::select! {
                _ = self.token.cancelled() => return Err(RelayError::Cancelled),
                message = rx.recv() => message,
            };
            let Some(message) = message else {
                info!("target message queue closed");
                return Ok(());
            };
            self.forward_to_source(&message).await?;
        }
    }

    /// Deliver one source-origin message. Only cancellation is returned;
    /// other failures are logged.
    pub async fn forward_to_target(&self, message: &BridgedMessage) -> Result<(), RelayError> {
        let Some(room) = self.rooms.target_for(&message.room) else {
            warn!(room = %message.room, "room is not bridged");
            return Ok(());
        };
        if message.msg.is_empty() {
            trace!(room = %message.room, "empty message");
            return Ok(());
        }

        let nick = escape_nick(&message.nick);
        for embed in find_embeds(&message.msg) {
            match self.send_embed(room, embed).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(RelayError::Cancelled),
                Err(e) => error!(room = %room, nick = %nick, error = %e, "failed to send embed"),
            }
        }

        let caption = strip_embeds(&message.msg);
        let caption = caption.trim();
        let line = if caption.is_empty() {
            format!("{} <{}>", self.prefixes.source, nick)
        } else {
            format!("{} <{}> {}", self.prefixes.source, nick, caption)
        };

        match self.target_call(self.target.send_message(room, &RoomMessageContent::text(line))).await {
            Ok(event_id) => {
                debug!(room = %room, event_id = %event_id, "relayed to target");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(RelayError::Cancelled),
            Err(e) => {
                error!(room = %room, error = %e, "failed to send message to target");
                Ok(())
            }
        }
    }

    /// Deliver one target-origin message. Only cancellation is returned;
    /// other failures are logged.
    pub async fn forward_to_source(&self, message: &BridgedMessage) -> Result<(), RelayError> {
        let Some(gc) = self.rooms.source_for(&message.room) else {
            warn!(room = %message.room, "room is not bridged");
            return Ok(());
        };

        let line = format!("{} <{}> {}", self.prefixes.target, message.nick, message.msg);
        let sent = tokio::select! {
            _ = self.token.cancelled() => Err(RpcError::Cancelled),
            r = self.source.send_gc(gc, &line) => r,
        };
        match sent {
            Ok(()) => {
                debug!(gc = %gc, "relayed to source");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(RelayError::Cancelled),
            Err(e) => {
                error!(gc = %gc, error = %e, "failed to send message to group chat");
                Ok(())
            }
        }
    }

    /// Upload an inline attachment and post it as an image message.
    async fn send_embed(&self, room: &str, embed: EmbedDescriptor) -> Result<(), RelayError> {
        let data = embed.data.ok_or(RelayError::NotInline)?;
        let kind = ImageKind::from_mime(&embed.mime_type)?;
        let (w, h) = kind.dimensions(&data)?;
        let filename = attachment_file_name(&embed.filename, kind);
        let size = data.len() as u64;

        let content_uri = self
            .target_call(self.target.upload(&filename, kind.mime(), data))
            .await?;
        let info = ImageInfo {
            w,
            h,
            size,
            mimetype: kind.mime().to_string(),
        };
        let content = RoomMessageContent::image(filename, content_uri, info);
        self.target_call(self.target.send_message(room, &content)).await?;
        Ok(())
    }

    async fn target_call<R>(&self, call: impl Future<Output = Result<R, TargetError>>) -> Result<R, TargetError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(TargetError::Cancelled),
            r = call => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_client::{MockSource, MockTarget};
    use bridge_types::GroupMessage;

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR4nGMAAQAABQABDQottAAAAABJRU5ErkJggg==";

    fn relay(source: &MockSource, target: &MockTarget) -> Relay<MockSource, MockTarget> {
        let rooms = RoomMapping::new([("dev", "!dev:x")]).unwrap();
        Relay::new(
            Arc::new(source.clone()),
            Arc::new(target.clone()),
            Arc::new(rooms),
            RelayPrefixes::default(),
            CancellationToken::new(),
        )
    }

    fn br(room: &str, nick: &str, msg: &str) -> BridgedMessage {
        BridgedMessage {
            network: Network::BisonRelay,
            nick: nick.into(),
            msg: msg.into(),
            room: room.into(),
        }
    }

    fn matrix(room: &str, nick: &str, msg: &str) -> BridgedMessage {
        BridgedMessage {
            network: Network::Matrix,
            nick: nick.into(),
            msg: msg.into(),
            room: room.into(),
        }
    }

    fn sent_bodies(target: &MockTarget) -> Vec<String> {
        target.sent().into_iter().map(|(_, c)| c.body).collect()
    }

    // ===========================================
    // Source to target
    // ===========================================

    #[tokio::test]
    async fn text_is_attributed() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        relay(&source, &target)
            .forward_to_target(&br("dev", "<alice>", "hello"))
            .await
            .unwrap();

        let sent = target.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "!dev:x");
        assert_eq!(sent[0].1, RoomMessageContent::text("[br] <(alice)> hello"));
    }

    #[tokio::test]
    async fn unmapped_and_empty_messages_are_dropped() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        let relay = relay(&source, &target);
        relay.forward_to_target(&br("elsewhere", "alice", "hi")).await.unwrap();
        relay.forward_to_target(&br("dev", "alice", "")).await.unwrap();
        assert!(target.sent().is_empty());
    }

    #[tokio::test]
    async fn embed_becomes_image_message() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        let text = format!("look --embed[type=image/png,filename=dot.png,data={}]--", PNG_1X1);
        relay(&source, &target)
            .forward_to_target(&br("dev", "alice", &text))
            .await
            .unwrap();

        let uploads = target.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "dot.png");
        assert_eq!(uploads[0].1, "image/png");

        let sent = target.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.is_image());
        assert_eq!(sent[0].1.url.as_deref(), Some("mxc://mock.example/upload1"));
        let info = sent[0].1.info.clone().unwrap();
        assert_eq!((info.w, info.h), (1, 1));
        assert_eq!(info.size, uploads[0].2.len() as u64);
        assert_eq!(sent[1].1.body, "[br] <alice> look");
    }

    #[tokio::test]
    async fn pure_attachment_gets_bare_attribution() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        let text = format!("--embed[type=image/png,data={}]--", PNG_1X1);
        relay(&source, &target)
            .forward_to_target(&br("dev", "alice", &text))
            .await
            .unwrap();

        let bodies = sent_bodies(&target);
        assert!(bodies[0].starts_with("image_") && bodies[0].ends_with(".png"));
        assert_eq!(bodies[1], "[br] <alice>");
    }

    #[tokio::test]
    async fn bad_embeds_are_skipped_not_leaked() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        let text = "a --embed[type=application/pdf,data=AAAA]-- b --embed[type=image/png,data=!!]-- c";
        relay(&source, &target)
            .forward_to_target(&br("dev", "alice", text))
            .await
            .unwrap();

        assert!(target.uploads().is_empty());
        let bodies = sent_bodies(&target);
        assert_eq!(bodies.len(), 1);
        assert!(!bodies[0].contains("--embed["));
    }

    #[tokio::test]
    async fn failed_upload_still_sends_caption() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        target.fail_next_upload(500);
        let text = format!("hi --embed[type=image/png,data={}]--", PNG_1X1);
        relay(&source, &target)
            .forward_to_target(&br("dev", "alice", &text))
            .await
            .unwrap();
        assert_eq!(sent_bodies(&target), vec!["[br] <alice> hi"]);
    }

    #[tokio::test]
    async fn send_failure_is_logged_and_dropped() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        target.fail_next_send(502);
        let relay = relay(&source, &target);
        relay.forward_to_target(&br("dev", "alice", "lost")).await.unwrap();
        relay.forward_to_target(&br("dev", "alice", "kept")).await.unwrap();
        assert_eq!(sent_bodies(&target), vec!["[br] <alice> kept"]);
    }

    // ===========================================
    // Target to source
    // ===========================================

    #[tokio::test]
    async fn target_message_goes_to_group_chat() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        let relay = relay(&source, &target);
        relay.forward_to_source(&matrix("!dev:x", "Bob", "hey")).await.unwrap();
        relay.forward_to_source(&matrix("!other:x", "Bob", "nope")).await.unwrap();

        assert_eq!(source.sent(), vec![("dev".to_string(), "[m] <Bob> hey".to_string())]);
    }

    #[tokio::test]
    async fn source_send_failure_is_not_fatal() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        source.fail_next_send("gc not found");
        relay(&source, &target)
            .forward_to_source(&matrix("!dev:x", "Bob", "hey"))
            .await
            .unwrap();
        assert!(source.sent().is_empty());
    }

    // ===========================================
    // Loops
    // ===========================================

    #[tokio::test]
    async fn source_loop_converts_group_messages() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        let relay = relay(&source, &target);
        let (tx, rx) = mpsc::channel(4);

        tx.send(GcReceivedMsg {
            nick: "alice".into(),
            gc_alias: "dev".into(),
            msg: None,
            ..Default::default()
        })
        .await
        .unwrap();
        tx.send(GcReceivedMsg {
            nick: "alice".into(),
            gc_alias: "dev".into(),
            msg: Some(GroupMessage {
                id: "dev".into(),
                message: "hi".into(),
            }),
            ..Default::default()
        })
        .await
        .unwrap();
        drop(tx);

        relay.run_source_to_target(rx).await.unwrap();
        assert_eq!(sent_bodies(&target), vec!["[br] <alice> hi"]);
    }

    #[tokio::test]
    async fn loops_stop_on_cancellation() {
        let (source, target) = (MockSource::new(), MockTarget::new());
        let relay = relay(&source, &target);
        let (_tx, rx) = mpsc::channel::<BridgedMessage>(1);

        relay.token.cancel();
        let result = relay.run_target_to_source(rx).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
