//! Long-poll consumer of the target network's joined-room timelines.
//!
//! Each successful sync is processed as one batch: messages are forwarded,
//! membership events refresh the display-name cache, the newest event of
//! every room is marked read, and only then is the new cursor persisted. A
//! crash mid-batch therefore replays at most that batch.

use crate::cursor_store::{CursorStore, CursorStoreError};
use crate::target::{RoomEvent, SyncResponse, TargetApi, TargetError, MAX_DOWNLOAD_BYTES, SYNC_TIMEOUT};
use bridge_core::{quoted_reply_user, rewrite_quoted_reply, DisplayNameCache, EmbedDescriptor};
use bridge_types::{BridgedMessage, Network, SyncCursor};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait after a transport or decode failure.
pub const DEFAULT_SHORT_BACKOFF: Duration = Duration::from_secs(2);

/// Wait after a non-2xx response.
pub const DEFAULT_LONG_BACKOFF: Duration = Duration::from_secs(5);

const MESSAGE_EVENT: &str = "m.room.message";
const MEMBER_EVENT: &str = "m.room.member";
const IMAGE_MSGTYPE: &str = "m.image";

/// Errors that end the poller.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The shared shutdown signal fired.
    #[error("cancelled")]
    Cancelled,

    /// The output queue's receiver was dropped.
    #[error("target message consumer is gone")]
    ConsumerClosed,

    /// The cursor could not be loaded or persisted.
    #[error(transparent)]
    CursorStore(#[from] CursorStoreError),
}

impl PollerError {
    /// True if the error was caused by shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollerError::Cancelled)
    }
}

/// Sync loop over a [`TargetApi`], resumable through a [`CursorStore`].
pub struct CursorSyncPoller<T: TargetApi + ?Sized, C: CursorStore + ?Sized> {
    target: Arc<T>,
    store: Arc<C>,
    user_id: String,
    token: CancellationToken,
    names: DisplayNameCache,
    short_backoff: Duration,
    long_backoff: Duration,
}

impl<T: TargetApi + ?Sized, C: CursorStore + ?Sized> CursorSyncPoller<T, C> {
    /// Create a poller. Events sent by `user_id` are ignored.
    pub fn new(target: Arc<T>, store: Arc<C>, user_id: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            target,
            store,
            user_id: user_id.into(),
            token,
            names: DisplayNameCache::new(),
            short_backoff: DEFAULT_SHORT_BACKOFF,
            long_backoff: DEFAULT_LONG_BACKOFF,
        }
    }

    /// Override the retry backoffs.
    pub fn with_backoffs(mut self, short: Duration, long: Duration) -> Self {
        self.short_backoff = short;
        self.long_backoff = long;
        self
    }

    /// Forward every new message to `out` until cancelled.
    pub async fn run(mut self, out: mpsc::Sender<BridgedMessage>) -> Result<(), PollerError> {
        let mut cursor = self.store.load().await?;
        info!(cursor = %cursor, "starting target sync");

        loop {
            let timeout = if cursor.is_empty() { None } else { Some(SYNC_TIMEOUT) };
            let reply = match self.guard(self.target.sync(&cursor, timeout)).await {
                Ok(reply) => reply,
                Err(e) if e.is_cancelled() => return Err(PollerError::Cancelled),
                Err(e) => {
                    let backoff = if e.is_status() {
                        self.long_backoff
                    } else {
                        self.short_backoff
                    };
                    warn!(cursor = %cursor, error = %e, ?backoff, "sync failed");
                    self.wait(backoff).await?;
                    continue;
                }
            };

            self.process_batch(&reply, &out).await?;

            let next = SyncCursor::new(reply.next_batch);
            if next != cursor {
                self.store.save(&next).await?;
                debug!(cursor = %next, "cursor persisted");
                cursor = next;
            }
        }
    }

    async fn process_batch(&mut self, reply: &SyncResponse, out: &mpsc::Sender<BridgedMessage>) -> Result<(), PollerError> {
        for (room, joined) in &reply.rooms.join {
            let mut newest: Option<&RoomEvent> = None;

            for event in &joined.timeline.events {
                if newest.map_or(true, |n| event.origin_server_ts > n.origin_server_ts) {
                    newest = Some(event);
                }
                if event.sender == self.user_id {
                    continue;
                }

                match event.event_type.as_str() {
                    MESSAGE_EVENT => {
                        let Some(message) = self.decode_message(room, event).await? else {
                            continue;
                        };
                        tokio::select! {
                            _ = self.token.cancelled() => return Err(PollerError::Cancelled),
                            sent = out.send(message) => sent.map_err(|_| PollerError::ConsumerClosed)?,
                        }
                    }
                    MEMBER_EVENT if event.content.membership == "join" => {
                        let name = event.content.displayname.clone().unwrap_or_default();
                        debug!(room = %room, user = %event.sender, name = %name, "member joined");
                        self.names.insert(event.sender.clone(), name);
                    }
                    _ => {}
                }
            }

            if let Some(event) = newest.filter(|e| !e.event_id.is_empty()) {
                match self.guard(self.target.send_read_receipt(room, &event.event_id)).await {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => return Err(PollerError::Cancelled),
                    Err(e) => warn!(room = %room, event_id = %event.event_id, error = %e, "failed to mark read"),
                }
            }
        }
        Ok(())
    }

    /// Build the bridged form of a message event. `None` drops the event.
    async fn decode_message(&mut self, room: &str, event: &RoomEvent) -> Result<Option<BridgedMessage>, PollerError> {
        let nick = self.resolve_name(&event.sender).await?;

        let mut body = event.content.body.clone();
        if let Some(quoted) = quoted_reply_user(&body).map(str::to_string) {
            let name = self.resolve_name(&quoted).await?;
            if !name.is_empty() && name != quoted {
                body = rewrite_quoted_reply(&body, &name);
            }
        }

        let msg = if event.content.msgtype == IMAGE_MSGTYPE {
            match self.guard(self.target.download(&event.content.url, MAX_DOWNLOAD_BYTES)).await {
                Ok(data) => {
                    let mime_type = event
                        .content
                        .info
                        .as_ref()
                        .map(|i| i.mimetype.clone())
                        .unwrap_or_default();
                    EmbedDescriptor::inline(mime_type, body, data).to_string()
                }
                Err(e) if e.is_cancelled() => return Err(PollerError::Cancelled),
                Err(e) => {
                    warn!(room = %room, event_id = %event.event_id, error = %e, "failed to fetch attachment");
                    return Ok(None);
                }
            }
        } else {
            body
        };

        Ok(Some(BridgedMessage {
            network: Network::Matrix,
            nick,
            msg,
            room: room.to_string(),
        }))
    }

    /// Display name of `user_id`, falling back to the id itself.
    async fn resolve_name(&mut self, user_id: &str) -> Result<String, PollerError> {
        if let Some(name) = self.names.get(user_id) {
            return Ok(fallback(name, user_id));
        }

        match self.guard(self.target.display_name(user_id)).await {
            Ok(name) => {
                self.names.insert(user_id, name.clone());
                Ok(fallback(&name, user_id))
            }
            Err(e) if e.is_cancelled() => Err(PollerError::Cancelled),
            Err(e) => {
                warn!(user = %user_id, error = %e, "display name lookup failed");
                Ok(user_id.to_string())
            }
        }
    }

    async fn guard<R>(&self, call: impl Future<Output = Result<R, TargetError>>) -> Result<R, TargetError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(TargetError::Cancelled),
            r = call => r,
        }
    }

    async fn wait(&self, backoff: Duration) -> Result<(), PollerError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(PollerError::Cancelled),
            _ = tokio::time::sleep(backoff) => Ok(()),
        }
    }
}

fn fallback(name: &str, user_id: &str) -> String {
    if name.is_empty() {
        user_id.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor_store::MemoryCursorStore;
    use crate::target::{EventContent, ImageInfo, JoinedRoom, MockTarget, SyncRooms, Timeline};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const BRIDGE: &str = "@bridge:example.org";
    const FAST: Duration = Duration::from_millis(5);

    fn text(id: &str, sender: &str, ts: i64, body: &str) -> RoomEvent {
        RoomEvent {
            event_id: id.into(),
            sender: sender.into(),
            origin_server_ts: ts,
            event_type: MESSAGE_EVENT.into(),
            content: EventContent {
                msgtype: "m.text".into(),
                body: body.into(),
                ..Default::default()
            },
        }
    }

    fn image(id: &str, sender: &str, ts: i64, uri: &str) -> RoomEvent {
        RoomEvent {
            event_id: id.into(),
            sender: sender.into(),
            origin_server_ts: ts,
            event_type: MESSAGE_EVENT.into(),
            content: EventContent {
                msgtype: IMAGE_MSGTYPE.into(),
                body: "cat.png".into(),
                url: uri.into(),
                info: Some(ImageInfo {
                    mimetype: "image/png".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    fn joined(id: &str, sender: &str, name: Option<&str>) -> RoomEvent {
        RoomEvent {
            event_id: id.into(),
            sender: sender.into(),
            origin_server_ts: 1,
            event_type: MEMBER_EVENT.into(),
            content: EventContent {
                membership: "join".into(),
                displayname: name.map(str::to_string),
                ..Default::default()
            },
        }
    }

    fn batch(next: &str, rooms: Vec<(&str, Vec<RoomEvent>)>) -> SyncResponse {
        let join: BTreeMap<String, JoinedRoom> = rooms
            .into_iter()
            .map(|(room, events)| {
                (
                    room.to_string(),
                    JoinedRoom {
                        timeline: Timeline { events },
                    },
                )
            })
            .collect();
        SyncResponse {
            next_batch: next.into(),
            rooms: SyncRooms { join },
        }
    }

    fn poller<C: CursorStore + 'static>(
        target: &MockTarget,
        store: Arc<C>,
        token: &CancellationToken,
    ) -> CursorSyncPoller<MockTarget, C> {
        CursorSyncPoller::new(Arc::new(target.clone()), store, BRIDGE, token.clone()).with_backoffs(FAST, FAST)
    }

    async fn recv(rx: &mut mpsc::Receiver<BridgedMessage>) -> BridgedMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("poller ended")
    }

    async fn wait_for_syncs(target: &MockTarget, n: usize) {
        for _ in 0..200 {
            if target.syncs().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} syncs, got {:?}", n, target.syncs());
    }

    /// Records the number of queued messages at every save.
    struct RecordingStore {
        initial: SyncCursor,
        queue: mpsc::Sender<BridgedMessage>,
        saves: Mutex<Vec<(SyncCursor, usize)>>,
    }

    #[async_trait]
    impl CursorStore for RecordingStore {
        async fn load(&self) -> Result<SyncCursor, CursorStoreError> {
            Ok(self.initial.clone())
        }

        async fn save(&self, cursor: &SyncCursor) -> Result<(), CursorStoreError> {
            let queued = self.queue.max_capacity() - self.queue.capacity();
            self.saves.lock().unwrap().push((cursor.clone(), queued));
            Ok(())
        }
    }

    // ===========================================
    // Cursor handling
    // ===========================================

    #[tokio::test]
    async fn resumes_from_persisted_cursor() {
        let target = MockTarget::new();
        target.queue_sync(batch("s2", vec![]));
        let store = Arc::new(MemoryCursorStore::new(SyncCursor::new("s1")));
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);

        let handle = tokio::spawn(poller(&target, store.clone(), &token).run(tx));
        wait_for_syncs(&target, 2).await;

        let syncs = target.syncs();
        assert_eq!(syncs[0], (SyncCursor::new("s1"), Some(SYNC_TIMEOUT)));
        assert_eq!(syncs[1], (SyncCursor::new("s2"), Some(SYNC_TIMEOUT)));
        assert_eq!(store.current(), SyncCursor::new("s2"));

        token.cancel();
        assert!(handle.await.unwrap().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn initial_sync_has_no_since_or_timeout() {
        let target = MockTarget::new();
        let store = Arc::new(MemoryCursorStore::default());
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);

        let handle = tokio::spawn(poller(&target, store, &token).run(tx));
        wait_for_syncs(&target, 1).await;
        assert_eq!(target.syncs()[0], (SyncCursor::empty(), None));

        token.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn cursor_persisted_after_batch_is_enqueued() {
        let target = MockTarget::new();
        target.set_display_name("@alice:x", "Alice");
        target.queue_sync(batch(
            "s2",
            vec![("!r:x", vec![text("$1", "@alice:x", 1, "one"), text("$2", "@alice:x", 2, "two")])],
        ));

        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let store = Arc::new(RecordingStore {
            initial: SyncCursor::new("s1"),
            queue: tx.clone(),
            saves: Mutex::new(Vec::new()),
        });

        let handle = tokio::spawn(poller(&target, store.clone(), &token).run(tx));
        wait_for_syncs(&target, 2).await;

        assert_eq!(*store.saves.lock().unwrap(), vec![(SyncCursor::new("s2"), 2)]);
        assert_eq!(recv(&mut rx).await.msg, "one");
        assert_eq!(recv(&mut rx).await.msg, "two");

        token.cancel();
        let _ = handle.await;
    }

    // ===========================================
    // Event handling
    // ===========================================

    #[tokio::test]
    async fn forwards_messages_with_display_names() {
        let target = MockTarget::new();
        target.set_display_name("@alice:x", "Alice");
        target.queue_sync(batch(
            "s2",
            vec![(
                "!r:x",
                vec![
                    text("$0", BRIDGE, 1, "[br] <bob> echo"),
                    text("$1", "@alice:x", 2, "hello"),
                    text("$2", "@alice:x", 3, "again"),
                    text("$3", "@nobody:x", 4, "who"),
                ],
            )],
        ));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(poller(&target, Arc::new(MemoryCursorStore::default()), &token).run(tx));

        let first = recv(&mut rx).await;
        assert_eq!(
            first,
            BridgedMessage {
                network: Network::Matrix,
                nick: "Alice".into(),
                msg: "hello".into(),
                room: "!r:x".into(),
            }
        );
        assert_eq!(recv(&mut rx).await.msg, "again");
        let unknown = recv(&mut rx).await;
        assert_eq!(unknown.nick, "@nobody:x");

        // Cached after the first lookup.
        assert_eq!(target.display_name_lookups(), vec!["@alice:x", "@nobody:x"]);

        token.cancel();
        let _ = handle.await;
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn failed_name_lookup_is_logged_as_warning() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let target = MockTarget::new();
        let token = CancellationToken::new();
        let mut p = poller(&target, Arc::new(MemoryCursorStore::default()), &token);
        assert_eq!(p.resolve_name("@nobody:x").await.unwrap(), "@nobody:x");

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"), "{}", output);
        assert!(output.contains("display name lookup failed"), "{}", output);
    }

    #[tokio::test]
    async fn quoted_reply_is_rewritten() {
        let target = MockTarget::new();
        target.set_display_name("@alice:x", "Alice");
        target.set_display_name("@bob:x", "Bob");
        target.set_display_name("@carol:x", "");
        target.queue_sync(batch(
            "s2",
            vec![(
                "!r:x",
                vec![
                    text("$1", "@alice:x", 1, "> <@bob:x> earlier\n\nreply"),
                    text("$2", "@alice:x", 2, "> <@carol:x> earlier\n\nreply"),
                ],
            )],
        ));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(poller(&target, Arc::new(MemoryCursorStore::default()), &token).run(tx));

        assert_eq!(recv(&mut rx).await.msg, "> <Bob> earlier\n\nreply");
        assert_eq!(recv(&mut rx).await.msg, "> <@carol:x> earlier\n\nreply");

        token.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn membership_events_fill_name_cache() {
        let target = MockTarget::new();
        target.queue_sync(batch(
            "s2",
            vec![(
                "!r:x",
                vec![joined("$1", "@dave:x", Some("Dave")), text("$2", "@dave:x", 2, "hi")],
            )],
        ));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(poller(&target, Arc::new(MemoryCursorStore::default()), &token).run(tx));

        assert_eq!(recv(&mut rx).await.nick, "Dave");
        assert!(target.display_name_lookups().is_empty());

        token.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn images_become_inline_embeds() {
        let target = MockTarget::new();
        target.set_display_name("@alice:x", "Alice");
        target.put_media("mxc://x/small", vec![1, 2, 3]);
        target.put_media("mxc://x/big", vec![0u8; MAX_DOWNLOAD_BYTES + 1]);
        target.queue_sync(batch(
            "s2",
            vec![(
                "!r:x",
                vec![
                    image("$1", "@alice:x", 1, "mxc://x/big"),
                    image("$2", "@alice:x", 2, "mxc://x/small"),
                ],
            )],
        ));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(poller(&target, Arc::new(MemoryCursorStore::default()), &token).run(tx));

        // The oversized image is skipped.
        let message = recv(&mut rx).await;
        let embeds = bridge_core::find_embeds(&message.msg);
        assert_eq!(embeds.len(), 1);
        assert_eq!(embeds[0].mime_type, "image/png");
        assert_eq!(embeds[0].filename, "cat.png");
        assert_eq!(embeds[0].data.as_deref(), Some(&[1u8, 2, 3][..]));

        token.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn newest_event_of_each_room_is_marked_read() {
        let target = MockTarget::new();
        target.set_display_name("@alice:x", "Alice");
        target.queue_sync(batch(
            "s2",
            vec![
                ("!a:x", vec![text("$a2", "@alice:x", 20, "late"), text("$a1", "@alice:x", 10, "early")]),
                ("!b:x", vec![text("$b1", BRIDGE, 5, "own")]),
            ],
        ));
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);
        let store = Arc::new(MemoryCursorStore::default());
        let handle = tokio::spawn(poller(&target, store.clone(), &token).run(tx));
        wait_for_syncs(&target, 2).await;

        assert_eq!(
            target.read_receipts(),
            vec![
                ("!a:x".to_string(), "$a2".to_string()),
                ("!b:x".to_string(), "$b1".to_string())
            ]
        );

        token.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn read_receipt_failure_is_not_fatal() {
        let target = MockTarget::new();
        target.fail_read_receipts();
        target.set_display_name("@alice:x", "Alice");
        target.queue_sync(batch("s2", vec![("!a:x", vec![text("$1", "@alice:x", 1, "hi")])]));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let store = Arc::new(MemoryCursorStore::default());
        let handle = tokio::spawn(poller(&target, store.clone(), &token).run(tx));

        assert_eq!(recv(&mut rx).await.msg, "hi");
        wait_for_syncs(&target, 2).await;
        assert_eq!(store.current(), SyncCursor::new("s2"));

        token.cancel();
        let _ = handle.await;
    }

    // ===========================================
    // Failures and termination
    // ===========================================

    #[tokio::test]
    async fn failed_syncs_are_retried() {
        let target = MockTarget::new();
        target.set_display_name("@alice:x", "Alice");
        target.queue_sync_status(502);
        target.queue_sync_transport_error();
        target.queue_sync(batch("s2", vec![("!a:x", vec![text("$1", "@alice:x", 1, "made it")])]));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(poller(&target, Arc::new(MemoryCursorStore::default()), &token).run(tx));

        assert_eq!(recv(&mut rx).await.msg, "made it");
        let syncs = target.syncs();
        assert!(syncs[..3].iter().all(|(since, _)| since.is_empty()));

        token.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn cancellation_while_polling() {
        let target = MockTarget::new();
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);
        let handle = tokio::spawn(poller(&target, Arc::new(MemoryCursorStore::default()), &token).run(tx));

        wait_for_syncs(&target, 1).await;
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert!(matches!(result, Err(PollerError::Cancelled)));
    }

    #[tokio::test]
    async fn consumer_gone_is_fatal() {
        let target = MockTarget::new();
        target.set_display_name("@alice:x", "Alice");
        target.queue_sync(batch("s2", vec![("!a:x", vec![text("$1", "@alice:x", 1, "hi")])]));
        let store = Arc::new(MemoryCursorStore::default());
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let result = poller(&target, store.clone(), &token).run(tx).await;
        assert!(matches!(result, Err(PollerError::ConsumerClosed)));
        assert!(store.current().is_empty());
    }
}
