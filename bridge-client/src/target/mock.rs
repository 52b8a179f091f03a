//! Mock target network for testing.
//!
//! Sync responses are scripted: each sync() pops the next queued response
//! (or failure). When the script is exhausted, sync() blocks forever, so a
//! poller under test idles until it is cancelled.

use super::{LoginResponse, RoomMessageContent, SyncResponse, TargetApi, TargetError};
use async_trait::async_trait;
use bridge_types::SyncCursor;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A scripted sync outcome.
#[derive(Debug)]
enum SyncStep {
    Reply(SyncResponse),
    Status(u16),
    Transport,
}

/// In-memory target network.
#[derive(Debug, Default, Clone)]
pub struct MockTarget {
    inner: Arc<Mutex<MockTargetInner>>,
}

#[derive(Debug, Default)]
struct MockTargetInner {
    sync_script: VecDeque<SyncStep>,
    syncs: Vec<(SyncCursor, Option<Duration>)>,
    display_names: HashMap<String, String>,
    display_name_lookups: Vec<String>,
    media: HashMap<String, Vec<u8>>,
    uploads: Vec<(String, String, Vec<u8>)>,
    sent: Vec<(String, RoomMessageContent)>,
    read_receipts: Vec<(String, String)>,
    joined: Vec<String>,
    left: Vec<String>,
    presence: Vec<String>,
    logins: Vec<String>,
    fail_next_send: Option<u16>,
    fail_next_upload: Option<u16>,
    fail_read_receipts: bool,
    next_upload: u64,
}

impl MockTarget {
    /// Create an empty target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful sync reply.
    pub fn queue_sync(&self, reply: SyncResponse) {
        self.inner.lock().unwrap().sync_script.push_back(SyncStep::Reply(reply));
    }

    /// Queue a sync that fails with a non-2xx status.
    pub fn queue_sync_status(&self, status: u16) {
        self.inner.lock().unwrap().sync_script.push_back(SyncStep::Status(status));
    }

    /// Queue a sync that fails at the transport level.
    pub fn queue_sync_transport_error(&self) {
        self.inner.lock().unwrap().sync_script.push_back(SyncStep::Transport);
    }

    /// Set the profile display name of a user.
    pub fn set_display_name(&self, user_id: &str, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .display_names
            .insert(user_id.to_string(), name.to_string());
    }

    /// Make media downloadable at `content_uri`.
    pub fn put_media(&self, content_uri: &str, data: Vec<u8>) {
        self.inner
            .lock()
            .unwrap()
            .media
            .insert(content_uri.to_string(), data);
    }

    /// Cause the next send_message() to fail with `status`.
    pub fn fail_next_send(&self, status: u16) {
        self.inner.lock().unwrap().fail_next_send = Some(status);
    }

    /// Cause the next upload() to fail with `status`.
    pub fn fail_next_upload(&self, status: u16) {
        self.inner.lock().unwrap().fail_next_upload = Some(status);
    }

    /// Make every read receipt fail.
    pub fn fail_read_receipts(&self) {
        self.inner.lock().unwrap().fail_read_receipts = true;
    }

    /// Every `(since, timeout)` passed to sync(), in order.
    pub fn syncs(&self) -> Vec<(SyncCursor, Option<Duration>)> {
        self.inner.lock().unwrap().syncs.clone()
    }

    /// Every user id looked up with display_name().
    pub fn display_name_lookups(&self) -> Vec<String> {
        self.inner.lock().unwrap().display_name_lookups.clone()
    }

    /// Every `(filename, mime_type, data)` uploaded.
    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.inner.lock().unwrap().uploads.clone()
    }

    /// Every `(room, content)` sent.
    pub fn sent(&self) -> Vec<(String, RoomMessageContent)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Every `(room, event_id)` marked read.
    pub fn read_receipts(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().read_receipts.clone()
    }

    /// Rooms joined.
    pub fn joined(&self) -> Vec<String> {
        self.inner.lock().unwrap().joined.clone()
    }

    /// Rooms left.
    pub fn left(&self) -> Vec<String> {
        self.inner.lock().unwrap().left.clone()
    }

    /// Presence values set.
    pub fn presence(&self) -> Vec<String> {
        self.inner.lock().unwrap().presence.clone()
    }

    /// Users logged in.
    pub fn logins(&self) -> Vec<String> {
        self.inner.lock().unwrap().logins.clone()
    }

    fn status(status: u16) -> TargetError {
        TargetError::Status {
            status,
            body: "injected".to_string(),
        }
    }
}

#[async_trait]
impl TargetApi for MockTarget {
    async fn login(&self, user: &str, _password: &str) -> Result<LoginResponse, TargetError> {
        self.inner.lock().unwrap().logins.push(user.to_string());
        Ok(LoginResponse {
            user_id: user.to_string(),
            access_token: "mock-token".to_string(),
            device_id: "MOCK".to_string(),
        })
    }

    async fn join(&self, room: &str) -> Result<(), TargetError> {
        self.inner.lock().unwrap().joined.push(room.to_string());
        Ok(())
    }

    async fn leave(&self, room: &str) -> Result<(), TargetError> {
        self.inner.lock().unwrap().left.push(room.to_string());
        Ok(())
    }

    async fn set_presence(&self, presence: &str) -> Result<(), TargetError> {
        self.inner.lock().unwrap().presence.push(presence.to_string());
        Ok(())
    }

    async fn send_read_receipt(&self, room: &str, event_id: &str) -> Result<(), TargetError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_read_receipts {
            return Err(Self::status(500));
        }
        inner
            .read_receipts
            .push((room.to_string(), event_id.to_string()));
        Ok(())
    }

    async fn display_name(&self, user_id: &str) -> Result<String, TargetError> {
        let mut inner = self.inner.lock().unwrap();
        inner.display_name_lookups.push(user_id.to_string());
        inner
            .display_names
            .get(user_id)
            .cloned()
            .ok_or_else(|| Self::status(404))
    }

    async fn upload(&self, filename: &str, mime_type: &str, data: Vec<u8>) -> Result<String, TargetError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.fail_next_upload.take() {
            return Err(Self::status(status));
        }
        inner.next_upload += 1;
        let uri = format!("mxc://mock.example/upload{}", inner.next_upload);
        inner
            .uploads
            .push((filename.to_string(), mime_type.to_string(), data));
        Ok(uri)
    }

    async fn download(&self, content_uri: &str, max_bytes: usize) -> Result<Vec<u8>, TargetError> {
        super::parse_content_uri(content_uri)?;
        let inner = self.inner.lock().unwrap();
        let data = inner.media.get(content_uri).ok_or_else(|| Self::status(404))?;
        if data.len() > max_bytes {
            return Err(TargetError::TooLarge { limit: max_bytes });
        }
        Ok(data.clone())
    }

    async fn send_message(&self, room: &str, content: &RoomMessageContent) -> Result<String, TargetError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.fail_next_send.take() {
            return Err(Self::status(status));
        }
        inner.sent.push((room.to_string(), content.clone()));
        Ok(format!("$event{}", inner.sent.len()))
    }

    async fn sync(&self, since: &SyncCursor, timeout: Option<Duration>) -> Result<SyncResponse, TargetError> {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner.syncs.push((since.clone(), timeout));
            inner.sync_script.pop_front()
        };

        match step {
            Some(SyncStep::Reply(reply)) => Ok(reply),
            Some(SyncStep::Status(status)) => Err(Self::status(status)),
            Some(SyncStep::Transport) => Err(TargetError::Transport("injected".into())),
            None => std::future::pending().await,
        }
    }
}
