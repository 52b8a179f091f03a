//! Mock source network for testing.
//!
//! Keeps a per-category log of pushed items and the set of acknowledged
//! sequence ids, like the real daemon: opening a stream from `N` replays
//! every unacknowledged item with sequence id `>= N`, in order, and then
//! waits for new pushes. With [`MockSource::replay_acked`] the replay also
//! includes acknowledged items, as a server that only tracks the
//! `unacked_from` position would. Failures can be injected per call kind,
//! or tied to a specific sequence id.

use super::{RawStream, RpcError, SourceRpc};
use async_trait::async_trait;
use bridge_types::{Category, Notification, SequenceId};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// In-memory source network.
#[derive(Debug, Default, Clone)]
pub struct MockSource {
    inner: Arc<Mutex<MockSourceInner>>,
    pushed: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockSourceInner {
    logs: HashMap<Category, Vec<(SequenceId, Value)>>,
    acked: HashMap<Category, BTreeSet<SequenceId>>,
    opens: Vec<(Category, SequenceId)>,
    acks: Vec<(Category, SequenceId)>,
    sent: Vec<(String, String)>,
    accepted_invites: Vec<u64>,
    fail_opens: u32,
    fail_recvs: u32,
    fail_acks: u32,
    fail_next_send: Option<String>,
    fail_recv_at: BTreeSet<SequenceId>,
    fail_ack_at: BTreeSet<SequenceId>,
    replay_acked: bool,
    hold_invite_accepts: bool,
}

impl MockSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a typed notification to its category's log.
    pub fn push<T: Notification + Serialize>(&self, item: &T) {
        let value = serde_json::to_value(item).unwrap_or(Value::Null);
        self.push_raw(T::CATEGORY, item.sequence_id(), value);
    }

    /// Append a raw JSON item with an explicit sequence id.
    pub fn push_raw(&self, category: Category, seq: SequenceId, value: Value) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.logs.entry(category).or_default().push((seq, value));
        }
        self.pushed.notify_waiters();
    }

    /// Make the next `count` stream opens fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.inner.lock().unwrap().fail_opens = count;
    }

    /// Make the next `count` stream receives fail (on any open stream).
    pub fn fail_next_recvs(&self, count: u32) {
        self.inner.lock().unwrap().fail_recvs = count;
    }

    /// Make the next `count` acknowledgments fail.
    pub fn fail_next_acks(&self, count: u32) {
        self.inner.lock().unwrap().fail_acks = count;
    }

    /// Fail one receive, in place of delivering `seq`.
    pub fn fail_recv_at(&self, seq: SequenceId) {
        self.inner.lock().unwrap().fail_recv_at.insert(seq);
    }

    /// Fail the first acknowledgment of `seq`.
    pub fn fail_ack_at(&self, seq: SequenceId) {
        self.inner.lock().unwrap().fail_ack_at.insert(seq);
    }

    /// Replay acknowledged items too when a stream is opened.
    pub fn replay_acked(&self) {
        self.inner.lock().unwrap().replay_acked = true;
    }

    /// Make accept_gc_invite() never complete.
    pub fn hold_invite_accepts(&self) {
        self.inner.lock().unwrap().hold_invite_accepts = true;
    }

    /// Cause the next send_gc() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Every `(category, unacked_from)` passed to open_stream(), in order.
    pub fn opens(&self) -> Vec<(Category, SequenceId)> {
        self.inner.lock().unwrap().opens.clone()
    }

    /// Every successful acknowledgment, in order.
    pub fn acks(&self) -> Vec<(Category, SequenceId)> {
        self.inner.lock().unwrap().acks.clone()
    }

    /// Successful acknowledgments for one category.
    pub fn acks_for(&self, category: Category) -> Vec<SequenceId> {
        self.inner
            .lock()
            .unwrap()
            .acks
            .iter()
            .filter(|(c, _)| *c == category)
            .map(|(_, seq)| *seq)
            .collect()
    }

    /// Every `(gc, msg)` sent with send_gc().
    pub fn sent(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Every invite id accepted.
    pub fn accepted_invites(&self) -> Vec<u64> {
        self.inner.lock().unwrap().accepted_invites.clone()
    }
}

#[async_trait]
impl SourceRpc for MockSource {
    async fn open_stream(
        &self,
        category: Category,
        unacked_from: SequenceId,
    ) -> Result<Box<dyn RawStream>, RpcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.opens.push((category, unacked_from));

        if inner.fail_opens > 0 {
            inner.fail_opens -= 1;
            return Err(RpcError::Transport("injected open failure".into()));
        }

        Ok(Box::new(MockStream {
            source: self.clone(),
            category,
            from: unacked_from,
            position: 0,
        }))
    }

    async fn ack(&self, category: Category, seq: SequenceId) -> Result<(), RpcError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_acks > 0 {
            inner.fail_acks -= 1;
            return Err(RpcError::Transport("injected ack failure".into()));
        }
        if inner.fail_ack_at.remove(&seq) {
            return Err(RpcError::Transport("injected ack failure".into()));
        }

        inner.acked.entry(category).or_default().insert(seq);
        inner.acks.push((category, seq));
        Ok(())
    }

    async fn send_gc(&self, gc: &str, msg: &str) -> Result<(), RpcError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_send.take() {
            return Err(RpcError::Transport(error));
        }

        inner.sent.push((gc.to_string(), msg.to_string()));
        Ok(())
    }

    async fn accept_gc_invite(&self, invite_id: u64) -> Result<(), RpcError> {
        let hold = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.hold_invite_accepts {
                inner.accepted_invites.push(invite_id);
            }
            inner.hold_invite_accepts
        };
        if hold {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

struct MockStream {
    source: MockSource,
    category: Category,
    from: SequenceId,
    /// Index into the category log of the next candidate item.
    position: usize,
}

impl MockStream {
    fn next_ready(&mut self) -> Option<Result<Value, RpcError>> {
        let mut inner = self.source.inner.lock().unwrap();

        if inner.fail_recvs > 0 {
            inner.fail_recvs -= 1;
            return Some(Err(RpcError::Transport("injected recv failure".into())));
        }

        let replay_acked = inner.replay_acked;
        let acked = inner.acked.get(&self.category).cloned().unwrap_or_default();
        let log = inner.logs.get(&self.category)?;
        let mut next = None;
        while let Some((seq, value)) = log.get(self.position) {
            self.position += 1;
            if *seq >= self.from && (replay_acked || !acked.contains(seq)) {
                next = Some((*seq, value.clone()));
                break;
            }
        }

        let (seq, value) = next?;
        if inner.fail_recv_at.remove(&seq) {
            return Some(Err(RpcError::Transport("injected recv failure".into())));
        }
        Some(Ok(value))
    }
}

#[async_trait]
impl RawStream for MockStream {
    async fn recv(&mut self) -> Result<Value, RpcError> {
        loop {
            let pushed = self.source.pushed.clone();
            let notified = pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.next_ready() {
                return item;
            }
            notified.await;
        }
    }
}
