//! Reconnecting, acknowledging consumer of one source notification stream.
//!
//! # Delivery
//!
//! For each received item the output queue slot is reserved first, then the
//! item is acknowledged, then the slot is filled. An item is therefore never
//! acknowledged unless it is about to be enqueued, and a failed
//! acknowledgment leaves it unacknowledged on the server, which replays it
//! on the next stream (opened from the current watermark, inclusive).
//! The replayed item at the watermark is delivered again only if its
//! acknowledgment failed; otherwise it is skipped.
//!
//! # Failures
//!
//! - open failure: wait the backoff, reopen
//! - receive failure: reopen immediately
//! - undecodable item: wait the backoff, reopen
//! - acknowledgment failure: reopen immediately
//! - cancellation: return [`StreamError::Cancelled`] without retrying
//! - consumer gone: return [`StreamError::ConsumerClosed`]

use crate::source::{RpcError, SourceRpc};
use bridge_core::{Observation, SequenceWatermark};
use bridge_types::{Category, Notification};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default wait before reopening after an open failure.
pub const DEFAULT_STREAM_BACKOFF: Duration = Duration::from_secs(1);

/// Errors that end a stream task.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The shared shutdown signal fired.
    #[error("cancelled")]
    Cancelled,

    /// The output queue's receiver was dropped.
    #[error("{category} consumer is gone")]
    ConsumerClosed {
        /// Stream whose consumer went away
        category: Category,
    },
}

impl StreamError {
    /// True if the error was caused by shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

/// Consumer of per-category notification streams.
///
/// One value can drive any number of categories; each [`run`](Self::run)
/// call owns its own watermark.
pub struct SequenceAckStream<S: SourceRpc + ?Sized> {
    source: Arc<S>,
    token: CancellationToken,
    backoff: Duration,
}

impl<S: SourceRpc + ?Sized> Clone for SequenceAckStream<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            token: self.token.clone(),
            backoff: self.backoff,
        }
    }
}

impl<S: SourceRpc + ?Sized> SequenceAckStream<S> {
    /// Create a consumer bound to `source` and the shared shutdown signal.
    pub fn new(source: Arc<S>, token: CancellationToken) -> Self {
        Self {
            source,
            token,
            backoff: DEFAULT_STREAM_BACKOFF,
        }
    }

    /// Override the reopen backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deliver every notification of `T`'s category to `out`, in sequence
    /// order, until cancelled.
    pub async fn run<T: Notification>(&self, out: mpsc::Sender<T>) -> Result<(), StreamError> {
        let category = T::CATEGORY;
        let mut watermark = SequenceWatermark::new();

        loop {
            let unacked_from = watermark.unacked_from();
            let opened = tokio::select! {
                _ = self.token.cancelled() => Err(RpcError::Cancelled),
                r = self.source.open_stream(category, unacked_from) => r,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) if e.is_cancelled() => return Err(StreamError::Cancelled),
                Err(e) => {
                    warn!(%category, error = %e, "failed to open stream");
                    self.wait_backoff().await?;
                    continue;
                }
            };

            info!(%category, %unacked_from, "listening for notifications");

            loop {
                let received = tokio::select! {
                    _ = self.token.cancelled() => Err(RpcError::Cancelled),
                    r = stream.recv() => r,
                };
                let value = match received {
                    Ok(value) => value,
                    Err(e) if e.is_cancelled() => return Err(StreamError::Cancelled),
                    Err(e) => {
                        warn!(%category, error = %e, "failed to receive from stream");
                        break;
                    }
                };

                let item: T = match serde_json::from_value(value) {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(%category, error = %e, "undecodable notification");
                        self.wait_backoff().await?;
                        break;
                    }
                };

                let seq = item.sequence_id();
                if watermark.observe(seq) == Observation::Stale {
                    debug!(%category, sequence_id = %seq, "skipping delivered notification");
                    continue;
                }

                let permit = tokio::select! {
                    _ = self.token.cancelled() => return Err(StreamError::Cancelled),
                    p = out.reserve() => p.map_err(|_| StreamError::ConsumerClosed { category })?,
                };

                let acked = tokio::select! {
                    _ = self.token.cancelled() => Err(RpcError::Cancelled),
                    r = self.source.ack(category, seq) => r,
                };
                match acked {
                    Ok(()) => {
                        watermark.mark_acked();
                        permit.send(item);
                    }
                    Err(e) if e.is_cancelled() => return Err(StreamError::Cancelled),
                    Err(e) => {
                        error!(%category, sequence_id = %seq, error = %e, "failed to acknowledge");
                        break;
                    }
                }
            }
        }
    }

    async fn wait_backoff(&self) -> Result<(), StreamError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(StreamError::Cancelled),
            _ = tokio::time::sleep(self.backoff) => Ok(()),
        }
    }
}
