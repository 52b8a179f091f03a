//! Handling of the notification categories that are not bridged.
//!
//! Every category is streamed (and so acknowledged) so the daemon never
//! holds a growing backlog. Group chat invitations from allow-listed
//! identities are accepted; everything else is logged.

use crate::allowlist::AllowListStore;
use crate::relay::RelayError;
use bridge_client::{RpcError, SourceRpc};
use bridge_types::{
    KxCompleted, ReceivedGcInvite, ReceivedPm, ReceivedPost, ReceivedPostStatus, TipProgressEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Receiving ends of the non-message category queues.
pub struct NoticeQueues {
    /// Group chat invitations
    pub invites: mpsc::Receiver<ReceivedGcInvite>,
    /// Private messages
    pub pms: mpsc::Receiver<ReceivedPm>,
    /// Completed key exchanges
    pub kx: mpsc::Receiver<KxCompleted>,
    /// Relayed posts
    pub posts: mpsc::Receiver<ReceivedPost>,
    /// Post status updates
    pub post_status: mpsc::Receiver<ReceivedPostStatus>,
    /// Tip payment progress
    pub tips: mpsc::Receiver<TipProgressEvent>,
}

/// Consumer of [`NoticeQueues`].
pub struct NoticeHandler<S: SourceRpc + ?Sized> {
    source: Arc<S>,
    allowlist: Arc<AllowListStore>,
    token: CancellationToken,
}

impl<S: SourceRpc + ?Sized> NoticeHandler<S> {
    /// Create a handler that accepts invitations from `allowlist`.
    pub fn new(source: Arc<S>, allowlist: Arc<AllowListStore>, token: CancellationToken) -> Self {
        Self {
            source,
            allowlist,
            token,
        }
    }

    /// Drain all queues until cancelled or every queue has closed.
    pub async fn run(&self, queues: NoticeQueues) -> Result<(), RelayError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(RelayError::Cancelled),
            r = self.drain(queues) => r,
        }
    }

    /// One loop per category, so a slow invite acceptance never holds up
    /// the other queues.
    async fn drain(&self, queues: NoticeQueues) -> Result<(), RelayError> {
        let NoticeQueues {
            mut invites,
            mut pms,
            mut kx,
            mut posts,
            mut post_status,
            mut tips,
        } = queues;

        let invite_loop = async {
            while let Some(invite) = invites.recv().await {
                self.handle_invite(invite).await?;
            }
            Ok::<(), RelayError>(())
        };
        let pm_loop = async {
            while let Some(pm) = pms.recv().await {
                let text = pm.msg.map(|m| m.message).unwrap_or_default();
                info!(category = "pm", nick = %pm.nick, uid = %pm.uid, message = %text, "private message");
            }
            Ok::<(), RelayError>(())
        };
        let kx_loop = async {
            while let Some(done) = kx.recv().await {
                info!(category = "kx", nick = %done.nick, uid = %done.uid, "key exchange completed");
            }
            Ok::<(), RelayError>(())
        };
        let post_loop = async {
            while let Some(post) = posts.recv().await {
                let summary = post.summary.unwrap_or_default();
                info!(category = "post", author = %summary.author_nick, title = %summary.title, id = %summary.id, "post received");
            }
            Ok::<(), RelayError>(())
        };
        let post_status_loop = async {
            while let Some(status) = post_status.recv().await {
                info!(category = "post_status", post_id = %status.post_id, from = %status.status_from_nick, "post status update");
            }
            Ok::<(), RelayError>(())
        };
        let tip_loop = async {
            while let Some(tip) = tips.recv().await {
                info!(category = "tip", nick = %tip.nick, amount_matoms = tip.amount_matoms, completed = tip.completed, attempt = tip.attempt, "tip progress");
            }
            Ok::<(), RelayError>(())
        };

        tokio::try_join!(invite_loop, pm_loop, kx_loop, post_loop, post_status_loop, tip_loop)?;
        info!("all notice queues closed");
        Ok(())
    }

    /// Accept `invite` if its sender is allow-listed.
    pub async fn handle_invite(&self, invite: ReceivedGcInvite) -> Result<(), RelayError> {
        let gc_name = invite.invite.as_ref().map(|i| i.name.clone()).unwrap_or_default();
        let inviter = match invite.inviter() {
            Ok(id) => id,
            Err(e) => {
                warn!(category = "invite", nick = %invite.inviter_nick, gc = %gc_name, error = %e, "invite from unparsable identity");
                return Ok(());
            }
        };

        if !self.allowlist.contains(&inviter).await {
            info!(category = "invite", nick = %invite.inviter_nick, uid = %inviter, gc = %gc_name, "ignoring invite from identity not on allow-list");
            return Ok(());
        }

        let accepted = tokio::select! {
            _ = self.token.cancelled() => Err(RpcError::Cancelled),
            r = self.source.accept_gc_invite(invite.invite_id) => r,
        };
        match accepted {
            Ok(()) => {
                info!(category = "invite", nick = %invite.inviter_nick, gc = %gc_name, "accepted invite");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(RelayError::Cancelled),
            Err(e) => {
                error!(category = "invite", gc = %gc_name, error = %e, "failed to accept invite");
                Ok(())
            }
        }
    }
}
