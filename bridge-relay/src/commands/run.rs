//! Start the bridge.

use anyhow::{Context, Result};
use brbridge::allowlist::AllowListStore;
use brbridge::config::{Config, Credentials};
use brbridge::error::BridgeError;
use brbridge::logging::init_logging;
use brbridge::notices::{NoticeHandler, NoticeQueues};
use brbridge::relay::{Relay, RelayPrefixes};
use bridge_client::{
    CursorStore, CursorSyncPoller, FileCursorStore, MatrixClient, SequenceAckStream, TargetApi,
    WsSource,
};
use bridge_types::Notification;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type TaskResult = (&'static str, std::result::Result<(), BridgeError>);

/// Spawn a stream task for `T`'s category and return its queue.
fn spawn_stream<T: Notification>(
    tasks: &mut JoinSet<TaskResult>,
    engine: &SequenceAckStream<WsSource>,
    capacity: usize,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(capacity);
    let engine = engine.clone();
    tasks.spawn(async move { (T::CATEGORY.as_str(), engine.run(tx).await.map_err(BridgeError::from)) });
    rx
}

/// Run the bridge until Ctrl-C or a fatal error.
pub async fn run(data_dir: &Path, config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    let log_dir = config.logging.file.then(|| data_dir.join("logs"));
    let _log_guard = init_logging(&config.logging.level, log_dir.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        config = %config_path.display(),
        "starting brbridge"
    );

    let rooms = Arc::new(config.room_mapping()?);

    // Persisted state; a malformed file stops startup.
    let cursor_store = Arc::new(FileCursorStore::in_dir(data_dir));
    let cursor = cursor_store
        .load()
        .await
        .context("Failed to load sync cursor")?;
    let allowlist = Arc::new(
        AllowListStore::load(data_dir)
            .await
            .context("Failed to load allow-list")?,
    );
    debug!(cursor = %cursor, allowed = allowlist.entries().await.len(), "state loaded");

    // Source network
    let (source, driver) = WsSource::connect(&config.source_tls())
        .await
        .context("Failed to connect to source RPC")?;
    let source = Arc::new(source);

    // Target network
    let target = Arc::new(MatrixClient::new(config.matrix())?);
    if let Credentials::Password(password) = config.credentials()? {
        target
            .login(&config.target.user, &password)
            .await
            .context("Failed to log in to homeserver")?;
    }
    for room in rooms.target_rooms() {
        target
            .join(room)
            .await
            .with_context(|| format!("Failed to join {}", room))?;
    }
    if let Err(e) = target.set_presence("online").await {
        warn!(error = %e, "failed to set presence");
    }

    let token = CancellationToken::new();
    let capacity = config.bridge.queue_capacity;
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();

    {
        let token = token.clone();
        tasks.spawn(async move { ("source connection", driver.run(token).await.map_err(BridgeError::from)) });
    }

    let engine = SequenceAckStream::new(Arc::clone(&source), token.clone());
    let gc_rx = spawn_stream(&mut tasks, &engine, capacity);
    let queues = NoticeQueues {
        invites: spawn_stream(&mut tasks, &engine, capacity),
        pms: spawn_stream(&mut tasks, &engine, capacity),
        kx: spawn_stream(&mut tasks, &engine, capacity),
        posts: spawn_stream(&mut tasks, &engine, capacity),
        post_status: spawn_stream(&mut tasks, &engine, capacity),
        tips: spawn_stream(&mut tasks, &engine, capacity),
    };

    let (matrix_tx, matrix_rx) = mpsc::channel(capacity);
    let poller = CursorSyncPoller::new(
        Arc::clone(&target),
        Arc::clone(&cursor_store),
        config.target.user.clone(),
        token.clone(),
    );
    tasks.spawn(async move { ("target sync", poller.run(matrix_tx).await.map_err(BridgeError::from)) });

    let relay = Relay::new(
        Arc::clone(&source),
        Arc::clone(&target),
        rooms,
        RelayPrefixes {
            source: config.bridge.source_prefix.clone(),
            target: config.bridge.target_prefix.clone(),
        },
        token.clone(),
    );
    {
        let relay = relay.clone();
        tasks.spawn(async move { ("relay to target", relay.run_source_to_target(gc_rx).await.map_err(BridgeError::from)) });
    }
    tasks.spawn(async move { ("relay to source", relay.run_target_to_source(matrix_rx).await.map_err(BridgeError::from)) });

    let notices = NoticeHandler::new(Arc::clone(&source), allowlist, token.clone());
    tasks.spawn(async move { ("notices", notices.run(queues).await.map_err(BridgeError::from)) });

    info!(tasks = tasks.len(), "bridge running");

    let mut failed = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !token.is_cancelled() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                }
                info!("shutting down");
                token.cancel();
            }
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                match joined {
                    Ok((task, Ok(()))) => info!(task, "task finished"),
                    Ok((task, Err(e))) if e.is_cancelled() => debug!(task, "task stopped"),
                    Ok((task, Err(e))) => {
                        error!(task, error = %e, "task failed");
                        failed = true;
                    }
                    Err(e) => {
                        error!(error = %e, "task panicked");
                        failed = true;
                    }
                }
                // Any task ending takes the bridge down.
                token.cancel();
            }
        }
    }

    if failed {
        anyhow::bail!("bridge stopped after a task failure");
    }
    info!("bridge stopped");
    Ok(())
}
