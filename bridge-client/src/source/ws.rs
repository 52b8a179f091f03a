//! JSON-RPC over a TLS websocket, authenticated with a client certificate.
//!
//! [`WsSource`] is a cheap, cloneable handle used by every task. All frames
//! go through one [`WsDriver`] that owns the socket: it writes queued
//! requests and routes each response to the caller (unary calls) or open
//! stream with the matching id. When the socket ends every pending caller
//! and stream observes [`RpcError::ConnectionClosed`].

use super::{
    ack_method, stream_method, RawStream, RpcError, SourceRpc, ACCEPT_GC_INVITE_METHOD,
    SEND_GC_METHOD,
};
use async_trait::async_trait;
use bridge_types::{Category, RpcRequest, RpcResponse, SequenceId};
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where and how to reach the RPC daemon.
#[derive(Debug, Clone)]
pub struct SourceTlsConfig {
    /// Websocket URL, e.g. `wss://127.0.0.1:7676/ws`
    pub url: String,
    /// PEM certificate of the daemon (trust anchor)
    pub server_cert_path: PathBuf,
    /// PEM client certificate
    pub client_cert_path: PathBuf,
    /// PEM client private key
    pub client_key_path: PathBuf,
}

enum Pending {
    Call(oneshot::Sender<RpcResponse>),
    Stream(mpsc::UnboundedSender<RpcResponse>),
}

struct Shared {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn register(&self, pending: Pending) -> Result<u64, RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_pending().insert(id, pending);
        Ok(id)
    }

    fn unregister(&self, id: u64) {
        self.lock_pending().remove(&id);
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send_request(&self, id: u64, method: &str, params: Value) -> Result<(), RpcError> {
        let text = RpcRequest::new(id, method, params).to_text()?;
        self.outgoing.send(text).map_err(|_| {
            self.unregister(id);
            RpcError::ConnectionClosed
        })
    }

    /// Route one inbound frame.
    fn dispatch(&self, response: RpcResponse) {
        let Some(id) = response.id else {
            warn!(error = ?response.error, "rpc frame without id");
            return;
        };

        let mut pending = self.lock_pending();
        match pending.remove(&id) {
            Some(Pending::Call(tx)) => {
                let _ = tx.send(response);
            }
            Some(Pending::Stream(tx)) => {
                let ends = response.error.is_some();
                // Keep the stream registered while its reader is alive.
                if tx.send(response).is_ok() && !ends {
                    pending.insert(id, Pending::Stream(tx));
                }
            }
            None => debug!(id, "rpc frame for unknown id"),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.lock_pending().clear();
    }
}

/// Handle to the RPC daemon.
#[derive(Clone)]
pub struct WsSource {
    shared: Arc<Shared>,
}

/// Owner of the websocket; must be run for any call to complete.
pub struct WsDriver {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outgoing: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
}

impl WsSource {
    /// Connect to the daemon.
    pub async fn connect(config: &SourceTlsConfig) -> Result<(Self, WsDriver), RpcError> {
        let connector = tls_connector(config)?;
        let (ws, _) = tokio_tungstenite::connect_async_tls_with_config(
            config.url.as_str(),
            None,
            false,
            Some(connector),
        )
        .await
        .map_err(|e| RpcError::ConnectionFailed(format!("{}: {}", config.url, e)))?;

        info!(url = %config.url, "connected to rpc daemon");

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outgoing: tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let driver = WsDriver {
            ws,
            outgoing: rx,
            shared: Arc::clone(&shared),
        };
        Ok((Self { shared }, driver))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let (tx, rx) = oneshot::channel();
        let id = self.shared.register(Pending::Call(tx))?;
        self.shared.send_request(id, method, params)?;

        let response = rx.await.map_err(|_| RpcError::ConnectionClosed)?;
        response.into_result().map_err(RpcError::Remote)
    }
}

#[async_trait]
impl SourceRpc for WsSource {
    async fn open_stream(
        &self,
        category: Category,
        unacked_from: SequenceId,
    ) -> Result<Box<dyn RawStream>, RpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.register(Pending::Stream(tx))?;
        self.shared.send_request(
            id,
            stream_method(category),
            json!({ "unacked_from": unacked_from }),
        )?;

        Ok(Box::new(WsStream {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn ack(&self, category: Category, seq: SequenceId) -> Result<(), RpcError> {
        self.call(ack_method(category), json!({ "sequence_id": seq }))
            .await
            .map(|_| ())
    }

    async fn send_gc(&self, gc: &str, msg: &str) -> Result<(), RpcError> {
        self.call(SEND_GC_METHOD, json!({ "gc": gc, "msg": msg }))
            .await
            .map(|_| ())
    }

    async fn accept_gc_invite(&self, invite_id: u64) -> Result<(), RpcError> {
        self.call(ACCEPT_GC_INVITE_METHOD, json!({ "invite_id": invite_id }))
            .await
            .map(|_| ())
    }
}

struct WsStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<RpcResponse>,
    shared: Arc<Shared>,
}

#[async_trait]
impl RawStream for WsStream {
    async fn recv(&mut self) -> Result<Value, RpcError> {
        let response = self.rx.recv().await.ok_or(RpcError::ConnectionClosed)?;
        response.into_result().map_err(RpcError::Remote)
    }
}

impl Drop for WsStream {
    fn drop(&mut self) {
        self.shared.unregister(self.id);
    }
}

impl WsDriver {
    /// Pump frames until the socket closes or `token` is cancelled.
    ///
    /// Returns `Ok(())` on cancellation and an error when the daemon goes
    /// away.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), RpcError> {
        let result = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = self.ws.close(None).await;
                    break Ok(());
                }
                Some(text) = self.outgoing.recv() => {
                    if let Err(e) = self.ws.send(Message::Text(text)).await {
                        break Err(RpcError::Transport(e.to_string()));
                    }
                }
                frame = self.ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => match RpcResponse::from_text(&text) {
                        Ok(response) => self.shared.dispatch(response),
                        Err(e) => warn!(error = %e, "dropping undecodable rpc frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break Err(RpcError::ConnectionClosed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(RpcError::Transport(e.to_string())),
                },
            }
        };

        self.shared.close();
        result
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, RpcError> {
    std::fs::read(path)
        .map_err(|e| RpcError::ConnectionFailed(format!("read {}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RpcError> {
    let pem = read_file(path)?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| RpcError::ConnectionFailed(format!("parse {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(RpcError::ConnectionFailed(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, RpcError> {
    let pem = read_file(path)?;
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| RpcError::ConnectionFailed(format!("parse {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            RpcError::ConnectionFailed(format!("no private key found in {}", path.display()))
        })
}

fn tls_connector(config: &SourceTlsConfig) -> Result<Connector, RpcError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&config.server_cert_path)? {
        roots
            .add(cert)
            .map_err(|e| RpcError::ConnectionFailed(format!("server cert: {}", e)))?;
    }
    let client_certs = load_certs(&config.client_cert_path)?;
    let client_key = load_key(&config.client_key_path)?;

    let tls = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?
    .with_root_certificates(roots)
    .with_client_auth_cert(client_certs, client_key)
    .map_err(|e| RpcError::ConnectionFailed(format!("client cert: {}", e)))?;

    Ok(Connector::Rustls(Arc::new(tls)))
}
