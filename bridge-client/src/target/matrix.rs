//! Matrix client-server API over HTTP.

use super::{
    parse_content_uri, LoginResponse, RoomMessageContent, SyncResponse, TargetApi, TargetError,
};
use async_trait::async_trait;
use bridge_types::SyncCursor;
use reqwest::{Client, Proxy, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for a homeserver.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    /// Base URL, e.g. `https://matrix.example.org:8448`
    pub homeserver: String,
    /// Fully-qualified bridge user id
    pub user_id: String,
    /// Access token, if already known
    pub access_token: Option<String>,
    /// SOCKS5 proxy `host:port` for all traffic
    pub proxy: Option<String>,
}

/// HTTP implementation of [`TargetApi`].
pub struct MatrixClient {
    http: Client,
    base: Url,
    user_id: String,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    content_uri: String,
}

#[derive(Deserialize)]
struct DisplayNameResponse {
    #[serde(default)]
    displayname: Option<String>,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    event_id: String,
}

impl MatrixClient {
    /// Build a client. No request is made.
    pub fn new(config: MatrixConfig) -> Result<Self, TargetError> {
        let base = Url::parse(&config.homeserver)
            .map_err(|e| TargetError::InvalidUrl(format!("{}: {}", config.homeserver, e)))?;
        if base.cannot_be_a_base() {
            return Err(TargetError::InvalidUrl(config.homeserver));
        }

        let mut builder = Client::builder();
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::all(format!("socks5h://{}", proxy))?);
        }

        Ok(Self {
            http: builder.build()?,
            base,
            user_id: config.user_id,
            token: RwLock::new(config.access_token.filter(|t| !t.is_empty())),
        })
    }

    /// Replace the access token.
    pub fn set_access_token(&self, token: impl Into<String>) {
        let mut guard = self.token.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(token.into());
    }

    /// True if a token is configured.
    pub fn has_access_token(&self) -> bool {
        self.token
            .read()
            .map(|t| t.is_some())
            .unwrap_or(false)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TargetError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TargetError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.token.read().ok().and_then(|t| t.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, TargetError> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TargetError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn execute_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, TargetError> {
        let bytes = self.execute(request).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TargetApi for MatrixClient {
    async fn login(&self, user: &str, password: &str) -> Result<LoginResponse, TargetError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "login"])?;
        let body = json!({
            "type": "m.login.password",
            "user": user,
            "password": password,
        });
        let reply: LoginResponse = self.execute_json(self.http.post(url).json(&body)).await?;
        self.set_access_token(reply.access_token.clone());
        info!(user_id = %reply.user_id, device_id = %reply.device_id, "logged in");
        Ok(reply)
    }

    async fn join(&self, room: &str) -> Result<(), TargetError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "join", room])?;
        self.execute(self.http.post(url).json(&json!({}))).await?;
        info!(room, "joined");
        Ok(())
    }

    async fn leave(&self, room: &str) -> Result<(), TargetError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room, "leave"])?;
        self.execute(self.http.post(url).json(&json!({}))).await?;
        info!(room, "left");
        Ok(())
    }

    async fn set_presence(&self, presence: &str) -> Result<(), TargetError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "presence", &self.user_id, "status"])?;
        self.execute(self.http.put(url).json(&json!({ "presence": presence })))
            .await?;
        info!(presence, "presence set");
        Ok(())
    }

    async fn send_read_receipt(&self, room: &str, event_id: &str) -> Result<(), TargetError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room, "read_markers"])?;
        let body = json!({ "m.fully_read": event_id, "m.read": event_id });
        self.execute(self.http.post(url).json(&body)).await?;
        debug!(room, event_id, "sent read receipt");
        Ok(())
    }

    async fn display_name(&self, user_id: &str) -> Result<String, TargetError> {
        let url = self.endpoint(&["_matrix", "client", "v3", "profile", user_id, "displayname"])?;
        let reply: DisplayNameResponse = self.execute_json(self.http.get(url)).await?;
        Ok(reply.displayname.unwrap_or_default())
    }

    async fn upload(&self, filename: &str, mime_type: &str, data: Vec<u8>) -> Result<String, TargetError> {
        let mut url = self.endpoint(&["_matrix", "media", "v3", "upload"])?;
        url.query_pairs_mut().append_pair("filename", filename);

        let size = data.len();
        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(data);
        let reply: UploadResponse = self.execute_json(request).await?;
        if reply.content_uri.is_empty() {
            return Err(TargetError::MissingContentUri);
        }
        debug!(filename, size, content_uri = %reply.content_uri, "uploaded media");
        Ok(reply.content_uri)
    }

    async fn download(&self, content_uri: &str, max_bytes: usize) -> Result<Vec<u8>, TargetError> {
        let (server, media) = parse_content_uri(content_uri)?;
        let url = self.endpoint(&["_matrix", "media", "v3", "download", server, media])?;
        let mut response = self.execute(self.http.get(url)).await?;

        if let Some(len) = response.content_length() {
            if len > max_bytes as u64 {
                return Err(TargetError::TooLarge { limit: max_bytes });
            }
        }

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if data.len() + chunk.len() > max_bytes {
                return Err(TargetError::TooLarge { limit: max_bytes });
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    async fn send_message(&self, room: &str, content: &RoomMessageContent) -> Result<String, TargetError> {
        let txn = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "rooms",
            room,
            "send",
            "m.room.message",
            &txn,
        ])?;
        let reply: SendResponse = self.execute_json(self.http.put(url).json(content)).await?;
        debug!(room, msgtype = %content.msgtype, event_id = %reply.event_id, "sent message");
        Ok(reply.event_id)
    }

    async fn sync(&self, since: &SyncCursor, timeout: Option<Duration>) -> Result<SyncResponse, TargetError> {
        let mut url = self.endpoint(&["_matrix", "client", "v3", "sync"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(timeout) = timeout {
                query.append_pair("timeout", &timeout.as_millis().to_string());
            }
            if !since.is_empty() {
                query.append_pair("since", since.as_str());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        debug!(%url, "sync");
        self.execute_json(self.http.get(url)).await
    }
}
