//! Configuration loading for brbridge.
//!
//! Configuration is loaded from a TOML file (default:
//! `<data_dir>/brbridge.toml`).
//!
//! ```toml
//! [source]
//! url = "wss://127.0.0.1:7676/ws"
//! server_cert = "~/.brclient/rpc.cert"
//! client_cert = "~/.brclient/rpc-client.cert"
//! client_key = "~/.brclient/rpc-client.key"
//!
//! [target]
//! homeserver = "https://matrix.example.org:8448"
//! user = "@brbridge:example.org"
//! token = "syt_..."
//!
//! [bridge]
//! rooms = [["dev", "!abcdef:example.org"]]
//! ```

use bridge_client::{MatrixConfig, SourceTlsConfig};
use bridge_core::{RoomMapping, RoomMappingError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "brbridge.toml";

/// Root configuration for brbridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source network (Bison Relay client RPC) connection.
    #[serde(default)]
    pub source: SourceConfig,
    /// Target network (Matrix) account.
    pub target: TargetConfig,
    /// Room pairs and attribution.
    pub bridge: BridgeConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source network connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Websocket URL of the client RPC server.
    #[serde(default = "default_source_url")]
    pub url: String,
    /// Certificate of the RPC server.
    #[serde(default = "default_server_cert")]
    pub server_cert: PathBuf,
    /// Client certificate presented to the RPC server.
    #[serde(default = "default_client_cert")]
    pub client_cert: PathBuf,
    /// Private key of the client certificate.
    #[serde(default = "default_client_key")]
    pub client_key: PathBuf,
}

/// Target network account.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Homeserver base URL.
    pub homeserver: String,
    /// Bridge user, `@localpart:server`.
    #[serde(default)]
    pub user: String,
    /// Password, used to log in when no token is set.
    #[serde(default)]
    pub password: Option<String>,
    /// Access token.
    #[serde(default)]
    pub token: Option<String>,
    /// SOCKS5 proxy `host:port` for all homeserver traffic.
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Room pairs and attribution.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// `[source_room, target_room]` pairs.
    #[serde(default)]
    pub rooms: Vec<[String; 2]>,
    /// Prefix of source-origin lines shown on the target (default: `[br]`).
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
    /// Prefix of target-origin lines shown on the source (default: `[m]`).
    #[serde(default = "default_target_prefix")]
    pub target_prefix: String,
    /// Capacity of each hand-off queue (default: 16).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Log output.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` (default: `info`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write daily log files under `<data_dir>/logs` (default: true).
    #[serde(default = "default_log_file")]
    pub file: bool,
}

/// How the bridge authenticates to the homeserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A configured access token.
    Token(String),
    /// Log in with a password at startup.
    Password(String),
}

// Default value functions
fn default_source_url() -> String {
    "wss://127.0.0.1:7676/ws".to_string()
}

fn default_server_cert() -> PathBuf {
    PathBuf::from("~/.brclient/rpc.cert")
}

fn default_client_cert() -> PathBuf {
    PathBuf::from("~/.brclient/rpc-client.cert")
}

fn default_client_key() -> PathBuf {
    PathBuf::from("~/.brclient/rpc-client.key")
}

fn default_source_prefix() -> String {
    "[br]".to_string()
}

fn default_target_prefix() -> String {
    "[m]".to_string()
}

fn default_queue_capacity() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            server_cert: default_server_cert(),
            client_cert: default_client_cert(),
            client_key: default_client_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl Config {
    /// Path of the config file inside `data_dir`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    /// Load, validate and expand a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validated()
    }

    /// Check the invariants and expand `~` in certificate paths.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.source.url.trim().is_empty() {
            return Err(ConfigError::MissingField("source.url"));
        }
        if self.target.homeserver.trim().is_empty() {
            return Err(ConfigError::MissingField("target.homeserver"));
        }
        if self.target.user.is_empty() {
            return Err(ConfigError::MissingField("target.user"));
        }
        if !is_user_id(&self.target.user) {
            return Err(ConfigError::InvalidUser(self.target.user.clone()));
        }
        self.credentials()?;
        if self.bridge.rooms.is_empty() {
            return Err(ConfigError::NoRooms);
        }
        self.room_mapping()?;
        if self.bridge.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        self.source.server_cert = expand_tilde(&self.source.server_cert);
        self.source.client_cert = expand_tilde(&self.source.client_cert);
        self.source.client_key = expand_tilde(&self.source.client_key);
        Ok(self)
    }

    /// Bridged room pairs.
    pub fn room_mapping(&self) -> Result<RoomMapping, ConfigError> {
        let pairs = self
            .bridge
            .rooms
            .iter()
            .map(|[source, target]| (source.clone(), target.clone()));
        Ok(RoomMapping::new(pairs)?)
    }

    /// Homeserver credentials. A token takes precedence over a password.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        if let Some(token) = non_empty(&self.target.token) {
            return Ok(Credentials::Token(token));
        }
        if let Some(password) = non_empty(&self.target.password) {
            return Ok(Credentials::Password(password));
        }
        Err(ConfigError::MissingCredentials)
    }

    /// Settings for the source websocket.
    pub fn source_tls(&self) -> SourceTlsConfig {
        SourceTlsConfig {
            url: self.source.url.clone(),
            server_cert_path: self.source.server_cert.clone(),
            client_cert_path: self.source.client_cert.clone(),
            client_key_path: self.source.client_key.clone(),
        }
    }

    /// Settings for the homeserver client.
    pub fn matrix(&self) -> MatrixConfig {
        MatrixConfig {
            homeserver: self.target.homeserver.clone(),
            user_id: self.target.user.clone(),
            access_token: match self.credentials() {
                Ok(Credentials::Token(token)) => Some(token),
                _ => None,
            },
            proxy: self.target.proxy.clone().filter(|p| !p.is_empty()),
        }
    }
}

/// `@localpart:server` with both parts non-empty.
fn is_user_id(user: &str) -> bool {
    let Some(rest) = user.strip_prefix('@') else {
        return false;
    };
    matches!(rest.split_once(':'), Some((local, server)) if !local.is_empty() && !server.is_empty())
}

/// Replace a leading `~` with the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A required value is empty.
    #[error("{0} is required")]
    MissingField(&'static str),
    /// The bridge user is not a full user id.
    #[error("target user {0:?} invalid: must be in the form @user:server")]
    InvalidUser(String),
    /// Neither token nor password is set.
    #[error("target token or password is required")]
    MissingCredentials,
    /// No room pairs.
    #[error("no bridges defined")]
    NoRooms,
    /// Room pairs overlap.
    #[error(transparent)]
    Rooms(#[from] RoomMappingError),
    /// Zero queue capacity.
    #[error("bridge.queue_capacity must be positive")]
    InvalidQueueCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[target]
homeserver = "https://matrix.example.org"
user = "@bridge:example.org"
token = "t0k"

[bridge]
rooms = [["dev", "!dev:example.org"]]
"#;

    fn parse(toml: &str) -> Result<Config, ConfigError> {
        toml::from_str::<Config>(toml).unwrap().validated()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.source.url, "wss://127.0.0.1:7676/ws");
        assert_eq!(config.bridge.source_prefix, "[br]");
        assert_eq!(config.bridge.target_prefix, "[m]");
        assert_eq!(config.bridge.queue_capacity, 16);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file);
        assert!(!config.source.server_cert.starts_with("~"));
        assert_eq!(config.credentials().unwrap(), Credentials::Token("t0k".into()));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[source]
url = "wss://10.0.0.1:7777/ws"
server_cert = "/etc/br/rpc.cert"
client_cert = "/etc/br/client.cert"
client_key = "/etc/br/client.key"

[target]
homeserver = "https://matrix.example.org:8448"
user = "@bridge:example.org"
password = "hunter2"
proxy = "127.0.0.1:9050"

[bridge]
rooms = [["dev", "!dev:example.org"], ["ops", "!ops:example.org"]]
source_prefix = "<br>"

[logging]
level = "debug"
file = false
"#;

        let config = parse(toml).unwrap();
        assert_eq!(config.source.server_cert, PathBuf::from("/etc/br/rpc.cert"));
        assert_eq!(config.credentials().unwrap(), Credentials::Password("hunter2".into()));
        assert_eq!(config.bridge.source_prefix, "<br>");
        assert!(!config.logging.file);

        let rooms = config.room_mapping().unwrap();
        assert_eq!(rooms.target_for("ops"), Some("!ops:example.org"));

        let matrix = config.matrix();
        assert_eq!(matrix.access_token, None);
        assert_eq!(matrix.proxy.as_deref(), Some("127.0.0.1:9050"));

        let tls = config.source_tls();
        assert_eq!(tls.client_key_path, PathBuf::from("/etc/br/client.key"));
    }

    #[test]
    fn token_wins_over_password() {
        let toml = MINIMAL.replace("token = \"t0k\"", "token = \"t0k\"\npassword = \"pw\"");
        let config = parse(&toml).unwrap();
        assert_eq!(config.credentials().unwrap(), Credentials::Token("t0k".into()));
        assert_eq!(config.matrix().access_token.as_deref(), Some("t0k"));
    }

    #[test]
    fn missing_user_rejected() {
        let toml = MINIMAL.replace("user = \"@bridge:example.org\"\n", "");
        assert!(matches!(parse(&toml), Err(ConfigError::MissingField("target.user"))));
    }

    #[test]
    fn malformed_user_rejected() {
        for user in ["bridge:example.org", "@bridge", "@:example.org", "@bridge:"] {
            let toml = MINIMAL.replace("@bridge:example.org", user);
            assert!(
                matches!(parse(&toml), Err(ConfigError::InvalidUser(_))),
                "accepted {}",
                user
            );
        }
    }

    #[test]
    fn credentials_required() {
        let toml = MINIMAL.replace("token = \"t0k\"", "token = \"\"");
        assert!(matches!(parse(&toml), Err(ConfigError::MissingCredentials)));
    }

    #[test]
    fn rooms_required() {
        let toml = MINIMAL.replace("rooms = [[\"dev\", \"!dev:example.org\"]]", "rooms = []");
        assert!(matches!(parse(&toml), Err(ConfigError::NoRooms)));
    }

    #[test]
    fn duplicate_rooms_rejected() {
        let toml = MINIMAL.replace(
            "rooms = [[\"dev\", \"!dev:example.org\"]]",
            "rooms = [[\"dev\", \"!a:example.org\"], [\"dev\", \"!b:example.org\"]]",
        );
        assert!(matches!(
            parse(&toml),
            Err(ConfigError::Rooms(RoomMappingError::AlreadyBridged(room))) if room == "dev"
        ));
    }

    #[test]
    fn unknown_keys_rejected() {
        let toml = format!("{}\nbogus = 1\n", MINIMAL);
        assert!(toml::from_str::<Config>(&toml).is_err());
    }

    #[test]
    fn read_error_names_path() {
        let err = Config::from_file(Path::new("/nonexistent/brbridge.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/brbridge.toml"));
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde(Path::new("~/certs/rpc.cert"));
        assert!(expanded.ends_with("certs/rpc.cert"));
        assert_ne!(expanded, PathBuf::from("~/certs/rpc.cert"));
        assert_eq!(expand_tilde(Path::new("/abs/x")), PathBuf::from("/abs/x"));
    }
}
