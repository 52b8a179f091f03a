//! # brbridge
//!
//! Bridge between Bison Relay group chats and Matrix rooms.
//!
//! ## Architecture
//!
//! ```text
//!  brclient RPC (wss)                               Matrix homeserver
//!        │                                                 │
//!  ┌─────┴──────────────┐                      ┌───────────┴────────┐
//!  │ SequenceAckStream  │  GcReceivedMsg       │  CursorSyncPoller  │
//!  │   (per category)   ├──────────┐  ┌────────┤  (since.json)      │
//!  └─────┬──────────────┘          ▼  ▼        └────────────────────┘
//!        │ invites, pms, ...     ┌───────┐
//!        ▼                       │ Relay │
//!  ┌───────────────┐             └───────┘
//!  │ NoticeHandler │  (allowlist.json)
//!  └───────────────┘
//! ```
//!
//! Every task shares one cancellation token; the first fatal error or
//! Ctrl-C cancels it and the process exits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allowlist;
pub mod config;
pub mod error;
pub mod logging;
pub mod notices;
pub mod relay;

pub use allowlist::{AllowListError, AllowListStore, ALLOWLIST_FILE};
pub use config::{Config, ConfigError, Credentials};
pub use error::{BridgeError, Result};
pub use notices::{NoticeHandler, NoticeQueues};
pub use relay::{from_group_message, Relay, RelayError, RelayPrefixes};
