//! # bridge-core
//!
//! Pure logic for the Bison Relay <-> Matrix bridge (no I/O, instant tests).
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//!
//! The actual I/O (websocket RPC, HTTP, disk) is performed by `bridge-client`
//! and `bridge-relay`, which feed data through these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod embed;
pub mod image;
pub mod names;
pub mod rooms;
pub mod watermark;

pub use embed::{find_embeds, replace_embeds, strip_embeds, EmbedDescriptor};
pub use crate::image::{attachment_file_name, ImageError, ImageKind};
pub use names::{escape_nick, quoted_reply_user, rewrite_quoted_reply, DisplayNameCache};
pub use rooms::{RoomMapping, RoomMappingError};
pub use watermark::{Observation, SequenceWatermark};
