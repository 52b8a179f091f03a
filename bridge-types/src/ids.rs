//! Identity and ordering types for the bridge.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::BridgeTypesError;

/// Sequence number assigned by the source network to a notification.
///
/// Monotonically increasing within one notification category. The RPC
/// daemon encodes 64-bit integers as JSON strings, so deserialization
/// accepts both numbers and decimal strings.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceId(u64);

impl SequenceId {
    /// Create a new SequenceId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this SequenceId.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The sequence id meaning "nothing acknowledged yet".
    pub fn zero() -> Self {
        Self(0)
    }
}

impl Serialize for SequenceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for SequenceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(Self(n)),
            Raw::Str(s) => s.parse().map(Self).map_err(serde::de::Error::custom),
        }
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceId({})", self.0)
    }
}

/// A 32-byte source-network identifier (user ids, content addresses).
///
/// Displayed as 64 lowercase hex characters. The all-zero value is the
/// "empty" identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShortId([u8; 32]);

impl ShortId {
    /// Create a new random ShortId.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create a ShortId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this ShortId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True when every byte is zero.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl ShortId {
    /// Parse an identifier as the RPC daemon encodes it: standard base64
    /// of the raw bytes, or 64 hex characters.
    pub fn from_wire(s: &str) -> Result<Self, BridgeTypesError> {
        if s.len() == 64 {
            if let Ok(id) = s.parse() {
                return Ok(id);
            }
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| BridgeTypesError::InvalidShortId(s.to_string()))?;
        Self::from_bytes(&bytes).ok_or_else(|| BridgeTypesError::InvalidShortId(s.to_string()))
    }
}

impl FromStr for ShortId {
    type Err = BridgeTypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| BridgeTypesError::InvalidShortId(s.to_string()))?;
        Self::from_bytes(&bytes).ok_or_else(|| BridgeTypesError::InvalidShortId(s.to_string()))
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortId({})", &self.to_string()[..16])
    }
}

impl Serialize for ShortId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ShortId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque resumption token issued by the target network's sync endpoint.
///
/// The empty cursor means "no position yet" (initial sync).
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Wrap a token returned by the server.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The empty cursor.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// True if no position is known.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncCursor({:?})", self.0)
    }
}
