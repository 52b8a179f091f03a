//! Room mapping between the two networks.
//!
//! Each pair links one source-network group chat alias to one target-network
//! room id. A room id may appear in at most one pair, on either side.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors building a [`RoomMapping`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomMappingError {
    /// A room id appears in more than one position.
    #[error("room {0} is already bridged elsewhere")]
    AlreadyBridged(String),

    /// A pair contains an empty room id.
    #[error("invalid bridge: empty room id")]
    EmptyRoom,
}

/// Immutable one-to-one association of source rooms and target rooms.
#[derive(Debug, Clone, Default)]
pub struct RoomMapping {
    to_target: HashMap<String, String>,
    to_source: HashMap<String, String>,
    pairs: Vec<(String, String)>,
}

impl RoomMapping {
    /// Build from `(source_room, target_room)` pairs.
    ///
    /// Fails if any id is empty or appears twice anywhere in the input,
    /// e.g. `{(A,B),(A,C)}` or `{(A,B),(C,A)}`.
    pub fn new<I, S, T>(pairs: I) -> Result<Self, RoomMappingError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut mapping = Self::default();

        for (source, target) in pairs {
            let (source, target) = (source.into(), target.into());
            for room in [&source, &target] {
                if room.is_empty() {
                    return Err(RoomMappingError::EmptyRoom);
                }
                if !seen.insert(room.clone()) {
                    return Err(RoomMappingError::AlreadyBridged(room.clone()));
                }
            }
            mapping.to_target.insert(source.clone(), target.clone());
            mapping.to_source.insert(target.clone(), source.clone());
            mapping.pairs.push((source, target));
        }

        Ok(mapping)
    }

    /// Target room bridged to a source room.
    pub fn target_for(&self, source_room: &str) -> Option<&str> {
        self.to_target.get(source_room).map(String::as_str)
    }

    /// Source room bridged to a target room.
    pub fn source_for(&self, target_room: &str) -> Option<&str> {
        self.to_source.get(target_room).map(String::as_str)
    }

    /// All pairs in configuration order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Target rooms in configuration order.
    pub fn target_rooms(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, target)| target.as_str())
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True if no rooms are bridged.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
