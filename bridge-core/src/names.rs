//! Sender attribution: display-name cache, quoted-reply rewriting, and nick
//! sanitising.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn quoted_reply_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^> <(@.*?)>").expect("quoted reply pattern is valid"))
}

/// Display names of target-network users, keyed by user id.
///
/// Filled lazily from profile lookups and from membership events; entries
/// never expire. Owned by the single task that polls the target network.
#[derive(Debug, Clone, Default)]
pub struct DisplayNameCache {
    names: HashMap<String, String>,
}

impl DisplayNameCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached name for `user_id`, if known. An empty name is a valid entry.
    pub fn get(&self, user_id: &str) -> Option<&str> {
        self.names.get(user_id).map(String::as_str)
    }

    /// Record (or replace) the name for `user_id`.
    pub fn insert(&mut self, user_id: impl Into<String>, name: impl Into<String>) {
        self.names.insert(user_id.into(), name.into());
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The user id quoted by a leading `> <@user:server>` reply line.
pub fn quoted_reply_user(body: &str) -> Option<&str> {
    quoted_reply_regex()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Replace the quoted user id of a leading reply line with `name`.
pub fn rewrite_quoted_reply(body: &str, name: &str) -> String {
    quoted_reply_regex()
        .replace(body, regex::NoExpand(&format!("> <{}>", name)))
        .into_owned()
}

/// Sanitise a nick for use inside `<nick>` attribution: control characters
/// are dropped, angle brackets become parentheses, and surrounding
/// whitespace is trimmed.
pub fn escape_nick(nick: &str) -> String {
    let cleaned: String = nick
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' => '(',
            '>' => ')',
            other => other,
        })
        .collect();
    cleaned.trim().to_string()
}
