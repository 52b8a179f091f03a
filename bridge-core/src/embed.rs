//! Inline attachment tags carried inside plain-text messages.
//!
//! A tag looks like `--embed[type=image/png,filename=cat.png,data=iVBO...]--`.
//! Keys are emitted in a fixed order (part, alt, type, download, filename,
//! size, cost, data) and only when set. Decoding never fails: malformed
//! values degrade to placeholders or defaults so that one bad attachment
//! never loses the surrounding text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bridge_types::ShortId;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const TAG_OPEN: &str = "--embed[";
const TAG_CLOSE: &str = "]--";

/// Characters escaped in `alt` so a description cannot break the tag.
const ALT_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b',')
    .add(b'=')
    .add(b'[')
    .add(b']');

fn embed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"--embed\[.*?\]--").expect("embed pattern is valid"))
}

/// One parsed attachment tag.
///
/// A descriptor is either inline (`data` set) or a reference to shared
/// content (`download`, `filename`, `size`, `cost`). Both sets of fields
/// parse independently; callers use whichever is meaningful to them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedDescriptor {
    /// Descriptor name (`part`, historically `name`)
    pub part: String,
    /// Human description, stored unescaped
    pub alt: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Content address of shared content
    pub download: ShortId,
    /// File name
    pub filename: String,
    /// Size in bytes of shared content
    pub size: u64,
    /// Fee to fetch shared content
    pub cost: u64,
    /// Inline payload
    pub data: Option<Vec<u8>>,
}

impl EmbedDescriptor {
    /// An inline attachment.
    pub fn inline(mime_type: impl Into<String>, filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            filename: filename.into(),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Parse a single tag, including its `--embed[` and `]--` delimiters.
    ///
    /// The argument list is everything between the first `[` and the last
    /// `]`. Segments without `=` and unknown keys are ignored.
    pub fn parse(raw: &str) -> Self {
        let mut args = Self::default();
        let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) else {
            return args;
        };
        if end <= start {
            return args;
        }

        for segment in raw[start + 1..end].split(',') {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            match key {
                "part" | "name" => args.part = value.to_string(),
                "type" => args.mime_type = value.to_string(),
                "data" => {
                    let decoded = STANDARD.decode(value).unwrap_or_else(|err| {
                        format!("[err decoding data: {}]", err).into_bytes()
                    });
                    args.data = Some(decoded);
                }
                "alt" => {
                    args.alt = unescape_alt(value)
                        .unwrap_or_else(|err| format!("[err processing alt: {}]", err));
                }
                // An unparsable address leaves the field empty.
                "download" => args.download = value.parse().unwrap_or_default(),
                "filename" => args.filename = value.to_string(),
                "size" => args.size = value.parse().unwrap_or(0),
                "cost" => args.cost = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        args
    }

    /// True if the descriptor carries an inline payload.
    pub fn is_inline(&self) -> bool {
        self.data.is_some()
    }
}

impl fmt::Display for EmbedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if !self.part.is_empty() {
            parts.push(format!("part={}", self.part));
        }
        if !self.alt.is_empty() {
            parts.push(format!("alt={}", utf8_percent_encode(&self.alt, ALT_ESCAPE)));
        }
        if !self.mime_type.is_empty() {
            parts.push(format!("type={}", self.mime_type));
        }
        if !self.download.is_empty() {
            parts.push(format!("download={}", self.download));
        }
        if !self.filename.is_empty() {
            parts.push(format!("filename={}", self.filename));
        }
        if self.size > 0 {
            parts.push(format!("size={}", self.size));
        }
        if self.cost > 0 {
            parts.push(format!("cost={}", self.cost));
        }
        if let Some(data) = &self.data {
            parts.push(format!("data={}", STANDARD.encode(data)));
        }

        write!(f, "{}{}{}", TAG_OPEN, parts.join(","), TAG_CLOSE)
    }
}

/// Percent-unescape `alt`, rejecting `%` not followed by two hex digits.
fn unescape_alt(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                let bad: String = value[i..].chars().take(3).collect();
                return Err(format!("invalid URL escape {:?}", bad));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|err| err.to_string())
}

/// Every tag in `text`, left to right.
pub fn find_embeds(text: &str) -> Vec<EmbedDescriptor> {
    embed_regex()
        .find_iter(text)
        .map(|m| EmbedDescriptor::parse(m.as_str()))
        .collect()
}

/// Replace every tag in `text` with the result of `replace`.
///
/// Tags are matched non-greedily and without overlap, so two adjacent tags
/// are handled separately.
pub fn replace_embeds<F>(text: &str, mut replace: F) -> String
where
    F: FnMut(EmbedDescriptor) -> String,
{
    embed_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            replace(EmbedDescriptor::parse(&caps[0]))
        })
        .into_owned()
}

/// `text` with every tag removed.
pub fn strip_embeds(text: &str) -> String {
    replace_embeds(text, |_| String::new())
}
