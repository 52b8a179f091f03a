//! Image envelope: which attachment types the bridge forwards and their
//! pixel dimensions. Only the header is read; pixels are never decoded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ::image::{ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

use crate::escape_nick;

/// Errors from inspecting an attachment.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The MIME type is not a supported image type.
    #[error("unknown image type {0:?}")]
    UnsupportedType(String),

    /// The payload could not be read as the declared type.
    #[error("unable to decode {kind}: {source}")]
    Decode {
        /// Declared image kind
        kind: ImageKind,
        /// Underlying decoder error
        #[source]
        source: ::image::ImageError,
    },
}

/// Supported attachment image types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// `image/png`
    Png,
    /// `image/jpeg`
    Jpeg,
    /// `image/gif`
    Gif,
}

impl ImageKind {
    /// Map a MIME type to a supported kind.
    pub fn from_mime(mime: &str) -> Result<Self, ImageError> {
        match mime {
            "image/png" => Ok(ImageKind::Png),
            "image/jpeg" => Ok(ImageKind::Jpeg),
            "image/gif" => Ok(ImageKind::Gif),
            other => Err(ImageError::UnsupportedType(other.to_string())),
        }
    }

    /// MIME type string.
    pub fn mime(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
        }
    }

    /// File extension including the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => ".png",
            ImageKind::Jpeg => ".jpg",
            ImageKind::Gif => ".gif",
        }
    }

    fn format(&self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Gif => ImageFormat::Gif,
        }
    }

    /// Width and height in pixels.
    pub fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), ImageError> {
        ImageReader::with_format(Cursor::new(data), self.format())
            .into_dimensions()
            .map_err(|source| ImageError::Decode { kind: *self, source })
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
            ImageKind::Gif => "gif",
        };
        f.write_str(name)
    }
}

/// File name used when uploading an attachment: the sanitised declared
/// name, or `image_<random><ext>` when that is empty.
pub fn attachment_file_name(declared: &str, kind: ImageKind) -> String {
    let name = escape_nick(declared);
    if !name.is_empty() {
        return name;
    }

    let mut suffix = [0u8; 16];
    // Falls back to a fixed suffix if the OS RNG is unavailable.
    let _ = getrandom::getrandom(&mut suffix);
    format!("image_{}{}", URL_SAFE_NO_PAD.encode(suffix), kind.extension())
}
