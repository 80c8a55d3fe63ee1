//! Media normalization.
//!
//! Raw image bytes are turned into a bounded, encoded reference the
//! completion backend accepts. Audio is not normalized here; it goes
//! straight to the backend's transcription call.

use crate::error::MediaError;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Default upper bound for accepted images.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// A normalized image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    /// Detected MIME type.
    pub mime_type: &'static str,
    /// `data:` URI carrying the encoded bytes.
    pub data_uri: String,
    /// Size of the accepted input in bytes.
    pub byte_len: usize,
}

/// Trait for media normalization.
#[async_trait]
pub trait MediaNormalizer: Send + Sync {
    /// Normalizes raw image bytes.
    async fn normalize_image(&self, raw: &[u8]) -> Result<NormalizedImage, MediaError>;
}

/// Normalizer that validates and base64-encodes images without resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Base64ImageNormalizer {
    max_bytes: usize,
}

impl Base64ImageNormalizer {
    /// Creates a normalizer accepting images up to `max_bytes`.
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl Default for Base64ImageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_BYTES)
    }
}

#[async_trait]
impl MediaNormalizer for Base64ImageNormalizer {
    async fn normalize_image(&self, raw: &[u8]) -> Result<NormalizedImage, MediaError> {
        if raw.is_empty() {
            return Err(MediaError::Empty);
        }
        if raw.len() > self.max_bytes {
            return Err(MediaError::TooLarge {
                size: raw.len(),
                max: self.max_bytes,
            });
        }
        let mime_type = sniff_image_type(raw).ok_or(MediaError::UnsupportedFormat)?;
        Ok(NormalizedImage {
            mime_type,
            data_uri: format!("data:{mime_type};base64,{}", STANDARD.encode(raw)),
            byte_len: raw.len(),
        })
    }
}

/// Detects the image MIME type from magic bytes.
#[must_use]
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}
