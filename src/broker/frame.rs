//! Frame type
//!
//! A frame is one complete JPEG image. It is immutable once created; the next
//! publish supersedes it rather than mutating it.

use bytes::Bytes;

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// One complete JPEG-encoded image
///
/// Cheap to clone due to `Bytes` reference counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Create a frame from encoded image data
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Encoded image bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload starts with SOI and ends with EOI
    ///
    /// Informational only; the broker does not reject frames that fail this.
    pub fn is_complete_jpeg(&self) -> bool {
        self.data.starts_with(&JPEG_SOI) && self.data.ends_with(&JPEG_EOI)
    }

    /// Consume the frame, returning the underlying buffer
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
