//! `multipart/x-mixed-replace` framing
//!
//! Each frame goes out as one part:
//!
//! ```text
//! --FRAME\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <len>\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```
//!
//! The browser replaces the displayed image with each new part.

use bytes::{BufMut, Bytes, BytesMut};

use crate::broker::Frame;

/// Boundary token separating parts
pub const BOUNDARY: &str = "FRAME";

/// Content type of the stream response
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=FRAME";

/// Bytes written after each frame payload
pub const PART_TRAILER: &[u8] = b"\r\n";

/// Boundary line and part headers for a payload of `len` bytes
pub fn part_header(len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(80);
    buf.put_slice(b"--");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", len).as_bytes());
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Complete part for `frame` in one buffer
///
/// Copies the payload; the stream handler writes header, payload and trailer
/// separately instead.
pub fn encode_part(frame: &Frame) -> Bytes {
    let header = part_header(frame.len());
    let mut buf = BytesMut::with_capacity(header.len() + frame.len() + PART_TRAILER.len());
    buf.put_slice(&header);
    buf.put_slice(frame.data());
    buf.put_slice(PART_TRAILER);
    buf.freeze()
}
