//! HTTP surface of the streamer
//!
//! An axum router serving the landing page and the MJPEG stream, plus the
//! `multipart/x-mixed-replace` part framing the stream body is made of.

pub mod multipart;
pub mod page;
pub mod routes;

pub use multipart::{encode_part, part_header, BOUNDARY, PART_TRAILER, STREAM_CONTENT_TYPE};
pub use routes::{error_page, router, AppState, SessionId, INDEX_PATH, STREAM_PATH};
