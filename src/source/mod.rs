//! Producer side
//!
//! Camera encoders and tools like `libcamera-vid --codec mjpeg -o -` or
//! `ffmpeg -f mjpeg -` emit a plain concatenation of JPEG images. The
//! splitter cuts that byte stream into whole JPEG images and the source
//! feeds them into a `FrameBroker`.

pub mod reader;
pub mod splitter;

pub use reader::FrameSource;
pub use splitter::JpegSplitter;
