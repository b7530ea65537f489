//! Viewer sessions
//!
//! A session is created for every accepted `/stream.mjpg` request. The
//! `StreamHandler` owns it for the rest of the connection and hands it back,
//! closed, when streaming stops.

pub mod handler;
pub mod state;

pub use handler::StreamHandler;
pub use state::{CloseReason, ViewerPhase, ViewerSession};
