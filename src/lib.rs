//! Live MJPEG distribution over HTTP
//!
//! One producer publishes complete JPEG frames into a [`FrameBroker`]; any
//! number of HTTP viewers receive them as a `multipart/x-mixed-replace`
//! stream. Viewers always get the latest frame and never a backlog: a slow
//! viewer skips frames instead of queueing them, and the producer never waits
//! on a viewer.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use mjpeg_rs::{FrameBroker, FrameSource, MjpegServer, ServerConfig};
//!
//! # async fn example() -> mjpeg_rs::Result<()> {
//! let broker = Arc::new(FrameBroker::new());
//! let server = MjpegServer::new(ServerConfig::default(), Arc::clone(&broker));
//!
//! // Raw MJPEG on stdin, e.g. from `libcamera-vid --codec mjpeg -o -`
//! tokio::spawn(FrameSource::new(tokio::io::stdin(), broker).run());
//!
//! server.run().await
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod http;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;

pub use broker::{Frame, FrameBroker, FrameSnapshot, FrameSubscriber};
pub use error::{Error, Result};
pub use server::{MjpegServer, ServerConfig};
pub use session::{StreamHandler, ViewerSession};
pub use source::{FrameSource, JpegSplitter};
