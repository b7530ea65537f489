//! HTTP server
//!
//! Accepts viewers and serves each connection with the axum router; stream
//! requests run one `StreamHandler` each, all fed from a shared
//! `FrameBroker`.

pub mod config;
mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use listener::MjpegServer;
