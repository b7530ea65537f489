//! Viewer and server statistics

pub mod metrics;

pub use metrics::{ServerCounters, ServerStats, ViewerStats};
