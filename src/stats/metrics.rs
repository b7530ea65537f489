//! Statistics and metrics for viewers and the server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-viewer statistics
#[derive(Debug, Clone, Default)]
pub struct ViewerStats {
    /// Parts written to the viewer
    pub frames_sent: u64,
    /// Bytes written, including part headers
    pub bytes_sent: u64,
    /// Versions published but never sent because the viewer was behind
    pub frames_skipped: u64,
    /// Time since the stream started
    pub duration: Duration,
}

impl ViewerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one delivered part
    ///
    /// `gap` is how many versions were jumped over to reach this one.
    pub fn record_frame(&mut self, bytes: u64, gap: u64) {
        self.frames_sent += 1;
        self.bytes_sent += bytes;
        self.frames_skipped += gap;
    }

    /// Effective frame rate over the stream's lifetime
    pub fn framerate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }

    /// Average throughput in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

/// Server-wide statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Connections currently open
    pub active_connections: u64,
    /// Connections turned away by the connection limit
    pub rejected_connections: u64,
    /// Viewers currently receiving the stream
    pub active_viewers: u64,
    /// Parts written across all viewers
    pub total_frames_sent: u64,
    /// Bytes written across all viewers
    pub total_bytes_sent: u64,
    /// Uptime
    pub uptime: Duration,
}

/// Live counters shared by every connection task
#[derive(Debug)]
pub struct ServerCounters {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    active_viewers: AtomicU64,
    total_frames_sent: AtomicU64,
    total_bytes_sent: AtomicU64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            active_viewers: AtomicU64::new(0),
            total_frames_sent: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn viewer_joined(&self) {
        self.active_viewers.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished viewer's totals into the server totals
    pub fn viewer_left(&self, stats: &ViewerStats) {
        self.active_viewers.fetch_sub(1, Ordering::Relaxed);
        self.total_frames_sent
            .fetch_add(stats.frames_sent, Ordering::Relaxed);
        self.total_bytes_sent
            .fetch_add(stats.bytes_sent, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            active_viewers: self.active_viewers.load(Ordering::Relaxed),
            total_frames_sent: self.total_frames_sent.load(Ordering::Relaxed),
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerCounters {
    fn default() -> Self {
        Self::new()
    }
}
