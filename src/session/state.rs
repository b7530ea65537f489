//! Viewer session state machine
//!
//! Tracks one stream viewer from the moment the response head is written
//! until the connection is done.
//!
//! ```text
//! HeadersSent ──► Streaming ──► Closed
//!      │                          ▲
//!      └──────────────────────────┘
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use crate::stats::ViewerStats;

/// Viewer lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    /// Stream response head written, no part sent yet
    HeadersSent,
    /// Parts are being delivered
    Streaming,
    /// Terminal
    Closed,
}

/// Why a viewer stopped receiving frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer went away (reset, broken pipe, response body dropped)
    Disconnected,
    /// Any other write failure
    WriteError(io::ErrorKind),
    /// A part could not be written within the write timeout
    WriteTimeout,
    /// The producer stopped and the broker was closed
    BrokerClosed,
}

impl CloseReason {
    /// Classify a write error
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero => CloseReason::Disconnected,
            kind => CloseReason::WriteError(kind),
        }
    }

    /// Whether this ends the viewer because of a connection fault
    pub fn is_fault(&self) -> bool {
        !matches!(self, CloseReason::BrokerClosed)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Disconnected => write!(f, "client disconnected"),
            CloseReason::WriteError(kind) => write!(f, "write failed: {:?}", kind),
            CloseReason::WriteTimeout => write!(f, "write timed out"),
            CloseReason::BrokerClosed => write!(f, "stream ended"),
        }
    }
}

/// State of one stream viewer
#[derive(Debug)]
pub struct ViewerSession {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: ViewerPhase,

    /// When the stream head was sent
    pub started_at: Instant,

    /// Version of the last frame delivered (0 = none)
    pub last_version: u64,

    /// Delivery counters
    pub stats: ViewerStats,

    /// Set once the session reaches `Closed`
    pub close_reason: Option<CloseReason>,
}

impl ViewerSession {
    /// Create a session whose stream head has just been written
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: ViewerPhase::HeadersSent,
            started_at: Instant::now(),
            last_version: 0,
            stats: ViewerStats::new(),
            close_reason: None,
        }
    }

    /// Transition to streaming
    pub fn start_streaming(&mut self) {
        if self.phase == ViewerPhase::HeadersSent {
            self.phase = ViewerPhase::Streaming;
        }
    }

    /// Record a delivered frame
    pub fn on_frame(&mut self, version: u64, bytes: u64) {
        let gap = if self.last_version == 0 {
            0
        } else {
            version.saturating_sub(self.last_version + 1)
        };

        self.last_version = version;
        self.stats.record_frame(bytes, gap);
    }

    /// Enter the terminal phase; the first reason wins
    pub fn close(&mut self, reason: CloseReason) {
        if self.phase == ViewerPhase::Closed {
            return;
        }
        self.phase = ViewerPhase::Closed;
        self.close_reason = Some(reason);
        self.stats.duration = self.started_at.elapsed();
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ViewerPhase::Closed
    }

    pub fn duration(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
