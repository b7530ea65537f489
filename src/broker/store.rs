//! Frame broker implementation
//!
//! The shared hand-off point between the producer and every viewer.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::watch;

use super::frame::Frame;

/// Contents of the watch slot
///
/// Replaced as a whole on every publish, so a reader always sees a version
/// together with the frame it belongs to.
#[derive(Debug, Clone, Default)]
struct Slot {
    /// Number of frames accepted so far (0 = nothing published yet)
    version: u64,
    /// Most recent frame
    frame: Option<Frame>,
    /// Set once the producer is gone
    closed: bool,
}

/// A frame together with the version that identifies it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub frame: Frame,
    pub version: u64,
}

/// Broker statistics
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    /// Frames accepted by `publish`
    pub frames_published: u64,
    /// Total payload bytes accepted by `publish`
    pub bytes_published: u64,
    /// Version of the current frame
    pub version: u64,
    /// Live receivers on the slot (viewers plus in-flight `await_next` calls)
    pub subscribers: usize,
    /// Whether the broker has been closed
    pub closed: bool,
}

/// Holds the latest frame and wakes viewers when it changes
///
/// Construct once and share through `Arc` with the producer and the server.
pub struct FrameBroker {
    tx: watch::Sender<Slot>,
    frames_published: AtomicU64,
    bytes_published: AtomicU64,
}

impl FrameBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Slot::default());

        Self {
            tx,
            frames_published: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
        }
    }

    /// Publish a complete frame
    ///
    /// Replaces the current frame, bumps the version and wakes every waiter.
    /// Never waits on viewers, and works with no viewers at all. Empty
    /// payloads and publishes after `close` are dropped.
    pub fn publish(&self, data: impl Into<Bytes>) {
        let data = data.into();
        if data.is_empty() {
            tracing::debug!("Ignoring empty frame");
            return;
        }

        let size = data.len() as u64;
        let mut version = 0;

        // send_if_modified succeeds with zero receivers, unlike send()
        let accepted = self.tx.send_if_modified(|slot| {
            if slot.closed {
                return false;
            }
            slot.version += 1;
            slot.frame = Some(Frame::new(data));
            version = slot.version;
            true
        });

        if !accepted {
            tracing::debug!("Broker closed, frame dropped");
            return;
        }

        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(size, Ordering::Relaxed);

        tracing::trace!(version = version, size = size, "Frame published");
    }

    /// Wait for a frame newer than `last_seen`
    ///
    /// Returns immediately if the current version is already newer. When
    /// several frames were published in the meantime only the latest is
    /// returned. Returns `None` once the broker is closed.
    pub async fn await_next(&self, last_seen: u64) -> Option<FrameSnapshot> {
        let mut rx = self.tx.subscribe();
        wait_newer(&mut rx, last_seen).await
    }

    /// Create a cursor for one viewer
    ///
    /// The cursor starts before the first version, so its first `next()`
    /// yields the current frame if there is one.
    pub fn subscribe(&self) -> FrameSubscriber {
        FrameSubscriber {
            rx: self.tx.subscribe(),
            last_seen: 0,
        }
    }

    /// Current frame without waiting
    pub fn latest(&self) -> Option<FrameSnapshot> {
        let slot = self.tx.borrow();
        slot.frame.as_ref().map(|frame| FrameSnapshot {
            frame: frame.clone(),
            version: slot.version,
        })
    }

    /// Version of the current frame (0 if none yet)
    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Stop accepting frames and release every waiter
    ///
    /// Waiters, present and future, get `None`. Idempotent.
    pub fn close(&self) {
        let changed = self.tx.send_if_modified(|slot| {
            if slot.closed {
                return false;
            }
            slot.closed = true;
            true
        });

        if changed {
            tracing::info!(
                version = self.version(),
                subscribers = self.tx.receiver_count(),
                "Frame broker closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().closed
    }

    pub fn stats(&self) -> BrokerStats {
        let (version, closed) = {
            let slot = self.tx.borrow();
            (slot.version, slot.closed)
        };

        BrokerStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            version,
            subscribers: self.tx.receiver_count(),
            closed,
        }
    }
}

impl Default for FrameBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-viewer cursor over the broker
///
/// Remembers the last version handed out so the same frame is never yielded
/// twice.
#[derive(Debug)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Slot>,
    last_seen: u64,
}

impl FrameSubscriber {
    /// Wait for the next frame after the last one returned
    ///
    /// Returns `None` when the broker is closed.
    pub async fn next(&mut self) -> Option<FrameSnapshot> {
        let snapshot = wait_newer(&mut self.rx, self.last_seen).await?;
        self.last_seen = snapshot.version;
        Some(snapshot)
    }

    /// Version of the last frame returned by `next` (0 before the first)
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

async fn wait_newer(rx: &mut watch::Receiver<Slot>, last_seen: u64) -> Option<FrameSnapshot> {
    // The read guard is only held for the clone below, never across I/O
    let slot = rx
        .wait_for(|slot| slot.closed || slot.version > last_seen)
        .await
        .ok()?;

    if slot.closed {
        return None;
    }

    let frame = slot.frame.clone()?;
    Some(FrameSnapshot {
        frame,
        version: slot.version,
    })
}
