//! Frame broker for single-producer, multi-viewer fan-out
//!
//! The broker holds exactly one frame: the most recently published one. It
//! uses `tokio::sync::watch` as a broadcast slot with a retained last value, so
//! publishing never waits on viewers and a slow viewer simply skips ahead to
//! whatever is current when it asks again.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<FrameBroker>
//!                     ┌─────────────────────────┐
//!                     │ watch::Sender<Slot {    │
//!                     │   version: u64,         │
//!                     │   frame: Option<Frame>, │
//!                     │   closed: bool,         │
//!                     │ }>                      │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Producer]              [Viewer]                [Viewer]
//!    publish()          subscriber.next()       subscriber.next()
//!         │                       │                       │
//!         └──► version += 1 ──► wake all ──► write part ──► TCP
//! ```
//!
//! # Zero-Copy Design
//!
//! `Frame` wraps `bytes::Bytes`. Every viewer that picks up a version clones
//! the handle, not the JPEG data, and the slot lock is released before any
//! socket write happens.

pub mod frame;
pub mod store;

pub use frame::{Frame, JPEG_EOI, JPEG_SOI};
pub use store::{BrokerStats, FrameBroker, FrameSnapshot, FrameSubscriber};
