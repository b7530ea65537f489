//! Per-viewer stream driver
//!
//! Pulls frames from the broker and writes them to one viewer as multipart
//! parts until the connection fails or the broker closes.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::broker::{Frame, FrameSubscriber};
use crate::http::{part_header, PART_TRAILER};

use super::state::{CloseReason, ViewerSession};

/// Default size of the write buffer in front of the connection
pub const DEFAULT_WRITE_BUFFER: usize = 64 * 1024;

/// Drives the multipart protocol for one viewer
///
/// Generic over the writer: the server hands it the write end of a pipe whose
/// read end is the HTTP response body.
pub struct StreamHandler<W: AsyncWrite + Unpin> {
    session: ViewerSession,
    writer: BufWriter<W>,
    subscriber: FrameSubscriber,
    write_timeout: Option<Duration>,
}

impl<W: AsyncWrite + Unpin> StreamHandler<W> {
    /// Create a handler for a viewer whose response head is already written
    pub fn new(session: ViewerSession, writer: W, subscriber: FrameSubscriber) -> Self {
        Self::with_buffer_size(session, writer, subscriber, DEFAULT_WRITE_BUFFER)
    }

    pub fn with_buffer_size(
        session: ViewerSession,
        writer: W,
        subscriber: FrameSubscriber,
        buffer_size: usize,
    ) -> Self {
        Self {
            session,
            writer: BufWriter::with_capacity(buffer_size, writer),
            subscriber,
            write_timeout: None,
        }
    }

    /// Give up on a viewer that cannot take a part within `timeout`
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Stream until a write fails or the broker closes
    pub async fn run(self) -> ViewerSession {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Stream until a write fails, the broker closes, or `disconnected`
    /// resolves
    ///
    /// `disconnected` lets the caller report a peer that went away while the
    /// handler is idle waiting for a frame.
    pub async fn run_until<F>(mut self, disconnected: F) -> ViewerSession
    where
        F: Future<Output = ()>,
    {
        self.session.start_streaming();

        let reason = tokio::select! {
            reason = self.stream_frames() => reason,
            _ = disconnected => CloseReason::Disconnected,
        };

        if reason == CloseReason::BrokerClosed {
            // Best effort; the viewer sees the end of the response
            let _ = self.writer.shutdown().await;
        }

        self.session.close(reason);
        let session = self.session;

        if reason.is_fault() {
            tracing::warn!(
                session_id = session.id,
                peer = %session.peer_addr,
                reason = %reason,
                frames = session.stats.frames_sent,
                "Removed streaming viewer"
            );
        } else {
            tracing::info!(
                session_id = session.id,
                peer = %session.peer_addr,
                frames = session.stats.frames_sent,
                "Stream ended for viewer"
            );
        }

        session
    }

    async fn stream_frames(&mut self) -> CloseReason {
        loop {
            let snapshot = match self.subscriber.next().await {
                Some(snapshot) => snapshot,
                None => return CloseReason::BrokerClosed,
            };

            match self.send_part(&snapshot.frame).await {
                Ok(written) => {
                    self.session.on_frame(snapshot.version, written);
                    tracing::trace!(
                        session_id = self.session.id,
                        version = snapshot.version,
                        size = snapshot.frame.len(),
                        "Part sent"
                    );
                }
                Err(reason) => return reason,
            }
        }
    }

    /// Write one part and flush it, returning the bytes written
    async fn send_part(&mut self, frame: &Frame) -> Result<u64, CloseReason> {
        let header = part_header(frame.len());
        let total = (header.len() + frame.len() + PART_TRAILER.len()) as u64;

        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(&header).await?;
            writer.write_all(frame.data()).await?;
            writer.write_all(PART_TRAILER).await?;
            writer.flush().await
        };

        let result = match self.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => return Err(CloseReason::WriteTimeout),
            },
            None => write.await,
        };

        match result {
            Ok(()) => Ok(total),
            Err(e) => {
                tracing::debug!(session_id = self.session.id, error = %e, "Write failed");
                Err(CloseReason::from_io(&e))
            }
        }
    }
}
