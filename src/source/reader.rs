//! Frame source reading an MJPEG byte stream

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::broker::FrameBroker;
use crate::error::Result;

use super::splitter::JpegSplitter;

/// Default read size per syscall
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads raw MJPEG from `R` and publishes each frame
///
/// When the input ends or fails the broker is closed, which ends every
/// viewer's stream.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use mjpeg_rs::broker::FrameBroker;
/// use mjpeg_rs::source::FrameSource;
///
/// # async fn example() -> mjpeg_rs::error::Result<()> {
/// let broker = Arc::new(FrameBroker::new());
/// let source = FrameSource::new(tokio::io::stdin(), Arc::clone(&broker));
/// let published = source.run().await?;
/// println!("{} frames", published);
/// # Ok(())
/// # }
/// ```
pub struct FrameSource<R> {
    reader: R,
    broker: Arc<FrameBroker>,
    splitter: JpegSplitter,
}

impl<R: AsyncRead + Unpin> FrameSource<R> {
    pub fn new(reader: R, broker: Arc<FrameBroker>) -> Self {
        Self {
            reader,
            broker,
            splitter: JpegSplitter::new(),
        }
    }

    /// Replace the default frame size cap
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.splitter = JpegSplitter::with_max_frame_size(max);
        self
    }

    /// Publish frames until end of input
    ///
    /// Returns the number of frames published. A read error is returned
    /// after the broker has been closed.
    pub async fn run(mut self) -> Result<u64> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let mut published = 0u64;

        tracing::info!("Frame source started");

        let result = loop {
            buf.clear();
            match self.reader.read_buf(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(_) => {
                    for frame in self.splitter.push(&buf) {
                        self.broker.publish(frame);
                        published += 1;
                    }
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(()) => {
                // Clean end of input: publish the tail if it is a whole image
                if let Some(frame) = self.splitter.finish() {
                    self.broker.publish(frame);
                    published += 1;
                }
                self.broker.close();
                tracing::info!(
                    frames = published,
                    discarded = self.splitter.discarded(),
                    "Frame source finished"
                );
                Ok(published)
            }
            Err(e) => {
                self.broker.close();
                tracing::error!(error = %e, frames = published, "Frame source failed");
                Err(e.into())
            }
        }
    }
}
