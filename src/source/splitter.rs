//! JPEG frame boundary detection
//!
//! Each frame starts at an SOI marker (`FF D8`) and is walked segment by
//! segment: marker segments are skipped by their length field, so an EXIF
//! thumbnail (a whole JPEG inside APP1) never looks like a frame boundary,
//! and entropy-coded data is scanned for the next real marker. The frame is
//! handed out as soon as its EOI (`FF D9`) arrives.
//!
//! Input whose structure cannot be walked falls back to a plainer rule: the
//! frame ends at an EOI directly followed by the next SOI.
//!
//! Bytes outside of any frame are dropped.

use bytes::{Buf, Bytes, BytesMut};

use crate::broker::{JPEG_EOI, JPEG_SOI};

/// Default cap on a single frame (8MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Start of scan
const SOS: u8 = 0xDA;

/// Where the walker is inside the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    /// Between marker segments, `pos` points at the next marker
    Segments,
    /// Inside entropy-coded data after SOS
    EntropyCoded,
    /// Structure not understood; looking for `FF D9 FF D8`
    Unstructured,
}

/// Splits a concatenated MJPEG byte stream into frames
#[derive(Debug)]
pub struct JpegSplitter {
    buf: BytesMut,
    /// Walk position in `buf`; 0 while no frame has started
    pos: usize,
    section: Section,
    max_frame_size: usize,
    /// Frames thrown away for exceeding `max_frame_size`
    discarded: u64,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            pos: 0,
            section: Section::Segments,
            max_frame_size,
            discarded: 0,
        }
    }

    /// Feed raw encoder output, returning every frame completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        self.buf.extend_from_slice(chunk);

        while self.resync() {
            let Some(end) = self.walk() else {
                break;
            };

            let frame = self.buf.split_to(end).freeze();
            self.restart();

            if frame.len() > self.max_frame_size {
                self.discard(frame.len());
            } else {
                frames.push(frame);
            }
        }

        if self.buf.len() > self.max_frame_size {
            self.discard(self.buf.len());
            self.buf.clear();
            self.restart();
        }

        frames
    }

    /// Flush the trailing frame at end of input
    ///
    /// Returns it only if it is a whole image; a truncated tail is dropped.
    pub fn finish(&mut self) -> Option<Bytes> {
        let complete = self.buf.len() >= JPEG_SOI.len() + JPEG_EOI.len()
            && self.buf.starts_with(&JPEG_SOI)
            && self.buf.ends_with(&JPEG_EOI);

        let rest = self.buf.split().freeze();
        self.restart();

        if complete {
            Some(rest)
        } else {
            if !rest.is_empty() {
                tracing::debug!(size = rest.len(), "Dropping truncated frame at end of input");
            }
            None
        }
    }

    /// Bytes of the frame still being assembled
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn restart(&mut self) {
        self.pos = 0;
        self.section = Section::Segments;
    }

    fn discard(&mut self, size: usize) {
        tracing::warn!(
            size = size,
            limit = self.max_frame_size,
            "Discarding oversized frame"
        );
        self.discarded += 1;
    }

    /// Make sure a frame has started at the front of the buffer
    ///
    /// Returns false if there is no SOI yet.
    fn resync(&mut self) -> bool {
        if self.pos > 0 {
            return true;
        }

        match find(&self.buf, 0, &JPEG_SOI) {
            Some(start) => {
                self.buf.advance(start);
                self.pos = JPEG_SOI.len();
                self.section = Section::Segments;
                true
            }
            None => {
                // A trailing FF may be the first half of a marker
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let drop = self.buf.len() - keep;
                self.buf.advance(drop);
                false
            }
        }
    }

    /// Advance through the current frame
    ///
    /// Returns the frame length once its end is in the buffer.
    fn walk(&mut self) -> Option<usize> {
        loop {
            let len = self.buf.len();

            match self.section {
                Section::Segments => {
                    // Fill bytes may pad any marker
                    while self.pos + 1 < len
                        && self.buf[self.pos] == 0xFF
                        && self.buf[self.pos + 1] == 0xFF
                    {
                        self.pos += 1;
                    }
                    if self.pos + 2 > len {
                        return None;
                    }
                    if self.buf[self.pos] != 0xFF {
                        self.section = Section::Unstructured;
                        continue;
                    }

                    match self.buf[self.pos + 1] {
                        0xD9 => return Some(self.pos + 2),
                        // Standalone markers carry no length
                        0x01 | 0xD0..=0xD7 => self.pos += 2,
                        0xD8 | 0x00 => {
                            self.section = Section::Unstructured;
                        }
                        marker => {
                            if self.pos + 4 > len {
                                return None;
                            }
                            let size = u16::from_be_bytes([
                                self.buf[self.pos + 2],
                                self.buf[self.pos + 3],
                            ]);
                            if size < 2 {
                                self.section = Section::Unstructured;
                                continue;
                            }
                            self.pos += 2 + size as usize;
                            if marker == SOS {
                                self.section = Section::EntropyCoded;
                            }
                        }
                    }
                }
                Section::EntropyCoded => {
                    let mut i = self.pos;
                    loop {
                        if i + 1 >= len {
                            // Wait for the byte after a trailing FF
                            self.pos = i.min(len).max(self.pos);
                            return None;
                        }
                        if self.buf[i] != 0xFF {
                            i += 1;
                            continue;
                        }
                        match self.buf[i + 1] {
                            // Stuffed zero and restart markers belong to the scan
                            0x00 | 0xD0..=0xD7 => i += 2,
                            0xFF => i += 1,
                            _ => {
                                self.pos = i;
                                self.section = Section::Segments;
                                break;
                            }
                        }
                    }
                }
                Section::Unstructured => {
                    let from = self.pos.max(JPEG_SOI.len());
                    return match find(&self.buf, from, &[0xFF, 0xD9, 0xFF, 0xD8]) {
                        Some(at) => Some(at + JPEG_EOI.len()),
                        None => {
                            self.pos = len.saturating_sub(3).max(JPEG_SOI.len());
                            None
                        }
                    };
                }
            }
        }
    }
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn find(buf: &[u8], from: usize, pattern: &[u8]) -> Option<usize> {
    let from = from.min(buf.len());
    buf[from..]
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|pos| pos + from)
}
