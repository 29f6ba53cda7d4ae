//! Video frame data structures

use bytes::Bytes;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

use super::format::{PixelFormat, Resolution};
use crate::error::{AppError, Result};

/// A raw video frame with metadata
///
/// Frames are immutable values: the pixel buffer is shared behind `Arc` and
/// never mutated after construction. Consumers only ever clone the handle.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw pixel data
    data: Arc<Bytes>,
    /// Cached xxHash64 of frame data (lazy computed for deduplication)
    hash: Arc<OnceLock<u64>>,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Stride (bytes per line)
    pub stride: u32,
    /// Frame sequence number assigned by the producer
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub capture_ts: Instant,
    /// Logical stream this frame belongs to, stamped by the hub on publish
    pub stream: Option<Arc<str>>,
    /// Whether this frame was synthesized rather than captured
    pub synthetic: bool,
}

impl VideoFrame {
    /// Create a new video frame
    pub fn new(
        data: Bytes,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u64,
    ) -> Self {
        Self {
            data: Arc::new(data),
            hash: Arc::new(OnceLock::new()),
            resolution,
            format,
            stride,
            sequence,
            capture_ts: Instant::now(),
            stream: None,
            synthetic: false,
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u64,
    ) -> Self {
        Self::new(Bytes::from(data), resolution, format, stride, sequence)
    }

    /// Create a synthetic all-zero frame of the given size.
    ///
    /// Used as the starvation fallback, the watchdog injection, and the
    /// substitute for malformed frames.
    pub fn blank(resolution: Resolution, format: PixelFormat) -> Self {
        let stride = resolution.width * format.bytes_per_pixel() as u32;
        Self {
            data: Arc::new(Bytes::from(vec![
                0u8;
                format.frame_size(resolution)
            ])),
            hash: Arc::new(OnceLock::new()),
            resolution,
            format,
            stride,
            sequence: 0,
            capture_ts: Instant::now(),
            stream: None,
            synthetic: true,
        }
    }

    /// This frame labeled with its stream
    pub fn labeled(mut self, stream: &str) -> Self {
        self.stream = Some(Arc::from(stream));
        self
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        (*self.data).clone()
    }

    /// Get data length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if frame is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get width
    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    /// Get height
    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Get age of this frame (time since capture)
    pub fn age(&self) -> Duration {
        self.capture_ts.elapsed()
    }

    /// Get hash of frame data (computed once, cached)
    pub fn content_hash(&self) -> u64 {
        *self
            .hash
            .get_or_init(|| xxhash_rust::xxh64::xxh64(self.data.as_ref(), 0))
    }

    /// Check buffer shape against the declared format and resolution
    pub fn validate(&self) -> Result<()> {
        let row_bytes = self.resolution.width as usize * self.format.bytes_per_pixel();
        if (self.stride as usize) < row_bytes {
            return Err(AppError::Frame(format!(
                "Stride {} too small for {} {}",
                self.stride, self.resolution, self.format
            )));
        }
        let needed = self.stride as usize * self.resolution.height as usize;
        if self.data.len() < needed {
            return Err(AppError::Frame(format!(
                "Buffer {} bytes, need {} for {} {} (stride {})",
                self.data.len(),
                needed,
                self.resolution,
                self.format,
                self.stride
            )));
        }
        Ok(())
    }

    /// Return this frame with odd dimensions cropped down to even values.
    ///
    /// Even-dimension frames are returned unchanged (no copy). Cropping copies
    /// row-wise and drops the excess column/row, honoring the source stride.
    pub fn cropped_to_even(&self) -> VideoFrame {
        if self.resolution.is_even() {
            return self.clone();
        }

        let target = self.resolution.cropped_to_even();
        // An undersized buffer cannot be cropped row-wise; substitute a
        // blank of the target shape instead of indexing out of bounds.
        if self.validate().is_err() {
            let mut blank = VideoFrame::blank(target, self.format);
            blank.stream = self.stream.clone();
            return blank;
        }
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = target.width as usize * bpp;
        let mut out = Vec::with_capacity(row_bytes * target.height as usize);
        for y in 0..target.height as usize {
            let start = y * self.stride as usize;
            out.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        VideoFrame {
            data: Arc::new(Bytes::from(out)),
            hash: Arc::new(OnceLock::new()),
            resolution: target,
            format: self.format,
            stride: row_bytes as u32,
            sequence: self.sequence,
            capture_ts: self.capture_ts,
            stream: self.stream.clone(),
            synthetic: self.synthetic,
        }
    }
}

/// Frame metadata without pixel data (for logging)
#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub size: usize,
    pub sequence: u64,
    pub stream: Option<Arc<str>>,
    pub synthetic: bool,
}

impl From<&VideoFrame> for FrameMeta {
    fn from(frame: &VideoFrame) -> Self {
        Self {
            resolution: frame.resolution,
            format: frame.format,
            size: frame.len(),
            sequence: frame.sequence,
            stream: frame.stream.clone(),
            synthetic: frame.synthetic,
        }
    }
}
