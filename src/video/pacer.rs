//! Per-track frame pacer
//!
//! Converts irregular frame arrivals into a strictly timed output cadence.
//! Each pacer owns one hub slot handle and emits exactly one sample per
//! `1/target_fps` interval, substituting a synthetic blank frame when the
//! source starves, so the outbound track never stops producing.

use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use super::hub::{SlotHandle, WaitOutcome};

/// RTP reference clock rate for video (90 kHz)
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// One timestamped output sample
#[derive(Debug, Clone)]
pub struct PacedSample {
    pub frame: VideoFrame,
    /// Presentation timestamp in 90 kHz clock units
    pub pts: u32,
    /// Nominal duration of this sample
    pub duration: Duration,
}

/// Fixed-cadence sample emitter for one stream
pub struct TrackPacer {
    slot: SlotHandle,
    frame_interval: Duration,
    /// Timestamp increment per emitted sample (constant, real or synthetic)
    ticks_per_frame: u32,
    blank_resolution: Resolution,
    pixel_format: PixelFormat,
    timestamp: u32,
    last_emit: Option<Instant>,
    held: Option<VideoFrame>,
}

impl TrackPacer {
    pub fn new(
        slot: SlotHandle,
        target_fps: u32,
        blank_resolution: Resolution,
        pixel_format: PixelFormat,
    ) -> Self {
        let fps = target_fps.max(1);
        Self {
            slot,
            frame_interval: Duration::from_micros(1_000_000 / fps as u64),
            ticks_per_frame: VIDEO_CLOCK_RATE / fps,
            blank_resolution,
            pixel_format,
            timestamp: 0,
            last_emit: None,
            held: None,
        }
    }

    pub fn stream(&self) -> &str {
        self.slot.stream()
    }

    /// Current timestamp counter (pts of the next sample)
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Produce the next sample on the fixed cadence.
    ///
    /// Waits at most the remaining tick budget for a fresh frame; a timeout
    /// or a closed slot yields a synthetic blank frame instead of blocking.
    /// The timestamp advances by exactly one frame interval's worth of clock
    /// ticks per call, regardless of what was emitted.
    pub async fn next_sample(&mut self) -> PacedSample {
        let now = Instant::now();
        let target = self
            .last_emit
            .map(|t| t + self.frame_interval)
            .unwrap_or(now);

        let frame = if target > now {
            match self.slot.wait(target - now).await {
                WaitOutcome::Ready => {
                    if let Some(latest) = self.slot.latest() {
                        self.held = Some(latest);
                    }
                    // The frame arrived faster than the output cadence
                    // allows; absorb the residual delay.
                    if Instant::now() < target {
                        tokio::time::sleep_until(target).await;
                    }
                    self.held.clone()
                }
                WaitOutcome::TimedOut | WaitOutcome::Closed => {
                    trace!("Stream '{}' starved, emitting blank", self.slot.stream());
                    tokio::time::sleep_until(target).await;
                    None
                }
            }
        } else {
            // Budget already spent; emit immediately from the last-held
            // frame, picking up a pending publish without waiting.
            if self.slot.try_ready() {
                if let Some(latest) = self.slot.latest() {
                    self.held = Some(latest);
                }
            }
            self.held.clone()
        };

        let frame = frame
            .unwrap_or_else(|| VideoFrame::blank(self.blank_resolution, self.pixel_format));

        let pts = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(self.ticks_per_frame);
        self.last_emit = Some(Instant::now());

        PacedSample {
            frame,
            pts,
            duration: self.frame_interval,
        }
    }
}
