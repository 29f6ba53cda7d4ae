//! Frame capture boundary, distribution hub, and pacing

pub mod format;
pub mod frame;
pub mod hub;
pub mod pacer;
pub mod source;

pub use format::{PixelFormat, Resolution};
pub use frame::{FrameMeta, VideoFrame};
pub use hub::{FrameHub, SlotHandle, WaitOutcome};
pub use pacer::{PacedSample, TrackPacer, VIDEO_CLOCK_RATE};
pub use source::{FrameSink, FrameSource, TestPatternSource};
