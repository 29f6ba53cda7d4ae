//! Frame source boundary
//!
//! A frame source produces raw image buffers at its own cadence and pushes
//! them through a [`FrameSink`]. The capture mechanism itself (screen
//! grabber, webcam, capture card) lives outside this crate; only the
//! subscribe/unsubscribe surface is fixed here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use super::hub::FrameHub;
use crate::config::{MAX_FPS, MIN_FPS};
use crate::error::{AppError, Result};

/// Callback pair a source delivers into.
///
/// `on_frame` may be called at an arbitrary rate; `on_error` at most once,
/// after which the source stops.
pub struct FrameSink {
    on_frame: Box<dyn Fn(VideoFrame) + Send + Sync>,
    on_error: Box<dyn Fn(AppError) + Send + Sync>,
}

impl FrameSink {
    pub fn new(
        on_frame: impl Fn(VideoFrame) + Send + Sync + 'static,
        on_error: impl Fn(AppError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_frame: Box::new(on_frame),
            on_error: Box::new(on_error),
        }
    }

    /// Sink that publishes into a hub stream and logs source errors
    pub fn into_hub(hub: Arc<FrameHub>, stream: &str) -> Self {
        let stream = stream.to_string();
        let err_stream = stream.clone();
        Self::new(
            move |frame| hub.publish(&stream, frame),
            move |e| {
                // The stream keeps its slot; pacers degrade to blanks until
                // a new source attaches or the session stops.
                error!("Frame source for stream '{}' failed: {}", err_stream, e);
            },
        )
    }

    pub fn deliver(&self, frame: VideoFrame) {
        (self.on_frame)(frame);
    }

    pub fn fail(&self, error: AppError) {
        (self.on_error)(error);
    }
}

/// A producer of raw frames
pub trait FrameSource: Send {
    /// Start delivering frames into the sink
    fn subscribe(&mut self, sink: FrameSink) -> Result<()>;
    /// Stop delivering frames. Idempotent.
    fn unsubscribe(&mut self);
}

/// Synthetic frame source producing a moving gradient at a fixed rate.
///
/// Stands in for the external screen grabber in the CLI and in tests.
pub struct TestPatternSource {
    resolution: Resolution,
    format: PixelFormat,
    fps: u32,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new(resolution: Resolution, format: PixelFormat, fps: u32) -> Result<Self> {
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(AppError::Config(format!(
                "FPS must be between {} and {}, got {}",
                MIN_FPS, MAX_FPS, fps
            )));
        }
        Ok(Self {
            resolution,
            format,
            fps,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    fn render(resolution: Resolution, format: PixelFormat, sequence: u64) -> VideoFrame {
        let bpp = format.bytes_per_pixel();
        let stride = resolution.width as usize * bpp;
        let mut data = vec![0u8; stride * resolution.height as usize];
        let phase = (sequence % 256) as u8;
        for (y, row) in data.chunks_mut(stride).enumerate() {
            for (x, px) in row.chunks_mut(bpp).enumerate() {
                px[0] = (x as u8).wrapping_add(phase);
                if bpp > 1 {
                    px[1] = (y as u8).wrapping_add(phase);
                }
            }
        }
        VideoFrame::from_vec(data, resolution, format, stride as u32, sequence)
    }
}

impl FrameSource for TestPatternSource {
    fn subscribe(&mut self, sink: FrameSink) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::Config("Source already subscribed".into()));
        }

        let running = Arc::clone(&self.running);
        let resolution = self.resolution;
        let format = self.format;
        let interval = Duration::from_micros(1_000_000 / self.fps.max(1) as u64);

        info!(
            "Starting test pattern source: {} {} @ {} fps",
            resolution, format, self.fps
        );

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut sequence = 0u64;
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                sequence += 1;
                sink.deliver(Self::render(resolution, format, sequence));
            }
            debug!("Test pattern source stopped");
        }));

        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::hub::{FrameHub, WaitOutcome};

    #[test]
    fn test_fps_bounds_enforced() {
        assert!(TestPatternSource::new(Resolution::VGA, PixelFormat::Rgb24, 0).is_err());
        assert!(TestPatternSource::new(Resolution::VGA, PixelFormat::Rgb24, 61).is_err());
        assert!(TestPatternSource::new(Resolution::VGA, PixelFormat::Rgb24, 30).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_feeds_hub() {
        let hub = Arc::new(FrameHub::new(Resolution::VGA, PixelFormat::Rgb24));
        hub.register("screen");

        let mut source =
            TestPatternSource::new(Resolution::new(64, 48), PixelFormat::Rgb24, 30).unwrap();
        source
            .subscribe(FrameSink::into_hub(Arc::clone(&hub), "screen"))
            .unwrap();

        assert_eq!(
            hub.await_ready("screen", Duration::from_millis(100)).await,
            WaitOutcome::Ready
        );
        let frame = hub.latest("screen").unwrap();
        assert_eq!(frame.resolution, Resolution::new(64, 48));
        assert!(!frame.synthetic);

        source.unsubscribe();
    }

    #[tokio::test]
    async fn test_double_subscribe_rejected() {
        let hub = Arc::new(FrameHub::new(Resolution::VGA, PixelFormat::Rgb24));
        hub.register("screen");
        let mut source =
            TestPatternSource::new(Resolution::VGA, PixelFormat::Rgb24, 30).unwrap();
        source
            .subscribe(FrameSink::into_hub(Arc::clone(&hub), "screen"))
            .unwrap();
        assert!(source
            .subscribe(FrameSink::into_hub(hub, "screen"))
            .is_err());
        source.unsubscribe();
        source.unsubscribe();
    }
}
