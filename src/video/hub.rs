//! Frame distribution hub
//!
//! Decouples frame producers (capture loops) from frame consumers (outbound
//! track pacers) with last-value-wins semantics: each named stream owns a
//! single slot holding the most recently published frame, never a queue.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::error::{AppError, Result};

/// Outcome of a bounded wait on a stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A new frame was published before the deadline
    Ready,
    /// The deadline elapsed first
    TimedOut,
    /// The stream was unregistered (or never existed)
    Closed,
}

/// Readiness signal carried by each slot's watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotSignal {
    version: u64,
    closed: bool,
}

/// Per-stream state owned exclusively by the hub
struct StreamSlot {
    latest: Option<VideoFrame>,
    last_update: Option<Instant>,
    signal: watch::Sender<SlotSignal>,
    duplicates: u64,
}

impl StreamSlot {
    fn new() -> Self {
        let (signal, _) = watch::channel(SlotSignal {
            version: 0,
            closed: false,
        });
        Self {
            latest: None,
            last_update: None,
            signal,
            duplicates: 0,
        }
    }
}

/// Publish/subscribe hub for per-stream latest frames
///
/// Writes replace the whole slot value atomically under a short lock that is
/// never held across a suspension point; the watch channel is the only object
/// a consumer awaits.
pub struct FrameHub {
    output_resolution: Resolution,
    pixel_format: PixelFormat,
    slots: RwLock<HashMap<String, StreamSlot>>,
}

impl FrameHub {
    /// Create a hub; `output_resolution`/`pixel_format` define the shape of
    /// substitute blank frames.
    pub fn new(output_resolution: Resolution, pixel_format: PixelFormat) -> Self {
        Self {
            output_resolution,
            pixel_format,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Register a stream. Idempotent for an already-registered id.
    pub fn register(&self, stream: &str) {
        let mut slots = self.slots.write();
        if !slots.contains_key(stream) {
            debug!("Registering stream '{}'", stream);
            slots.insert(stream.to_string(), StreamSlot::new());
        }
    }

    /// Publish a frame to a stream.
    ///
    /// Malformed frames (wrong pixel format, undersized buffer) are replaced
    /// by a blank frame of the standard output size; odd dimensions are
    /// cropped down to even. Readiness is signaled in every case so a bad
    /// frame never stalls delivery. Publishing to an unregistered stream is
    /// dropped with a warning.
    pub fn publish(&self, stream: &str, frame: VideoFrame) {
        let frame = self.sanitize(stream, frame).labeled(stream);
        // The full-frame hash pass happens outside the slots lock; readers
        // must never block on it. The previous frame's hash is already
        // cached from its own publish.
        let incoming_hash = (!frame.synthetic).then(|| frame.content_hash());

        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(stream) else {
            warn!("Dropping frame for unregistered stream '{}'", stream);
            return;
        };

        if let (Some(prev), Some(hash)) = (&slot.latest, incoming_hash) {
            if !prev.synthetic && prev.content_hash() == hash {
                slot.duplicates += 1;
                trace!(
                    "Duplicate frame on stream '{}' ({} total)",
                    stream,
                    slot.duplicates
                );
            }
        }

        slot.latest = Some(frame);
        slot.last_update = Some(Instant::now());
        slot.signal.send_modify(|s| s.version += 1);
    }

    /// Validate an incoming frame, substituting a blank on failure
    fn sanitize(&self, stream: &str, frame: VideoFrame) -> VideoFrame {
        if frame.format != self.pixel_format {
            warn!(
                "Stream '{}': expected {} frame, got {}; substituting blank",
                stream, self.pixel_format, frame.format
            );
            return VideoFrame::blank(self.output_resolution, self.pixel_format);
        }
        if let Err(e) = frame.validate() {
            warn!("Stream '{}': {}; substituting blank", stream, e);
            return VideoFrame::blank(self.output_resolution, self.pixel_format);
        }
        frame.cropped_to_even()
    }

    /// Get the latest frame for a stream without consuming it.
    ///
    /// Multiple pacer ticks may observe the same frame if the source is
    /// slower than the output cadence.
    pub fn latest(&self, stream: &str) -> Option<VideoFrame> {
        self.slots.read().get(stream).and_then(|s| s.latest.clone())
    }

    /// When the stream last received a frame
    pub fn last_update(&self, stream: &str) -> Option<Instant> {
        self.slots.read().get(stream).and_then(|s| s.last_update)
    }

    /// Duplicate publish count for a stream (consecutive identical content)
    pub fn duplicate_count(&self, stream: &str) -> u64 {
        self.slots.read().get(stream).map(|s| s.duplicates).unwrap_or(0)
    }

    /// Suspend until the next publish on `stream` or until `timeout` elapses.
    ///
    /// Only publishes after this call starts are observed; the pacer keeps a
    /// persistent [`SlotHandle`] instead so a frame arriving between ticks is
    /// not missed.
    pub async fn await_ready(&self, stream: &str, timeout: Duration) -> WaitOutcome {
        let Some(mut rx) = self.subscribe_signal(stream) else {
            return WaitOutcome::Closed;
        };
        wait_on(&mut rx, timeout).await
    }

    /// Create a persistent per-consumer handle for a registered stream
    pub fn subscribe(self: &Arc<Self>, stream: &str) -> Result<SlotHandle> {
        let rx = self
            .subscribe_signal(stream)
            .ok_or_else(|| AppError::Frame(format!("Unknown stream '{}'", stream)))?;
        Ok(SlotHandle {
            hub: Arc::clone(self),
            stream: stream.to_string(),
            rx,
        })
    }

    fn subscribe_signal(&self, stream: &str) -> Option<watch::Receiver<SlotSignal>> {
        self.slots.read().get(stream).map(|s| s.signal.subscribe())
    }

    /// Remove a stream's slot, waking any waiter with a closed signal
    pub fn unregister(&self, stream: &str) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.remove(stream) {
            debug!("Unregistering stream '{}'", stream);
            slot.signal.send_modify(|s| s.closed = true);
        }
    }

    /// Registered stream names
    pub fn streams(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }
}

/// Shared wait logic for one-shot and persistent subscriptions
async fn wait_on(rx: &mut watch::Receiver<SlotSignal>, timeout: Duration) -> WaitOutcome {
    if rx.borrow().closed {
        return WaitOutcome::Closed;
    }
    match tokio::time::timeout(timeout, rx.changed()).await {
        Err(_) => WaitOutcome::TimedOut,
        Ok(Err(_)) => WaitOutcome::Closed,
        Ok(Ok(())) => {
            if rx.borrow_and_update().closed {
                WaitOutcome::Closed
            } else {
                WaitOutcome::Ready
            }
        }
    }
}

/// Persistent consumer handle for one stream slot.
///
/// Holds its own watch receiver, so a publish that lands between two waits is
/// observed by the next wait (event semantics per consumer).
pub struct SlotHandle {
    hub: Arc<FrameHub>,
    stream: String,
    rx: watch::Receiver<SlotSignal>,
}

impl SlotHandle {
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Bounded wait for the next unseen publish
    pub async fn wait(&mut self, budget: Duration) -> WaitOutcome {
        match self.rx.has_changed() {
            Err(_) => return WaitOutcome::Closed,
            Ok(true) => {
                let signal = *self.rx.borrow_and_update();
                return if signal.closed {
                    WaitOutcome::Closed
                } else {
                    WaitOutcome::Ready
                };
            }
            Ok(false) => {}
        }
        wait_on(&mut self.rx, budget).await
    }

    /// Non-suspending probe: true if an unseen publish is pending
    pub fn try_ready(&mut self) -> bool {
        match self.rx.has_changed() {
            Ok(true) => !self.rx.borrow_and_update().closed,
            _ => false,
        }
    }

    pub fn latest(&self) -> Option<VideoFrame> {
        self.hub.latest(&self.stream)
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.hub.last_update(&self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Arc<FrameHub> {
        Arc::new(FrameHub::new(Resolution::VGA, PixelFormat::Rgb24))
    }

    fn frame(resolution: Resolution, sequence: u64) -> VideoFrame {
        let stride = resolution.width as usize * 3;
        VideoFrame::from_vec(
            vec![(sequence % 256) as u8; stride * resolution.height as usize],
            resolution,
            PixelFormat::Rgb24,
            stride as u32,
            sequence,
        )
    }

    #[tokio::test]
    async fn test_latest_wins_no_history() {
        let hub = hub();
        hub.register("screen");
        hub.publish("screen", frame(Resolution::VGA, 1));
        hub.publish("screen", frame(Resolution::VGA, 2));
        let latest = hub.latest("screen").unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.stream.as_deref(), Some("screen"));
        // Reading does not consume
        assert_eq!(hub.latest("screen").unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_register_idempotent() {
        let hub = hub();
        hub.register("screen");
        hub.publish("screen", frame(Resolution::VGA, 7));
        hub.register("screen");
        assert_eq!(hub.latest("screen").unwrap().sequence, 7);
    }

    #[tokio::test]
    async fn test_odd_dimensions_cropped() {
        let hub = hub();
        hub.register("screen");
        hub.publish("screen", frame(Resolution::new(641, 481), 1));
        let stored = hub.latest("screen").unwrap();
        assert_eq!(stored.resolution, Resolution::new(640, 480));
    }

    #[tokio::test]
    async fn test_malformed_frame_substituted_and_signaled() {
        let hub = hub();
        hub.register("screen");
        let mut handle = hub.subscribe("screen").unwrap();

        // Buffer far too small for the declared resolution
        let bad = VideoFrame::from_vec(
            vec![1u8; 16],
            Resolution::VGA,
            PixelFormat::Rgb24,
            640 * 3,
            1,
        );
        hub.publish("screen", bad);

        // Readiness still fires and a blank stands in
        assert_eq!(
            handle.wait(Duration::from_millis(10)).await,
            WaitOutcome::Ready
        );
        let stored = hub.latest("screen").unwrap();
        assert!(stored.synthetic);
        assert_eq!(stored.resolution, Resolution::VGA);
        assert!(stored.data().iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_await_ready_times_out() {
        let hub = hub();
        hub.register("screen");
        let outcome = hub.await_ready("screen", Duration::from_millis(20)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_unregister_wakes_waiter_closed() {
        let hub = hub();
        hub.register("screen");
        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.await_ready("screen", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.unregister("screen");
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Closed);
        assert_eq!(
            hub.await_ready("screen", Duration::from_millis(5)).await,
            WaitOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let hub = hub();
        hub.register("a");
        hub.register("b");
        hub.publish("a", frame(Resolution::VGA, 3));
        assert!(hub.latest("b").is_none());
        assert_eq!(
            hub.await_ready("b", Duration::from_millis(10)).await,
            WaitOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn test_handle_sees_publish_between_waits() {
        let hub = hub();
        hub.register("screen");
        let mut handle = hub.subscribe("screen").unwrap();
        // Publish lands while nobody is waiting
        hub.publish("screen", frame(Resolution::VGA, 1));
        // Next wait observes it immediately
        assert_eq!(
            handle.wait(Duration::from_millis(1)).await,
            WaitOutcome::Ready
        );
        // And the pending state is consumed
        assert_eq!(
            handle.wait(Duration::from_millis(1)).await,
            WaitOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn test_duplicate_frames_counted() {
        let hub = hub();
        hub.register("screen");
        hub.publish("screen", frame(Resolution::VGA, 4));
        hub.publish("screen", frame(Resolution::VGA, 4));
        assert_eq!(hub.duplicate_count("screen"), 1);
    }

    #[tokio::test]
    async fn test_synthetic_frames_not_counted_as_duplicates() {
        let hub = hub();
        hub.register("screen");
        // Identical injected blanks are keepalive traffic, not duplicates
        hub.publish("screen", VideoFrame::blank(Resolution::VGA, PixelFormat::Rgb24));
        hub.publish("screen", VideoFrame::blank(Resolution::VGA, PixelFormat::Rgb24));
        assert_eq!(hub.duplicate_count("screen"), 0);
        // Real identical frames still count
        hub.publish("screen", frame(Resolution::VGA, 4));
        hub.publish("screen", frame(Resolution::VGA, 4));
        assert_eq!(hub.duplicate_count("screen"), 1);
    }

    #[tokio::test]
    async fn test_publish_unregistered_dropped() {
        let hub = hub();
        hub.publish("ghost", frame(Resolution::VGA, 1));
        assert!(hub.latest("ghost").is_none());
    }
}
