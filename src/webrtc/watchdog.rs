//! Connection keepalive watchdog
//!
//! Periodic task owned by the session. While the connection is up it checks
//! every stream's last-delivered-frame age and proactively injects a blank
//! frame for silent streams, so late pacers always find something to send.
//! On a failed or closed connection it stops itself and leaves cleanup to
//! the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::state::ConnectionState;
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;
use crate::video::hub::FrameHub;

/// Watchdog tick interval
const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct ConnectionWatchdog {
    hub: Arc<FrameHub>,
    streams: Vec<String>,
    conn_state: watch::Receiver<ConnectionState>,
    active: Arc<AtomicBool>,
    stale_after: Duration,
    blank_resolution: Resolution,
    pixel_format: PixelFormat,
}

impl ConnectionWatchdog {
    pub fn new(
        hub: Arc<FrameHub>,
        streams: Vec<String>,
        conn_state: watch::Receiver<ConnectionState>,
        active: Arc<AtomicBool>,
        stale_after: Duration,
        blank_resolution: Resolution,
        pixel_format: PixelFormat,
    ) -> Self {
        Self {
            hub,
            streams,
            conn_state,
            active,
            stale_after,
            blank_resolution,
            pixel_format,
        }
    }

    /// Run once per second until the session deactivates or the connection
    /// reaches a terminal state.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            // The first tick fires immediately; skip it so ages can accrue.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !self.active.load(Ordering::SeqCst) {
                    debug!("Watchdog: session inactive, stopping");
                    break;
                }
                match *self.conn_state.borrow() {
                    ConnectionState::Connected => self.feed_silent_streams(),
                    ConnectionState::Failed | ConnectionState::Closed => {
                        info!(
                            "Watchdog: connection {}, stopping",
                            *self.conn_state.borrow()
                        );
                        break;
                    }
                    _ => {}
                }
            }
        })
    }

    /// Inject a blank frame for every stream that has been silent too long
    fn feed_silent_streams(&self) {
        for stream in &self.streams {
            let stale = match self.hub.last_update(stream) {
                Some(at) => at.elapsed() > self.stale_after,
                None => true,
            };
            if stale {
                debug!("Watchdog: stream '{}' silent, injecting blank", stream);
                self.hub.publish(
                    stream,
                    VideoFrame::blank(self.blank_resolution, self.pixel_format),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_watch() -> (
        watch::Sender<ConnectionState>,
        watch::Receiver<ConnectionState>,
    ) {
        watch::channel(ConnectionState::Connected)
    }

    fn frame(sequence: u64) -> VideoFrame {
        let stride = 640 * 3;
        VideoFrame::from_vec(
            vec![7u8; stride * 480],
            Resolution::VGA,
            PixelFormat::Rgb24,
            stride as u32,
            sequence,
        )
    }

    fn watchdog(
        hub: &Arc<FrameHub>,
        streams: &[&str],
        rx: watch::Receiver<ConnectionState>,
        active: &Arc<AtomicBool>,
    ) -> ConnectionWatchdog {
        ConnectionWatchdog::new(
            Arc::clone(hub),
            streams.iter().map(|s| s.to_string()).collect(),
            rx,
            Arc::clone(active),
            Duration::from_secs(1),
            Resolution::VGA,
            PixelFormat::Rgb24,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_gets_blank_frame() {
        let hub = Arc::new(FrameHub::new(Resolution::VGA, PixelFormat::Rgb24));
        hub.register("a");
        hub.register("b");
        let (_tx, rx) = connected_watch();
        let active = Arc::new(AtomicBool::new(true));

        let handle = watchdog(&hub, &["a", "b"], rx, &active).spawn();

        // Only "a" ever receives frames
        for seq in 0..4u64 {
            hub.publish("a", frame(seq));
            tokio::time::sleep(Duration::from_millis(600)).await;
        }

        // "b" was silent: the watchdog must have injected a blank within
        // its staleness window
        let injected = hub.latest("b").expect("blank injected for silent stream");
        assert!(injected.synthetic);
        // "a" keeps its real frame
        assert!(!hub.latest("a").unwrap().synthetic);
        // And "b" never went more than ~2 ticks without an update
        assert!(hub.last_update("b").unwrap().elapsed() < Duration::from_secs(2));

        active.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_failed_connection() {
        let hub = Arc::new(FrameHub::new(Resolution::VGA, PixelFormat::Rgb24));
        hub.register("a");
        let (tx, rx) = connected_watch();
        let active = Arc::new(AtomicBool::new(true));

        let handle = watchdog(&hub, &["a"], rx, &active).spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(ConnectionState::Failed).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_while_not_connected() {
        let hub = Arc::new(FrameHub::new(Resolution::VGA, PixelFormat::Rgb24));
        hub.register("a");
        let (_tx, rx) = watch::channel(ConnectionState::Connecting);
        let active = Arc::new(AtomicBool::new(true));

        let handle = watchdog(&hub, &["a"], rx, &active).spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;
        // No injection while the connection is still coming up
        assert!(hub.latest("a").is_none());

        active.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
