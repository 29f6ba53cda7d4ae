//! Outbound video track
//!
//! Wraps the transport's sample-based local track. Frame payloads are treated
//! as opaque bytes: encoding is the concern of whatever sits upstream of the
//! hub, not of this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::video::pacer::{PacedSample, TrackPacer, VIDEO_CLOCK_RATE};

/// Video codec advertised for the outbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "video/VP8",
            VideoCodec::Vp9 => "video/VP9",
            VideoCodec::H264 => "video/H264",
        }
    }

    /// RTP clock rate (always 90kHz for video)
    pub fn clock_rate(&self) -> u32 {
        VIDEO_CLOCK_RATE
    }

    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "",
            VideoCodec::Vp9 => "profile-id=0",
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
        }
    }

    pub fn capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type().to_string(),
            clock_rate: self.clock_rate(),
            channels: 0,
            sdp_fmtp_line: self.sdp_fmtp().to_string(),
            rtcp_feedback: vec![],
        }
    }
}

/// Outbound track configuration
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    /// Track ID (unique per track, carried in the signaling metadata map)
    pub track_id: String,
    /// Logical stream name this track carries
    pub stream_name: String,
    pub codec: VideoCodec,
}

impl VideoTrackConfig {
    pub fn for_stream(stream_name: &str, codec: VideoCodec) -> Self {
        Self {
            track_id: Uuid::new_v4().to_string(),
            stream_name: stream_name.to_string(),
            codec,
        }
    }
}

/// Per-track send statistics
#[derive(Debug, Clone, Default)]
pub struct VideoTrackStats {
    pub frames_sent: u64,
    pub synthetic_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
}

/// Sample-based outbound video track
pub struct OutboundVideoTrack {
    config: VideoTrackConfig,
    track: Arc<TrackLocalStaticSample>,
    stats: Mutex<VideoTrackStats>,
}

impl OutboundVideoTrack {
    pub fn new(config: VideoTrackConfig) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            config.codec.capability(),
            config.track_id.clone(),
            format!("stream-{}", config.stream_name),
        ));
        Self {
            config,
            track,
            stats: Mutex::new(VideoTrackStats::default()),
        }
    }

    pub fn config(&self) -> &VideoTrackConfig {
        &self.config
    }

    pub fn track_id(&self) -> &str {
        &self.config.track_id
    }

    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    /// Get track as TrackLocal for the peer connection
    pub fn local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub async fn stats(&self) -> VideoTrackStats {
        self.stats.lock().await.clone()
    }

    /// Write one paced sample.
    ///
    /// Write failures are absorbed and counted; a live stream keeps
    /// producing even when the transport briefly rejects a sample.
    pub async fn write(&self, sample: PacedSample) {
        let size = sample.frame.len() as u64;
        let synthetic = sample.frame.synthetic;

        let out = Sample {
            data: sample.frame.data_bytes(),
            duration: sample.duration,
            packet_timestamp: sample.pts,
            ..Default::default()
        };

        let mut stats = self.stats.lock().await;
        if let Err(e) = self.track.write_sample(&out).await {
            stats.errors += 1;
            debug!(
                "write_sample failed on track '{}' ({}): {}",
                self.config.track_id, self.config.stream_name, e
            );
            return;
        }
        stats.frames_sent += 1;
        stats.bytes_sent += size;
        if synthetic {
            stats.synthetic_sent += 1;
        }
    }
}

/// Drive a pacer into a track until the session goes inactive.
///
/// The active flag is checked at the top of every iteration; the in-flight
/// tick completes before the task exits, so the track ends cleanly.
pub fn spawn_sender(
    mut pacer: TrackPacer,
    track: Arc<OutboundVideoTrack>,
    active: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting paced sender for stream '{}' (track {})",
            track.stream_name(),
            track.track_id()
        );
        loop {
            if !active.load(Ordering::SeqCst) {
                break;
            }
            let sample = pacer.next_sample().await;
            track.write(sample).await;
        }
        info!("Paced sender for stream '{}' stopped", track.stream_name());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::{PixelFormat, Resolution};
    use crate::video::frame::VideoFrame;
    use std::time::Duration;

    #[test]
    fn test_codec_properties() {
        assert_eq!(VideoCodec::Vp8.mime_type(), "video/VP8");
        assert_eq!(VideoCodec::Vp8.clock_rate(), 90_000);
        assert_eq!(VideoCodec::H264.clock_rate(), 90_000);
        assert!(VideoCodec::Vp8.sdp_fmtp().is_empty());
    }

    #[test]
    fn test_track_ids_unique_per_track() {
        let a = VideoTrackConfig::for_stream("screen", VideoCodec::Vp8);
        let b = VideoTrackConfig::for_stream("screen", VideoCodec::Vp8);
        assert_ne!(a.track_id, b.track_id);
        assert_eq!(a.stream_name, b.stream_name);
    }

    #[tokio::test]
    async fn test_write_without_binding_counts_error() {
        // A track not yet bound to a peer connection rejects samples; the
        // failure must be absorbed, not propagated.
        let track = OutboundVideoTrack::new(VideoTrackConfig::for_stream(
            "screen",
            VideoCodec::Vp8,
        ));
        let sample = PacedSample {
            frame: VideoFrame::blank(Resolution::VGA, PixelFormat::Rgb24),
            pts: 0,
            duration: Duration::from_millis(33),
        };
        track.write(sample).await;
        let stats = track.stats().await;
        assert_eq!(stats.frames_sent + stats.errors, 1);
    }
}
