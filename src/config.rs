//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// Allowed output frame-rate range
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 60;

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g. ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

impl TurnServer {
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}

/// Streaming session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Target output frame rate (samples per second per track)
    pub target_fps: u32,
    /// Standard output resolution, used for synthetic blank frames
    pub output_resolution: Resolution,
    /// Pixel format expected from frame sources
    pub pixel_format: PixelFormat,
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Deadline for each post-answer connectivity wait (ms)
    pub connect_timeout_ms: u64,
    /// Grace period for the closed signal during stop (ms)
    pub close_grace_ms: u64,
    /// ICE candidate gathering deadline (ms)
    pub gathering_timeout_ms: u64,
    /// Per-stream silence threshold before the watchdog injects a blank frame (ms)
    pub stale_after_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            output_resolution: Resolution::VGA,
            pixel_format: PixelFormat::Rgb24,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            connect_timeout_ms: 50_000,
            close_grace_ms: 3_000,
            gathering_timeout_ms: 15_000,
            stale_after_ms: 1_000,
        }
    }
}

impl SessionConfig {
    /// Validate configuration bounds
    pub fn validate(&self) -> Result<()> {
        if !(MIN_FPS..=MAX_FPS).contains(&self.target_fps) {
            return Err(AppError::Config(format!(
                "FPS must be between {} and {}, got {}",
                MIN_FPS, MAX_FPS, self.target_fps
            )));
        }
        if !self.output_resolution.is_valid() {
            return Err(AppError::Config(format!(
                "Invalid output resolution: {}",
                self.output_resolution
            )));
        }
        if self.gathering_timeout_ms == 0 {
            return Err(AppError::Config("Gathering timeout must be > 0".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.target_fps.max(1) as u64)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}
