//! framecast: paced live-frame streaming over a peer-to-peer media transport
//! with copy-paste signaling.
//!
//! Producers push frames into a [`video::hub::FrameHub`]; one pacer per
//! stream resamples the newest frame to a fixed output rate and feeds an
//! outbound video track. A [`webrtc::StreamSession`] owns the handshake:
//! it prints an offer payload, accepts a pasted answer, and keeps the
//! connection fed until torn down.

use std::sync::OnceLock;

pub mod config;
pub mod error;
pub mod video;
pub mod webrtc;

pub use config::SessionConfig;
pub use error::{AppError, Result};

use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::MediaEngine;
use ::webrtc::api::{APIBuilder, API};
use ::webrtc::interceptor::registry::Registry;

static WEBRTC_API: OnceLock<API> = OnceLock::new();

/// One-time process setup: build the shared transport API with default
/// codecs and interceptors. Must be called before creating any session.
/// Subsequent calls are no-ops.
pub fn init() -> Result<()> {
    if WEBRTC_API.get().is_some() {
        return Ok(());
    }
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::WebRtc(format!("Failed to register codecs: {}", e)))?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| AppError::WebRtc(format!("Failed to register interceptors: {}", e)))?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();
    let _ = WEBRTC_API.set(api);
    Ok(())
}

/// Shared transport API. Errors if [`init`] was never called.
pub(crate) fn webrtc_api() -> Result<&'static API> {
    WEBRTC_API
        .get()
        .ok_or_else(|| AppError::WebRtc("init() must be called before starting a session".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        init().unwrap();
        init().unwrap();
        assert!(webrtc_api().is_ok());
    }
}
