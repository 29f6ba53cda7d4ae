//! Out-of-band signaling payload
//!
//! The only bit-exact wire contract in the system: a JSON object carrying the
//! session description plus a track-id to stream-name map, exchanged by
//! copy-paste. Both the offer and the answer use the same shape; the metadata
//! map lets the receiving side label each track by logical stream name
//! instead of an opaque transport id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{AppError, Result};

/// Serialized session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// SDP body
    pub sdp: String,
    /// "offer" or "answer"
    #[serde(rename = "type")]
    pub kind: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "offer".to_string(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
        }
    }

    /// Convert to the underlying transport's description type
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        match self.kind.as_str() {
            "offer" => RTCSessionDescription::offer(self.sdp.clone())
                .map_err(|e| AppError::InvalidPayload(format!("Invalid SDP offer: {}", e))),
            "answer" => RTCSessionDescription::answer(self.sdp.clone())
                .map_err(|e| AppError::InvalidPayload(format!("Invalid SDP answer: {}", e))),
            other => Err(AppError::InvalidPayload(format!(
                "Unsupported description type '{}'",
                other
            ))),
        }
    }
}

impl From<&RTCSessionDescription> for SessionDescription {
    fn from(desc: &RTCSessionDescription) -> Self {
        Self {
            sdp: desc.sdp.clone(),
            kind: desc.sdp_type.to_string(),
        }
    }
}

/// Copy-paste signaling payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    /// Payload discriminator, kept for producer compatibility
    #[serde(default = "SignalPayload::default_kind")]
    pub kind: String,
    pub session_description: SessionDescription,
    /// Track id to logical stream name
    #[serde(default)]
    pub media_stream_metadata: HashMap<String, String>,
}

impl SignalPayload {
    fn default_kind() -> String {
        "sessionDescription".to_string()
    }

    pub fn new(
        session_description: SessionDescription,
        media_stream_metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            kind: Self::default_kind(),
            session_description,
            media_stream_metadata,
        }
    }

    /// Parse and validate a pasted payload.
    ///
    /// Rejected before any session state is touched: empty input, broken
    /// JSON, blank sdp or description type.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidPayload("Empty payload".to_string()));
        }

        let payload: SignalPayload = serde_json::from_str(trimmed)
            .map_err(|e| AppError::InvalidPayload(format!("Unparseable payload: {}", e)))?;

        if payload.session_description.sdp.trim().is_empty() {
            return Err(AppError::InvalidPayload("Missing sdp".to_string()));
        }
        if payload.session_description.kind.trim().is_empty() {
            return Err(AppError::InvalidPayload(
                "Missing description type".to_string(),
            ));
        }
        Ok(payload)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
