//! Peer transport: signaling payloads, session state, outbound tracks, and
//! the connection watchdog.

pub mod payload;
pub mod session;
pub mod state;
pub mod track;
pub mod watchdog;

pub use payload::{SessionDescription, SignalPayload};
pub use session::StreamSession;
pub use state::{ConnectionState, SessionEvent, SignalingState, StateMachine};
pub use track::{OutboundVideoTrack, VideoCodec, VideoTrackConfig};
pub use watchdog::ConnectionWatchdog;
