//! Signaling state machine
//!
//! All session transitions are driven through an explicit transition table so
//! every reachable path is enumerable and testable, instead of being implied
//! by ad hoc callback ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::error::{AppError, Result};

/// Session signaling states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalingState {
    Idle,
    OfferCreated,
    GatheringCandidates,
    OfferReady,
    AwaitingAnswer,
    AnswerApplied,
    AwaitingTransportReady,
    Connected,
    Closing,
    Closed,
    Failed,
}

impl SignalingState {
    /// Terminal states accept no further events
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalingState::Closed | SignalingState::Failed)
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Idle => "idle",
            SignalingState::OfferCreated => "offerCreated",
            SignalingState::GatheringCandidates => "gatheringCandidates",
            SignalingState::OfferReady => "offerReady",
            SignalingState::AwaitingAnswer => "awaitingAnswer",
            SignalingState::AnswerApplied => "answerApplied",
            SignalingState::AwaitingTransportReady => "awaitingTransportReady",
            SignalingState::Connected => "connected",
            SignalingState::Closing => "closing",
            SignalingState::Closed => "closed",
            SignalingState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Events driving the signaling machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    CreateOffer,
    BeginGathering,
    GatheringComplete,
    AdvertiseOffer,
    AnswerReceived,
    AwaitTransport,
    TransportReady,
    BeginClose,
    CloseComplete,
    Fail,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::CreateOffer => "createOffer",
            SessionEvent::BeginGathering => "beginGathering",
            SessionEvent::GatheringComplete => "gatheringComplete",
            SessionEvent::AdvertiseOffer => "advertiseOffer",
            SessionEvent::AnswerReceived => "answerReceived",
            SessionEvent::AwaitTransport => "awaitTransport",
            SessionEvent::TransportReady => "transportReady",
            SessionEvent::BeginClose => "beginClose",
            SessionEvent::CloseComplete => "closeComplete",
            SessionEvent::Fail => "fail",
        };
        write!(f, "{}", name)
    }
}

/// The transition table. Returns the next state, or None if the event is not
/// allowed in the given state.
pub fn transition(state: SignalingState, event: SessionEvent) -> Option<SignalingState> {
    use SessionEvent as E;
    use SignalingState as S;

    // Failure is reachable from any non-terminal state
    if event == E::Fail {
        return if state.is_terminal() {
            None
        } else {
            Some(S::Failed)
        };
    }
    // Teardown may begin from any live state
    if event == E::BeginClose {
        return match state {
            S::Closed | S::Failed | S::Closing => None,
            _ => Some(S::Closing),
        };
    }

    match (state, event) {
        (S::Idle, E::CreateOffer) => Some(S::OfferCreated),
        (S::OfferCreated, E::BeginGathering) => Some(S::GatheringCandidates),
        (S::GatheringCandidates, E::GatheringComplete) => Some(S::OfferReady),
        (S::OfferReady, E::AdvertiseOffer) => Some(S::AwaitingAnswer),
        // A pre-arranged answer may also land before the offer is advertised
        (S::OfferReady, E::AnswerReceived) => Some(S::AnswerApplied),
        (S::AwaitingAnswer, E::AnswerReceived) => Some(S::AnswerApplied),
        (S::AnswerApplied, E::AwaitTransport) => Some(S::AwaitingTransportReady),
        (S::AwaitingTransportReady, E::TransportReady) => Some(S::Connected),
        (S::Closing, E::CloseComplete) => Some(S::Closed),
        _ => None,
    }
}

/// Observable state machine wrapper
pub struct StateMachine {
    tx: watch::Sender<SignalingState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SignalingState::Idle);
        Self { tx }
    }

    pub fn current(&self) -> SignalingState {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<SignalingState> {
        self.tx.subscribe()
    }

    /// Apply an event, rejecting transitions the table does not allow
    pub fn apply(&self, event: SessionEvent) -> Result<SignalingState> {
        let from = self.current();
        match transition(from, event) {
            Some(next) => {
                tracing::debug!("Signaling: {} --{}--> {}", from, event, next);
                // send_replace: the value must update even with no
                // receiver subscribed
                self.tx.send_replace(next);
                Ok(next)
            }
            None => Err(AppError::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
            }),
        }
    }

    /// Apply an event if allowed, otherwise leave the state untouched
    pub fn apply_if_allowed(&self, event: SessionEvent) -> Option<SignalingState> {
        self.apply(event).ok()
    }

    /// Reset to idle for a fresh start
    pub fn reset(&self) {
        self.tx.send_replace(SignalingState::Idle);
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate connection state, mirroring the underlying peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(s: RTCPeerConnectionState) -> Self {
        match s {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                ConnectionState::New
            }
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [SignalingState; 11] = [
        SignalingState::Idle,
        SignalingState::OfferCreated,
        SignalingState::GatheringCandidates,
        SignalingState::OfferReady,
        SignalingState::AwaitingAnswer,
        SignalingState::AnswerApplied,
        SignalingState::AwaitingTransportReady,
        SignalingState::Connected,
        SignalingState::Closing,
        SignalingState::Closed,
        SignalingState::Failed,
    ];

    #[test]
    fn test_happy_path() {
        let machine = StateMachine::new();
        machine.apply(SessionEvent::CreateOffer).unwrap();
        machine.apply(SessionEvent::BeginGathering).unwrap();
        machine.apply(SessionEvent::GatheringComplete).unwrap();
        machine.apply(SessionEvent::AdvertiseOffer).unwrap();
        assert_eq!(machine.current(), SignalingState::AwaitingAnswer);
        machine.apply(SessionEvent::AnswerReceived).unwrap();
        machine.apply(SessionEvent::AwaitTransport).unwrap();
        assert_eq!(machine.current(), SignalingState::AwaitingTransportReady);
        machine.apply(SessionEvent::TransportReady).unwrap();
        assert_eq!(machine.current(), SignalingState::Connected);
        machine.apply(SessionEvent::BeginClose).unwrap();
        machine.apply(SessionEvent::CloseComplete).unwrap();
        assert_eq!(machine.current(), SignalingState::Closed);
    }

    #[test]
    fn test_fail_reachable_from_every_non_terminal() {
        for state in ALL_STATES {
            let next = transition(state, SessionEvent::Fail);
            if state.is_terminal() {
                assert!(next.is_none(), "{} should reject fail", state);
            } else {
                assert_eq!(next, Some(SignalingState::Failed), "from {}", state);
            }
        }
    }

    #[test]
    fn test_terminal_states_reject_all_events() {
        let events = [
            SessionEvent::CreateOffer,
            SessionEvent::BeginGathering,
            SessionEvent::GatheringComplete,
            SessionEvent::AdvertiseOffer,
            SessionEvent::AnswerReceived,
            SessionEvent::AwaitTransport,
            SessionEvent::TransportReady,
            SessionEvent::BeginClose,
            SessionEvent::CloseComplete,
            SessionEvent::Fail,
        ];
        for state in [SignalingState::Closed, SignalingState::Failed] {
            for event in events {
                assert!(
                    transition(state, event).is_none(),
                    "{} should reject {}",
                    state,
                    event
                );
            }
        }
    }

    #[test]
    fn test_transitions_apply_without_observers() {
        // No watch receiver is subscribed; transitions must still land
        let machine = StateMachine::new();
        assert_eq!(
            machine.apply(SessionEvent::CreateOffer).unwrap(),
            SignalingState::OfferCreated
        );
        assert_eq!(machine.current(), SignalingState::OfferCreated);
        assert_eq!(
            machine.apply(SessionEvent::BeginGathering).unwrap(),
            SignalingState::GatheringCandidates
        );
        machine.reset();
        assert_eq!(machine.current(), SignalingState::Idle);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let machine = StateMachine::new();
        // An answer cannot arrive before an offer exists
        assert!(machine.apply(SessionEvent::AnswerReceived).is_err());
        assert_eq!(machine.current(), SignalingState::Idle);
        // Transport cannot be ready before the answer is applied
        machine.apply(SessionEvent::CreateOffer).unwrap();
        assert!(machine.apply(SessionEvent::TransportReady).is_err());
    }

    #[test]
    fn test_close_from_any_live_state() {
        for state in ALL_STATES {
            let next = transition(state, SessionEvent::BeginClose);
            match state {
                SignalingState::Closing | SignalingState::Closed | SignalingState::Failed => {
                    assert!(next.is_none())
                }
                _ => assert_eq!(next, Some(SignalingState::Closing)),
            }
        }
    }

    #[test]
    fn test_connection_state_mapping() {
        assert_eq!(
            ConnectionState::from(RTCPeerConnectionState::Connected),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::from(RTCPeerConnectionState::Failed),
            ConnectionState::Failed
        );
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
