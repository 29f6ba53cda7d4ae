//! Signaling session
//!
//! Orchestrates the full handshake: create the local offer, gather transport
//! candidates, hand out the copy-paste payload, apply the remote answer, wait
//! for transport readiness within a deadline, keep a watchdog running, and
//! tear everything down idempotently.

use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use super::payload::{SessionDescription, SignalPayload};
use super::state::{ConnectionState, SessionEvent, SignalingState, StateMachine};
use super::track::{spawn_sender, OutboundVideoTrack, VideoCodec, VideoTrackConfig};
use super::watchdog::ConnectionWatchdog;
use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::video::hub::FrameHub;
use crate::video::pacer::TrackPacer;
use crate::webrtc_api;

/// A single streaming session toward one remote peer.
///
/// Exactly one underlying connection is current at a time: `start` tears
/// down any previous one before building the next.
pub struct StreamSession {
    config: SessionConfig,
    hub: Arc<FrameHub>,
    streams: Vec<String>,
    /// Checked at the top of every pacer/watchdog iteration. A fresh flag
    /// is allocated per `start`, so tasks of a torn-down session keep
    /// observing their own flag as false even after a restart re-arms.
    active: SyncMutex<Arc<AtomicBool>>,
    machine: Arc<StateMachine>,
    pc: Arc<Mutex<Option<Arc<RTCPeerConnection>>>>,
    conn_state_tx: Arc<watch::Sender<ConnectionState>>,
    conn_state_rx: watch::Receiver<ConnectionState>,
    ice_state_tx: Arc<watch::Sender<RTCIceConnectionState>>,
    ice_state_rx: watch::Receiver<RTCIceConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamSession {
    /// Create a session streaming the given hub streams. Validates config.
    pub fn new(config: SessionConfig, hub: Arc<FrameHub>, streams: Vec<String>) -> Result<Self> {
        config.validate()?;
        if streams.is_empty() {
            return Err(AppError::Config("At least one stream is required".into()));
        }
        let (conn_state_tx, conn_state_rx) = watch::channel(ConnectionState::New);
        let (ice_state_tx, ice_state_rx) = watch::channel(RTCIceConnectionState::New);
        Ok(Self {
            config,
            hub,
            streams,
            active: SyncMutex::new(Arc::new(AtomicBool::new(false))),
            machine: Arc::new(StateMachine::new()),
            pc: Arc::new(Mutex::new(None)),
            conn_state_tx: Arc::new(conn_state_tx),
            conn_state_rx,
            ice_state_tx: Arc::new(ice_state_tx),
            ice_state_rx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Current signaling state
    pub fn state(&self) -> SignalingState {
        self.machine.current()
    }

    /// Watch signaling state changes
    pub fn state_watch(&self) -> watch::Receiver<SignalingState> {
        self.machine.watch()
    }

    /// Current aggregate connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.conn_state_rx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().load(Ordering::SeqCst)
    }

    /// Whether an underlying connection currently exists
    pub async fn has_connection(&self) -> bool {
        self.pc.lock().await.is_some()
    }

    /// Start a new session: build the connection, add one paced track per
    /// stream, create the offer, gather candidates, and return the
    /// serialized signaling payload to hand to the remote peer.
    pub async fn start(&self) -> Result<String> {
        self.stop().await;
        self.machine.reset();
        let _ = self.conn_state_tx.send(ConnectionState::New);
        let _ = self.ice_state_tx.send(RTCIceConnectionState::New);
        let active = Arc::new(AtomicBool::new(true));
        *self.active.lock() = Arc::clone(&active);

        match self.start_inner(&active).await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                self.machine.apply_if_allowed(SessionEvent::Fail);
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn start_inner(&self, active: &Arc<AtomicBool>) -> Result<String> {
        info!("Creating new peer connection...");
        let api = webrtc_api()?;
        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| AppError::WebRtc(format!("Failed to create peer connection: {}", e)))?,
        );
        self.install_handlers(&pc, active).await;
        // Stored before the fallible steps so a failed start closes it
        *self.pc.lock().await = Some(Arc::clone(&pc));

        // One outbound track + pacer per stream, each bound to its own slot
        let mut metadata = HashMap::new();
        {
            let mut tasks = self.tasks.lock().await;
            for stream in &self.streams {
                self.hub.register(stream);
                let track = Arc::new(OutboundVideoTrack::new(VideoTrackConfig::for_stream(
                    stream,
                    VideoCodec::Vp8,
                )));
                pc.add_track(track.local())
                    .await
                    .map_err(|e| AppError::WebRtc(format!("Failed to add track: {}", e)))?;
                metadata.insert(track.track_id().to_string(), stream.clone());

                let pacer = TrackPacer::new(
                    self.hub.subscribe(stream)?,
                    self.config.target_fps,
                    self.config.output_resolution,
                    self.config.pixel_format,
                );
                tasks.push(spawn_sender(pacer, track, Arc::clone(active)));
            }
        }

        info!("Creating offer...");
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to create offer: {}", e)))?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to set local description: {}", e)))?;
        self.machine.apply(SessionEvent::CreateOffer)?;

        self.machine.apply(SessionEvent::BeginGathering)?;
        info!("Waiting for ICE gathering to complete...");
        self.wait_gathering_complete(&mut gathered).await?;
        self.machine.apply(SessionEvent::GatheringComplete)?;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| AppError::WebRtc("No local description after gathering".into()))?;

        let watchdog = ConnectionWatchdog::new(
            Arc::clone(&self.hub),
            self.streams.clone(),
            self.conn_state_rx.clone(),
            Arc::clone(active),
            self.config.stale_after(),
            self.config.output_resolution,
            self.config.pixel_format,
        );
        self.tasks.lock().await.push(watchdog.spawn());

        let payload =
            SignalPayload::new(SessionDescription::from(&local), metadata).to_json()?;
        self.machine.apply(SessionEvent::AdvertiseOffer)?;
        info!("Offer generated with {} track mapping(s)", self.streams.len());
        Ok(payload)
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let mut ice_servers = Vec::new();
        for stun_url in &self.config.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }
        for turn in &self.config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Register connection and ICE state observers on a fresh connection
    async fn install_handlers(&self, pc: &Arc<RTCPeerConnection>, active: &Arc<AtomicBool>) {
        let conn_state = self.conn_state_tx.clone();
        let machine = Arc::clone(&self.machine);
        let active = Arc::clone(active);
        let pc_store = Arc::clone(&self.pc);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let conn_state = conn_state.clone();
            let machine = Arc::clone(&machine);
            let active = Arc::clone(&active);
            let pc_store = Arc::clone(&pc_store);
            Box::pin(async move {
                let new_state: ConnectionState = s.into();
                info!("Connection state changed to: {}", new_state);
                let _ = conn_state.send(new_state);
                if new_state == ConnectionState::Failed {
                    Self::fail_teardown(machine, active, pc_store);
                }
            })
        }));

        let ice_state = self.ice_state_tx.clone();
        let pc_weak = Arc::downgrade(pc);
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let ice_state = ice_state.clone();
            let pc_weak = pc_weak.clone();
            Box::pin(async move {
                info!("ICE connection state: {}", s);
                let _ = ice_state.send(s);
                if s == RTCIceConnectionState::Disconnected {
                    // Best-effort recovery, not guaranteed
                    if let Some(pc) = pc_weak.upgrade() {
                        info!("ICE disconnected, requesting restart");
                        tokio::spawn(async move {
                            if let Err(e) = pc.restart_ice().await {
                                warn!("ICE restart failed: {}", e);
                            }
                        });
                    }
                }
            })
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            Box::pin(async move {
                debug!("ICE gathering state: {:?}", state);
            })
        }));
    }

    /// Unsolicited teardown after a failed transport: mark the machine
    /// failed, deactivate the session's tasks, and discard the stored
    /// connection. A new session must be started from scratch. Runs in
    /// its own task so the state callback never re-enters the transport.
    fn fail_teardown(
        machine: Arc<StateMachine>,
        active: Arc<AtomicBool>,
        pc_store: Arc<Mutex<Option<Arc<RTCPeerConnection>>>>,
    ) {
        tokio::spawn(async move {
            machine.apply_if_allowed(SessionEvent::Fail);
            active.store(false, Ordering::SeqCst);
            if let Some(pc) = pc_store.lock().await.take() {
                let _ = pc.close().await;
            }
        });
    }

    /// Wait for the gathering-complete signal, bounded by the configured
    /// deadline. A stalled gatherer must not hang the whole handshake.
    async fn wait_gathering_complete(
        &self,
        gathered: &mut tokio::sync::mpsc::Receiver<()>,
    ) -> Result<()> {
        if timeout(self.config.gathering_timeout(), gathered.recv())
            .await
            .is_err()
        {
            return Err(AppError::ConnectionTimeout(format!(
                "ICE gathering did not complete within {:?}",
                self.config.gathering_timeout()
            )));
        }
        Ok(())
    }

    /// Apply the remote answer payload and wait for the connection to come
    /// up within the configured deadline.
    ///
    /// On any failure the session tears itself down before returning, so
    /// the caller never has to call `stop` (though doing so stays safe).
    pub async fn apply_answer(&self, raw: &str) -> Result<()> {
        // Rejected before any state mutation
        let payload = SignalPayload::parse(raw)?;
        if !payload.media_stream_metadata.is_empty() {
            debug!(
                "Received remote stream metadata: {:?}",
                payload.media_stream_metadata
            );
        }

        let pc = self
            .pc
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::WebRtc("Session not started".into()))?;

        match self.apply_answer_inner(&pc, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.machine.apply_if_allowed(SessionEvent::Fail);
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn apply_answer_inner(
        &self,
        pc: &Arc<RTCPeerConnection>,
        payload: SignalPayload,
    ) -> Result<()> {
        let desc = payload.session_description.to_rtc()?;

        info!("Setting remote description...");
        pc.set_remote_description(desc)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to set remote description: {}", e)))?;
        self.machine.apply(SessionEvent::AnswerReceived)?;
        self.machine.apply(SessionEvent::AwaitTransport)?;

        // (a) connectivity checks must succeed; "failed" is terminal
        // immediately, not after the deadline
        info!("Waiting for ICE connection...");
        let mut ice_rx = self.ice_state_rx.clone();
        let reached = timeout(
            self.config.connect_timeout(),
            ice_rx.wait_for(|s| {
                matches!(
                    s,
                    RTCIceConnectionState::Connected
                        | RTCIceConnectionState::Completed
                        | RTCIceConnectionState::Failed
                )
            }),
        )
        .await;
        match reached {
            Err(_) => {
                return Err(AppError::ConnectionTimeout(
                    "Connection establishment timed out".into(),
                ))
            }
            Ok(Err(_)) => return Err(AppError::WebRtc("ICE state observer lost".into())),
            Ok(Ok(state)) if *state == RTCIceConnectionState::Failed => {
                return Err(AppError::ConnectionFailed("ICE connection failed".into()))
            }
            Ok(Ok(_)) => info!("ICE connection established"),
        }

        // (b) aggregate connection signal
        let mut conn_rx = self.conn_state_rx.clone();
        let reached = timeout(
            self.config.connect_timeout(),
            conn_rx.wait_for(|s| {
                matches!(s, ConnectionState::Connected | ConnectionState::Failed)
            }),
        )
        .await;
        match reached {
            Err(_) => {
                return Err(AppError::ConnectionTimeout(
                    "Connection establishment timed out".into(),
                ))
            }
            Ok(Err(_)) => return Err(AppError::WebRtc("Connection state observer lost".into())),
            Ok(Ok(state)) if *state == ConnectionState::Failed => {
                return Err(AppError::ConnectionFailed("Connection failed".into()))
            }
            Ok(Ok(_)) => {}
        }

        self.machine.apply(SessionEvent::TransportReady)?;
        info!("Connection established successfully");
        Ok(())
    }

    /// Tear down the session. Idempotent: safe to call repeatedly,
    /// concurrently with in-flight ticks, or on a session that never
    /// started.
    pub async fn stop(&self) {
        self.active.lock().store(false, Ordering::SeqCst);

        let pc = self.pc.lock().await.take();
        if let Some(pc) = pc {
            self.machine.apply_if_allowed(SessionEvent::BeginClose);
            if pc.connection_state() != RTCPeerConnectionState::Closed {
                info!("Closing peer connection...");
                if let Err(e) = pc.close().await {
                    warn!("Peer connection close failed: {}", e);
                }
                let mut conn_rx = self.conn_state_rx.clone();
                let closed = conn_rx.wait_for(|s| *s == ConnectionState::Closed);
                if timeout(self.config.close_grace(), closed).await.is_err() {
                    warn!("Connection close timed out");
                }
            }
            // The reference is discarded regardless of whether the closed
            // signal arrived in time.
            self.machine.apply_if_allowed(SessionEvent::CloseComplete);
        }

        // Pacer and watchdog tasks observe the cleared active flag and
        // finish their in-flight iteration; wait for them so a restart
        // never races a half-stopped predecessor. Stragglers are aborted.
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for mut handle in handles {
            if timeout(Duration::from_secs(2), &mut handle).await.is_err() {
                warn!("Session task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}
