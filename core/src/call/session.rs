//! Call Session Coordinator
//!
//! Owns one local media stream and at most one peer connection for a call
//! room, relays offer/answer/ICE through the signaling channel and keeps the
//! status label in sync. All collaborators are injected through
//! [`CallPorts`]; peer connection callbacks come back as [`PeerEvent`]
//! values on the receiver returned by [`CallSession::new`].
//!
//! Handlers take `&self` and never hold the state lock across an `.await`,
//! so the session can be shared (`Rc`) between the signaling loop and the
//! peer event loop on a single-threaded executor.

use super::ports::{
    CallView, MediaDevices, MediaStream, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventReceiver, PeerEventSender, SignalingChannel, TrackKind,
};
use super::state::{PeerState, TerminationReason};
use super::status::CallStatus;
use super::CallError;
use crate::config::CallConfig;
use crate::signaling::{IceCandidate, SdpType, SessionDescription, SignalingEvent};
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::rc::Rc;

/// Host collaborators of a call session
#[derive(Clone)]
pub struct CallPorts {
    pub signaling: Rc<dyn SignalingChannel>,
    pub media: Rc<dyn MediaDevices>,
    pub peers: Rc<dyn PeerConnectionFactory>,
    pub view: Rc<dyn CallView>,
}

struct SessionInner {
    state: PeerState,
    /// Set once `start_call` claims the session; never cleared
    started: bool,
    connection: Option<Rc<dyn PeerConnection>>,
    local_stream: Option<Rc<dyn MediaStream>>,
    video_enabled: bool,
    audio_enabled: bool,
    status: CallStatus,
}

pub struct CallSession {
    config: CallConfig,
    ports: CallPorts,
    peer_events: PeerEventSender,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CallSession")
            .field("room", &self.config.room_id)
            .field("state", &inner.state)
            .field("status", &inner.status.text)
            .field("has_local_stream", &inner.local_stream.is_some())
            .finish()
    }
}

impl CallSession {
    /// Create a session. The receiver yields peer connection callbacks and
    /// must be fed back through [`CallSession::handle_peer_event`] (see
    /// [`CallSession::run_peer_events`]).
    pub fn new(config: CallConfig, ports: CallPorts) -> (Self, PeerEventReceiver) {
        let (peer_events, rx) = mpsc::unbounded();
        let session = Self {
            config,
            ports,
            peer_events,
            inner: Mutex::new(SessionInner {
                state: PeerState::Absent,
                started: false,
                connection: None,
                local_stream: None,
                video_enabled: true,
                audio_enabled: true,
                status: CallStatus::default(),
            }),
        };
        (session, rx)
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn peer_state(&self) -> PeerState {
        self.inner.lock().state
    }

    pub fn status(&self) -> CallStatus {
        self.inner.lock().status.clone()
    }

    pub fn video_enabled(&self) -> bool {
        self.inner.lock().video_enabled
    }

    pub fn audio_enabled(&self) -> bool {
        self.inner.lock().audio_enabled
    }

    pub fn has_local_stream(&self) -> bool {
        self.inner.lock().local_stream.is_some()
    }

    pub fn has_connection(&self) -> bool {
        self.inner.lock().connection.is_some()
    }

    // ------------------------------------------------------------------------
    // Call start
    // ------------------------------------------------------------------------

    /// Capture camera and microphone, announce ourselves in the room and ring
    /// the remote participant. A capture failure aborts before any signaling.
    /// The session is claimed before capture, so an overlapping second call
    /// is rejected.
    pub async fn start_call(&self) -> Result<(), CallError> {
        {
            let mut inner = self.inner.lock();
            if inner.started {
                return Err(CallError::AlreadyStarted);
            }
            inner.started = true;
        }

        let stream = match self.ports.media.get_user_media(self.config.media).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Media error: {}", e);
                self.set_status(CallStatus::media_denied());
                return Err(e.into());
            }
        };

        self.ports.view.show_local_stream(&stream);
        self.inner.lock().local_stream = Some(stream);

        let room = self.config.room_id.clone();
        self.ports.signaling.emit(SignalingEvent::JoinCall {
            room: room.clone(),
            user_id: self.config.local.id,
        })?;
        self.ports.signaling.emit(SignalingEvent::CallRequest {
            target_user_id: self.config.remote.id,
            caller_id: self.config.local.id,
            caller_name: self.config.local.name.clone(),
            room,
        })?;

        tracing::info!(
            "Calling {} in {}",
            self.config.remote.id,
            self.config.room_id
        );
        self.set_status(CallStatus::calling(&self.config.remote.name));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound signaling
    // ------------------------------------------------------------------------

    /// Dispatch one event received from the relay.
    ///
    /// Rejected events are logged here and returned so callers can decide
    /// whether to surface them. Out-of-order and wrong-room events leave the
    /// session untouched.
    pub async fn handle_signal(&self, event: SignalingEvent) -> Result<(), CallError> {
        let name = event.name();
        let result = match event {
            SignalingEvent::UserJoined { .. } => self.on_user_joined().await,
            SignalingEvent::Offer { room, offer } => match self.check_room(room) {
                Ok(()) => self.on_offer(offer).await,
                Err(e) => Err(e),
            },
            SignalingEvent::Answer { room, answer } => match self.check_room(room) {
                Ok(()) => self.on_answer(answer).await,
                Err(e) => Err(e),
            },
            SignalingEvent::IceCandidate { room, candidate } => match self.check_room(room) {
                Ok(()) => {
                    self.on_remote_candidate(candidate).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            SignalingEvent::UserLeft { .. } => {
                self.on_user_left();
                Ok(())
            }
            SignalingEvent::CallEnded { .. } => {
                self.on_call_ended();
                Ok(())
            }
            SignalingEvent::CallDeclined { .. } => {
                self.on_call_declined();
                Ok(())
            }
            other => {
                tracing::debug!("Ignoring {} on call page", other);
                Ok(())
            }
        };

        if let Err(e) = &result {
            tracing::warn!("Signal {} rejected: {}", name, e);
        }
        result
    }

    /// The remote participant entered the room: open the connection and
    /// send exactly one offer.
    pub async fn on_user_joined(&self) -> Result<(), CallError> {
        let conn = self.begin_negotiation(PeerState::begin_offer)?;
        self.set_status(CallStatus::peer_joined());

        let offer = async {
            let offer = conn.create_offer().await?;
            conn.set_local_description(&offer).await?;
            Ok::<_, CallError>(offer)
        }
        .await
        .map_err(|e| self.fail_negotiation(e))?;

        self.transition(PeerState::offer_sent)?;
        self.ports.signaling.emit(SignalingEvent::Offer {
            room: self.config.room_id.clone(),
            offer,
        })?;
        tracing::info!("Offer sent to {}", self.config.room_id);
        Ok(())
    }

    /// A remote offer arrived: open the connection and answer it.
    pub async fn on_offer(&self, offer: SessionDescription) -> Result<(), CallError> {
        expect_kind(&offer, SdpType::Offer)?;
        let conn = self.begin_negotiation(PeerState::begin_answer)?;

        let answer = async {
            conn.set_remote_description(&offer).await?;
            let answer = conn.create_answer().await?;
            conn.set_local_description(&answer).await?;
            Ok::<_, CallError>(answer)
        }
        .await
        .map_err(|e| self.fail_negotiation(e))?;

        self.transition(PeerState::answer_sent)?;
        self.ports.signaling.emit(SignalingEvent::Answer {
            room: self.config.room_id.clone(),
            answer,
        })?;
        tracing::info!("Answer sent to {}", self.config.room_id);
        Ok(())
    }

    /// The remote answer to our offer arrived.
    pub async fn on_answer(&self, answer: SessionDescription) -> Result<(), CallError> {
        expect_kind(&answer, SdpType::Answer)?;
        let conn = {
            let mut inner = self.inner.lock();
            let next = inner.state.accept_answer()?;
            let conn = inner.connection.clone().ok_or(CallError::NoConnection)?;
            inner.state = next;
            conn
        };

        conn.set_remote_description(&answer)
            .await
            .map_err(|e| self.fail_negotiation(e.into()))?;
        tracing::debug!("Remote answer applied");
        Ok(())
    }

    /// Apply a remote ICE candidate. Without a live connection the candidate
    /// is dropped; application failures are only logged.
    pub async fn on_remote_candidate(&self, candidate: IceCandidate) {
        let conn = {
            let inner = self.inner.lock();
            if inner.state.is_active() {
                inner.connection.clone()
            } else {
                None
            }
        };

        match conn {
            Some(conn) => {
                if let Err(e) = conn.add_ice_candidate(&candidate).await {
                    tracing::error!("ICE error: {}", e);
                }
            }
            None => tracing::debug!("Dropping ICE candidate: no peer connection"),
        }
    }

    pub fn on_user_left(&self) {
        self.set_status(CallStatus::peer_left());
        self.end_with(false, TerminationReason::RemoteLeft);
    }

    pub fn on_call_ended(&self) {
        self.set_status(CallStatus::call_ended());
        self.end_with(false, TerminationReason::RemoteEnded);
    }

    /// The callee refused. Nothing was established, so nothing is torn down.
    pub fn on_call_declined(&self) {
        self.set_status(CallStatus::declined());
    }

    // ------------------------------------------------------------------------
    // Peer connection callbacks
    // ------------------------------------------------------------------------

    pub async fn handle_peer_event(&self, event: PeerEvent) -> Result<(), CallError> {
        match event {
            PeerEvent::RemoteStream(stream) => {
                self.transition(PeerState::media_arrived)?;
                self.ports.view.show_remote_stream(&stream);
                self.set_status(CallStatus::connected());
                tracing::info!("Remote stream {} attached", stream.id());
            }
            PeerEvent::LocalCandidate(Some(candidate)) => {
                if self.peer_state().is_terminated() {
                    tracing::debug!("Local candidate after teardown; not sent");
                    return Ok(());
                }
                self.ports.signaling.emit(SignalingEvent::IceCandidate {
                    room: self.config.room_id.clone(),
                    candidate,
                })?;
            }
            PeerEvent::LocalCandidate(None) => {
                tracing::debug!("ICE gathering complete");
            }
            PeerEvent::StateChanged(state) if state.is_lost() => {
                self.transition(PeerState::connection_lost)?;
                tracing::warn!("Peer connection {:?}", state);
                self.set_status(CallStatus::connection_lost());
            }
            PeerEvent::StateChanged(state) => {
                tracing::debug!("Peer connection state {:?}", state);
            }
        }
        Ok(())
    }

    /// Feed peer callbacks into the session until the sender side is gone.
    pub async fn run_peer_events(&self, mut events: PeerEventReceiver) {
        while let Some(event) = events.next().await {
            if let Err(e) = self.handle_peer_event(event).await {
                tracing::warn!("Peer event rejected: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Local controls
    // ------------------------------------------------------------------------

    /// Flip the camera. Returns whether video is now enabled.
    pub fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video)
    }

    /// Flip the microphone. Returns whether audio is now enabled.
    pub fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio)
    }

    /// Hang up locally. With `notify_remote` the room is told the call ended
    /// and that we left; without it nothing is sent.
    pub fn end_call(&self, notify_remote: bool) {
        self.end_with(notify_remote, TerminationReason::Hangup);
    }

    /// Page is going away; leave the room so the relay can tell the peer.
    pub fn on_page_unload(&self) {
        if let Err(e) = self.ports.signaling.emit(self.leave_event()) {
            tracing::warn!("leave_call on unload failed: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn toggle(&self, kind: TrackKind) -> bool {
        let (enabled, tracks) = {
            let mut inner = self.inner.lock();
            let flag = match kind {
                TrackKind::Video => &mut inner.video_enabled,
                TrackKind::Audio => &mut inner.audio_enabled,
            };
            *flag = !*flag;
            let enabled = *flag;
            let tracks = inner
                .local_stream
                .as_ref()
                .map(|stream| stream.tracks_of(kind))
                .unwrap_or_default();
            (enabled, tracks)
        };

        for track in &tracks {
            track.set_enabled(enabled);
        }
        self.ports.view.set_toggle_active(kind, !enabled);
        tracing::debug!(
            "{} {} on {} track(s)",
            kind,
            if enabled { "enabled" } else { "disabled" },
            tracks.len()
        );
        enabled
    }

    fn end_with(&self, notify_remote: bool, reason: TerminationReason) {
        let (conn, stream) = {
            let mut inner = self.inner.lock();
            inner.state = inner.state.terminate(reason);
            (inner.connection.take(), inner.local_stream.take())
        };

        if let Some(conn) = conn {
            conn.close();
        }
        if let Some(stream) = stream {
            for track in stream.tracks() {
                track.stop();
            }
        }

        if notify_remote {
            let ended = SignalingEvent::CallEnded {
                room: Some(self.config.room_id.clone()),
            };
            for event in [ended, self.leave_event()] {
                if let Err(e) = self.ports.signaling.emit(event) {
                    tracing::warn!("Hangup signal not sent: {}", e);
                }
            }
        }

        tracing::info!("Call in {} ended ({:?})", self.config.room_id, reason);
        self.ports
            .view
            .redirect_after(&self.config.redirect_url, self.config.redirect_delay());
    }

    /// Claim the negotiation slot, then open a connection carrying every
    /// local track. The state changes before any `.await`, so a second
    /// trigger arriving meanwhile is rejected.
    fn begin_negotiation(
        &self,
        step: fn(PeerState) -> Result<PeerState, CallError>,
    ) -> Result<Rc<dyn PeerConnection>, CallError> {
        let stream = {
            let mut inner = self.inner.lock();
            let next = step(inner.state)?;
            let stream = inner.local_stream.clone().ok_or(CallError::NoLocalMedia)?;
            inner.state = next;
            stream
        };

        match self.open_connection(&stream) {
            Ok(conn) => {
                self.inner.lock().connection = Some(Rc::clone(&conn));
                Ok(conn)
            }
            Err(e) => Err(self.fail_negotiation(e)),
        }
    }

    fn open_connection(
        &self,
        stream: &Rc<dyn MediaStream>,
    ) -> Result<Rc<dyn PeerConnection>, CallError> {
        let conn = self
            .ports
            .peers
            .create(&self.config.ice_servers, self.peer_events.clone())?;
        for track in stream.tracks() {
            if let Err(e) = conn.add_track(&track, stream) {
                conn.close();
                return Err(e.into());
            }
        }
        Ok(conn)
    }

    fn fail_negotiation(&self, err: CallError) -> CallError {
        let conn = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminated() {
                // Hung up while the step was in flight; teardown already ran.
                return err;
            }
            inner.state = inner.state.terminate(TerminationReason::NegotiationFailed);
            inner.connection.take()
        };
        if let Some(conn) = conn {
            conn.close();
        }
        tracing::error!("Negotiation failed: {}", err);
        self.set_status(CallStatus::negotiation_failed());
        err
    }

    fn transition(
        &self,
        step: fn(PeerState) -> Result<PeerState, CallError>,
    ) -> Result<(), CallError> {
        let mut inner = self.inner.lock();
        inner.state = step(inner.state)?;
        Ok(())
    }

    fn set_status(&self, status: CallStatus) {
        self.ports.view.set_status(&status);
        self.inner.lock().status = status;
    }

    fn check_room(&self, room: String) -> Result<(), CallError> {
        if room == self.config.room_id {
            Ok(())
        } else {
            Err(CallError::WrongRoom(room))
        }
    }

    fn leave_event(&self) -> SignalingEvent {
        SignalingEvent::LeaveCall {
            room: self.config.room_id.clone(),
            user_id: Some(self.config.local.id),
        }
    }
}

fn expect_kind(desc: &SessionDescription, expected: SdpType) -> Result<(), CallError> {
    if desc.kind == expected {
        Ok(())
    } else {
        Err(CallError::UnexpectedDescription {
            expected,
            got: desc.kind,
        })
    }
}
