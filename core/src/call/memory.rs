// In-memory ports: useful for testing and for running a call without a browser
//
// Every type records what the session did to it so callers can inspect the
// outcome. `MemoryPeerFactory::loopback()` builds connections that behave
// like a browser on a perfect network: candidates are gathered when a local
// description is set, and remote media shows up once both descriptions are
// in place.

use super::ports::{
    CallView, ConnectionState, MediaDevices, MediaError, MediaStream, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerError, PeerEvent, PeerEventSender, SignalingChannel, TrackKind,
};
use super::status::CallStatus;
use crate::config::{IceServer, MediaConstraints};
use crate::signaling::{IceCandidate, SdpType, SessionDescription, SignalingError, SignalingEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

// ============================================================================
// MEDIA
// ============================================================================

#[derive(Debug)]
pub struct MemoryTrack {
    id: String,
    kind: TrackKind,
    enabled: Cell<bool>,
    stopped: Cell<bool>,
}

impl MemoryTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Cell::new(true),
            stopped: Cell::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

impl MediaTrack for MemoryTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn stop(&self) {
        self.stopped.set(true);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct MemoryStream {
    id: String,
    tracks: Vec<Rc<MemoryTrack>>,
}

impl MemoryStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Rc<MemoryTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// One microphone track and one camera track
    pub fn camera_and_mic(id: &str) -> Self {
        Self::new(
            id,
            vec![
                Rc::new(MemoryTrack::new(format!("{}-audio", id), TrackKind::Audio)),
                Rc::new(MemoryTrack::new(format!("{}-video", id), TrackKind::Video)),
            ],
        )
    }

    pub fn memory_tracks(&self) -> &[Rc<MemoryTrack>] {
        &self.tracks
    }
}

impl MediaStream for MemoryStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn tracks(&self) -> Vec<Rc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|track| Rc::clone(track) as Rc<dyn MediaTrack>)
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hands out a fixed stream, or refuses with a fixed error
pub struct MemoryMediaDevices {
    outcome: Result<Rc<MemoryStream>, MediaError>,
    requests: Cell<usize>,
}

impl MemoryMediaDevices {
    pub fn granting(stream: Rc<MemoryStream>) -> Self {
        Self {
            outcome: Ok(stream),
            requests: Cell::new(0),
        }
    }

    pub fn denying(error: MediaError) -> Self {
        Self {
            outcome: Err(error),
            requests: Cell::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.get()
    }
}

#[async_trait(?Send)]
impl MediaDevices for MemoryMediaDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Rc<dyn MediaStream>, MediaError> {
        self.requests.set(self.requests.get() + 1);
        if !constraints.audio && !constraints.video {
            return Err(MediaError::Unavailable("nothing requested".to_string()));
        }
        match &self.outcome {
            Ok(stream) => Ok(Rc::clone(stream) as Rc<dyn MediaStream>),
            Err(e) => Err(e.clone()),
        }
    }
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

#[derive(Debug, Default)]
struct MemoryPeerInner {
    tracks: Vec<(String, TrackKind)>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    closed: bool,
    media_announced: bool,
}

pub struct MemoryPeerConnection {
    id: usize,
    loopback: bool,
    ice_servers: Vec<IceServer>,
    events: PeerEventSender,
    inner: Mutex<MemoryPeerInner>,
}

impl MemoryPeerConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.inner.lock().tracks.iter().map(|(_, kind)| *kind).collect()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().remote.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().remote_candidates.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Raise `ontrack` with the given remote stream
    pub fn deliver_remote_stream(&self, stream: Rc<dyn MediaStream>) {
        self.raise(PeerEvent::RemoteStream(stream));
    }

    /// Raise `onicecandidate`
    pub fn deliver_local_candidate(&self, candidate: Option<IceCandidate>) {
        self.raise(PeerEvent::LocalCandidate(candidate));
    }

    /// Raise `onconnectionstatechange`
    pub fn deliver_state(&self, state: ConnectionState) {
        self.raise(PeerEvent::StateChanged(state));
    }

    fn raise(&self, event: PeerEvent) {
        if self.events.unbounded_send(event).is_err() {
            tracing::debug!("Peer event dropped: session gone");
        }
    }

    fn describe(&self, kind: SdpType) -> SessionDescription {
        let inner = self.inner.lock();
        let mut sdp = format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.id
        );
        for (_, track_kind) in &inner.tracks {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 0\r\n", track_kind));
        }
        SessionDescription::new(kind, sdp)
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.inner.lock().closed {
            return Err(PeerError::SetDescription("connection closed".to_string()));
        }
        Ok(())
    }

    fn maybe_announce_media(&self) {
        if !self.loopback {
            return;
        }
        let announce = {
            let mut inner = self.inner.lock();
            let ready = inner.local.is_some() && inner.remote.is_some() && !inner.media_announced;
            if ready {
                inner.media_announced = true;
            }
            ready
        };
        if announce {
            self.deliver_state(ConnectionState::Connected);
            let remote = MemoryStream::camera_and_mic(&format!("remote-{}", self.id));
            self.deliver_remote_stream(Rc::new(remote));
        }
    }
}

#[async_trait(?Send)]
impl PeerConnection for MemoryPeerConnection {
    fn add_track(
        &self,
        track: &Rc<dyn MediaTrack>,
        _stream: &Rc<dyn MediaStream>,
    ) -> Result<(), PeerError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PeerError::AddTrack("connection closed".to_string()));
        }
        let id = track.id();
        if inner.tracks.iter().any(|(existing, _)| *existing == id) {
            return Err(PeerError::AddTrack(format!("track {} already added", id)));
        }
        inner.tracks.push((id, track.kind()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()
            .map_err(|e| PeerError::CreateDescription("offer", e.to_string()))?;
        Ok(self.describe(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()
            .map_err(|e| PeerError::CreateDescription("answer", e.to_string()))?;
        let has_offer = matches!(
            self.inner.lock().remote.as_ref().map(|d| d.kind),
            Some(SdpType::Offer)
        );
        if !has_offer {
            return Err(PeerError::CreateDescription(
                "answer",
                "no remote offer".to_string(),
            ));
        }
        Ok(self.describe(SdpType::Answer))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.inner.lock().local = Some(desc.clone());
        if self.loopback {
            let mut candidate = IceCandidate::new(format!(
                "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                self.id,
                50000 + self.id
            ));
            candidate.sdp_mid = Some("0".to_string());
            candidate.sdp_m_line_index = Some(0);
            self.deliver_local_candidate(Some(candidate));
            self.deliver_local_candidate(None);
        }
        self.maybe_announce_media();
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        if !desc.is_well_formed() {
            return Err(PeerError::SetDescription("malformed SDP".to_string()));
        }
        self.inner.lock().remote = Some(desc.clone());
        self.maybe_announce_media();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        let mut inner = self.inner.lock();
        if inner.remote.is_none() {
            return Err(PeerError::AddCandidate(
                "remote description not set".to_string(),
            ));
        }
        inner.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().closed = true;
    }
}

/// Creates [`MemoryPeerConnection`]s and keeps every one it made
#[derive(Default)]
pub struct MemoryPeerFactory {
    loopback: bool,
    fail_create: Cell<bool>,
    created: Mutex<Vec<Rc<MemoryPeerConnection>>>,
}

impl MemoryPeerFactory {
    /// Connections only do what the session asks
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections gather a candidate and produce remote media on their own
    pub fn loopback() -> Self {
        Self {
            loopback: true,
            ..Self::default()
        }
    }

    pub fn fail_next_create(&self) {
        self.fail_create.set(true);
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Rc<MemoryPeerConnection>> {
        self.created.lock().last().cloned()
    }

    pub fn all(&self) -> Vec<Rc<MemoryPeerConnection>> {
        self.created.lock().clone()
    }
}

impl PeerConnectionFactory for MemoryPeerFactory {
    fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Rc<dyn PeerConnection>, PeerError> {
        if self.fail_create.replace(false) {
            return Err(PeerError::Create("refused by factory".to_string()));
        }
        let mut created = self.created.lock();
        let conn = Rc::new(MemoryPeerConnection {
            id: created.len() + 1,
            loopback: self.loopback,
            ice_servers: ice_servers.to_vec(),
            events,
            inner: Mutex::new(MemoryPeerInner::default()),
        });
        created.push(Rc::clone(&conn));
        Ok(conn)
    }
}

// ============================================================================
// SIGNALING
// ============================================================================

/// Records emitted events instead of sending them
#[derive(Debug, Default)]
pub struct MemorySignaling {
    sent: Mutex<Vec<SignalingEvent>>,
    closed: Cell<bool>,
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every further emit fail as a dropped socket would
    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn sent(&self) -> Vec<SignalingEvent> {
        self.sent.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(SignalingEvent::name).collect()
    }

    /// Drain everything emitted so far
    pub fn take(&self) -> Vec<SignalingEvent> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl SignalingChannel for MemorySignaling {
    fn emit(&self, event: SignalingEvent) -> Result<(), SignalingError> {
        if self.closed.get() {
            return Err(SignalingError::Closed);
        }
        self.sent.lock().push(event);
        Ok(())
    }
}

// ============================================================================
// VIEW
// ============================================================================

#[derive(Default)]
struct MemoryViewInner {
    statuses: Vec<CallStatus>,
    local: Option<Rc<dyn MediaStream>>,
    remote: Option<Rc<dyn MediaStream>>,
    toggles: HashMap<TrackKind, bool>,
    redirects: Vec<(String, Duration)>,
}

/// Records what the page would show
#[derive(Default)]
pub struct MemoryView {
    inner: Mutex<MemoryViewInner>,
}

impl MemoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<CallStatus> {
        self.inner.lock().statuses.clone()
    }

    pub fn last_status(&self) -> Option<CallStatus> {
        self.inner.lock().statuses.last().cloned()
    }

    pub fn local_stream_id(&self) -> Option<String> {
        self.inner.lock().local.as_ref().map(|s| s.id())
    }

    pub fn remote_stream_id(&self) -> Option<String> {
        self.inner.lock().remote.as_ref().map(|s| s.id())
    }

    /// Placeholder is hidden once a remote stream is shown
    pub fn placeholder_hidden(&self) -> bool {
        self.inner.lock().remote.is_some()
    }

    pub fn toggle_active(&self, kind: TrackKind) -> bool {
        self.inner.lock().toggles.get(&kind).copied().unwrap_or(false)
    }

    pub fn redirects(&self) -> Vec<(String, Duration)> {
        self.inner.lock().redirects.clone()
    }
}

impl CallView for MemoryView {
    fn set_status(&self, status: &CallStatus) {
        self.inner.lock().statuses.push(status.clone());
    }

    fn show_local_stream(&self, stream: &Rc<dyn MediaStream>) {
        self.inner.lock().local = Some(Rc::clone(stream));
    }

    fn show_remote_stream(&self, stream: &Rc<dyn MediaStream>) {
        self.inner.lock().remote = Some(Rc::clone(stream));
    }

    fn set_toggle_active(&self, kind: TrackKind, active: bool) {
        self.inner.lock().toggles.insert(kind, active);
    }

    fn redirect_after(&self, url: &str, delay: Duration) {
        self.inner.lock().redirects.push((url.to_string(), delay));
    }
}
