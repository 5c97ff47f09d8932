//! Ports: everything the call coordinator needs from its host
//!
//! The browser crate implements these over `web_sys`; tests implement them
//! with in-memory fakes. Futures are `?Send` because browser handles are
//! single-threaded.

use crate::config::{IceServer, MediaConstraints};
use crate::signaling::{IceCandidate, SessionDescription, SignalingError, SignalingEvent};
use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// MEDIA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// One captured or received media track
pub trait MediaTrack {
    fn id(&self) -> String;
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Release the capture device. Stopping twice is a no-op.
    fn stop(&self);
    /// Concrete handle, for adapters that need the platform object
    fn as_any(&self) -> &dyn Any;
}

/// A set of tracks bound together (camera + microphone)
pub trait MediaStream {
    fn id(&self) -> String;
    fn tracks(&self) -> Vec<Rc<dyn MediaTrack>>;
    fn as_any(&self) -> &dyn Any;

    fn tracks_of(&self, kind: TrackKind) -> Vec<Rc<dyn MediaTrack>> {
        self.tracks()
            .into_iter()
            .filter(|track| track.kind() == kind)
            .collect()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("No capture device: {0}")]
    DeviceNotFound(String),
    #[error("Media unavailable: {0}")]
    Unavailable(String),
}

/// Camera/microphone access
#[async_trait(?Send)]
pub trait MediaDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Rc<dyn MediaStream>, MediaError>;
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

/// Mirror of `RTCPeerConnectionState`
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

impl ConnectionState {
    /// States the call never recovers from on its own
    pub fn is_lost(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// Callbacks raised by a live peer connection, delivered as values
pub enum PeerEvent {
    /// `ontrack`: remote stream carrying the new track
    RemoteStream(Rc<dyn MediaStream>),
    /// `onicecandidate`: `None` marks end of gathering
    LocalCandidate(Option<IceCandidate>),
    /// `onconnectionstatechange`
    StateChanged(ConnectionState),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::RemoteStream(stream) => {
                f.debug_tuple("RemoteStream").field(&stream.id()).finish()
            }
            PeerEvent::LocalCandidate(candidate) => {
                f.debug_tuple("LocalCandidate").field(candidate).finish()
            }
            PeerEvent::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
        }
    }
}

pub type PeerEventSender = UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = UnboundedReceiver<PeerEvent>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("Failed to create peer connection: {0}")]
    Create(String),
    #[error("Failed to add track: {0}")]
    AddTrack(String),
    #[error("Failed to create {0}: {1}")]
    CreateDescription(&'static str, String),
    #[error("Failed to apply description: {0}")]
    SetDescription(String),
    #[error("Failed to add ICE candidate: {0}")]
    AddCandidate(String),
}

/// The negotiated media transport to the remote participant
#[async_trait(?Send)]
pub trait PeerConnection {
    fn add_track(
        &self,
        track: &Rc<dyn MediaTrack>,
        stream: &Rc<dyn MediaStream>,
    ) -> Result<(), PeerError>;
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), PeerError>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError>;
    fn close(&self);
}

/// Builds peer connections wired to report into `events`
pub trait PeerConnectionFactory {
    fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Rc<dyn PeerConnection>, PeerError>;
}

// ============================================================================
// SIGNALING + VIEW
// ============================================================================

/// Outbound half of the relay connection. Frames are queued, never awaited.
pub trait SignalingChannel {
    fn emit(&self, event: SignalingEvent) -> Result<(), SignalingError>;
}

/// Page elements the call drives
pub trait CallView {
    fn set_status(&self, status: &super::CallStatus);
    fn show_local_stream(&self, stream: &Rc<dyn MediaStream>);
    /// Also hides the remote placeholder
    fn show_remote_stream(&self, stream: &Rc<dyn MediaStream>);
    /// Mark a toggle button as active (the track kind is muted)
    fn set_toggle_active(&self, kind: TrackKind, active: bool);
    /// Leave the call page after `delay`
    fn redirect_after(&self, url: &str, delay: Duration);
}
