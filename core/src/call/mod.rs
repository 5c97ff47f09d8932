// Call: the session coordinator and the ports it drives

pub mod loopback;
pub mod memory;
pub mod ports;
pub mod session;
pub mod state;
pub mod status;

pub use loopback::{LoopbackCall, LoopbackParty, RelayedFrame};
pub use ports::{
    CallView, ConnectionState, MediaDevices, MediaError, MediaStream, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerError, PeerEvent, PeerEventReceiver, PeerEventSender,
    SignalingChannel, TrackKind,
};
pub use session::{CallPorts, CallSession};
pub use state::{Negotiation, PeerState, TerminationReason};
pub use status::{CallStatus, StatusClass};

use crate::signaling::{SdpType, SignalingError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Peer connection error: {0}")]
    Peer(#[from] PeerError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Unexpected {event} while {state}")]
    OutOfOrder {
        event: &'static str,
        state: PeerState,
    },

    #[error("Expected {expected} description, got {got}")]
    UnexpectedDescription { expected: SdpType, got: SdpType },

    #[error("Event for room {0} does not belong to this call")]
    WrongRoom(String),

    #[error("No local media stream")]
    NoLocalMedia,

    #[error("No peer connection")]
    NoConnection,

    #[error("Call already started")]
    AlreadyStarted,
}
