// Matchcall Core: two-party video call signaling
//
// The call page coordinator, the relay protocol it speaks, and the room
// logic the relay runs. Nothing in here touches a browser or a socket;
// hosts plug in through the traits in `call::ports`.

pub mod call;
pub mod config;
pub mod signaling;

pub use call::{CallError, CallPorts, CallSession, CallStatus, PeerState};
pub use config::{CallConfig, ConfigError, IceServer, MediaConstraints, Participant};
pub use signaling::{
    call_room_id, IceCandidate, RoomRegistry, SdpType, SessionDescription, SignalingError,
    SignalingEvent,
};
