// Signaling: wire protocol, relay rooms and call policy

pub mod policy;
pub mod protocol;
pub mod room;

pub use policy::{
    authorize_call, call_room_id, parse_call_room, AllowAll, CallPolicy, CallPolicyError,
    MatchGraph, MatchGraphError,
};
pub use protocol::{
    IceCandidate, SdpType, SessionDescription, SignalingError, SignalingEvent, MAX_FRAME_SIZE,
};
pub use room::{ConnectionId, Delivery, RoomRegistry, RoomStats};
