//! Signaling wire protocol: named events exchanged over the relay
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": { ... }}`. The same enum is used by the
//! browser client and by the relay server.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum accepted frame size: 64 KB
/// SDP blobs are a few KB; anything larger is rejected before parsing.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
            SdpType::Pranswer => write!(f, "pranswer"),
            SdpType::Rollback => write!(f, "rollback"),
        }
    }
}

/// Session description as exchanged by `RTCSessionDescription.toJSON()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    /// A usable description starts with the SDP version line.
    pub fn is_well_formed(&self) -> bool {
        matches!(self.kind, SdpType::Offer | SdpType::Answer | SdpType::Pranswer)
            && self.sdp.trim_start().starts_with("v=0")
    }
}

/// ICE candidate in `RTCIceCandidateInit` JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Named signaling events.
///
/// Payload fields that the relay omits on fan-out (`call_ended`,
/// `call_declined`, `user_joined`, `user_left`) are optional so the
/// receiving side accepts both shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalingEvent {
    JoinCall {
        room: String,
        user_id: i64,
    },
    CallRequest {
        target_user_id: i64,
        caller_id: i64,
        caller_name: String,
        room: String,
    },
    Offer {
        room: String,
        offer: SessionDescription,
    },
    Answer {
        room: String,
        answer: SessionDescription,
    },
    IceCandidate {
        room: String,
        candidate: IceCandidate,
    },
    CallEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    LeaveCall {
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
    },
    UserJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
    },
    UserLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
    },
    CallDeclined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    IncomingCall {
        caller_id: i64,
        caller_name: String,
        room: String,
    },
}

impl SignalingEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            SignalingEvent::JoinCall { .. } => "join_call",
            SignalingEvent::CallRequest { .. } => "call_request",
            SignalingEvent::Offer { .. } => "offer",
            SignalingEvent::Answer { .. } => "answer",
            SignalingEvent::IceCandidate { .. } => "ice_candidate",
            SignalingEvent::CallEnded { .. } => "call_ended",
            SignalingEvent::LeaveCall { .. } => "leave_call",
            SignalingEvent::UserJoined { .. } => "user_joined",
            SignalingEvent::UserLeft { .. } => "user_left",
            SignalingEvent::CallDeclined { .. } => "call_declined",
            SignalingEvent::IncomingCall { .. } => "incoming_call",
        }
    }

    /// Room the event is addressed to, when it carries one
    pub fn room(&self) -> Option<&str> {
        match self {
            SignalingEvent::JoinCall { room, .. }
            | SignalingEvent::CallRequest { room, .. }
            | SignalingEvent::Offer { room, .. }
            | SignalingEvent::Answer { room, .. }
            | SignalingEvent::IceCandidate { room, .. }
            | SignalingEvent::LeaveCall { room, .. }
            | SignalingEvent::IncomingCall { room, .. } => Some(room),
            SignalingEvent::CallEnded { room } | SignalingEvent::CallDeclined { room } => {
                room.as_deref()
            }
            SignalingEvent::UserJoined { .. } | SignalingEvent::UserLeft { .. } => None,
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Malformed(e.to_string()))
    }

    /// Parse a JSON text frame
    pub fn from_json(frame: &str) -> Result<Self, SignalingError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(SignalingError::FrameTooLarge(frame.len()));
        }
        serde_json::from_str(frame).map_err(|e| SignalingError::Malformed(e.to_string()))
    }
}

impl fmt::Display for SignalingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.room() {
            Some(room) => write!(f, "{} {{ room: {} }}", self.name(), room),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// Errors raised while encoding, decoding or sending signaling frames
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Malformed signaling frame: {0}")]
    Malformed(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Signaling channel closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_frame_shape() {
        let event = SignalingEvent::Offer {
            room: "call_1_2".to_string(),
            offer: SessionDescription::new(SdpType::Offer, "v=0\r\n"),
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["event"], "offer");
        assert_eq!(json["data"]["room"], "call_1_2");
        assert_eq!(json["data"]["offer"]["type"], "offer");
        assert_eq!(json["data"]["offer"]["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_decode_relay_fanout_without_payload_fields() {
        let ended = SignalingEvent::from_json(r#"{"event":"call_ended","data":{}}"#).unwrap();
        assert_eq!(ended, SignalingEvent::CallEnded { room: None });

        let declined = SignalingEvent::from_json(r#"{"event":"call_declined","data":{}}"#).unwrap();
        assert_eq!(declined, SignalingEvent::CallDeclined { room: None });

        let joined =
            SignalingEvent::from_json(r#"{"event":"user_joined","data":{"user_id":7}}"#).unwrap();
        assert_eq!(joined, SignalingEvent::UserJoined { user_id: Some(7) });
    }

    #[test]
    fn test_decode_browser_ice_candidate() {
        let frame = r#"{"event":"ice_candidate","data":{"room":"call_1_2","candidate":{
            "candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
            "sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}}}"#;

        match SignalingEvent::from_json(frame).unwrap() {
            SignalingEvent::IceCandidate { room, candidate } => {
                assert_eq!(room, "call_1_2");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
                assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = SignalingEvent::from_json(r#"{"event":"dance","data":{}}"#).unwrap_err();
        assert!(matches!(err, SignalingError::Malformed(_)));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let err = SignalingEvent::from_json(r#"{"event":"join_call","data":{"room":"r"}}"#)
            .unwrap_err();
        assert!(matches!(err, SignalingError::Malformed(_)));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = "x".repeat(MAX_FRAME_SIZE + 1);
        assert_eq!(
            SignalingEvent::from_json(&frame),
            Err(SignalingError::FrameTooLarge(MAX_FRAME_SIZE + 1))
        );
    }

    #[test]
    fn test_event_room_and_name() {
        let leave = SignalingEvent::LeaveCall {
            room: "call_3_9".to_string(),
            user_id: Some(3),
        };
        assert_eq!(leave.name(), "leave_call");
        assert_eq!(leave.room(), Some("call_3_9"));
        assert_eq!(leave.to_string(), "leave_call { room: call_3_9 }");

        let left = SignalingEvent::UserLeft { user_id: None };
        assert_eq!(left.room(), None);
        assert_eq!(left.to_string(), "user_left");
    }

    #[test]
    fn test_description_well_formed() {
        assert!(SessionDescription::new(SdpType::Answer, "v=0\r\no=- 1 2 IN IP4 0.0.0.0").is_well_formed());
        assert!(!SessionDescription::new(SdpType::Offer, "").is_well_formed());
        assert!(!SessionDescription::new(SdpType::Rollback, "v=0").is_well_formed());
    }
}
