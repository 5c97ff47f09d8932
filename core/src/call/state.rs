//! Peer connection lifecycle as an explicit state value
//!
//! ```text
//! Absent ──user_joined──▶ Negotiating(CreatingOffer) ──offer sent──▶ Negotiating(AwaitingAnswer)
//!    │                                                                   │ answer
//!    └──offer──▶ Negotiating(Answering) ──answer sent──▶ Negotiating(AwaitingMedia) ◀┘
//!                                                                   │ remote track
//!                                                                   ▼
//!                                                               Connected
//! any ──end / remote hangup / connection lost / failure──▶ Terminated(reason)
//! ```
//!
//! Every negotiation trigger is only accepted from `Absent`, which makes the
//! state itself the single-negotiation-in-flight guard.

use super::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sub-state while an offer/answer exchange is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Negotiation {
    /// We are the offerer and are producing the offer
    CreatingOffer,
    /// Offer sent, waiting for the remote answer
    AwaitingAnswer,
    /// We are the answerer and are producing the answer
    Answering,
    /// Descriptions exchanged, waiting for remote media
    AwaitingMedia,
}

/// Why the connection is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Local user hung up
    Hangup,
    /// Remote side left the room
    RemoteLeft,
    /// Remote side ended the call
    RemoteEnded,
    /// Transport reported disconnected or failed
    ConnectionLost,
    /// Offer/answer could not be produced or applied
    NegotiationFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    #[default]
    Absent,
    Negotiating(Negotiation),
    Connected,
    Terminated(TerminationReason),
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Absent => write!(f, "absent"),
            PeerState::Negotiating(step) => write!(f, "negotiating ({:?})", step),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Terminated(reason) => write!(f, "terminated ({:?})", reason),
        }
    }
}

impl PeerState {
    pub fn is_negotiating(&self) -> bool {
        matches!(self, PeerState::Negotiating(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, PeerState::Terminated(_))
    }

    /// Negotiating or connected
    pub fn is_active(&self) -> bool {
        matches!(self, PeerState::Negotiating(_) | PeerState::Connected)
    }

    /// Remote peer entered the room: we become the offerer.
    pub fn begin_offer(self) -> Result<PeerState, CallError> {
        match self {
            PeerState::Absent => Ok(PeerState::Negotiating(Negotiation::CreatingOffer)),
            other => Err(out_of_order("user_joined", other)),
        }
    }

    /// Remote offer arrived: we become the answerer.
    pub fn begin_answer(self) -> Result<PeerState, CallError> {
        match self {
            PeerState::Absent => Ok(PeerState::Negotiating(Negotiation::Answering)),
            other => Err(out_of_order("offer", other)),
        }
    }

    /// Local offer has been sent.
    pub fn offer_sent(self) -> Result<PeerState, CallError> {
        match self {
            PeerState::Negotiating(Negotiation::CreatingOffer) => {
                Ok(PeerState::Negotiating(Negotiation::AwaitingAnswer))
            }
            // Media can land before the local step finishes.
            PeerState::Connected => Ok(PeerState::Connected),
            other => Err(out_of_order("offer sent", other)),
        }
    }

    /// Local answer has been sent.
    pub fn answer_sent(self) -> Result<PeerState, CallError> {
        match self {
            PeerState::Negotiating(Negotiation::Answering) => {
                Ok(PeerState::Negotiating(Negotiation::AwaitingMedia))
            }
            PeerState::Connected => Ok(PeerState::Connected),
            other => Err(out_of_order("answer sent", other)),
        }
    }

    /// Remote answer is about to be applied.
    pub fn accept_answer(self) -> Result<PeerState, CallError> {
        match self {
            PeerState::Negotiating(Negotiation::AwaitingAnswer) => {
                Ok(PeerState::Negotiating(Negotiation::AwaitingMedia))
            }
            other => Err(out_of_order("answer", other)),
        }
    }

    /// Remote media track arrived.
    pub fn media_arrived(self) -> Result<PeerState, CallError> {
        match self {
            PeerState::Negotiating(_) | PeerState::Connected => Ok(PeerState::Connected),
            other => Err(out_of_order("remote track", other)),
        }
    }

    /// Transport reported disconnected/failed. Terminal.
    pub fn connection_lost(self) -> Result<PeerState, CallError> {
        match self {
            PeerState::Negotiating(_) | PeerState::Connected => {
                Ok(PeerState::Terminated(TerminationReason::ConnectionLost))
            }
            other => Err(out_of_order("connection lost", other)),
        }
    }

    /// Any teardown. Always allowed; the newest reason wins.
    pub fn terminate(self, reason: TerminationReason) -> PeerState {
        PeerState::Terminated(reason)
    }
}

fn out_of_order(event: &'static str, state: PeerState) -> CallError {
    CallError::OutOfOrder { event, state }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offerer_path() {
        let state = PeerState::Absent
            .begin_offer()
            .and_then(PeerState::offer_sent)
            .and_then(PeerState::accept_answer)
            .and_then(PeerState::media_arrived)
            .unwrap();
        assert_eq!(state, PeerState::Connected);
    }

    #[test]
    fn test_answerer_path() {
        let state = PeerState::Absent
            .begin_answer()
            .and_then(PeerState::answer_sent)
            .and_then(PeerState::media_arrived)
            .unwrap();
        assert_eq!(state, PeerState::Connected);
    }

    #[test]
    fn test_second_negotiation_rejected() {
        let negotiating = PeerState::Absent.begin_offer().unwrap();
        assert_eq!(
            negotiating.begin_answer(),
            Err(CallError::OutOfOrder {
                event: "offer",
                state: negotiating
            })
        );
        assert!(negotiating.begin_offer().is_err());
        assert!(PeerState::Connected.begin_offer().is_err());
    }

    #[test]
    fn test_answer_without_offer_rejected() {
        assert!(PeerState::Absent.accept_answer().is_err());
        assert!(PeerState::Absent
            .begin_answer()
            .unwrap()
            .accept_answer()
            .is_err());
    }

    #[test]
    fn test_media_before_answer_sent() {
        let state = PeerState::Absent
            .begin_answer()
            .and_then(PeerState::media_arrived)
            .and_then(PeerState::answer_sent)
            .unwrap();
        assert_eq!(state, PeerState::Connected);
    }

    #[test]
    fn test_terminated_is_terminal() {
        let lost = PeerState::Connected.connection_lost().unwrap();
        assert_eq!(lost, PeerState::Terminated(TerminationReason::ConnectionLost));
        assert!(lost.begin_offer().is_err());
        assert!(lost.begin_answer().is_err());
        assert!(lost.media_arrived().is_err());
        assert!(lost.connection_lost().is_err());
        assert!(!lost.is_active());
    }
}
