//! Call page flow tests
//!
//! Drive a single `CallSession` (Alice calling Bob) through in-memory ports
//! and check what it emits, what it shows and which connection it holds.
//!
//! Run with: cargo test --test integration_call_flow

use async_trait::async_trait;
use matchcall_core::call::memory::{
    MemoryMediaDevices, MemoryPeerFactory, MemorySignaling, MemoryStream, MemoryView,
};
use matchcall_core::call::{
    CallError, CallPorts, CallSession, ConnectionState, MediaDevices, MediaError, MediaStream,
    MediaTrack, Negotiation, PeerEventReceiver, PeerState, StatusClass, TerminationReason,
    TrackKind,
};
use matchcall_core::config::{CallConfig, MediaConstraints, Participant};
use matchcall_core::signaling::{IceCandidate, SdpType, SessionDescription, SignalingEvent};
use mockall::mock;
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

const ROOM: &str = "call_1_2";

struct Harness {
    session: CallSession,
    rx: PeerEventReceiver,
    signaling: Rc<MemorySignaling>,
    view: Rc<MemoryView>,
    peers: Rc<MemoryPeerFactory>,
    stream: Rc<MemoryStream>,
}

impl Harness {
    fn new() -> Self {
        let stream = Rc::new(MemoryStream::camera_and_mic("alice-cam"));
        Self::with_media(
            Rc::new(MemoryMediaDevices::granting(Rc::clone(&stream))),
            stream,
        )
    }

    fn with_media(media: Rc<dyn MediaDevices>, stream: Rc<MemoryStream>) -> Self {
        let signaling = Rc::new(MemorySignaling::new());
        let view = Rc::new(MemoryView::new());
        let peers = Rc::new(MemoryPeerFactory::new());
        let ports = CallPorts {
            signaling: signaling.clone(),
            media,
            peers: peers.clone(),
            view: view.clone(),
        };
        let (session, rx) = CallSession::new(config(), ports);
        Self {
            session,
            rx,
            signaling,
            view,
            peers,
            stream,
        }
    }

    async fn started() -> Self {
        let h = Self::new();
        h.session.start_call().await.expect("start_call");
        h.signaling.take();
        h
    }

    /// Feed every queued peer callback into the session.
    async fn drain_peer_events(&mut self) {
        while let Ok(Some(event)) = self.rx.try_next() {
            self.session
                .handle_peer_event(event)
                .await
                .expect("peer event");
        }
    }

    fn tracks(&self, kind: TrackKind) -> Vec<Rc<dyn MediaTrack>> {
        self.stream.tracks_of(kind)
    }
}

fn config() -> CallConfig {
    CallConfig::new(
        ROOM,
        Participant::new(1, "Alice"),
        Participant::new(2, "Bob"),
        "/matches",
    )
}

fn user_joined() -> SignalingEvent {
    SignalingEvent::UserJoined { user_id: Some(2) }
}

fn remote_offer() -> SignalingEvent {
    SignalingEvent::Offer {
        room: ROOM.to_string(),
        offer: SessionDescription::new(
            SdpType::Offer,
            "v=0\r\no=- 42 1 IN IP4 10.0.0.2\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0\r\n",
        ),
    }
}

fn remote_answer(session_id: u32) -> SessionDescription {
    SessionDescription::new(
        SdpType::Answer,
        format!(
            "v=0\r\no=- {} 1 IN IP4 10.0.0.2\r\ns=-\r\nt=0 0\r\n",
            session_id
        ),
    )
}

fn candidate() -> IceCandidate {
    let mut c = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host");
    c.sdp_mid = Some("0".to_string());
    c.sdp_m_line_index = Some(0);
    c
}

// ============================================================================
// OFFER / ANSWER
// ============================================================================

#[tokio::test]
async fn test_calling_then_single_offer_on_join() {
    let h = Harness::new();
    h.session.start_call().await.unwrap();

    assert_eq!(h.session.status().text, "Calling Bob...");
    assert_eq!(h.signaling.names(), vec!["join_call", "call_request"]);
    assert_eq!(h.view.local_stream_id().as_deref(), Some("alice-cam"));
    h.signaling.take();

    h.session.handle_signal(user_joined()).await.unwrap();

    let sent = h.signaling.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        SignalingEvent::Offer { room, offer } => {
            assert_eq!(room, ROOM);
            assert_eq!(offer.kind, SdpType::Offer);
            assert!(offer.is_well_formed());
        }
        other => panic!("expected offer, got {}", other),
    }
    assert_eq!(
        h.session.peer_state(),
        PeerState::Negotiating(Negotiation::AwaitingAnswer)
    );
    println!("✓ start → \"Calling Bob...\" → one offer");
}

#[tokio::test]
async fn test_join_offer_answer_leaves_one_connection() {
    let h = Harness::started().await;

    h.session.handle_signal(user_joined()).await.unwrap();
    let answer = remote_answer(7);
    h.session
        .handle_signal(SignalingEvent::Answer {
            room: ROOM.to_string(),
            answer: answer.clone(),
        })
        .await
        .unwrap();

    assert_eq!(h.peers.created(), 1);
    let conn = h.peers.last().unwrap();
    assert_eq!(conn.remote_description(), Some(answer.clone()));
    assert_eq!(conn.track_kinds(), vec![TrackKind::Audio, TrackKind::Video]);
    assert!(h.session.has_connection());

    // Replays after the exchange are refused and change nothing.
    assert!(h.session.handle_signal(user_joined()).await.is_err());
    assert!(h.session.handle_signal(remote_offer()).await.is_err());
    let late = h
        .session
        .handle_signal(SignalingEvent::Answer {
            room: ROOM.to_string(),
            answer: remote_answer(8),
        })
        .await;
    assert!(matches!(late, Err(CallError::OutOfOrder { event: "answer", .. })));

    assert_eq!(h.peers.created(), 1);
    assert_eq!(h.peers.last().unwrap().remote_description(), Some(answer));
    assert_eq!(h.signaling.count("offer"), 1);
    println!("✓ join → offer → answer yields exactly one connection");
}

#[tokio::test]
async fn test_incoming_offer_is_answered() {
    let h = Harness::started().await;

    h.session.handle_signal(remote_offer()).await.unwrap();

    assert_eq!(h.peers.created(), 1);
    let conn = h.peers.last().unwrap();
    assert_eq!(
        conn.remote_description().map(|d| d.kind),
        Some(SdpType::Offer)
    );
    let sent = h.signaling.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        SignalingEvent::Answer { room, answer } => {
            assert_eq!(room, ROOM);
            assert_eq!(answer.kind, SdpType::Answer);
            assert_eq!(conn.local_description(), Some(answer.clone()));
        }
        other => panic!("expected answer, got {}", other),
    }
    assert_eq!(
        h.session.peer_state(),
        PeerState::Negotiating(Negotiation::AwaitingMedia)
    );
}

#[tokio::test]
async fn test_join_and_offer_race_negotiates_once() {
    let h = Harness::started().await;

    let (joined, offered) = tokio::join!(
        h.session.handle_signal(user_joined()),
        h.session.handle_signal(remote_offer()),
    );

    assert!(joined.is_ok());
    assert!(matches!(
        offered,
        Err(CallError::OutOfOrder { event: "offer", .. })
    ));
    assert_eq!(h.peers.created(), 1);
    assert_eq!(h.signaling.names(), vec!["offer"]);
    println!("✓ concurrent join/offer opens a single connection");
}

#[tokio::test]
async fn test_answer_without_offer_rejected() {
    let h = Harness::started().await;
    let result = h
        .session
        .handle_signal(SignalingEvent::Answer {
            room: ROOM.to_string(),
            answer: remote_answer(1),
        })
        .await;
    assert!(matches!(result, Err(CallError::OutOfOrder { .. })));
    assert_eq!(h.peers.created(), 0);
    assert_eq!(h.session.peer_state(), PeerState::Absent);
}

#[tokio::test]
async fn test_offer_for_other_room_rejected() {
    let h = Harness::started().await;
    let result = h
        .session
        .handle_signal(SignalingEvent::Offer {
            room: "call_3_4".to_string(),
            offer: SessionDescription::new(SdpType::Offer, "v=0\r\n"),
        })
        .await;
    assert_eq!(result, Err(CallError::WrongRoom("call_3_4".to_string())));
    assert_eq!(h.peers.created(), 0);
}

#[tokio::test]
async fn test_mislabeled_offer_rejected() {
    let h = Harness::started().await;
    let result = h
        .session
        .handle_signal(SignalingEvent::Offer {
            room: ROOM.to_string(),
            offer: remote_answer(3),
        })
        .await;
    assert_eq!(
        result,
        Err(CallError::UnexpectedDescription {
            expected: SdpType::Offer,
            got: SdpType::Answer
        })
    );
    assert_eq!(h.peers.created(), 0);
}

#[tokio::test]
async fn test_join_before_local_media_rejected() {
    let h = Harness::new();
    let result = h.session.handle_signal(user_joined()).await;
    assert_eq!(result, Err(CallError::NoLocalMedia));
    assert_eq!(h.peers.created(), 0);
    assert_eq!(h.session.peer_state(), PeerState::Absent);
}

#[tokio::test]
async fn test_connection_refused_fails_negotiation() {
    let h = Harness::started().await;
    h.peers.fail_next_create();

    let result = h.session.handle_signal(user_joined()).await;

    assert!(matches!(result, Err(CallError::Peer(_))));
    assert!(h.signaling.sent().is_empty());
    assert!(!h.session.has_connection());
    assert_eq!(
        h.session.peer_state(),
        PeerState::Terminated(TerminationReason::NegotiationFailed)
    );
    assert_eq!(h.session.status().text, "Could not connect the call");
}

// ============================================================================
// ICE
// ============================================================================

#[tokio::test]
async fn test_ice_before_connection_dropped() {
    let h = Harness::started().await;

    let result = h
        .session
        .handle_signal(SignalingEvent::IceCandidate {
            room: ROOM.to_string(),
            candidate: candidate(),
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(h.peers.created(), 0);
    assert!(h.signaling.sent().is_empty());
    println!("✓ early ICE candidate dropped");
}

#[tokio::test]
async fn test_ice_applied_once_connected() {
    let h = Harness::started().await;
    h.session.handle_signal(remote_offer()).await.unwrap();

    h.session
        .handle_signal(SignalingEvent::IceCandidate {
            room: ROOM.to_string(),
            candidate: candidate(),
        })
        .await
        .unwrap();

    assert_eq!(h.peers.last().unwrap().remote_candidates(), vec![candidate()]);
}

#[tokio::test]
async fn test_ice_failure_is_not_fatal() {
    let h = Harness::started().await;
    h.session.handle_signal(user_joined()).await.unwrap();

    // No remote description yet, so the connection refuses the candidate.
    h.session
        .handle_signal(SignalingEvent::IceCandidate {
            room: ROOM.to_string(),
            candidate: candidate(),
        })
        .await
        .unwrap();

    assert!(h.peers.last().unwrap().remote_candidates().is_empty());
    assert!(h.session.peer_state().is_negotiating());
}

#[tokio::test]
async fn test_local_candidates_forwarded() {
    let mut h = Harness::started().await;
    h.session.handle_signal(user_joined()).await.unwrap();
    h.signaling.take();

    let conn = h.peers.last().unwrap();
    conn.deliver_local_candidate(Some(candidate()));
    conn.deliver_local_candidate(None);
    h.drain_peer_events().await;

    assert_eq!(
        h.signaling.sent(),
        vec![SignalingEvent::IceCandidate {
            room: ROOM.to_string(),
            candidate: candidate(),
        }]
    );
}

// ============================================================================
// REMOTE MEDIA + CONNECTION STATE
// ============================================================================

#[tokio::test]
async fn test_remote_track_connects_call() {
    let mut h = Harness::started().await;
    h.session.handle_signal(user_joined()).await.unwrap();
    h.session
        .handle_signal(SignalingEvent::Answer {
            room: ROOM.to_string(),
            answer: remote_answer(9),
        })
        .await
        .unwrap();

    let remote: Rc<dyn MediaStream> = Rc::new(MemoryStream::camera_and_mic("bob-cam"));
    h.peers
        .last()
        .unwrap()
        .deliver_remote_stream(Rc::clone(&remote));
    h.drain_peer_events().await;

    let status = h.session.status();
    assert_eq!(status.text, "Connected");
    assert_eq!(status.class, StatusClass::Connected);
    assert_eq!(h.view.remote_stream_id(), Some(remote.id()));
    assert!(h.view.placeholder_hidden());
    assert_eq!(h.session.peer_state(), PeerState::Connected);
    println!("✓ remote track → \"Connected\"");
}

#[tokio::test]
async fn test_connection_failure_shows_lost() {
    let mut h = Harness::started().await;
    h.session.handle_signal(remote_offer()).await.unwrap();

    h.peers
        .last()
        .unwrap()
        .deliver_state(ConnectionState::Failed);
    h.drain_peer_events().await;

    assert_eq!(h.session.status().text, "Connection lost");
    assert!(h.session.status().is_error());
    assert_eq!(
        h.session.peer_state(),
        PeerState::Terminated(TerminationReason::ConnectionLost)
    );

    // Candidates trickling in after the loss are not sent.
    h.signaling.take();
    h.peers
        .last()
        .unwrap()
        .deliver_local_candidate(Some(candidate()));
    h.drain_peer_events().await;
    assert!(h.signaling.sent().is_empty());
}

// ============================================================================
// DECLINE / HANGUP
// ============================================================================

#[tokio::test]
async fn test_declined_without_connection() {
    let h = Harness::started().await;

    h.session
        .handle_signal(SignalingEvent::CallDeclined { room: None })
        .await
        .unwrap();

    assert!(h.session.status().is_error());
    assert_eq!(h.session.status().text, "Call declined");
    assert_eq!(h.peers.created(), 0);
    assert!(!h.session.has_connection());
    assert!(h.view.redirects().is_empty());
}

#[tokio::test]
async fn test_end_call_silent() {
    let h = Harness::started().await;
    h.session.handle_signal(user_joined()).await.unwrap();
    h.signaling.take();

    h.session.end_call(false);

    assert!(h.signaling.sent().is_empty());
    assert!(h.peers.last().unwrap().is_closed());
    assert!(!h.session.has_connection());
    assert!(!h.session.has_local_stream());
    assert!(h.stream.memory_tracks().iter().all(|t| t.is_stopped()));
    assert_eq!(
        h.view.redirects(),
        vec![("/matches".to_string(), Duration::from_millis(1000))]
    );
}

#[tokio::test]
async fn test_end_call_notifies_once() {
    let h = Harness::started().await;

    h.session.end_call(true);

    assert_eq!(h.signaling.count("call_ended"), 1);
    assert_eq!(h.signaling.count("leave_call"), 1);
    assert_eq!(
        h.signaling.sent(),
        vec![
            SignalingEvent::CallEnded {
                room: Some(ROOM.to_string())
            },
            SignalingEvent::LeaveCall {
                room: ROOM.to_string(),
                user_id: Some(1)
            },
        ]
    );
    assert_eq!(
        h.session.peer_state(),
        PeerState::Terminated(TerminationReason::Hangup)
    );
    println!("✓ endCall(true) emits call_ended + leave_call once");
}

#[tokio::test]
async fn test_end_call_on_dead_socket_still_tears_down() {
    let h = Harness::started().await;
    h.signaling.close();

    h.session.end_call(true);

    assert!(h.signaling.sent().is_empty());
    assert!(h.stream.memory_tracks().iter().all(|t| t.is_stopped()));
    assert_eq!(h.view.redirects().len(), 1);
}

#[tokio::test]
async fn test_remote_hangup_tears_down() {
    let h = Harness::started().await;
    h.session.handle_signal(remote_offer()).await.unwrap();
    h.signaling.take();

    h.session
        .handle_signal(SignalingEvent::UserLeft { user_id: Some(2) })
        .await
        .unwrap();

    assert_eq!(h.session.status().text, "User left the call");
    assert!(h.peers.last().unwrap().is_closed());
    assert!(h.signaling.sent().is_empty());
    assert_eq!(h.view.redirects().len(), 1);
    assert_eq!(
        h.session.peer_state(),
        PeerState::Terminated(TerminationReason::RemoteLeft)
    );
}

#[tokio::test]
async fn test_remote_call_ended() {
    let h = Harness::started().await;
    h.session
        .handle_signal(SignalingEvent::CallEnded { room: None })
        .await
        .unwrap();
    assert_eq!(h.session.status().text, "Call ended");
    assert!(!h.session.status().is_error());
    assert_eq!(h.view.redirects().len(), 1);
}

#[tokio::test]
async fn test_page_unload_leaves_room() {
    let h = Harness::started().await;
    h.session.on_page_unload();
    assert_eq!(
        h.signaling.sent(),
        vec![SignalingEvent::LeaveCall {
            room: ROOM.to_string(),
            user_id: Some(1)
        }]
    );
}

// ============================================================================
// MEDIA ACCESS
// ============================================================================

mock! {
    pub Devices {}

    #[async_trait(?Send)]
    impl MediaDevices for Devices {
        async fn get_user_media(
            &self,
            constraints: MediaConstraints,
        ) -> Result<Rc<dyn MediaStream>, MediaError>;
    }
}

#[tokio::test]
async fn test_media_denied_aborts_start() {
    let mut devices = MockDevices::new();
    devices
        .expect_get_user_media()
        .withf(|c| c.audio && c.video)
        .times(1)
        .returning(|_| Err(MediaError::PermissionDenied("NotAllowedError".to_string())));

    let stream = Rc::new(MemoryStream::camera_and_mic("unused"));
    let h = Harness::with_media(Rc::new(devices), stream);

    let result = h.session.start_call().await;

    assert!(matches!(
        result,
        Err(CallError::Media(MediaError::PermissionDenied(_)))
    ));
    assert_eq!(h.session.status().text, "Camera/mic access denied");
    assert!(h.session.status().is_error());
    assert!(h.signaling.sent().is_empty());
    assert!(!h.session.has_local_stream());
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let h = Harness::started().await;
    assert_eq!(h.session.start_call().await, Err(CallError::AlreadyStarted));
    assert!(h.signaling.sent().is_empty());
}

/// Grants the camera only after yielding once, like a permission prompt.
struct PromptingDevices {
    stream: Rc<MemoryStream>,
    requests: Cell<usize>,
}

#[async_trait(?Send)]
impl MediaDevices for PromptingDevices {
    async fn get_user_media(
        &self,
        _constraints: MediaConstraints,
    ) -> Result<Rc<dyn MediaStream>, MediaError> {
        self.requests.set(self.requests.get() + 1);
        tokio::task::yield_now().await;
        Ok(self.stream.clone() as Rc<dyn MediaStream>)
    }
}

#[tokio::test]
async fn test_overlapping_starts_capture_once() {
    let stream = Rc::new(MemoryStream::camera_and_mic("alice-cam"));
    let devices = Rc::new(PromptingDevices {
        stream: Rc::clone(&stream),
        requests: Cell::new(0),
    });
    let h = Harness::with_media(devices.clone(), stream);

    let (first, second) = tokio::join!(h.session.start_call(), h.session.start_call());

    assert_eq!(first, Ok(()));
    assert_eq!(second, Err(CallError::AlreadyStarted));
    assert_eq!(devices.requests.get(), 1);
    assert_eq!(h.signaling.count("join_call"), 1);
    assert_eq!(h.signaling.count("call_request"), 1);

    println!("✓ overlapping start_call captures and announces once");
}

// ============================================================================
// TOGGLES
// ============================================================================

#[tokio::test]
async fn test_toggle_video_leaves_audio() {
    let h = Harness::started().await;

    assert!(!h.session.toggle_video());
    assert!(h.tracks(TrackKind::Video).iter().all(|t| !t.is_enabled()));
    assert!(h.tracks(TrackKind::Audio).iter().all(|t| t.is_enabled()));
    assert!(h.view.toggle_active(TrackKind::Video));
    assert!(!h.view.toggle_active(TrackKind::Audio));

    assert!(h.session.toggle_video());
    assert!(h.tracks(TrackKind::Video).iter().all(|t| t.is_enabled()));
    assert!(!h.view.toggle_active(TrackKind::Video));
}

proptest! {
    #[test]
    fn prop_toggles_only_touch_their_kind(presses in prop::collection::vec(any::<bool>(), 0..24)) {
        let h = tokio_test::block_on(Harness::started());

        for &video in &presses {
            if video {
                h.session.toggle_video();
            } else {
                h.session.toggle_audio();
            }
        }

        let video_presses = presses.iter().filter(|&&v| v).count();
        let audio_presses = presses.len() - video_presses;
        let video_on = video_presses % 2 == 0;
        let audio_on = audio_presses % 2 == 0;

        prop_assert_eq!(h.session.video_enabled(), video_on);
        prop_assert_eq!(h.session.audio_enabled(), audio_on);
        for track in h.tracks(TrackKind::Video) {
            prop_assert_eq!(track.is_enabled(), video_on);
        }
        for track in h.tracks(TrackKind::Audio) {
            prop_assert_eq!(track.is_enabled(), audio_on);
        }
    }
}
