//! Two call pages wired through an in-process relay
//!
//! Both sessions run on in-memory ports; `pump()` moves every emitted
//! signaling frame through a [`RoomRegistry`] and feeds peer callbacks back
//! into their session until nothing is left to deliver.

use super::memory::{MemoryMediaDevices, MemoryPeerFactory, MemorySignaling, MemoryStream, MemoryView};
use super::ports::PeerEventReceiver;
use super::session::{CallPorts, CallSession};
use crate::config::{CallConfig, ConfigError, Participant};
use crate::signaling::{call_room_id, CallPolicy, ConnectionId, RoomRegistry};
use std::rc::Rc;
use std::sync::Arc;

/// Where the call page sends users after hanging up
pub const LOOPBACK_REDIRECT: &str = "/matches";

/// One frame that crossed the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedFrame {
    pub from: i64,
    pub event: &'static str,
    /// User ids that received it
    pub delivered_to: Vec<i64>,
}

pub struct LoopbackParty {
    pub participant: Participant,
    pub session: Rc<CallSession>,
    pub signaling: Rc<MemorySignaling>,
    pub view: Rc<MemoryView>,
    pub peers: Rc<MemoryPeerFactory>,
    pub stream: Rc<MemoryStream>,
    peer_events: PeerEventReceiver,
    connection: ConnectionId,
}

impl LoopbackParty {
    fn new(
        local: Participant,
        remote: Participant,
        registry: &mut RoomRegistry,
    ) -> Result<Self, ConfigError> {
        let config = CallConfig::new(
            call_room_id(local.id, remote.id),
            local.clone(),
            remote,
            LOOPBACK_REDIRECT,
        );
        config.validate()?;

        let stream = Rc::new(MemoryStream::camera_and_mic(&format!("local-{}", local.id)));
        let signaling = Rc::new(MemorySignaling::new());
        let view = Rc::new(MemoryView::new());
        let peers = Rc::new(MemoryPeerFactory::loopback());
        let ports = CallPorts {
            signaling: signaling.clone(),
            media: Rc::new(MemoryMediaDevices::granting(Rc::clone(&stream))),
            peers: peers.clone(),
            view: view.clone(),
        };
        let (session, peer_events) = CallSession::new(config, ports);

        Ok(Self {
            connection: registry.connect(Some(local.id)),
            participant: local,
            session: Rc::new(session),
            signaling,
            view,
            peers,
            stream,
            peer_events,
        })
    }
}

pub struct LoopbackCall {
    pub caller: LoopbackParty,
    pub callee: LoopbackParty,
    registry: RoomRegistry,
    frames: Vec<RelayedFrame>,
}

impl LoopbackCall {
    pub fn new(
        caller: Participant,
        callee: Participant,
        policy: Arc<dyn CallPolicy>,
    ) -> Result<Self, ConfigError> {
        let mut registry = RoomRegistry::new(policy);
        let caller_party = LoopbackParty::new(caller.clone(), callee.clone(), &mut registry)?;
        let callee_party = LoopbackParty::new(callee, caller, &mut registry)?;
        Ok(Self {
            caller: caller_party,
            callee: callee_party,
            registry,
            frames: Vec::new(),
        })
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Every frame relayed so far
    pub fn frames(&self) -> &[RelayedFrame] {
        &self.frames
    }

    /// Deliver until both sides are quiet. Returns the number of frames and
    /// peer callbacks processed.
    pub async fn pump(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let mut progressed = false;

            for from in [self.caller.connection, self.callee.connection] {
                let (user, outbound) = {
                    let party = self.party(from);
                    (party.participant.id, party.signaling.take())
                };
                for event in outbound {
                    progressed = true;
                    processed += 1;
                    let name = event.name();
                    let deliveries = self.registry.handle(from, event);

                    let mut delivered_to = Vec::new();
                    for delivery in deliveries {
                        let target = self.party(delivery.to);
                        delivered_to.push(target.participant.id);
                        // Rejections are logged by the session.
                        let _ = target.session.handle_signal(delivery.event).await;
                    }
                    self.frames.push(RelayedFrame {
                        from: user,
                        event: name,
                        delivered_to,
                    });
                }
            }

            for party in [&mut self.caller, &mut self.callee] {
                while let Ok(Some(event)) = party.peer_events.try_next() {
                    progressed = true;
                    processed += 1;
                    if let Err(e) = party.session.handle_peer_event(event).await {
                        tracing::warn!("Peer event rejected: {}", e);
                    }
                }
            }

            if !progressed {
                return processed;
            }
        }
    }

    /// Drop one side's relay connection as a closed tab would.
    pub async fn disconnect(&mut self, user_id: i64) -> usize {
        let conn = if user_id == self.caller.participant.id {
            self.caller.connection
        } else {
            self.callee.connection
        };
        let deliveries = self.registry.disconnect(conn);
        let count = deliveries.len();
        for delivery in deliveries {
            let target = self.party(delivery.to);
            let _ = target.session.handle_signal(delivery.event).await;
        }
        count + self.pump().await
    }

    fn party(&self, conn: ConnectionId) -> &LoopbackParty {
        if conn == self.caller.connection {
            &self.caller
        } else {
            &self.callee
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::PeerState;
    use crate::signaling::AllowAll;

    #[test]
    fn test_both_sides_connect() {
        tokio_test::block_on(async {
            let mut call = LoopbackCall::new(
                Participant::new(1, "Alice"),
                Participant::new(2, "Bob"),
                Arc::new(AllowAll),
            )
            .unwrap();

            call.caller.session.start_call().await.unwrap();
            call.pump().await;
            call.callee.session.start_call().await.unwrap();
            call.pump().await;

            assert_eq!(call.caller.session.peer_state(), PeerState::Connected);
            assert_eq!(call.callee.session.peer_state(), PeerState::Connected);
            assert_eq!(call.caller.peers.created(), 1);
            assert_eq!(call.callee.peers.created(), 1);
            assert!(call.frames().iter().any(|f| f.event == "offer" && f.delivered_to == vec![2]));
        });
    }
}
