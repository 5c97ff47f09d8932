//! Relay room registry: fans signaling events out to call rooms
//!
//! The registry is transport-agnostic: `handle()` takes an inbound event from
//! one connection and returns the deliveries the transport must perform.
//! Senders never receive their own room broadcasts.

use super::policy::{authorize_call, parse_call_room, CallPolicy};
use super::protocol::SignalingEvent;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of one relay connection
pub type ConnectionId = Uuid;

/// One outbound frame for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub event: SignalingEvent,
}

#[derive(Debug, Default)]
struct ConnectionEntry {
    /// User the connection authenticated as, if any
    user_id: Option<i64>,
    /// Rooms joined through `join_call`
    rooms: BTreeSet<String>,
}

/// Statistics about relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    pub connections: usize,
    pub rooms: usize,
    pub active_calls: usize,
}

pub struct RoomRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, BTreeSet<ConnectionId>>,
    /// user id -> room of the call they are in
    active_calls: HashMap<i64, String>,
    policy: Arc<dyn CallPolicy>,
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("connections", &self.connections.len())
            .field("rooms", &self.rooms.len())
            .field("active_calls", &self.active_calls.len())
            .finish()
    }
}

impl RoomRegistry {
    pub fn new(policy: Arc<dyn CallPolicy>) -> Self {
        Self {
            connections: HashMap::new(),
            rooms: HashMap::new(),
            active_calls: HashMap::new(),
            policy,
        }
    }

    /// Register a new connection, optionally bound to a user id
    pub fn connect(&mut self, user_id: Option<i64>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                user_id,
                rooms: BTreeSet::new(),
            },
        );
        tracing::debug!("Relay connection {} registered (user {:?})", id, user_id);
        id
    }

    /// Drop a connection; every room it was in is told the user left.
    pub fn disconnect(&mut self, id: ConnectionId) -> Vec<Delivery> {
        let Some(entry) = self.connections.remove(&id) else {
            return Vec::new();
        };

        let mut deliveries = Vec::new();
        for room in &entry.rooms {
            self.remove_member(room, id);
            if let Some(user_id) = entry.user_id {
                if self.active_calls.get(&user_id) == Some(room) {
                    self.active_calls.remove(&user_id);
                }
            }
            deliveries.extend(self.broadcast(
                room,
                id,
                SignalingEvent::UserLeft {
                    user_id: entry.user_id,
                },
            ));
        }
        tracing::debug!("Relay connection {} dropped", id);
        deliveries
    }

    /// Apply one inbound event and return what must be sent where.
    pub fn handle(&mut self, from: ConnectionId, event: SignalingEvent) -> Vec<Delivery> {
        if !self.connections.contains_key(&from) {
            tracing::warn!("Event {} from unknown connection {}; ignored", event, from);
            return Vec::new();
        }

        match event {
            SignalingEvent::JoinCall { room, user_id } => self.join_call(from, room, user_id),
            SignalingEvent::LeaveCall { room, user_id } => self.leave_call(from, room, user_id),
            SignalingEvent::CallRequest {
                target_user_id,
                caller_id,
                caller_name,
                room,
            } => self.call_request(from, target_user_id, caller_id, caller_name, room),
            SignalingEvent::Offer { .. }
            | SignalingEvent::Answer { .. }
            | SignalingEvent::IceCandidate { .. } => match event.room().map(str::to_owned) {
                Some(room) => self.relay(&room, from, event),
                None => Vec::new(),
            },
            SignalingEvent::CallDeclined { room: Some(room) } => {
                self.relay(&room, from, SignalingEvent::CallDeclined { room: None })
            }
            SignalingEvent::CallEnded { room: Some(room) } => {
                self.relay(&room, from, SignalingEvent::CallEnded { room: None })
            }
            other => {
                tracing::debug!("Relay ignoring {} from {}", other, from);
                Vec::new()
            }
        }
    }

    /// Room the user is currently in a call for
    pub fn active_call(&self, user_id: i64) -> Option<&str> {
        self.active_calls.get(&user_id).map(String::as_str)
    }

    /// Number of connections in a room
    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, BTreeSet::len)
    }

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            active_calls: self.active_calls.len(),
        }
    }

    fn join_call(&mut self, from: ConnectionId, room: String, claimed: i64) -> Vec<Delivery> {
        if room.is_empty() {
            return Vec::new();
        }
        let bound = self.connections.get(&from).and_then(|entry| entry.user_id);
        if let Some(bound) = bound {
            if bound != claimed {
                tracing::warn!(
                    "Connection {} bound to user {} tried to join {} as {}",
                    from,
                    bound,
                    room,
                    claimed
                );
                return Vec::new();
            }
        }
        let user_id = bound.unwrap_or(claimed);

        if let Some((a, b)) = parse_call_room(&room) {
            if user_id != a && user_id != b {
                tracing::warn!("User {} tried to join foreign room {}", user_id, room);
                return Vec::new();
            }
            let other = if user_id == a { b } else { a };
            if let Err(reason) = authorize_call(self.policy.as_ref(), user_id, other) {
                tracing::info!("User {} refused entry to {}: {}", user_id, room, reason);
                return vec![Delivery {
                    to: from,
                    event: SignalingEvent::CallDeclined { room: Some(room) },
                }];
            }
        }

        if let Some(entry) = self.connections.get_mut(&from) {
            entry.rooms.insert(room.clone());
            if entry.user_id.is_none() {
                entry.user_id = Some(user_id);
            }
        }
        self.rooms.entry(room.clone()).or_default().insert(from);
        self.active_calls.insert(user_id, room.clone());
        tracing::info!("User {} joined {}", user_id, room);

        self.broadcast(
            &room,
            from,
            SignalingEvent::UserJoined {
                user_id: Some(user_id),
            },
        )
    }

    fn leave_call(
        &mut self,
        from: ConnectionId,
        room: String,
        user_id: Option<i64>,
    ) -> Vec<Delivery> {
        if room.is_empty() || !self.is_member(from, &room) {
            return Vec::new();
        }
        let mut user_id = user_id;
        if let Some(entry) = self.connections.get_mut(&from) {
            entry.rooms.remove(&room);
            user_id = entry.user_id.or(user_id);
        }
        self.remove_member(&room, from);
        if let Some(user_id) = user_id {
            if self.active_calls.get(&user_id) == Some(&room) {
                self.active_calls.remove(&user_id);
            }
        }
        tracing::info!("User {:?} left {}", user_id, room);

        self.broadcast(&room, from, SignalingEvent::UserLeft { user_id })
    }

    fn call_request(
        &mut self,
        from: ConnectionId,
        target_user_id: i64,
        caller_id: i64,
        caller_name: String,
        room: String,
    ) -> Vec<Delivery> {
        // The bound identity wins over what the page claims.
        let caller_id = self
            .connections
            .get(&from)
            .and_then(|entry| entry.user_id)
            .unwrap_or(caller_id);

        if let Err(reason) = authorize_call(self.policy.as_ref(), caller_id, target_user_id) {
            tracing::info!(
                "Call request {} -> {} refused: {}",
                caller_id,
                target_user_id,
                reason
            );
            return vec![Delivery {
                to: from,
                event: SignalingEvent::CallDeclined { room: Some(room) },
            }];
        }

        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, entry)| entry.user_id == Some(target_user_id))
            .map(|(id, _)| *id)
            .collect();
        if targets.is_empty() {
            tracing::debug!("Call target {} has no live connection", target_user_id);
        }

        targets
            .into_iter()
            .map(|to| Delivery {
                to,
                event: SignalingEvent::IncomingCall {
                    caller_id,
                    caller_name: caller_name.clone(),
                    room: room.clone(),
                },
            })
            .collect()
    }

    fn is_member(&self, id: ConnectionId, room: &str) -> bool {
        self.connections
            .get(&id)
            .map_or(false, |entry| entry.rooms.contains(room))
    }

    /// Forward a room-scoped event, but only from a member of that room.
    fn relay(&self, room: &str, from: ConnectionId, event: SignalingEvent) -> Vec<Delivery> {
        if !self.is_member(from, room) {
            tracing::warn!("{} from {} outside room {}; dropped", event, from, room);
            return Vec::new();
        }
        self.broadcast(room, from, event)
    }

    fn broadcast(
        &self,
        room: &str,
        exclude: ConnectionId,
        event: SignalingEvent,
    ) -> Vec<Delivery> {
        self.rooms
            .get(room)
            .into_iter()
            .flatten()
            .filter(|id| **id != exclude)
            .map(|id| Delivery {
                to: *id,
                event: event.clone(),
            })
            .collect()
    }

    fn remove_member(&mut self, room: &str, id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}
