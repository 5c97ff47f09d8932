// Signaling relay server: `/ws` WebSocket fan-out plus a `/health` probe
//
// Each socket gets an outbound queue drained by its own writer task. Inbound
// frames go through the shared `RoomRegistry`; the registry lock is released
// before any delivery is queued.

use futures::{SinkExt, StreamExt};
use matchcall_core::signaling::{ConnectionId, Delivery, RoomRegistry, RoomStats, SignalingEvent};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::Filter;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// User the page is logged in as; binds the connection's identity
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct HealthReply {
    status: &'static str,
    connections: usize,
    rooms: usize,
    active_calls: usize,
}

impl From<RoomStats> for HealthReply {
    fn from(stats: RoomStats) -> Self {
        Self {
            status: "ok",
            connections: stats.connections,
            rooms: stats.rooms,
            active_calls: stats.active_calls,
        }
    }
}

/// Registry plus the outbound queue of every live connection
pub struct RelayHub {
    registry: RwLock<RoomRegistry>,
    outbound: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<String>>>,
    max_frame_bytes: usize,
}

impl RelayHub {
    pub fn new(registry: RoomRegistry, max_frame_bytes: usize) -> Self {
        Self {
            registry: RwLock::new(registry),
            outbound: Mutex::new(HashMap::new()),
            max_frame_bytes,
        }
    }

    /// Register a connection. Frames for it arrive on the returned receiver.
    pub fn connect(&self, user_id: Option<i64>) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.write().connect(user_id);
        self.outbound.lock().insert(id, tx);
        (id, rx)
    }

    /// Decode one text frame from `from` and route it. Oversized or
    /// undecodable frames are dropped. Returns the number of frames queued.
    pub fn receive(&self, from: ConnectionId, frame: &str) -> usize {
        if frame.len() > self.max_frame_bytes {
            tracing::warn!("Dropping {} byte frame from {}", frame.len(), from);
            return 0;
        }
        let event = match SignalingEvent::from_json(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping frame from {}: {}", from, e);
                return 0;
            }
        };
        tracing::debug!("{} from {}", event, from);
        let deliveries = self.registry.write().handle(from, event);
        self.deliver(deliveries)
    }

    /// Forget a connection and tell its rooms the user left.
    pub fn disconnect(&self, id: ConnectionId) -> usize {
        self.outbound.lock().remove(&id);
        let deliveries = self.registry.write().disconnect(id);
        self.deliver(deliveries)
    }

    pub fn stats(&self) -> RoomStats {
        self.registry.read().stats()
    }

    fn deliver(&self, deliveries: Vec<Delivery>) -> usize {
        let outbound = self.outbound.lock();
        let mut queued = 0;
        for delivery in deliveries {
            let frame = match delivery.event.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Could not encode {}: {}", delivery.event, e);
                    continue;
                }
            };
            match outbound.get(&delivery.to) {
                Some(tx) if tx.send(frame).is_ok() => queued += 1,
                _ => tracing::debug!("Connection {} gone; {} dropped", delivery.to, delivery.event),
            }
        }
        queued
    }
}

pub async fn serve(addr: SocketAddr, hub: Arc<RelayHub>) {
    let hub_filter = warp::any().map({
        let hub = hub.clone();
        move || hub.clone()
    });

    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<WsParams>())
        .and(hub_filter.clone())
        .map(|ws: warp::ws::Ws, params: WsParams, hub: Arc<RelayHub>| {
            ws.on_upgrade(move |socket| handle_connection(socket, params, hub))
        })
        .boxed();

    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(hub_filter)
        .map(|hub: Arc<RelayHub>| warp::reply::json(&HealthReply::from(hub.stats())))
        .boxed();

    let cors = warp::cors().allow_any_origin().allow_methods(vec!["GET"]);
    let routes = ws_route.or(health_route).with(cors).boxed();

    tracing::info!("Signaling relay listening on {}", addr);
    warp::serve(routes).run(addr).await;
}

async fn handle_connection(ws: warp::ws::WebSocket, params: WsParams, hub: Arc<RelayHub>) {
    let (mut socket_tx, mut socket_rx) = ws.split();
    let (id, mut outbound) = hub.connect(params.user_id);
    tracing::info!("Connection {} opened (user {:?})", id, params.user_id);

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if socket_tx.send(warp::ws::Message::text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = socket_rx.next().await {
        match result {
            Ok(msg) => {
                if let Ok(text) = msg.to_str() {
                    hub.receive(id, text);
                } else if msg.is_close() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Connection {} errored: {}", id, e);
                break;
            }
        }
    }

    hub.disconnect(id);
    forward_task.abort();
    tracing::info!("Connection {} closed", id);
}
