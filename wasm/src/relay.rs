// Signaling relay connection: JSON text frames over a browser WebSocket
//
// Implements the `SignalingChannel` port for the call session. Frames emitted
// before the socket opens are queued and flushed from `onopen`. Inbound frames
// are decoded into `SignalingEvent`s and forwarded to whoever called
// `subscribe()`. On non-WASM targets the socket is simulated so the state
// handling can be unit tested on the host.

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use matchcall_core::call::SignalingChannel;
use matchcall_core::signaling::{SignalingError, SignalingEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Relay endpoint served next to the page: `ws(s)://<host>/ws?user_id=<id>`
pub fn default_signaling_url(page_protocol: &str, host: &str, user_id: i64) -> String {
    let scheme = if page_protocol == "https:" { "wss" } else { "ws" };
    format!("{}://{}/ws?user_id={}", scheme, host, user_id)
}

#[cfg(target_arch = "wasm32")]
struct RelayCallbacks {
    _onopen: wasm_bindgen::closure::Closure<dyn FnMut(web_sys::Event)>,
    _onmessage: wasm_bindgen::closure::Closure<dyn FnMut(web_sys::MessageEvent)>,
    _onerror: wasm_bindgen::closure::Closure<dyn FnMut(web_sys::ErrorEvent)>,
    _onclose: wasm_bindgen::closure::Closure<dyn FnMut(web_sys::CloseEvent)>,
}

/// State shared between the relay handle and its socket callbacks
struct SignalingRelayInner {
    state: RelayState,
    #[cfg(target_arch = "wasm32")]
    socket: Option<web_sys::WebSocket>,
    /// Dropped on disconnect, which also releases the captured `Arc`s.
    #[cfg(target_arch = "wasm32")]
    callbacks: Option<RelayCallbacks>,
    ingress_tx: Option<UnboundedSender<SignalingEvent>>,
    /// Frames emitted while the socket was still connecting
    send_buffer: Vec<String>,
}

impl std::fmt::Debug for SignalingRelayInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingRelayInner")
            .field("state", &self.state)
            .field("has_ingress_tx", &self.ingress_tx.is_some())
            .field("buffered", &self.send_buffer.len())
            .finish()
    }
}

impl SignalingRelayInner {
    /// Decode one text frame and hand it to the subscriber.
    fn dispatch_frame(&self, frame: &str) {
        let event = match SignalingEvent::from_json(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Relay frame dropped: {}", e);
                return;
            }
        };
        match self.ingress_tx.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.unbounded_send(event) {
                    tracing::warn!("Signaling subscriber gone, frame dropped: {}", e);
                }
            }
            None => tracing::debug!("Relay frame {} arrived with no subscriber", event),
        }
    }
}

/// WebSocket connection to the signaling relay.
///
/// Cloning shares the same socket, so one clone can be handed to the session
/// as its `SignalingChannel` while the page keeps another to disconnect.
#[derive(Debug, Clone)]
pub struct SignalingRelay {
    url: String,
    inner: Arc<RwLock<SignalingRelayInner>>,
}

impl SignalingRelay {
    pub fn new(url: String) -> Self {
        Self {
            url,
            inner: Arc::new(RwLock::new(SignalingRelayInner {
                state: RelayState::Disconnected,
                #[cfg(target_arch = "wasm32")]
                socket: None,
                #[cfg(target_arch = "wasm32")]
                callbacks: None,
                ingress_tx: None,
                send_buffer: Vec::new(),
            })),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receiver for decoded inbound events. A second call replaces the first
    /// subscriber. Subscribe before `connect()`.
    pub fn subscribe(&self) -> UnboundedReceiver<SignalingEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.inner.write().ingress_tx = Some(tx);
        rx
    }

    /// Open the socket. State stays `Connecting` until `onopen` fires.
    pub fn connect(&self) -> Result<(), SignalingError> {
        {
            let state = self.inner.read().state;
            if state == RelayState::Connected || state == RelayState::Connecting {
                return Err(SignalingError::SendFailed(
                    "already connected or connecting".to_string(),
                ));
            }
        }

        self.inner.write().state = RelayState::Connecting;

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::closure::Closure;
            use wasm_bindgen::JsCast;
            use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

            let ws = WebSocket::new(&self.url).map_err(|e| {
                self.inner.write().state = RelayState::Error;
                SignalingError::SendFailed(crate::describe_js_error(&e))
            })?;

            let inner_open = Arc::clone(&self.inner);
            let onopen = Closure::wrap(Box::new(move |_: web_sys::Event| {
                tracing::info!("Signaling relay connected");
                let mut guard = inner_open.write();
                guard.state = RelayState::Connected;
                let pending = std::mem::take(&mut guard.send_buffer);
                if let Some(sock) = guard.socket.as_ref() {
                    for frame in pending {
                        if let Err(e) = sock.send_with_str(&frame) {
                            tracing::warn!("Buffered send failed: {:?}", e);
                        }
                    }
                }
            }) as Box<dyn FnMut(web_sys::Event)>);
            ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));

            let inner_msg = Arc::clone(&self.inner);
            let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
                match event.data().as_string() {
                    Some(frame) => inner_msg.read().dispatch_frame(&frame),
                    None => tracing::warn!("Relay sent a non-text frame; ignored"),
                }
            }) as Box<dyn FnMut(MessageEvent)>);
            ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

            let inner_err = Arc::clone(&self.inner);
            let onerror = Closure::wrap(Box::new(move |event: ErrorEvent| {
                tracing::error!("Signaling relay error: {}", event.message());
                inner_err.write().state = RelayState::Error;
            }) as Box<dyn FnMut(ErrorEvent)>);
            ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));

            let inner_close = Arc::clone(&self.inner);
            let onclose = Closure::wrap(Box::new(move |event: CloseEvent| {
                tracing::info!(
                    "Signaling relay closed: code={} reason={}",
                    event.code(),
                    event.reason()
                );
                let mut guard = inner_close.write();
                guard.state = RelayState::Disconnected;
                // Ends the subscriber's stream.
                guard.ingress_tx = None;
            }) as Box<dyn FnMut(CloseEvent)>);
            ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));

            let mut guard = self.inner.write();
            guard.socket = Some(ws);
            guard.callbacks = Some(RelayCallbacks {
                _onopen: onopen,
                _onmessage: onmessage,
                _onerror: onerror,
                _onclose: onclose,
            });
            tracing::info!("Signaling relay connecting to {}", self.url);
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            tracing::debug!("Relay simulation: connected to {}", self.url);
            let mut guard = self.inner.write();
            guard.state = RelayState::Connected;
            guard.send_buffer.clear();
        }

        Ok(())
    }

    /// Send one text frame, queueing it while the socket is still opening.
    pub fn send_text(&self, frame: String) -> Result<(), SignalingError> {
        let mut guard = self.inner.write();
        match guard.state {
            RelayState::Disconnected | RelayState::Error => return Err(SignalingError::Closed),
            RelayState::Connecting => {
                guard.send_buffer.push(frame);
                return Ok(());
            }
            RelayState::Connected => {}
        }

        #[cfg(target_arch = "wasm32")]
        {
            match guard.socket.as_ref() {
                Some(ws) => ws
                    .send_with_str(&frame)
                    .map_err(|e| SignalingError::SendFailed(crate::describe_js_error(&e)))?,
                None => return Err(SignalingError::Closed),
            }
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            tracing::debug!("Relay simulation: sent {} bytes to {}", frame.len(), self.url);
        }

        Ok(())
    }

    pub fn state(&self) -> RelayState {
        self.inner.read().state
    }

    /// Frames waiting for the socket to open
    pub fn buffered(&self) -> usize {
        self.inner.read().send_buffer.len()
    }

    /// Feed a frame as if the socket had received it
    pub fn inject_frame(&self, frame: &str) {
        self.inner.read().dispatch_frame(frame);
    }

    /// Close the socket and release its callbacks.
    pub fn disconnect(&self) {
        let mut guard = self.inner.write();

        #[cfg(target_arch = "wasm32")]
        {
            if let Some(ws) = guard.socket.take() {
                ws.set_onopen(None);
                ws.set_onmessage(None);
                ws.set_onerror(None);
                ws.set_onclose(None);
                if let Err(e) = ws.close() {
                    tracing::warn!("WebSocket close error: {:?}", e);
                }
            }
            guard.callbacks = None;
        }

        guard.state = RelayState::Disconnected;
        guard.send_buffer.clear();
        guard.ingress_tx = None;
    }
}

impl SignalingChannel for SignalingRelay {
    fn emit(&self, event: SignalingEvent) -> Result<(), SignalingError> {
        let frame = event.to_json()?;
        tracing::debug!("Emitting {}", event);
        self.send_text(frame)
    }
}
