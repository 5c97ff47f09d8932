// matchcall-wasm: browser bindings for the call page
//
// Usage from the page script, once the DOM is ready:
//
//     import init, { VideoCall } from "./matchcall_wasm.js";
//     await init();
//     const call = new VideoCall();

pub mod media;
pub mod peer;
pub mod relay;
pub mod view;

use std::sync::Once;
use wasm_bindgen::prelude::*;

static LOGGING: Once = Once::new();

#[wasm_bindgen]
pub fn init_logging() {
    LOGGING.call_once(|| {
        console_error_panic_hook::set_once();
        tracing_wasm::set_as_global_default();
    });
}

/// Best-effort text for a thrown JS value
#[cfg(target_arch = "wasm32")]
pub(crate) fn describe_js_error(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            js_sys::Reflect::get(value, &JsValue::from_str("message"))
                .ok()
                .and_then(|m| m.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", value))
}

#[cfg(target_arch = "wasm32")]
pub use call::VideoCall;

#[cfg(target_arch = "wasm32")]
mod call {
    use super::init_logging;
    use crate::media::BrowserMediaDevices;
    use crate::peer::BrowserPeerFactory;
    use crate::relay::{default_signaling_url, SignalingRelay};
    use crate::view::{self, DomCallView};
    use futures::StreamExt;
    use matchcall_core::call::{CallPorts, CallSession};
    use std::rc::Rc;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::EventTarget;

    type Listener = Closure<dyn FnMut(web_sys::Event)>;

    /// The call page: one session wired to the DOM, the relay and WebRTC
    #[wasm_bindgen]
    pub struct VideoCall {
        session: Rc<CallSession>,
        relay: SignalingRelay,
        /// Registered DOM listeners, removed on `free()`
        listeners: Vec<(EventTarget, &'static str, Listener)>,
    }

    #[wasm_bindgen]
    impl VideoCall {
        /// Read `#videochat-container`, connect to the relay, wire the
        /// buttons and start the call.
        #[wasm_bindgen(constructor)]
        pub fn new() -> Result<VideoCall, JsValue> {
            init_logging();

            let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
            let document = window
                .document()
                .ok_or_else(|| JsValue::from_str("no document"))?;
            let config = view::read_call_config(&document)?;

            let url = match config.signaling_url.clone() {
                Some(url) => url,
                None => {
                    let location = window.location();
                    default_signaling_url(&location.protocol()?, &location.host()?, config.local.id)
                }
            };
            let relay = SignalingRelay::new(url);
            let mut inbound = relay.subscribe();
            relay
                .connect()
                .map_err(|e| JsValue::from_str(&format!("Relay connect failed: {}", e)))?;

            let ports = CallPorts {
                signaling: Rc::new(relay.clone()),
                media: Rc::new(BrowserMediaDevices),
                peers: Rc::new(BrowserPeerFactory),
                view: Rc::new(DomCallView::new(window.clone(), document.clone())),
            };
            let (session, peer_events) = CallSession::new(config, ports);
            let session = Rc::new(session);

            let signals = Rc::clone(&session);
            wasm_bindgen_futures::spawn_local(async move {
                while let Some(event) = inbound.next().await {
                    // Rejections are logged by the session.
                    let _ = signals.handle_signal(event).await;
                }
                tracing::info!("Signaling loop ended");
            });

            let peers = Rc::clone(&session);
            wasm_bindgen_futures::spawn_local(async move {
                peers.run_peer_events(peer_events).await;
            });

            let starter = Rc::clone(&session);
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(e) = starter.start_call().await {
                    tracing::error!("Call did not start: {}", e);
                }
            });

            let mut call = VideoCall {
                session,
                relay,
                listeners: Vec::new(),
            };
            call.wire_controls(&window, &document)?;
            Ok(call)
        }

        #[wasm_bindgen(js_name = toggleVideo)]
        pub fn toggle_video(&self) -> bool {
            self.session.toggle_video()
        }

        #[wasm_bindgen(js_name = toggleAudio)]
        pub fn toggle_audio(&self) -> bool {
            self.session.toggle_audio()
        }

        #[wasm_bindgen(js_name = endCall)]
        pub fn end_call(&self) {
            self.session.end_call(true);
        }

        /// `{ text, class }` of the current status label
        pub fn status(&self) -> Result<JsValue, JsValue> {
            serde_wasm_bindgen::to_value(&self.session.status())
                .map_err(|e| JsValue::from_str(&e.to_string()))
        }

        #[wasm_bindgen(js_name = peerState)]
        pub fn peer_state(&self) -> String {
            self.session.peer_state().to_string()
        }
    }

    impl VideoCall {
        fn wire_controls(
            &mut self,
            window: &web_sys::Window,
            document: &web_sys::Document,
        ) -> Result<(), JsValue> {
            let session = Rc::clone(&self.session);
            self.listen_on(document, view::TOGGLE_VIDEO, move || {
                session.toggle_video();
            })?;
            let session = Rc::clone(&self.session);
            self.listen_on(document, view::TOGGLE_AUDIO, move || {
                session.toggle_audio();
            })?;
            let session = Rc::clone(&self.session);
            self.listen_on(document, view::END_CALL, move || {
                session.end_call(true);
            })?;

            let session = Rc::clone(&self.session);
            let unload: Listener = Closure::wrap(Box::new(move |_: web_sys::Event| {
                session.on_page_unload();
            }) as Box<dyn FnMut(web_sys::Event)>);
            let target: &EventTarget = window.as_ref();
            target.add_event_listener_with_callback("beforeunload", unload.as_ref().unchecked_ref())?;
            self.listeners.push((target.clone(), "beforeunload", unload));
            Ok(())
        }

        fn listen_on(
            &mut self,
            document: &web_sys::Document,
            id: &str,
            mut action: impl FnMut() + 'static,
        ) -> Result<(), JsValue> {
            let Some(element) = document.get_element_by_id(id) else {
                tracing::warn!("#{} missing; control not wired", id);
                return Ok(());
            };
            let listener: Listener = Closure::wrap(Box::new(move |_: web_sys::Event| {
                action();
            }) as Box<dyn FnMut(web_sys::Event)>);
            let target: EventTarget = element.unchecked_into();
            target.add_event_listener_with_callback("click", listener.as_ref().unchecked_ref())?;
            self.listeners.push((target, "click", listener));
            Ok(())
        }
    }

    impl Drop for VideoCall {
        fn drop(&mut self) {
            for (target, event, listener) in self.listeners.drain(..) {
                let _ = target
                    .remove_event_listener_with_callback(event, listener.as_ref().unchecked_ref());
            }
            self.relay.disconnect();
        }
    }
}
