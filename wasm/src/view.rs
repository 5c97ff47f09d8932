// DOM bindings for the call page
//
// Element ids and the `#videochat-container` data attributes the page
// template renders.

use matchcall_core::call::TrackKind;

pub const CONTAINER: &str = "videochat-container";
pub const LOCAL_VIDEO: &str = "local-video";
pub const REMOTE_VIDEO: &str = "remote-video";
pub const REMOTE_PLACEHOLDER: &str = "remote-placeholder";
pub const CALL_STATUS: &str = "call-status";
pub const TOGGLE_VIDEO: &str = "toggle-video";
pub const TOGGLE_AUDIO: &str = "toggle-audio";
pub const END_CALL: &str = "end-call";

/// Class set on a toggle button while its track kind is muted
pub const ACTIVE_CLASS: &str = "active";

pub fn toggle_button_id(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Video => TOGGLE_VIDEO,
        TrackKind::Audio => TOGGLE_AUDIO,
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::{read_call_config, DomCallView};

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::*;
    use crate::media::BrowserStream;
    use matchcall_core::call::{CallStatus, CallView, MediaStream};
    use matchcall_core::config::{attr, CallConfig};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::time::Duration;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::{JsCast, JsValue};
    use web_sys::{Document, HtmlElement, HtmlMediaElement, Window};

    /// Read the call configuration from `#videochat-container`'s dataset.
    pub fn read_call_config(document: &Document) -> Result<CallConfig, JsValue> {
        let container: HtmlElement = document
            .get_element_by_id(CONTAINER)
            .ok_or_else(|| JsValue::from_str("#videochat-container not found"))?
            .dyn_into()
            .map_err(|_| JsValue::from_str("#videochat-container is not an HTML element"))?;
        let dataset = container.dataset();

        let mut attrs = HashMap::new();
        for key in [
            attr::ROOM_ID,
            attr::MY_USER_ID,
            attr::MY_USER_NAME,
            attr::OTHER_USER_ID,
            attr::OTHER_USER_NAME,
            attr::REDIRECT_URL,
            attr::SIGNALING_URL,
        ] {
            if let Some(value) = dataset.get(key) {
                attrs.insert(key.to_string(), value);
            }
        }

        CallConfig::from_attributes(&attrs).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Status label, video sinks, toggle buttons and navigation
    pub struct DomCallView {
        window: Window,
        document: Document,
        /// Pending `setTimeout` callback for the post-call redirect
        redirect: Mutex<Option<Closure<dyn FnMut()>>>,
    }

    impl DomCallView {
        pub fn new(window: Window, document: Document) -> Self {
            Self {
                window,
                document,
                redirect: Mutex::new(None),
            }
        }

        fn element<T: JsCast>(&self, id: &str) -> Option<T> {
            let element = self.document.get_element_by_id(id)?;
            match element.dyn_into::<T>() {
                Ok(element) => Some(element),
                Err(_) => {
                    tracing::warn!("#{} has an unexpected element type", id);
                    None
                }
            }
        }

        fn attach(&self, id: &str, stream: &Rc<dyn MediaStream>) {
            let Some(video) = self.element::<HtmlMediaElement>(id) else {
                tracing::warn!("#{} missing; stream {} not shown", id, stream.id());
                return;
            };
            match stream.as_any().downcast_ref::<BrowserStream>() {
                Some(stream) => video.set_src_object(Some(stream.raw())),
                None => tracing::warn!("Stream {} is not a browser stream", stream.id()),
            }
        }
    }

    impl CallView for DomCallView {
        fn set_status(&self, status: &CallStatus) {
            if let Some(label) = self.element::<HtmlElement>(CALL_STATUS) {
                label.set_text_content(Some(&status.text));
                label.set_class_name(&status.css_class());
            }
        }

        fn show_local_stream(&self, stream: &Rc<dyn MediaStream>) {
            self.attach(LOCAL_VIDEO, stream);
        }

        fn show_remote_stream(&self, stream: &Rc<dyn MediaStream>) {
            self.attach(REMOTE_VIDEO, stream);
            if let Some(placeholder) = self.element::<HtmlElement>(REMOTE_PLACEHOLDER) {
                if let Err(e) = placeholder.style().set_property("display", "none") {
                    tracing::warn!("Could not hide placeholder: {:?}", e);
                }
            }
        }

        fn set_toggle_active(&self, kind: TrackKind, active: bool) {
            if let Some(button) = self.element::<HtmlElement>(toggle_button_id(kind)) {
                if let Err(e) = button.class_list().toggle_with_force(ACTIVE_CLASS, active) {
                    tracing::warn!("Could not update toggle: {:?}", e);
                }
            }
        }

        fn redirect_after(&self, url: &str, delay: Duration) {
            let target = url.to_string();
            let navigate = Closure::wrap(Box::new(move || {
                if let Some(window) = web_sys::window() {
                    if let Err(e) = window.location().set_href(&target) {
                        tracing::error!("Redirect failed: {:?}", e);
                    }
                }
            }) as Box<dyn FnMut()>);

            let millis = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
            if let Err(e) = self
                .window
                .set_timeout_with_callback_and_timeout_and_arguments_0(
                    navigate.as_ref().unchecked_ref(),
                    millis,
                )
            {
                tracing::error!("Could not schedule redirect: {:?}", e);
                return;
            }
            *self.redirect.lock() = Some(navigate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_ids() {
        assert_eq!(toggle_button_id(TrackKind::Video), "toggle-video");
        assert_eq!(toggle_button_id(TrackKind::Audio), "toggle-audio");
    }
}
