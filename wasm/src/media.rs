// Camera and microphone access through `navigator.mediaDevices`

use matchcall_core::call::MediaError;

/// Map a `DOMException` name from `getUserMedia` onto a media error.
pub fn media_error_from_dom(name: &str, message: &str) -> MediaError {
    let detail = if message.is_empty() {
        name.to_string()
    } else {
        format!("{}: {}", name, message)
    };
    match name {
        "NotAllowedError" | "SecurityError" | "PermissionDeniedError" => {
            MediaError::PermissionDenied(detail)
        }
        "NotFoundError" | "OverconstrainedError" | "DevicesNotFoundError" => {
            MediaError::DeviceNotFound(detail)
        }
        _ => MediaError::Unavailable(detail),
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserMediaDevices, BrowserStream, BrowserTrack};

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::media_error_from_dom;
    use async_trait::async_trait;
    use matchcall_core::call::{MediaDevices, MediaError, MediaStream, MediaTrack, TrackKind};
    use matchcall_core::config::MediaConstraints;
    use std::any::Any;
    use std::rc::Rc;
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;

    pub struct BrowserTrack {
        track: web_sys::MediaStreamTrack,
    }

    impl BrowserTrack {
        pub fn new(track: web_sys::MediaStreamTrack) -> Self {
            Self { track }
        }

        pub fn raw(&self) -> &web_sys::MediaStreamTrack {
            &self.track
        }
    }

    impl MediaTrack for BrowserTrack {
        fn id(&self) -> String {
            self.track.id()
        }

        fn kind(&self) -> TrackKind {
            match self.track.kind().as_str() {
                "audio" => TrackKind::Audio,
                _ => TrackKind::Video,
            }
        }

        fn is_enabled(&self) -> bool {
            self.track.enabled()
        }

        fn set_enabled(&self, enabled: bool) {
            self.track.set_enabled(enabled);
        }

        fn stop(&self) {
            self.track.stop();
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    pub struct BrowserStream {
        stream: web_sys::MediaStream,
    }

    impl BrowserStream {
        pub fn new(stream: web_sys::MediaStream) -> Self {
            Self { stream }
        }

        pub fn raw(&self) -> &web_sys::MediaStream {
            &self.stream
        }
    }

    impl MediaStream for BrowserStream {
        fn id(&self) -> String {
            self.stream.id()
        }

        fn tracks(&self) -> Vec<Rc<dyn MediaTrack>> {
            self.stream
                .get_tracks()
                .iter()
                .map(|track| {
                    Rc::new(BrowserTrack::new(track.unchecked_into())) as Rc<dyn MediaTrack>
                })
                .collect()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// `getUserMedia` on the page's navigator
    #[derive(Debug, Default)]
    pub struct BrowserMediaDevices;

    #[async_trait(?Send)]
    impl MediaDevices for BrowserMediaDevices {
        async fn get_user_media(
            &self,
            constraints: MediaConstraints,
        ) -> Result<Rc<dyn MediaStream>, MediaError> {
            let window = web_sys::window()
                .ok_or_else(|| MediaError::Unavailable("no window".to_string()))?;
            let devices = window.navigator().media_devices().map_err(|e| classify(&e))?;

            let request = web_sys::MediaStreamConstraints::new();
            request.set_audio(&JsValue::from_bool(constraints.audio));
            request.set_video(&JsValue::from_bool(constraints.video));

            let promise = devices
                .get_user_media_with_constraints(&request)
                .map_err(|e| classify(&e))?;
            let stream = JsFuture::from(promise).await.map_err(|e| classify(&e))?;

            let stream: web_sys::MediaStream = stream
                .dyn_into()
                .map_err(|_| MediaError::Unavailable("not a MediaStream".to_string()))?;
            tracing::info!("Local media stream {} captured", stream.id());
            Ok(Rc::new(BrowserStream::new(stream)))
        }
    }

    fn classify(err: &JsValue) -> MediaError {
        let name = js_sys::Reflect::get(err, &JsValue::from_str("name"))
            .ok()
            .and_then(|v| v.as_string())
            .unwrap_or_default();
        let message = js_sys::Reflect::get(err, &JsValue::from_str("message"))
            .ok()
            .and_then(|v| v.as_string())
            .unwrap_or_default();
        media_error_from_dom(&name, &message)
    }
}
