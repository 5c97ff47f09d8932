// RTCPeerConnection adapter
//
// Each connection keeps its event closures alongside the browser object and
// detaches them on close/drop instead of leaking them with `.forget()`.
// Callbacks do not touch the session: they turn browser events into
// `PeerEvent` values on the channel the session handed to the factory.

use matchcall_core::call::ConnectionState;
use matchcall_core::signaling::SdpType;

/// Lowercase `RTCPeerConnection.connectionState` value to our state
pub fn connection_state_from_str(state: &str) -> Option<ConnectionState> {
    match state {
        "new" => Some(ConnectionState::New),
        "connecting" => Some(ConnectionState::Connecting),
        "connected" => Some(ConnectionState::Connected),
        "disconnected" => Some(ConnectionState::Disconnected),
        "failed" => Some(ConnectionState::Failed),
        "closed" => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// `RTCSdpType` string for a description kind
pub fn sdp_type_str(kind: SdpType) -> &'static str {
    match kind {
        SdpType::Offer => "offer",
        SdpType::Answer => "answer",
        SdpType::Pranswer => "pranswer",
        SdpType::Rollback => "rollback",
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserPeerConnection, BrowserPeerFactory};

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::connection_state_from_str;
    use crate::describe_js_error;
    use crate::media::{BrowserStream, BrowserTrack};
    use async_trait::async_trait;
    use matchcall_core::call::{
        ConnectionState, MediaStream, MediaTrack, PeerConnection, PeerConnectionFactory,
        PeerError, PeerEvent, PeerEventSender,
    };
    use matchcall_core::config::IceServer;
    use matchcall_core::signaling::{IceCandidate, SdpType, SessionDescription};
    use std::rc::Rc;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{
        RtcConfiguration, RtcIceCandidateInit, RtcIceServer, RtcPeerConnection,
        RtcPeerConnectionIceEvent, RtcSdpType, RtcSessionDescriptionInit, RtcTrackEvent,
    };

    pub struct BrowserPeerConnection {
        pc: RtcPeerConnection,
        _ontrack: Closure<dyn FnMut(RtcTrackEvent)>,
        _onicecandidate: Closure<dyn FnMut(RtcPeerConnectionIceEvent)>,
        _onconnectionstatechange: Closure<dyn FnMut(web_sys::Event)>,
    }

    impl BrowserPeerConnection {
        pub fn new(ice_servers: &[IceServer], events: PeerEventSender) -> Result<Self, PeerError> {
            let config = RtcConfiguration::new();
            config.set_ice_servers(&ice_server_array(ice_servers));
            let pc = RtcPeerConnection::new_with_configuration(&config)
                .map_err(|e| PeerError::Create(describe_js_error(&e)))?;

            let tx = events.clone();
            let ontrack = Closure::wrap(Box::new(move |event: RtcTrackEvent| {
                let first = event.streams().get(0);
                let stream = match first.dyn_into::<web_sys::MediaStream>() {
                    Ok(stream) => stream,
                    Err(_) => {
                        tracing::warn!("Remote track {} without a stream", event.track().id());
                        return;
                    }
                };
                let stream: Rc<dyn MediaStream> = Rc::new(BrowserStream::new(stream));
                if tx.unbounded_send(PeerEvent::RemoteStream(stream)).is_err() {
                    tracing::debug!("Remote track after session closed");
                }
            }) as Box<dyn FnMut(RtcTrackEvent)>);
            pc.set_ontrack(Some(ontrack.as_ref().unchecked_ref()));

            let tx = events.clone();
            let onicecandidate = Closure::wrap(Box::new(move |event: RtcPeerConnectionIceEvent| {
                let candidate = event.candidate().map(|c| IceCandidate {
                    candidate: c.candidate(),
                    sdp_mid: c.sdp_mid(),
                    sdp_m_line_index: c.sdp_m_line_index(),
                    username_fragment: c.username_fragment(),
                });
                if tx.unbounded_send(PeerEvent::LocalCandidate(candidate)).is_err() {
                    tracing::debug!("Local candidate after session closed");
                }
            })
                as Box<dyn FnMut(RtcPeerConnectionIceEvent)>);
            pc.set_onicecandidate(Some(onicecandidate.as_ref().unchecked_ref()));

            let tx = events;
            let pc_state = pc.clone();
            let onconnectionstatechange = Closure::wrap(Box::new(move |_: web_sys::Event| {
                let raw = js_sys::Reflect::get(&pc_state, &JsValue::from_str("connectionState"))
                    .ok()
                    .and_then(|v| v.as_string())
                    .unwrap_or_default();
                let state = connection_state_from_str(&raw).unwrap_or(ConnectionState::New);
                if tx.unbounded_send(PeerEvent::StateChanged(state)).is_err() {
                    tracing::debug!("Connection state {} after session closed", raw);
                }
            }) as Box<dyn FnMut(web_sys::Event)>);
            pc.set_onconnectionstatechange(Some(onconnectionstatechange.as_ref().unchecked_ref()));

            Ok(Self {
                pc,
                _ontrack: ontrack,
                _onicecandidate: onicecandidate,
                _onconnectionstatechange: onconnectionstatechange,
            })
        }

        fn detach(&self) {
            self.pc.set_ontrack(None);
            self.pc.set_onicecandidate(None);
            self.pc.set_onconnectionstatechange(None);
        }

        async fn create_description(&self, kind: SdpType) -> Result<SessionDescription, PeerError> {
            let label = super::sdp_type_str(kind);
            let promise = match kind {
                SdpType::Answer => self.pc.create_answer(),
                _ => self.pc.create_offer(),
            };
            let value = JsFuture::from(promise)
                .await
                .map_err(|e| PeerError::CreateDescription(label, describe_js_error(&e)))?;
            let sdp = js_sys::Reflect::get(&value, &JsValue::from_str("sdp"))
                .ok()
                .and_then(|v| v.as_string())
                .ok_or_else(|| PeerError::CreateDescription(label, "no SDP".to_string()))?;
            Ok(SessionDescription::new(kind, sdp))
        }
    }

    impl Drop for BrowserPeerConnection {
        fn drop(&mut self) {
            self.detach();
        }
    }

    #[async_trait(?Send)]
    impl PeerConnection for BrowserPeerConnection {
        fn add_track(
            &self,
            track: &Rc<dyn MediaTrack>,
            stream: &Rc<dyn MediaStream>,
        ) -> Result<(), PeerError> {
            let track = track
                .as_any()
                .downcast_ref::<BrowserTrack>()
                .ok_or_else(|| PeerError::AddTrack("not a browser track".to_string()))?;
            let stream = stream
                .as_any()
                .downcast_ref::<BrowserStream>()
                .ok_or_else(|| PeerError::AddTrack("not a browser stream".to_string()))?;
            self.pc.add_track_0(track.raw(), stream.raw());
            Ok(())
        }

        async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
            self.create_description(SdpType::Offer).await
        }

        async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
            self.create_description(SdpType::Answer).await
        }

        async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
            JsFuture::from(self.pc.set_local_description(&description_init(desc)))
                .await
                .map_err(|e| PeerError::SetDescription(describe_js_error(&e)))?;
            Ok(())
        }

        async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
            JsFuture::from(self.pc.set_remote_description(&description_init(desc)))
                .await
                .map_err(|e| PeerError::SetDescription(describe_js_error(&e)))?;
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
            let init = RtcIceCandidateInit::new(&candidate.candidate);
            init.set_sdp_mid(candidate.sdp_mid.as_deref());
            init.set_sdp_m_line_index(candidate.sdp_m_line_index);
            if let Some(ufrag) = candidate.username_fragment.as_deref() {
                init.set_username_fragment(Some(ufrag));
            }
            JsFuture::from(
                self.pc
                    .add_ice_candidate_with_opt_rtc_ice_candidate_init(Some(&init)),
            )
            .await
            .map_err(|e| PeerError::AddCandidate(describe_js_error(&e)))?;
            Ok(())
        }

        fn close(&self) {
            self.detach();
            self.pc.close();
        }
    }

    /// Builds [`BrowserPeerConnection`]s
    #[derive(Debug, Default)]
    pub struct BrowserPeerFactory;

    impl PeerConnectionFactory for BrowserPeerFactory {
        fn create(
            &self,
            ice_servers: &[IceServer],
            events: PeerEventSender,
        ) -> Result<Rc<dyn PeerConnection>, PeerError> {
            let conn = BrowserPeerConnection::new(ice_servers, events)?;
            tracing::debug!("RTCPeerConnection created ({} ICE servers)", ice_servers.len());
            Ok(Rc::new(conn))
        }
    }

    fn ice_server_array(servers: &[IceServer]) -> js_sys::Array {
        let array = js_sys::Array::new();
        for server in servers {
            let urls = js_sys::Array::new();
            for url in &server.urls {
                urls.push(&JsValue::from_str(url));
            }
            let entry = RtcIceServer::new();
            entry.set_urls(&urls);
            if let Some(username) = &server.username {
                entry.set_username(username);
            }
            if let Some(credential) = &server.credential {
                entry.set_credential(credential);
            }
            array.push(&entry);
        }
        array
    }

    fn description_init(desc: &SessionDescription) -> RtcSessionDescriptionInit {
        let kind = match desc.kind {
            SdpType::Offer => RtcSdpType::Offer,
            SdpType::Answer => RtcSdpType::Answer,
            SdpType::Pranswer => RtcSdpType::Pranswer,
            SdpType::Rollback => RtcSdpType::Rollback,
        };
        let init = RtcSessionDescriptionInit::new(kind);
        init.set_sdp(&desc.sdp);
        init
    }
}
