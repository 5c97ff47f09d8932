// Call configuration: the values a call page hands to the coordinator
//
// The browser reads them from `data-*` attributes on the call container;
// hosts and tests can build them from any string map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Default delay before leaving the call page, so pending signaling flushes
pub const DEFAULT_REDIRECT_DELAY_MS: u64 = 1000;

/// Attribute keys, in `DOMStringMap` (camelCase) form
pub mod attr {
    pub const ROOM_ID: &str = "roomId";
    pub const MY_USER_ID: &str = "myUserId";
    pub const MY_USER_NAME: &str = "myUserName";
    pub const OTHER_USER_ID: &str = "otherUserId";
    pub const OTHER_USER_NAME: &str = "otherUserName";
    pub const REDIRECT_URL: &str = "redirectUrl";
    pub const SIGNALING_URL: &str = "signalingUrl";
}

/// One side of the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub name: String,
}

impl Participant {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// STUN/TURN server handed to the peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Capture request passed to the media devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Room shared with the remote participant
    pub room_id: String,
    pub local: Participant,
    pub remote: Participant,
    /// Where the page goes once the call is over
    pub redirect_url: String,
    /// Relay endpoint; `None` lets the host pick its default
    pub signaling_url: Option<String>,
    pub ice_servers: Vec<IceServer>,
    pub redirect_delay_ms: u64,
    pub media: MediaConstraints,
}

impl CallConfig {
    pub fn new(
        room_id: impl Into<String>,
        local: Participant,
        remote: Participant,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            local,
            remote,
            redirect_url: redirect_url.into(),
            signaling_url: None,
            ice_servers: default_ice_servers(),
            redirect_delay_ms: DEFAULT_REDIRECT_DELAY_MS,
            media: MediaConstraints::default(),
        }
    }

    /// Build from `data-*` attribute values keyed as in [`attr`].
    pub fn from_attributes(attrs: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let local = Participant::new(
            int_attr(attrs, attr::MY_USER_ID)?,
            str_attr(attrs, attr::MY_USER_NAME)?,
        );
        let remote = Participant::new(
            int_attr(attrs, attr::OTHER_USER_ID)?,
            str_attr(attrs, attr::OTHER_USER_NAME)?,
        );
        let mut config = Self::new(
            str_attr(attrs, attr::ROOM_ID)?,
            local,
            remote,
            str_attr(attrs, attr::REDIRECT_URL)?,
        );
        config.signaling_url = attrs
            .get(attr::SIGNALING_URL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_id.trim().is_empty() {
            return Err(ConfigError::EmptyValue(attr::ROOM_ID));
        }
        if self.redirect_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue(attr::REDIRECT_URL));
        }
        if self.local.id == self.remote.id {
            return Err(ConfigError::SelfCall(self.local.id));
        }
        if !self.media.audio && !self.media.video {
            return Err(ConfigError::NoMedia);
        }
        Ok(())
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }
}

/// Public Google STUN servers, as used by the call page
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:stun1.l.google.com:19302"),
    ]
}

fn str_attr(attrs: &HashMap<String, String>, key: &'static str) -> Result<String, ConfigError> {
    attrs
        .get(key)
        .cloned()
        .ok_or(ConfigError::MissingAttribute(key))
}

fn int_attr(attrs: &HashMap<String, String>, key: &'static str) -> Result<i64, ConfigError> {
    let raw = str_attr(attrs, key)?;
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAttribute { key, value: raw })
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidAttribute { key: &'static str, value: String },

    #[error("Empty value for {0}")]
    EmptyValue(&'static str),

    #[error("Participant {0} cannot call themselves")]
    SelfCall(i64),

    #[error("At least one of audio or video must be requested")]
    NoMedia,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> HashMap<String, String> {
        [
            (attr::ROOM_ID, "call_1_2"),
            (attr::MY_USER_ID, "1"),
            (attr::MY_USER_NAME, "Alice"),
            (attr::OTHER_USER_ID, "2"),
            (attr::OTHER_USER_NAME, "Bob"),
            (attr::REDIRECT_URL, "/chat/2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_from_attributes() {
        let config = CallConfig::from_attributes(&attrs()).unwrap();
        assert_eq!(config.room_id, "call_1_2");
        assert_eq!(config.local, Participant::new(1, "Alice"));
        assert_eq!(config.remote, Participant::new(2, "Bob"));
        assert_eq!(config.redirect_url, "/chat/2");
        assert_eq!(config.signaling_url, None);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.redirect_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_missing_attribute() {
        let mut a = attrs();
        a.remove(attr::OTHER_USER_NAME);
        assert_eq!(
            CallConfig::from_attributes(&a),
            Err(ConfigError::MissingAttribute(attr::OTHER_USER_NAME))
        );
    }

    #[test]
    fn test_non_numeric_user_id() {
        let mut a = attrs();
        a.insert(attr::MY_USER_ID.to_string(), "alice".to_string());
        assert!(matches!(
            CallConfig::from_attributes(&a),
            Err(ConfigError::InvalidAttribute { key: attr::MY_USER_ID, .. })
        ));
    }

    #[test]
    fn test_self_call_rejected() {
        let mut a = attrs();
        a.insert(attr::OTHER_USER_ID.to_string(), "1".to_string());
        assert_eq!(CallConfig::from_attributes(&a), Err(ConfigError::SelfCall(1)));
    }

    #[test]
    fn test_blank_signaling_url_ignored() {
        let mut a = attrs();
        a.insert(attr::SIGNALING_URL.to_string(), "  ".to_string());
        assert_eq!(CallConfig::from_attributes(&a).unwrap().signaling_url, None);

        a.insert(attr::SIGNALING_URL.to_string(), "ws://relay/ws".to_string());
        assert_eq!(
            CallConfig::from_attributes(&a).unwrap().signaling_url.as_deref(),
            Some("ws://relay/ws")
        );
    }

    #[test]
    fn test_no_media_rejected() {
        let mut config = CallConfig::from_attributes(&attrs()).unwrap();
        config.media = MediaConstraints {
            audio: false,
            video: false,
        };
        assert_eq!(config.validate(), Err(ConfigError::NoMedia));
    }
}
