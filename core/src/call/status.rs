// User-visible call status label

use serde::{Deserialize, Serialize};
use std::fmt;

/// Style class applied next to the base `call-status` class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Neutral,
    Error,
    Connected,
}

impl StatusClass {
    pub fn as_css(&self) -> &'static str {
        match self {
            StatusClass::Neutral => "",
            StatusClass::Error => "error",
            StatusClass::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStatus {
    pub text: String,
    pub class: StatusClass,
}

impl CallStatus {
    pub fn neutral(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            class: StatusClass::Neutral,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            class: StatusClass::Error,
        }
    }

    pub fn calling(remote_name: &str) -> Self {
        Self::neutral(format!("Calling {}...", remote_name))
    }

    pub fn peer_joined() -> Self {
        Self::neutral("User joined, connecting...")
    }

    pub fn connected() -> Self {
        Self {
            text: "Connected".to_string(),
            class: StatusClass::Connected,
        }
    }

    pub fn media_denied() -> Self {
        Self::error("Camera/mic access denied")
    }

    pub fn connection_lost() -> Self {
        Self::error("Connection lost")
    }

    pub fn negotiation_failed() -> Self {
        Self::error("Could not connect the call")
    }

    pub fn peer_left() -> Self {
        Self::error("User left the call")
    }

    pub fn call_ended() -> Self {
        Self::neutral("Call ended")
    }

    pub fn declined() -> Self {
        Self::error("Call declined")
    }

    pub fn is_error(&self) -> bool {
        self.class == StatusClass::Error
    }

    /// Full `className` for the status element
    pub fn css_class(&self) -> String {
        format!("call-status {}", self.class.as_css())
    }
}

impl Default for CallStatus {
    fn default() -> Self {
        Self::neutral("Starting call...")
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
