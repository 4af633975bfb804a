//! Transport protocol of a charging point session
//!
//! A session speaks exactly one wire format for its whole lifetime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire format used by a charging point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    /// OCPP-S 1.5: SOAP envelopes over HTTP, both directions
    #[serde(rename = "SOAP")]
    Soap,
    /// OCPP-J 1.6: JSON arrays over a WebSocket
    #[serde(rename = "JSON")]
    Json,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soap => "SOAP",
            Self::Json => "JSON",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
