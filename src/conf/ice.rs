//! STUN/TURN servers advertised to publishing clients.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Settings of STUN/TURN servers advertised to publishing clients via
/// `Link: <..>; rel="ice-server"` response headers.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Ice {
    /// Servers advertised for endpoints without a per-endpoint override.
    #[default(vec![IceServer::default()])]
    pub servers: Vec<IceServer>,
}

/// Single STUN/TURN server advertisement.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct IceServer {
    /// URI of the server. Only `stun:`, `turn:` and `turns:` URIs are
    /// advertised; anything else is dropped.
    #[default(String::from("stun:stun.l.google.com:19302"))]
    pub uri: String,

    /// TURN username, if the server requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential, if the server requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Indicates whether this server may be advertised to clients.
    #[must_use]
    pub fn is_advertisable(&self) -> bool {
        ["stun:", "turn:", "turns:"]
            .iter()
            .any(|scheme| self.uri.starts_with(scheme))
    }
}
