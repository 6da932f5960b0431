//! WHIP endpoint model: descriptors, ingest state and session records.

pub mod registry;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::{
    auth::Token,
    backend::proto::{HandleId, PublisherId},
    conf::IceServer,
    sdp::IceCredentials,
};

pub use self::registry::Endpoints;

/// ID of a WHIP endpoint, stable across publish cycles.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    PartialEq,
    Serialize,
)]
#[from(forward)]
pub struct EndpointId(String);

impl EndpointId {
    /// Indicates whether this id is syntactically acceptable: non-empty and
    /// restricted to `[A-Za-z0-9_-]+`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    /// Returns this id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque id of a publishing session resource, minted at publish time.
///
/// Not derivable from the [`EndpointId`] it belongs to.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    PartialEq,
    Serialize,
)]
#[from(forward)]
pub struct ResourceId(String);

impl ResourceId {
    /// Returns this id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Plain-RTP forwarding target of an endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Recipient {
    /// Host to forward RTP packets to.
    pub host: String,

    /// Target port for audio RTP. `0` disables audio forwarding.
    pub audio_port: u16,

    /// Target port for video RTP. `0` disables video forwarding.
    pub video_port: u16,

    /// Target port for video RTCP. `0` disables RTCP forwarding.
    pub video_rtcp_port: u16,
}

impl Recipient {
    /// Indicates whether this recipient names at least one forwarding
    /// target.
    #[must_use]
    pub fn has_targets(&self) -> bool {
        !self.host.is_empty() && (self.audio_port > 0 || self.video_port > 0)
    }
}

/// Static description of a WHIP endpoint, supplied at creation time.
#[derive(Clone, Debug)]
pub struct EndpointSpec {
    /// Room on the media backend that publishes land into.
    pub room: u64,

    /// Display name announced to the backend room.
    pub label: String,

    /// Room PIN, if the room requires one. Never echoed to clients.
    pub pin: Option<String>,

    /// Room secret for privileged requests. Never echoed to clients.
    pub secret: Option<String>,

    /// Backend admin key for privileged requests. Never echoed to clients.
    pub admin_key: Option<String>,

    /// Authorization credential required from publishing clients.
    pub token: Option<Token>,

    /// Per-endpoint override of the advertised STUN/TURN servers.
    pub ice_servers: Option<Vec<IceServer>>,

    /// Plain-RTP fan-out target, if any.
    pub recipient: Option<Recipient>,
}

impl EndpointSpec {
    /// Creates a new [`EndpointSpec`] for the provided room with the default
    /// display label.
    #[must_use]
    pub fn new(room: u64) -> Self {
        Self {
            room,
            label: Self::default_label(room),
            pin: None,
            secret: None,
            admin_key: None,
            token: None,
            ice_servers: None,
            recipient: None,
        }
    }

    /// Default display label for endpoints of the provided room.
    #[must_use]
    pub fn default_label(room: u64) -> String {
        format!("WHIP Publisher {}", room)
    }
}

/// Live publishing session of an endpoint.
#[derive(Clone, Debug)]
pub struct Session {
    /// Backend plugin handle owning the publish.
    pub handle: HandleId,

    /// Publisher id assigned by the backend room, once known.
    pub publisher: Option<PublisherId>,

    /// SDP offer the session was established with, kept for ICE restarts.
    pub sdp_offer: String,

    /// ICE credentials of the stored offer, if the offer carried them.
    pub ice: Option<IceCredentials>,

    /// Resource id the session is addressed by.
    pub resource: ResourceId,

    /// Current ETag, regenerated on every completed ICE restart.
    pub etag: String,
}

/// Ingest state of an endpoint.
#[derive(Clone, Debug)]
pub enum IngestState {
    /// No publisher and no negotiation in flight.
    Idle,

    /// Publish accepted, backend negotiation in flight.
    Negotiating {
        /// Resource id reserved for the session being negotiated.
        resource: ResourceId,
    },

    /// Publisher is live.
    Active(Session),
}

impl IngestState {
    /// Indicates whether the endpoint has no session at all.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns the resource id owned by this state, if any.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::Idle => None,
            Self::Negotiating { resource } => Some(resource),
            Self::Active(session) => Some(&session.resource),
        }
    }
}

/// Client-facing projection of an endpoint.
///
/// Carries presence flags only, never the credential values themselves.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    /// Endpoint id.
    pub id: EndpointId,

    /// Backend room of the endpoint.
    pub room: u64,

    /// Display label of the endpoint.
    pub label: String,

    /// Indicator whether the endpoint currently has an active session.
    pub enabled: bool,

    /// Indicator whether a room PIN is configured.
    pub pin: bool,

    /// Indicator whether a room secret is configured.
    pub secret: bool,

    /// Indicator whether a backend admin key is configured.
    pub admin_key: bool,

    /// Indicator whether client authorization is configured.
    pub token: bool,

    /// Indicator whether the ICE-server advertisement is overridden.
    pub ice_servers: bool,

    /// Indicator whether a plain-RTP recipient is configured.
    pub recipient: bool,
}
