//! Wire model of the media backend's WebSocket JSON RPC.
//!
//! Every request carries a fresh `transaction` nonce; replies and
//! unsolicited events arrive on the same stream and are told apart by the
//! presence of a matching transaction. Plugin-level payloads travel in
//! `body`, session descriptions in `jsep`.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sdp::Candidate;

/// ID of the gateway's session on the backend.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
pub struct SessionId(pub u64);

/// ID of a plugin handle bound to the backend session.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
pub struct HandleId(pub u64);

/// ID assigned by the backend room to a publisher.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
pub struct PublisherId(pub u64);

/// Session description payload of a request or reply.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Jsep {
    /// `offer` or `answer`.
    #[serde(rename = "type")]
    pub kind: String,

    /// The session description itself.
    pub sdp: String,
}

impl Jsep {
    /// Builds an `offer` payload.
    #[must_use]
    pub fn offer(sdp: String) -> Self {
        Self {
            kind: "offer".into(),
            sdp,
        }
    }
}

/// Outbound request frame.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum Request {
    /// Creates the backend session.
    Create {
        /// Correlation nonce.
        transaction: String,
    },

    /// Probes the backend session to keep it alive.
    KeepAlive {
        /// Session to keep alive.
        session_id: SessionId,
        /// Correlation nonce.
        transaction: String,
    },

    /// Creates a plugin handle bound to the session.
    Attach {
        /// Session to attach the handle to.
        session_id: SessionId,
        /// Plugin the handle binds to.
        plugin: String,
        /// Correlation nonce.
        transaction: String,
    },

    /// Sends a plugin request, optionally with a session description.
    Message {
        /// Session owning the handle.
        session_id: SessionId,
        /// Handle the request addresses.
        handle_id: HandleId,
        /// Correlation nonce.
        transaction: String,
        /// Plugin-level payload.
        body: Body,
        /// Session description accompanying the payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        jsep: Option<Jsep>,
    },

    /// Delivers trickled ICE candidates to a handle.
    Trickle {
        /// Session owning the handle.
        session_id: SessionId,
        /// Handle the candidates address.
        handle_id: HandleId,
        /// Correlation nonce.
        transaction: String,
        /// One candidate or a batch.
        #[serde(flatten)]
        payload: TricklePayload,
    },

    /// Tears a plugin handle down.
    Detach {
        /// Session owning the handle.
        session_id: SessionId,
        /// Handle to tear down.
        handle_id: HandleId,
        /// Correlation nonce.
        transaction: String,
    },

    /// Destroys the backend session.
    Destroy {
        /// Session to destroy.
        session_id: SessionId,
        /// Correlation nonce.
        transaction: String,
    },
}

impl Request {
    /// Returns the correlation nonce of this request.
    #[must_use]
    pub fn transaction(&self) -> &str {
        match self {
            Self::Create { transaction }
            | Self::KeepAlive { transaction, .. }
            | Self::Attach { transaction, .. }
            | Self::Message { transaction, .. }
            | Self::Trickle { transaction, .. }
            | Self::Detach { transaction, .. }
            | Self::Destroy { transaction, .. } => transaction,
        }
    }
}

/// Candidate payload of a [`Request::Trickle`].
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum TricklePayload {
    /// Single candidate (or the completion sentinel).
    Single {
        /// The candidate.
        candidate: Candidate,
    },

    /// Batch of candidates.
    Batch {
        /// The candidates, in order.
        candidates: Vec<Candidate>,
    },
}

impl From<Vec<Candidate>> for TricklePayload {
    fn from(mut candidates: Vec<Candidate>) -> Self {
        if candidates.len() == 1 {
            Self::Single {
                candidate: candidates.remove(0),
            }
        } else {
            Self::Batch { candidates }
        }
    }
}

/// Plugin-level payload of a [`Request::Message`].
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum Body {
    /// Joins a room as a publisher and configures the publish in one go.
    JoinAndConfigure(JoinParams),

    /// Reconfigures an established publish (ICE restart).
    Configure {
        /// Keep audio flowing.
        audio: bool,
        /// Keep video flowing.
        video: bool,
    },

    /// Starts a plain-RTP forward of the publish.
    #[serde(rename = "rtp_forward")]
    RtpForward(ForwardParams),
}

/// Parameters of a `joinandconfigure` plugin request.
#[derive(Clone, Debug, Serialize)]
pub struct JoinParams {
    /// Room to publish into.
    pub room: u64,

    /// Participant type; always `publisher` for ingest.
    pub ptype: String,

    /// Display name announced to the room.
    pub display: String,

    /// Room PIN, when the room requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,

    /// Accept audio.
    pub audio: bool,

    /// Accept video.
    pub video: bool,
}

impl JoinParams {
    /// Builds publisher join parameters for the provided room.
    #[must_use]
    pub fn publisher(room: u64, display: String, pin: Option<String>) -> Self {
        Self {
            room,
            ptype: "publisher".into(),
            display,
            pin,
            audio: true,
            video: true,
        }
    }
}

/// Parameters of an `rtp_forward` plugin request.
#[derive(Clone, Debug, Serialize)]
pub struct ForwardParams {
    /// Room the publisher lives in.
    pub room: u64,

    /// Publisher to forward.
    pub publisher_id: PublisherId,

    /// Host to forward RTP to.
    pub host: String,

    /// Audio RTP target port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_port: Option<u16>,

    /// Audio SSRC to stamp forwarded packets with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ssrc: Option<u32>,

    /// Video RTP target port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_port: Option<u16>,

    /// Video SSRC to stamp forwarded packets with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_ssrc: Option<u32>,

    /// Video RTCP target port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_rtcp_port: Option<u16>,

    /// Room secret, when the room requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Backend admin key, when the backend requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,
}

/// Inbound frame.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum Incoming {
    /// Successful reply to a request.
    Success {
        /// Correlation nonce of the request.
        #[serde(default)]
        transaction: Option<String>,
        /// Identifier minted by `create`/`attach`.
        #[serde(default)]
        data: Option<CreatedId>,
        /// Plugin-level reply payload.
        #[serde(default)]
        plugindata: Option<PluginData>,
    },

    /// Intermediate acknowledgement; the terminal reply follows later.
    Ack {
        /// Correlation nonce of the request.
        #[serde(default)]
        transaction: Option<String>,
    },

    /// Plugin event: terminal reply to an asynchronous request when it
    /// carries a transaction, unsolicited otherwise.
    Event {
        /// Correlation nonce of the request, if any.
        #[serde(default)]
        transaction: Option<String>,
        /// Handle the event originates from.
        #[serde(default)]
        sender: Option<HandleId>,
        /// Plugin-level payload.
        #[serde(default)]
        plugindata: Option<PluginData>,
        /// Session description accompanying the payload.
        #[serde(default)]
        jsep: Option<Jsep>,
    },

    /// Request failure.
    Error {
        /// Correlation nonce of the request, if any.
        #[serde(default)]
        transaction: Option<String>,
        /// Failure details.
        error: ErrorInfo,
    },

    /// The backend dropped the PeerConnection behind a handle.
    HangUp {
        /// Affected handle.
        #[serde(default)]
        sender: Option<HandleId>,
        /// Backend-reported cause.
        #[serde(default)]
        reason: Option<String>,
    },

    /// A handle was detached on the backend side.
    Detached {
        /// Affected handle.
        #[serde(default)]
        sender: Option<HandleId>,
    },

    /// The backend expired the session.
    Timeout {
        /// Expired session.
        session_id: SessionId,
    },

    /// Frame kind this gateway does not care about (`webrtcup`, `media`,
    /// `slowlink` and friends).
    #[serde(other)]
    Other,
}

impl Incoming {
    /// Returns the correlation nonce of this frame, if it carries one.
    #[must_use]
    pub fn transaction(&self) -> Option<&str> {
        match self {
            Self::Success { transaction, .. }
            | Self::Ack { transaction }
            | Self::Event { transaction, .. }
            | Self::Error { transaction, .. } => transaction.as_deref(),
            _ => None,
        }
    }

    /// Indicates whether this frame is an intermediate acknowledgement.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack { .. })
    }
}

/// `data` payload of `create`/`attach` replies.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct CreatedId {
    /// The minted identifier.
    pub id: u64,
}

/// Plugin-level payload of a reply or event.
#[derive(Clone, Debug, Deserialize)]
pub struct PluginData {
    /// Plugin that produced the payload.
    #[serde(default)]
    pub plugin: String,

    /// The payload itself.
    #[serde(default)]
    pub data: Value,
}

impl PluginData {
    /// Extracts a plugin-level error description, if the payload carries
    /// one.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.data.get("error").and_then(Value::as_str).map(|e| {
            match self.data.get("error_code").and_then(Value::as_i64) {
                Some(code) => format!("{} (code {})", e, code),
                None => e.to_owned(),
            }
        })
    }

    /// Extracts the publisher id assigned by the room, if present.
    #[must_use]
    pub fn publisher(&self) -> Option<PublisherId> {
        self.data
            .get("id")
            .and_then(Value::as_u64)
            .map(PublisherId)
    }
}

/// `error` payload of failure replies.
#[derive(Clone, Debug, Deserialize, Display)]
#[display(fmt = "{} (code {})", reason, code)]
pub struct ErrorInfo {
    /// Numeric failure code.
    #[serde(default)]
    pub code: i64,

    /// Human-readable cause.
    #[serde(default)]
    pub reason: String,
}
