//! Connection to the media backend owning the WebRTC side of every ingest.

pub mod client;
pub mod proto;

use async_trait::async_trait;
use derive_more::Display;

use crate::sdp::Candidate;

use self::proto::{ForwardParams, HandleId, JoinParams, PublisherId};

pub use self::client::BackendClient;

/// Failures of backend requests.
#[derive(Clone, Debug, Display)]
pub enum BackendError {
    /// No live backend connection to serve the request with.
    #[display(fmt = "backend is not connected")]
    NotConnected,

    /// A connect attempt is already in flight, or the connection is
    /// already established.
    #[display(fmt = "backend connect already in progress")]
    AlreadyConnected,

    /// The connection went away while the request was in flight.
    #[display(fmt = "backend connection lost")]
    Disconnected,

    /// The backend did not answer within the configured request timeout.
    #[display(fmt = "backend request timed out")]
    RequestTimeout,

    /// Transport-level failure.
    #[display(fmt = "backend transport failure: {}", _0)]
    Transport(String),

    /// The backend answered with an error.
    #[display(fmt = "backend rejected request: {} (code {})", reason, code)]
    Rejected {
        /// Numeric failure code reported by the backend.
        code: i64,
        /// Human-readable cause.
        reason: String,
    },

    /// The backend answered with a frame this gateway cannot interpret as
    /// a reply.
    #[display(fmt = "unexpected backend reply")]
    UnexpectedReply,
}

/// Notification pushed by the backend connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendEvent {
    /// The backend spontaneously closed a plugin handle (the remote
    /// PeerConnection is gone).
    HandleClosed(HandleId),

    /// The backend connection was lost.
    Disconnected,
}

/// Successful outcome of a publish negotiation on the backend.
#[derive(Clone, Debug)]
pub struct PublishReply {
    /// SDP answer produced by the backend.
    pub answer: String,

    /// Publisher id assigned by the room, when the backend reported one.
    pub publisher: Option<PublisherId>,
}

/// Seam between the ingest controller and the media backend.
///
/// The production implementation is [`BackendClient`]; tests supply their
/// own. All request methods may suspend on the wire; none of them blocks
/// operations against other plugin handles.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Indicates whether a live backend session exists right now.
    fn is_connected(&self) -> bool;

    /// Creates a plugin handle bound to the backend session.
    async fn attach(&self) -> Result<HandleId, BackendError>;

    /// Joins a room as a publisher and submits the SDP offer, returning
    /// the backend's answer.
    async fn join_and_configure(
        &self,
        handle: HandleId,
        params: JoinParams,
        offer: String,
    ) -> Result<PublishReply, BackendError>;

    /// Resubmits a rewritten offer on an established publish (ICE
    /// restart), returning the new answer.
    async fn reconfigure(
        &self,
        handle: HandleId,
        offer: String,
    ) -> Result<String, BackendError>;

    /// Delivers trickled ICE candidates to the handle. Fire-and-forget:
    /// transport-level failure is the only possible error.
    async fn trickle(
        &self,
        handle: HandleId,
        candidates: Vec<Candidate>,
    ) -> Result<(), BackendError>;

    /// Starts a plain-RTP forward of the publish behind the handle.
    async fn forward_rtp(
        &self,
        handle: HandleId,
        params: ForwardParams,
    ) -> Result<(), BackendError>;

    /// Tears the plugin handle down. Idempotent: a handle that is already
    /// gone (or a connection that is) is not an error.
    async fn detach(&self, handle: HandleId) -> Result<(), BackendError>;
}
