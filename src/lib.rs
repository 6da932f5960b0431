//! WHIP gateway: accepts [WHIP] ingest sessions over HTTP and forwards
//! them to a Janus-style media server over its WebSocket RPC.
//!
//! The gateway never touches media itself: the backend owns every
//! PeerConnection and room, while this process owns the HTTP signalling
//! surface, the endpoint registry and the per-endpoint ingest state
//! machines.
//!
//! [WHIP]: https://tools.ietf.org/html/rfc9725

#![allow(clippy::module_name_repetitions)]
#![forbid(non_ascii_idents)]

pub mod api;
pub mod auth;
pub mod backend;
pub mod conf;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod ingest;
pub mod log;
pub mod prelude;
pub mod sdp;
pub mod utils;

pub use crate::{
    api::AppContext,
    backend::{BackendClient, MediaBackend},
    conf::Conf,
    endpoint::Endpoints,
    errors::GatewayError,
    events::{Events, GatewayEvent},
    ingest::IngestController,
};
