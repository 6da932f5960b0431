//! Gateway-wide error kinds surfaced by the core components.

use failure::Fail;

use crate::backend::BackendError;

/// Request-scoped failures of the gateway core.
///
/// Variants are semantic: the HTTP layer owns the mapping to status codes.
#[derive(Debug, Fail)]
pub enum GatewayError {
    /// Referenced endpoint or resource does not exist.
    #[fail(display = "unknown endpoint or resource")]
    NotFound,

    /// Endpoint already has a publisher (or a publish is in flight).
    #[fail(display = "endpoint is already in use")]
    InUse,

    /// Endpoint id is already taken by another endpoint.
    #[fail(display = "endpoint id is already taken")]
    IdTaken,

    /// Bearer-token authorization rejected the request.
    #[fail(display = "authorization rejected")]
    Unauthorized,

    /// Request body is not of the expected media type.
    #[fail(display = "unsupported media type")]
    UnsupportedMedia,

    /// `If-Match` precondition failed under strict ETag checking.
    #[fail(display = "If-Match precondition failed")]
    PreconditionFailed,

    /// Media backend has no live connection.
    #[fail(display = "media backend is unavailable")]
    BackendUnavailable,

    /// Media backend failed to serve the request.
    #[fail(display = "media backend error: {}", _0)]
    Backend(String),

    /// Malformed request argument.
    #[fail(display = "invalid argument: {}", _0)]
    InvalidArgument(String),
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotConnected => Self::BackendUnavailable,
            other => Self::Backend(other.to_string()),
        }
    }
}
