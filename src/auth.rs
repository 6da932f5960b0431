//! Bearer-token authorization gate for WHIP endpoints.

use std::{fmt, sync::Arc};

use subtle::ConstantTimeEq as _;

/// Authorization credential of an endpoint.
///
/// Either a literal token compared verbatim, or an arbitrary predicate
/// receiving the presented token. Only literal tokens can be configured via
/// the administrative API; predicates are for embedding this crate as a
/// library.
#[derive(Clone)]
pub enum Token {
    /// Literal token, compared in constant time.
    Static(String),

    /// Caller-supplied validation predicate.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Token {
    /// Wraps the provided closure into a [`Token::Predicate`].
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Checks whether the presented bearer token is acceptable.
    #[must_use]
    pub fn accepts(&self, presented: &str) -> bool {
        match self {
            Self::Static(expected) => expected
                .as_bytes()
                .ct_eq(presented.as_bytes())
                .into(),
            Self::Predicate(f) => f(presented),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Token::Static(..)"),
            Self::Predicate(_) => f.write_str("Token::Predicate(..)"),
        }
    }
}

/// Verifies the `Authorization` header of a request against the endpoint's
/// [`Token`].
///
/// Succeeds iff the endpoint has no token configured, or the header carries
/// a `Bearer ` credential accepted by the token.
#[must_use]
pub fn authorize(token: Option<&Token>, header: Option<&str>) -> bool {
    let token = match token {
        Some(token) => token,
        None => return true,
    };
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map_or(false, |presented| token.accepts(presented))
}
