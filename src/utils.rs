//! Helpers shared across the crate.

use rand::{distributions::Alphanumeric, Rng as _};

/// Length of opaque identifiers minted by the gateway (resource ids, ETags,
/// backend transaction ids).
pub const NONCE_LEN: usize = 16;

/// Generates a random alphanumeric string of [`NONCE_LEN`] characters.
#[must_use]
pub fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}
