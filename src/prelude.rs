//! Re-exports of the scoped logging macros used across the crate.

pub use slog_scope::{debug, error, info, warn};
