//! WHIP protocol surface settings.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// WHIP protocol surface settings.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Whip {
    /// Path under which WHIP endpoints and resources are served.
    ///
    /// Defaults to `/whip`.
    #[default(String::from("/whip"))]
    pub base_path: String,

    /// Indicator whether `PATCH` trickle/restart requests are served.
    ///
    /// When disabled, any `PATCH` is answered with `405 Method Not Allowed`.
    ///
    /// Defaults to `true`.
    #[default(true)]
    pub trickle: bool,

    /// Indicator whether `If-Match` preconditions are enforced.
    ///
    /// When disabled, `If-Match` values are accepted as-is and never cause
    /// `412 Precondition Failed`.
    ///
    /// Defaults to `false`.
    #[default(false)]
    pub strict_etags: bool,
}
