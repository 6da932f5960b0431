//! Media backend connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Media backend connection settings.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Backend {
    /// URL of the media backend WebSocket API.
    ///
    /// Defaults to `ws://127.0.0.1:8188/`.
    #[default(String::from("ws://127.0.0.1:8188/"))]
    pub url: String,

    /// Name of the backend plugin which owns publishing rooms.
    ///
    /// Defaults to `janus.plugin.videoroom`.
    #[default(String::from("janus.plugin.videoroom"))]
    pub plugin: String,

    /// Interval between keep-alive messages on the backend session.
    ///
    /// Defaults to `15s`.
    #[default(Duration::from_secs(15))]
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Maximum duration to await a backend response to a single request.
    ///
    /// Defaults to `30s`.
    #[default(Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Delay before the first reconnection attempt after the backend
    /// connection is lost.
    ///
    /// Defaults to `500ms`.
    #[default(Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub reconnect_initial_delay: Duration,

    /// Multiplier applied to the reconnection delay after every failed
    /// attempt. `1.0` gives a fixed backoff.
    ///
    /// Defaults to `2.0`.
    #[default(2.0)]
    pub reconnect_multiplier: f64,

    /// Ceiling for the reconnection delay.
    ///
    /// Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub reconnect_max_delay: Duration,
}

impl Backend {
    /// Returns the reconnection delay following the provided one.
    #[must_use]
    pub fn next_reconnect_delay(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.reconnect_multiplier.max(1.0))
            .min(self.reconnect_max_delay)
    }
}
