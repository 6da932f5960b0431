//! HTTP server settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// HTTP server settings.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Server {
    /// IP address to bind HTTP server to.
    ///
    /// Defaults to `0.0.0.0`.
    #[default(IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_ip: IpAddr,

    /// Port to bind HTTP server to.
    ///
    /// Defaults to `8080`.
    #[default(8080)]
    pub bind_port: u16,
}

impl Server {
    /// Builds [`SocketAddr`] from `bind_ip` and `bind_port`.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        (self.bind_ip, self.bind_port).into()
    }
}
