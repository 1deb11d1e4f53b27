//! Proxy configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Cloudflare's public DoH endpoint.
pub const CLOUDFLARE_DOH: &str = "https://cloudflare-dns.com/dns-query";

/// Google's public DoH endpoint.
pub const GOOGLE_DOH: &str = "https://dns.google/dns-query";

/// Port used when none is configured. `0` asks the OS for any free port.
pub const DEFAULT_PORT: u16 = 12332;

/// Transport the local listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Udp,
    Tcp,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Udp => "udp",
            Network::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Network::Udp),
            "tcp" => Ok(Network::Tcp),
            _ => Err(Error::UnknownNetwork(s.to_string())),
        }
    }
}

/// Everything needed to start a proxy and build a resolver for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Upstream DoH endpoint, fixed for the lifetime of the proxy.
    pub remote_endpoint: String,
    /// Local port to listen on (0 = any free port).
    pub port: u16,
    /// Local listener transport.
    pub network: Network,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            remote_endpoint: GOOGLE_DOH.to_string(),
            port: DEFAULT_PORT,
            network: Network::Udp,
        }
    }
}
