//! Transport layer implementations for the DNS proxy.
//!
//! Provides the UDP and TCP listeners that receive DNS queries from local
//! clients and hand each one to the [`Proxy`] on its own task.

pub mod tcp;
pub mod udp;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Network;
use crate::proxy::Proxy;

use tcp::TcpTransport;
use udp::UdpTransport;

/// Maximum size of a DNS packet over UDP (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// A bound listener of either kind.
pub enum Transport {
    Udp(UdpTransport),
    Tcp(TcpTransport),
}

impl Transport {
    pub async fn bind(addr: SocketAddr, network: Network) -> io::Result<Self> {
        Ok(match network {
            Network::Udp => Transport::Udp(UdpTransport::bind(addr).await?),
            Network::Tcp => Transport::Tcp(TcpTransport::bind(addr).await?),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Udp(udp) => udp.local_addr(),
            Transport::Tcp(tcp) => tcp.local_addr(),
        }
    }

    /// Serve queries until a non-transient socket error occurs.
    pub async fn run(self, proxy: Arc<Proxy>) -> io::Result<()> {
        match self {
            Transport::Udp(udp) => udp.run(proxy).await,
            Transport::Tcp(tcp) => tcp.run(proxy).await,
        }
    }
}

/// Socket errors that affect a single peer rather than the listener.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
    )
}
