//! UDP transport for DNS queries.
//!
//! Every datagram is one exchange. The receive loop never waits on a
//! resolution: each query is answered from its own task, which sends the
//! reply back to the datagram's source or drops it on failure.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::warn;

use crate::config::Network;
use crate::dns::HEADER_LEN;
use crate::proxy::Proxy;

use super::{MAX_DNS_PACKET_SIZE, is_transient};

/// UDP listener for the DNS proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Returns only on a non-transient socket error.
    pub async fn run(self, proxy: Arc<Proxy>) -> io::Result<()> {
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "UDP recv error");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if len < HEADER_LEN {
                continue;
            }

            let query = buf[..len].to_vec();
            let socket = self.socket.clone();
            let proxy = proxy.clone();

            tokio::spawn(async move {
                let Some(reply) = proxy.handle(&query, Network::Udp).await else {
                    return;
                };
                if let Err(e) = socket.send_to(&reply, src).await {
                    warn!(%src, error = %e, "UDP response error");
                }
            });
        }
    }
}
