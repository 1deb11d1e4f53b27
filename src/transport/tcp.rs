//! TCP transport for DNS queries.
//!
//! TCP DNS messages are prefixed with a 2-byte big-endian length. Each
//! connection carries one query; the reply is written back and the
//! connection closed. When resolution fails the connection is closed
//! without a reply.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::config::Network;
use crate::proxy::Proxy;

use super::is_transient;

/// TCP listener for the DNS proxy.
///
/// Each connection is handled in a separate task.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a TCP listener for the transport.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Returns only on a non-transient accept error.
    pub async fn run(self, proxy: Arc<Proxy>) -> io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((client, peer)) => {
                    tokio::spawn(handle_connection(client, peer, proxy.clone()));
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "TCP accept error");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Handle a single TCP connection: read query, resolve, return response.
async fn handle_connection(mut client: TcpStream, peer: SocketAddr, proxy: Arc<Proxy>) {
    let query = match read_dns_message(&mut client).await {
        Ok(q) => q,
        Err(e) => {
            debug!(%peer, error = %e, "TCP read error");
            return;
        }
    };

    let Some(reply) = proxy.handle(&query, Network::Tcp).await else {
        return;
    };

    if let Err(e) = write_dns_message(&mut client, &reply).await {
        warn!(%peer, error = %e, "TCP response error");
    }
}

/// Read one length-prefixed DNS message, without the prefix.
pub(crate) async fn read_dns_message<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write one DNS message with its length prefix.
pub(crate) async fn write_dns_message<S>(stream: &mut S, message: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u16::try_from(message.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "DNS message exceeds 65535 bytes")
    })?;

    let mut framed = Vec::with_capacity(2 + message.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    stream.write_all(&framed).await?;
    stream.flush().await
}
