//! Error types for the DNS proxy.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::Network;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving or resolving.
#[derive(Debug, Error)]
pub enum Error {
    /// `serve` was called on a proxy that already owns a listener.
    #[error("listener already exists")]
    ListenerExists,

    /// The local socket could not be bound.
    #[error("failed to bind {network} listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        network: Network,
        #[source]
        source: io::Error,
    },

    /// The listener hit a non-recoverable socket error after binding.
    #[error("{network} listener failed: {source}")]
    Listener {
        network: Network,
        #[source]
        source: io::Error,
    },

    /// The upstream DoH endpoint is not a usable URL.
    #[error("invalid DoH endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The HTTP client could not be constructed.
    #[error("error creating a client: {0}")]
    Client(#[source] reqwest::Error),

    /// The DoH request failed on the wire.
    #[error("error resolving DNS query: {0}")]
    Transport(#[from] reqwest::Error),

    /// The DoH server answered with a non-success status.
    #[error("DoH server returned HTTP {0}")]
    UpstreamStatus(reqwest::StatusCode),

    /// The DoH server answered with something other than a DNS message.
    #[error("unsupported DoH content type: {0}")]
    ContentType(String),

    /// A DNS message could not be encoded or decoded.
    #[error("malformed DNS message: {0}")]
    Message(#[from] hickory_proto::ProtoError),

    /// The local listener did not become reachable within the dial timeout.
    #[error("timed out dialing local DNS proxy")]
    DialTimeout,

    /// The local listener failed to start and will never accept lookups.
    #[error("local DNS proxy is not available")]
    ListenerUnavailable,

    /// The proxy did not answer a lookup in time.
    #[error("no reply from local DNS proxy")]
    NoReply,

    /// A lookup succeeded but carried no usable addresses.
    #[error("no addresses found for {0}")]
    NoAddresses(String),

    /// A network name other than `udp` or `tcp`.
    #[error("unknown network {0:?}, expected \"udp\" or \"tcp\"")]
    UnknownNetwork(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
