//! dns-escape - a local DNS-over-HTTPS forwarding proxy.
//!
//! Lookups made through a [`ResolverHandle`] go to a local UDP or TCP
//! listener, which answers from its cache or forwards the query to a DoH
//! endpoint, independent of the host's configured nameservers.

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod lifetime;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use config::{CLOUDFLARE_DOH, GOOGLE_DOH, Network, ProxyConfig};
pub use error::{Error, Result};
pub use lifetime::{Lifetime, LifetimeOwner};
pub use proxy::Proxy;
pub use resolver::{ResolverHandle, init, resolver};
pub use upstream::{DohClient, Upstream};
