//! DNS proxy orchestration.
//!
//! A [`Proxy`] owns exactly one listener and the response cache. For each
//! inbound query it checks the cache, falls back to the upstream on a miss,
//! fills the cache with positive answers and writes the reply. A query that
//! cannot be resolved gets no reply at all, leaving the client to retry.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use hickory_proto::op::Message;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::Network;
use crate::dns::{self, Fingerprint};
use crate::error::{Error, Result};
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::Transport;
use crate::upstream::{DohClient, Upstream};

/// Lifecycle of a proxy's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unstarted,
    Binding,
    Running(SocketAddr),
    Failed,
}

impl ListenerState {
    /// Bound address while running.
    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            ListenerState::Running(addr) => Some(*addr),
            _ => None,
        }
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Cache,
    Upstream,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Source::Cache => "cached",
            Source::Upstream => "forwarded",
        }
    }
}

pub struct Proxy {
    upstream: Arc<dyn Upstream>,
    cache: ResponseCache,
    stats: Stats,
    listener: watch::Sender<ListenerState>,
}

impl Proxy {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        let (listener, _) = watch::channel(ListenerState::Unstarted);

        Self {
            upstream,
            cache: ResponseCache::new(),
            stats: Stats::new(),
            listener,
        }
    }

    /// Proxy forwarding to a DoH endpoint.
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(DohClient::new(endpoint)?)))
    }

    /// Listen on `127.0.0.1:<port>` (0 = any free port) and serve until a
    /// fatal listener error.
    ///
    /// Fails with [`Error::ListenerExists`] if this proxy was already
    /// started, and with [`Error::Bind`] if the socket cannot be bound. A
    /// failure to resolve an individual query never ends the listener.
    pub async fn serve(self: Arc<Self>, port: u16, network: Network) -> Result<()> {
        self.serve_on(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), network)
            .await
    }

    /// Like [`Proxy::serve`], on an explicit local address.
    pub async fn serve_on(self: Arc<Self>, addr: SocketAddr, network: Network) -> Result<()> {
        let claimed = self.listener.send_if_modified(|state| {
            if *state == ListenerState::Unstarted {
                *state = ListenerState::Binding;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::ListenerExists);
        }

        let bound = match Transport::bind(addr, network).await {
            Ok(transport) => transport.local_addr().map(|local| (transport, local)),
            Err(e) => Err(e),
        };
        let (transport, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.listener.send_replace(ListenerState::Failed);
                return Err(Error::Bind {
                    addr,
                    network,
                    source,
                });
            }
        };

        self.listener
            .send_replace(ListenerState::Running(local_addr));
        info!(
            %local_addr,
            %network,
            upstream = self.upstream.endpoint(),
            "DNS proxy listening"
        );

        let result = transport.run(self.clone()).await;
        self.listener.send_replace(ListenerState::Failed);

        result.map_err(|source| Error::Listener { network, source })
    }

    /// Current listener state.
    pub fn state(&self) -> ListenerState {
        *self.listener.borrow()
    }

    /// Bound address once the listener is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().addr()
    }

    /// Watch the listener state, e.g. to learn an ephemeral port.
    pub fn watch_listener(&self) -> watch::Receiver<ListenerState> {
        self.listener.subscribe()
    }

    /// Answer `query` from the cache or the upstream.
    ///
    /// The returned response always carries the query's ID. Only responses
    /// with at least one answer record are cached.
    pub async fn resolve(&self, query: &Message) -> Result<Message> {
        self.lookup(query).await.map(|(response, _)| response)
    }

    async fn lookup(&self, query: &Message) -> Result<(Message, Source)> {
        let fingerprint = Fingerprint::of(query)?;

        if let Some(mut cached) = self.cache.get(&fingerprint) {
            cached.set_id(query.id());
            return Ok((cached, Source::Cache));
        }

        // No lock is held here; concurrent misses may each reach the upstream.
        let mut response = self.upstream.exchange(query).await?;
        response.set_id(query.id());

        if dns::is_cacheable(&response) {
            self.cache.put(fingerprint, response.clone());
        }

        Ok((response, Source::Upstream))
    }

    /// Process one raw inbound query and produce the raw reply, if any.
    pub(crate) async fn handle(&self, packet: &[u8], network: Network) -> Option<Vec<u8>> {
        let start = Instant::now();

        let query = match Message::from_vec(packet) {
            Ok(query) => query,
            Err(e) => {
                debug!(%network, error = %e, "Dropping malformed query");
                return None;
            }
        };
        if dns::is_response(&query) {
            debug!(%network, id = query.id(), "Dropping unsolicited response");
            return None;
        }

        let domain = dns::domain(&query);
        let (response, source) = match self.lookup(&query).await {
            Ok(answered) => answered,
            Err(e) => {
                self.stats.record_failed(start.elapsed());
                warn!(%network, %domain, error = %e, "Failed to resolve query, not replying");
                return None;
            }
        };

        let elapsed = start.elapsed();
        match source {
            Source::Cache => self.stats.record_cached(elapsed),
            Source::Upstream => self.stats.record_forwarded(elapsed),
        }
        debug!(
            %network,
            %domain,
            outcome = source.as_str(),
            answers = response.answers().len(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Answered query"
        );

        let encoded = match network {
            Network::Udp => dns::encode_for_udp(&query, &response),
            Network::Tcp => response.to_vec().map_err(Error::from),
        };
        match encoded {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(%network, %domain, error = %e, "Failed to encode response");
                None
            }
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }

    pub fn upstream_endpoint(&self) -> &str {
        self.upstream.endpoint()
    }
}
