//! Resolver handle and the factory that starts a proxy behind it.
//!
//! A [`ResolverHandle`] never talks to the host's configured nameservers:
//! every lookup it performs is sent to the local proxy listener, which
//! forwards it over DoH. Plug it into an HTTP client with
//! [`ResolverHandle::http_client`] or any `reqwest::ClientBuilder` through
//! its [`reqwest::dns::Resolve`] implementation.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::config::{Network, ProxyConfig};
use crate::dns;
use crate::error::{Error, Result};
use crate::lifetime::{Ending, Lifetime};
use crate::proxy::{ListenerState, Proxy};
use crate::transport::tcp::{read_dns_message, write_dns_message};

/// How long a dial may wait for the local listener.
pub const DIAL_TIMEOUT: Duration = Duration::from_millis(300);

/// How long a single exchange may wait for the proxy's reply.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram a reply can arrive in.
const MAX_UDP_REPLY: usize = u16::MAX as usize;

/// Client-facing handle that resolves names through the local proxy.
#[derive(Debug, Clone)]
pub struct ResolverHandle {
    network: Network,
    listener: watch::Receiver<ListenerState>,
    dial_timeout: Duration,
}

/// An open connection to the local proxy.
pub enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Connection {
    /// Send one wire-format query and read its reply.
    pub async fn exchange(&mut self, query: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Connection::Udp(socket) => {
                socket.send(query).await?;
                let mut buf = vec![0u8; MAX_UDP_REPLY];
                loop {
                    let len = socket.recv(&mut buf).await?;
                    // Skip stray datagrams for other transaction IDs.
                    if len >= 2 && query.len() >= 2 && buf[..2] == query[..2] {
                        buf.truncate(len);
                        return Ok(buf);
                    }
                }
            }
            Connection::Tcp(stream) => {
                write_dns_message(stream, query).await?;
                read_dns_message(stream).await
            }
        }
    }
}

impl ResolverHandle {
    /// Handle dialing `proxy`'s listener, whenever it comes up.
    pub fn for_proxy(proxy: &Proxy, network: Network) -> Self {
        Self {
            network,
            listener: proxy.watch_listener(),
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    /// Lookups made through this handle always go to the proxy.
    pub fn prefer_proxy(&self) -> bool {
        true
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Connect to the local listener.
    ///
    /// Whatever destination a caller had in mind, this connects to the
    /// proxy's port on loopback. Waiting for the listener to bind counts
    /// against the dial timeout.
    pub async fn dial(&self) -> Result<Connection> {
        timeout(self.dial_timeout, self.connect())
            .await
            .map_err(|_| Error::DialTimeout)?
    }

    async fn connect(&self) -> Result<Connection> {
        let mut listener = self.listener.clone();
        let bound = {
            let state = listener
                .wait_for(|s| !matches!(s, ListenerState::Unstarted | ListenerState::Binding))
                .await
                .map_err(|_| Error::ListenerUnavailable)?;
            state.addr().ok_or(Error::ListenerUnavailable)?
        };
        let target = SocketAddr::new(loopback_for(bound.ip()), bound.port());

        match self.network {
            Network::Udp => {
                let local: SocketAddr = if target.is_ipv4() {
                    (Ipv4Addr::LOCALHOST, 0).into()
                } else {
                    (Ipv6Addr::LOCALHOST, 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(target).await?;
                Ok(Connection::Udp(socket))
            }
            Network::Tcp => Ok(Connection::Tcp(TcpStream::connect(target).await?)),
        }
    }

    /// Send `query` to the proxy and wait for its reply.
    pub async fn exchange(&self, query: &Message) -> Result<Message> {
        let mut connection = self.dial().await?;
        let wire = query.to_vec()?;

        let reply = timeout(EXCHANGE_TIMEOUT, connection.exchange(&wire))
            .await
            .map_err(|_| Error::NoReply)??;

        Ok(Message::from_vec(&reply)?)
    }

    /// Resolve `host` to its IPv4 and IPv6 addresses, IPv4 first.
    pub async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let v4 = dns::build_query(host, RecordType::A)?;
        let v6 = dns::build_query(host, RecordType::AAAA)?;
        let (v4, v6) = futures::future::join(self.exchange(&v4), self.exchange(&v6)).await;

        let mut addrs = Vec::new();
        let mut answered = false;
        let mut failure = None;
        for result in [v4, v6] {
            match result {
                Ok(response) => {
                    answered = true;
                    addrs.extend(dns::addresses(&response));
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        debug!(host, addrs = addrs.len(), "Lookup through DNS proxy");

        match (addrs.is_empty(), answered, failure) {
            (false, _, _) => Ok(addrs),
            (true, false, Some(e)) => Err(e),
            _ => Err(Error::NoAddresses(host.to_string())),
        }
    }

    /// HTTP client whose hostname lookups all go through the proxy.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .dns_resolver(Arc::new(self.clone()))
            .build()
            .map_err(Error::Client)
    }
}

impl Resolve for ResolverHandle {
    fn resolve(&self, name: Name) -> Resolving {
        let handle = self.clone();
        Box::pin(async move {
            let ips = handle.lookup_ip(name.as_str()).await?;
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

fn loopback_for(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        other => other,
    }
}

/// Start a DoH proxy in the background and return a handle dialing it.
///
/// Never blocks and never fails: an unusable endpoint, a bind failure, a
/// fatal listener error or the end of `lifetime` terminates the process.
/// Must be called from within a tokio runtime.
pub fn resolver(
    lifetime: Lifetime,
    port: u16,
    network: Network,
    remote_endpoint: &str,
) -> ResolverHandle {
    let proxy = match Proxy::with_endpoint(remote_endpoint) {
        Ok(proxy) => Arc::new(proxy),
        Err(e) => fail_stop(&e),
    };
    resolver_with_proxy(lifetime, proxy, port, network)
}

/// Like [`resolver`], for a proxy built around any upstream.
pub fn resolver_with_proxy(
    lifetime: Lifetime,
    proxy: Arc<Proxy>,
    port: u16,
    network: Network,
) -> ResolverHandle {
    let handle = ResolverHandle::for_proxy(&proxy, network);

    tokio::spawn(async move {
        if let Err(e) = proxy.serve(port, network).await {
            fail_stop(&e);
        }
    });

    tokio::spawn(async move {
        let reason = match lifetime.ended().await {
            Ending::Cancelled => "resolver lifetime cancelled".to_string(),
            Ending::Failed(reason) => format!("resolver lifetime ended: {reason}"),
        };
        fail_stop(&reason);
    });

    handle
}

/// Explicit installation entry point for a process's startup sequence.
pub fn init(lifetime: Lifetime, config: &ProxyConfig) -> ResolverHandle {
    resolver(
        lifetime,
        config.port,
        config.network,
        &config.remote_endpoint,
    )
}

fn fail_stop(reason: &dyn fmt::Display) -> ! {
    error!(%reason, "DNS proxy cannot continue, terminating process");
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GOOGLE_DOH;
    use crate::testing::{Behavior, MockUpstream};
    use std::process::{Command, Stdio};
    use std::time::Instant;

    /// Set when a test binary is re-run to execute a terminating scenario.
    const IN_CHILD: &str = "DNS_ESCAPE_EXIT_CHILD";

    fn in_child() -> bool {
        std::env::var_os(IN_CHILD).is_some()
    }

    /// Re-run a single test of this binary as a child and return its exit code.
    fn child_exit_code(test: &str) -> Option<i32> {
        Command::new(std::env::current_exe().unwrap())
            .args([test, "--exact", "--test-threads=1"])
            .env(IN_CHILD, "1")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap()
            .code()
    }

    /// Keep the runtime alive long enough for a background task to exit.
    async fn linger() {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    const ANSWER_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 9);

    fn started(behavior: Behavior, network: Network) -> (ResolverHandle, Arc<Proxy>) {
        let proxy = Arc::new(Proxy::new(Arc::new(MockUpstream::new(behavior))));
        let handle = resolver_with_proxy(Lifetime::background(), proxy.clone(), 0, network);
        (handle, proxy)
    }

    #[tokio::test]
    async fn handle_defaults() {
        let (handle, _) = started(Behavior::Answer(ANSWER_IP), Network::Tcp);

        assert!(handle.prefer_proxy());
        assert_eq!(handle.network(), Network::Tcp);
        assert_eq!(handle.dial_timeout(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn lookup_discovers_ephemeral_port() {
        for network in [Network::Udp, Network::Tcp] {
            let (handle, proxy) = started(Behavior::Answer(ANSWER_IP), network);

            let ips = handle.lookup_ip("example.com").await.unwrap();

            assert_eq!(ips, vec![IpAddr::V4(ANSWER_IP)]);
            assert_ne!(proxy.local_addr().unwrap().port(), 0);
            // Only the A answer is cached; the empty AAAA reply is not.
            assert_eq!(proxy.cache_len(), 1);
        }
    }

    #[tokio::test]
    async fn lookup_returns_ip_literals_without_dialing() {
        let proxy = Proxy::new(Arc::new(MockUpstream::new(Behavior::Fail)));
        let handle = ResolverHandle::for_proxy(&proxy, Network::Udp);

        assert_eq!(
            handle.lookup_ip("::1").await.unwrap(),
            vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]
        );
    }

    #[tokio::test]
    async fn lookup_reports_missing_addresses() {
        let (handle, _) = started(Behavior::NxDomain, Network::Udp);

        let err = handle.lookup_ip("jasdfasdflk.com").await.unwrap_err();

        assert!(matches!(err, Error::NoAddresses(host) if host == "jasdfasdflk.com"));
    }

    #[tokio::test]
    async fn tcp_lookup_fails_when_proxy_does_not_reply() {
        let (handle, _) = started(Behavior::Fail, Network::Tcp);

        assert!(handle.lookup_ip("example.com").await.is_err());
    }

    #[tokio::test]
    async fn dial_times_out_when_listener_never_starts() {
        let proxy = Proxy::new(Arc::new(MockUpstream::new(Behavior::Fail)));
        let handle = ResolverHandle::for_proxy(&proxy, Network::Udp);
        let start = Instant::now();

        let err = handle.dial().await.err().unwrap();

        assert!(matches!(err, Error::DialTimeout));
        assert!(start.elapsed() >= DIAL_TIMEOUT);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn dial_reports_failed_listener() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let proxy = Arc::new(Proxy::new(Arc::new(MockUpstream::new(Behavior::Fail))));
        let handle = ResolverHandle::for_proxy(&proxy, Network::Udp);

        assert!(proxy.clone().serve(port, Network::Udp).await.is_err());
        let err = handle.dial().await.err().unwrap();

        assert!(matches!(err, Error::ListenerUnavailable));
    }

    #[tokio::test]
    async fn udp_handle_reads_truncated_replies() {
        let (handle, _) = started(Behavior::Flood(401), Network::Udp);
        let query = dns::build_query("example.com", RecordType::A).unwrap();

        let reply = handle.exchange(&query).await.unwrap();

        assert!(reply.truncated());
        assert_eq!(reply.id(), query.id());
    }

    #[tokio::test]
    async fn large_answer_sets_pass_within_payload_and_over_tcp() {
        for (network, count) in [(Network::Udp, 200), (Network::Tcp, 401)] {
            let (handle, _) = started(Behavior::Flood(count), network);
            let query = dns::build_query("example.com", RecordType::A).unwrap();

            let reply = handle.exchange(&query).await.unwrap();

            assert!(!reply.truncated(), "{network}");
            assert_eq!(reply.answers().len(), count, "{network}");
        }
    }

    #[tokio::test]
    async fn bind_failure_terminates_process() {
        if in_child() {
            let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let port = taken.local_addr().unwrap().port();
            let _handle = resolver(Lifetime::background(), port, Network::Udp, GOOGLE_DOH);
            linger().await;
            return;
        }

        assert_eq!(
            child_exit_code("resolver::tests::bind_failure_terminates_process"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn unusable_endpoint_terminates_process() {
        if in_child() {
            let _handle = resolver(
                Lifetime::background(),
                0,
                Network::Udp,
                "ftp://dns.example/dns-query",
            );
            linger().await;
            return;
        }

        assert_eq!(
            child_exit_code("resolver::tests::unusable_endpoint_terminates_process"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn failed_lifetime_terminates_process() {
        if in_child() {
            let (owner, lifetime) = Lifetime::channel();
            let proxy = Arc::new(Proxy::new(Arc::new(MockUpstream::new(Behavior::Answer(
                ANSWER_IP,
            )))));
            let _handle = resolver_with_proxy(lifetime, proxy, 0, Network::Udp);
            owner.fail("deadline exceeded");
            linger().await;
            return;
        }

        assert_eq!(
            child_exit_code("resolver::tests::failed_lifetime_terminates_process"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn cancelled_lifetime_terminates_process() {
        if in_child() {
            let (owner, lifetime) = Lifetime::channel();
            let proxy = Arc::new(Proxy::new(Arc::new(MockUpstream::new(Behavior::Answer(
                ANSWER_IP,
            )))));
            let _handle = resolver_with_proxy(lifetime, proxy, 0, Network::Udp);
            owner.cancel();
            linger().await;
            return;
        }

        assert_eq!(
            child_exit_code("resolver::tests::cancelled_lifetime_terminates_process"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn untouched_lifetime_keeps_serving() {
        let (owner, lifetime) = Lifetime::channel();
        let proxy = Arc::new(Proxy::new(Arc::new(MockUpstream::new(Behavior::Answer(
            ANSWER_IP,
        )))));
        let handle = resolver_with_proxy(lifetime, proxy, 0, Network::Udp);

        assert_eq!(
            handle.lookup_ip("example.com").await.unwrap(),
            vec![IpAddr::V4(ANSWER_IP)]
        );
        drop(owner);
    }

    #[tokio::test]
    async fn reqwest_resolver_yields_socket_addrs() {
        let (handle, _) = started(Behavior::Answer(ANSWER_IP), Network::Udp);

        let name: Name = "example.com".parse().unwrap();
        let addrs: Vec<SocketAddr> = handle.resolve(name).await.unwrap().collect();

        assert_eq!(addrs, vec![SocketAddr::new(IpAddr::V4(ANSWER_IP), 0)]);
    }

    #[test]
    fn http_client_builds() {
        let proxy = Proxy::new(Arc::new(MockUpstream::new(Behavior::Fail)));
        let handle = ResolverHandle::for_proxy(&proxy, Network::Udp);

        assert!(handle.http_client().is_ok());
    }

    #[test]
    fn unspecified_bind_dials_loopback() {
        assert_eq!(
            loopback_for(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            loopback_for(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        );
        assert_eq!(
            loopback_for(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
