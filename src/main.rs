use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dns_escape::config::{DEFAULT_PORT, GOOGLE_DOH, Network};
use dns_escape::{Proxy, Result};

#[derive(Parser)]
#[command(name = "dns-escape")]
#[command(about = "Local DNS proxy forwarding every query over DNS-over-HTTPS", long_about = None)]
struct Args {
    /// Local port to listen on (0 picks a free port)
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Listener transport (udp or tcp)
    #[arg(short, long, default_value = "udp")]
    network: Network,

    /// Upstream DoH endpoint
    #[arg(short, long, default_value = GOOGLE_DOH)]
    upstream: String,
}

async fn run(args: Args) -> Result<()> {
    let proxy = Arc::new(Proxy::with_endpoint(&args.upstream)?);

    // Log stats every minute
    let reporter = proxy.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let stats = reporter.stats_snapshot_and_reset();
            info!(
                cache = reporter.cache_len(),
                requests = stats.requests,
                cached = stats.cached,
                forwarded = stats.forwarded,
                failed = stats.failed,
                avg_response_ms = %format!("{:.2}", stats.avg_response_ms),
                "stats"
            );
        }
    });

    proxy
        .serve_on(SocketAddr::new(args.bind, args.port), args.network)
        .await
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "DNS proxy stopped");
            ExitCode::FAILURE
        }
    }
}
