//! DNS proxy orchestration.
//!
//! Builds the upstream resolvers, binds the transport and runs the proxy
//! until interrupted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::ResolverGroup;
use crate::handler::ProxyHandler;
use crate::resolver::UpstreamResolver;
use crate::stats::Stats;
use crate::transport::udp::UdpTransport;

/// Configuration for the DNS proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address to bind (e.g., 0.0.0.0:53)
    pub bind_addr: SocketAddr,
    /// Upstream resolver groups, all raced for every query
    pub resolvers: Vec<ResolverGroup>,
    /// Budget for one upstream query
    pub upstream_timeout: Duration,
    /// How often to log stats, `None` to never
    pub stats_interval: Option<Duration>,
}

/// Create one shared resolver per configured group, in order.
pub fn build_resolvers(config: &ProxyConfig) -> Arc<[Arc<UpstreamResolver>]> {
    config
        .resolvers
        .iter()
        .map(|group| Arc::new(UpstreamResolver::from_group(group, config.upstream_timeout)))
        .collect()
}

/// Run the DNS proxy with the given configuration.
///
/// Returns on Ctrl-C, or with an error if the socket cannot be bound or
/// fails while serving.
pub async fn run(config: ProxyConfig) -> io::Result<()> {
    let resolvers = build_resolvers(&config);
    let stats = Arc::new(Stats::new());

    let udp = UdpTransport::bind(config.bind_addr).await?;
    info!(listen = %udp.local_addr()?, "DNS proxy listening");
    for resolver in resolvers.iter() {
        info!(
            resolver = %resolver.name(),
            tier = %resolver.tier(),
            servers = ?resolver.servers(),
            timeout = ?config.upstream_timeout,
            "Racing upstream"
        );
    }

    let handler = Arc::new(ProxyHandler::new(resolvers, udp.socket(), Arc::clone(&stats)));
    let server = udp.start(handler);

    if let Some(period) = config.stats_interval {
        tokio::spawn(report_stats(stats, period));
    }

    tokio::select! {
        result = server => result.map_err(io::Error::other)?,
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down");
            Ok(())
        }
    }
}

async fn report_stats(stats: Arc<Stats>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let snapshot = stats.snapshot_and_reset();
        info!(
            uptime_secs = snapshot.uptime_secs,
            requests = snapshot.requests,
            answered = snapshot.answered,
            low_priority = snapshot.low_priority,
            nxdomain = snapshot.nxdomain,
            dropped = snapshot.dropped,
            upstream_failures = snapshot.upstream_failures,
            avg_response_ms = snapshot.avg_response_ms,
            "Stats"
        );
    }
}
