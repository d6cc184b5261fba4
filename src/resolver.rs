//! Upstream resolvers.
//!
//! An [`UpstreamResolver`] is one logical upstream: an ordered list of name
//! servers tried in turn, a priority tier fixed at startup, and a health
//! flag shared by every race that uses it.
//!
//! The resolver never updates its own health. Races observe query outcomes
//! and call [`UpstreamResolver::mark_healthy`] or
//! [`UpstreamResolver::mark_unhealthy`].

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::config::ResolverGroup;
use crate::dns::{DnsMessage, Question, is_reply_to};
use crate::error::UpstreamError;
use crate::transport::MAX_DNS_PACKET_SIZE;

/// Budget for one upstream query across all of its name servers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Priority tier of an upstream resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Normal,
    Low,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Normal => f.write_str("normal"),
            Tier::Low => f.write_str("low"),
        }
    }
}

/// Sends one encoded query to one name server.
///
/// Boxed so resolvers can hold any implementation behind a trait object.
pub trait Exchange: Send + Sync {
    /// Send `query` to `server` and return the first response carrying the
    /// same transaction id. No timeout is applied here.
    fn exchange<'a>(
        &'a self,
        query: &'a [u8],
        server: SocketAddr,
    ) -> BoxFuture<'a, Result<Vec<u8>, UpstreamError>>;
}

/// Plain DNS over UDP, one ephemeral socket per exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpExchange;

impl Exchange for UdpExchange {
    fn exchange<'a>(
        &'a self,
        query: &'a [u8],
        server: SocketAddr,
    ) -> BoxFuture<'a, Result<Vec<u8>, UpstreamError>> {
        async move {
            let bind_addr: SocketAddr = if server.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };

            let socket = UdpSocket::bind(bind_addr).await?;
            // A connected socket only receives datagrams from `server`.
            socket.connect(server).await?;
            socket.send(query).await?;

            let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
            loop {
                let len = socket.recv(&mut buf).await?;
                if is_reply_to(&buf[..len], query) {
                    buf.truncate(len);
                    return Ok(buf);
                }
            }
        }
        .boxed()
    }
}

/// One logical upstream resolver.
pub struct UpstreamResolver {
    name: String,
    servers: Vec<SocketAddr>,
    tier: Tier,
    timeout: Duration,
    responding: AtomicBool,
    exchange: Arc<dyn Exchange>,
}

impl UpstreamResolver {
    /// Create a UDP resolver with the default timeout. Starts out responding.
    pub fn new(name: impl Into<String>, servers: Vec<SocketAddr>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            servers,
            tier,
            timeout: DEFAULT_TIMEOUT,
            responding: AtomicBool::new(true),
            exchange: Arc::new(UdpExchange),
        }
    }

    pub fn from_group(group: &ResolverGroup, timeout: Duration) -> Self {
        Self::new(group.name.clone(), group.servers.clone(), group.tier).with_timeout(timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_exchange(mut self, exchange: Arc<dyn Exchange>) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn is_low_priority(&self) -> bool {
        self.tier == Tier::Low
    }

    pub fn is_responding(&self) -> bool {
        self.responding.load(Ordering::Acquire)
    }

    pub fn mark_healthy(&self) {
        if !self.responding.swap(true, Ordering::AcqRel) {
            debug!(resolver = %self.name, "Upstream responding");
        }
    }

    pub fn mark_unhealthy(&self) {
        if self.responding.swap(false, Ordering::AcqRel) {
            debug!(resolver = %self.name, "Upstream not responding");
        }
    }

    /// Resolve `question`, trying each name server in order.
    ///
    /// Each server gets an equal share of the timeout. The first well formed
    /// reply wins, whatever its response code; otherwise the last server's
    /// error is returned.
    pub async fn query(&self, question: &Question) -> Result<DnsMessage, UpstreamError> {
        if self.servers.is_empty() {
            return Err(UpstreamError::NoServers);
        }

        let packet = question.to_query(rand::random());
        let attempt_timeout = self.timeout / self.servers.len() as u32;
        let mut last_error = UpstreamError::NoServers;

        for server in &self.servers {
            let attempt =
                tokio::time::timeout(attempt_timeout, self.exchange.exchange(&packet, *server));

            let result = match attempt.await {
                Ok(Ok(reply)) => DnsMessage::parse_response(reply).map_err(UpstreamError::from),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(UpstreamError::Timeout(attempt_timeout)),
            };

            match result {
                Ok(message) => return Ok(message),
                Err(e) => {
                    debug!(
                        resolver = %self.name,
                        server = %server,
                        question = %question,
                        error = %e,
                        "Name server failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

impl fmt::Debug for UpstreamResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResolver")
            .field("name", &self.name)
            .field("servers", &self.servers)
            .field("tier", &self.tier)
            .field("timeout", &self.timeout)
            .field("responding", &self.is_responding())
            .finish()
    }
}
