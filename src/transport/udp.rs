//! UDP transport for DNS queries.
//!
//! Each well formed datagram becomes one race, handled in its own task so a
//! slow upstream never holds up the next client.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::dns::DnsQuery;
use crate::handler::ProxyHandler;

use super::MAX_DNS_PACKET_SIZE;

/// UDP transport for the DNS proxy.
///
/// One socket both receives client queries and carries the answers back.
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

    /// The socket answers are sent from.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// Start the receive loop in a background task.
    ///
    /// The task only ends on a socket error that retrying cannot fix.
    pub fn start(self, handler: Arc<ProxyHandler<UdpSocket>>) -> JoinHandle<io::Result<()>> {
        tokio::spawn(run(self.socket, handler))
    }
}

/// Receive loop: decode each datagram and race it in a new task.
async fn run(socket: Arc<UdpSocket>, handler: Arc<ProxyHandler<UdpSocket>>) -> io::Result<()> {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
            Err(e) => {
                error!(error = %e, "UDP socket failed");
                return Err(e);
            }
        };

        let query = match DnsQuery::parse(&buf[..len]) {
            Ok(query) => query,
            Err(e) => {
                debug!(client = %src, bytes = len, error = %e, "Dropping malformed query");
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            handler.handle(query, src).await;
        });
    }
}

/// Errors a UDP socket reports for a single datagram, such as an ICMP
/// unreachable for an earlier send. The socket itself is still usable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
