//! Transport layer for the DNS proxy.
//!
//! Receives client queries over UDP and sends the chosen answers back.

pub mod udp;

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Where answers to clients go.
pub trait ReplySink: Send + Sync + 'static {
    fn send_reply(
        &self,
        reply: &[u8],
        client: SocketAddr,
    ) -> impl Future<Output = io::Result<()>> + Send;
}

impl ReplySink for UdpSocket {
    async fn send_reply(&self, reply: &[u8], client: SocketAddr) -> io::Result<()> {
        self.send_to(reply, client).await.map(|_| ())
    }
}
