//! Packet builders and a scripted upstream shared by the unit tests.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rustc_hash::FxHashMap;

use crate::dns::DnsMessage;
use crate::error::UpstreamError;
use crate::resolver::Exchange;

fn push_name(packet: &mut Vec<u8>, name: &str) {
    if !name.is_empty() {
        for label in name.split('.') {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
    }
    packet.push(0x00);
}

/// A recursive client query for `name`.
pub(crate) fn query_packet(id: u16, name: &str, qtype: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(64);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // Flags: standard query, RD
    packet.extend_from_slice(&[0x00, 0x01]); // Questions: 1
    packet.extend_from_slice(&[0x00; 6]);
    push_name(&mut packet, name);
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x01]); // Class: IN
    packet
}

/// An upstream reply to an A query for `name` with one record per address.
pub(crate) fn response_packet(id: u16, name: &str, rcode: u8, addrs: &[[u8; 4]]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(64 + addrs.len() * 16);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.push(0x81); // Response, RD
    packet.push(0x80 | rcode); // RA
    packet.extend_from_slice(&[0x00, 0x01]);
    packet.extend_from_slice(&(addrs.len() as u16).to_be_bytes());
    packet.extend_from_slice(&[0x00; 4]);
    push_name(&mut packet, name);
    packet.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);

    for addr in addrs {
        packet.extend_from_slice(&[0xC0, 0x0C]); // Name pointer
        packet.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        packet.extend_from_slice(&300u32.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x04]);
        packet.extend_from_slice(addr);
    }
    packet
}

/// A positive answer carrying `addr`.
pub(crate) fn positive(addr: [u8; 4]) -> DnsMessage {
    DnsMessage::parse_response(response_packet(1, "example.com", 0, &[addr]))
        .expect("valid test response")
}

/// An NXDOMAIN answer.
pub(crate) fn nxdomain() -> DnsMessage {
    DnsMessage::parse_response(response_packet(1, "example.com", 3, &[]))
        .expect("valid test response")
}

/// Loopback name server address number `n`.
pub(crate) fn server(n: u8) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, n], 53))
}

/// What a scripted name server does once its delay has passed.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Reply(Vec<u8>),
    Fail,
    Hang,
}

/// An [`Exchange`] answering from a per-server script.
#[derive(Default)]
pub(crate) struct MockExchange {
    script: FxHashMap<SocketAddr, (Duration, Scripted)>,
    calls: Mutex<Vec<SocketAddr>>,
}

impl MockExchange {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, server: SocketAddr, delay: Duration, outcome: Scripted) -> Self {
        self.script.insert(server, (delay, outcome));
        self
    }

    /// Servers contacted so far, in order.
    pub(crate) fn calls(&self) -> Vec<SocketAddr> {
        self.calls.lock().unwrap().clone()
    }
}

impl Exchange for MockExchange {
    fn exchange<'a>(
        &'a self,
        _query: &'a [u8],
        server: SocketAddr,
    ) -> BoxFuture<'a, Result<Vec<u8>, UpstreamError>> {
        self.calls.lock().unwrap().push(server);
        let step = self.script.get(&server).cloned();

        async move {
            let refused = || UpstreamError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
            let Some((delay, outcome)) = step else {
                return Err(refused());
            };

            tokio::time::sleep(delay).await;
            match outcome {
                Scripted::Reply(bytes) => Ok(bytes),
                Scripted::Fail => Err(refused()),
                Scripted::Hang => std::future::pending().await,
            }
        }
        .boxed()
    }
}
