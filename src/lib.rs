//! dns-racer - A DNS proxy racing tiered upstream resolvers.
//!
//! Every client query is sent to all configured upstreams at once. The first
//! positive answer from a normal tier upstream wins; low tier answers and
//! NXDOMAIN are held back until the upstreams that could beat them have
//! reported.

pub mod config;
pub mod dns;
pub mod error;
pub mod handler;
pub mod logging;
pub mod proxy;
pub mod race;
pub mod resolver;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testing;
