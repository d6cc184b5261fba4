//! Resolver group configuration.
//!
//! A group is one logical upstream: a comma separated, ordered fallback list
//! of name servers (`1.1.1.1,8.8.8.8`). Servers without a port use 53.

use std::net::{IpAddr, SocketAddr};

use crate::error::ConfigError;
use crate::resolver::Tier;

/// Port used for name servers given without one.
pub const DNS_PORT: u16 = 53;

/// Groups used when none are configured, both normal tier.
pub const DEFAULT_RESOLVERS: [&str; 2] = ["1.1.1.1", "8.8.8.8"];

/// One configured upstream resolver group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverGroup {
    /// The group as written on the command line, used as its label.
    pub name: String,
    pub servers: Vec<SocketAddr>,
    pub tier: Tier,
}

impl ResolverGroup {
    /// Parse a comma separated fallback list such as `1.1.1.1,[2606:4700::1111]:53`.
    pub fn parse(group: &str, tier: Tier) -> Result<Self, ConfigError> {
        let servers = group
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_server)
            .collect::<Result<Vec<_>, _>>()?;

        if servers.is_empty() {
            return Err(ConfigError::EmptyGroup);
        }

        Ok(Self {
            name: group.trim().to_string(),
            servers,
            tier,
        })
    }
}

/// Parse `IP`, `IP:PORT` or `[IPv6]:PORT`.
pub fn parse_server(server: &str) -> Result<SocketAddr, ConfigError> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }

    server
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ConfigError::InvalidServer(server.to_string()))
}

/// Build the resolver groups, normal tier first.
///
/// With nothing configured, falls back to [`DEFAULT_RESOLVERS`].
pub fn resolver_groups(normal: &[String], low: &[String]) -> Result<Vec<ResolverGroup>, ConfigError> {
    if normal.is_empty() && low.is_empty() {
        return DEFAULT_RESOLVERS
            .iter()
            .map(|group| ResolverGroup::parse(group, Tier::Normal))
            .collect();
    }

    normal
        .iter()
        .map(|group| ResolverGroup::parse(group, Tier::Normal))
        .chain(low.iter().map(|group| ResolverGroup::parse(group, Tier::Low)))
        .collect()
}
