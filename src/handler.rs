//! Per-query fan-out to every upstream resolver.
//!
//! One call to [`ProxyHandler::handle`] drives one race: every resolver is
//! queried at once and outcomes are fed to the query's [`RaceCoordinator`]
//! in arrival order from this single task, so the race state needs no lock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, warn};

use crate::dns::DnsQuery;
use crate::race::{RaceCoordinator, Selection};
use crate::resolver::UpstreamResolver;
use crate::stats::Stats;
use crate::transport::ReplySink;

/// Races client queries across the configured upstream resolvers.
pub struct ProxyHandler<S> {
    resolvers: Arc<[Arc<UpstreamResolver>]>,
    sink: Arc<S>,
    stats: Arc<Stats>,
}

impl<S: ReplySink> ProxyHandler<S> {
    pub fn new(resolvers: Arc<[Arc<UpstreamResolver>]>, sink: Arc<S>, stats: Arc<Stats>) -> Self {
        Self {
            resolvers,
            sink,
            stats,
        }
    }

    pub fn resolvers(&self) -> &[Arc<UpstreamResolver>] {
        &self.resolvers
    }

    /// Race `query` across every resolver and answer `client` at most once.
    ///
    /// Returns once every resolver has reported, so late outcomes still
    /// update resolver health after the answer has gone out.
    pub async fn handle(&self, query: DnsQuery, client: SocketAddr) {
        let start = Instant::now();
        let question = query.question();
        self.stats.record_request();
        debug!(client = %client, question = %question, class = query.qclass, "Received query");

        let mut pending: FuturesUnordered<_> = self
            .resolvers
            .iter()
            .enumerate()
            .map(|(index, resolver)| {
                let question = &question;
                async move { (index, resolver.query(question).await) }
            })
            .collect();

        let mut race = RaceCoordinator::new(&self.resolvers);

        while let Some((index, outcome)) = pending.next().await {
            if let Err(e) = &outcome {
                self.stats.record_upstream_failure();
                debug!(
                    resolver = %self.resolvers[index].name(),
                    question = %question,
                    error = %e,
                    "Upstream query failed"
                );
            }

            if let Some(selection) = race.process_outcome(index, outcome) {
                self.send(&query, client, selection, start).await;
            }
        }

        if !race.is_sent() {
            self.stats.record_dropped();
            debug!(client = %client, question = %question, "No usable answer, dropping query");
        }
    }

    async fn send(&self, query: &DnsQuery, client: SocketAddr, selection: Selection, start: Instant) {
        let reply = selection.message.reply_to(query);

        debug!(
            client = %client,
            resolver = %self.resolvers[selection.resolver].name(),
            kind = ?selection.kind,
            rcode = %selection.message.response_code(),
            answers = selection.message.answer_count(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Answering"
        );

        if let Err(e) = self.sink.send_reply(&reply, client).await {
            warn!(client = %client, error = %e, "Failed to send answer");
            return;
        }
        self.stats.record_answered(selection.kind, start.elapsed());
    }
}
