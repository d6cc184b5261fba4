//! Per-query race between upstream resolvers.
//!
//! One [`RaceCoordinator`] exists per client query. Each resolver's outcome
//! is fed in as it arrives; the coordinator updates that resolver's shared
//! health flag and decides, at most once, which answer goes back.
//!
//! Preference order:
//! 1. The first positive answer from a normal tier resolver, immediately.
//! 2. The first positive answer from a low tier resolver, once every
//!    responding normal tier resolver has reported.
//! 3. The first NXDOMAIN, once every responding resolver has reported.
//!
//! "Responding" is read live. A resolver that just failed a concurrent query
//! stops holding this race up, even if its answer to this query is still on
//! the way.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::dns::DnsMessage;
use crate::error::UpstreamError;
use crate::resolver::{Tier, UpstreamResolver};

/// Why an answer was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// Positive answer from a normal tier resolver.
    Primary,
    /// Positive answer from a low tier resolver.
    LowPriority,
    NxDomain,
}

/// The answer to send back, and where it came from.
#[derive(Debug)]
pub struct Selection {
    pub kind: SelectionKind,
    /// Index of the resolver in the race's resolver slice.
    pub resolver: usize,
    pub message: DnsMessage,
}

#[derive(Debug)]
struct Candidate {
    resolver: usize,
    message: DnsMessage,
}

/// Race state for a single client query.
#[derive(Debug)]
pub struct RaceCoordinator<'a> {
    resolvers: &'a [Arc<UpstreamResolver>],
    received: FxHashSet<usize>,
    sent: bool,
    nx_response: Option<Candidate>,
    low_priority_response: Option<Candidate>,
}

impl<'a> RaceCoordinator<'a> {
    pub fn new(resolvers: &'a [Arc<UpstreamResolver>]) -> Self {
        Self {
            resolvers,
            received: FxHashSet::default(),
            sent: false,
            nx_response: None,
            low_priority_response: None,
        }
    }

    /// Record the outcome of resolver `index` and return the answer to send,
    /// if this outcome settles the race.
    ///
    /// Returns `Some` at most once per coordinator. A second outcome from the
    /// same resolver, or an unknown index, is ignored.
    pub fn process_outcome(
        &mut self,
        index: usize,
        outcome: Result<DnsMessage, UpstreamError>,
    ) -> Option<Selection> {
        let resolvers = self.resolvers;
        let resolver = resolvers.get(index)?;
        if !self.received.insert(index) {
            return None;
        }

        let message = match outcome {
            Ok(message) => message,
            Err(_) => {
                resolver.mark_unhealthy();
                if !self.sent && self.all_reported(None) {
                    return self.flush();
                }
                return None;
            }
        };

        resolver.mark_healthy();
        if self.sent {
            return None;
        }

        let candidate = Candidate {
            resolver: index,
            message,
        };
        if candidate.message.is_nxdomain() {
            if self.nx_response.is_none() {
                self.nx_response = Some(candidate);
            }
        } else if resolver.is_low_priority() {
            if self.low_priority_response.is_none() {
                self.low_priority_response = Some(candidate);
            }
        } else {
            return Some(self.select(SelectionKind::Primary, candidate));
        }

        if !self.all_reported(Some(Tier::Normal)) {
            return None;
        }
        if let Some(candidate) = self.low_priority_response.take() {
            return Some(self.select(SelectionKind::LowPriority, candidate));
        }
        if self.all_reported(Some(Tier::Low)) {
            let candidate = self.nx_response.take()?;
            return Some(self.select(SelectionKind::NxDomain, candidate));
        }
        None
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    /// Whether every currently responding resolver of `tier` (any tier for
    /// `None`) has reported.
    fn all_reported(&self, tier: Option<Tier>) -> bool {
        self.resolvers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_responding() && tier.is_none_or(|t| r.tier() == t))
            .all(|(index, _)| self.received.contains(&index))
    }

    /// Send the best buffered candidate, if any.
    fn flush(&mut self) -> Option<Selection> {
        if let Some(candidate) = self.low_priority_response.take() {
            return Some(self.select(SelectionKind::LowPriority, candidate));
        }
        let candidate = self.nx_response.take()?;
        Some(self.select(SelectionKind::NxDomain, candidate))
    }

    fn select(&mut self, kind: SelectionKind, candidate: Candidate) -> Selection {
        self.sent = true;
        Selection {
            kind,
            resolver: candidate.resolver,
            message: candidate.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{nxdomain, positive, server};
    use std::time::Duration;

    fn resolvers(tiers: &[Tier]) -> Vec<Arc<UpstreamResolver>> {
        tiers
            .iter()
            .enumerate()
            .map(|(i, tier)| {
                Arc::new(UpstreamResolver::new(
                    format!("r{}", i),
                    vec![server(i as u8 + 1)],
                    *tier,
                ))
            })
            .collect()
    }

    fn timeout() -> Result<DnsMessage, UpstreamError> {
        Err(UpstreamError::Timeout(Duration::from_secs(10)))
    }

    fn answer(addr: [u8; 4]) -> Result<DnsMessage, UpstreamError> {
        Ok(positive(addr))
    }

    fn nx() -> Result<DnsMessage, UpstreamError> {
        Ok(nxdomain())
    }

    #[test]
    fn first_normal_answer_wins_and_later_ones_are_discarded() {
        let rs = resolvers(&[Tier::Normal, Tier::Normal]);
        let mut race = RaceCoordinator::new(&rs);

        let sent = race.process_outcome(0, answer([10, 0, 0, 1])).unwrap();
        assert_eq!(sent.kind, SelectionKind::Primary);
        assert_eq!(sent.resolver, 0);
        assert_eq!(sent.message.as_bytes(), positive([10, 0, 0, 1]).as_bytes());

        assert!(race.process_outcome(1, answer([10, 0, 0, 2])).is_none());
        assert!(race.is_sent());
        assert_eq!(race.received_count(), 2);
    }

    #[test]
    fn low_answer_beats_normal_nxdomain() {
        let rs = resolvers(&[Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(0, nx()).is_none());
        let sent = race.process_outcome(1, answer([10, 0, 0, 2])).unwrap();

        assert_eq!(sent.kind, SelectionKind::LowPriority);
        assert_eq!(sent.resolver, 1);
    }

    #[test]
    fn low_answer_waits_for_normal_tier() {
        let rs = resolvers(&[Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(1, answer([10, 0, 0, 2])).is_none());
        let sent = race.process_outcome(0, nx()).unwrap();

        assert_eq!(sent.kind, SelectionKind::LowPriority);
        assert_eq!(sent.resolver, 1);
    }

    #[test]
    fn nxdomain_sent_when_normal_times_out_and_low_says_nxdomain() {
        let rs = resolvers(&[Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(0, timeout()).is_none());
        let sent = race.process_outcome(1, nx()).unwrap();

        assert_eq!(sent.kind, SelectionKind::NxDomain);
        assert_eq!(sent.resolver, 1);
    }

    #[test]
    fn nxdomain_flushed_by_last_failure() {
        let rs = resolvers(&[Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(1, nx()).is_none());
        let sent = race.process_outcome(0, timeout()).unwrap();

        assert_eq!(sent.kind, SelectionKind::NxDomain);
        assert_eq!(sent.resolver, 1);
    }

    #[test]
    fn single_resolver_timeout_sends_nothing() {
        let rs = resolvers(&[Tier::Normal]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(0, timeout()).is_none());
        assert!(!race.is_sent());
        assert!(!rs[0].is_responding());
    }

    #[test]
    fn first_seen_nxdomain_is_sent_after_all_report() {
        let rs = resolvers(&[Tier::Normal, Tier::Normal]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(1, nx()).is_none());
        let sent = race.process_outcome(0, nx()).unwrap();

        assert_eq!(sent.kind, SelectionKind::NxDomain);
        assert_eq!(sent.resolver, 1);
    }

    #[test]
    fn normal_answer_preempts_buffered_candidates() {
        let rs = resolvers(&[Tier::Normal, Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(2, answer([10, 0, 0, 3])).is_none());
        assert!(race.process_outcome(0, nx()).is_none());
        let sent = race.process_outcome(1, answer([10, 0, 0, 2])).unwrap();

        assert_eq!(sent.kind, SelectionKind::Primary);
        assert_eq!(sent.resolver, 1);
    }

    #[test]
    fn nxdomain_waits_for_pending_low_tier() {
        let rs = resolvers(&[Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(0, nx()).is_none());
        assert!(!race.is_sent());
    }

    #[test]
    fn low_answer_flushed_when_normal_tier_fails() {
        let rs = resolvers(&[Tier::Normal, Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(2, answer([10, 0, 0, 3])).is_none());
        assert!(race.process_outcome(0, timeout()).is_none());
        let sent = race.process_outcome(1, timeout()).unwrap();

        assert_eq!(sent.kind, SelectionKind::LowPriority);
        assert_eq!(sent.resolver, 2);
    }

    #[test]
    fn only_first_low_answer_is_kept() {
        let rs = resolvers(&[Tier::Normal, Tier::Low, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(2, answer([10, 0, 0, 3])).is_none());
        assert!(race.process_outcome(1, answer([10, 0, 0, 2])).is_none());
        let sent = race.process_outcome(0, timeout()).unwrap();

        assert_eq!(sent.resolver, 2);
    }

    #[test]
    fn every_failure_sends_nothing() {
        let rs = resolvers(&[Tier::Normal, Tier::Normal, Tier::Low]);
        let mut race = RaceCoordinator::new(&rs);

        for index in 0..rs.len() {
            assert!(race.process_outcome(index, timeout()).is_none());
        }
        assert!(!race.is_sent());
        assert!(rs.iter().all(|r| !r.is_responding()));
    }

    #[test]
    fn duplicate_and_unknown_reports_are_ignored() {
        let rs = resolvers(&[Tier::Normal, Tier::Normal]);
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(0, nx()).is_none());
        assert!(race.process_outcome(0, nx()).is_none());
        assert!(race.process_outcome(7, answer([10, 0, 0, 7])).is_none());
        assert_eq!(race.received_count(), 1);
        assert!(!race.is_sent());
    }

    #[test]
    fn outcomes_flip_health_even_after_sending() {
        let rs = resolvers(&[Tier::Normal, Tier::Normal, Tier::Low]);
        rs[2].mark_unhealthy();
        let mut race = RaceCoordinator::new(&rs);

        assert!(race.process_outcome(0, answer([10, 0, 0, 1])).is_some());
        assert!(race.process_outcome(1, timeout()).is_none());
        assert!(race.process_outcome(2, answer([10, 0, 0, 3])).is_none());

        assert!(rs[0].is_responding());
        assert!(!rs[1].is_responding());
        assert!(rs[2].is_responding());
    }

    #[test]
    fn at_most_one_answer_in_any_arrival_order() {
        let outcomes: [fn() -> Result<DnsMessage, UpstreamError>; 4] = [
            || answer([10, 0, 0, 1]),
            nx,
            timeout,
            || answer([10, 0, 0, 4]),
        ];
        let tiers = [Tier::Normal, Tier::Normal, Tier::Low, Tier::Low];

        for order in permutations(&[0, 1, 2, 3]) {
            let rs = resolvers(&tiers);
            let mut race = RaceCoordinator::new(&rs);

            let sent: Vec<_> = order
                .iter()
                .filter_map(|&i| race.process_outcome(i, outcomes[i]()))
                .collect();

            assert_eq!(sent.len(), 1, "order {:?}", order);
            // The only normal positive answer always wins.
            assert_eq!(sent[0].kind, SelectionKind::Primary, "order {:?}", order);
            assert_eq!(sent[0].resolver, 0, "order {:?}", order);
        }
    }

    #[test]
    fn known_race_failure_in_another_query_releases_this_one() {
        // Accepted behavior: health is shared across concurrent races, so a
        // resolver failing one query stops another from waiting on it.
        let rs = resolvers(&[Tier::Normal, Tier::Normal]);
        let mut first = RaceCoordinator::new(&rs);
        let mut second = RaceCoordinator::new(&rs);

        assert!(second.process_outcome(1, timeout()).is_none());
        let sent = first.process_outcome(0, nx()).unwrap();
        assert_eq!(sent.kind, SelectionKind::NxDomain);

        // Resolver 1 does answer the first query, too late.
        assert!(first.process_outcome(1, answer([10, 0, 0, 2])).is_none());
        assert!(rs[1].is_responding());
    }

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for (i, &first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                all.push(tail);
            }
        }
        all
    }
}
