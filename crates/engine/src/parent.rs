//! Parent-selection engine (C3): walks the tree from the root, probing
//! candidates nominated by `TRY` and descending to the best one whose
//! stretch is acceptable.

use std::time::Instant;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use codec::Addr;

use crate::ping::{PingTable, Resolved};

/// A candidate is only worth attaching to if its path stretches the
/// direct-to-root latency by less than this factor.
pub const MAX_STRETCH: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting on the root's reply to the initial `PING`/`CHILDREN`.
    Bootstrap,
    /// A `TRY` with at least one candidate arrived; probes are outstanding.
    AwaitingRound,
    /// `ATTACH` was sent; waiting on `ATTACH_SUC`.
    AwaitingAttachAck,
    /// Attached to `parent` at the current level.
    Attached,
}

/// What the caller (the owning peer) must do in response to engine input.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send `PING` to each of these freshly nominated candidates.
    ProbePeers(Vec<Addr>),
    /// Descend: send `CHILDREN` to this address, the new best candidate.
    SendChildren { to: Addr },
    /// Finalize attachment at the current level: send `ATTACH` to this address.
    Attach { to: Addr },
}

pub struct ParentSelector {
    root: Addr,
    parent: Addr,
    phase: Phase,
    root_ping_ms: Option<f64>,
    candidate_stack: Vec<usize>,
    candidate_set: HashSet<usize>,
    stretches: HashMap<usize, f64>,
    round_pending: usize,
    depth: u32,
}

impl ParentSelector {
    pub fn new(root: Addr) -> Self {
        Self {
            root,
            parent: root,
            phase: Phase::Bootstrap,
            root_ping_ms: None,
            candidate_stack: Vec::new(),
            candidate_set: HashSet::new(),
            stretches: HashMap::new(),
            round_pending: 0,
            depth: 0,
        }
    }

    pub fn parent(&self) -> Addr {
        self.parent
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn root_ping_ms(&self) -> Option<f64> {
        self.root_ping_ms
    }

    /// Records the bootstrap probe to the root at ping index 0. The caller
    /// still owns actually sending `PING` and `CHILDREN` to `self.root`.
    pub fn bootstrap(&mut self, ping_table: &mut PingTable, now: Instant) {
        ping_table.record_sent(self.root, now);
    }

    /// Handles an inbound `TRY` naming `addresses`, from `sender`.
    ///
    /// A round with zero candidates means the sender itself is the final
    /// parent. Otherwise every named address becomes a probed candidate for
    /// this round, replacing whatever round was previously in flight.
    pub fn on_try(&mut self, sender: Addr, addresses: &[Addr], ping_table: &mut PingTable, now: Instant) -> Action {
        self.depth += 1;

        if addresses.is_empty() {
            self.parent = sender;
            self.phase = Phase::AwaitingAttachAck;
            return Action::Attach { to: sender };
        }

        self.candidate_stack.clear();
        self.candidate_set.clear();
        self.stretches.clear();
        self.round_pending = addresses.len();
        self.phase = Phase::AwaitingRound;

        let mut probes = Vec::with_capacity(addresses.len());
        for &addr in addresses {
            let idx = ping_table.record_sent(addr, now);
            self.candidate_stack.push(idx);
            self.candidate_set.insert(idx);
            probes.push(addr);
        }

        Action::ProbePeers(probes)
    }

    /// Handles an inbound `PINGRESPONSE`. Returns an [`Action`] once this
    /// response completes the in-flight round (`round_pending` reaches 0).
    pub fn on_ping_response(
        &mut self,
        source: Addr,
        ping_to_root: f64,
        is_root: bool,
        ping_table: &mut PingTable,
        now: Instant,
    ) -> Option<Action> {
        let resolved = ping_table.resolve(source, is_root, now)?;

        if is_root && resolved.index == 0 && self.root_ping_ms.is_none() {
            self.root_ping_ms = Some(ms(resolved.rtt.as_secs_f64()));
        }

        if !self.candidate_set.contains(&resolved.index) {
            return None;
        }

        if let Some(root_ping) = self.root_ping_ms {
            let stretch = (ms(resolved.rtt.as_secs_f64()) + ping_to_root) / root_ping;
            self.stretches.insert(resolved.index, stretch);
        }

        self.candidate_set.remove(&resolved.index);
        self.round_pending = self.round_pending.saturating_sub(1);

        if self.round_pending == 0 && !is_root {
            return Some(self.evaluate_round(ping_table));
        }

        None
    }

    /// Pops every candidate from the stack and keeps the minimum-stretch
    /// one under [`MAX_STRETCH`], if any qualifies.
    fn evaluate_round(&mut self, ping_table: &PingTable) -> Action {
        let mut best: Option<(Addr, f64)> = None;

        while let Some(idx) = self.candidate_stack.pop() {
            let Some(&stretch) = self.stretches.get(&idx) else {
                continue; // never resolved within the round
            };

            if stretch >= MAX_STRETCH {
                continue;
            }

            if best.is_none_or(|(_, best_stretch)| stretch < best_stretch) {
                if let Some(addr) = ping_table.dest_at(idx) {
                    best = Some((addr, stretch));
                }
            }
        }

        self.stretches.clear();

        match best {
            Some((addr, stretch)) => {
                log::debug!("descending to candidate {addr} (stretch {stretch:.2})");
                self.parent = addr;
                self.phase = Phase::AwaitingRound;
                Action::SendChildren { to: addr }
            }
            None => {
                log::debug!("no acceptable candidate this round, attaching at current level to {}", self.parent);
                self.phase = Phase::AwaitingAttachAck;
                Action::Attach { to: self.parent }
            }
        }
    }

    /// Handles `ATTACH_SUC`. Idempotent: a late confirmation after descent
    /// already set `parent` to the same address is a no-op.
    pub fn on_attach_success(&mut self, sender: Addr) {
        self.parent = sender;
        self.phase = Phase::Attached;
    }

    /// Resets all round-local and attach-local state after a `REATTACH`,
    /// restarting the bootstrap from the root.
    pub fn reset(&mut self) {
        self.parent = self.root;
        self.phase = Phase::Bootstrap;
        self.root_ping_ms = None;
        self.candidate_stack.clear();
        self.candidate_set.clear();
        self.stretches.clear();
        self.round_pending = 0;
        self.depth = 0;
    }
}

fn ms(seconds: f64) -> f64 {
    seconds * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(s: &str) -> Addr {
        s.parse().unwrap()
    }

    fn bootstrapped(root: Addr) -> (ParentSelector, PingTable) {
        let mut selector = ParentSelector::new(root);
        let mut table = PingTable::new();
        let now = Instant::now();
        selector.bootstrap(&mut table, now);
        selector.on_ping_response(root, 0.0, true, &mut table, now + Duration::from_millis(10));
        (selector, table)
    }

    #[test]
    fn zero_address_try_finalizes_attachment_at_the_sender() {
        let root = addr("10.0.0.1:9");
        let (mut selector, mut table) = bootstrapped(root);

        let action = selector.on_try(root, &[], &mut table, Instant::now());
        assert_eq!(action, Action::Attach { to: root });
        assert_eq!(selector.parent(), root);
    }

    #[test]
    fn descends_to_the_best_acceptable_candidate() {
        let root = addr("10.0.0.1:9");
        let candidate_a = addr("10.0.0.2:9");
        let (mut selector, mut table) = bootstrapped(root);
        assert!(selector.root_ping_ms().is_some());

        let now = Instant::now();
        let action = selector.on_try(root, &[candidate_a], &mut table, now);
        assert_eq!(action, Action::ProbePeers(vec![candidate_a]));

        let resolved_action = selector.on_ping_response(candidate_a, 5.0, false, &mut table, now + Duration::from_millis(5));
        assert_eq!(resolved_action, Some(Action::SendChildren { to: candidate_a }));
        assert_eq!(selector.parent(), candidate_a);
    }

    #[test]
    fn falls_back_to_attach_at_current_level_when_no_candidate_is_acceptable() {
        let root = addr("10.0.0.1:9");
        let candidate_a = addr("10.0.0.2:9");
        let (mut selector, mut table) = bootstrapped(root);

        let now = Instant::now();
        selector.on_try(root, &[candidate_a], &mut table, now);

        // An enormous RTT relative to root_ping yields a stretch far above 2.0.
        let action = selector.on_ping_response(candidate_a, 0.0, false, &mut table, now + Duration::from_secs(10));
        assert_eq!(action, Some(Action::Attach { to: root }));
        assert_eq!(selector.parent(), root);
    }

    #[test]
    fn unresolved_candidates_are_absent_from_evaluation() {
        let root = addr("10.0.0.1:9");
        let candidate_a = addr("10.0.0.2:9");
        let candidate_b = addr("10.0.0.3:9");
        let (mut selector, mut table) = bootstrapped(root);

        let now = Instant::now();
        selector.on_try(root, &[candidate_a, candidate_b], &mut table, now);

        // Only candidate_a ever resolves; the round still completes with it.
        let action = selector.on_ping_response(candidate_a, 5.0, false, &mut table, now + Duration::from_millis(5));
        assert_eq!(action, None, "round_pending still expects candidate_b");

        let action = selector.on_ping_response(candidate_b, 5.0, false, &mut table, now + Duration::from_millis(5));
        assert_eq!(action, Some(Action::SendChildren { to: candidate_b }));
    }

    #[test]
    fn attach_success_is_idempotent_after_descent_already_set_the_parent() {
        let root = addr("10.0.0.1:9");
        let candidate_a = addr("10.0.0.2:9");
        let (mut selector, mut table) = bootstrapped(root);

        let now = Instant::now();
        selector.on_try(root, &[candidate_a], &mut table, now);
        selector.on_ping_response(candidate_a, 5.0, false, &mut table, now + Duration::from_millis(5));

        selector.on_attach_success(candidate_a);
        assert_eq!(selector.parent(), candidate_a);
        assert_eq!(selector.phase(), Phase::Attached);
    }

    #[test]
    fn reattach_restarts_bootstrap_from_the_root() {
        let root = addr("10.0.0.1:9");
        let candidate_a = addr("10.0.0.2:9");
        let (mut selector, mut table) = bootstrapped(root);

        let now = Instant::now();
        selector.on_try(root, &[candidate_a], &mut table, now);
        selector.on_ping_response(candidate_a, 5.0, false, &mut table, now + Duration::from_millis(5));

        selector.reset();
        assert_eq!(selector.parent(), root);
        assert_eq!(selector.phase(), Phase::Bootstrap);
        assert_eq!(selector.depth(), 0);
        assert!(selector.root_ping_ms().is_none());
    }
}
