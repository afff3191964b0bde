//! Ping table (C2): tracks outstanding latency probes in a small ring buffer.

use std::time::{Duration, Instant};

use codec::Addr;

/// Ring buffer capacity. Deliberately tiny and bounded: the attach protocol
/// only ever has a handful of probes outstanding at once, and slot reuse is
/// tolerated by matching responses on source address (see [`PingTable::resolve`]).
pub const MAX_PINGS: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Entry {
    dest: Addr,
    start: Instant,
    /// Filled in by [`PingTable::resolve`] once a response arrives, mirroring
    /// the `ping_rtt[i]` field of the per-peer ping ring.
    rtt: Option<Duration>,
}

/// The outcome of resolving an inbound `PINGRESPONSE` against the table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub index: usize,
    pub dest: Addr,
    pub rtt: Duration,
}

#[derive(Default)]
pub struct PingTable {
    slots: Vec<Option<Entry>>,
    next: usize,
}

impl PingTable {
    pub fn new() -> Self {
        Self { slots: vec![None; MAX_PINGS], next: 0 }
    }

    /// Records a freshly sent probe and returns its ring index.
    ///
    /// Slot reuse silently overwrites whatever probe previously lived there;
    /// a late response for the overwritten probe will simply fail to match
    /// by address and be dropped.
    pub fn record_sent(&mut self, dest: Addr, now: Instant) -> usize {
        let index = self.next;
        self.slots[index] = Some(Entry { dest, start: now, rtt: None });
        self.next = (self.next + 1) % MAX_PINGS;
        index
    }

    /// Resolves an inbound `PINGRESPONSE`, recording its RTT on the matched
    /// slot.
    ///
    /// Scans for the first slot whose stored address equals `source`. If
    /// none match but `is_root` is set on the response, falls back to
    /// resolving index 0 — the very first probe any non-root peer ever
    /// sends is to the root, so this recovers the root's RTT even when the
    /// address comparison fails for some transport-specific reason.
    pub fn resolve(&mut self, source: Addr, is_root: bool, now: Instant) -> Option<Resolved> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot {
                if entry.dest == source {
                    let rtt = now.saturating_duration_since(entry.start);
                    entry.rtt = Some(rtt);
                    return Some(Resolved { index, dest: entry.dest, rtt });
                }
            }
        }

        if is_root {
            if let Some(entry) = self.slots[0].as_mut() {
                let rtt = now.saturating_duration_since(entry.start);
                entry.rtt = Some(rtt);
                return Some(Resolved { index: 0, dest: entry.dest, rtt });
            }
        }

        None
    }

    pub fn dest_at(&self, index: usize) -> Option<Addr> {
        self.slots.get(index).and_then(|s| s.map(|e| e.dest))
    }

    /// The most recently recorded RTT to `addr`, if we have ever resolved a
    /// probe sent there. Used to seed a child's `shortest_ping` from a probe
    /// we happen to already have on file for it.
    pub fn known_rtt_to(&self, addr: Addr) -> Option<Duration> {
        self.slots.iter().flatten().rev().find(|e| e.dest == addr).and_then(|e| e.rtt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn addr(s: &str) -> Addr {
        s.parse().unwrap()
    }

    #[test]
    fn resolves_by_matching_address() {
        let mut table = PingTable::new();
        let t0 = Instant::now();
        let idx = table.record_sent(addr("10.0.0.1:9"), t0);

        sleep(Duration::from_millis(1));
        let resolved = table.resolve(addr("10.0.0.1:9"), false, Instant::now()).unwrap();
        assert_eq!(resolved.index, idx);
        assert!(resolved.rtt > Duration::ZERO);
    }

    #[test]
    fn falls_back_to_index_zero_when_is_root_and_no_address_match() {
        let mut table = PingTable::new();
        table.record_sent(addr("10.0.0.1:9"), Instant::now());
        table.record_sent(addr("10.0.0.2:9"), Instant::now());

        let resolved = table.resolve(addr("10.0.0.99:9"), true, Instant::now()).unwrap();
        assert_eq!(resolved.index, 0);
    }

    #[test]
    fn unmatched_non_root_response_resolves_to_nothing() {
        let mut table = PingTable::new();
        table.record_sent(addr("10.0.0.1:9"), Instant::now());

        assert!(table.resolve(addr("10.0.0.99:9"), false, Instant::now()).is_none());
    }

    #[test]
    fn ring_wraps_after_max_pings_sends() {
        let mut table = PingTable::new();
        for _ in 0..MAX_PINGS {
            table.record_sent(addr("10.0.0.1:9"), Instant::now());
        }

        let idx = table.record_sent(addr("10.0.0.2:9"), Instant::now());
        assert_eq!(idx, 0);
        assert_eq!(table.dest_at(0), Some(addr("10.0.0.2:9")));
    }

    #[test]
    fn known_rtt_is_available_after_resolution() {
        let mut table = PingTable::new();
        let t0 = Instant::now();
        table.record_sent(addr("10.0.0.1:9"), t0);

        assert!(table.known_rtt_to(addr("10.0.0.1:9")).is_none());

        table.resolve(addr("10.0.0.1:9"), false, t0 + Duration::from_millis(20));
        assert_eq!(table.known_rtt_to(addr("10.0.0.1:9")), Some(Duration::from_millis(20)));
    }
}
