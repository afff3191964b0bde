//! Lightweight atomic counters for the handful of numbers worth watching on
//! a running peer: traffic volume and NACK activity.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum Stat {
    ReceivedBytes(usize),
    SentBytes(usize),
    ReceivedPkts(usize),
    SentPkts(usize),
    NacksSent(usize),
    NacksServed(usize),
}

#[derive(Default)]
struct Count(AtomicUsize);

impl Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Counts {
    received_bytes: Count,
    sent_bytes: Count,
    received_pkts: Count,
    sent_pkts: Count,
    nacks_sent: Count,
    nacks_served: Count,
}

#[derive(Debug, Serialize, Clone, Copy, Default)]
pub struct Snapshot {
    pub received_bytes: usize,
    pub sent_bytes: usize,
    pub received_pkts: usize,
    pub sent_pkts: usize,
    pub nacks_sent: usize,
    pub nacks_served: usize,
}

/// Process-wide traffic and repair counters for this peer.
///
/// # Example
///
/// ```
/// use scdt::statistics::{Statistics, Stat};
///
/// let stats = Statistics::default();
/// stats.record(&[Stat::ReceivedBytes(128), Stat::ReceivedPkts(1)]);
///
/// let snapshot = stats.snapshot();
/// assert_eq!(snapshot.received_bytes, 128);
/// assert_eq!(snapshot.received_pkts, 1);
/// ```
#[derive(Clone, Default)]
pub struct Statistics(Arc<Counts>);

impl Statistics {
    pub fn record(&self, stats: &[Stat]) {
        for stat in stats {
            match *stat {
                Stat::ReceivedBytes(v) => self.0.received_bytes.add(v),
                Stat::SentBytes(v) => self.0.sent_bytes.add(v),
                Stat::ReceivedPkts(v) => self.0.received_pkts.add(v),
                Stat::SentPkts(v) => self.0.sent_pkts.add(v),
                Stat::NacksSent(v) => self.0.nacks_sent.add(v),
                Stat::NacksServed(v) => self.0.nacks_served.add(v),
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            received_bytes: self.0.received_bytes.get(),
            sent_bytes: self.0.sent_bytes.get(),
            received_pkts: self.0.received_pkts.get(),
            sent_pkts: self.0.sent_pkts.get(),
            nacks_sent: self.0.nacks_sent.get(),
            nacks_served: self.0.nacks_served.get(),
        }
    }
}
