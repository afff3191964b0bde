//! Child table (C4): admits up to `MAX_FANOUT` children, evicting the worst
//! on a materially better offer.

use codec::Addr;

/// Maximum children a single peer will accept.
pub const MAX_FANOUT: usize = 4;

/// Eviction hysteresis margin: a challenger must beat the worst child's
/// ping by more than 10% before it is allowed to evict it. Without this
/// margin, two children with near-identical latency would fight over the
/// last slot under ordinary measurement noise.
const EVICTION_MARGIN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Child {
    pub addr: Addr,
    pub shortest_ping: f64,
}

/// What the caller should do in response to an `ATTACH` from a prospective child.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// The child was appended to a free slot; reply `ATTACH_SUC`.
    Admitted,
    /// The address already held a slot; its ping was refreshed, no reply needed.
    Refreshed,
    /// The child is a strict improvement over the worst existing child, who
    /// is evicted (and must be sent `REATTACH`); the new child replaces it
    /// and should be sent `ATTACH_SUC`.
    Evicted { evicted: Addr },
    /// Fanout is full and the offer isn't good enough; reply `TRY` with the
    /// current child list so the candidate can attach deeper in the tree.
    Redirect,
}

#[derive(Default)]
pub struct ChildTable {
    children: Vec<Child>,
}

impl ChildTable {
    pub fn new() -> Self {
        Self { children: Vec::with_capacity(MAX_FANOUT) }
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn contains(&self, addr: Addr) -> bool {
        self.children.iter().any(|c| c.addr == addr)
    }

    /// Applies the admission policy for a prospective child announcing
    /// itself with `ping` (its measured RTT to us, or `0.0` when unmeasured).
    pub fn admit(&mut self, addr: Addr, ping: f64) -> Admission {
        if self.children.len() < MAX_FANOUT {
            self.children.push(Child { addr, shortest_ping: ping });
            return Admission::Admitted;
        }

        if let Some(existing) = self.children.iter_mut().find(|c| c.addr == addr) {
            if ping < existing.shortest_ping {
                existing.shortest_ping = ping;
            }

            return Admission::Refreshed;
        }

        // The replacement target is the slot with the *smallest* shortest_ping,
        // not the largest — matching the original implementation's eviction
        // target (see DESIGN.md's Open Questions for §4.4 vs. the worked S3
        // example).
        let (worst_index, worst) = self
            .children
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.shortest_ping.total_cmp(&b.shortest_ping))
            .expect("fanout is full, so at least one child slot exists");

        if ping < worst.shortest_ping - worst.shortest_ping * EVICTION_MARGIN {
            let evicted = worst.addr;
            self.children[worst_index] = Child { addr, shortest_ping: ping };
            Admission::Evicted { evicted }
        } else {
            Admission::Redirect
        }
    }

    pub fn remove(&mut self, addr: Addr) {
        self.children.retain(|c| c.addr != addr);
    }
}
