//! Top-level peer: wires the ping table, parent-selection engine, child
//! table, and block cache together behind a single synchronous dispatch
//! entry point. Owns no I/O; the caller (an async UDP loop) feeds it
//! decoded frames and sends back whatever [`Outbound`] effects it returns.

use std::borrow::Cow;
use std::time::Instant;

use codec::{Addr, Frame};

use crate::cache::{BlockCache, NackOutcome};
use crate::children::{Admission, ChildTable};
use crate::parent::{Action as ParentAction, ParentSelector};
use crate::ping::PingTable;

/// One frame this peer needs sent to one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound<'a> {
    pub to: Addr,
    pub frame: Frame<'a>,
}

fn to<'a>(addr: Addr, frame: Frame<'a>) -> Outbound<'a> {
    Outbound { to: addr, frame }
}

pub struct Peer {
    is_root: bool,
    children: ChildTable,
    pings: PingTable,
    cache: BlockCache,
    parent: Option<ParentSelector>,
    next_origin_offset: u32,
    last_origination_timestamp: Option<f64>,
}

impl Peer {
    pub fn new_root(cache: BlockCache) -> Self {
        Self {
            is_root: true,
            children: ChildTable::new(),
            pings: PingTable::new(),
            cache,
            parent: None,
            next_origin_offset: 0,
            last_origination_timestamp: None,
        }
    }

    pub fn new_member(root: Addr, cache: BlockCache) -> Self {
        Self {
            is_root: false,
            children: ChildTable::new(),
            pings: PingTable::new(),
            cache,
            parent: Some(ParentSelector::new(root)),
            next_origin_offset: 0,
            last_origination_timestamp: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn depth(&self) -> u32 {
        self.parent.as_ref().map(|p| p.depth()).unwrap_or(0)
    }

    pub fn parent_addr(&self) -> Option<Addr> {
        self.parent.as_ref().map(|p| p.parent())
    }

    /// The raw origination timestamp carried by the most recent `DATA`
    /// frame we received, for the caller to diff against its own clock when
    /// writing `times.txt`.
    pub fn last_origination_timestamp(&self) -> Option<f64> {
        self.last_origination_timestamp
    }

    /// Sends the initial `PING` and `CHILDREN` to the root. Called once at
    /// startup for non-root peers, and again after a `REATTACH`.
    pub fn bootstrap(&mut self, now: Instant) -> Vec<Outbound<'static>> {
        let ps = self.parent.as_mut().expect("only non-root peers bootstrap");
        ps.bootstrap(&mut self.pings, now);
        let root = ps.parent();
        vec![to(root, Frame::Ping), to(root, Frame::Children)]
    }

    /// Dispatches one inbound frame, already decoded, from `source`.
    pub fn handle_frame<'a>(&mut self, source: Addr, frame: Frame<'a>, now: Instant) -> Vec<Outbound<'a>> {
        match frame {
            Frame::Ping => self.handle_ping(source),
            Frame::PingResponse { ping_to_root, is_root } => self.handle_ping_response(source, ping_to_root, is_root, now),
            Frame::Try(addrs) => self.handle_try(source, &addrs, now),
            Frame::Children => self.handle_children(source),
            Frame::Attach => self.handle_attach(source),
            Frame::AttachSuccess => self.handle_attach_success(source),
            Frame::Reattach => self.handle_reattach(now),
            Frame::Nack { offset } => self.handle_nack(source, offset),
            Frame::Data { start_offset, payload } => self.handle_data(source, start_offset, payload),
        }
    }

    fn handle_ping(&self, source: Addr) -> Vec<Outbound<'static>> {
        let ping_to_root = self.parent.as_ref().and_then(|p| p.root_ping_ms()).unwrap_or(0.0);
        vec![to(source, Frame::PingResponse { ping_to_root, is_root: self.is_root })]
    }

    fn handle_ping_response(&mut self, source: Addr, ping_to_root: f64, is_root: bool, now: Instant) -> Vec<Outbound<'static>> {
        let Some(ps) = self.parent.as_mut() else { return Vec::new() };

        match ps.on_ping_response(source, ping_to_root, is_root, &mut self.pings, now) {
            Some(action) => apply_parent_action(action),
            None => Vec::new(),
        }
    }

    fn handle_try(&mut self, source: Addr, addrs: &[Addr], now: Instant) -> Vec<Outbound<'static>> {
        let Some(ps) = self.parent.as_mut() else { return Vec::new() };
        let action = ps.on_try(source, addrs, &mut self.pings, now);
        apply_parent_action(action)
    }

    /// We are the candidate parent being probed by a descending peer;
    /// answer with our current child list, same shape as a redirect `TRY`.
    fn handle_children(&self, source: Addr) -> Vec<Outbound<'static>> {
        let addrs = self.children.children().iter().map(|c| c.addr).collect();
        vec![to(source, Frame::Try(addrs))]
    }

    fn handle_attach(&mut self, source: Addr) -> Vec<Outbound<'static>> {
        let ping = self.pings.known_rtt_to(source).map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0);

        match self.children.admit(source, ping) {
            Admission::Admitted => {
                log::info!("admitted child {source} (ping {ping:.1}ms, {}/{})", self.children.len(), crate::children::MAX_FANOUT);
                vec![to(source, Frame::AttachSuccess)]
            }
            Admission::Refreshed => {
                log::trace!("refreshed ping for existing child {source}: {ping:.1}ms");
                Vec::new()
            }
            Admission::Evicted { evicted } => {
                log::info!("evicting child {evicted} in favor of {source} (ping {ping:.1}ms)");
                vec![to(source, Frame::AttachSuccess), to(evicted, Frame::Reattach)]
            }
            Admission::Redirect => {
                log::debug!("fanout full, redirecting {source} deeper into the tree");
                let addrs = self.children.children().iter().map(|c| c.addr).collect();
                vec![to(source, Frame::Try(addrs))]
            }
        }
    }

    fn handle_attach_success(&mut self, source: Addr) -> Vec<Outbound<'static>> {
        if let Some(ps) = self.parent.as_mut() {
            log::info!("attached to parent {source}");
            ps.on_attach_success(source);
        }
        Vec::new()
    }

    fn handle_reattach(&mut self, now: Instant) -> Vec<Outbound<'static>> {
        if self.parent.is_none() {
            return Vec::new(); // the root cannot be evicted
        }

        log::info!("evicted by parent, restarting bootstrap");
        self.pings = PingTable::new();
        self.cache.reset();
        self.parent.as_mut().unwrap().reset();
        self.bootstrap(now)
    }

    fn handle_nack(&self, source: Addr, offset: u32) -> Vec<Outbound<'static>> {
        match self.cache.service_nack(offset) {
            NackOutcome::Serve { start_offset, payload } => {
                log::trace!("serving nack from {source} for offset {start_offset} out of cache");
                vec![to(source, Frame::Data { start_offset, payload: Cow::Owned(payload) })]
            }
            NackOutcome::Forward => match self.parent_addr() {
                Some(parent) => {
                    log::trace!("forwarding nack for offset {offset} from {source} up to {parent}");
                    vec![to(parent, Frame::Nack { offset })]
                }
                None => Vec::new(), // the root has nobody to forward to
            },
        }
    }

    fn handle_data<'a>(&mut self, source: Addr, start_offset: u32, payload: Cow<'a, [u8]>) -> Vec<Outbound<'a>> {
        if payload.len() >= 8 {
            self.last_origination_timestamp = Some(f64::from_le_bytes(payload[0..8].try_into().unwrap()));
        }

        let write = self.cache.write(start_offset, &payload);

        let mut out = Vec::new();

        if !self.is_root {
            if let Some(gap_offset) = self.cache.detect_gap(write) {
                if let Some(parent) = self.parent_addr() {
                    log::debug!("gap detected at offset {gap_offset}, nacking parent {parent}");
                    out.push(to(parent, Frame::Nack { offset: gap_offset as u32 }));
                }
            }
        }

        let parent = self.parent_addr();
        let mut forwarded = 0;
        for child in self.children.children() {
            if Some(child.addr) == parent || child.addr == source {
                continue;
            }

            out.push(to(child.addr, Frame::Data { start_offset, payload: payload.clone() }));
            forwarded += 1;
        }

        log::trace!("forwarded data at offset {start_offset} from {source} to {forwarded} children");
        out
    }

    /// Root-only: originates the next `DATA` frame and fans it out to every
    /// child. `payload_size` is the total post-header payload length and
    /// must be at least 8 (the embedded origination timestamp).
    pub fn originate(&mut self, payload_size: usize, origination_timestamp: f64) -> Vec<Outbound<'static>> {
        debug_assert!(self.is_root, "only the root originates data");
        debug_assert!(payload_size >= 8, "payload must fit the origination timestamp");

        let start_offset = self.next_origin_offset;
        self.next_origin_offset = self.next_origin_offset.wrapping_add(payload_size as u32);

        let mut payload = vec![0u8; payload_size];
        payload[0..8].copy_from_slice(&origination_timestamp.to_le_bytes());

        self.cache.write(start_offset, &payload);

        self.children
            .children()
            .iter()
            .map(|c| to(c.addr, Frame::Data { start_offset, payload: Cow::Owned(payload.clone()) }))
            .collect()
    }
}

fn apply_parent_action(action: ParentAction) -> Vec<Outbound<'static>> {
    match action {
        ParentAction::ProbePeers(addrs) => addrs.into_iter().map(|a| to(a, Frame::Ping)).collect(),
        ParentAction::SendChildren { to: dest } => vec![to(dest, Frame::Children)],
        ParentAction::Attach { to: dest } => vec![to(dest, Frame::Attach)],
    }
}
