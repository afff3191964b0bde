//! Block cache + NACK recovery (C6): a ring buffer of recently received
//! bytes keyed by global byte-offset, with gap detection and the NACK
//! request/service protocol that repairs holes from the parent.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheError {
    /// `cache_size` must be a positive multiple of `block_size`.
    BadGeometry,
}

/// Outcome of writing one `DATA` frame into the cache.
#[derive(Debug, Clone, Copy)]
pub struct Write {
    pub slot: usize,
    pub orig_start: i64,
}

pub struct BlockCache {
    buffer: Vec<u8>,
    /// Global byte-offset stored at each block slot, or `-1` if empty.
    starts: Vec<i64>,
    block_size: usize,
    cache_size: usize,
}

impl BlockCache {
    pub fn new(cache_size: usize, block_size: usize) -> Result<Self, CacheError> {
        if block_size == 0 || cache_size == 0 || cache_size % block_size != 0 {
            return Err(CacheError::BadGeometry);
        }

        let num_blocks = cache_size / block_size;
        Ok(Self {
            buffer: vec![0u8; cache_size],
            starts: vec![-1; num_blocks],
            block_size,
            cache_size,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.starts.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn start_at(&self, slot: usize) -> i64 {
        self.starts[slot]
    }

    /// Clears all cache bookkeeping after a `REATTACH` eviction. The buffer
    /// bytes are left in place; only the offset metadata is forgotten.
    pub fn reset(&mut self) {
        self.starts.fill(-1);
    }

    /// Writes a `DATA` frame's payload into the cache at `start_offset`.
    ///
    /// `start_offset` is rounded down to a block boundary before anything
    /// else happens; the payload is then copied starting at that aligned
    /// offset. A payload that straddles the end of the ring buffer is split
    /// into two copies rather than corrupting the wrap (the source's known
    /// limitation here; see DESIGN.md).
    pub fn write(&mut self, start_offset: u32, payload: &[u8]) -> Write {
        let block_size = self.block_size as i64;
        let orig_start = (start_offset as i64) / block_size * block_size;
        let slot = ((orig_start as u64 % self.cache_size as u64) / self.block_size as u64) as usize;

        let ring_offset = (orig_start as u64 % self.cache_size as u64) as usize;
        self.copy_into_ring(ring_offset, payload);

        let n_blocks = payload.len().div_ceil(self.block_size).max(1);
        for i in 0..n_blocks {
            let target_slot = (slot + i) % self.starts.len();
            self.starts[target_slot] = orig_start + (i as i64) * block_size;
        }

        Write { slot, orig_start }
    }

    fn copy_into_ring(&mut self, ring_offset: usize, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }

        let tail_room = self.cache_size - ring_offset;
        if payload.len() <= tail_room {
            self.buffer[ring_offset..ring_offset + payload.len()].copy_from_slice(payload);
        } else {
            let (first, second) = payload.split_at(tail_room);
            self.buffer[ring_offset..].copy_from_slice(first);
            self.buffer[..second.len()].copy_from_slice(second);
        }
    }

    /// Reads `block_size` bytes starting at the ring position for `orig_start`.
    fn read_block(&self, orig_start: i64) -> Vec<u8> {
        let ring_offset = (orig_start as u64 % self.cache_size as u64) as usize;
        let tail_room = self.cache_size - ring_offset;

        if self.block_size <= tail_room {
            self.buffer[ring_offset..ring_offset + self.block_size].to_vec()
        } else {
            let mut out = Vec::with_capacity(self.block_size);
            out.extend_from_slice(&self.buffer[ring_offset..]);
            out.extend_from_slice(&self.buffer[..self.block_size - tail_room]);
            out
        }
    }

    /// Walks backward from the block just before `write.slot`, looking for
    /// the nearest gap: an empty slot (before the walk has wrapped past the
    /// ring origin) or a discontinuity between two non-empty entries.
    /// Returns the byte offset to NACK for, if any.
    ///
    /// Stops at the first gap found rather than scanning the whole ring —
    /// repair cascades from there on subsequent writes, so requesting every
    /// historical hole in one shot would just NACK-storm the parent.
    pub fn detect_gap(&self, write: Write) -> Option<i64> {
        let num_blocks = self.starts.len();
        if num_blocks <= 1 {
            return None;
        }

        let block_size = self.block_size as i64;

        for cntr in 1..num_blocks {
            let i = (write.slot + num_blocks - cntr) % num_blocks;
            let next_i = (i + 1) % num_blocks;
            let wrapped = cntr > write.slot;

            let is_gap = if self.starts[i] == -1 {
                !wrapped
            } else {
                self.starts[i] != self.starts[next_i] - block_size
            };

            if is_gap {
                let requested = write.orig_start - (cntr as i64) * block_size;
                if requested >= 0 {
                    return Some(requested);
                }
                // Underflowing request: not a valid repair target, keep walking.
            }
        }

        None
    }

    /// Outcome of receiving a `NACK` for `req_offset`.
    pub fn service_nack(&self, req_offset: u32) -> NackOutcome {
        let block_size = self.block_size as i64;
        let aligned = (req_offset as i64) / block_size * block_size;
        let slot = ((aligned as u64 % self.cache_size as u64) / self.block_size as u64) as usize;

        if self.starts[slot] == aligned {
            NackOutcome::Serve { start_offset: req_offset, payload: self.read_block(aligned) }
        } else {
            NackOutcome::Forward
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NackOutcome {
    Serve { start_offset: u32, payload: Vec<u8> },
    Forward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_geometry_where_cache_size_is_not_a_multiple_of_block_size() {
        assert_eq!(BlockCache::new(100, 30).unwrap_err(), CacheError::BadGeometry);
    }

    #[test]
    fn write_marks_the_correct_slot() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        let w = cache.write(0, &[1u8; 100]);
        assert_eq!(w.slot, 0);
        assert_eq!(cache.start_at(0), 0);
    }

    #[test]
    fn write_is_idempotent() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        let payload = [7u8; 100];
        cache.write(200, &payload);
        let starts_before = (0..cache.num_blocks()).map(|i| cache.start_at(i)).collect::<Vec<_>>();

        cache.write(200, &payload);
        let starts_after = (0..cache.num_blocks()).map(|i| cache.start_at(i)).collect::<Vec<_>>();

        assert_eq!(starts_before, starts_after);
    }

    #[test]
    fn header_only_write_marks_metadata_with_no_payload_bytes() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        let w = cache.write(300, &[]);
        assert_eq!(cache.start_at(w.slot), 300);
    }

    #[test]
    fn writes_that_straddle_the_ring_boundary_split_across_it() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        // Starting at the last block (400) with two blocks of payload wraps
        // back into slot 0 without corrupting its neighbors.
        let payload = vec![9u8; 200];
        cache.write(400, &payload);

        assert_eq!(cache.start_at(4), 400);
        assert_eq!(cache.start_at(0), 500);
    }

    #[test]
    fn nearest_gap_is_detected_and_reported_for_repair() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        cache.write(0, &[0u8; 100]);
        cache.write(100, &[0u8; 100]);
        cache.write(200, &[0u8; 100]);
        // Skip 300, write 400.
        let w = cache.write(400, &[0u8; 100]);

        assert_eq!(cache.detect_gap(w), Some(300));
    }

    #[test]
    fn no_gap_reported_when_the_ring_is_contiguous() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        cache.write(0, &[0u8; 100]);
        cache.write(100, &[0u8; 100]);
        let w = cache.write(200, &[0u8; 100]);

        assert_eq!(cache.detect_gap(w), None);
    }

    #[test]
    fn empty_slots_before_any_data_has_arrived_are_not_nacked() {
        let cache = BlockCache::new(500, 100).unwrap();
        // A write into an otherwise-untouched ring must not NACK prehistoric
        // blocks that were simply never sent yet.
        let mut cache = cache;
        let w = cache.write(0, &[0u8; 100]);
        assert_eq!(cache.detect_gap(w), None);
    }

    #[test]
    fn nack_for_a_cached_block_yields_matching_data() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        cache.write(300, &[42u8; 100]);

        match cache.service_nack(300) {
            NackOutcome::Serve { start_offset, payload } => {
                assert_eq!(start_offset, 300);
                assert_eq!(payload, vec![42u8; 100]);
            }
            NackOutcome::Forward => panic!("expected a local serve"),
        }
    }

    #[test]
    fn nack_for_an_evicted_block_forwards_upstream() {
        let mut cache = BlockCache::new(500, 100).unwrap();
        cache.write(300, &[1u8; 100]);
        // Overwrites slot 3 (300 mod 500 / 100) with a later offset on the ring.
        cache.write(800, &[2u8; 100]);

        assert_eq!(cache.service_nack(300), NackOutcome::Forward);
    }
}
