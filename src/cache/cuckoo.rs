//! Cuckoo-hashed LRU cache variant.
//!
//! Arena layout: an 8-byte-aligned [`CuckooHeader`], an element arena of
//! `capacity + 1` [`Element`] records (index `0` is a fixed sentinel that
//! never holds user data — its `next`/`prev` thread the circular LRU list,
//! so the list is empty iff `element[0].next == 0`), and a hash table of
//! `2 * capacity` `u32` element indices (`0` doubling as the table's empty
//! marker, since no real element ever has index `0`).
//!
//! Storing each cell's *predecessor index in the LRU list* rather than the
//! key's own element index would let eviction patch one hash cell without
//! recomputing buckets. This crate takes the simpler alternative instead:
//! cells store the key's own element index and the list is walked for
//! eviction bookkeeping, at the cost of doubling hash-table writes on
//! promotion (see DESIGN.md).

use super::element::Element;
use super::{AddOutcome, RemoveOutcome};
use crate::arena::{align_up, check_place_mut};
use crate::error::{Error, Result};
use crate::hash::{mix64, two_buckets, DEFAULT_RANDOM1, DEFAULT_RANDOM2};

const HEADER_ALIGN: usize = 8;
const SENTINEL: u32 = 0;
const MAX_PUSHES: usize = 100;
/// Bound on rehash attempts before giving up. An unbounded rehash can
/// spin forever on an adversarial insert sequence; see DESIGN.md.
const MAX_REHASH_ATTEMPTS: usize = 1024;

#[repr(C)]
struct CuckooHeader {
    capacity: u32,
    capacity_bits: u32,
    len: u32,
    free_head: u32,
    salt: u64,
    factor: u64,
}

const HEADER_SIZE: usize = std::mem::size_of::<CuckooHeader>();
const _: () = assert!(HEADER_SIZE == 24);

fn validate_capacity(capacity: u32) -> Result<()> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(Error::BadSize);
    }
    if capacity as u64 > (1u64 << 31) {
        return Err(Error::BadSize);
    }
    Ok(())
}

fn layout(capacity: u32) -> (usize, usize, usize) {
    let elements_off = align_up(HEADER_SIZE, HEADER_ALIGN);
    let n_elements = capacity as usize + 1;
    let table_off = elements_off + n_elements * std::mem::size_of::<Element>();
    let table_len = 2 * capacity as usize;
    let total = table_off + table_len * std::mem::size_of::<u32>();
    (elements_off, table_off, align_up(total, HEADER_ALIGN))
}

/// Required arena size, in bytes, for a cuckoo cache of the given capacity.
pub fn size_for(capacity: u32) -> Result<usize> {
    validate_capacity(capacity)?;
    let (_, _, total) = layout(capacity);
    Ok(total)
}

/// Handle aliasing into a caller-provided arena.
pub struct CuckooCache<'a> {
    header: &'a mut CuckooHeader,
    elements: &'a mut [Element],
    table: &'a mut [u32],
}

impl<'a> CuckooCache<'a> {
    /// Lays out a fresh, empty cache inside `buf`.
    pub fn init(buf: &'a mut [u8], capacity: u32) -> Result<Self> {
        validate_capacity(capacity)?;
        let (elements_off, table_off, total) = layout(capacity);
        check_place_mut(buf, HEADER_ALIGN, total)?;

        let base = buf.as_mut_ptr();
        let header: &mut CuckooHeader = unsafe { &mut *(base as *mut CuckooHeader) };
        let elements: &mut [Element] = unsafe {
            std::slice::from_raw_parts_mut(
                base.add(elements_off) as *mut Element,
                capacity as usize + 1,
            )
        };
        let table: &mut [u32] = unsafe {
            std::slice::from_raw_parts_mut(
                base.add(table_off) as *mut u32,
                2 * capacity as usize,
            )
        };

        header.capacity = capacity;
        header.capacity_bits = capacity.trailing_zeros();
        header.len = 0;
        header.free_head = 1;
        header.salt = DEFAULT_RANDOM1;
        header.factor = DEFAULT_RANDOM2;

        // Element 0 is the sentinel: an empty circular list points to itself.
        elements[0] = Element::EMPTY;
        elements[0].prev = 0;
        elements[0].next = 0;
        // Elements 1..=capacity form the free list, chained through `next`;
        // `prev` is unused for free elements.
        for i in 1..=capacity as usize {
            elements[i] = Element::EMPTY;
            elements[i].next = if i == capacity as usize { 0 } else { (i + 1) as u32 };
        }
        table.fill(SENTINEL);

        Ok(Self {
            header,
            elements,
            table,
        })
    }

    fn buckets_for(&self, ip: u32) -> (usize, usize) {
        two_buckets(ip, self.header.salt, self.header.factor, self.header.capacity_bits)
    }

    fn find_cell(&self, ip: u32) -> Option<usize> {
        let (b1, b2) = self.buckets_for(ip);
        for b in [b1, b2] {
            let cell = self.table[b];
            if cell != SENTINEL && self.elements[cell as usize].ip == ip {
                return Some(b);
            }
        }
        None
    }

    fn list_is_empty(&self) -> bool {
        self.elements[0].next == 0
    }

    fn list_unlink(&mut self, idx: u32) {
        let (prev, next) = (self.elements[idx as usize].prev, self.elements[idx as usize].next);
        self.elements[prev as usize].next = next;
        self.elements[next as usize].prev = prev;
        self.header.len -= 1;
    }

    fn list_push_front(&mut self, idx: u32) {
        let old_head = self.elements[0].next;
        self.elements[idx as usize].prev = 0;
        self.elements[idx as usize].next = old_head;
        self.elements[old_head as usize].prev = idx;
        self.elements[0].next = idx;
        self.header.len += 1;
    }

    fn promote(&mut self, idx: u32) {
        if self.elements[0].next == idx {
            return;
        }
        self.list_unlink(idx);
        self.list_push_front(idx);
    }

    fn pop_free_list(&mut self) -> Option<u32> {
        let head = self.header.free_head;
        if head == 0 {
            return None;
        }
        self.header.free_head = self.elements[head as usize].next;
        Some(head)
    }

    fn push_free_list(&mut self, idx: u32) {
        self.elements[idx as usize].next = self.header.free_head;
        self.header.free_head = idx;
    }

    fn evict_oldest(&mut self) -> (u32, u32, u32) {
        let oldest = self.elements[0].prev;
        let ip = self.elements[oldest as usize].ip;
        let value = self.elements[oldest as usize].value;
        if let Some(cell) = self.find_cell(ip) {
            self.table[cell] = SENTINEL;
        }
        self.list_unlink(oldest);
        (oldest, ip, value)
    }

    /// Places `elem_idx` (whose `.ip` matches the key being inserted) into
    /// the table, performing a bounded cuckoo displacement chain and, on
    /// exhaustion, a full salt rehash.
    fn table_insert(&mut self, elem_idx: u32) -> Result<()> {
        let ip = self.elements[elem_idx as usize].ip;
        let (b1, b2) = self.buckets_for(ip);
        if self.table[b1] == SENTINEL {
            self.table[b1] = elem_idx;
            return Ok(());
        }
        if self.table[b2] == SENTINEL {
            self.table[b2] = elem_idx;
            return Ok(());
        }

        let mut victim_slot = b1;
        let mut incoming = elem_idx;
        for _ in 0..MAX_PUSHES {
            let displaced = self.table[victim_slot];
            self.table[victim_slot] = incoming;
            let displaced_ip = self.elements[displaced as usize].ip;
            let (d1, d2) = self.buckets_for(displaced_ip);
            let other = if d1 == victim_slot { d2 } else { d1 };
            if self.table[other] == SENTINEL {
                self.table[other] = displaced;
                return Ok(());
            }
            incoming = displaced;
            victim_slot = other;
        }
        // Displacement chain did not converge; undo is unnecessary because
        // every swap kept the table in a valid (if still colliding) state
        // for `incoming`'s current slot. Fall through to a full rehash that
        // reinserts every live element, including `incoming`.
        self.table[victim_slot] = incoming;
        self.rehash()
    }

    /// Regenerates the salt/factor pair and reinserts every live element,
    /// retrying up to [`MAX_REHASH_ATTEMPTS`] times.
    fn rehash(&mut self) -> Result<()> {
        for attempt in 1..=MAX_REHASH_ATTEMPTS {
            let new_salt = mix64(
                self.header.salt ^ attempt as u64,
                DEFAULT_RANDOM1,
                DEFAULT_RANDOM2,
            );
            self.header.salt = new_salt;
            self.table.fill(SENTINEL);

            let mut ok = true;
            let mut idx = self.elements[0].next;
            while idx != 0 {
                let ip = self.elements[idx as usize].ip;
                let (b1, b2) = self.buckets_for(ip);
                if self.table[b1] == SENTINEL {
                    self.table[b1] = idx;
                } else if self.table[b2] == SENTINEL {
                    self.table[b2] = idx;
                } else {
                    ok = false;
                    break;
                }
                idx = self.elements[idx as usize].next;
            }
            if ok {
                return Ok(());
            }
        }
        Err(Error::FailedToCalibrate)
    }

    /// Inserts or updates `ip` with `value`, promoting it to newest.
    pub fn add(&mut self, ip: u32, value: u32) -> Result<AddOutcome> {
        if let Some(cell) = self.find_cell(ip) {
            let idx = self.table[cell];
            self.elements[idx as usize].value = value;
            self.promote(idx);
            return Ok(AddOutcome {
                existed: true,
                ..Default::default()
            });
        }

        let (idx, evicted) = match self.pop_free_list() {
            Some(idx) => (idx, None),
            None => {
                if self.list_is_empty() {
                    return Err(Error::BadSize);
                }
                let (idx, evicted_ip, evicted_value) = self.evict_oldest();
                (idx, Some((evicted_ip, evicted_value)))
            }
        };

        self.elements[idx as usize].ip = ip;
        self.elements[idx as usize].value = value;
        // Link into the LRU list before the hash-table insert, not after: a
        // mid-insert rehash (`table_insert` -> `rehash`) only re-buckets
        // elements reachable from the list, so if `idx` isn't linked yet it
        // comes out of `rehash` with no cell and becomes unfindable. Unwind
        // the link on failure so `idx` doesn't end up stuck in the list with
        // no cell and no free-list membership either.
        self.list_push_front(idx);
        if let Err(e) = self.table_insert(idx) {
            self.list_unlink(idx);
            self.push_free_list(idx);
            return Err(e);
        }

        Ok(match evicted {
            Some((evicted_ip, evicted_value)) => AddOutcome {
                existed: false,
                evicted: true,
                evicted_ip,
                evicted_value,
            },
            None => AddOutcome::default(),
        })
    }

    /// Looks up `ip`, promoting it to newest on a hit.
    pub fn has(&mut self, ip: u32) -> (bool, u32) {
        match self.find_cell(ip) {
            Some(cell) => {
                let idx = self.table[cell];
                let value = self.elements[idx as usize].value;
                self.promote(idx);
                (true, value)
            }
            None => (false, 0),
        }
    }

    /// Removes `ip` if present; a no-op otherwise.
    pub fn remove(&mut self, ip: u32) -> RemoveOutcome {
        match self.find_cell(ip) {
            Some(cell) => {
                let idx = self.table[cell];
                let value = self.elements[idx as usize].value;
                self.table[cell] = SENTINEL;
                self.list_unlink(idx);
                self.push_free_list(idx);
                RemoveOutcome {
                    existed: true,
                    existed_value: value,
                }
            }
            None => RemoveOutcome::default(),
        }
    }

    pub fn len(&self) -> u32 {
        self.header.len
    }

    pub fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    pub fn capacity(&self) -> u32 {
        self.header.capacity
    }

    /// Returns keys newest-to-oldest.
    pub fn dump(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.header.len as usize);
        let mut idx = self.elements[0].next;
        let mut prev = 0u32;
        while idx != 0 {
            assert_eq!(self.elements[idx as usize].prev, prev, "broken prev link");
            out.push(self.elements[idx as usize].ip);
            prev = idx;
            idx = self.elements[idx as usize].next;
        }
        assert_eq!(self.elements[0].prev, prev, "sentinel tail mismatch");
        assert_eq!(out.len() as u32, self.header.len, "len mismatch after walk");
        out
    }

    /// Validates every structural invariant of the cache (list linkage,
    /// hash-table placement, free-list membership).
    pub fn check_invariants(&self) {
        let dumped = self.dump();
        let free_len = {
            let mut n = 0u32;
            let mut idx = self.header.free_head;
            while idx != 0 {
                n += 1;
                idx = self.elements[idx as usize].next;
            }
            n
        };
        assert_eq!(dumped.len() as u32 + free_len, self.header.capacity);
        for ip in &dumped {
            assert!(self.find_cell(*ip).is_some(), "stored key {ip:#x} not resolvable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(capacity: u32) -> Vec<u8> {
        vec![0u8; size_for(capacity).unwrap()]
    }

    #[test]
    fn size_for_rejects_bad_args() {
        assert_eq!(size_for(3), Err(Error::BadSize));
        assert_eq!(size_for(0), Err(Error::BadSize));
    }

    #[test]
    fn basic_add_has_remove() {
        let mut buf = make(8);
        let mut cache = CuckooCache::init(&mut buf, 8).unwrap();
        for ip in 1..=8u32 {
            let r = cache.add(ip, ip * 10).unwrap();
            assert!(!r.evicted);
        }
        for ip in 1..=8u32 {
            assert_eq!(cache.has(ip), (true, ip * 10));
        }
        let r = cache.remove(4);
        assert!(r.existed);
        assert_eq!(r.existed_value, 40);
        assert_eq!(cache.has(4), (false, 0));
    }

    #[test]
    fn eviction_on_overflow() {
        let mut buf = make(4);
        let mut cache = CuckooCache::init(&mut buf, 4).unwrap();
        for ip in 1..=4u32 {
            cache.add(ip, ip).unwrap();
        }
        let r = cache.add(5, 5).unwrap();
        assert!(r.evicted);
        assert_eq!(cache.len(), 4);
        cache.check_invariants();
    }

    #[test]
    fn promotion_reorders_list() {
        let mut buf = make(4);
        let mut cache = CuckooCache::init(&mut buf, 4).unwrap();
        for ip in 1..=4u32 {
            cache.add(ip, ip).unwrap();
        }
        assert_eq!(cache.dump(), vec![4, 3, 2, 1]);
        cache.has(2);
        assert_eq!(cache.dump(), vec![2, 4, 3, 1]);
    }

    #[test]
    fn stress_random_ops_preserve_invariants() {
        let mut buf = make(32);
        let mut cache = CuckooCache::init(&mut buf, 32).unwrap();
        let mut state: u64 = 0xDEAD_BEEF;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        for _ in 0..2000 {
            let ip = (next() % 128) as u32 + 1;
            match next() % 3 {
                0 => {
                    cache.add(ip, ip).unwrap();
                }
                1 => {
                    cache.has(ip);
                }
                _ => {
                    cache.remove(ip);
                }
            }
        }
        cache.check_invariants();
    }
}
