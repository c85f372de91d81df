//! Open-addressed LRU cache variant.
//!
//! Arena layout: an 8-byte-aligned [`OpenHeader`], followed by the element
//! arena (`capacity` [`Element`] records), followed by the hash table
//! (`capacity * 2^speed` `u32` element indices). The hash table never
//! exceeds 50% load factor, which bounds the open-addressing probe length.

use super::element::{Element, NULL};
use super::{AddOutcome, RemoveOutcome};
use crate::arena::{align_up, check_place_mut};
use crate::error::{Error, Result};
use crate::hash::{mix64, DEFAULT_RANDOM1, DEFAULT_RANDOM2};

const HEADER_ALIGN: usize = 8;

#[repr(C)]
struct OpenHeader {
    capacity: u32,
    speed: u32,
    table_mask: u32,
    len: u32,
    head: u32,
    tail: u32,
    free_head: u32,
    _pad: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<OpenHeader>();
const _: () = assert!(HEADER_SIZE == 32);

fn validate_capacity_speed(capacity: u32, speed: u32) -> Result<()> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(Error::BadSize);
    }
    if capacity - 1 == NULL {
        return Err(Error::BadSize);
    }
    if !(1..=5).contains(&speed) {
        return Err(Error::BadSize);
    }
    Ok(())
}

fn table_len(capacity: u32, speed: u32) -> u32 {
    capacity << speed
}

fn layout(capacity: u32, speed: u32) -> (usize, usize, usize) {
    let elements_off = align_up(HEADER_SIZE, HEADER_ALIGN);
    let table_off = elements_off + capacity as usize * std::mem::size_of::<Element>();
    let total = table_off + table_len(capacity, speed) as usize * std::mem::size_of::<u32>();
    (elements_off, table_off, align_up(total, HEADER_ALIGN))
}

/// Required arena size, in bytes, for a cache of the given `capacity` and
/// `speed`.
pub fn size_for(capacity: u32, speed: u32) -> Result<usize> {
    validate_capacity_speed(capacity, speed)?;
    let (_, _, total) = layout(capacity, speed);
    Ok(total)
}

#[inline]
fn natural_bucket(ip: u32, mask: u32) -> u32 {
    (mix64(ip as u64, DEFAULT_RANDOM1, DEFAULT_RANDOM2) as u32) & mask
}

/// Handle aliasing into a caller-provided arena.
pub struct OpenCache<'a> {
    header: &'a mut OpenHeader,
    elements: &'a mut [Element],
    table: &'a mut [u32],
}

impl<'a> OpenCache<'a> {
    /// Lays out a fresh, empty cache inside `buf`.
    pub fn init(buf: &'a mut [u8], capacity: u32, speed: u32) -> Result<Self> {
        validate_capacity_speed(capacity, speed)?;
        let (elements_off, table_off, total) = layout(capacity, speed);
        check_place_mut(buf, HEADER_ALIGN, total)?;

        // Borrow the three sibling regions through one raw base pointer so
        // they can coexist as disjoint `&mut` fields for the struct's own
        // lifetime, rather than three sequential reborrows of `buf`.
        let base = buf.as_mut_ptr();
        let header: &mut OpenHeader = unsafe { &mut *(base as *mut OpenHeader) };
        let elements: &mut [Element] = unsafe {
            std::slice::from_raw_parts_mut(base.add(elements_off) as *mut Element, capacity as usize)
        };
        let table: &mut [u32] = unsafe {
            std::slice::from_raw_parts_mut(
                base.add(table_off) as *mut u32,
                table_len(capacity, speed) as usize,
            )
        };

        header.capacity = capacity;
        header.speed = speed;
        header.table_mask = table_len(capacity, speed) - 1;
        header.len = 0;
        header.head = NULL;
        header.tail = NULL;
        header.free_head = 0;

        for (i, e) in elements.iter_mut().enumerate() {
            *e = Element::EMPTY;
            e.next = if i as u32 + 1 == capacity {
                NULL
            } else {
                i as u32 + 1
            };
        }
        table.fill(NULL);

        Ok(Self {
            header,
            elements,
            table,
        })
    }

    fn hash_bucket(&self, ip: u32) -> usize {
        (natural_bucket(ip, self.header.table_mask)) as usize
    }

    fn probe_find(&self, ip: u32) -> Option<usize> {
        let mask = self.table.len() - 1;
        let mut idx = self.hash_bucket(ip) & mask;
        for _ in 0..self.table.len() {
            let cell = self.table[idx];
            if cell == NULL {
                return None;
            }
            if self.elements[cell as usize].ip == ip {
                return Some(idx);
            }
            idx = (idx + 1) & mask;
        }
        None
    }

    /// Robin-Hood insertion of `elem_idx` (whose `.ip` is already set) into
    /// the hash table, swapping entries whose probe distance is shorter
    /// than the one being inserted so the cluster invariant holds.
    fn hash_insert(&mut self, mut elem_idx: u32) {
        let mask = self.table.len() - 1;
        let mut idx = self.hash_bucket(self.elements[elem_idx as usize].ip) & mask;
        let mut dist: usize = 0;
        loop {
            let cell = self.table[idx];
            if cell == NULL {
                self.table[idx] = elem_idx;
                return;
            }
            let cell_ip = self.elements[cell as usize].ip;
            let cell_home = self.hash_bucket(cell_ip) & mask;
            let cell_dist = idx.wrapping_sub(cell_home) & mask;
            if cell_dist < dist {
                self.table[idx] = elem_idx;
                elem_idx = cell;
                dist = cell_dist;
            }
            idx = (idx + 1) & mask;
            dist += 1;
        }
    }

    /// Backward-shift deletion: empties `slot`, then pulls later entries
    /// back across the gap as long as doing so would not move them before
    /// their own natural bucket.
    fn hash_delete_at(&mut self, slot: usize) {
        let mask = self.table.len() - 1;
        let mut hole = slot;
        self.table[hole] = NULL;
        loop {
            let next = (hole + 1) & mask;
            let cell = self.table[next];
            if cell == NULL {
                return;
            }
            let home = self.hash_bucket(self.elements[cell as usize].ip) as usize & mask;
            if home == next {
                return;
            }
            self.table[hole] = cell;
            self.table[next] = NULL;
            hole = next;
        }
    }

    fn list_unlink(&mut self, idx: u32) {
        let (prev, next) = (self.elements[idx as usize].prev, self.elements[idx as usize].next);
        if prev == NULL {
            self.header.head = next;
        } else {
            self.elements[prev as usize].next = next;
        }
        if next == NULL {
            self.header.tail = prev;
        } else {
            self.elements[next as usize].prev = prev;
        }
        self.header.len -= 1;
    }

    fn list_push_front(&mut self, idx: u32) {
        let old_head = self.header.head;
        self.elements[idx as usize].prev = NULL;
        self.elements[idx as usize].next = old_head;
        if old_head == NULL {
            self.header.tail = idx;
        } else {
            self.elements[old_head as usize].prev = idx;
        }
        self.header.head = idx;
        self.header.len += 1;
    }

    fn promote(&mut self, idx: u32) {
        if self.header.head == idx {
            return;
        }
        self.list_unlink(idx);
        self.list_push_front(idx);
    }

    fn take_free(&mut self) -> Option<u32> {
        let idx = self.header.free_head;
        if idx == NULL {
            return None;
        }
        self.header.free_head = self.elements[idx as usize].next;
        Some(idx)
    }

    fn push_free(&mut self, idx: u32) {
        self.elements[idx as usize].next = self.header.free_head;
        self.header.free_head = idx;
    }

    /// Inserts or updates `ip` with `value`, promoting it to newest.
    pub fn add(&mut self, ip: u32, value: u32) -> AddOutcome {
        if let Some(slot) = self.probe_find(ip) {
            let idx = self.table[slot];
            self.elements[idx as usize].value = value;
            self.promote(idx);
            return AddOutcome {
                existed: true,
                ..Default::default()
            };
        }

        let (idx, evicted) = match self.take_free() {
            Some(idx) => (idx, None),
            None => {
                let tail = self.header.tail;
                let evicted_ip = self.elements[tail as usize].ip;
                let evicted_value = self.elements[tail as usize].value;
                if let Some(slot) = self.probe_find(evicted_ip) {
                    self.hash_delete_at(slot);
                }
                self.list_unlink(tail);
                (tail, Some((evicted_ip, evicted_value)))
            }
        };

        self.elements[idx as usize].ip = ip;
        self.elements[idx as usize].value = value;
        self.list_push_front(idx);
        self.hash_insert(idx);

        match evicted {
            Some((evicted_ip, evicted_value)) => AddOutcome {
                existed: false,
                evicted: true,
                evicted_ip,
                evicted_value,
            },
            None => AddOutcome::default(),
        }
    }

    /// Looks up `ip`, promoting it to newest on a hit.
    pub fn has(&mut self, ip: u32) -> (bool, u32) {
        match self.probe_find(ip) {
            Some(slot) => {
                let idx = self.table[slot];
                let value = self.elements[idx as usize].value;
                self.promote(idx);
                (true, value)
            }
            None => (false, 0),
        }
    }

    /// Removes `ip` if present; a no-op otherwise.
    pub fn remove(&mut self, ip: u32) -> RemoveOutcome {
        match self.probe_find(ip) {
            Some(slot) => {
                let idx = self.table[slot];
                let value = self.elements[idx as usize].value;
                self.hash_delete_at(slot);
                self.list_unlink(idx);
                self.push_free(idx);
                RemoveOutcome {
                    existed: true,
                    existed_value: value,
                }
            }
            None => RemoveOutcome::default(),
        }
    }

    /// Returns the number of keys currently stored.
    pub fn len(&self) -> u32 {
        self.header.len
    }

    pub fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    pub fn capacity(&self) -> u32 {
        self.header.capacity
    }

    /// Returns keys newest-to-oldest. Intended for tests: walking the list
    /// also exercises every `prev`/`next` link, so a corrupted list panics
    /// or loops rather than silently returning a short dump.
    pub fn dump(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.header.len as usize);
        let mut idx = self.header.head;
        let mut prev = NULL;
        while idx != NULL {
            assert_eq!(self.elements[idx as usize].prev, prev, "broken prev link");
            out.push(self.elements[idx as usize].ip);
            prev = idx;
            idx = self.elements[idx as usize].next;
        }
        assert_eq!(prev, self.header.tail, "tail mismatch after walk");
        assert_eq!(out.len() as u32, self.header.len, "len mismatch after walk");
        out
    }

    /// Validates every structural invariant of the cache (list linkage,
    /// hash-table placement, free-list membership). Intended for tests,
    /// not the runtime hot path.
    pub fn check_invariants(&self) {
        let dumped = self.dump();
        assert_eq!(dumped.len() as u32 + self.free_len(), self.header.capacity);
        for ip in &dumped {
            let (found, _) = {
                let slot = self.probe_find(*ip);
                (slot.is_some(), slot)
            };
            assert!(found, "stored key {ip:#x} not resolvable via hash table");
        }
    }

    fn free_len(&self) -> u32 {
        let mut n = 0u32;
        let mut idx = self.header.free_head;
        while idx != NULL {
            n += 1;
            idx = self.elements[idx as usize].next;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(capacity: u32, speed: u32) -> Vec<u8> {
        vec![0u8; size_for(capacity, speed).unwrap()]
    }

    #[test]
    fn size_for_rejects_bad_args() {
        assert_eq!(size_for(3, 1), Err(Error::BadSize));
        assert_eq!(size_for(4, 0), Err(Error::BadSize));
        assert_eq!(size_for(4, 6), Err(Error::BadSize));
    }

    #[test]
    fn filling_capacity_then_adding_evicts_the_oldest_key() {
        let mut buf = make(4, 1);
        let mut cache = OpenCache::init(&mut buf, 4, 1).unwrap();
        for ip in 1..=4u32 {
            let r = cache.add(ip, ip * 10);
            assert!(!r.evicted);
        }
        let r = cache.add(5, 50);
        assert!(r.evicted);
        assert_eq!(r.evicted_ip, 1);
        assert_eq!(r.evicted_value, 10);

        assert_eq!(cache.has(1).0, false);
        for ip in 2..=5u32 {
            assert!(cache.has(ip).0);
        }
        assert_eq!(cache.dump(), vec![5, 4, 3, 2]);
    }

    #[test]
    fn touching_a_key_promotes_it_to_newest() {
        let mut buf = make(4, 1);
        let mut cache = OpenCache::init(&mut buf, 4, 1).unwrap();
        for ip in 1..=4u32 {
            cache.add(ip, ip);
        }
        cache.add(5, 5);
        assert_eq!(cache.dump(), vec![5, 4, 3, 2]);
        let (found, value) = cache.has(3);
        assert!(found);
        assert_eq!(value, 3);
        assert_eq!(cache.dump(), vec![3, 5, 4, 2]);
    }

    #[test]
    fn remove_then_reinsert_reuses_slot() {
        let mut buf = make(4, 1);
        let mut cache = OpenCache::init(&mut buf, 4, 1).unwrap();
        for ip in 1..=4u32 {
            cache.add(ip, ip);
        }
        let r = cache.remove(2);
        assert!(r.existed);
        assert_eq!(r.existed_value, 2);
        assert!(!cache.has(2).0);

        let r = cache.add(5, 5);
        assert!(!r.evicted);
        cache.check_invariants();
    }

    #[test]
    fn stress_random_ops_preserve_invariants() {
        let mut buf = make(16, 2);
        let mut cache = OpenCache::init(&mut buf, 16, 2).unwrap();
        let mut state: u64 = 0x1234_5678;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        for _ in 0..2000 {
            let ip = (next() % 64) as u32 + 1;
            match next() % 3 {
                0 => {
                    cache.add(ip, ip);
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
