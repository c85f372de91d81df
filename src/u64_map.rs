//! Static calibrated-hash `u64 -> u64` map.
//!
//! A 64-byte-aligned arena holding the winning `(f1, f2)` factor pair, the
//! table size, and a flat `(key, value)` table grouped into 4-way quartets:
//! key `k` may occupy any of the 4 slots starting at `hash(k) & mask`. Key
//! `0` is the empty-slot sentinel and is never a valid input key.

use ahash::AHashSet;

use crate::arena::{align_up, check_place_mut};
use crate::error::{Error, Result};
use crate::u64_common::{calibrate, pick_dummy_keys, quartet_base};

const HEADER_ALIGN: usize = 64;

#[repr(C)]
struct Header {
    f1: u64,
    f2: u64,
    buckets: u64,
    _pad: u64,
}

const HEADER_SIZE: usize = std::mem::size_of::<Header>();
const _: () = assert!(HEADER_SIZE == 32);
const ENTRY_SIZE: usize = 16;

fn layout(buckets: u64) -> (usize, usize) {
    let table_bytes = buckets as usize * ENTRY_SIZE;
    let total = align_up(HEADER_SIZE + table_bytes, HEADER_ALIGN);
    (HEADER_SIZE, total)
}

/// Required arena size, in bytes, for a map built from `n` keys.
pub fn size_for(n: usize) -> usize {
    let buckets = crate::u64_common::buckets_for(n);
    layout(buckets).1
}

/// Build-once `u64 -> u64` map with constant-time point lookups.
pub struct U64Map<'a> {
    header: &'a mut Header,
    table: &'a mut [(u64, u64)],
}

impl<'a> U64Map<'a> {
    /// Compiles `keys[i] -> values[i]` into a fresh map inside `buf`. Keys
    /// must be unique and non-zero; values must be non-zero.
    pub fn compile(buf: &'a mut [u8], keys: &[u64], values: &[u64]) -> Result<Self> {
        if keys.len() != values.len() {
            return Err(Error::BadValue);
        }
        if values.iter().any(|&v| v == 0) {
            return Err(Error::BadValue);
        }

        let buckets = crate::u64_common::buckets_for(keys.len());
        let mut scratch: Vec<(u64, u64)> = vec![(0, 0); buckets as usize];
        // `calibrate` calls `try_place` once per attempt and returns
        // immediately on the first success, so `scratch` holds the winning
        // placement by the time `calibrate` returns `Ok`.
        let calib = calibrate(keys, |f1, f2, mask| {
            for cell in scratch.iter_mut() {
                *cell = (0, 0);
            }
            for (&k, &v) in keys.iter().zip(values.iter()) {
                let base = quartet_base(k, f1, f2, mask);
                let mut placed = false;
                for off in 0..4 {
                    if scratch[base + off].0 == 0 {
                        scratch[base + off] = (k, v);
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    return false;
                }
            }
            true
        })?;

        let taken: AHashSet<u64> = keys.iter().copied().collect();
        let avoid_base = quartet_base(0, calib.f1, calib.f2, calib.mask);
        let empties: Vec<usize> = (0..4)
            .map(|off| avoid_base + off)
            .filter(|&idx| scratch[idx].0 == 0)
            .collect();
        if !empties.is_empty() {
            let dummies = pick_dummy_keys(calib.f1, calib.f2, calib.mask, avoid_base, empties.len(), &taken);
            for (idx, dummy) in empties.into_iter().zip(dummies.into_iter()) {
                scratch[idx] = (dummy, dummy);
            }
        }

        Self::place(buf, calib.f1, calib.f2, calib.buckets, &scratch)
    }

    fn place(buf: &'a mut [u8], f1: u64, f2: u64, buckets: u64, entries: &[(u64, u64)]) -> Result<Self> {
        let (table_off, total) = layout(buckets);
        check_place_mut(buf, HEADER_ALIGN, total)?;

        let base = buf.as_mut_ptr();
        let header: &mut Header = unsafe { &mut *(base as *mut Header) };
        header.f1 = f1;
        header.f2 = f2;
        header.buckets = buckets;
        header._pad = 0;

        let table: &mut [(u64, u64)] = unsafe {
            std::slice::from_raw_parts_mut(base.add(table_off) as *mut (u64, u64), buckets as usize)
        };
        table.copy_from_slice(entries);

        Ok(Self { header, table })
    }

    /// Returns the value stored for `key`, or `0` if absent (or if `key`
    /// is the forbidden sentinel `0`).
    pub fn find(&self, key: u64) -> u64 {
        if key == 0 {
            return 0;
        }
        let mask = self.header.buckets - 4;
        let base = quartet_base(key, self.header.f1, self.header.f2, mask);
        for off in 0..4 {
            let (k, v) = self.table[base + off];
            if k == key {
                return v;
            }
        }
        0
    }

    pub fn bucket_count(&self) -> u64 {
        self.header.buckets
    }

    /// Bytes required by [`Self::serialize`]: the canonical wire format is
    /// exactly the in-memory header and table, with no extra padding.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + self.table.len() * ENTRY_SIZE
    }

    /// Writes `f1: u64 | f2: u64 | buckets: u64 | pad: u64 | table[buckets]:
    /// (u64, u64)`, host-endian.
    pub fn serialize(&self, out: &mut [u8]) -> Result<()> {
        let needed = self.serialized_size();
        if out.len() < needed {
            return Err(Error::SmallPlace);
        }
        out[0..8].copy_from_slice(&self.header.f1.to_ne_bytes());
        out[8..16].copy_from_slice(&self.header.f2.to_ne_bytes());
        out[16..24].copy_from_slice(&self.header.buckets.to_ne_bytes());
        out[24..32].copy_from_slice(&0u64.to_ne_bytes());
        let mut off = HEADER_SIZE;
        for &(k, v) in self.table.iter() {
            out[off..off + 8].copy_from_slice(&k.to_ne_bytes());
            out[off + 8..off + 16].copy_from_slice(&v.to_ne_bytes());
            off += 16;
        }
        Ok(())
    }

    /// Required arena size for [`Self::deserialize`] given a serialized
    /// byte count.
    pub fn place_size_from_serialized(bytes: &[u8]) -> Result<usize> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::BadValue);
        }
        let buckets = u64::from_ne_bytes(bytes[16..24].try_into().unwrap());
        Ok(layout(buckets).1)
    }

    /// Rebuilds a map from `serialize`'s output into `buf`.
    pub fn deserialize(buf: &'a mut [u8], bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::BadValue);
        }
        let f1 = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
        let f2 = u64::from_ne_bytes(bytes[8..16].try_into().unwrap());
        let buckets = u64::from_ne_bytes(bytes[16..24].try_into().unwrap());
        if buckets < 16 || buckets % 4 != 0 {
            return Err(Error::BadValue);
        }
        let (table_off, _) = layout(buckets);
        let needed = table_off + buckets as usize * ENTRY_SIZE;
        if bytes.len() < needed {
            return Err(Error::BadValue);
        }
        let mut entries = Vec::with_capacity(buckets as usize);
        let mut off = table_off;
        for _ in 0..buckets {
            let k = u64::from_ne_bytes(bytes[off..off + 8].try_into().unwrap());
            let v = u64::from_ne_bytes(bytes[off + 8..off + 16].try_into().unwrap());
            entries.push((k, v));
            off += 16;
        }
        Self::place(buf, f1, f2, buckets, &entries)
    }
}
