//! Static calibrated-hash `u64` membership set.
//!
//! Same calibration and 4-way quartet scheme as [`crate::u64_map::U64Map`],
//! but the serialized and in-memory table holds bare keys rather than
//! `(key, value)` pairs, since membership queries never need a payload.

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
const ENTRY_SIZE: usize = 8;

fn layout(buckets: u64) -> (usize, usize) {
    let table_bytes = buckets as usize * ENTRY_SIZE;
    let total = align_up(HEADER_SIZE + table_bytes, HEADER_ALIGN);
    (HEADER_SIZE, total)
}

/// Required arena size, in bytes, for a set built from `n` keys.
pub fn size_for(n: usize) -> usize {
    let buckets = crate::u64_common::buckets_for(n);
    layout(buckets).1
}

/// Build-once `u64` membership set with constant-time lookups.
pub struct U64Set<'a> {
    header: &'a mut Header,
    table: &'a mut [u64],
}

impl<'a> U64Set<'a> {
    /// Compiles `keys` into a fresh set inside `buf`. Keys must be unique
    /// and non-zero.
    pub fn compile(buf: &'a mut [u8], keys: &[u64]) -> Result<Self> {
        let buckets = crate::u64_common::buckets_for(keys.len());
        let mut scratch: Vec<u64> = vec![0; buckets as usize];
        let calib = calibrate(keys, |f1, f2, mask| {
            for cell in scratch.iter_mut() {
                *cell = 0;
            }
            for &k in keys.iter() {
                let base = quartet_base(k, f1, f2, mask);
                let mut placed = false;
                for off in 0..4 {
                    if scratch[base + off] == 0 {
                        scratch[base + off] = k;
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
            .filter(|&idx| scratch[idx] == 0)
            .collect();
        if !empties.is_empty() {
            let dummies = pick_dummy_keys(calib.f1, calib.f2, calib.mask, avoid_base, empties.len(), &taken);
            for (idx, dummy) in empties.into_iter().zip(dummies.into_iter()) {
                scratch[idx] = dummy;
            }
        }

        Self::place(buf, calib.f1, calib.f2, calib.buckets, &scratch)
    }

    fn place(buf: &'a mut [u8], f1: u64, f2: u64, buckets: u64, entries: &[u64]) -> Result<Self> {
        let (table_off, total) = layout(buckets);
        check_place_mut(buf, HEADER_ALIGN, total)?;

        let base = buf.as_mut_ptr();
        let header: &mut Header = unsafe { &mut *(base as *mut Header) };
        header.f1 = f1;
        header.f2 = f2;
        header.buckets = buckets;
        header._pad = 0;

        let table: &mut [u64] =
            unsafe { std::slice::from_raw_parts_mut(base.add(table_off) as *mut u64, buckets as usize) };
        table.copy_from_slice(entries);

        Ok(Self { header, table })
    }

    /// Whether `key` was one of the keys compiled into this set. `0` is
    /// never a member.
    pub fn has(&self, key: u64) -> bool {
        if key == 0 {
            return false;
        }
        let mask = self.header.buckets - 4;
        let base = quartet_base(key, self.header.f1, self.header.f2, mask);
        self.table[base..base + 4].contains(&key)
    }

    pub fn bucket_count(&self) -> u64 {
        self.header.buckets
    }

    /// Bytes required by [`Self::serialize`]: the in-memory header and
    /// table, with no extra padding.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + self.table.len() * ENTRY_SIZE
    }

    /// Writes `f1: u64 | f2: u64 | buckets: u64 | pad: u64 | table[buckets]:
    /// u64`, host-endian.
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
        for &k in self.table.iter() {
            out[off..off + 8].copy_from_slice(&k.to_ne_bytes());
            off += 8;
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

    /// Rebuilds a set from `serialize`'s output into `buf`.
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
            entries.push(u64::from_ne_bytes(bytes[off..off + 8].try_into().unwrap()));
            off += 8;
        }
        Self::place(buf, f1, f2, buckets, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_membership() {
        let keys = [0x1234u64, 0x5678, 0x9ABC];
        let mut buf = vec![0u8; size_for(3)];
        let set = U64Set::compile(&mut buf, &keys).unwrap();
        for k in keys {
            assert!(set.has(k));
        }
        assert!(!set.has(0));
        assert!(!set.has(0xDEAD));
    }

    #[test]
    fn rejects_zero_and_duplicate_keys() {
        let mut buf = vec![0u8; size_for(1)];
        assert_eq!(U64Set::compile(&mut buf, &[0]).unwrap_err(), Error::BadValue);
        let mut buf = vec![0u8; size_for(2)];
        assert_eq!(U64Set::compile(&mut buf, &[7, 7]).unwrap_err(), Error::BadValue);
    }

    #[test]
    fn holds_every_key_in_a_larger_set() {
        let keys: Vec<u64> = (1..=200u64).map(|i| i * 0x1000_0001).collect();
        let mut buf = vec![0u8; size_for(keys.len())];
        let set = U64Set::compile(&mut buf, &keys).unwrap();
        for k in &keys {
            assert!(set.has(*k));
        }
    }

    #[test]
    fn round_trip_serialize_deserialize() {
        let keys = [10u64, 20, 30, 40];
        let mut buf = vec![0u8; size_for(4)];
        let set = U64Set::compile(&mut buf, &keys).unwrap();
        let mut bytes = vec![0u8; set.serialized_size()];
        set.serialize(&mut bytes).unwrap();

        let required = U64Set::place_size_from_serialized(&bytes).unwrap();
        let mut buf2 = vec![0u8; required];
        let set2 = U64Set::deserialize(&mut buf2, &bytes).unwrap();
        for k in keys {
            assert_eq!(set.has(k), set2.has(k));
        }
        assert!(!set2.has(999));
    }
}
