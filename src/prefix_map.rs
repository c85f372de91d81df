//! Static longest-prefix-match map from IPv4 CIDR ranges to `u64` values.
//!
//! Built once by a sweep-line compiler into a strictly sorted list of
//! `(max_ip, value)` pairs covering `[0, 2^32)`, plus a 65536-entry jump
//! table keyed by the IP's high 16 bits that narrows any lookup to a linear
//! scan over a single `/16` window of the endpoint list.

use crate::arena::{align_up, check_place_mut};
use crate::error::{Error, Result};

/// Sentinel meaning "no prefix covers this IP".
pub const NO_VALUE: u64 = 0xFFFF_FFFF_FFFF_FFFF;

const HEADER_ALIGN: usize = 8;
const JUMP_TABLE_LEN: usize = 65_536;

#[repr(C)]
struct Header {
    list_size: u64,
}

const HEADER_SIZE: usize = std::mem::size_of::<Header>();

fn layout(n: usize) -> (usize, usize, usize, usize) {
    let max_ips_off = align_up(HEADER_SIZE, HEADER_ALIGN);
    let values_off = align_up(max_ips_off + n * 4, 8);
    let jump_off = values_off + n * 8;
    let total = align_up(jump_off + JUMP_TABLE_LEN * 4, HEADER_ALIGN);
    (max_ips_off, values_off, jump_off, total)
}

/// `ip XOR 0x8000_0000`, read back as `i32` so an ordinary signed
/// comparison sorts IPv4 addresses the way an unsigned comparison would.
#[inline]
fn xor_sign(ip: u32) -> i32 {
    (ip ^ 0x8000_0000) as i32
}

/// Required arena size, in bytes, for a prefix map built from `n` input
/// prefixes.
pub fn size_for(n: usize) -> usize {
    layout(n).3
}

/// One sweep-line event: the value becomes `value` starting at IP `pos`.
struct Event {
    pos: u64,
    value: u64,
}

struct OpenZone {
    end: u64,
    value: u64,
}

/// Runs a sweep-line compiler over already-validated prefixes (sorted by
/// `(start asc, cidr asc)`) and returns the final `(max_ip, value)` list,
/// still in natural (non-XOR'd) IP space.
fn compile_endpoints(mut prefixes: Vec<(u64, u64, u64)>) -> (Vec<u32>, Vec<u64>) {
    // Each prefix is (start, end_inclusive, value); `prefixes` is sorted by
    // (start, cidr) before this is called, which for CIDR blocks also sorts
    // by descending range size at equal start, i.e. outer zones first.
    let mut stack: Vec<OpenZone> = Vec::new();
    let mut events: Vec<Event> = vec![Event { pos: 0, value: NO_VALUE }];

    let current_value = |stack: &[OpenZone]| stack.last().map(|z| z.value).unwrap_or(NO_VALUE);

    // `prefixes` must already be sorted by (start asc, cidr asc) by the
    // caller; re-sorting here would discard the widest-range-first tie
    // break at equal starts that the stack discipline depends on.
    for (start, end, value) in prefixes.drain(..) {
        while let Some(top) = stack.last() {
            if top.end < start {
                let end_plus_one = stack.pop().unwrap().end + 1;
                events.push(Event {
                    pos: end_plus_one,
                    value: current_value(&stack),
                });
            } else {
                break;
            }
        }
        while let Some(top) = stack.last() {
            if top.end == start {
                stack.pop();
            } else {
                break;
            }
        }
        events.push(Event { pos: start, value });
        stack.push(OpenZone { end, value });
    }
    while let Some(top) = stack.pop() {
        events.push(Event {
            pos: top.end + 1,
            value: current_value(&stack),
        });
    }

    // Events are emitted in non-decreasing position order by construction
    // (see module tests); collapse runs sharing a position, keeping the
    // last value (the one still in force once the sweep reaches that IP).
    let mut deduped: Vec<Event> = Vec::with_capacity(events.len());
    for e in events {
        if let Some(last) = deduped.last_mut() {
            if last.pos == e.pos {
                last.value = e.value;
                continue;
            }
        }
        deduped.push(e);
    }

    let mut max_ips = Vec::with_capacity(deduped.len());
    let mut values = Vec::with_capacity(deduped.len());
    for w in deduped.windows(2) {
        max_ips.push((w[1].pos - 1) as u32);
        values.push(w[0].value);
    }
    max_ips.push(0xFFFF_FFFF);
    values.push(deduped.last().unwrap().value);
    (max_ips, values)
}

fn validate_prefix(ip: u32, cidr: u8, value: u64) -> Result<(u64, u64, u64)> {
    if !(1..=32).contains(&cidr) {
        return Err(Error::BadRange);
    }
    if value == NO_VALUE {
        return Err(Error::BadValue);
    }
    let host_bits = 32 - cidr as u32;
    if host_bits > 0 {
        let host_mask = (1u32 << host_bits) - 1;
        if ip & host_mask != 0 {
            return Err(Error::BadRange);
        }
    }
    let size = if host_bits == 32 { 1u64 << 32 } else { 1u64 << host_bits };
    let start = ip as u64;
    let end = start + size - 1;
    Ok((start, end, value))
}

/// Build-once longest-prefix-match map.
pub struct PrefixMap<'a> {
    max_ips: &'a [i32],
    values: &'a [u64],
    jump_table: &'a [u32],
}

impl<'a> PrefixMap<'a> {
    /// Compiles `(ips[i], cidrs[i], values[i])` for `i in 0..n` into a
    /// fresh longest-prefix-match map inside `buf`.
    pub fn compile(buf: &'a mut [u8], ips: &[u32], cidrs: &[u8], values: &[u64]) -> Result<Self> {
        let n = ips.len();
        if n != cidrs.len() || n != values.len() {
            return Err(Error::BadValue);
        }
        if n == 0 {
            return Err(Error::NoMasks);
        }

        let mut prefixes = Vec::with_capacity(n);
        for i in 0..n {
            prefixes.push(validate_prefix(ips[i], cidrs[i], values[i])?);
        }
        // Stable sort by (start, cidr) — cidr is recoverable from
        // `end - start`, smaller ranges (larger cidr) naturally sort after
        // larger ones at equal start because a wider range has a larger
        // `end`, not because of `cidr` directly, but the two orders agree
        // for well-formed CIDR blocks sharing a start.
        prefixes.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1).reverse()));

        let (raw_max_ips, raw_values) = compile_endpoints(prefixes);
        Self::place(buf, &raw_max_ips, &raw_values)
    }

    fn place(buf: &'a mut [u8], raw_max_ips: &[u32], raw_values: &[u64]) -> Result<Self> {
        let n = raw_max_ips.len();
        let (max_ips_off, values_off, jump_off, total) = layout(n);
        check_place_mut(buf, HEADER_ALIGN, total)?;

        let base = buf.as_mut_ptr();
        let header: &mut Header = unsafe { &mut *(base as *mut Header) };
        header.list_size = n as u64;

        let max_ips: &mut [i32] = unsafe {
            std::slice::from_raw_parts_mut(base.add(max_ips_off) as *mut i32, n)
        };
        let values: &mut [u64] = unsafe {
            std::slice::from_raw_parts_mut(base.add(values_off) as *mut u64, n)
        };
        for i in 0..n {
            max_ips[i] = xor_sign(raw_max_ips[i]);
            values[i] = raw_values[i];
        }

        let jump_table: &mut [u32] = unsafe {
            std::slice::from_raw_parts_mut(base.add(jump_off) as *mut u32, JUMP_TABLE_LEN)
        };
        // jump_table[h] = first index i with max_ips[i] >= (h << 16) - 1,
        // i.e. the segment covering the end of the *previous* /16 block.
        // Any IP inside block h resolves at this index or later, so
        // `find` can scan forward only.
        for (h, slot) in jump_table.iter_mut().enumerate() {
            if h == 0 {
                *slot = 0;
                continue;
            }
            let prev_block_end = ((h as u32) << 16).wrapping_sub(1);
            let target = xor_sign(prev_block_end);
            let idx = max_ips.partition_point(|&x| x < target);
            *slot = idx.min(n - 1) as u32;
        }

        Ok(Self {
            max_ips,
            values,
            jump_table,
        })
    }

    /// Returns the value of the most specific prefix covering `ip`, or
    /// [`NO_VALUE`] if none covers it.
    pub fn find(&self, ip: u32) -> u64 {
        let target = xor_sign(ip);
        let h = (ip >> 16) as usize;
        let mut idx = self.jump_table[h] as usize;
        while idx < self.max_ips.len() && self.max_ips[idx] < target {
            idx += 1;
        }
        if idx >= self.max_ips.len() {
            return NO_VALUE;
        }
        self.values[idx]
    }

    /// Number of stored `(max_ip, value)` segments.
    pub fn segment_count(&self) -> usize {
        self.max_ips.len()
    }

    /// Bytes required by [`Self::serialize`].
    pub fn serialized_size(&self) -> usize {
        8 + self.max_ips.len() * 4 + self.values.len() * 8
    }

    /// Writes the canonical wire format: `list_size: u64 | max_ips[n]: u32
    /// | values[n]: u64`, all host-endian. The jump table is not part of
    /// the serialized form; [`Self::deserialize`] recomputes it.
    pub fn serialize(&self, out: &mut [u8]) -> Result<()> {
        let needed = self.serialized_size();
        if out.len() < needed {
            return Err(Error::SmallPlace);
        }
        let n = self.max_ips.len() as u64;
        out[0..8].copy_from_slice(&n.to_ne_bytes());
        let mut off = 8;
        for &m in self.max_ips {
            out[off..off + 4].copy_from_slice(&(m as u32).to_ne_bytes());
            off += 4;
        }
        for &v in self.values {
            out[off..off + 8].copy_from_slice(&v.to_ne_bytes());
            off += 8;
        }
        Ok(())
    }

    /// Required arena size for [`Self::deserialize`] given a serialized
    /// byte count.
    pub fn place_size_from_serialized(bytes: &[u8]) -> Result<usize> {
        if bytes.len() < 8 {
            return Err(Error::BadValue);
        }
        let n = u64::from_ne_bytes(bytes[0..8].try_into().unwrap()) as usize;
        Ok(size_for(n))
    }

    /// Rebuilds a map from `serialize`'s output into `buf`.
    pub fn deserialize(buf: &'a mut [u8], bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::BadValue);
        }
        let n = u64::from_ne_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let needed = 8 + n * 4 + n * 8;
        if bytes.len() < needed {
            return Err(Error::BadValue);
        }
        let mut raw_max_ips = Vec::with_capacity(n);
        let mut off = 8;
        for _ in 0..n {
            let m = u32::from_ne_bytes(bytes[off..off + 4].try_into().unwrap());
            raw_max_ips.push(m ^ 0x8000_0000);
            off += 4;
        }
        let mut raw_values = Vec::with_capacity(n);
        for _ in 0..n {
            raw_values.push(u64::from_ne_bytes(bytes[off..off + 8].try_into().unwrap()));
            off += 8;
        }
        Self::place(buf, &raw_max_ips, &raw_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_prefixes_resolve_to_the_narrowest_match() {
        let ips = [0x0A00_0000u32, 0x0A01_0000, 0x0A01_0200];
        let cidrs = [8u8, 16, 24];
        let values = [1u64, 2, 3];
        let mut buf = vec![0u8; size_for(3)];
        let map = PrefixMap::compile(&mut buf, &ips, &cidrs, &values).unwrap();

        assert_eq!(map.find(0x0A00_0001), 1); // 10.0.0.1
        assert_eq!(map.find(0x0A01_0001), 2); // 10.1.0.1
        assert_eq!(map.find(0x0A01_0203), 3); // 10.1.2.3
        assert_eq!(map.find(0x0A02_0001), 1); // 10.2.0.1
        assert_eq!(map.find(0x0B00_0000), NO_VALUE); // 11.0.0.0
    }

    #[test]
    fn boundary_ips_around_sign_flip() {
        let ips = [0u32];
        let cidrs = [1u8];
        let values = [7u64];
        let mut buf = vec![0u8; size_for(1)];
        let map = PrefixMap::compile(&mut buf, &ips, &cidrs, &values).unwrap();
        assert_eq!(map.find(0x7FFF_FFFF), 7);
        assert_eq!(map.find(0x8000_0000), NO_VALUE);
    }

    #[test]
    fn total_coverage_over_sampled_space() {
        let ips = [0x0A00_0000u32, 0xC0A8_0000];
        let cidrs = [8u8, 16];
        let values = [1u64, 2];
        let mut buf = vec![0u8; size_for(2)];
        let map = PrefixMap::compile(&mut buf, &ips, &cidrs, &values).unwrap();
        for ip in [0u32, 0x09FF_FFFF, 0x0A00_0000, 0x0AFF_FFFF, 0x0B00_0000, 0xC0A8_0000, 0xC0A8_FFFF, 0xC0A9_0000, 0xFFFF_FFFF] {
            let v = map.find(ip);
            let expect = if (0x0A00_0000..=0x0AFF_FFFF).contains(&ip) {
                1
            } else if (0xC0A8_0000..=0xC0A8_FFFF).contains(&ip) {
                2
            } else {
                NO_VALUE
            };
            assert_eq!(v, expect, "ip {ip:#010x}");
        }
    }

    #[test]
    fn rejects_bad_range_and_sentinel_value() {
        let mut buf = vec![0u8; size_for(1)];
        assert_eq!(
            PrefixMap::compile(&mut buf, &[1], &[8], &[1]).unwrap_err(),
            Error::BadRange
        );
        assert_eq!(
            PrefixMap::compile(&mut buf, &[0], &[33], &[1]).unwrap_err(),
            Error::BadRange
        );
        assert_eq!(
            PrefixMap::compile(&mut buf, &[0], &[8], &[NO_VALUE]).unwrap_err(),
            Error::BadValue
        );
    }

    #[test]
    fn round_trip_serialize_deserialize() {
        let ips = [0x0A00_0000u32, 0x0A01_0000, 0x0A01_0200];
        let cidrs = [8u8, 16, 24];
        let values = [1u64, 2, 3];
        let mut buf = vec![0u8; size_for(3)];
        let map = PrefixMap::compile(&mut buf, &ips, &cidrs, &values).unwrap();

        let mut bytes = vec![0u8; map.serialized_size()];
        map.serialize(&mut bytes).unwrap();

        let required = PrefixMap::place_size_from_serialized(&bytes).unwrap();
        let mut buf2 = vec![0u8; required];
        let map2 = PrefixMap::deserialize(&mut buf2, &bytes).unwrap();

        for ip in [0x0A00_0001u32, 0x0A01_0001, 0x0A01_0203, 0x0A02_0001, 0x0B00_0000] {
            assert_eq!(map.find(ip), map2.find(ip));
        }
    }
}
