//! Hash finalizers shared across the cache, the 64-bit map, and the domain
//! set.
//!
//! `mix64` is the splitmix64-style finalizer both the cache and the 64-bit
//! map use, parameterized by a per-instance salt/factor instead of a fixed
//! constant so that calibration can retry with a fresh mix.

/// Default odd salt/factor pair, used as the initial seed before any
/// calibration retry.
pub const DEFAULT_RANDOM1: u64 = 0xA6C3_0966_57A1_4E89;
pub const DEFAULT_RANDOM2: u64 = 0x24F9_6356_9D05_D92E;

/// splitmix64-style finalizer: `(key ^ salt) * factor`, then the standard
/// two-round xorshift-multiply avalanche.
#[inline]
pub fn mix64(key: u64, salt: u64, factor: u64) -> u64 {
    let mut h = (key ^ salt).wrapping_mul(factor);
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    h = h.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    h ^= h >> 33;
    h
}

/// Derives the cuckoo cache's two candidate buckets from a single 64-bit
/// mix: `bucket1 = h & mask`, `bucket2 = (h >> bits) & mask`, where `bits`
/// is `capacity`'s bit-width plus one (because `hash_table_capacity == 2 *
/// capacity`).
#[inline]
pub fn two_buckets(ip: u32, salt: u64, factor: u64, capacity_bits: u32) -> (usize, usize) {
    let h = mix64(ip as u64, salt, factor);
    let bits = capacity_bits + 1;
    let mask = (1u64 << bits) - 1;
    let bucket1 = (h & mask) as usize;
    let bucket2 = ((h >> bits) & mask) as usize;
    (bucket1, bucket2)
}

/// Fast range reduction avoiding a division, used to map a hash into
/// `[0, n)` for the open-addressed cache and the domain set's bucket index.
#[inline]
pub fn fastmod_u32(h: u32, n: u32) -> u32 {
    (((h as u64) * (n as u64)) >> 32) as u32
}

/// Chained XXH3 hashing across a sequence of byte spans (domain labels):
/// each span is hashed with the running value as the seed, so reordering
/// or truncating the span sequence changes the result.
pub fn chained_xxh3<'a>(spans: impl IntoIterator<Item = &'a [u8]>, seed: u64) -> u64 {
    let mut h = seed;
    for span in spans {
        h = xxhash_rust::xxh3::xxh3_64_with_seed(span, h);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix64_is_deterministic_and_avalanches() {
        let a = mix64(1, DEFAULT_RANDOM1, DEFAULT_RANDOM2);
        let b = mix64(1, DEFAULT_RANDOM1, DEFAULT_RANDOM2);
        let c = mix64(2, DEFAULT_RANDOM1, DEFAULT_RANDOM2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn two_buckets_are_within_capacity() {
        let capacity_bits = 10; // capacity = 1024
        let (b1, b2) = two_buckets(0xC0A8_0001, DEFAULT_RANDOM1, DEFAULT_RANDOM2, capacity_bits);
        let table_len = 1usize << (capacity_bits + 1);
        assert!(b1 < table_len);
        assert!(b2 < table_len);
    }

    #[test]
    fn chained_hash_differs_by_label_order() {
        let a = chained_xxh3([b"www".as_ref(), b"example".as_ref(), b"com".as_ref()], 0);
        let b = chained_xxh3([b"com".as_ref(), b"example".as_ref(), b"www".as_ref()], 0);
        assert_ne!(a, b);
    }
}
