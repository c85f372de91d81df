//! Calibration machinery shared by [`crate::u64_map::U64Map`] and
//! [`crate::u64_set::U64Set`]: both are 4-way-bucketed, calibrated-factor
//! open-addressed tables over non-zero `u64` keys, differing only in
//! whether a value rides alongside each key.

use ahash::AHashSet;

use crate::error::{Error, Result};
use crate::hash::{mix64, DEFAULT_RANDOM1, DEFAULT_RANDOM2};

/// Bound on calibration retries. An un-perturbed `f1 = f2 = hash(keys[0])`
/// retry can cycle back to an already-failed factor pair on adversarial
/// input, so the attempt counter is folded into the reseed (see
/// `calibrate`) and the search is capped rather than left unbounded.
pub const MAX_CALIBRATION_ATTEMPTS: usize = 10_000;

/// `buckets = max(16, next_pow2(n) * 8)`.
pub fn buckets_for(n: usize) -> u64 {
    let next_pow2 = (n.max(1)).next_power_of_two() as u64;
    (next_pow2 * 8).max(16)
}

#[inline]
pub fn quartet_base(key: u64, f1: u64, f2: u64, mask: u64) -> usize {
    (mix64(key, f1, f2) & mask) as usize
}

/// Result of a successful calibration pass: the winning factor pair and
/// table size. Caller still owns placing entries (map vs. set differ in
/// what an entry holds).
pub struct Calibration {
    pub f1: u64,
    pub f2: u64,
    pub buckets: u64,
    pub mask: u64,
}

/// Runs a bounded retry-until-success search: `try_place` attempts one
/// full insertion pass with a given `(f1, f2, mask)` and returns `false`
/// on the first quartet overflow. On failure, factors are rederived as
/// `f1 = f2 = hash(keys[0] ^ attempt)` using the *previous* factors.
pub fn calibrate(keys: &[u64], mut try_place: impl FnMut(u64, u64, u64) -> bool) -> Result<Calibration> {
    if keys.is_empty() {
        return Err(Error::NoMasks);
    }
    let mut seen = AHashSet::with_capacity(keys.len());
    for &k in keys {
        if k == 0 {
            return Err(Error::BadValue);
        }
        if !seen.insert(k) {
            return Err(Error::BadValue);
        }
    }

    let buckets = buckets_for(keys.len());
    let mask = buckets - 4;
    let mut f1 = DEFAULT_RANDOM1;
    let mut f2 = DEFAULT_RANDOM2;

    for attempt in 0..MAX_CALIBRATION_ATTEMPTS {
        if try_place(f1, f2, mask) {
            return Ok(Calibration { f1, f2, buckets, mask });
        }
        let next = mix64(keys[0] ^ attempt as u64, f1, f2);
        f1 = next;
        f2 = next;
    }
    Err(Error::FailedToCalibrate)
}

/// Picks `count` synthetic non-zero keys that do not hash into `avoid_base`
/// under `(f1, f2, mask)`, for zero-key quartet seeding: the quartet that
/// key `0` itself would hash into must never be left empty, since lookups
/// treat an empty slot and a present key of `0` identically. `taken`
/// excludes every already-stored real key so a dummy can never collide
/// with one.
pub fn pick_dummy_keys(
    f1: u64,
    f2: u64,
    mask: u64,
    avoid_base: usize,
    count: usize,
    taken: &AHashSet<u64>,
) -> Vec<u64> {
    let mut out = Vec::with_capacity(count);
    let mut candidate = 1u64;
    while out.len() < count {
        if quartet_base(candidate, f1, f2, mask) != avoid_base && !taken.contains(&candidate) {
            out.push(candidate);
        }
        candidate += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_for_respects_minimum_and_power_of_two() {
        assert_eq!(buckets_for(0), 16);
        assert_eq!(buckets_for(1), 16);
        assert_eq!(buckets_for(2), 16);
        assert_eq!(buckets_for(3), 32);
        assert_eq!(buckets_for(16), 128);
    }
}
