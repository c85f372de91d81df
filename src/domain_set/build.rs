//! Compile-time planning: input normalization, ancestor pruning, popular-
//! suffix discovery, bucket calibration, and blob layout.
//!
//! [`plan`] does the entire compile-time computation and returns a
//! self-contained [`Plan`] that both `size_for` (which only needs the sizes)
//! and `compile` (which also needs the contents) can consume, so the two
//! never disagree about how large a buffer `compile` will need.

use ahash::{AHashMap, AHashSet};

use super::label;
use super::scan;
use super::{BLOB_TAIL_PAD, D, GROWTH_STEPS, HEADER_SIZE, MAX_DOMAIN_LEN, POPULAR_CAP, RECORD_SIZE, SEED_ATTEMPTS_PER_STEP};
use crate::arena::align_up;
use crate::error::{Error, Result};

const SEED_STARTER: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Clone, Copy, Default)]
pub(crate) struct RecordPlan {
    pub tags: [u16; 16],
    pub offsets: [u8; 16],
    pub used_slots: u8,
    pub max_scans: u8,
    pub blob_base_offset: u32,
}

pub(crate) struct Plan {
    pub buckets: u64,
    pub seed: u64,
    pub popular_records: Vec<RecordPlan>,
    pub domain_records: Vec<RecordPlan>,
    pub popular_count: u32,
    pub blob: Vec<u8>,
}

impl Plan {
    pub fn required_arena_size(&self) -> usize {
        let popular_bytes = self.popular_records.len() * RECORD_SIZE;
        let domain_bytes = self.domain_records.len() * RECORD_SIZE;
        align_up(HEADER_SIZE + popular_bytes + domain_bytes + self.blob.len(), 64)
    }
}

/// Runs the whole build pipeline over raw caller-supplied patterns.
pub(crate) fn plan(patterns: &[&str]) -> Result<Plan> {
    let normalized: Vec<String> = patterns.iter().map(|p| normalize_pattern(p)).collect::<Result<_>>()?;
    let domains = prune(normalized);

    let popular_suffixes = find_popular_suffixes(&domains)?;
    let popular_set: AHashSet<String> = popular_suffixes.iter().cloned().collect();

    let (buckets, seed, bucket_lists) = calibrate_table(&domains, &popular_set)?;

    let mut domain_records = vec![RecordPlan::default(); buckets as usize];
    let mut domain_chunks: Vec<Vec<String>> = Vec::with_capacity(buckets as usize);
    for (bucket_idx, indices) in bucket_lists.iter().enumerate() {
        let mut chunk = Vec::with_capacity(indices.len());
        let mut max_scans = 0u8;
        let rec = &mut domain_records[bucket_idx];
        for (slot, &domain_idx) in indices.iter().enumerate() {
            let d = &domains[domain_idx];
            let (_, tag, scans) = bucket_and_tag(d, seed, &popular_set, buckets);
            rec.tags[slot] = tag;
            max_scans = max_scans.max(scans);
            chunk.push(d.clone());
        }
        rec.used_slots = indices.len() as u8;
        rec.max_scans = max_scans;
        domain_chunks.push(chunk);
    }

    let mut popular_records = Vec::new();
    let mut popular_chunks: Vec<Vec<String>> = Vec::new();
    for chunk in popular_suffixes.chunks(D) {
        let mut rec = RecordPlan::default();
        rec.used_slots = chunk.len() as u8;
        for (slot, suffix) in chunk.iter().enumerate() {
            let labels = label::labels_rtl(suffix);
            let chain = label::hash_chain(&labels, seed);
            rec.tags[slot] = label::tag_of(*chain.last().unwrap());
        }
        popular_records.push(rec);
        popular_chunks.push(chunk.to_vec());
    }

    let blob = lay_out_blob(&popular_chunks, &domain_chunks, &mut popular_records, &mut domain_records)?;

    Ok(Plan {
        buckets,
        seed,
        popular_records,
        domain_records,
        popular_count: popular_suffixes.len() as u32,
        blob,
    })
}

/// Trims a trailing dot, rejects empty/oversize/invalid-character input,
/// lowercases, and rejects top-level-only domains (no label separator).
/// Shared with query-time normalization in [`super::normalize_query`] so
/// both sides fold case and trailing dots identically.
pub(crate) fn normalize_pattern(raw: &str) -> Result<String> {
    let trimmed = raw.trim_end_matches('.');
    if trimmed.is_empty() || trimmed.len() > MAX_DOMAIN_LEN {
        return Err(Error::BadValue);
    }
    let mut buf = vec![0u8; trimmed.len()];
    if !scan::lowercase_and_validate(trimmed.as_bytes(), &mut buf) {
        return Err(Error::BadValue);
    }
    let s = String::from_utf8(buf).expect("validated ASCII is valid UTF-8");
    if !s.contains('.') {
        return Err(Error::TopLevelDomain);
    }
    Ok(s)
}

/// Sorts by reversed-character order so every domain's ancestors sort
/// immediately before it, then keeps the first occurrence of each distinct
/// suffix chain and drops every subsequent entry that is a label-boundary
/// suffix of the most recently kept one.
fn prune(mut domains: Vec<String>) -> Vec<String> {
    domains.sort_by(|a, b| {
        let ra: Vec<u8> = a.bytes().rev().collect();
        let rb: Vec<u8> = b.bytes().rev().collect();
        ra.cmp(&rb)
    });
    let mut kept: Vec<String> = Vec::with_capacity(domains.len());
    for d in domains {
        if let Some(last) = kept.last() {
            if is_label_suffix(&d, last) {
                continue;
            }
        }
        kept.push(d);
    }
    kept
}

fn is_label_suffix(candidate: &str, ancestor: &str) -> bool {
    if candidate.len() == ancestor.len() {
        return candidate == ancestor;
    }
    if candidate.len() < ancestor.len() {
        return false;
    }
    candidate.ends_with(ancestor) && candidate.as_bytes()[candidate.len() - ancestor.len() - 1] == b'.'
}

/// Frontier-narrowing popular-suffix discovery: group the current frontier
/// by last-`k` labels, promote oversized groups to popular and carry only
/// those forward, and increment `k` until the frontier runs dry.
fn find_popular_suffixes(domains: &[String]) -> Result<Vec<String>> {
    let mut frontier: Vec<&str> = domains.iter().map(String::as_str).collect();
    let mut popular: Vec<String> = Vec::new();
    let mut k = 2usize;
    while !frontier.is_empty() {
        let mut groups: AHashMap<String, Vec<&str>> = AHashMap::new();
        for &d in &frontier {
            let labels: Vec<&str> = d.split('.').collect();
            if labels.len() < k {
                continue;
            }
            let tail = labels[labels.len() - k..].join(".");
            groups.entry(tail).or_default().push(d);
        }
        let mut next_frontier = Vec::new();
        for (tail, group) in groups {
            if group.len() > D {
                popular.push(tail);
                next_frontier.extend(group);
            }
        }
        frontier = next_frontier;
        k += 1;
    }
    popular.sort();
    popular.dedup();
    if popular.len() > POPULAR_CAP {
        return Err(Error::TooManyPopularDomains);
    }
    Ok(popular)
}

/// Computes `d`'s bucket, stored tag, and per-domain `max_scans`
/// contribution for a given calibration trial.
fn bucket_and_tag(d: &str, seed: u64, popular: &AHashSet<String>, buckets: u64) -> (usize, u16, u8) {
    let labels = label::labels_rtl(d);
    let chain = label::hash_chain(&labels, seed);
    let (depth, _) = label::pop_strip(&labels, |s| popular.contains(s));
    let h_bucket = chain[depth];
    let bucket = crate::hash::fastmod_u32(label::low32(h_bucket), buckets as u32) as usize;
    let tag = label::tag_of(*chain.last().unwrap());
    let max_scans = (chain.len() - depth) as u8;
    (bucket, tag, max_scans)
}

/// Bounded growth-and-reseed search for a `(buckets, seed)` pair under
/// which no bucket receives more than `D` domains.
fn calibrate_table(domains: &[String], popular: &AHashSet<String>) -> Result<(u64, u64, Vec<Vec<usize>>)> {
    let n = domains.len() as u64;
    let mut buckets = n / D as u64 + 1;
    let mut seed_counter = 0u64;

    for _growth in 0..GROWTH_STEPS {
        for _attempt in 0..SEED_ATTEMPTS_PER_STEP {
            let seed = SEED_STARTER.wrapping_add(seed_counter);
            seed_counter += 1;

            let mut bucket_lists: Vec<Vec<usize>> = vec![Vec::new(); buckets as usize];
            let mut ok = true;
            for (i, d) in domains.iter().enumerate() {
                let (bucket, _, _) = bucket_and_tag(d, seed, popular, buckets);
                if bucket_lists[bucket].len() == D {
                    ok = false;
                    break;
                }
                bucket_lists[bucket].push(i);
            }
            if ok {
                return Ok((buckets, seed, bucket_lists));
            }
        }
        buckets = (buckets * 21 / 20).max(buckets + 1);
    }
    Err(Error::FailedToCalibrate)
}

fn align_up16(n: usize) -> usize {
    (n + 15) & !15
}

fn lay_out_blob(
    popular_chunks: &[Vec<String>],
    domain_chunks: &[Vec<String>],
    popular_records: &mut [RecordPlan],
    domain_records: &mut [RecordPlan],
) -> Result<Vec<u8>> {
    let mut blob = Vec::new();
    for (chunk, rec) in popular_chunks.iter().zip(popular_records.iter_mut()) {
        place_record_strings(chunk, rec, &mut blob)?;
    }
    for (chunk, rec) in domain_chunks.iter().zip(domain_records.iter_mut()) {
        place_record_strings(chunk, rec, &mut blob)?;
    }
    blob.extend(std::iter::repeat(0u8).take(BLOB_TAIL_PAD));
    Ok(blob)
}

fn place_record_strings(strings: &[String], rec: &mut RecordPlan, blob: &mut Vec<u8>) -> Result<()> {
    rec.blob_base_offset = blob.len() as u32;
    let mut cursor = 0usize;
    for (j, s) in strings.iter().enumerate() {
        let units = cursor / 16;
        if units > 255 {
            return Err(Error::BadSize);
        }
        rec.offsets[j] = units as u8;
        blob.extend_from_slice(s.as_bytes());
        blob.push(0);
        let written = s.len() + 1;
        let padded = align_up16(written);
        blob.extend(std::iter::repeat(0u8).take(padded - written));
        cursor += padded;
    }
    Ok(())
}
