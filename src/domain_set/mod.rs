//! Static domain-suffix membership set.
//!
//! Patterns are compiled into a two-table layout: a small `popular_table`
//! holding multi-label tails shared by more than [`D`] inputs (so a query
//! under `co.uk` doesn't dogpile a single bucket), and a `domains_table`
//! bucketed by a calibrated chained hash of each domain's labels, read
//! right-to-left. Both tables point into a single `blob` of NUL-terminated,
//! 16-byte-padded domain strings.

mod build;
mod label;
mod scan;


use crate::arena::{align_up, check_place_mut};
use crate::error::{Error, Result};

/// Record width: slots per bucket / popular record.
pub const D: usize = 16;
/// Longest domain this set accepts, in bytes, after trailing dots are
/// stripped.
pub const MAX_DOMAIN_LEN: usize = 253;
/// Compile fails with `too_many_popular_domains` past this many distinct
/// popular suffixes.
pub const POPULAR_CAP: usize = 256;
/// Bound on table-size growth steps during calibration.
pub const GROWTH_STEPS: usize = 60;
/// Seeds tried per growth step before giving up and growing the table.
pub const SEED_ATTEMPTS_PER_STEP: usize = 100;
/// Trailing zero padding appended after the blob's real content.
pub const BLOB_TAIL_PAD: usize = 256;

const RECORD_SIZE: usize = 64;
const HEADER_SIZE: usize = 64;
const MAGIC: u32 = 0x5344_4D48;

/// One bucket (or popular-suffix group): up to [`D`] tagged strings into the
/// shared blob.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct TableRecord {
    /// SIMD pre-filter tags, one per occupied slot.
    pub tags: [u16; D],
    /// Per-slot string start, in 16-byte units from `blob_base_offset`.
    pub offsets: [u8; D],
    /// Offset from the blob's start to this record's own string region.
    pub blob_base_offset: u32,
    /// Number of occupied slots (`<= D`).
    pub used_slots: u8,
    /// Label-chain extensions a bucket scan may attempt before giving up
    /// (unused — always `0` — for popular-table records).
    pub max_scans: u8,
    _pad: [u8; 10],
}

const _: () = assert!(std::mem::size_of::<TableRecord>() == RECORD_SIZE);

#[repr(C)]
struct Header {
    buckets: u64,
    seed: u64,
    popular_table_offset: u32,
    popular_records: u32,
    popular_domains: u32,
    domains_table_offset: u32,
    blob_offset: u32,
    blob_size: u32,
    _pad: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

/// Result of a [`DomainSet::find`] query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// The query is one of the compiled patterns or a strict subdomain of
    /// one.
    Found,
    /// The query is well-formed but matches nothing.
    NotFound,
    /// The query is malformed (invalid characters, empty, oversize, or has
    /// no label separator).
    Invalid,
}

/// Build-once domain-suffix membership set.
pub struct DomainSet<'a> {
    header: &'a mut Header,
    popular_table: &'a mut [TableRecord],
    domains_table: &'a mut [TableRecord],
    blob: &'a mut [u8],
}

impl<'a> DomainSet<'a> {
    /// Required arena size for compiling `patterns`.
    pub fn size_for(patterns: &[&str]) -> Result<usize> {
        Ok(build::plan(patterns)?.required_arena_size())
    }

    /// Compiles `patterns` into a fresh set inside `buf`.
    pub fn compile(buf: &'a mut [u8], patterns: &[&str]) -> Result<Self> {
        let plan = build::plan(patterns)?;
        Self::place(
            buf,
            plan.buckets,
            plan.seed,
            &plan.popular_records,
            &plan.domain_records,
            plan.popular_count,
            &plan.blob,
        )
    }

    fn place(
        buf: &'a mut [u8],
        buckets: u64,
        seed: u64,
        popular_records: &[build::RecordPlan],
        domain_records: &[build::RecordPlan],
        popular_domains: u32,
        blob: &[u8],
    ) -> Result<Self> {
        let popular_bytes = popular_records.len() * RECORD_SIZE;
        let domains_bytes = domain_records.len() * RECORD_SIZE;
        let total = align_up(HEADER_SIZE + popular_bytes + domains_bytes + blob.len(), 64);
        check_place_mut(buf, 64, total)?;

        let popular_table_offset = HEADER_SIZE as u32;
        let domains_table_offset = popular_table_offset + popular_bytes as u32;
        let blob_offset = domains_table_offset + domains_bytes as u32;

        let base = buf.as_mut_ptr();
        let header: &mut Header = unsafe { &mut *(base as *mut Header) };
        header.buckets = buckets;
        header.seed = seed;
        header.popular_table_offset = popular_table_offset;
        header.popular_records = popular_records.len() as u32;
        header.popular_domains = popular_domains;
        header.domains_table_offset = domains_table_offset;
        header.blob_offset = blob_offset;
        header.blob_size = blob.len() as u32;
        header._pad = [0; 24];

        let popular_table: &mut [TableRecord] = unsafe {
            std::slice::from_raw_parts_mut(
                base.add(popular_table_offset as usize) as *mut TableRecord,
                popular_records.len(),
            )
        };
        for (slot, plan) in popular_table.iter_mut().zip(popular_records.iter()) {
            *slot = record_from_plan(plan);
        }

        let domains_table: &mut [TableRecord] = unsafe {
            std::slice::from_raw_parts_mut(
                base.add(domains_table_offset as usize) as *mut TableRecord,
                domain_records.len(),
            )
        };
        for (slot, plan) in domains_table.iter_mut().zip(domain_records.iter()) {
            *slot = record_from_plan(plan);
        }

        let blob_slice: &mut [u8] =
            unsafe { std::slice::from_raw_parts_mut(base.add(blob_offset as usize), blob.len()) };
        blob_slice.copy_from_slice(blob);

        Ok(Self {
            header,
            popular_table,
            domains_table,
            blob: blob_slice,
        })
    }

    /// Answers whether `query` is one of the compiled patterns or a strict
    /// subdomain of one.
    pub fn find(&self, query: &str) -> Match {
        let normalized = match build::normalize_pattern(query) {
            Ok(s) => s,
            Err(Error::TopLevelDomain) => return Match::NotFound,
            Err(_) => return Match::Invalid,
        };

        let labels = label::labels_rtl(&normalized);
        let chain = label::hash_chain(&labels, self.header.seed);

        // Popular-extension loop (step 4): keep extending left while the
        // current suffix exactly matches a slot in the popular table.
        let mut depth = 0usize;
        let mut h = chain[0];
        while depth + 2 < labels.len() {
            let suffix_bytes = suffix_bytes(&labels, depth);
            if !self.popular_table_contains(&suffix_bytes, label::tag_of(h)) {
                break;
            }
            depth += 1;
            h = chain[depth];
        }

        let bucket = crate::hash::fastmod_u32(label::low32(h), self.header.buckets as u32) as usize;
        let rec = &self.domains_table[bucket];

        let mut scan_depth = depth;
        let mut scan_h = h;
        for scan in 1..=rec.max_scans {
            let tag = label::tag_of(scan_h);
            let suffix_bytes = suffix_bytes(&labels, scan_depth);
            if self.record_contains(rec, &suffix_bytes, tag) {
                return Match::Found;
            }
            if scan < rec.max_scans && scan_depth + 2 < labels.len() {
                scan_depth += 1;
                scan_h = chain[scan_depth];
            }
        }
        Match::NotFound
    }

    fn popular_table_contains(&self, needle: &[u8], tag: u16) -> bool {
        self.popular_table.iter().any(|rec| self.record_contains(rec, needle, tag))
    }

    fn record_contains(&self, rec: &TableRecord, needle: &[u8], tag: u16) -> bool {
        let mask = scan::tag_scan(&rec.tags, rec.used_slots, tag);
        for slot in 0..rec.used_slots as usize {
            if mask & (1 << slot) == 0 {
                continue;
            }
            let start = rec.blob_base_offset as usize + rec.offsets[slot] as usize * 16;
            let candidate = &self.blob[start..start + needle.len() + 1];
            if scan::padded_equal(candidate, needle) {
                return true;
            }
        }
        false
    }

    /// Number of domains tables buckets.
    pub fn bucket_count(&self) -> u64 {
        self.header.buckets
    }

    /// Number of distinct popular suffixes promoted during compile.
    pub fn popular_domain_count(&self) -> u32 {
        self.header.popular_domains
    }

    /// Bytes required by [`Self::serialize`].
    pub fn serialized_size(&self) -> usize {
        4 + HEADER_SIZE
            + self.popular_table.len() * RECORD_SIZE
            + self.domains_table.len() * RECORD_SIZE
            + self.blob.len()
    }

    /// Writes `magic: u32 | header (64 bytes) | popular_table | domains_table
    /// | blob`, host-endian.
    pub fn serialize(&self, out: &mut [u8]) -> Result<()> {
        let needed = self.serialized_size();
        if out.len() < needed {
            return Err(Error::SmallPlace);
        }
        out[0..4].copy_from_slice(&MAGIC.to_ne_bytes());
        let header_bytes: &[u8] =
            unsafe { std::slice::from_raw_parts(self.header as *const Header as *const u8, HEADER_SIZE) };
        out[4..4 + HEADER_SIZE].copy_from_slice(header_bytes);
        let mut off = 4 + HEADER_SIZE;

        let popular_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(
                self.popular_table.as_ptr() as *const u8,
                self.popular_table.len() * RECORD_SIZE,
            )
        };
        out[off..off + popular_bytes.len()].copy_from_slice(popular_bytes);
        off += popular_bytes.len();

        let domains_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(
                self.domains_table.as_ptr() as *const u8,
                self.domains_table.len() * RECORD_SIZE,
            )
        };
        out[off..off + domains_bytes.len()].copy_from_slice(domains_bytes);
        off += domains_bytes.len();

        out[off..off + self.blob.len()].copy_from_slice(self.blob);
        Ok(())
    }

    /// Required arena size for [`Self::deserialize`] given `serialize`'s
    /// output.
    pub fn place_size_from_serialized(bytes: &[u8]) -> Result<usize> {
        if bytes.len() < 4 + HEADER_SIZE {
            return Err(Error::BadValue);
        }
        if u32::from_ne_bytes(bytes[0..4].try_into().unwrap()) != MAGIC {
            return Err(Error::BadValue);
        }
        let header_bytes = &bytes[4..4 + HEADER_SIZE];
        let buckets = u64::from_ne_bytes(header_bytes[0..8].try_into().unwrap());
        let popular_records = u32::from_ne_bytes(header_bytes[20..24].try_into().unwrap());
        let blob_size = u32::from_ne_bytes(header_bytes[36..40].try_into().unwrap());
        let total = HEADER_SIZE
            + popular_records as usize * RECORD_SIZE
            + buckets as usize * RECORD_SIZE
            + blob_size as usize;
        Ok(align_up(total, 64))
    }

    /// Rebuilds a set from `serialize`'s output into `buf`.
    pub fn deserialize(buf: &'a mut [u8], bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 + HEADER_SIZE {
            return Err(Error::BadValue);
        }
        if u32::from_ne_bytes(bytes[0..4].try_into().unwrap()) != MAGIC {
            return Err(Error::BadValue);
        }
        let header_bytes = &bytes[4..4 + HEADER_SIZE];
        let buckets = u64::from_ne_bytes(header_bytes[0..8].try_into().unwrap());
        let seed = u64::from_ne_bytes(header_bytes[8..16].try_into().unwrap());
        let popular_table_offset = u32::from_ne_bytes(header_bytes[16..20].try_into().unwrap());
        let popular_records = u32::from_ne_bytes(header_bytes[20..24].try_into().unwrap());
        let popular_domains = u32::from_ne_bytes(header_bytes[24..28].try_into().unwrap());
        let domains_table_offset = u32::from_ne_bytes(header_bytes[28..32].try_into().unwrap());
        let blob_offset = u32::from_ne_bytes(header_bytes[32..36].try_into().unwrap());
        let blob_size = u32::from_ne_bytes(header_bytes[36..40].try_into().unwrap());

        let payload = &bytes[4 + HEADER_SIZE..];
        if popular_table_offset != HEADER_SIZE as u32 {
            return Err(Error::BadValue);
        }
        let popular_bytes = popular_records as usize * RECORD_SIZE;
        let domains_bytes = buckets as usize * RECORD_SIZE;
        if domains_table_offset as usize != HEADER_SIZE + popular_bytes {
            return Err(Error::BadValue);
        }
        if blob_offset as usize != domains_table_offset as usize + domains_bytes {
            return Err(Error::BadValue);
        }
        let blob_start = blob_offset as usize - HEADER_SIZE;
        if payload.len() < blob_start + blob_size as usize {
            return Err(Error::BadValue);
        }
        if blob_size as usize < BLOB_TAIL_PAD || blob_size as usize % 16 != 0 {
            return Err(Error::BadValue);
        }

        let mut popular_plans = Vec::with_capacity(popular_records as usize);
        let mut off = 0usize;
        for _ in 0..popular_records {
            popular_plans.push(record_plan_from_bytes(&payload[off..off + RECORD_SIZE])?);
            off += RECORD_SIZE;
        }
        let mut domain_plans = Vec::with_capacity(buckets as usize);
        for _ in 0..buckets {
            domain_plans.push(record_plan_from_bytes(&payload[off..off + RECORD_SIZE])?);
            off += RECORD_SIZE;
        }

        for rec in popular_plans.iter().chain(domain_plans.iter()) {
            for slot in 0..rec.used_slots as usize {
                let start = rec.blob_base_offset as usize + rec.offsets[slot] as usize * 16;
                if start + MAX_DOMAIN_LEN + 1 > blob_size as usize {
                    return Err(Error::BadValue);
                }
            }
        }

        let blob = &payload[blob_start..blob_start + blob_size as usize];

        Self::place(buf, buckets, seed, &popular_plans, &domain_plans, popular_domains, blob)
    }
}

fn record_from_plan(plan: &build::RecordPlan) -> TableRecord {
    TableRecord {
        tags: plan.tags,
        offsets: plan.offsets,
        blob_base_offset: plan.blob_base_offset,
        used_slots: plan.used_slots,
        max_scans: plan.max_scans,
        _pad: [0; 10],
    }
}

/// Decodes one serialized record field-by-field rather than casting the
/// byte slice to `&TableRecord`, since a `deserialize` caller's byte buffer
/// carries no alignment guarantee beyond 1.
fn record_plan_from_bytes(bytes: &[u8]) -> Result<build::RecordPlan> {
    if bytes.len() != RECORD_SIZE {
        return Err(Error::BadValue);
    }
    let mut tags = [0u16; D];
    for (i, slot) in tags.iter_mut().enumerate() {
        *slot = u16::from_ne_bytes(bytes[i * 2..i * 2 + 2].try_into().unwrap());
    }
    let mut offsets = [0u8; D];
    offsets.copy_from_slice(&bytes[32..48]);
    let blob_base_offset = u32::from_ne_bytes(bytes[48..52].try_into().unwrap());
    let used_slots = bytes[52];
    let max_scans = bytes[53];
    if used_slots as usize > D {
        return Err(Error::BadValue);
    }
    Ok(build::RecordPlan {
        tags,
        offsets,
        used_slots,
        max_scans,
        blob_base_offset,
    })
}

/// Builds the byte span for the suffix at `depth` extensions past the last
/// two labels, for comparing against a stored blob string.
fn suffix_bytes(labels_rtl: &[&str], depth: usize) -> Vec<u8> {
    let mut parts: Vec<&str> = labels_rtl[..=depth + 1].to_vec();
    parts.reverse();
    parts.join(".").into_bytes()
}
