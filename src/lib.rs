//! fwtables - Arena-resident lookup structures for firewall-style traffic
//! filtering.
//!
//! Every structure in this crate is placed directly into a caller-supplied
//! byte buffer: no internal heap allocation, a fixed binary layout that can
//! be `mmap`'d back in from a file without parsing, and a `compile` /
//! `serialize` / `deserialize` cycle shared by all four structures.
//!
//! # Structures
//!
//! - [`cache::OpenCache`] / [`cache::CuckooCache`]: bounded-capacity IPv4 ->
//!   u32 LRU caches, differing only in how the IP -> element index is
//!   hashed (open-addressed Robin-Hood vs. two-candidate cuckoo).
//! - [`prefix_map::PrefixMap`]: a static longest-prefix-match table from
//!   CIDR ranges to u64 values.
//! - [`u64_map::U64Map`] / [`u64_set::U64Set`]: a static calibrated
//!   4-way-bucket u64 -> u64 map, and its key-only membership-set sibling.
//! - [`domain_set::DomainSet`]: a static set answering domain-or-ancestor
//!   suffix membership queries, with popular-suffix promotion to keep
//!   heavily-subdomained zones from overflowing a single bucket.
//!
//! # Quick start
//!
//! ```
//! use fwtables::prefix_map::{self, PrefixMap};
//!
//! let ips = [0x0A00_0000u32, 0x0A01_0000u32]; // 10.0.0.0, 10.1.0.0
//! let cidrs = [8u8, 16u8];
//! let values = [1u64, 2u64];
//! let mut buf = vec![0u8; prefix_map::size_for(ips.len())];
//! let map = PrefixMap::compile(&mut buf, &ips, &cidrs, &values).unwrap();
//!
//! assert_eq!(map.find(u32::from(std::net::Ipv4Addr::new(10, 1, 2, 3))), 2);
//! assert_eq!(map.find(u32::from(std::net::Ipv4Addr::new(10, 2, 2, 3))), 1);
//! ```
//!
//! # On-disk / mmap use
//!
//! Every structure's `serialize` writes a self-contained byte image that a
//! later process can `mmap` and hand straight to `deserialize` without
//! re-running the compile step; see [`arena::mmap`] for the file-backed
//! convenience wrapper.

mod arena;
mod error;
mod hash;
mod u64_common;

pub mod cache;
pub mod domain_set;
pub mod prefix_map;
pub mod u64_map;
pub mod u64_set;

pub use arena::mmap;
pub use cache::{AddOutcome, CuckooCache, OpenCache, RemoveOutcome};
pub use domain_set::{DomainSet, Match};
pub use error::{Error, Result};
pub use prefix_map::PrefixMap;
pub use u64_map::U64Map;
pub use u64_set::U64Set;
