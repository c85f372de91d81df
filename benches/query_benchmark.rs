//! Query throughput benchmarks for fwtables' four lookup structures.
//!
//! Run with: cargo bench --features bench
//!
//! This suite measures:
//! - Domain-set suffix-match throughput, including the popular-suffix
//!   extension path and (behind `regex-bench`) a naive regex comparison
//!   as a baseline for the same workload.
//! - Prefix-map longest-match throughput.
//! - 64-bit map point-lookup throughput.
//! - LRU cache hit/miss throughput for both hashing variants.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fwtables::prefix_map::PrefixMap;
use fwtables::u64_map::U64Map;
use fwtables::{CuckooCache, DomainSet, OpenCache};

fn generate_domains(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("service{i}.example{}.com", i % 97)).collect()
}

fn bench_domain_set_find(c: &mut Criterion) {
    let domains = generate_domains(10_000);
    let patterns: Vec<&str> = domains.iter().map(String::as_str).collect();
    let mut buf = vec![0u8; DomainSet::size_for(&patterns).unwrap()];
    let set = DomainSet::compile(&mut buf, &patterns).unwrap();

    let hits: Vec<String> = (0..1000).map(|i| format!("sub.{}", domains[i % domains.len()])).collect();
    let misses: Vec<String> = (0..1000).map(|i| format!("unknown{i}.nonexistent.org")).collect();

    let mut group = c.benchmark_group("domain_set_find");
    group.throughput(Throughput::Elements(hits.len() as u64));
    group.bench_function("hit", |b| {
        b.iter(|| {
            for q in &hits {
                black_box(set.find(q));
            }
        })
    });
    group.bench_function("miss", |b| {
        b.iter(|| {
            for q in &misses {
                black_box(set.find(q));
            }
        })
    });
    group.finish();
}

#[cfg(feature = "regex-bench")]
fn bench_domain_set_vs_regex(c: &mut Criterion) {
    // A deliberately naive escaped-alternation regex: not a suggestion
    // that this is how one should match domain suffixes, just a same-input
    // baseline for the calibrated-hash approach above.
    let domains = generate_domains(2_000);
    let patterns: Vec<&str> = domains.iter().map(String::as_str).collect();
    let mut buf = vec![0u8; DomainSet::size_for(&patterns).unwrap()];
    let set = DomainSet::compile(&mut buf, &patterns).unwrap();

    let alternation = domains
        .iter()
        .map(|d| format!("(^|\\.){}$", regex::escape(d)))
        .collect::<Vec<_>>()
        .join("|");
    let re = regex::Regex::new(&alternation).unwrap();

    let queries: Vec<String> = (0..200).map(|i| format!("sub.{}", domains[i % domains.len()])).collect();

    let mut group = c.benchmark_group("domain_set_vs_regex");
    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("fwtables_domain_set", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(set.find(q));
            }
        })
    });
    group.bench_function("regex_alternation", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(re.is_match(q));
            }
        })
    });
    group.finish();
}

fn bench_domain_set_scalability(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_set_scalability");
    for size in [100usize, 1_000, 10_000, 50_000] {
        let domains = generate_domains(size);
        let patterns: Vec<&str> = domains.iter().map(String::as_str).collect();
        let mut buf = vec![0u8; DomainSet::size_for(&patterns).unwrap()];
        let set = DomainSet::compile(&mut buf, &patterns).unwrap();

        let queries: Vec<String> = (0..100).map(|i| domains[i % size].clone()).collect();
        group.throughput(Throughput::Elements(queries.len() as u64));
        group.bench_with_input(BenchmarkId::new("domains", size), &size, |b, _| {
            b.iter(|| {
                for q in &queries {
                    black_box(set.find(q));
                }
            })
        });
    }
    group.finish();
}

fn bench_prefix_map_find(c: &mut Criterion) {
    let n = 5_000;
    let ips: Vec<u32> = (0..n as u32).map(|i| (10 << 24) | (i << 8)).collect();
    let cidrs: Vec<u8> = vec![24; n];
    let values: Vec<u64> = (0..n as u64).collect();
    let mut buf = vec![0u8; fwtables::prefix_map::size_for(n)];
    let map = PrefixMap::compile(&mut buf, &ips, &cidrs, &values).unwrap();

    let queries: Vec<u32> = (0..1000).map(|i| ips[i % ips.len()] + 1).collect();

    let mut group = c.benchmark_group("prefix_map_find");
    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("longest_match", |b| {
        b.iter(|| {
            for &ip in &queries {
                black_box(map.find(ip));
            }
        })
    });
    group.finish();
}

fn bench_u64_map_find(c: &mut Criterion) {
    let keys: Vec<u64> = (1..=10_000u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect();
    let values: Vec<u64> = (1..=10_000u64).collect();
    let mut buf = vec![0u8; fwtables::u64_map::size_for(keys.len())];
    let map = U64Map::compile(&mut buf, &keys, &values).unwrap();

    let queries: Vec<u64> = (0..1000).map(|i| keys[i % keys.len()]).collect();

    let mut group = c.benchmark_group("u64_map_find");
    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("point_lookup", |b| {
        b.iter(|| {
            for &k in &queries {
                black_box(map.find(k));
            }
        })
    });
    group.finish();
}

fn bench_cache_hit_vs_miss(c: &mut Criterion) {
    let capacity = 16_384u32;
    let speed = 2u32;

    let mut open_buf = vec![0u8; fwtables::cache::open::size_for(capacity, speed).unwrap()];
    let mut open_cache = OpenCache::init(&mut open_buf, capacity, speed).unwrap();
    for ip in 1..=capacity {
        open_cache.add(ip, ip);
    }

    let mut cuckoo_buf = vec![0u8; fwtables::cache::cuckoo::size_for(capacity).unwrap()];
    let mut cuckoo_cache = CuckooCache::init(&mut cuckoo_buf, capacity).unwrap();
    for ip in 1..=capacity {
        cuckoo_cache.add(ip, ip).unwrap();
    }

    let mut group = c.benchmark_group("cache_hit_vs_miss");
    group.bench_function("open_hit", |b| b.iter(|| black_box(open_cache.has(capacity / 2))));
    group.bench_function("open_miss", |b| b.iter(|| black_box(open_cache.has(capacity * 10))));
    group.bench_function("cuckoo_hit", |b| b.iter(|| black_box(cuckoo_cache.has(capacity / 2))));
    group.bench_function("cuckoo_miss", |b| b.iter(|| black_box(cuckoo_cache.has(capacity * 10))));
    group.finish();
}

#[cfg(feature = "regex-bench")]
criterion_group!(
    benches,
    bench_domain_set_find,
    bench_domain_set_vs_regex,
    bench_domain_set_scalability,
    bench_prefix_map_find,
    bench_u64_map_find,
    bench_cache_hit_vs_miss,
);

#[cfg(not(feature = "regex-bench"))]
criterion_group!(
    benches,
    bench_domain_set_find,
    bench_domain_set_scalability,
    bench_prefix_map_find,
    bench_u64_map_find,
    bench_cache_hit_vs_miss,
);

criterion_main!(benches);
