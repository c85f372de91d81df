//! fwtables-gen: CLI tool for compiling pattern files into the arena-backed
//! lookup structures and querying the resulting binaries.
//!
//! One subcommand family per structure, each with a `compile` action
//! (reads a plain text/CSV pattern or range file, writes the structure's
//! serialized wire format to disk) and a `lookup` action (loads a
//! compiled file back and answers a single query). The library itself
//! never touches the filesystem; all file I/O lives here.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fwtables::prefix_map::PrefixMap;
use fwtables::u64_map::U64Map;
use fwtables::u64_set::U64Set;
use fwtables::{mmap, DomainSet, Match};

#[derive(Parser)]
#[command(name = "fwtables-gen")]
#[command(author = "fwtables contributors")]
#[command(version = "0.1.0")]
#[command(about = "Compile and query fwtables' arena-backed lookup structures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Static domain-suffix set (`DomainSet`).
    DomainSet {
        #[command(subcommand)]
        action: DomainSetAction,
    },
    /// Static longest-prefix-match map (`PrefixMap`).
    PrefixMap {
        #[command(subcommand)]
        action: PrefixMapAction,
    },
    /// Static calibrated `u64 -> u64` map (`U64Map`).
    U64Map {
        #[command(subcommand)]
        action: U64MapAction,
    },
    /// Static calibrated `u64` membership set (`U64Set`).
    U64Set {
        #[command(subcommand)]
        action: U64SetAction,
    },
    /// Synthetic LRU cache throughput check, exercising both hashing
    /// variants against a fixed operation mix.
    CacheBench {
        /// Cache capacity; must be a power of two.
        #[arg(short, long, default_value_t = 4096)]
        capacity: u32,
        /// Open-addressed hash table growth factor (`speed`, ignored for
        /// the cuckoo variant).
        #[arg(short, long, default_value_t = 2)]
        speed: u32,
        /// Number of add/has/remove operations to run.
        #[arg(short, long, default_value_t = 1_000_000)]
        ops: u64,
    },
}

#[derive(Subcommand)]
enum DomainSetAction {
    /// Reads one domain pattern per line (blank lines and `#` comments
    /// skipped), compiles a `DomainSet`, and writes its serialized form.
    Compile {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Loads a compiled `DomainSet` and answers a single query.
    Lookup {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        query: String,
    },
}

#[derive(Subcommand)]
enum PrefixMapAction {
    /// Reads `ip/cidr,value` lines (e.g. `10.0.0.0/8,1`), compiles a
    /// `PrefixMap`, and writes its serialized form.
    Compile {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Loads a compiled `PrefixMap` and looks up one dotted-quad IPv4
    /// address.
    Lookup {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        ip: std::net::Ipv4Addr,
    },
}

#[derive(Subcommand)]
enum U64MapAction {
    /// Reads `key,value` lines (decimal or `0x`-prefixed hex), compiles a
    /// `U64Map`, and writes its serialized form.
    Compile {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Loads a compiled `U64Map` and looks up one key.
    Lookup {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        key: String,
    },
}

#[derive(Subcommand)]
enum U64SetAction {
    /// Reads one key per line (decimal or `0x`-prefixed hex), compiles a
    /// `U64Set`, and writes its serialized form.
    Compile {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Loads a compiled `U64Set` and checks membership of one key.
    Lookup {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        key: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::DomainSet { action } => run_domain_set(action),
        Commands::PrefixMap { action } => run_prefix_map(action),
        Commands::U64Map { action } => run_u64_map(action),
        Commands::U64Set { action } => run_u64_set(action),
        Commands::CacheBench { capacity, speed, ops } => run_cache_bench(capacity, speed, ops),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn read_lines(path: &PathBuf) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn parse_u64(s: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(u64::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse()?)
    }
}

fn run_domain_set(action: DomainSetAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        DomainSetAction::Compile { input, output, verbose } => {
            let lines = read_lines(&input)?;
            let patterns: Vec<&str> = lines.iter().map(String::as_str).collect();
            if verbose {
                log::info!("Compiling {} patterns from {:?}", patterns.len(), input);
            }
            let mut buf = vec![0u8; DomainSet::size_for(&patterns)?];
            let set = DomainSet::compile(&mut buf, &patterns)?;

            let mut bytes = vec![0u8; set.serialized_size()];
            set.serialize(&mut bytes)?;
            fs::write(&output, &bytes)?;

            if verbose {
                log::info!(
                    "Wrote {:?}: {} buckets, {} popular suffixes, {} bytes",
                    output,
                    set.bucket_count(),
                    set.popular_domain_count(),
                    bytes.len()
                );
            }
            Ok(())
        }
        DomainSetAction::Lookup { input, query } => {
            let bytes = mmap::load_file(&input)?;
            let mut buf = vec![0u8; DomainSet::place_size_from_serialized(&bytes)?];
            let set = DomainSet::deserialize(&mut buf, &bytes)?;
            match set.find(&query) {
                Match::Found => println!("found"),
                Match::NotFound => println!("not found"),
                Match::Invalid => println!("invalid query"),
            }
            Ok(())
        }
    }
}

fn parse_prefix_line(line: &str) -> Result<(u32, u8, u64), Box<dyn std::error::Error>> {
    let (range, value) = line
        .split_once(',')
        .ok_or_else(|| format!("expected `ip/cidr,value`, got {line:?}"))?;
    let (ip_str, cidr_str) = range
        .split_once('/')
        .ok_or_else(|| format!("expected `ip/cidr`, got {range:?}"))?;
    let ip: std::net::Ipv4Addr = ip_str.parse()?;
    let cidr: u8 = cidr_str.parse()?;
    let value: u64 = value.trim().parse()?;
    Ok((u32::from(ip), cidr, value))
}

fn run_prefix_map(action: PrefixMapAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        PrefixMapAction::Compile { input, output, verbose } => {
            let lines = read_lines(&input)?;
            let mut ips = Vec::with_capacity(lines.len());
            let mut cidrs = Vec::with_capacity(lines.len());
            let mut values = Vec::with_capacity(lines.len());
            for line in &lines {
                let (ip, cidr, value) = parse_prefix_line(line)?;
                ips.push(ip);
                cidrs.push(cidr);
                values.push(value);
            }
            if verbose {
                log::info!("Compiling {} prefixes from {:?}", ips.len(), input);
            }
            let mut buf = vec![0u8; fwtables::prefix_map::size_for(ips.len())];
            let map = PrefixMap::compile(&mut buf, &ips, &cidrs, &values)?;

            let mut bytes = vec![0u8; map.serialized_size()];
            map.serialize(&mut bytes)?;
            fs::write(&output, &bytes)?;

            if verbose {
                log::info!(
                    "Wrote {:?}: {} segments, {} bytes",
                    output,
                    map.segment_count(),
                    bytes.len()
                );
            }
            Ok(())
        }
        PrefixMapAction::Lookup { input, ip } => {
            let bytes = mmap::load_file(&input)?;
            let mut buf = vec![0u8; PrefixMap::place_size_from_serialized(&bytes)?];
            let map = PrefixMap::deserialize(&mut buf, &bytes)?;
            let value = map.find(u32::from(ip));
            if value == fwtables::prefix_map::NO_VALUE {
                println!("no covering prefix");
            } else {
                println!("{value}");
            }
            Ok(())
        }
    }
}

fn run_u64_map(action: U64MapAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        U64MapAction::Compile { input, output, verbose } => {
            let lines = read_lines(&input)?;
            let mut keys = Vec::with_capacity(lines.len());
            let mut values = Vec::with_capacity(lines.len());
            for line in &lines {
                let (k, v) = line
                    .split_once(',')
                    .ok_or_else(|| format!("expected `key,value`, got {line:?}"))?;
                keys.push(parse_u64(k)?);
                values.push(parse_u64(v)?);
            }
            if verbose {
                log::info!("Compiling {} entries from {:?}", keys.len(), input);
            }
            let mut buf = vec![0u8; fwtables::u64_map::size_for(keys.len())];
            let map = U64Map::compile(&mut buf, &keys, &values)?;

            let mut bytes = vec![0u8; map.serialized_size()];
            map.serialize(&mut bytes)?;
            fs::write(&output, &bytes)?;

            if verbose {
                log::info!("Wrote {:?}: {} buckets, {} bytes", output, map.bucket_count(), bytes.len());
            }
            Ok(())
        }
        U64MapAction::Lookup { input, key } => {
            let bytes = mmap::load_file(&input)?;
            let mut buf = vec![0u8; U64Map::place_size_from_serialized(&bytes)?];
            let map = U64Map::deserialize(&mut buf, &bytes)?;
            println!("{}", map.find(parse_u64(&key)?));
            Ok(())
        }
    }
}

fn run_u64_set(action: U64SetAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        U64SetAction::Compile { input, output, verbose } => {
            let lines = read_lines(&input)?;
            let keys: Vec<u64> = lines.iter().map(|l| parse_u64(l)).collect::<Result<_, _>>()?;
            if verbose {
                log::info!("Compiling {} keys from {:?}", keys.len(), input);
            }
            let mut buf = vec![0u8; fwtables::u64_set::size_for(keys.len())];
            let set = U64Set::compile(&mut buf, &keys)?;

            let mut bytes = vec![0u8; set.serialized_size()];
            set.serialize(&mut bytes)?;
            fs::write(&output, &bytes)?;

            if verbose {
                log::info!("Wrote {:?}: {} buckets, {} bytes", output, set.bucket_count(), bytes.len());
            }
            Ok(())
        }
        U64SetAction::Lookup { input, key } => {
            let bytes = mmap::load_file(&input)?;
            let mut buf = vec![0u8; U64Set::place_size_from_serialized(&bytes)?];
            let set = U64Set::deserialize(&mut buf, &bytes)?;
            println!("{}", set.has(parse_u64(&key)?));
            Ok(())
        }
    }
}

/// A small xorshift PRNG so this one-off benchmark driver doesn't need a
/// dedicated `rand` dependency.
struct Xorshift(u64);

impl Xorshift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

fn run_cache_bench(capacity: u32, speed: u32, ops: u64) -> Result<(), Box<dyn std::error::Error>> {
    use fwtables::{CuckooCache, OpenCache};
    use std::time::Instant;

    let mut rng = Xorshift(0x9E37_79B9_7F4A_7C15);
    let universe = (capacity as u64 * 4).max(16);

    let mut open_buf = vec![0u8; fwtables::cache::open::size_for(capacity, speed)?];
    let mut open_cache = OpenCache::init(&mut open_buf, capacity, speed)?;
    let start = Instant::now();
    for _ in 0..ops {
        let ip = (rng.next() % universe) as u32 + 1;
        match rng.next() % 3 {
            0 => {
                open_cache.add(ip, ip);
            }
            1 => {
                open_cache.has(ip);
            }
            _ => {
                open_cache.remove(ip);
            }
        }
    }
    let open_elapsed = start.elapsed();

    let mut cuckoo_buf = vec![0u8; fwtables::cache::cuckoo::size_for(capacity)?];
    let mut cuckoo_cache = CuckooCache::init(&mut cuckoo_buf, capacity)?;
    let start = Instant::now();
    for _ in 0..ops {
        let ip = (rng.next() % universe) as u32 + 1;
        match rng.next() % 3 {
            0 => {
                cuckoo_cache.add(ip, ip)?;
            }
            1 => {
                cuckoo_cache.has(ip);
            }
            _ => {
                cuckoo_cache.remove(ip);
            }
        }
    }
    let cuckoo_elapsed = start.elapsed();

    println!(
        "open-addressed: capacity={capacity} speed={speed} ops={ops} elapsed={:?} ({:.1} ops/sec)",
        open_elapsed,
        ops as f64 / open_elapsed.as_secs_f64()
    );
    println!(
        "cuckoo:         capacity={capacity} ops={ops} elapsed={:?} ({:.1} ops/sec)",
        cuckoo_elapsed,
        ops as f64 / cuckoo_elapsed.as_secs_f64()
    );
    Ok(())
}
