use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use mphdict_lib::{
    compress, BuildOptions, FilterBits, FilterDictionary, FilterOptions, LookupDictionary,
    MphDictionary, MphfBuilder, ValidationMode,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mphdict")]
#[command(version = "0.1.0")]
#[command(about = "Minimal perfect hash dictionaries over string sets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which dictionary structure a command operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Kind {
    /// Plain MPHF: key -> index in [0, n)
    Mphf,
    /// Reverse-lookup dictionary over a key -> values multi-map
    Lookup,
    /// Approximate-membership filter
    Filter,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a dictionary from an input file
    Build {
        /// Input file: one key per line, or tab-separated `key<TAB>value...`
        /// lines for lookup dictionaries
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to the input path with `.mphd` appended)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Structure to build
        #[arg(short, long, value_enum, default_value = "mphf")]
        kind: Kind,

        /// Level: target keys per bucket, 1..=10
        #[arg(short, long, default_value = "5")]
        level: u8,

        /// Validation fingerprint mode: none, true, or 2/4/8/16/32
        /// (lookup dictionaries default to 8)
        #[arg(short, long)]
        validate: Option<ValidationMode>,

        /// Filter fingerprint width: 6/8/10/12/14/16
        #[arg(short, long, default_value = "8")]
        bits: FilterBits,

        /// Serialize filter fingerprints as a checkpointed stream
        #[arg(long, default_value = "false")]
        checkpoints: bool,

        /// Gzip the serialized output
        #[arg(short, long, default_value = "false")]
        compress: bool,
    },

    /// Query a dictionary
    Query {
        /// Serialized dictionary (gzip detected automatically)
        #[arg(short, long)]
        index: PathBuf,

        /// Structure stored in the index file
        #[arg(short, long, value_enum, default_value = "mphf")]
        kind: Kind,

        /// Terms to evaluate
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Check a dictionary against the input it was built from
    Check {
        /// Serialized dictionary (gzip detected automatically)
        #[arg(short, long)]
        index: PathBuf,

        /// Input file used to build the dictionary
        #[arg(short = 'f', long)]
        input: PathBuf,

        /// Structure stored in the index file
        #[arg(short, long, value_enum, default_value = "mphf")]
        kind: Kind,
    },

    /// Print a size breakdown of a serialized dictionary
    Stats {
        /// Serialized dictionary (gzip detected automatically)
        #[arg(short, long)]
        index: PathBuf,

        /// Structure stored in the index file
        #[arg(short, long, value_enum, default_value = "mphf")]
        kind: Kind,
    },

    /// Measure evaluation throughput
    Bench {
        /// Serialized dictionary (gzip detected automatically)
        #[arg(short, long)]
        index: PathBuf,

        /// Input file with terms to evaluate
        #[arg(short = 'f', long)]
        input: PathBuf,

        /// Structure stored in the index file
        #[arg(short, long, value_enum, default_value = "mphf")]
        kind: Kind,

        /// Evaluation rounds over the input
        #[arg(short, long, default_value = "5")]
        rounds: u32,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build { input, output, kind, level, validate, bits, checkpoints, compress } => {
            build_command(input, output, kind, level, validate, bits, checkpoints, compress)
        }
        Commands::Query { index, kind, terms } => query_command(index, kind, terms),
        Commands::Check { index, input, kind } => check_command(index, input, kind),
        Commands::Stats { index, kind } => stats_command(index, kind),
        Commands::Bench { index, input, kind, rounds } => bench_command(index, input, kind, rounds),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_command(
    input: PathBuf,
    output: Option<PathBuf>,
    kind: Kind,
    level: u8,
    validate: Option<ValidationMode>,
    bits: FilterBits,
    checkpoints: bool,
    gzip: bool,
) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| {
        let mut path = input.clone().into_os_string();
        path.push(".mphd");
        PathBuf::from(path)
    });

    let bytes = match kind {
        Kind::Mphf => {
            let keys = read_lines(&input)?;
            info!("building MPHF over {} keys from {}", keys.len(), input.display());
            let options =
                BuildOptions::new(level, validate.unwrap_or(ValidationMode::None))?;
            let dict = MphfBuilder::new(options)?.build(&keys)?;
            dict.to_bytes()
        }
        Kind::Lookup => {
            let map = read_multimap(&input)?;
            info!("building lookup dictionary over {} keys from {}", map.len(), input.display());
            let options =
                BuildOptions::new(level, validate.unwrap_or(ValidationMode::Bits8))?;
            let dict = LookupDictionary::build_with_options(&map, options)?;
            dict.to_bytes()
        }
        Kind::Filter => {
            let keys = read_lines(&input)?;
            info!("building filter over {} keys from {}", keys.len(), input.display());
            let dict = FilterDictionary::build_with_options(
                &keys,
                FilterOptions { bits, level, checkpoints },
            )?;
            dict.to_bytes()
        }
    };

    let bytes = if gzip { compress::compress(&bytes) } else { bytes };
    fs::write(&output, &bytes)
        .with_context(|| format!("cannot write {}", output.display()))?;
    info!("wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

fn query_command(index: PathBuf, kind: Kind, terms: Vec<String>) -> anyhow::Result<()> {
    let bytes = read_index(&index)?;
    match kind {
        Kind::Mphf => {
            let dict = MphDictionary::from_bytes(&bytes)?;
            for term in terms {
                match dict.hash(&term) {
                    Some(slot) => println!("{term}\t{slot}"),
                    None => println!("{term}\t-"),
                }
            }
        }
        Kind::Lookup => {
            let dict = LookupDictionary::from_bytes(&bytes)?;
            for term in terms {
                match dict.query_all(&term) {
                    Some(owners) => println!("{term}\t{}", owners.join(",")),
                    None => println!("{term}\t-"),
                }
            }
        }
        Kind::Filter => {
            let dict = FilterDictionary::from_bytes(&bytes)?;
            for term in terms {
                println!("{term}\t{}", dict.has(&term));
            }
        }
    }
    Ok(())
}

fn check_command(index: PathBuf, input: PathBuf, kind: Kind) -> anyhow::Result<()> {
    let bytes = read_index(&index)?;
    match kind {
        Kind::Mphf => {
            let dict = MphDictionary::from_bytes(&bytes)?;
            let keys = read_lines(&input)?;
            if keys.len() != dict.len() {
                bail!("index holds {} keys, input has {}", dict.len(), keys.len());
            }
            let mut seen = vec![false; keys.len()];
            for key in &keys {
                let slot = dict
                    .hash(key)
                    .with_context(|| format!("key {key:?} does not evaluate"))?
                    as usize;
                if seen[slot] {
                    bail!("slot {slot} assigned twice (key {key:?})");
                }
                seen[slot] = true;
            }
            info!("OK: {} keys map onto 0..{} exactly once", keys.len(), keys.len());
        }
        Kind::Lookup => {
            let dict = LookupDictionary::from_bytes(&bytes)?;
            let map = read_multimap(&input)?;
            let mut checked = 0usize;
            for (key, values) in &map {
                for value in values {
                    let owners = dict
                        .query_all(value)
                        .with_context(|| format!("value {value:?} does not resolve"))?;
                    if !owners.contains(&key.as_str()) {
                        bail!("value {value:?} does not resolve to its key {key:?}");
                    }
                    checked += 1;
                }
            }
            info!("OK: {checked} value->key assignments verified");
        }
        Kind::Filter => {
            let dict = FilterDictionary::from_bytes(&bytes)?;
            let keys = read_lines(&input)?;
            for key in &keys {
                if !dict.has(key) {
                    bail!("false negative for member key {key:?}");
                }
            }
            info!("OK: no false negatives over {} keys", keys.len());
        }
    }
    Ok(())
}

fn stats_command(index: PathBuf, kind: Kind) -> anyhow::Result<()> {
    let bytes = read_index(&index)?;

    let row = |name: &str, bytes: usize, keys: usize| {
        let bits_per_key =
            if keys == 0 { 0.0 } else { bytes as f64 * 8.0 / keys as f64 };
        println!("{name:<28} {bytes:>12} {bits_per_key:>12.2}");
    };
    println!("{:<28} {:>12} {:>12}", "Section", "Bytes", "bits/key");
    println!("{:<28} {:>12} {:>12}", "-".repeat(28), "-".repeat(12), "-".repeat(12));

    match kind {
        Kind::Mphf => {
            let dict = MphDictionary::from_bytes(&bytes)?;
            let sizes = dict.section_sizes();
            let n = dict.len();
            row("bucket sizes", sizes.bucket_sizes, n);
            row("seed stream", sizes.seed_stream, n);
            row("seed-zero bitmap", sizes.zero_bitmap, n);
            row("fingerprints", sizes.fingerprints, n);
            row("total frame", sizes.total, n);
            println!();
            println!(
                "{} keys in {} buckets, validation {}",
                n,
                dict.num_buckets(),
                dict.validation()
            );
        }
        Kind::Lookup => {
            let dict = LookupDictionary::from_bytes(&bytes)?;
            let sizes = dict.section_sizes();
            let n = dict.num_values();
            row("value MPHF", sizes.mphf, n);
            row("key table", sizes.keys, n);
            row("assignment payload", sizes.assignment, n);
            row("total", sizes.total, n);
            println!();
            println!(
                "{} keys over {} distinct values ({} representation)",
                dict.keys().len(),
                n,
                if dict.uses_direct_mode() { "direct" } else { "sparse" }
            );
        }
        Kind::Filter => {
            let dict = FilterDictionary::from_bytes(&bytes)?;
            let sizes = dict.section_sizes();
            let n = dict.len();
            row("MPHF", sizes.mphf, n);
            row("fingerprints", sizes.fingerprints, n);
            row("total", sizes.total, n);
            println!();
            println!("{} keys at {} bits per fingerprint", n, dict.bits());
        }
    }
    Ok(())
}

fn bench_command(index: PathBuf, input: PathBuf, kind: Kind, rounds: u32) -> anyhow::Result<()> {
    let bytes = read_index(&index)?;
    let terms = read_lines(&input)?;
    if terms.is_empty() {
        bail!("no terms in {}", input.display());
    }

    let start = Instant::now();
    let mut hits = 0u64;
    match kind {
        Kind::Mphf => {
            let dict = MphDictionary::from_bytes(&bytes)?;
            for _ in 0..rounds {
                for term in &terms {
                    if dict.hash(term).is_some() {
                        hits += 1;
                    }
                }
            }
        }
        Kind::Lookup => {
            let dict = LookupDictionary::from_bytes(&bytes)?;
            for _ in 0..rounds {
                for term in &terms {
                    if dict.query(term).is_some() {
                        hits += 1;
                    }
                }
            }
        }
        Kind::Filter => {
            let dict = FilterDictionary::from_bytes(&bytes)?;
            for _ in 0..rounds {
                for term in &terms {
                    if dict.has(term) {
                        hits += 1;
                    }
                }
            }
        }
    }
    let elapsed = start.elapsed();
    let total = terms.len() as u64 * rounds as u64;
    info!(
        "{total} evaluations ({hits} hits) in {:.3}s: {:.0} ns/op",
        elapsed.as_secs_f64(),
        elapsed.as_nanos() as f64 / total as f64
    );
    Ok(())
}

/// Read an index file, transparently decompressing gzip.
fn read_index(path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes =
        fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    if compress::is_gzip(&bytes) {
        Ok(compress::decompress(&bytes)?)
    } else {
        Ok(bytes)
    }
}

/// Read non-empty lines from a file.
fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(text.lines().filter(|line| !line.is_empty()).map(str::to_owned).collect())
}

/// Read a tab-separated multi-map: `key<TAB>value<TAB>value...` per line.
fn read_multimap(path: &Path) -> anyhow::Result<Vec<(String, Vec<String>)>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let mut map = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let key = fields.next().expect("split yields at least one field").to_owned();
        let values: Vec<String> = fields.map(str::to_owned).collect();
        if values.is_empty() {
            warn!("line {}: key {key:?} has no values", lineno + 1);
        }
        map.push((key, values));
    }
    Ok(map)
}
