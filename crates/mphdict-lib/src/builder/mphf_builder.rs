//! The phase-ordered MPHF builder
//!
//! Single-threaded and CPU-bound; the builder owns all working buffers
//! for the duration of one build. Buckets are processed in index order
//! in both build and evaluation, and the seed stream is consumed in that
//! same order, so the output bytes are fully determined by the input
//! keys and the options.

use crate::bits::{BitPacked, NibbleArray, ZeroBitmap};
use crate::builder::{BucketStatistics, BuildError, BuildOptions, ValidationMode};
use crate::constants::{
    BUCKETING_ATTEMPTS, BUCKETING_EARLY_ATTEMPTS, BUCKETING_TARGET_MAX, FP_SEED,
    LARGE_BUCKET_TRIAL_CAP, LARGE_INPUT_THRESHOLD, MAX_BUCKET_SIZE, MAX_HASH_SEED, SEED0_SALT,
    SMALL_BUCKET_TRIAL_CAP,
};
use crate::dictionary::MphDictionary;
use crate::hashing::{hash_str, scramble, PreHash};
use crate::varint;
use ahash::AHashSet;
use tracing::{debug, info};

/// Builder for [`MphDictionary`] values.
pub struct MphfBuilder {
    options: BuildOptions,
}

impl MphfBuilder {
    /// Create a builder with the given options.
    pub fn new(options: BuildOptions) -> Result<Self, BuildError> {
        options.validate()?;
        Ok(Self { options })
    }

    /// Build a dictionary over `keys`.
    ///
    /// The keys must be distinct; duplicates surface as
    /// [`BuildError::HashSeedExhausted`] because equal keys collide on
    /// the full pre-hash pair under every seed.
    pub fn build<S: AsRef<str>>(&self, keys: &[S]) -> Result<MphDictionary, BuildError> {
        let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        self.build_refs(&keys)
    }

    fn build_refs(&self, keys: &[&str]) -> Result<MphDictionary, BuildError> {
        let n = keys.len();
        if n > u32::MAX as usize {
            return Err(BuildError::TooManyKeys(n));
        }
        if n == 0 {
            return Ok(MphDictionary::empty(self.options.validation));
        }

        info!(
            "building MPHF over {} keys (level {}, validation {})",
            n, self.options.level, self.options.validation
        );

        let (hash_seed, pairs) = find_hash_seed(keys)?;
        debug!(hash_seed, "pre-hash pair is collision-free");

        let m = bucket_count(n, self.options.level);
        let (seed0, counts, max_bucket) = choose_seed0(&pairs, m)?;
        debug!(seed0, m, max_bucket, "bucket distribution chosen");

        let (bucket_sizes, seed_stream, zero_bitmap, stats) = displace(&pairs, &counts, seed0, m)?;
        debug!(seed_stream_bytes = seed_stream.len(), "displacement seeds found");
        stats.print_summary();

        let mut dict = MphDictionary::assemble(
            n as u32,
            m,
            hash_seed,
            seed0,
            bucket_sizes,
            seed_stream,
            zero_bitmap,
            ValidationMode::None,
            None,
        )
        .expect("freshly built parts are consistent");

        if self.options.validation != ValidationMode::None {
            let width = self.options.validation.width();
            let mask = self.options.validation.mask();
            let mut fingerprints = BitPacked::with_len(width, n);
            for key in keys {
                let slot = dict.hash(key).expect("member key evaluates to a slot");
                fingerprints.set(slot as usize, hash_str(key, FP_SEED) & mask);
            }
            dict.attach_fingerprints(self.options.validation, fingerprints);
        }

        info!("built MPHF: {} keys in {} buckets", n, m);
        Ok(dict)
    }
}

/// Bucket count for `n` keys at the given level. Above the large-input
/// threshold the effective level shrinks by 10% so the largest bucket
/// stays within the 4-bit counter cap with high probability.
fn bucket_count(n: usize, level: u8) -> u32 {
    let mut level = level as f64;
    if n > LARGE_INPUT_THRESHOLD {
        level *= 0.9;
    }
    let m = (n as f64 / level).ceil() as u64;
    m.clamp(1, u32::MAX as u64) as u32
}

/// Phase 0: smallest pre-hash seed whose 64-bit pairs are unique.
fn find_hash_seed(keys: &[&str]) -> Result<(u32, Vec<PreHash>), BuildError> {
    'seeds: for seed in 0..=MAX_HASH_SEED {
        let mut seen = AHashSet::with_capacity(keys.len());
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            let pre = PreHash::new(key, seed);
            if !seen.insert(pre.as_u64()) {
                continue 'seeds;
            }
            pairs.push(pre);
        }
        return Ok((seed, pairs));
    }
    Err(BuildError::HashSeedExhausted)
}

/// Phase 1: best-fit bucketing. Keeps the distribution whose largest
/// bucket is smallest; a distribution below the target maximum ends the
/// search at once, and any cap-respecting distribution is accepted after
/// the early-attempt budget.
fn choose_seed0(pairs: &[PreHash], m: u32) -> Result<(u32, Vec<u32>, u32), BuildError> {
    let mut counts = vec![0u32; m as usize];
    let mut best_seed0 = 0;
    let mut best_counts = Vec::new();
    let mut best_max = u32::MAX;

    for attempt in 0..BUCKETING_ATTEMPTS {
        let seed0 = scramble(attempt, SEED0_SALT);
        counts.fill(0);
        let mut max = 0;
        for pre in pairs {
            let bucket = pre.bucket(seed0, m) as usize;
            counts[bucket] += 1;
            if counts[bucket] > max {
                max = counts[bucket];
            }
        }
        if max < best_max {
            best_seed0 = seed0;
            best_max = max;
            best_counts.clear();
            best_counts.extend_from_slice(&counts);
        }
        if best_max < BUCKETING_TARGET_MAX {
            break;
        }
        if attempt + 1 >= BUCKETING_EARLY_ATTEMPTS && best_max <= MAX_BUCKET_SIZE {
            break;
        }
    }

    if best_max > MAX_BUCKET_SIZE {
        return Err(BuildError::BucketOverflow { max_bucket: best_max });
    }
    Ok((best_seed0, best_counts, best_max))
}

/// Phase 2: per-bucket displacement search, buckets in index order.
fn displace(
    pairs: &[PreHash],
    counts: &[u32],
    seed0: u32,
    m: u32,
) -> Result<(NibbleArray, Vec<u8>, ZeroBitmap, BucketStatistics), BuildError> {
    let num_buckets = m as usize;

    // Bucket membership as intrusive linked lists: head per bucket,
    // next per key. Peak working set stays O(n + m).
    let mut head = vec![u32::MAX; num_buckets];
    let mut next = vec![u32::MAX; pairs.len()];
    for (i, pre) in pairs.iter().enumerate() {
        let bucket = pre.bucket(seed0, m) as usize;
        next[i] = head[bucket];
        head[bucket] = i as u32;
    }

    let mut bucket_sizes = NibbleArray::new(num_buckets);
    let mut zero_bitmap = ZeroBitmap::new(num_buckets);
    let mut seed_stream = Vec::new();
    let mut stats = BucketStatistics::new();

    for bucket in 0..num_buckets {
        let size = counts[bucket];
        bucket_sizes.set(bucket, size);
        if size <= 1 {
            zero_bitmap.set(bucket);
            stats.record_bucket(size, 0);
            continue;
        }

        let cap = if size <= 14 { SMALL_BUCKET_TRIAL_CAP } else { LARGE_BUCKET_TRIAL_CAP };
        let mut seed = 0u32;
        loop {
            let mut visited: u16 = 0;
            let mut permutes = true;
            let mut cursor = head[bucket];
            while cursor != u32::MAX {
                let slot = pairs[cursor as usize].slot(seed, size);
                let bit = 1u16 << slot;
                if visited & bit != 0 {
                    permutes = false;
                    break;
                }
                visited |= bit;
                cursor = next[cursor as usize];
            }
            if permutes {
                break;
            }
            seed += 1;
            if seed >= cap {
                return Err(BuildError::DisplacementExhausted { bucket, size });
            }
        }

        stats.record_bucket(size, seed);
        if seed == 0 {
            zero_bitmap.set(bucket);
        } else {
            varint::write_u32(&mut seed_stream, seed);
        }
    }

    Ok((bucket_sizes, seed_stream, zero_bitmap, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildOptions;

    fn sample_keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("key-{i:06}")).collect()
    }

    #[test]
    fn test_bucket_count_formula() {
        assert_eq!(bucket_count(1, 5), 1);
        assert_eq!(bucket_count(5, 5), 1);
        assert_eq!(bucket_count(6, 5), 2);
        assert_eq!(bucket_count(100, 5), 20);
        assert_eq!(bucket_count(100, 10), 10);
        assert_eq!(bucket_count(7, 10), 1);
        // Above the threshold the effective level drops by 10%.
        assert_eq!(bucket_count(600_000, 5), (600_000f64 / 4.5).ceil() as u32);
    }

    #[test]
    fn test_duplicate_keys_fail_the_seed_search() {
        let keys = ["same", "other", "same"];
        let err = MphfBuilder::new(BuildOptions::default()).unwrap().build(&keys).unwrap_err();
        assert_eq!(err, BuildError::HashSeedExhausted);
    }

    #[test]
    fn test_perfect_and_minimal_small() {
        let keys = sample_keys(200);
        let dict = MphfBuilder::new(BuildOptions::default()).unwrap().build(&keys).unwrap();
        let mut seen = vec![false; keys.len()];
        for key in &keys {
            let index = dict.hash(key).expect("member key must hit") as usize;
            assert!(index < keys.len());
            assert!(!seen[index], "index {index} assigned twice");
            seen[index] = true;
        }
        assert!(seen.into_iter().all(|hit| hit));
    }

    #[test]
    fn test_all_levels_build() {
        let keys = sample_keys(64);
        for level in 1..=10 {
            let options = BuildOptions::default().with_level(level);
            let dict = MphfBuilder::new(options).unwrap().build(&keys).unwrap();
            assert_eq!(dict.len(), keys.len());
            let mut seen = AHashSet::new();
            for key in &keys {
                assert!(seen.insert(dict.hash(key).unwrap()));
            }
        }
    }

    #[test]
    fn test_single_key() {
        let dict = MphfBuilder::new(BuildOptions::default()).unwrap().build(&["only"]).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.hash("only"), Some(0));
    }

    #[test]
    fn test_validation_rejects_most_outsiders() {
        let keys = sample_keys(500);
        let options = BuildOptions::default().with_validation(ValidationMode::Bits16);
        let dict = MphfBuilder::new(options).unwrap().build(&keys).unwrap();
        for key in &keys {
            assert!(dict.hash(key).is_some(), "member {key} must not be rejected");
        }
        let misses = (0..500)
            .filter(|i| dict.hash(&format!("outsider-{i:06}")).is_none())
            .count();
        // Expected false-positive rate is 2^-16 per probe.
        assert!(misses >= 498, "only {misses}/500 outsiders rejected");
    }

    #[test]
    fn test_builds_are_reproducible() {
        let keys = sample_keys(300);
        let builder = MphfBuilder::new(BuildOptions::default()).unwrap();
        let first = builder.build(&keys).unwrap().to_bytes();
        let second = builder.build(&keys).unwrap().to_bytes();
        assert_eq!(first, second);
    }
}
