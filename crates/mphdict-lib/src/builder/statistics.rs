//! Bucket and displacement statistics
//!
//! Collected during the displacement phase and logged after a build.
//! Useful for judging whether a level suits a key set: a distribution
//! dominated by singleton buckets wastes space, while one hugging the
//! occupancy cap costs displacement trials.

use tracing::info;

/// Statistics about bucket sizes and displacement seeds.
#[derive(Debug, Clone, Default)]
pub struct BucketStatistics {
    /// Total number of buckets.
    pub num_buckets: u64,

    /// Total number of keys.
    pub num_keys: u64,

    /// Number of empty buckets.
    pub num_empty_buckets: u64,

    /// Number of singleton buckets (size 1).
    pub num_singleton_buckets: u64,

    /// Number of buckets that needed a displacement search (size >= 2).
    pub num_displaced_buckets: u64,

    /// Number of buckets whose displacement seed is 0 (absent from the
    /// seed stream), including all empty and singleton buckets.
    pub num_zero_seed_buckets: u64,

    /// Maximum observed bucket size.
    pub max_bucket_size: u32,

    /// Largest displacement seed stored.
    pub max_seed: u32,
}

impl BucketStatistics {
    /// Create a new statistics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one bucket's size and chosen displacement seed.
    pub fn record_bucket(&mut self, size: u32, seed: u32) {
        self.num_buckets += 1;
        self.num_keys += size as u64;
        match size {
            0 => self.num_empty_buckets += 1,
            1 => self.num_singleton_buckets += 1,
            _ => self.num_displaced_buckets += 1,
        }
        if seed == 0 {
            self.num_zero_seed_buckets += 1;
        }
        if size > self.max_bucket_size {
            self.max_bucket_size = size;
        }
        if seed > self.max_seed {
            self.max_seed = seed;
        }
    }

    /// Log a statistics summary via tracing.
    pub fn print_summary(&self) {
        if self.num_buckets == 0 {
            info!("Bucket statistics: empty dictionary");
            return;
        }
        let pct = |count: u64| (count as f64 * 100.0) / self.num_buckets as f64;
        info!("Bucket statistics:");
        info!("  Buckets: {} for {} keys", self.num_buckets, self.num_keys);
        info!("  Empty: {} ({:.2}%)", self.num_empty_buckets, pct(self.num_empty_buckets));
        info!(
            "  Singleton: {} ({:.2}%)",
            self.num_singleton_buckets,
            pct(self.num_singleton_buckets)
        );
        info!(
            "  Displaced: {} ({:.2}%)",
            self.num_displaced_buckets,
            pct(self.num_displaced_buckets)
        );
        info!(
            "  Zero-seed: {} ({:.2}%)",
            self.num_zero_seed_buckets,
            pct(self.num_zero_seed_buckets)
        );
        info!("  Max bucket size: {}", self.max_bucket_size);
        info!("  Max displacement seed: {}", self.max_seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_classification() {
        let mut stats = BucketStatistics::new();
        stats.record_bucket(0, 0);
        stats.record_bucket(1, 0);
        stats.record_bucket(1, 0);
        stats.record_bucket(4, 0);
        stats.record_bucket(7, 1234);

        assert_eq!(stats.num_buckets, 5);
        assert_eq!(stats.num_keys, 13);
        assert_eq!(stats.num_empty_buckets, 1);
        assert_eq!(stats.num_singleton_buckets, 2);
        assert_eq!(stats.num_displaced_buckets, 2);
        assert_eq!(stats.num_zero_seed_buckets, 4);
        assert_eq!(stats.max_bucket_size, 7);
        assert_eq!(stats.max_seed, 1234);
    }

    #[test]
    fn test_empty_summary_does_not_divide_by_zero() {
        let stats = BucketStatistics::new();
        stats.print_summary();
        assert_eq!(stats.num_buckets, 0);
    }
}
