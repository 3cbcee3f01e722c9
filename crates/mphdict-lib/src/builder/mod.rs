//! MPHF construction
//!
//! The builder runs four phases in order: pre-hash seed search,
//! best-fit bucketing, per-bucket displacement, and (when validation is
//! requested) fingerprint fill. Every failure is fatal; callers retry
//! with a lower level if the bucket cap cannot be met.

pub mod config;
pub mod mphf_builder;
pub mod statistics;

pub use config::{BuildOptions, ValidationMode};
pub use mphf_builder::MphfBuilder;
pub use statistics::BucketStatistics;

use crate::constants::{MAX_BUCKET_SIZE, MAX_HASH_SEED};
use thiserror::Error;

/// Error type for dictionary construction. All variants are fatal: the
/// build holds no partial state worth resuming.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The level is outside the accepted range.
    #[error("level {0} is outside the accepted range 1..=10")]
    InvalidLevel(u8),
    /// The key set cannot be indexed by the 32-bit format.
    #[error("key set of {0} keys exceeds the 32-bit capacity of the format")]
    TooManyKeys(usize),
    /// No collision-free pre-hash seed was found; the key set almost
    /// certainly contains duplicates.
    #[error(
        "no collision-free pre-hash seed in {attempts} attempts; the key set most likely contains duplicate keys",
        attempts = MAX_HASH_SEED + 1
    )]
    HashSeedExhausted,
    /// No bucket distribution respected the occupancy cap.
    #[error(
        "no bucket distribution with maximum occupancy <= {limit} (best observed {max_bucket}); lower the level and rebuild",
        limit = MAX_BUCKET_SIZE
    )]
    BucketOverflow {
        /// Smallest maximum bucket occupancy observed over all attempts.
        max_bucket: u32,
    },
    /// A bucket exhausted its displacement trial cap.
    #[error("displacement search exhausted for bucket {bucket} of size {size}")]
    DisplacementExhausted {
        /// Index of the offending bucket.
        bucket: usize,
        /// Occupancy of the offending bucket.
        size: u32,
    },
}
