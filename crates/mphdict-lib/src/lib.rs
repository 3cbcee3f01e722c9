// mphdict: minimal perfect hashing for string sets
//
// Builds minimal perfect hash dictionaries over distinct string sets and
// two composite structures on top of them: a reverse-lookup dictionary
// for multi-maps and an approximate-membership filter.

#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod bits;
pub mod builder;
pub mod codec;
pub mod compress;
pub mod constants;
pub mod dictionary;
pub mod filter;
pub mod hashing;
pub mod lookup;
pub mod varint;

// Re-export common types at crate root
pub use builder::{BucketStatistics, BuildError, BuildOptions, MphfBuilder, ValidationMode};
pub use codec::DecodeError;
pub use dictionary::{MphDictionary, SectionSizes};
pub use filter::{FilterBits, FilterDictionary, FilterOptions, FilterSizes};
pub use lookup::{LookupDictionary, LookupSizes};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}
