//! The MPHF dictionary: evaluation and the serialized frame
//!
//! [`MphDictionary`] is the decoded, immutable form of a built minimal
//! perfect hash function. The serialized frame stores only the compact
//! parts (nibble-packed bucket sizes, the LEB128 displacement seed
//! stream, the seed-zero bitmap); decoding reconstructs the O(1)
//! evaluation tables — bucket offsets as a prefix sum, and the seed
//! stream expanded against the bitmap into a flat per-bucket array.
//! Seeds are never decoded lazily during queries.
//!
//! The structure is freely shareable across threads for read-only use:
//! no interior mutability anywhere.

use crate::bits::{packed_byte_len, BitPacked, NibbleArray, ZeroBitmap};
use crate::builder::ValidationMode;
use crate::codec::{CborReader, CborWriter, DecodeError};
use crate::compress;
use crate::constants::{DICTIONARY_FRAME_ARITY, FP_SEED};
use crate::hashing::{hash_str, PreHash};
use crate::varint;

/// Byte sizes of the variable-length sections of a serialized MPHF
/// frame, for size analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionSizes {
    /// Nibble-packed bucket occupancy counters.
    pub bucket_sizes: usize,
    /// LEB128 displacement seed stream.
    pub seed_stream: usize,
    /// Seed-zero bitmap.
    pub zero_bitmap: usize,
    /// Bit-packed fingerprint table (0 with validation off).
    pub fingerprints: usize,
    /// The whole serialized frame, including heads and fixed fields.
    pub total: usize,
}

/// A minimal perfect hash function over a string set, immutable after
/// construction or decode.
#[derive(Clone, Debug)]
pub struct MphDictionary {
    /// Cardinality of the key set.
    n: u32,
    /// Bucket count.
    m: u32,
    /// Pre-hash seed: the smallest seed with no 64-bit pair collisions.
    hash_seed: u32,
    /// Bucket-distribution seed.
    seed0: u32,
    /// Packed 4-bit bucket occupancy counters, one per bucket.
    bucket_sizes: NibbleArray,
    /// Concatenated LEB128 displacement seeds of buckets with a nonzero
    /// seed, in bucket order.
    seed_stream: Vec<u8>,
    /// Bit `i` set means bucket `i` has displacement seed 0 and no entry
    /// in the seed stream.
    zero_bitmap: ZeroBitmap,
    /// Fingerprint width stored per slot.
    validation: ValidationMode,
    /// Per-slot fingerprints, present iff validation is on.
    fingerprints: Option<BitPacked>,
    /// Prefix sums of bucket sizes, `m + 1` entries (empty when `m` is 0).
    offsets: Vec<u32>,
    /// Expanded displacement seeds, one per bucket.
    seeds: Vec<u32>,
}

impl MphDictionary {
    /// Assemble a dictionary from its serialized parts, reconstructing
    /// the offsets and seeds tables and verifying the invariants the
    /// format promises.
    pub(crate) fn assemble(
        n: u32,
        m: u32,
        hash_seed: u32,
        seed0: u32,
        bucket_sizes: NibbleArray,
        seed_stream: Vec<u8>,
        zero_bitmap: ZeroBitmap,
        validation: ValidationMode,
        fingerprints: Option<BitPacked>,
    ) -> Result<Self, DecodeError> {
        debug_assert_eq!(bucket_sizes.len(), m as usize);
        debug_assert_eq!(zero_bitmap.len(), m as usize);

        let mu = m as usize;
        let mut offsets = Vec::new();
        let mut seeds = Vec::new();
        if mu > 0 {
            offsets.reserve_exact(mu + 1);
            offsets.push(0u32);
            seeds.reserve_exact(mu);
            let mut total: u64 = 0;
            let mut stream_pos = 0;
            for bucket in 0..mu {
                let size = bucket_sizes.get(bucket);
                total += size as u64;
                if total > n as u64 {
                    return Err(DecodeError::Malformed("bucket sizes exceed the key count"));
                }
                offsets.push(total as u32);
                if zero_bitmap.get(bucket) {
                    seeds.push(0);
                } else if size >= 2 {
                    seeds.push(varint::read_u32(&seed_stream, &mut stream_pos)?);
                } else {
                    return Err(DecodeError::Malformed(
                        "trivial bucket missing its seed-zero bitmap bit",
                    ));
                }
            }
            if total != n as u64 {
                return Err(DecodeError::Malformed("bucket sizes do not sum to the key count"));
            }
            if stream_pos != seed_stream.len() {
                return Err(DecodeError::Malformed("unconsumed bytes in the seed stream"));
            }
        } else if n != 0 {
            return Err(DecodeError::Malformed("nonzero key count with no buckets"));
        } else if !seed_stream.is_empty() {
            return Err(DecodeError::Malformed("seed stream present in an empty dictionary"));
        }

        match (validation, &fingerprints) {
            (ValidationMode::None, Some(_)) => {
                return Err(DecodeError::Malformed("fingerprints present with validation off"));
            }
            (ValidationMode::None, None) => {}
            (_, None) => {
                return Err(DecodeError::Malformed("fingerprints missing with validation on"));
            }
            (mode, Some(fp)) => {
                debug_assert_eq!(fp.width(), mode.width());
                if fp.len() != n as usize {
                    return Err(DecodeError::Malformed("fingerprint slot count mismatch"));
                }
            }
        }

        Ok(Self {
            n,
            m,
            hash_seed,
            seed0,
            bucket_sizes,
            seed_stream,
            zero_bitmap,
            validation,
            fingerprints,
            offsets,
            seeds,
        })
    }

    /// The dictionary of the empty key set: every evaluation misses.
    pub(crate) fn empty(validation: ValidationMode) -> Self {
        let fingerprints = match validation {
            ValidationMode::None => None,
            mode => Some(BitPacked::with_len(mode.width(), 0)),
        };
        Self {
            n: 0,
            m: 0,
            hash_seed: 0,
            seed0: 0,
            bucket_sizes: NibbleArray::new(0),
            seed_stream: Vec::new(),
            zero_bitmap: ZeroBitmap::new(0),
            validation,
            fingerprints,
            offsets: Vec::new(),
            seeds: Vec::new(),
        }
    }

    /// Attach the fingerprint table after the slots are known. Used by
    /// the builder, which needs the fingerprint-less dictionary to
    /// compute each key's slot first.
    pub(crate) fn attach_fingerprints(&mut self, validation: ValidationMode, fingerprints: BitPacked) {
        debug_assert_eq!(fingerprints.len(), self.n as usize);
        debug_assert_eq!(fingerprints.width(), validation.width());
        self.validation = validation;
        self.fingerprints = Some(fingerprints);
    }

    /// Evaluate a key.
    ///
    /// Returns the key's index in `[0, n)` for keys of the build set.
    /// For other inputs the result is `None` when the bucket is empty or
    /// a stored fingerprint disagrees; with validation off, an arbitrary
    /// but consistent in-range index may be returned instead.
    #[inline]
    pub fn hash(&self, key: &str) -> Option<u32> {
        if self.n == 0 {
            return None;
        }
        let pre = PreHash::new(key, self.hash_seed);
        let bucket = pre.bucket(self.seed0, self.m) as usize;
        let start = self.offsets[bucket];
        let size = self.offsets[bucket + 1] - start;
        let index = match size {
            0 => return None,
            1 => start,
            _ => start + pre.slot(self.seeds[bucket], size),
        };
        if let Some(fingerprints) = &self.fingerprints {
            let expected = hash_str(key, FP_SEED) & self.validation.mask();
            if fingerprints.get(index as usize) != expected {
                return None;
            }
        }
        Some(index)
    }

    /// Number of keys the dictionary was built over.
    #[inline]
    pub fn len(&self) -> usize {
        self.n as usize
    }

    /// Whether the dictionary was built over the empty set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Number of buckets.
    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.m as usize
    }

    /// The fingerprint validation mode.
    #[inline]
    pub fn validation(&self) -> ValidationMode {
        self.validation
    }

    /// Byte sizes of the serialized sections.
    pub fn section_sizes(&self) -> SectionSizes {
        SectionSizes {
            bucket_sizes: self.bucket_sizes.as_bytes().len(),
            seed_stream: self.seed_stream.len(),
            zero_bitmap: self.zero_bitmap.as_bytes().len(),
            fingerprints: self.fingerprints.as_ref().map_or(0, |fp| fp.as_bytes().len()),
            total: self.to_bytes().len(),
        }
    }

    /// Serialize into the 9-element tagged frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = CborWriter::new();
        writer.array_head(DICTIONARY_FRAME_ARITY);
        writer.unsigned(self.n as u64);
        writer.unsigned(self.m as u64);
        writer.unsigned(self.seed0 as u64);
        writer.bytes(self.bucket_sizes.as_bytes());
        writer.bytes(&self.seed_stream);
        writer.unsigned(self.validation.mode_int());
        match &self.fingerprints {
            Some(fingerprints) => writer.bytes(fingerprints.as_bytes()),
            None => writer.null(),
        }
        if self.m == 0 {
            writer.null();
        } else {
            writer.bytes(self.zero_bitmap.as_bytes());
        }
        writer.unsigned(self.hash_seed as u64);
        writer.into_bytes()
    }

    /// Decode a dictionary from its serialized frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = CborReader::new(bytes);
        let arity = reader.array_head()?;
        if arity != DICTIONARY_FRAME_ARITY {
            return Err(DecodeError::WrongArity { got: arity, expected: DICTIONARY_FRAME_ARITY });
        }
        let n = reader.unsigned32()?;
        let m = reader.unsigned32()?;
        let seed0 = reader.unsigned32()?;
        let bucket_bytes = reader.byte_string()?.to_vec();
        let seed_stream = reader.byte_string()?.to_vec();
        let mode_int = reader.unsigned()?;
        let validation =
            ValidationMode::from_mode_int(mode_int).ok_or(DecodeError::UnknownMode(mode_int))?;
        let fingerprint_bytes = reader.byte_string_or_null()?.map(<[u8]>::to_vec);
        let bitmap_bytes = reader.byte_string_or_null()?.map(<[u8]>::to_vec);
        let hash_seed = reader.unsigned32()?;
        reader.finish()?;

        let bucket_sizes = NibbleArray::from_bytes(m as usize, bucket_bytes)?;
        let zero_bitmap = match bitmap_bytes {
            Some(bytes) => ZeroBitmap::from_bytes(m as usize, bytes)?,
            None if m == 0 => ZeroBitmap::new(0),
            None => return Err(DecodeError::Malformed("missing seed-zero bitmap")),
        };
        let fingerprints = match (validation, fingerprint_bytes) {
            (ValidationMode::None, None) => None,
            (ValidationMode::None, Some(_)) => {
                return Err(DecodeError::Malformed("fingerprints present with validation off"));
            }
            (_, None) => {
                return Err(DecodeError::Malformed("fingerprints missing with validation on"));
            }
            (mode, Some(bytes)) => {
                let width = mode.width();
                let expected = packed_byte_len(width, n as usize);
                if bytes.len() != expected {
                    return Err(DecodeError::FingerprintLengthMismatch {
                        got: bytes.len(),
                        expected,
                        slots: n as usize,
                        width,
                    });
                }
                Some(BitPacked::from_bytes(width, n as usize, bytes)?)
            }
        };

        Self::assemble(
            n,
            m,
            hash_seed,
            seed0,
            bucket_sizes,
            seed_stream,
            zero_bitmap,
            validation,
            fingerprints,
        )
    }

    /// Serialize, then pass the bytes through the gzip boundary.
    pub fn to_compressed_bytes(&self) -> Vec<u8> {
        compress::compress(&self.to_bytes())
    }

    /// Decompress, then decode.
    pub fn from_compressed(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_bytes(&compress::decompress(bytes)?)
    }
}
