//! MPHF-addressed membership filter
//!
//! An approximate-membership structure with zero false negatives: an
//! MPHF over the key set (validation off) addresses a packed table of
//! `b`-bit fingerprints, `b` in {6, 8, 10, 12, 14, 16}. A query hashes
//! to a slot and compares fingerprints; inputs outside the set pass with
//! probability about `2^-b`.
//!
//! The fingerprint table serializes either bit-packed at fixed width or
//! as a LEB128 stream with a checkpoint every 128 entries, which allows
//! random access into the stream without decoding it fully.

use crate::bits::{packed_byte_len, BitPacked};
use crate::builder::{BuildError, BuildOptions, MphfBuilder, ValidationMode};
use crate::codec::{put_u32, take_slice, take_u32, DecodeError};
use crate::compress;
use crate::constants::{CHECKPOINT_INTERVAL, DEFAULT_LEVEL, FP_SEED};
use crate::dictionary::MphDictionary;
use crate::hashing::hash_str;
use crate::varint;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Fingerprint width of the filter table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterBits {
    /// 6-bit fingerprints.
    B6,
    /// 8-bit fingerprints.
    #[default]
    B8,
    /// 10-bit fingerprints.
    B10,
    /// 12-bit fingerprints.
    B12,
    /// 14-bit fingerprints.
    B14,
    /// 16-bit fingerprints.
    B16,
}

impl FilterBits {
    /// Width in bits.
    pub fn width(self) -> u32 {
        match self {
            FilterBits::B6 => 6,
            FilterBits::B8 => 8,
            FilterBits::B10 => 10,
            FilterBits::B12 => 12,
            FilterBits::B14 => 14,
            FilterBits::B16 => 16,
        }
    }

    /// Mask selecting the low `width` bits.
    pub fn mask(self) -> u32 {
        (1 << self.width()) - 1
    }

    /// Select a width.
    pub fn from_width(width: u32) -> Option<Self> {
        match width {
            6 => Some(FilterBits::B6),
            8 => Some(FilterBits::B8),
            10 => Some(FilterBits::B10),
            12 => Some(FilterBits::B12),
            14 => Some(FilterBits::B14),
            16 => Some(FilterBits::B16),
            _ => None,
        }
    }
}

impl fmt::Display for FilterBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.width())
    }
}

impl FromStr for FilterBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .ok()
            .and_then(FilterBits::from_width)
            .ok_or_else(|| format!("invalid fingerprint width {s:?} (expected 6/8/10/12/14/16)"))
    }
}

/// Configuration for building a filter.
#[derive(Clone, Copy, Debug)]
pub struct FilterOptions {
    /// Fingerprint width.
    pub bits: FilterBits,
    /// MPHF level.
    pub level: u8,
    /// Serialize the fingerprint table as a checkpointed LEB128 stream
    /// instead of the fixed-width packed form.
    pub checkpoints: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self { bits: FilterBits::default(), level: DEFAULT_LEVEL, checkpoints: false }
    }
}

// Serialized payload encodings.
const ENCODING_PACKED: u8 = 0;
const ENCODING_CHECKPOINTED: u8 = 1;

/// Byte sizes of the serialized sections of a filter, for size
/// analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterSizes {
    /// Embedded MPHF frame.
    pub mphf: usize,
    /// Fingerprint payload in its serialized encoding (including the
    /// checkpoint table when present).
    pub fingerprints: usize,
    /// The whole serialized form.
    pub total: usize,
}

/// An approximate-membership filter, immutable after construction or
/// decode.
#[derive(Clone, Debug)]
pub struct FilterDictionary {
    mphf: MphDictionary,
    bits: FilterBits,
    fingerprints: BitPacked,
    checkpoints: bool,
}

impl FilterDictionary {
    /// Build a filter over `keys` with the default options.
    pub fn build<S: AsRef<str>>(keys: &[S]) -> Result<Self, BuildError> {
        Self::build_with_options(keys, FilterOptions::default())
    }

    /// Build a filter over `keys`.
    pub fn build_with_options<S: AsRef<str>>(
        keys: &[S],
        options: FilterOptions,
    ) -> Result<Self, BuildError> {
        let build_options = BuildOptions::new(options.level, ValidationMode::None)?;
        let mphf = MphfBuilder::new(build_options)?.build(keys)?;

        let width = options.bits.width();
        let mask = options.bits.mask();
        let mut fingerprints = BitPacked::with_len(width, keys.len());
        for key in keys {
            let key = key.as_ref();
            let slot = mphf.hash(key).expect("member key evaluates to a slot");
            fingerprints.set(slot as usize, hash_str(key, FP_SEED) & mask);
        }

        info!("built filter: {} keys at {} bits per fingerprint", keys.len(), width);
        Ok(Self { mphf, bits: options.bits, fingerprints, checkpoints: options.checkpoints })
    }

    /// Approximate membership test: `true` for every key of the build
    /// set, `true` with probability about `2^-b` otherwise.
    pub fn has(&self, key: &str) -> bool {
        match self.mphf.hash(key) {
            None => false,
            Some(slot) => {
                self.fingerprints.get(slot as usize) == hash_str(key, FP_SEED) & self.bits.mask()
            }
        }
    }

    /// Number of keys in the filter.
    pub fn len(&self) -> usize {
        self.mphf.len()
    }

    /// Whether the filter was built over the empty set.
    pub fn is_empty(&self) -> bool {
        self.mphf.is_empty()
    }

    /// Fingerprint width of the table.
    pub fn bits(&self) -> FilterBits {
        self.bits
    }

    /// Byte sizes of the serialized sections.
    pub fn section_sizes(&self) -> FilterSizes {
        let fingerprints = if self.checkpoints {
            let stream = SerializedFingerprints::from_packed(&self.fingerprints);
            stream.stream.len() + 4 * stream.checkpoints.len()
        } else {
            self.fingerprints.as_bytes().len()
        };
        FilterSizes { mphf: self.mphf.to_bytes().len(), fingerprints, total: self.to_bytes().len() }
    }

    /// Serialize.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mphf_bytes = self.mphf.to_bytes();
        put_u32(&mut buf, mphf_bytes.len() as u32);
        buf.extend_from_slice(&mphf_bytes);
        buf.push(self.bits.width() as u8);

        if self.checkpoints {
            buf.push(ENCODING_CHECKPOINTED);
            let stream = SerializedFingerprints::from_packed(&self.fingerprints);
            put_u32(&mut buf, stream.stream.len() as u32);
            buf.extend_from_slice(&stream.stream);
            put_u32(&mut buf, stream.checkpoints.len() as u32);
            for &offset in &stream.checkpoints {
                put_u32(&mut buf, offset);
            }
        } else {
            buf.push(ENCODING_PACKED);
            put_u32(&mut buf, self.fingerprints.as_bytes().len() as u32);
            buf.extend_from_slice(self.fingerprints.as_bytes());
        }
        buf
    }

    /// Decode a serialized filter.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut pos = 0;
        let mphf_len = take_u32(bytes, &mut pos)? as usize;
        let mphf = MphDictionary::from_bytes(take_slice(bytes, &mut pos, mphf_len)?)?;
        let n = mphf.len();

        let width_byte = take_slice(bytes, &mut pos, 1)?[0];
        let bits = FilterBits::from_width(width_byte as u32)
            .ok_or(DecodeError::Malformed("unknown fingerprint width"))?;
        let encoding = take_slice(bytes, &mut pos, 1)?[0];

        let (fingerprints, checkpoints) = match encoding {
            ENCODING_PACKED => {
                let payload_len = take_u32(bytes, &mut pos)? as usize;
                let expected = packed_byte_len(bits.width(), n);
                if payload_len != expected {
                    return Err(DecodeError::FingerprintLengthMismatch {
                        got: payload_len,
                        expected,
                        slots: n,
                        width: bits.width(),
                    });
                }
                let payload = take_slice(bytes, &mut pos, payload_len)?.to_vec();
                (BitPacked::from_bytes(bits.width(), n, payload)?, false)
            }
            ENCODING_CHECKPOINTED => {
                let stream_len = take_u32(bytes, &mut pos)? as usize;
                let stream = take_slice(bytes, &mut pos, stream_len)?.to_vec();
                let checkpoint_count = take_u32(bytes, &mut pos)? as usize;
                let mut checkpoints = Vec::new();
                for _ in 0..checkpoint_count {
                    checkpoints.push(take_u32(bytes, &mut pos)?);
                }
                let serialized = SerializedFingerprints::from_parts(stream, checkpoints, n)?;
                (serialized.expand(bits.width())?, true)
            }
            _ => return Err(DecodeError::Malformed("unknown fingerprint encoding")),
        };

        if pos != bytes.len() {
            return Err(DecodeError::TrailingBytes(bytes.len() - pos));
        }
        Ok(Self { mphf, bits, fingerprints, checkpoints })
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

/// A LEB128-encoded fingerprint stream with a checkpoint recording the
/// byte offset of every 128th entry, so any entry can be read without
/// decoding the entries before the nearest checkpoint.
#[derive(Clone, Debug)]
pub struct SerializedFingerprints {
    stream: Vec<u8>,
    checkpoints: Vec<u32>,
    len: usize,
}

impl SerializedFingerprints {
    /// Encode a packed fingerprint table.
    pub fn from_packed(fingerprints: &BitPacked) -> Self {
        let mut stream = Vec::new();
        let mut checkpoints = Vec::new();
        for i in 0..fingerprints.len() {
            if i % CHECKPOINT_INTERVAL == 0 {
                checkpoints.push(stream.len() as u32);
            }
            varint::write_u32(&mut stream, fingerprints.get(i));
        }
        Self { stream, checkpoints, len: fingerprints.len() }
    }

    /// Reassemble from decoded parts, verifying the checkpoint table
    /// shape against the entry count.
    pub(crate) fn from_parts(
        stream: Vec<u8>,
        checkpoints: Vec<u32>,
        len: usize,
    ) -> Result<Self, DecodeError> {
        let expected = len.div_ceil(CHECKPOINT_INTERVAL);
        if checkpoints.len() != expected {
            return Err(DecodeError::Malformed("checkpoint count mismatch"));
        }
        if len > 0 && checkpoints[0] != 0 {
            return Err(DecodeError::Malformed("first checkpoint must be zero"));
        }
        for pair in checkpoints.windows(2) {
            if pair[0] >= pair[1] {
                return Err(DecodeError::Malformed("checkpoints must ascend"));
            }
        }
        if let Some(&last) = checkpoints.last() {
            if (last as usize) >= stream.len() {
                return Err(DecodeError::Malformed("checkpoint past the stream end"));
            }
        }
        Ok(Self { stream, checkpoints, len })
    }

    /// Random-access read of entry `index`: seek to the nearest
    /// checkpoint, then decode at most 127 varints.
    pub fn get(&self, index: usize) -> Result<u32, DecodeError> {
        if index >= self.len {
            return Err(DecodeError::Malformed("fingerprint index out of range"));
        }
        let checkpoint = index / CHECKPOINT_INTERVAL;
        let mut pos = self.checkpoints[checkpoint] as usize;
        let mut value = 0;
        for _ in 0..=(index % CHECKPOINT_INTERVAL) {
            value = varint::read_u32(&self.stream, &mut pos)?;
        }
        Ok(value)
    }

    /// Number of entries in the stream.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the stream holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decode the whole stream into a packed table, verifying that every
    /// value fits the width and that the stream is fully consumed.
    pub(crate) fn expand(&self, width: u32) -> Result<BitPacked, DecodeError> {
        let mut packed = BitPacked::with_len(width, self.len);
        let mut pos = 0;
        let limit = if width == 32 { u32::MAX } else { (1 << width) - 1 };
        for i in 0..self.len {
            if i % CHECKPOINT_INTERVAL == 0 && self.checkpoints[i / CHECKPOINT_INTERVAL] as usize != pos
            {
                return Err(DecodeError::Malformed("checkpoint disagrees with the stream"));
            }
            let value = varint::read_u32(&self.stream, &mut pos)?;
            if value > limit {
                return Err(DecodeError::Malformed("fingerprint wider than the declared width"));
            }
            packed.set(i, value);
        }
        if pos != self.stream.len() {
            return Err(DecodeError::TrailingBytes(self.stream.len() - pos));
        }
        Ok(packed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("member-{i:05}")).collect()
    }

    #[test]
    fn test_no_false_negatives_all_widths() {
        let keys = sample_keys(300);
        for width in [6u32, 8, 10, 12, 14, 16] {
            let options = FilterOptions {
                bits: FilterBits::from_width(width).unwrap(),
                ..FilterOptions::default()
            };
            let filter = FilterDictionary::build_with_options(&keys, options).unwrap();
            for key in &keys {
                assert!(filter.has(key), "width {width}: member {key} rejected");
            }
        }
    }

    #[test]
    fn test_rejects_most_outsiders() {
        let keys = sample_keys(400);
        let filter = FilterDictionary::build(&keys).unwrap();
        let hits = (0..1000).filter(|i| filter.has(&format!("outsider-{i:05}"))).count();
        // Expected false-positive rate at 8 bits is about 0.39%.
        assert!(hits < 30, "{hits}/1000 outsiders accepted");
    }

    #[test]
    fn test_empty_filter() {
        let filter = FilterDictionary::build(&Vec::<String>::new()).unwrap();
        assert!(filter.is_empty());
        assert!(!filter.has("anything"));
        let decoded = FilterDictionary::from_bytes(&filter.to_bytes()).unwrap();
        assert!(!decoded.has("anything"));
    }

    #[test]
    fn test_roundtrip_packed_and_checkpointed() {
        let keys = sample_keys(500);
        for checkpoints in [false, true] {
            let options = FilterOptions { checkpoints, ..FilterOptions::default() };
            let filter = FilterDictionary::build_with_options(&keys, options).unwrap();
            let bytes = filter.to_bytes();
            let decoded = FilterDictionary::from_bytes(&bytes).unwrap();
            for key in &keys {
                assert!(decoded.has(key));
            }
            assert_eq!(decoded.bits(), filter.bits());
            // Probe agreement on outsiders too.
            for i in 0..200 {
                let probe = format!("probe-{i}");
                assert_eq!(decoded.has(&probe), filter.has(&probe));
            }

            let decoded = FilterDictionary::from_compressed(&filter.to_compressed_bytes()).unwrap();
            assert!(decoded.has(&keys[0]));
        }
    }

    #[test]
    fn test_serialized_stream_random_access() {
        let mut packed = BitPacked::with_len(12, 700);
        for i in 0..700 {
            packed.set(i, ((i as u32).wrapping_mul(2654435761)) & 0xFFF);
        }
        let stream = SerializedFingerprints::from_packed(&packed);
        assert_eq!(stream.len(), 700);
        assert_eq!(stream.checkpoints.len(), 6);
        for i in [0usize, 1, 127, 128, 129, 255, 256, 500, 699] {
            assert_eq!(stream.get(i).unwrap(), packed.get(i), "entry {i}");
        }
        assert!(stream.get(700).is_err());
        let expanded = stream.expand(12).unwrap();
        assert_eq!(expanded, packed);
    }

    #[test]
    fn test_corrupt_checkpoints_rejected() {
        let mut packed = BitPacked::with_len(8, 200);
        for i in 0..200 {
            packed.set(i, i as u32);
        }
        let good = SerializedFingerprints::from_packed(&packed);

        // Wrong checkpoint count.
        assert!(SerializedFingerprints::from_parts(good.stream.clone(), vec![0], 200).is_err());
        // Nonzero first checkpoint.
        assert!(SerializedFingerprints::from_parts(
            good.stream.clone(),
            vec![1, good.checkpoints[1]],
            200
        )
        .is_err());
        // Checkpoint that disagrees with the stream contents.
        let off = SerializedFingerprints::from_parts(
            good.stream.clone(),
            vec![0, good.checkpoints[1] + 1],
            200,
        )
        .unwrap();
        assert!(off.expand(8).is_err());
    }

    #[test]
    fn test_unknown_width_rejected() {
        let keys = sample_keys(10);
        let filter = FilterDictionary::build(&keys).unwrap();
        let mut bytes = filter.to_bytes();
        let mphf_len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        bytes[4 + mphf_len] = 7;
        assert!(matches!(
            FilterDictionary::from_bytes(&bytes),
            Err(DecodeError::Malformed("unknown fingerprint width"))
        ));
    }

    #[test]
    fn test_section_sizes() {
        let keys = sample_keys(256);
        let filter = FilterDictionary::build(&keys).unwrap();
        let sizes = filter.section_sizes();
        assert_eq!(sizes.fingerprints, 256);
        assert_eq!(sizes.total, filter.to_bytes().len());
        assert!(sizes.mphf + sizes.fingerprints < sizes.total);

        let checkpointed = FilterDictionary::build_with_options(
            &keys,
            FilterOptions { checkpoints: true, ..FilterOptions::default() },
        )
        .unwrap();
        let sizes = checkpointed.section_sizes();
        assert_eq!(sizes.total, checkpointed.to_bytes().len());
    }

    #[test]
    fn test_bits_parsing() {
        assert_eq!("8".parse::<FilterBits>().unwrap(), FilterBits::B8);
        assert_eq!("16".parse::<FilterBits>().unwrap(), FilterBits::B16);
        assert!("7".parse::<FilterBits>().is_err());
        assert!("".parse::<FilterBits>().is_err());
    }
}
