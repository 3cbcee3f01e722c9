//! Reverse-lookup dictionary
//!
//! Compresses a `key -> values` multi-map so the owning key(s) of any
//! value can be recovered from an MPHF over the value universe plus a
//! compact key-assignment table. Two representations exist:
//!
//! - **Sparse** (mode 0): one sorted list of value slots per key,
//!   delta-encoded on disk; an inverted slot-to-owners index is rebuilt
//!   once at load time.
//! - **Hybrid direct** (mode 1): a packed per-slot key index of
//!   `ceil(log2(K + 1))` bits, where the sentinel value `K` routes to a
//!   side table holding the true owner set. Chosen when fewer than 10%
//!   of distinct values are owned by more than one key, which is the
//!   common shape for alias data.

use crate::bits::{packed_byte_len, BitPacked};
use crate::builder::{BuildError, BuildOptions, MphfBuilder, ValidationMode};
use crate::codec::{put_u32, take_slice, take_u32, DecodeError};
use crate::compress;
use crate::constants::{ceil_log2, MODE1_MARKER};
use crate::dictionary::MphDictionary;
use crate::varint;
use ahash::{AHashMap, AHashSet};
use tracing::{debug, info};

/// Fraction of multi-owner values below which the hybrid direct
/// representation wins. Preserved across implementations so identical
/// inputs produce identical output sizes.
const DIRECT_MODE_COLLISION_CUTOFF: f64 = 0.1;

/// Byte sizes of the serialized sections of a lookup dictionary, for
/// size analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LookupSizes {
    /// Embedded MPHF frame.
    pub mphf: usize,
    /// Length-prefixed key table.
    pub keys: usize,
    /// Value-to-key assignment payload (packed table plus collision
    /// block, or the delta-encoded per-key lists).
    pub assignment: usize,
    /// The whole serialized form.
    pub total: usize,
}

/// A reverse-lookup dictionary over a string multi-map, immutable after
/// construction or decode.
#[derive(Clone, Debug)]
pub struct LookupDictionary {
    mphf: MphDictionary,
    keys: Vec<String>,
    repr: Repr,
}

#[derive(Clone, Debug)]
enum Repr {
    /// Mode 0: per-key sorted slot lists plus the load-time inverted
    /// index (slot -> ascending owner key indexes).
    Sparse {
        key_to_hashes: Vec<Vec<u32>>,
        inverted: Vec<Vec<u32>>,
    },
    /// Mode 1: packed per-slot key index with sentinel-routed collisions.
    Direct {
        value_to_key: BitPacked,
        collisions: AHashMap<u32, Vec<u32>>,
    },
}

impl LookupDictionary {
    /// Build from an ordered multi-map with the default options
    /// (8-bit validation on the value MPHF, default level).
    pub fn build<K: AsRef<str>, V: AsRef<str>>(map: &[(K, Vec<V>)]) -> Result<Self, BuildError> {
        Self::build_with_options(
            map,
            BuildOptions::default().with_validation(ValidationMode::Bits8),
        )
    }

    /// Build from an ordered multi-map with explicit MPHF options.
    pub fn build_with_options<K: AsRef<str>, V: AsRef<str>>(
        map: &[(K, Vec<V>)],
        options: BuildOptions,
    ) -> Result<Self, BuildError> {
        let keys: Vec<String> = map.iter().map(|(k, _)| k.as_ref().to_string()).collect();
        let key_count = keys.len() as u32;

        // Distinct value universe in first-occurrence order.
        let mut values: Vec<&str> = Vec::new();
        let mut seen: AHashSet<&str> = AHashSet::new();
        for (_, value_list) in map {
            for value in value_list {
                let value = value.as_ref();
                if seen.insert(value) {
                    values.push(value);
                }
            }
        }
        drop(seen);

        let mphf = MphfBuilder::new(options)?.build(&values)?;
        let n = values.len();

        // Owner key indexes per value slot. Keys are visited in
        // ascending index order, so each list is sorted; a key listing
        // the same value twice still counts once.
        let mut owners: Vec<Vec<u32>> = vec![Vec::new(); n];
        for (key_index, (_, value_list)) in map.iter().enumerate() {
            for value in value_list {
                let slot = mphf
                    .hash(value.as_ref())
                    .expect("universe member evaluates to a slot") as usize;
                let owner_list = &mut owners[slot];
                if owner_list.last() != Some(&(key_index as u32)) {
                    owner_list.push(key_index as u32);
                }
            }
        }

        let collision_count = owners.iter().filter(|o| o.len() > 1).count();
        let direct = (collision_count as f64) < DIRECT_MODE_COLLISION_CUTOFF * n as f64;
        info!(
            "lookup dictionary: {} keys, {} distinct values, {} shared ({} representation)",
            key_count,
            n,
            collision_count,
            if direct { "direct" } else { "sparse" }
        );

        let repr = if direct {
            let bits_per_key = ceil_log2(key_count as u64 + 1).max(1);
            let mut value_to_key = BitPacked::with_len(bits_per_key, n);
            let mut collisions = AHashMap::new();
            for (slot, owner_list) in owners.iter().enumerate() {
                if let [single] = owner_list.as_slice() {
                    value_to_key.set(slot, *single);
                } else {
                    value_to_key.set(slot, key_count);
                    collisions.insert(slot as u32, owner_list.clone());
                }
            }
            debug!(bits_per_key, collisions = collisions.len(), "direct table packed");
            Repr::Direct { value_to_key, collisions }
        } else {
            let mut key_to_hashes: Vec<Vec<u32>> = vec![Vec::new(); keys.len()];
            for (slot, owner_list) in owners.iter().enumerate() {
                for &owner in owner_list {
                    // Slots ascend, so each per-key list stays sorted.
                    key_to_hashes[owner as usize].push(slot as u32);
                }
            }
            Repr::Sparse { key_to_hashes, inverted: owners }
        };

        Ok(Self { mphf, keys, repr })
    }

    /// The owning key of `value`, or the first of several owners.
    /// `None` when the value is recognisably outside the map.
    pub fn query(&self, value: &str) -> Option<&str> {
        let slot = self.mphf.hash(value)?;
        match &self.repr {
            Repr::Direct { value_to_key, collisions } => {
                let index = value_to_key.get(slot as usize);
                if index >= self.keys.len() as u32 {
                    let owners = collisions.get(&slot)?;
                    self.key_at(*owners.first()?)
                } else {
                    self.key_at(index)
                }
            }
            Repr::Sparse { inverted, .. } => {
                let owners = inverted.get(slot as usize)?;
                self.key_at(*owners.first()?)
            }
        }
    }

    /// Every owning key of `value`, in key order. `None` when the value
    /// is recognisably outside the map.
    pub fn query_all(&self, value: &str) -> Option<Vec<&str>> {
        let slot = self.mphf.hash(value)?;
        let owners: &[u32] = match &self.repr {
            Repr::Direct { value_to_key, collisions } => {
                let index = value_to_key.get(slot as usize);
                if index >= self.keys.len() as u32 {
                    collisions.get(&slot).map(Vec::as_slice).unwrap_or(&[])
                } else {
                    return self.key_at(index).map(|key| vec![key]);
                }
            }
            Repr::Sparse { inverted, .. } => {
                inverted.get(slot as usize).map(Vec::as_slice).unwrap_or(&[])
            }
        };
        if owners.is_empty() {
            return None;
        }
        owners.iter().map(|&owner| self.key_at(owner)).collect()
    }

    fn key_at(&self, index: u32) -> Option<&str> {
        self.keys.get(index as usize).map(String::as_str)
    }

    /// The keys of the multi-map, in build order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of distinct values in the map.
    pub fn num_values(&self) -> usize {
        self.mphf.len()
    }

    /// Whether the hybrid direct representation is in use.
    pub fn uses_direct_mode(&self) -> bool {
        matches!(self.repr, Repr::Direct { .. })
    }

    /// Byte sizes of the serialized sections.
    pub fn section_sizes(&self) -> LookupSizes {
        let keys: usize = self.keys.iter().map(|key| 4 + key.len()).sum();
        let assignment = match &self.repr {
            Repr::Direct { value_to_key, collisions } => {
                value_to_key.as_bytes().len() + encode_collisions(collisions).len()
            }
            Repr::Sparse { key_to_hashes, .. } => encode_hash_lists(key_to_hashes).len(),
        };
        LookupSizes {
            mphf: self.mphf.to_bytes().len(),
            keys,
            assignment,
            total: self.to_bytes().len(),
        }
    }

    /// Serialize. All integer fields are big-endian `u32` unless LEB128.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mphf_bytes = self.mphf.to_bytes();
        put_u32(&mut buf, mphf_bytes.len() as u32);
        buf.extend_from_slice(&mphf_bytes);

        put_u32(&mut buf, self.keys.len() as u32);
        for key in &self.keys {
            put_u32(&mut buf, key.len() as u32);
            buf.extend_from_slice(key.as_bytes());
        }

        match &self.repr {
            Repr::Direct { value_to_key, collisions } => {
                put_u32(&mut buf, MODE1_MARKER);
                put_u32(&mut buf, value_to_key.width());
                put_u32(&mut buf, value_to_key.as_bytes().len() as u32);
                buf.extend_from_slice(value_to_key.as_bytes());
                let payload = encode_collisions(collisions);
                put_u32(&mut buf, payload.len() as u32);
                buf.extend_from_slice(&payload);
            }
            Repr::Sparse { key_to_hashes, .. } => {
                let payload = encode_hash_lists(key_to_hashes);
                put_u32(&mut buf, payload.len() as u32);
                buf.extend_from_slice(&payload);
            }
        }
        buf
    }

    /// Decode a serialized lookup dictionary.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut pos = 0;
        let mphf_len = take_u32(bytes, &mut pos)? as usize;
        let mphf = MphDictionary::from_bytes(take_slice(bytes, &mut pos, mphf_len)?)?;
        let n = mphf.len();

        let key_count = take_u32(bytes, &mut pos)? as usize;
        let mut keys = Vec::new();
        for _ in 0..key_count {
            let len = take_u32(bytes, &mut pos)? as usize;
            let raw = take_slice(bytes, &mut pos, len)?;
            let key = std::str::from_utf8(raw)
                .map_err(|_| DecodeError::Malformed("key is not valid UTF-8"))?;
            keys.push(key.to_owned());
        }

        let marker = take_u32(bytes, &mut pos)?;
        let repr = if marker == MODE1_MARKER {
            let bits_per_key = take_u32(bytes, &mut pos)?;
            if !(1..=32).contains(&bits_per_key) {
                return Err(DecodeError::Malformed("slot width outside 1..=32"));
            }
            let data_len = take_u32(bytes, &mut pos)? as usize;
            let expected = packed_byte_len(bits_per_key, n);
            if data_len != expected {
                return Err(DecodeError::LengthMismatch { got: data_len, expected });
            }
            let data = take_slice(bytes, &mut pos, data_len)?.to_vec();
            let value_to_key = BitPacked::from_bytes(bits_per_key, n, data)?;
            let payload_len = take_u32(bytes, &mut pos)? as usize;
            let payload = take_slice(bytes, &mut pos, payload_len)?;
            let collisions = decode_collisions(payload, key_count as u32, n)?;
            Repr::Direct { value_to_key, collisions }
        } else {
            let payload = take_slice(bytes, &mut pos, marker as usize)?;
            let key_to_hashes = decode_hash_lists(payload, key_count, n)?;
            let mut inverted: Vec<Vec<u32>> = vec![Vec::new(); n];
            for (key_index, list) in key_to_hashes.iter().enumerate() {
                for &slot in list {
                    inverted[slot as usize].push(key_index as u32);
                }
            }
            Repr::Sparse { key_to_hashes, inverted }
        };

        if pos != bytes.len() {
            return Err(DecodeError::TrailingBytes(bytes.len() - pos));
        }
        Ok(Self { mphf, keys, repr })
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

/// Encode the sparse per-key slot lists: LEB128 count, one delta-width
/// byte, then the deltas packed LSB-first. The delta base resets to 0
/// per list, so the first delta is the first slot itself.
fn encode_hash_lists(lists: &[Vec<u32>]) -> Vec<u8> {
    let mut out = Vec::new();
    for list in lists {
        varint::write_u32(&mut out, list.len() as u32);
        let mut prev = 0;
        let mut max_delta = 0;
        let deltas: Vec<u32> = list
            .iter()
            .map(|&slot| {
                let delta = slot - prev;
                prev = slot;
                max_delta = max_delta.max(delta);
                delta
            })
            .collect();
        let width = ceil_log2(max_delta as u64 + 1);
        out.push(width as u8);
        if width > 0 {
            let mut packed = BitPacked::new(width);
            for delta in deltas {
                packed.push(delta);
            }
            out.extend_from_slice(packed.as_bytes());
        }
    }
    out
}

fn decode_hash_lists(
    data: &[u8],
    key_count: usize,
    n: usize,
) -> Result<Vec<Vec<u32>>, DecodeError> {
    let mut pos = 0;
    let mut lists = Vec::new();
    for _ in 0..key_count {
        let count = varint::read_u32(data, &mut pos)? as usize;
        if count > n {
            return Err(DecodeError::Malformed("per-key list longer than the value universe"));
        }
        let width = *data
            .get(pos)
            .ok_or(DecodeError::Truncated { offset: pos, needed: 1 })? as u32;
        pos += 1;
        if width > 32 {
            return Err(DecodeError::Malformed("delta width above 32 bits"));
        }
        let mut list = Vec::with_capacity(count);
        if width == 0 {
            // Zero-width deltas can only describe the single slot 0.
            if count > 1 {
                return Err(DecodeError::Malformed("zero-width deltas with several slots"));
            }
            if count == 1 {
                if n == 0 {
                    return Err(DecodeError::Malformed("slot outside the value universe"));
                }
                list.push(0);
            }
        } else {
            let byte_len = packed_byte_len(width, count);
            let slice = take_slice(data, &mut pos, byte_len)?;
            let packed = BitPacked::from_bytes(width, count, slice.to_vec())?;
            let mut prev = 0u32;
            for i in 0..count {
                let delta = packed.get(i);
                if i > 0 && delta == 0 {
                    return Err(DecodeError::Malformed("duplicate slot in per-key list"));
                }
                let slot = prev
                    .checked_add(delta)
                    .ok_or(DecodeError::Malformed("slot overflows 32 bits"))?;
                if slot as usize >= n {
                    return Err(DecodeError::Malformed("slot outside the value universe"));
                }
                list.push(slot);
                prev = slot;
            }
        }
        lists.push(list);
    }
    if pos != data.len() {
        return Err(DecodeError::TrailingBytes(data.len() - pos));
    }
    Ok(lists)
}

/// Encode the collision side table: LEB128 entry count, then per entry
/// (ascending hash order) the hash delta, the owner count, and the
/// ascending owner indexes as an absolute first value plus deltas.
fn encode_collisions(collisions: &AHashMap<u32, Vec<u32>>) -> Vec<u8> {
    let mut entries: Vec<(u32, &Vec<u32>)> =
        collisions.iter().map(|(&hash, owners)| (hash, owners)).collect();
    entries.sort_unstable_by_key(|&(hash, _)| hash);

    let mut out = Vec::new();
    varint::write_u32(&mut out, entries.len() as u32);
    let mut prev_hash = 0;
    for (hash, owner_list) in entries {
        varint::write_u32(&mut out, hash - prev_hash);
        prev_hash = hash;
        varint::write_u32(&mut out, owner_list.len() as u32);
        let mut prev_owner = 0;
        for (i, &owner) in owner_list.iter().enumerate() {
            let delta = if i == 0 { owner } else { owner - prev_owner };
            varint::write_u32(&mut out, delta);
            prev_owner = owner;
        }
    }
    out
}

fn decode_collisions(
    data: &[u8],
    key_count: u32,
    n: usize,
) -> Result<AHashMap<u32, Vec<u32>>, DecodeError> {
    let mut pos = 0;
    let entry_count = varint::read_u32(data, &mut pos)? as usize;
    if entry_count > n {
        return Err(DecodeError::Malformed("more collision entries than values"));
    }
    let mut collisions = AHashMap::with_capacity(entry_count);
    let mut prev_hash = 0u32;
    for entry in 0..entry_count {
        let delta = varint::read_u32(data, &mut pos)?;
        if entry > 0 && delta == 0 {
            return Err(DecodeError::Malformed("duplicate collision hash"));
        }
        let hash = prev_hash
            .checked_add(delta)
            .ok_or(DecodeError::Malformed("collision hash overflows 32 bits"))?;
        if hash as usize >= n {
            return Err(DecodeError::Malformed("collision hash outside the value universe"));
        }
        prev_hash = hash;

        let owner_count = varint::read_u32(data, &mut pos)? as usize;
        if owner_count as u64 > key_count as u64 {
            return Err(DecodeError::Malformed("more owners than keys"));
        }
        let mut owner_list = Vec::with_capacity(owner_count);
        let mut prev_owner = 0u32;
        for i in 0..owner_count {
            let delta = varint::read_u32(data, &mut pos)?;
            if i > 0 && delta == 0 {
                return Err(DecodeError::Malformed("duplicate collision owner"));
            }
            let owner = prev_owner
                .checked_add(delta)
                .ok_or(DecodeError::Malformed("owner index overflows 32 bits"))?;
            if owner >= key_count {
                return Err(DecodeError::Malformed("owner index out of range"));
            }
            owner_list.push(owner);
            prev_owner = owner;
        }
        collisions.insert(hash, owner_list);
    }
    if pos != data.len() {
        return Err(DecodeError::TrailingBytes(data.len() - pos));
    }
    Ok(collisions)
}
