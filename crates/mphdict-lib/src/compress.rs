//! The gzip compress/decompress boundary
//!
//! Serialized dictionaries optionally pass through gzip on their way to
//! and from storage. The core treats this as an opaque byte-to-byte
//! boundary; nothing here inspects dictionary structure.

use crate::codec::DecodeError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Gzip-compress a byte string.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("writing to an in-memory gzip encoder cannot fail");
    encoder.finish().expect("finishing an in-memory gzip encoder cannot fail")
}

/// Decompress a gzip byte string.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Gzip(e.to_string()))?;
    Ok(out)
}

/// Whether a byte string starts with the gzip magic. Used by callers
/// that accept both compressed and raw dictionaries.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1F && data[1] == 0x8B
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data: Vec<u8> = (0..2048u32).flat_map(|i| i.to_le_bytes()).collect();
        let packed = compress(&data);
        assert!(is_gzip(&packed));
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_empty_roundtrip() {
        let packed = compress(&[]);
        assert_eq!(decompress(&packed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(decompress(b"not gzip at all"), Err(DecodeError::Gzip(_))));
        assert!(!is_gzip(b"no"));
    }
}
