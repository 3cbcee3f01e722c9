//! Build configuration for MPHF construction
//!
//! Options accepted by every factory: the level (target keys-per-bucket
//! ratio, trading build time for output size) and the fingerprint
//! validation mode.

use crate::builder::BuildError;
use crate::constants::{DEFAULT_LEVEL, MAX_LEVEL, MIN_LEVEL};
use std::fmt;
use std::str::FromStr;

/// Fingerprint width stored per slot for set-membership validation.
///
/// With validation off, evaluating a key outside the build set returns
/// some in-range slot; each extra fingerprint bit halves the probability
/// of that.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ValidationMode {
    /// No fingerprints stored; every evaluation lands in range.
    #[default]
    None,
    /// 2-bit fingerprints.
    Bits2,
    /// 4-bit fingerprints.
    Bits4,
    /// 8-bit fingerprints.
    Bits8,
    /// 16-bit fingerprints.
    Bits16,
    /// 32-bit fingerprints.
    Bits32,
}

impl ValidationMode {
    /// Fingerprint width in bits; 0 when validation is off.
    pub fn width(self) -> u32 {
        match self {
            ValidationMode::None => 0,
            ValidationMode::Bits2 => 2,
            ValidationMode::Bits4 => 4,
            ValidationMode::Bits8 => 8,
            ValidationMode::Bits16 => 16,
            ValidationMode::Bits32 => 32,
        }
    }

    /// Mask selecting the low `width` bits of the fingerprint hash.
    pub fn mask(self) -> u32 {
        match self {
            ValidationMode::None => 0,
            ValidationMode::Bits32 => u32::MAX,
            other => (1 << other.width()) - 1,
        }
    }

    /// The integer stored in the serialized dictionary frame.
    pub(crate) fn mode_int(self) -> u64 {
        match self {
            ValidationMode::None => 0,
            ValidationMode::Bits4 => 1,
            ValidationMode::Bits8 => 2,
            ValidationMode::Bits16 => 3,
            ValidationMode::Bits32 => 4,
            ValidationMode::Bits2 => 5,
        }
    }

    /// Inverse of [`mode_int`](Self::mode_int).
    pub(crate) fn from_mode_int(value: u64) -> Option<Self> {
        match value {
            0 => Some(ValidationMode::None),
            1 => Some(ValidationMode::Bits4),
            2 => Some(ValidationMode::Bits8),
            3 => Some(ValidationMode::Bits16),
            4 => Some(ValidationMode::Bits32),
            5 => Some(ValidationMode::Bits2),
            _ => None,
        }
    }

    /// Select a mode by fingerprint width.
    pub fn from_width(width: u32) -> Option<Self> {
        match width {
            2 => Some(ValidationMode::Bits2),
            4 => Some(ValidationMode::Bits4),
            8 => Some(ValidationMode::Bits8),
            16 => Some(ValidationMode::Bits16),
            32 => Some(ValidationMode::Bits32),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::None => write!(f, "none"),
            other => write!(f, "{}", other.width()),
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    /// Parse the factory option: `none`/`false`/`off` disable validation,
    /// `true`/`on` select the default 8-bit width, and a bare width
    /// string selects that width.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "false" | "off" => Ok(ValidationMode::None),
            "true" | "on" => Ok(ValidationMode::Bits8),
            other => other
                .parse::<u32>()
                .ok()
                .and_then(ValidationMode::from_width)
                .ok_or_else(|| format!("invalid validation mode {other:?} (expected none, true, or one of 2/4/8/16/32)")),
        }
    }
}

/// Configuration parameters for building an MPHF dictionary.
#[derive(Clone, Copy, Debug)]
pub struct BuildOptions {
    /// Target keys-per-bucket ratio in `1..=10`. Larger values mean
    /// fewer, larger buckets: slower builds, smaller output.
    pub level: u8,

    /// Fingerprint validation mode.
    pub validation: ValidationMode,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { level: DEFAULT_LEVEL, validation: ValidationMode::None }
    }
}

impl BuildOptions {
    /// Create options, validating the level range.
    pub fn new(level: u8, validation: ValidationMode) -> Result<Self, BuildError> {
        let options = Self { level, validation };
        options.validate()?;
        Ok(options)
    }

    /// Replace the level (validated at build time).
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    /// Replace the validation mode.
    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !(MIN_LEVEL..=MAX_LEVEL).contains(&self.level) {
            return Err(BuildError::InvalidLevel(self.level));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = BuildOptions::default();
        assert_eq!(options.level, DEFAULT_LEVEL);
        assert_eq!(options.validation, ValidationMode::None);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_level_bounds() {
        assert!(BuildOptions::new(1, ValidationMode::None).is_ok());
        assert!(BuildOptions::new(10, ValidationMode::None).is_ok());
        assert!(matches!(
            BuildOptions::new(0, ValidationMode::None),
            Err(BuildError::InvalidLevel(0))
        ));
        assert!(matches!(
            BuildOptions::new(11, ValidationMode::None),
            Err(BuildError::InvalidLevel(11))
        ));
    }

    #[test]
    fn test_mode_int_roundtrip() {
        for mode in [
            ValidationMode::None,
            ValidationMode::Bits2,
            ValidationMode::Bits4,
            ValidationMode::Bits8,
            ValidationMode::Bits16,
            ValidationMode::Bits32,
        ] {
            assert_eq!(ValidationMode::from_mode_int(mode.mode_int()), Some(mode));
        }
        assert_eq!(ValidationMode::from_mode_int(6), None);
    }

    #[test]
    fn test_mode_masks() {
        assert_eq!(ValidationMode::None.mask(), 0);
        assert_eq!(ValidationMode::Bits2.mask(), 0b11);
        assert_eq!(ValidationMode::Bits8.mask(), 0xFF);
        assert_eq!(ValidationMode::Bits16.mask(), 0xFFFF);
        assert_eq!(ValidationMode::Bits32.mask(), u32::MAX);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("none".parse::<ValidationMode>().unwrap(), ValidationMode::None);
        assert_eq!("false".parse::<ValidationMode>().unwrap(), ValidationMode::None);
        assert_eq!("true".parse::<ValidationMode>().unwrap(), ValidationMode::Bits8);
        assert_eq!("2".parse::<ValidationMode>().unwrap(), ValidationMode::Bits2);
        assert_eq!("16".parse::<ValidationMode>().unwrap(), ValidationMode::Bits16);
        assert!("3".parse::<ValidationMode>().is_err());
        assert!("".parse::<ValidationMode>().is_err());
    }
}
