//! Document key generation and validation.
//!
//! Collections carry `keyOptions` choosing between the `traditional`
//! generator (ascending numeric ticks, readable and roughly time-ordered) and
//! the `uuid` generator. User-supplied keys are accepted only when
//! `allowUserKeys` is set, and validated against the documented charset.

use crate::{next_tick, CoralError, CoralResult, ErrorCode};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum length of a document key in bytes.
pub const MAX_KEY_LENGTH: usize = 254;

static KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    // the allowed charset for user-supplied document keys
    Regex::new(r"^[a-zA-Z0-9_\-:.@()+,=;$!*'%]+$").expect("key validation pattern must compile")
});

// ============================================================================
// KEY OPTIONS
// ============================================================================

/// Which generator produces keys for documents inserted without `_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyGeneratorKind {
    #[default]
    Traditional,
    Uuid,
}

/// The `keyOptions` section of a collection definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyOptions {
    #[serde(rename = "type")]
    pub kind: KeyGeneratorKind,
    pub allow_user_keys: bool,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            kind: KeyGeneratorKind::Traditional,
            allow_user_keys: true,
        }
    }
}

// ============================================================================
// KEY GENERATOR
// ============================================================================

/// Per-collection key generator.
#[derive(Debug)]
pub struct KeyGenerator {
    options: KeyOptions,
}

impl KeyGenerator {
    pub fn new(options: KeyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &KeyOptions {
        &self.options
    }

    /// Generate a fresh key.
    pub fn generate(&self) -> CoralResult<String> {
        match self.options.kind {
            KeyGeneratorKind::Traditional => Ok(next_tick().to_string()),
            KeyGeneratorKind::Uuid => {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                // RFC 4122 version 4 / variant 1 markers
                bytes[6] = (bytes[6] & 0x0f) | 0x40;
                bytes[8] = (bytes[8] & 0x3f) | 0x80;
                Ok(format!(
                    "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                    bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
                ))
            }
        }
    }

    /// Validate a key supplied by the user.
    pub fn validate_user_key(&self, key: &str) -> CoralResult<()> {
        if !self.options.allow_user_keys {
            return Err(CoralError::new(
                ErrorCode::DocumentKeyBad,
                "collection does not allow user-defined keys",
            ));
        }
        validate_key(key)
    }
}

/// Validate key syntax: non-empty, at most [`MAX_KEY_LENGTH`] bytes, allowed
/// charset only.
pub fn validate_key(key: &str) -> CoralResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH || !KEY_REGEX.is_match(key) {
        return Err(CoralError::new(
            ErrorCode::DocumentKeyBad,
            format!("illegal document key '{}'", key),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traditional_keys_ascend() {
        let generator = KeyGenerator::new(KeyOptions::default());
        let a: u64 = generator.generate().expect("key").parse().expect("numeric");
        let b: u64 = generator.generate().expect("key").parse().expect("numeric");
        assert!(b > a);
    }

    #[test]
    fn test_uuid_key_shape() {
        let generator = KeyGenerator::new(KeyOptions {
            kind: KeyGeneratorKind::Uuid,
            allow_user_keys: true,
        });
        let key = generator.generate().expect("key");
        assert_eq!(key.len(), 36);
        assert_eq!(key.matches('-').count(), 4);
        validate_key(&key).expect("uuid keys must pass validation");
    }

    #[test]
    fn test_validate_key_charset() {
        validate_key("abc_-:.@()+,=;$!*'%123").expect("allowed charset");
        assert!(validate_key("").is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("slash/inside").is_err());
        assert!(validate_key(&"x".repeat(MAX_KEY_LENGTH + 1)).is_err());
        validate_key(&"x".repeat(MAX_KEY_LENGTH)).expect("max length is allowed");
    }

    #[test]
    fn test_user_keys_can_be_forbidden() {
        let generator = KeyGenerator::new(KeyOptions {
            kind: KeyGeneratorKind::Traditional,
            allow_user_keys: false,
        });
        let err = generator
            .validate_user_key("mykey")
            .expect_err("user keys must be rejected");
        assert!(err.is(ErrorCode::DocumentKeyBad));
    }

    proptest::proptest! {
        #[test]
        fn prop_allowed_charset_always_validates(key in r"[a-zA-Z0-9_\-:.@()+,=;$!*'%]{1,254}") {
            validate_key(&key).expect("keys from the allowed charset must pass");
        }

        #[test]
        fn prop_generated_keys_validate(_seed in 0u8..8) {
            for kind in [KeyGeneratorKind::Traditional, KeyGeneratorKind::Uuid] {
                let generator = KeyGenerator::new(KeyOptions { kind, allow_user_keys: true });
                let key = generator.generate().expect("key");
                validate_key(&key).expect("generated keys must pass validation");
            }
        }
    }
}
