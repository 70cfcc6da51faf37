//! Volume key handling
//!
//! A volume is encrypted under a single raw 256-bit key.  There is no key
//! slot or header on the medium, so whoever opens the volume must present the
//! exact same bytes (the dm-crypt `plain` model).
//!
//! ## Security Model
//!
//! - Keys are generated with the OS CSPRNG or supplied by the caller
//! - Keys are zeroized on drop
//! - `Debug` output is redacted and keys are never logged

use crate::error::{EncryptionError, Result};
use rand::Rng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Volume key size (256 bits)
pub const VOLUME_KEY_SIZE: usize = 32;

/// Environment variable read by [`VolumeKey::from_default_env`] (hex-encoded)
pub const KEY_ENV_VAR: &str = "CRYPTBDEV_KEY";

/// Abstraction over TPM or secure element backends that can supply the key.
pub trait KeyProvider {
    /// Returns the 256-bit volume key sealed in the provider.
    fn read_volume_key(&self) -> Result<[u8; VOLUME_KEY_SIZE]>;
}

/// Raw symmetric key of one encrypted volume
///
/// Zeroized on drop for security
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VolumeKey {
    bytes: [u8; VOLUME_KEY_SIZE],
}

impl VolumeKey {
    pub fn from_bytes(bytes: [u8; VOLUME_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create from a slice, checking its length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != VOLUME_KEY_SIZE {
            return Err(EncryptionError::InvalidKeyLength {
                expected: VOLUME_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut key = [0u8; VOLUME_KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Generate a fresh random key
    ///
    /// # Security
    /// Uses the thread-local CSPRNG, seeded from the operating system
    pub fn generate() -> Self {
        let mut bytes = [0u8; VOLUME_KEY_SIZE];
        rand::rng().fill(&mut bytes);
        Self { bytes }
    }

    /// Decode a hex-encoded key (surrounding whitespace is ignored)
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let mut bytes = hex::decode(hex_key.trim())?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Read a hex-encoded key from an environment variable
    ///
    /// # Errors
    /// Returns error if the variable is missing or does not hold 32 hex bytes
    pub fn from_env(var: &str) -> Result<Self> {
        let mut hex_key = std::env::var(var).map_err(|_| {
            EncryptionError::InvalidConfiguration(format!("{var} environment variable not set"))
        })?;
        let key = Self::from_hex(&hex_key);
        hex_key.zeroize();
        key
    }

    /// Read the key from [`KEY_ENV_VAR`]
    pub fn from_default_env() -> Result<Self> {
        Self::from_env(KEY_ENV_VAR)
    }

    /// Unseal the key from a TPM or similar provider.
    pub fn from_provider<P: KeyProvider>(provider: &P) -> Result<Self> {
        Ok(Self::from_bytes(provider.read_volume_key()?))
    }

    pub fn as_bytes(&self) -> &[u8; VOLUME_KEY_SIZE] {
        &self.bytes
    }

    /// Hex encoding of the key, for handing to an operator or to cryptsetup.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl std::fmt::Debug for VolumeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_from_slice_checks_length() {
        assert!(VolumeKey::from_slice(&[1u8; VOLUME_KEY_SIZE]).is_ok());
        assert!(matches!(
            VolumeKey::from_slice(&[1u8; 16]),
            Err(EncryptionError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_generate_produces_distinct_keys() {
        let a = VolumeKey::generate();
        let b = VolumeKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), &[0u8; VOLUME_KEY_SIZE]);
    }

    #[test]
    fn test_hex_roundtrip() {
        let key = VolumeKey::from_bytes([0x3Cu8; VOLUME_KEY_SIZE]);
        let parsed = VolumeKey::from_hex(&format!("  {}\n", key.to_hex())).unwrap();
        assert_eq!(parsed.as_bytes(), key.as_bytes());

        assert!(matches!(
            VolumeKey::from_hex("not-valid-hex!"),
            Err(EncryptionError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            VolumeKey::from_hex(&hex::encode([1u8; 16])),
            Err(EncryptionError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn test_key_debug() {
        let key = VolumeKey::from_bytes([42u8; VOLUME_KEY_SIZE]);
        let debug_str = format!("{:?}", key);

        // Should not leak key material
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("42"));
    }

    #[test]
    #[serial]
    fn test_from_env_missing() {
        let original = std::env::var(KEY_ENV_VAR).ok();
        std::env::remove_var(KEY_ENV_VAR);

        let result = VolumeKey::from_default_env();

        if let Some(val) = original {
            std::env::set_var(KEY_ENV_VAR, val);
        }

        assert!(matches!(
            result.unwrap_err(),
            EncryptionError::InvalidConfiguration(_)
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_valid() {
        let original = std::env::var(KEY_ENV_VAR).ok();

        let raw = [88u8; VOLUME_KEY_SIZE];
        std::env::set_var(KEY_ENV_VAR, hex::encode(raw));

        let result = VolumeKey::from_default_env();

        if let Some(val) = original {
            std::env::set_var(KEY_ENV_VAR, val);
        } else {
            std::env::remove_var(KEY_ENV_VAR);
        }

        let key = result.expect("Should create VolumeKey from valid hex");
        assert_eq!(key.as_bytes(), &raw);
    }

    struct MockTpm([u8; VOLUME_KEY_SIZE]);

    impl KeyProvider for MockTpm {
        fn read_volume_key(&self) -> Result<[u8; VOLUME_KEY_SIZE]> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_from_provider() {
        let key = VolumeKey::from_provider(&MockTpm([0x42; VOLUME_KEY_SIZE])).unwrap();
        assert_eq!(key.as_bytes(), &[0x42; VOLUME_KEY_SIZE]);
    }
}
