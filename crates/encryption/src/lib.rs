//! # Block encryption layer
//!
//! Transparent AES-256-CBC encryption for fixed-size block devices, using the
//! dm-crypt plain layout: no on-disk header, one key for the whole volume and
//! an IV computed from the block index.
//!
//! ## IV modes
//!
//! - **`aes-cbc-plain64`**: IV is the little-endian block index
//! - **`aes-cbc-essiv:sha256`**: IV is the index encrypted under SHA-256 of
//!   the volume key
//!
//! A volume written by this crate opens with
//! `cryptsetup open --type plain --cipher <spec> --key-size 256` over the same
//! image, and vice versa.
//!
//! ## Usage Example
//!
//! ```rust
//! use blockdev_sim::MemoryBlockDevice;
//! use encryption::{EncryptingBlockDevice, IvMode, VolumeKey};
//!
//! let key = VolumeKey::from_bytes([7u8; 32]);
//! let mut volume =
//!     EncryptingBlockDevice::with_key(MemoryBlockDevice::new(512, 8), key, IvMode::CbcEssiv)?;
//!
//! volume.write(2, b"hello", 100)?;
//!
//! let mut out = [0u8; 5];
//! volume.read(2, &mut out, 100)?;
//! assert_eq!(&out, b"hello");
//! # Ok::<(), encryption::EncryptionError>(())
//! ```
//!
//! ## Security Considerations
//!
//! - **Confidentiality only**: there is no integrity tag; tampered ciphertext
//!   decrypts to garbage without an error
//! - **Key handling**: keys are zeroized on drop and never logged or printed
//! - **Determinism**: equal plaintext at the same index under the same key
//!   always yields equal ciphertext

pub mod config;
pub mod device;
pub mod error;
pub mod iv;
pub mod key;
pub mod mode;
pub mod sector;

pub use config::{CryptConfig, KeySource, MODE_ENV_VAR};
pub use device::EncryptingBlockDevice;
pub use error::{EncryptionError, Result};
pub use iv::{sector_nonce, IvGenerator, IV_LENGTH};
pub use key::{KeyProvider, VolumeKey, KEY_ENV_VAR, VOLUME_KEY_SIZE};
pub use mode::IvMode;
pub use sector::{BlockCrypter, SectorCipher};

/// Encryption crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
