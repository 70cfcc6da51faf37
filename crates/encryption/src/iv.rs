//! Per-block IV derivation
//!
//! The IV of block `n` is a pure function of `(key, mode, n)`, so nothing
//! about it is stored on the medium:
//!
//! - nonce = `n` as little-endian u64, followed by eight zero bytes
//! - plain64: IV = nonce
//! - essiv:sha256: IV = AES-256-ECB(SHA-256(key), nonce)

use crate::key::VolumeKey;
use crate::mode::IvMode;
use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use sha2::{Digest, Sha256};

/// AES block / IV length
pub const IV_LENGTH: usize = 16;

/// Sector nonce: `[block_index LE, 0u64]`.
pub fn sector_nonce(block_index: u64) -> [u8; IV_LENGTH] {
    let mut nonce = [0u8; IV_LENGTH];
    nonce[..8].copy_from_slice(&block_index.to_le_bytes());
    nonce
}

/// Produces IVs for one volume.
///
/// In ESSIV mode the salt cipher is keyed once at construction; AES key
/// expansion is not repeated per block.
pub enum IvGenerator {
    Plain,
    Essiv { salt_cipher: Box<Aes256> },
}

impl IvGenerator {
    pub fn new(key: &VolumeKey, mode: IvMode) -> Self {
        match mode {
            IvMode::CbcPlain => IvGenerator::Plain,
            IvMode::CbcEssiv => {
                let mut salt = Sha256::digest(key.as_bytes());
                let salt_cipher = Box::new(Aes256::new(&salt));
                salt.as_mut_slice().fill(0);
                IvGenerator::Essiv { salt_cipher }
            }
        }
    }

    pub fn mode(&self) -> IvMode {
        match self {
            IvGenerator::Plain => IvMode::CbcPlain,
            IvGenerator::Essiv { .. } => IvMode::CbcEssiv,
        }
    }

    pub fn iv_for(&self, block_index: u64) -> [u8; IV_LENGTH] {
        let nonce = sector_nonce(block_index);
        match self {
            IvGenerator::Plain => nonce,
            IvGenerator::Essiv { salt_cipher } => {
                let mut block = GenericArray::from(nonce);
                salt_cipher.encrypt_block(&mut block);
                let mut iv = [0u8; IV_LENGTH];
                iv.copy_from_slice(&block);
                iv
            }
        }
    }
}

impl std::fmt::Debug for IvGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvGenerator")
            .field("mode", &self.mode().name())
            .finish()
    }
}
