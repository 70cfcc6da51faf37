//! AES-256-CBC sector transform
//!
//! Each block is an independent CBC message whose IV comes from its index
//! (see [`crate::iv`]).  A [`BlockCrypter`] is bound to one block index and
//! is consumed by a single encrypt or decrypt, so chaining state can never
//! leak from one block (or one operation) into the next.
//!
//! ## Security Properties
//!
//! - Confidentiality: AES-256 strength
//! - Deterministic: same plaintext at the same index gives the same ciphertext
//! - No authentication: tampered ciphertext decrypts to garbage silently

use crate::error::{EncryptionError, Result};
use crate::iv::{IvGenerator, IV_LENGTH};
use crate::key::VolumeKey;
use crate::mode::IvMode;
use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Volume key plus IV strategy; everything needed to transform any block.
#[derive(Debug)]
pub struct SectorCipher {
    key: VolumeKey,
    ivs: IvGenerator,
}

impl SectorCipher {
    pub fn new(key: VolumeKey, mode: IvMode) -> Self {
        let ivs = IvGenerator::new(&key, mode);
        Self { key, ivs }
    }

    pub fn mode(&self) -> IvMode {
        self.ivs.mode()
    }

    /// Bind a fresh CBC transform to `block_index`.
    pub fn derive(&self, block_index: u64) -> BlockCrypter<'_> {
        BlockCrypter {
            key: &self.key,
            iv: self.ivs.iv_for(block_index),
        }
    }

    /// Encrypt one whole block in place.
    pub fn encrypt_block(&self, block_index: u64, buf: &mut [u8]) -> Result<()> {
        self.derive(block_index).encrypt(buf)
    }

    /// Decrypt one whole block in place.
    pub fn decrypt_block(&self, block_index: u64, buf: &mut [u8]) -> Result<()> {
        self.derive(block_index).decrypt(buf)
    }
}

/// Single-use CBC transform for one block index.
pub struct BlockCrypter<'a> {
    key: &'a VolumeKey,
    iv: [u8; IV_LENGTH],
}

impl BlockCrypter<'_> {
    pub fn iv(&self) -> &[u8; IV_LENGTH] {
        &self.iv
    }

    pub fn encrypt(self, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf.len())?;
        let mut cbc = Aes256CbcEnc::new(
            GenericArray::from_slice(self.key.as_bytes()),
            GenericArray::from_slice(&self.iv),
        );
        for chunk in buf.chunks_exact_mut(IV_LENGTH) {
            cbc.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }

    pub fn decrypt(self, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf.len())?;
        let mut cbc = Aes256CbcDec::new(
            GenericArray::from_slice(self.key.as_bytes()),
            GenericArray::from_slice(&self.iv),
        );
        for chunk in buf.chunks_exact_mut(IV_LENGTH) {
            cbc.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }
}

fn check_aligned(len: usize) -> Result<()> {
    if len == 0 || len % IV_LENGTH != 0 {
        return Err(EncryptionError::CipherError(format!(
            "buffer of {len} bytes is not a whole number of AES blocks"
        )));
    }
    Ok(())
}
