//! Transparent encrypting block device
//!
//! [`EncryptingBlockDevice`] wraps any [`BlockDevice`] and exposes the same
//! contract.  Every block is stored as AES-256-CBC ciphertext with an IV
//! derived from the block index, so the medium carries no header, salt or
//! per-block metadata.
//!
//! ## Operation shapes
//!
//! - read: one underlying read, one decrypt, copy out the requested range
//! - write: one underlying read + decrypt (skipped for whole-block writes),
//!   patch the range, one encrypt, one underlying write
//! - erase: encrypt an all-zero block and write it; raw zeros never reach the
//!   medium
//!
//! ## Concurrency
//!
//! All methods take `&mut self` and share one scratch block.  One operation
//! at a time per instance; wrap the device in a `Mutex` to share it.

use crate::config::CryptConfig;
use crate::error::{EncryptionError, Result};
use crate::iv::IV_LENGTH;
use crate::key::VolumeKey;
use crate::mode::IvMode;
use crate::sector::SectorCipher;
use common::{BlockDevice, ControlOp, DeviceError, DEFAULT_BLOCK_SIZE};
use tracing::{debug, instrument, trace};
use zeroize::{Zeroize, Zeroizing};

/// Block device that encrypts on write and decrypts on read.
pub struct EncryptingBlockDevice<D: BlockDevice> {
    device: D,
    cipher: SectorCipher,
    block_size: usize,
    /// Staging area for read-modify-write; wiped after every operation.
    scratch: Zeroizing<Vec<u8>>,
}

impl<D: BlockDevice> EncryptingBlockDevice<D> {
    /// Wrap `device`, generating a random key when none is supplied.
    ///
    /// A generated key is only useful for the lifetime of this instance
    /// unless the caller retrieves it elsewhere; pass an explicit key for
    /// persistent volumes.
    pub fn new(device: D, key: Option<VolumeKey>, mode: IvMode) -> Result<Self> {
        let key = match key {
            Some(key) => key,
            None => {
                debug!("no volume key supplied, generating a random one");
                VolumeKey::generate()
            }
        };
        Self::with_key(device, key, mode)
    }

    /// Wrap `device` under `key`.
    ///
    /// # Errors
    ///
    /// - [`EncryptionError::Construction`] if the block size query fails
    /// - [`EncryptionError::InvalidBlockSize`] if the reported size cannot be
    ///   covered by whole AES blocks
    pub fn with_key(mut device: D, key: VolumeKey, mode: IvMode) -> Result<Self> {
        let reported = device
            .block_size_hint()
            .map_err(EncryptionError::Construction)?;
        let block_size = reported.unwrap_or(DEFAULT_BLOCK_SIZE);

        if block_size == 0 || block_size % IV_LENGTH != 0 {
            return Err(EncryptionError::InvalidBlockSize(block_size));
        }

        let cipher = SectorCipher::new(key, mode);
        debug!(
            block_size,
            reported = reported.is_some(),
            cipher = mode.cipher_spec(),
            "encrypting block device ready"
        );

        Ok(Self {
            device,
            cipher,
            block_size,
            scratch: Zeroizing::new(vec![0u8; block_size]),
        })
    }

    /// Wrap `device` using a resolved [`CryptConfig`].
    pub fn from_config(device: D, config: &CryptConfig) -> Result<Self> {
        Self::with_key(device, config.resolve_key()?, config.mode)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn mode(&self) -> IvMode {
        self.cipher.mode()
    }

    pub fn get_ref(&self) -> &D {
        &self.device
    }

    /// Direct access to the wrapped device.  Writes made through it bypass
    /// encryption.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    /// Copy plaintext bytes `[offset, offset + buf.len())` of block
    /// `block_index` into `buf`.
    ///
    /// The whole block is always read and decrypted; CBC is only defined over
    /// the full block.
    #[instrument(level = "trace", skip(self, buf), fields(len = buf.len()))]
    pub fn read(&mut self, block_index: u64, buf: &mut [u8], offset: usize) -> Result<()> {
        self.check_range(offset, buf.len())?;

        let result = self.load_plaintext(block_index).map(|()| {
            buf.copy_from_slice(&self.scratch[offset..offset + buf.len()]);
        });
        self.wipe_scratch();
        result
    }

    /// Replace plaintext bytes `[offset, offset + data.len())` of block
    /// `block_index`, leaving the rest of the block unchanged.
    ///
    /// Nothing reaches the underlying device unless every earlier step
    /// succeeded.
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    pub fn write(&mut self, block_index: u64, data: &[u8], offset: usize) -> Result<()> {
        self.check_range(offset, data.len())?;

        let result = self.rewrite_block(block_index, data, offset);
        self.wipe_scratch();
        result
    }

    /// Store an encrypted all-zero block at `block_index`.
    #[instrument(level = "trace", skip(self))]
    pub fn erase(&mut self, block_index: u64) -> Result<()> {
        self.scratch.as_mut_slice().fill(0);

        let result = self.seal_and_store(block_index);
        self.wipe_scratch();
        result
    }

    /// Handle a control operation.
    ///
    /// [`ControlOp::EraseBlock`] is intercepted and answered with `Some(0)`;
    /// every other operation goes to the wrapped device untouched.
    pub fn control(&mut self, op: ControlOp, arg: u64) -> Result<Option<u64>> {
        match op {
            ControlOp::EraseBlock => {
                debug!(block = arg, "erasing block");
                self.erase(arg)?;
                Ok(Some(0))
            }
            other => {
                trace!(op = %other, arg, "forwarding control operation");
                Ok(self.device.control(other, arg)?)
            }
        }
    }

    /// Read plaintext starting at absolute byte position `pos`, crossing block
    /// boundaries as needed.
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let (index, offset) = self.locate(pos, done, buf.len())?;
            let take = (self.block_size - offset).min(buf.len() - done);
            self.read(index, &mut buf[done..done + take], offset)?;
            done += take;
        }
        Ok(())
    }

    /// Write plaintext starting at absolute byte position `pos`.
    ///
    /// Each touched block is an independent read-modify-write; a failure part
    /// way through leaves earlier blocks updated.
    pub fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let mut done = 0usize;
        while done < data.len() {
            let (index, offset) = self.locate(pos, done, data.len())?;
            let take = (self.block_size - offset).min(data.len() - done);
            self.write(index, &data[done..done + take], offset)?;
            done += take;
        }
        Ok(())
    }

    fn locate(&self, pos: u64, done: usize, len: usize) -> Result<(u64, usize)> {
        let absolute = pos
            .checked_add(done as u64)
            .ok_or(EncryptionError::PositionOverflow { pos, len })?;
        let block_size = self.block_size as u64;
        Ok((absolute / block_size, (absolute % block_size) as usize))
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.block_size => Ok(()),
            _ => Err(EncryptionError::Boundary {
                offset,
                len,
                block_size: self.block_size,
            }),
        }
    }

    fn load_plaintext(&mut self, block_index: u64) -> Result<()> {
        self.device
            .read_block(block_index, self.scratch.as_mut_slice())?;
        self.cipher
            .derive(block_index)
            .decrypt(self.scratch.as_mut_slice())
    }

    fn rewrite_block(&mut self, block_index: u64, data: &[u8], offset: usize) -> Result<()> {
        // A whole-block overwrite does not depend on the old contents.
        if data.len() != self.block_size {
            self.load_plaintext(block_index)?;
        }
        self.scratch[offset..offset + data.len()].copy_from_slice(data);
        self.seal_and_store(block_index)
    }

    fn seal_and_store(&mut self, block_index: u64) -> Result<()> {
        self.cipher
            .derive(block_index)
            .encrypt(self.scratch.as_mut_slice())?;
        self.device
            .write_block(block_index, self.scratch.as_slice())?;
        Ok(())
    }

    fn wipe_scratch(&mut self) {
        self.scratch.as_mut_slice().zeroize();
    }
}

impl<D: BlockDevice> BlockDevice for EncryptingBlockDevice<D> {
    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> std::result::Result<(), DeviceError> {
        if buf.len() != self.block_size {
            return Err(DeviceError::BufferSize {
                expected: self.block_size,
                actual: buf.len(),
            });
        }
        Ok(self.read(index, buf, 0)?)
    }

    fn write_block(&mut self, index: u64, buf: &[u8]) -> std::result::Result<(), DeviceError> {
        if buf.len() != self.block_size {
            return Err(DeviceError::BufferSize {
                expected: self.block_size,
                actual: buf.len(),
            });
        }
        Ok(self.write(index, buf, 0)?)
    }

    fn control(&mut self, op: ControlOp, arg: u64) -> std::result::Result<Option<u64>, DeviceError> {
        Ok(EncryptingBlockDevice::control(self, op, arg)?)
    }
}

impl<D: BlockDevice + std::fmt::Debug> std::fmt::Debug for EncryptingBlockDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptingBlockDevice")
            .field("device", &self.device)
            .field("mode", &self.mode().cipher_spec())
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockdev_sim::{FaultInjection, MemoryBlockDevice};

    const KEY: [u8; 32] = [0x24; 32];

    fn wrap(mode: IvMode) -> EncryptingBlockDevice<MemoryBlockDevice> {
        EncryptingBlockDevice::with_key(
            MemoryBlockDevice::new(512, 16),
            VolumeKey::from_bytes(KEY),
            mode,
        )
        .unwrap()
    }

    #[test]
    fn test_block_size_from_device() {
        let device = EncryptingBlockDevice::with_key(
            MemoryBlockDevice::new(4096, 4),
            VolumeKey::from_bytes(KEY),
            IvMode::CbcEssiv,
        )
        .unwrap();
        assert_eq!(device.block_size(), 4096);
        assert_eq!(device.mode(), IvMode::CbcEssiv);
    }

    #[test]
    fn test_block_size_fallback() {
        let device = EncryptingBlockDevice::new(
            MemoryBlockDevice::new(512, 4).without_block_size_report(),
            None,
            IvMode::default(),
        )
        .unwrap();
        assert_eq!(device.block_size(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_construction_fails_when_query_fails() {
        let faulty = MemoryBlockDevice::new(512, 4).with_faults(FaultInjection {
            fail_control: true,
            ..Default::default()
        });
        let result = EncryptingBlockDevice::new(faulty, None, IvMode::CbcPlain);
        assert!(matches!(
            result,
            Err(EncryptionError::Construction(DeviceError::Injected("control")))
        ));
    }

    #[test]
    fn test_rejects_unaligned_block_size() {
        let result = EncryptingBlockDevice::new(MemoryBlockDevice::new(100, 4), None, IvMode::CbcPlain);
        assert!(matches!(result, Err(EncryptionError::InvalidBlockSize(100))));
    }

    #[test]
    fn test_read_write_roundtrip() {
        let mut device = wrap(IvMode::CbcEssiv);
        let data: Vec<u8> = (0..512u32).map(|i| i as u8).collect();
        device.write(3, &data, 0).unwrap();

        let mut out = vec![0u8; 512];
        device.read(3, &mut out, 0).unwrap();
        assert_eq!(out, data);

        // Stored bytes are ciphertext.
        assert_ne!(device.get_ref().raw_block(3).unwrap(), &data[..]);
    }

    #[test]
    fn test_sub_range_read() {
        let mut device = wrap(IvMode::CbcPlain);
        let data: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
        device.write(1, &data, 0).unwrap();

        let mut out = [0u8; 10];
        device.read(1, &mut out, 100).unwrap();
        assert_eq!(&out, &data[100..110]);
    }

    #[test]
    fn test_boundary_rejected_without_io() {
        let mut device = wrap(IvMode::CbcEssiv);
        let writes_before = device.get_ref().write_count();

        let mut out = [0u8; 16];
        assert!(matches!(
            device.read(0, &mut out, 500),
            Err(EncryptionError::Boundary {
                offset: 500,
                len: 16,
                block_size: 512
            })
        ));
        assert!(matches!(
            device.write(0, &[1u8; 513], 0),
            Err(EncryptionError::Boundary { .. })
        ));
        assert!(matches!(
            device.write(0, &[1u8; 1], usize::MAX),
            Err(EncryptionError::Boundary { .. })
        ));
        assert_eq!(device.get_ref().write_count(), writes_before);
    }

    #[test]
    fn test_failed_read_commits_nothing() {
        let mut device = wrap(IvMode::CbcEssiv);
        device.get_mut().set_faults(FaultInjection {
            fail_reads: true,
            ..Default::default()
        });

        let result = device.write(2, &[0xAA; 16], 16);
        assert!(matches!(
            result,
            Err(EncryptionError::Device(DeviceError::Injected("read")))
        ));
        assert_eq!(device.get_ref().write_count(), 0);
        assert_eq!(device.get_ref().raw_block(2).unwrap(), &[0u8; 512][..]);
    }

    #[test]
    fn test_erase_writes_ciphertext() {
        let mut device = wrap(IvMode::CbcEssiv);
        device.write(5, &[0xFF; 512], 0).unwrap();

        assert_eq!(device.control(ControlOp::EraseBlock, 5).unwrap(), Some(0));
        assert_ne!(device.get_ref().raw_block(5).unwrap(), &[0u8; 512][..]);

        let mut out = [0xEEu8; 512];
        device.read(5, &mut out, 0).unwrap();
        assert_eq!(out, [0u8; 512]);
    }

    #[test]
    fn test_control_passthrough() {
        let mut device = wrap(IvMode::CbcPlain);
        assert_eq!(device.control(ControlOp::BlockCount, 0).unwrap(), Some(16));
        assert_eq!(device.control(ControlOp::Sync, 0).unwrap(), Some(0));
        assert!(matches!(
            device.control(ControlOp::Other(77), 1),
            Err(EncryptionError::Device(DeviceError::Unsupported(ControlOp::Other(77))))
        ));
    }

    #[test]
    fn test_scratch_wiped_after_operations() {
        let mut device = wrap(IvMode::CbcEssiv);
        device.write(0, &[0x77; 32], 0).unwrap();
        assert!(device.scratch.iter().all(|b| *b == 0));

        let mut out = [0u8; 32];
        device.read(0, &mut out, 0).unwrap();
        assert!(device.scratch.iter().all(|b| *b == 0));
        assert_eq!(device.scratch.len(), 512);
    }

    #[test]
    fn test_read_at_write_at_span_blocks() {
        let mut device = wrap(IvMode::CbcEssiv);
        let data: Vec<u8> = (0..1500u32).map(|i| (i * 13) as u8).collect();
        device.write_at(300, &data).unwrap();

        let mut out = vec![0u8; data.len()];
        device.read_at(300, &mut out).unwrap();
        assert_eq!(out, data);

        // Bytes before the written range are still zero.
        let mut head = [0xFFu8; 300];
        device.read_at(0, &mut head).unwrap();
        assert_eq!(head, [0u8; 300]);
    }

    #[test]
    fn test_read_at_past_end() {
        let mut device = wrap(IvMode::CbcPlain);
        let mut out = [0u8; 4];
        let err = device.read_at(u64::MAX - 1, &mut out).unwrap_err();
        assert!(matches!(err, EncryptionError::Device(DeviceError::OutOfRange { .. })));
    }

    #[test]
    fn test_position_overflow() {
        let device = wrap(IvMode::CbcPlain);
        assert!(matches!(
            device.locate(u64::MAX, 1, 2),
            Err(EncryptionError::PositionOverflow { pos: u64::MAX, len: 2 })
        ));
        assert_eq!(device.locate(1000, 30, 64).unwrap(), (2, 6));
    }

    #[test]
    fn test_debug_redacts_key() {
        let device = wrap(IvMode::CbcEssiv);
        let debug_str = format!("{device:?}");
        assert!(debug_str.contains("aes-cbc-essiv:sha256"));
        assert!(debug_str.contains("block_size: 512"));
        assert!(!debug_str.contains("36, 36"));
    }
}
