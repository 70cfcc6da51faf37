use common::{BlockDevice, ControlOp, DeviceError};
use tracing::trace;

/// Failure switches for resilience tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultInjection {
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub fail_control: bool,
}

/// RAM-backed block device.
///
/// Starts zero-filled.  Every successful `write_block` and erase bumps a
/// counter so tests can check that a failed operation committed nothing.
#[derive(Clone)]
pub struct MemoryBlockDevice {
    block_size: usize,
    block_count: u64,
    data: Vec<u8>,
    report_block_size: bool,
    faults: FaultInjection,
    writes: u64,
}

impl MemoryBlockDevice {
    /// # Panics
    ///
    /// Panics if the device would not fit in addressable memory.
    pub fn new(block_size: usize, block_count: u64) -> Self {
        let total = usize::try_from(block_count)
            .ok()
            .and_then(|count| count.checked_mul(block_size))
            .expect("memory device size exceeds addressable memory");

        Self {
            block_size,
            block_count,
            data: vec![0u8; total],
            report_block_size: true,
            faults: FaultInjection::default(),
            writes: 0,
        }
    }

    /// Stop answering [`ControlOp::BlockSize`], like a driver that predates
    /// the query.
    pub fn without_block_size_report(mut self) -> Self {
        self.report_block_size = false;
        self
    }

    pub fn with_faults(mut self, faults: FaultInjection) -> Self {
        self.faults = faults;
        self
    }

    pub fn set_faults(&mut self, faults: FaultInjection) {
        self.faults = faults;
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn blocks(&self) -> u64 {
        self.block_count
    }

    /// Number of blocks committed so far (writes and erases).
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Stored bytes of a block, bypassing any layer above.
    pub fn raw_block(&self, index: u64) -> Option<&[u8]> {
        let range = self.range_of(index).ok()?;
        Some(&self.data[range])
    }

    /// Mutable access to stored bytes, for corrupting media in tests.
    pub fn raw_block_mut(&mut self, index: u64) -> Option<&mut [u8]> {
        let range = self.range_of(index).ok()?;
        Some(&mut self.data[range])
    }

    fn range_of(&self, index: u64) -> Result<std::ops::Range<usize>, DeviceError> {
        if index >= self.block_count {
            return Err(DeviceError::OutOfRange {
                index,
                count: self.block_count,
            });
        }
        // index < block_count and block_count * block_size fit in usize at construction.
        let start = index as usize * self.block_size;
        Ok(start..start + self.block_size)
    }

    fn check_len(&self, len: usize) -> Result<(), DeviceError> {
        if len != self.block_size {
            return Err(DeviceError::BufferSize {
                expected: self.block_size,
                actual: len,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockDevice")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("writes", &self.writes)
            .field("faults", &self.faults)
            .finish()
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        if self.faults.fail_reads {
            return Err(DeviceError::Injected("read"));
        }
        self.check_len(buf.len())?;
        let range = self.range_of(index)?;
        buf.copy_from_slice(&self.data[range]);
        trace!(index, "memory read");
        Ok(())
    }

    fn write_block(&mut self, index: u64, buf: &[u8]) -> Result<(), DeviceError> {
        if self.faults.fail_writes {
            return Err(DeviceError::Injected("write"));
        }
        self.check_len(buf.len())?;
        let range = self.range_of(index)?;
        self.data[range].copy_from_slice(buf);
        self.writes += 1;
        trace!(index, "memory write");
        Ok(())
    }

    fn control(&mut self, op: ControlOp, arg: u64) -> Result<Option<u64>, DeviceError> {
        if self.faults.fail_control {
            return Err(DeviceError::Injected("control"));
        }
        match op {
            ControlOp::Init | ControlOp::Deinit | ControlOp::Sync => Ok(Some(0)),
            ControlOp::BlockCount => Ok(Some(self.block_count)),
            ControlOp::BlockSize => Ok(self.report_block_size.then_some(self.block_size as u64)),
            ControlOp::EraseBlock => {
                if self.faults.fail_writes {
                    return Err(DeviceError::Injected("erase"));
                }
                let range = self.range_of(arg)?;
                self.data[range].fill(0);
                self.writes += 1;
                Ok(Some(0))
            }
            other => Err(DeviceError::Unsupported(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_block() {
        let mut device = MemoryBlockDevice::new(512, 4);
        device.write_block(2, &[0xAB; 512]).unwrap();

        let mut buf = [0u8; 512];
        device.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; 512]);

        device.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 512]);
        assert_eq!(device.write_count(), 1);
    }

    #[test]
    fn test_bounds_and_buffer_size() {
        let mut device = MemoryBlockDevice::new(512, 4);
        let mut buf = [0u8; 512];

        assert!(matches!(
            device.read_block(4, &mut buf),
            Err(DeviceError::OutOfRange { index: 4, count: 4 })
        ));
        assert!(matches!(
            device.write_block(0, &[0u8; 100]),
            Err(DeviceError::BufferSize {
                expected: 512,
                actual: 100
            })
        ));
        assert_eq!(device.write_count(), 0);
    }

    #[test]
    fn test_control_reports() {
        let mut device = MemoryBlockDevice::new(4096, 8);
        assert_eq!(device.block_size_hint().unwrap(), Some(4096));
        assert_eq!(device.block_count().unwrap(), Some(8));
        assert_eq!(device.control(ControlOp::Sync, 0).unwrap(), Some(0));
        assert!(matches!(
            device.control(ControlOp::Other(99), 0),
            Err(DeviceError::Unsupported(ControlOp::Other(99)))
        ));

        let mut silent = MemoryBlockDevice::new(4096, 8).without_block_size_report();
        assert_eq!(silent.block_size_hint().unwrap(), None);
    }

    #[test]
    fn test_erase_zeroes_block() {
        let mut device = MemoryBlockDevice::new(512, 2);
        device.write_block(1, &[0xFF; 512]).unwrap();
        device.control(ControlOp::EraseBlock, 1).unwrap();
        assert_eq!(device.raw_block(1).unwrap(), &[0u8; 512][..]);
        assert!(device.control(ControlOp::EraseBlock, 2).is_err());
    }

    #[test]
    fn test_fault_injection() {
        let mut device = MemoryBlockDevice::new(512, 2).with_faults(FaultInjection {
            fail_writes: true,
            ..Default::default()
        });

        assert!(matches!(
            device.write_block(0, &[1u8; 512]),
            Err(DeviceError::Injected("write"))
        ));
        assert!(device.control(ControlOp::EraseBlock, 0).is_err());

        let mut buf = [0u8; 512];
        device.read_block(0, &mut buf).unwrap();

        device.set_faults(FaultInjection::default());
        device.write_block(0, &[1u8; 512]).unwrap();
        assert_eq!(device.write_count(), 1);
    }
}
