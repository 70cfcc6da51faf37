use crate::{ControlOp, DeviceError};

/// Trait implemented by anything that stores fixed-size blocks.
///
/// Buffers passed to [`read_block`](BlockDevice::read_block) and
/// [`write_block`](BlockDevice::write_block) are exactly one block long.
/// `control` returns `None` when the device has no answer for an operation
/// (for instance a medium that does not know its own block size).
pub trait BlockDevice {
    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

    fn write_block(&mut self, index: u64, buf: &[u8]) -> Result<(), DeviceError>;

    fn control(&mut self, op: ControlOp, arg: u64) -> Result<Option<u64>, DeviceError>;

    /// Native block size as reported through [`ControlOp::BlockSize`].
    ///
    /// A reported size of zero is treated the same as no report.
    fn block_size_hint(&mut self) -> Result<Option<usize>, DeviceError> {
        let reported = self.control(ControlOp::BlockSize, 0)?;
        Ok(reported
            .filter(|size| *size != 0)
            .and_then(|size| usize::try_from(size).ok()))
    }

    fn block_count(&mut self) -> Result<Option<u64>, DeviceError> {
        self.control(ControlOp::BlockCount, 0)
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read_block(index, buf)
    }

    fn write_block(&mut self, index: u64, buf: &[u8]) -> Result<(), DeviceError> {
        (**self).write_block(index, buf)
    }

    fn control(&mut self, op: ControlOp, arg: u64) -> Result<Option<u64>, DeviceError> {
        (**self).control(op, arg)
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read_block(index, buf)
    }

    fn write_block(&mut self, index: u64, buf: &[u8]) -> Result<(), DeviceError> {
        (**self).write_block(index, buf)
    }

    fn control(&mut self, op: ControlOp, arg: u64) -> Result<Option<u64>, DeviceError> {
        (**self).control(op, arg)
    }
}
