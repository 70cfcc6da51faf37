use common::{BlockDevice, ControlOp, DeviceError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Raw disk image stored in a regular file.
///
/// The image has no header: block `i` lives at byte `i * block_size`.  The
/// block size is therefore supplied by the caller and reported back through
/// [`ControlOp::BlockSize`].
#[derive(Debug)]
pub struct FileBlockDevice {
    file: File,
    path: PathBuf,
    block_size: usize,
    block_count: u64,
}

impl FileBlockDevice {
    /// Open an existing image.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self, DeviceError> {
        check_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        let block_count = file_len / block_size as u64;
        if file_len % block_size as u64 != 0 {
            warn!(
                path = %path.display(),
                file_len,
                block_size,
                "image length is not a multiple of the block size; trailing bytes ignored"
            );
        }

        debug!(path = %path.display(), block_size, block_count, "opened block image");
        Ok(Self {
            file,
            path,
            block_size,
            block_count,
        })
    }

    /// Create (or truncate) a zero-filled image of `block_count` blocks.
    pub fn create<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        block_count: u64,
    ) -> Result<Self, DeviceError> {
        check_block_size(block_size)?;
        let image_len = block_count.checked_mul(block_size as u64).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "image size overflows u64",
            )
        })?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(image_len)?;
        file.sync_all()?;

        debug!(path = %path.display(), block_size, block_count, "created block image");
        Ok(Self {
            file,
            path,
            block_size,
            block_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn blocks(&self) -> u64 {
        self.block_count
    }

    fn seek_to(&mut self, index: u64, len: usize) -> Result<(), DeviceError> {
        if index >= self.block_count {
            return Err(DeviceError::OutOfRange {
                index,
                count: self.block_count,
            });
        }
        if len != self.block_size {
            return Err(DeviceError::BufferSize {
                expected: self.block_size,
                actual: len,
            });
        }
        self.file
            .seek(SeekFrom::Start(index * self.block_size as u64))?;
        Ok(())
    }
}

fn check_block_size(block_size: usize) -> Result<(), DeviceError> {
    if block_size == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "block size must be non-zero",
        )
        .into());
    }
    Ok(())
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.seek_to(index, buf.len())?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&mut self, index: u64, buf: &[u8]) -> Result<(), DeviceError> {
        self.seek_to(index, buf.len())?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn control(&mut self, op: ControlOp, arg: u64) -> Result<Option<u64>, DeviceError> {
        match op {
            ControlOp::Init | ControlOp::Deinit => Ok(Some(0)),
            ControlOp::Sync => {
                self.file.sync_data()?;
                Ok(Some(0))
            }
            ControlOp::BlockCount => Ok(Some(self.block_count)),
            ControlOp::BlockSize => Ok(Some(self.block_size as u64)),
            ControlOp::EraseBlock => {
                let zeros = vec![0u8; self.block_size];
                self.write_block(arg, &zeros)?;
                Ok(Some(0))
            }
            other => Err(DeviceError::Unsupported(other)),
        }
    }
}
