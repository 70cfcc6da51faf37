//! Simulated block media for exercising the encryption layer.
//!
//! Two devices are provided:
//!
//! - [`MemoryBlockDevice`]: RAM-backed, with fault injection hooks for
//!   resilience tests
//! - [`FileBlockDevice`]: a raw, headerless disk image in a regular file,
//!   the same layout dm-crypt maps in `plain` mode
//!
//! # Example
//!
//! ```
//! use blockdev_sim::{open_sim_device, SimDeviceConfig};
//! use common::BlockDevice;
//!
//! let config = SimDeviceConfig {
//!     block_size: 512,
//!     block_count: 64,
//!     backing_path: None,
//! };
//! let mut device = open_sim_device(&config).unwrap();
//! assert_eq!(device.block_size_hint().unwrap(), Some(512));
//! ```

use common::{BlockDevice, DeviceError, DEFAULT_BLOCK_SIZE};
use std::path::PathBuf;
use tracing::{debug, info};

pub mod file;
pub mod memory;

pub use file::FileBlockDevice;
pub use memory::{FaultInjection, MemoryBlockDevice};

/// Configuration for a simulated device.
#[derive(Debug, Clone)]
pub struct SimDeviceConfig {
    pub block_size: usize,
    pub block_count: u64,
    /// Image file to use; `None` keeps everything in RAM.
    pub backing_path: Option<PathBuf>,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: 2048,
            backing_path: None,
        }
    }
}

/// Open the device described by `config`.
///
/// A backing file that already exists is opened as-is (its length decides the
/// block count); otherwise a zero-filled image of `block_count` blocks is
/// created.
pub fn open_sim_device(config: &SimDeviceConfig) -> Result<Box<dyn BlockDevice>, DeviceError> {
    info!(?config, "Starting block device simulation");

    let device: Box<dyn BlockDevice> = match &config.backing_path {
        None => Box::new(MemoryBlockDevice::new(
            config.block_size,
            config.block_count,
        )),
        Some(path) if path.exists() => Box::new(FileBlockDevice::open(path, config.block_size)?),
        Some(path) => Box::new(FileBlockDevice::create(
            path,
            config.block_size,
            config.block_count,
        )?),
    };

    debug!("Block device simulation initialized successfully");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_open_memory_device() {
        let mut device = open_sim_device(&SimDeviceConfig::default()).unwrap();
        assert_eq!(device.block_size_hint().unwrap(), Some(512));
        assert_eq!(device.block_count().unwrap(), Some(2048));
        assert!(logs_contain("Starting block device simulation"));
    }

    #[test]
    fn test_open_file_device_creates_then_reopens() {
        let path = std::env::temp_dir().join(format!("blockdev-sim-cfg-{}.img", std::process::id()));
        std::fs::remove_file(&path).ok();

        let config = SimDeviceConfig {
            block_size: 1024,
            block_count: 4,
            backing_path: Some(path.clone()),
        };

        {
            let mut device = open_sim_device(&config).unwrap();
            device.write_block(0, &[7u8; 1024]).unwrap();
        }

        // Reopen ignores block_count and keeps existing contents.
        let reopened = SimDeviceConfig {
            block_count: 999,
            ..config
        };
        let mut device = open_sim_device(&reopened).unwrap();
        assert_eq!(device.block_count().unwrap(), Some(4));
        let mut buf = vec![0u8; 1024];
        device.read_block(0, &mut buf).unwrap();
        assert_eq!(buf, vec![7u8; 1024]);

        drop(device);
        std::fs::remove_file(&path).ok();
    }
}
