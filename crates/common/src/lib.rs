//! Shared block-device contract for the cryptbdev workspace.
//!
//! Every layer speaks the same three-call protocol: read one block, write one
//! block, and issue a numbered control operation.  Underlying media
//! (`blockdev-sim`) implement it, and so does the encrypting wrapper in the
//! `encryption` crate, which lets layers stack.

use std::fmt;

pub mod error;
pub mod traits;

pub use error::DeviceError;
pub use traits::BlockDevice;

/// Block size assumed when a device does not report one.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Control operations understood by block devices.
///
/// The numeric codes follow the block-device protocol used by MicroPython's
/// `ioctl(op, arg)`, so images and drivers built against that protocol map
/// one-to-one.  Unknown codes survive as [`ControlOp::Other`] and are passed
/// through untouched by wrapping layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    Init,
    Deinit,
    Sync,
    /// Number of addressable blocks.
    BlockCount,
    /// Native block size in bytes.
    BlockSize,
    /// Erase the block whose index is passed as `arg`.
    EraseBlock,
    Other(u32),
}

impl ControlOp {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ControlOp::Init,
            2 => ControlOp::Deinit,
            3 => ControlOp::Sync,
            4 => ControlOp::BlockCount,
            5 => ControlOp::BlockSize,
            6 => ControlOp::EraseBlock,
            other => ControlOp::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ControlOp::Init => 1,
            ControlOp::Deinit => 2,
            ControlOp::Sync => 3,
            ControlOp::BlockCount => 4,
            ControlOp::BlockSize => 5,
            ControlOp::EraseBlock => 6,
            ControlOp::Other(code) => *code,
        }
    }
}

impl From<u32> for ControlOp {
    fn from(code: u32) -> Self {
        ControlOp::from_code(code)
    }
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlOp::Init => f.write_str("init"),
            ControlOp::Deinit => f.write_str("deinit"),
            ControlOp::Sync => f.write_str("sync"),
            ControlOp::BlockCount => f.write_str("block-count"),
            ControlOp::BlockSize => f.write_str("block-size"),
            ControlOp::EraseBlock => f.write_str("erase-block"),
            ControlOp::Other(code) => write!(f, "op#{code}"),
        }
    }
}
