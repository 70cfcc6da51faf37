use thiserror::Error;

use crate::ControlOp;

/// Failures reported by an underlying block device.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Block {index} out of range (device has {count} blocks)")]
    OutOfRange { index: u64, count: u64 },

    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Unsupported control operation: {0}")]
    Unsupported(ControlOp),

    /// Fault raised on purpose by a simulated device.
    #[error("Injected fault: {0}")]
    Injected(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure raised by a layer stacked on top of another device.
    #[error("Layer error: {0}")]
    Layer(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::OutOfRange { index: 9, count: 8 };
        assert_eq!(err.to_string(), "Block 9 out of range (device has 8 blocks)");

        let err = DeviceError::Unsupported(ControlOp::Other(77));
        assert_eq!(err.to_string(), "Unsupported control operation: op#77");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: DeviceError = io.into();
        assert!(matches!(err, DeviceError::Io(_)));
    }
}
