use common::DeviceError;
use thiserror::Error;

/// Encryption-layer errors
///
/// Messages carry offsets, lengths and sizes only; key material never
/// appears in an error.
#[derive(Error, Debug)]
pub enum EncryptionError {
    /// Request does not fit inside one block
    #[error("Range out of bounds: offset {offset} + length {len} exceeds block size {block_size}")]
    Boundary {
        offset: usize,
        len: usize,
        block_size: usize,
    },

    /// Failure from the wrapped device, passed through unchanged
    #[error("Underlying device error: {0}")]
    Device(#[from] DeviceError),

    /// Block size query failed while wrapping a device
    #[error("Construction failed: block size query: {0}")]
    Construction(#[source] DeviceError),

    #[error("Invalid block size {0}: must be a non-zero multiple of 16 bytes")]
    InvalidBlockSize(usize),

    /// Key management errors
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Cipher error: {0}")]
    CipherError(String),

    #[error("Byte position {pos} + length {len} overflows the device address space")]
    PositionOverflow { pos: u64, len: usize },
}

/// Result type alias for encryption operations
pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Lets an encrypting layer report through the plain block-device contract.
impl From<EncryptionError> for DeviceError {
    fn from(err: EncryptionError) -> Self {
        match err {
            EncryptionError::Device(inner) => inner,
            EncryptionError::Boundary {
                offset,
                len,
                block_size,
            } => DeviceError::BufferSize {
                expected: block_size.saturating_sub(offset),
                actual: len,
            },
            other => DeviceError::Layer(Box::new(other)),
        }
    }
}

impl From<serde_yaml::Error> for EncryptionError {
    fn from(err: serde_yaml::Error) -> Self {
        EncryptionError::InvalidConfiguration(err.to_string())
    }
}

impl From<hex::FromHexError> for EncryptionError {
    fn from(err: hex::FromHexError) -> Self {
        EncryptionError::InvalidConfiguration(format!("Invalid hex key: {err}"))
    }
}
