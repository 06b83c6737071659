// src/utils/error.rs

use thiserror::Error;

/// The primary error type for all quantization operations.
///
/// Every failure surfaces here; nothing is recovered internally. On any error
/// path all working allocations are released before the error is returned.
#[derive(Error, Debug)]
pub enum QuantError {
    /// An allocation for the hash, list arena, box tree, distance tables, or
    /// output buffers failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The caller violated an input precondition (color count out of range,
    /// empty or oversized pixel buffer).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant check failed. Indicates a bug in the quantizer,
    /// not a caller error; retrying will not help.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized `Result` type for quantization operations.
pub type Result<T> = std::result::Result<T, QuantError>;
