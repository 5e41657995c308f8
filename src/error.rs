//! Closed error set for the host API.

use thiserror::Error;

/// Errors returned by `omen` operations.
///
/// This is a closed set: every fallible public operation returns one of
/// these variants, never a bare `anyhow::Error` or `io::Error`.
#[derive(Error, Debug)]
pub enum OmenError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: u32, actual: u32 },

    #[error("duplicate id")]
    DuplicateId,

    #[error("id not found")]
    NotFound,

    #[error("flat buffer is full")]
    BufferFull,

    #[error("graph store is at capacity")]
    CapacityExhausted,

    #[error("corrupted state: {0}")]
    CorruptedState(String),

    #[error("io failed: {0}")]
    IOFailed(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OmenError>;

impl OmenError {
    /// Tagged `{kind, message}` form used for the error's wire/log representation.
    pub fn kind(&self) -> &'static str {
        match self {
            OmenError::ConfigInvalid(_) => "ConfigInvalid",
            OmenError::DimensionMismatch { .. } => "DimensionMismatch",
            OmenError::DuplicateId => "DuplicateId",
            OmenError::NotFound => "NotFound",
            OmenError::BufferFull => "BufferFull",
            OmenError::CapacityExhausted => "CapacityExhausted",
            OmenError::CorruptedState(_) => "CorruptedState",
            OmenError::IOFailed(_) => "IOFailed",
            OmenError::Cancelled => "Cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(OmenError::DuplicateId.kind(), "DuplicateId");
        assert_eq!(
            OmenError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
            .kind(),
            "DimensionMismatch"
        );
    }
}
