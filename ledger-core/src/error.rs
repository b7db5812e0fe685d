//! Error types for the core crate

use thiserror::Error;

/// Core errors shared by the trie, state and VM layers.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("decode error: {0}")]
    Decode(#[from] rlp::DecoderError),

    #[error("invalid hash length: expected 32, got {0}")]
    InvalidHashLength(usize),

    #[error("invalid address length: expected 20, got {0}")]
    InvalidAddressLength(usize),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
