//! Trie error types

use ethereum_types::H256;
use thiserror::Error;

/// Trie error type
#[derive(Error, Debug)]
pub enum TrieError {
    /// The trie was opened against a root with no stored node
    #[error("root not found: {0}")]
    RootNotFound(H256),

    /// The current root's node cannot be loaded
    #[error("bad root: {0}")]
    BadRoot(H256),

    /// A node referenced by hash is missing from the store
    #[error("missing trie node: {0}")]
    MissingNode(H256),

    /// A stored node failed to decode
    #[error("node decode error: {0}")]
    Decode(#[from] rlp::DecoderError),

    /// A stored node decoded into an impossible shape
    #[error("invalid trie node: {0}")]
    InvalidNode(&'static str),
}

/// Result type for trie operations
pub type TrieResult<T> = Result<T, TrieError>;
