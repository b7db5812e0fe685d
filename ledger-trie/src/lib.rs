//! Merkle-Patricia trie over a hash-keyed node store
//!
//! Authenticated mapping from byte-string keys to byte-string values, rooted
//! at a 256-bit hash that is a pure function of the committed content. Nodes
//! whose encoding is shorter than 32 bytes are embedded in their parent;
//! larger nodes are stored under their keccak hash in the backing store.

pub mod error;
pub mod iter;
pub mod node;
pub mod secure;
pub mod trie;

pub use error::{TrieError, TrieResult};
pub use iter::TrieIterator;
pub use node::{ChildRef, Node};
pub use secure::{FatTrieDb, SecTrieDb};
pub use trie::{HashDb, TrieDb, Verification};
