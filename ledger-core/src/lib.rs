//! Core data structures for the account-based execution layer
//!
//! This crate provides the building blocks shared by the trie, state and VM
//! crates:
//! - Basic types (Hash, Address, 256-bit words)
//! - Nibble views and hex-prefix key packing
//! - Map-based trie-root computation
//! - Transaction and execution-result structures

pub mod error;
pub mod nibbles;
pub mod transaction;
pub mod triehash;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use nibbles::*;
pub use transaction::*;
pub use triehash::*;
pub use types::*;
