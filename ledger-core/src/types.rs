//! Basic primitive types shared across the execution layer

pub use ethereum_types::{H160, H256, U256, U512};
pub use keccak_hash::{keccak, KECCAK_EMPTY, KECCAK_NULL_RLP};

/// 20-byte account address.
pub type Address = H160;

/// Hash of the empty byte string; the code hash of a code-less account.
pub const EMPTY_CODE_HASH: H256 = KECCAK_EMPTY;

/// Hash of the RLP null string; the root of an empty trie.
pub const EMPTY_TRIE_ROOT: H256 = KECCAK_NULL_RLP;

/// Widen an address into a 256-bit word (left-padded with zeroes).
pub fn address_to_u256(address: &Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

/// Truncate a 256-bit word to an address (low-order 20 bytes).
pub fn u256_to_address(word: &U256) -> Address {
    let mut bytes = [0u8; 32];
    word.to_big_endian(&mut bytes);
    Address::from_slice(&bytes[12..])
}

/// Big-endian 32-byte image of a 256-bit word, used as a storage-trie key.
pub fn h256_from_u256(word: &U256) -> H256 {
    let mut bytes = [0u8; 32];
    word.to_big_endian(&mut bytes);
    H256(bytes)
}

/// Read a 256-bit word back from its 32-byte big-endian image.
pub fn u256_from_h256(hash: &H256) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}
