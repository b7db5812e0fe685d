//! Durable backend trait and in-memory reference implementation

use std::collections::HashMap;
use std::sync::Arc;

use ethereum_types::H256;
use parking_lot::RwLock;

use crate::error::DbResult;

/// Byte appended to a hash key to namespace the auxiliary map from the main
/// trie-node map inside one backend keyspace.
pub const AUX_SUFFIX: u8 = 0xff;

/// Abstract durable key-value store.
///
/// Keys are raw 32-byte hashes, or a hash plus [`AUX_SUFFIX`] for auxiliary
/// entries. The concrete engine lives outside this crate.
pub trait Backend: Send + Sync {
    /// Get value by key.
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Put key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Delete key.
    fn delete(&self, key: &[u8]) -> DbResult<()>;
}

/// Backend key of a main trie-node entry.
pub fn main_key(hash: &H256) -> Vec<u8> {
    hash.as_bytes().to_vec()
}

/// Backend key of an auxiliary entry.
pub fn aux_key(hash: &H256) -> Vec<u8> {
    let mut key = hash.as_bytes().to_vec();
    key.push(AUX_SUFFIX);
    key
}

/// Shared backend handle.
pub type SharedBackend = Arc<dyn Backend>;

/// In-memory backend used by tests and as the default store.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        assert!(backend.get(b"missing").unwrap().is_none());

        backend.put(b"key", b"value").unwrap();
        assert_eq!(backend.get(b"key").unwrap(), Some(b"value".to_vec()));

        backend.delete(b"key").unwrap();
        assert!(backend.get(b"key").unwrap().is_none());
    }

    #[test]
    fn aux_key_is_namespaced() {
        let hash = H256::repeat_byte(0xab);
        let main = main_key(&hash);
        let aux = aux_key(&hash);
        assert_eq!(main.len(), 32);
        assert_eq!(aux.len(), 33);
        assert_eq!(aux[32], AUX_SUFFIX);
        assert_eq!(&aux[..32], &main[..]);
    }
}
