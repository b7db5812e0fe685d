//! Hashed-key trie views
//!
//! Key-mapping strategies over the raw trie, composed rather than inherited:
//! the secure view keys every entry by the keccak of its key, and the fat
//! view additionally records the preimage in the store's auxiliary map so
//! original keys stay recoverable.

use ethereum_types::H256;
use keccak_hash::keccak;

use crate::error::TrieResult;
use crate::trie::{HashDb, TrieDb, Verification};

/// Trie view whose keys are keccak-hashed before use.
pub struct SecTrieDb<'db, D: HashDb> {
    raw: TrieDb<'db, D>,
}

impl<'db, D: HashDb> SecTrieDb<'db, D> {
    pub fn new(db: &'db mut D) -> Self {
        Self {
            raw: TrieDb::new(db),
        }
    }

    pub fn open(db: &'db mut D, root: H256, verification: Verification) -> TrieResult<Self> {
        Ok(Self {
            raw: TrieDb::open(db, root, verification)?,
        })
    }

    pub fn root(&self) -> TrieResult<H256> {
        self.raw.root()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn at(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        self.raw.at(keccak(key).as_bytes())
    }

    pub fn contains(&self, key: &[u8]) -> TrieResult<bool> {
        Ok(self.at(key)?.is_some())
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        self.raw.insert(keccak(key).as_bytes(), value)
    }

    pub fn remove(&mut self, key: &[u8]) -> TrieResult<()> {
        self.raw.remove(keccak(key).as_bytes())
    }

    pub fn raw(&self) -> &TrieDb<'db, D> {
        &self.raw
    }
}

/// Hashed-key trie that keeps original keys recoverable via the aux sidecar.
pub struct FatTrieDb<'db, D: HashDb> {
    raw: TrieDb<'db, D>,
}

impl<'db, D: HashDb> FatTrieDb<'db, D> {
    pub fn new(db: &'db mut D) -> Self {
        Self {
            raw: TrieDb::new(db),
        }
    }

    pub fn open(db: &'db mut D, root: H256, verification: Verification) -> TrieResult<Self> {
        Ok(Self {
            raw: TrieDb::open(db, root, verification)?,
        })
    }

    pub fn root(&self) -> TrieResult<H256> {
        self.raw.root()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn at(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        self.raw.at(keccak(key).as_bytes())
    }

    pub fn contains(&self, key: &[u8]) -> TrieResult<bool> {
        Ok(self.at(key)?.is_some())
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        let hashed = keccak(key);
        self.raw.insert(hashed.as_bytes(), value)?;
        self.raw.db_mut().insert_aux(hashed, key);
        Ok(())
    }

    pub fn remove(&mut self, key: &[u8]) -> TrieResult<()> {
        self.raw.remove(keccak(key).as_bytes())
    }

    /// Original key behind a hashed trie key, if recorded.
    pub fn recover_key(&self, hashed: &H256) -> Option<Vec<u8>> {
        self.raw.db().lookup_aux(hashed)
    }

    /// All `(original_key, value)` pairs, in hashed-key order.
    pub fn pairs(&self) -> TrieResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.raw.iter()? {
            let (hashed_key, value) = item?;
            let original = self
                .raw
                .db()
                .lookup_aux(&H256::from_slice(&hashed_key))
                .unwrap_or_default();
            out.push((original, value));
        }
        Ok(out)
    }

    pub fn raw(&self) -> &TrieDb<'db, D> {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::types::EMPTY_TRIE_ROOT;
    use ledger_db::MemoryDb;

    #[test]
    fn secure_trie_hides_plain_keys() {
        let mut db = MemoryDb::new();
        let mut trie = SecTrieDb::new(&mut db);
        trie.insert(b"balance", b"100").unwrap();

        assert_eq!(trie.at(b"balance").unwrap(), Some(b"100".to_vec()));
        // The raw trie only knows the hashed key.
        assert_eq!(trie.raw().at(b"balance").unwrap(), None);
        assert_eq!(
            trie.raw().at(keccak(b"balance").as_bytes()).unwrap(),
            Some(b"100".to_vec())
        );
    }

    #[test]
    fn secure_trie_remove_restores_empty_root() {
        let mut db = MemoryDb::new();
        let mut trie = SecTrieDb::new(&mut db);
        trie.insert(b"k", b"v").unwrap();
        trie.remove(b"k").unwrap();
        assert_eq!(trie.root().unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn fat_trie_recovers_original_keys() {
        let mut db = MemoryDb::new();
        let mut trie = FatTrieDb::new(&mut db);
        trie.insert(b"alpha", b"1").unwrap();
        trie.insert(b"beta", b"2").unwrap();

        assert_eq!(trie.recover_key(&keccak(b"alpha")), Some(b"alpha".to_vec()));

        let mut pairs = trie.pairs().unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                (b"alpha".to_vec(), b"1".to_vec()),
                (b"beta".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn fat_and_secure_share_roots() {
        let mut fat_db = MemoryDb::new();
        let mut fat = FatTrieDb::new(&mut fat_db);
        fat.insert(b"key", b"value").unwrap();
        let fat_root = fat.root().unwrap();

        let mut sec_db = MemoryDb::new();
        let mut sec = SecTrieDb::new(&mut sec_db);
        sec.insert(b"key", b"value").unwrap();
        assert_eq!(sec.root().unwrap(), fat_root);
    }
}
