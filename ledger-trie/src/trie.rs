//! Database-backed Merkle-Patricia trie
//!
//! The merge and delete paths mirror the classic recursive case analysis:
//! `place` writes a value into a node, `cleve` splits a pair node at the
//! shared-prefix boundary, `branch_node` explodes a pair into a 17-slot
//! branch, `collapse_branch` folds a branch with a single occupant back into
//! a pair, and `graft` fuses a pair whose child is itself a pair. Every
//! replaced node
//! that was persisted has its reference dropped and the replacement inserted;
//! nodes produced mid-merge stay inline until they are streamed out.

use ethereum_types::H256;
use keccak_hash::keccak;
use ledger_core::nibbles::NibbleSlice;
use ledger_core::types::EMPTY_TRIE_ROOT;
use ledger_db::{MemoryDb, OverlayDb};
use tracing::trace;

use crate::error::{TrieError, TrieResult};
use crate::iter::TrieIterator;
use crate::node::{ChildRef, Node};

/// Node-store interface the trie runs against.
pub trait HashDb {
    fn lookup(&self, hash: &H256) -> Option<Vec<u8>>;
    fn exists(&self, hash: &H256) -> bool;
    fn insert(&mut self, hash: H256, value: &[u8]);
    fn kill(&mut self, hash: &H256);
    fn lookup_aux(&self, hash: &H256) -> Option<Vec<u8>>;
    fn insert_aux(&mut self, hash: H256, value: &[u8]);
    fn remove_aux(&mut self, hash: &H256);
}

impl HashDb for OverlayDb {
    fn lookup(&self, hash: &H256) -> Option<Vec<u8>> {
        OverlayDb::lookup(self, hash)
    }
    fn exists(&self, hash: &H256) -> bool {
        OverlayDb::exists(self, hash)
    }
    fn insert(&mut self, hash: H256, value: &[u8]) {
        OverlayDb::insert(self, hash, value);
    }
    fn kill(&mut self, hash: &H256) {
        OverlayDb::kill(self, hash);
    }
    fn lookup_aux(&self, hash: &H256) -> Option<Vec<u8>> {
        OverlayDb::lookup_aux(self, hash)
    }
    fn insert_aux(&mut self, hash: H256, value: &[u8]) {
        OverlayDb::insert_aux(self, hash, value);
    }
    fn remove_aux(&mut self, hash: &H256) {
        OverlayDb::remove_aux(self, hash);
    }
}

impl HashDb for MemoryDb {
    fn lookup(&self, hash: &H256) -> Option<Vec<u8>> {
        MemoryDb::lookup(self, hash)
    }
    fn exists(&self, hash: &H256) -> bool {
        MemoryDb::exists(self, hash)
    }
    fn insert(&mut self, hash: H256, value: &[u8]) {
        MemoryDb::insert(self, hash, value);
    }
    fn kill(&mut self, hash: &H256) {
        MemoryDb::kill(self, hash);
    }
    fn lookup_aux(&self, hash: &H256) -> Option<Vec<u8>> {
        MemoryDb::lookup_aux(self, hash)
    }
    fn insert_aux(&mut self, hash: H256, value: &[u8]) {
        MemoryDb::insert_aux(self, hash, value);
    }
    fn remove_aux(&mut self, hash: &H256) {
        MemoryDb::remove_aux(self, hash);
    }
}

/// Root-verification mode for [`TrieDb::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Auto-initialise the canonical empty root; fail on any other missing root.
    Normal,
    /// Take the root as given (still requires its node to exist).
    Skip,
}

/// Merkle-Patricia trie view over a node store, rooted at a hash.
pub struct TrieDb<'db, D: HashDb> {
    db: &'db mut D,
    root: H256,
}

impl<'db, D: HashDb> TrieDb<'db, D> {
    /// Fresh empty trie; force-stores the null root node.
    pub fn new(db: &'db mut D) -> Self {
        let mut trie = Self {
            db,
            root: EMPTY_TRIE_ROOT,
        };
        trie.init();
        trie
    }

    /// Open a trie at an existing root.
    pub fn open(db: &'db mut D, root: H256, verification: Verification) -> TrieResult<Self> {
        let mut trie = Self { db, root };
        if verification == Verification::Normal
            && trie.root == EMPTY_TRIE_ROOT
            && !trie.db.exists(&trie.root)
        {
            trie.init();
        }
        if trie.db.lookup(&trie.root).is_none() {
            return Err(TrieError::RootNotFound(root));
        }
        Ok(trie)
    }

    /// Store the null node and point the root at it.
    pub fn init(&mut self) {
        self.root = self.force_insert(&rlp::NULL_RLP);
    }

    /// True if the store lacks the root node entirely.
    pub fn is_null(&self) -> bool {
        self.db.lookup(&self.root).is_none()
    }

    /// True if the trie is initialised but holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root == EMPTY_TRIE_ROOT && self.db.lookup(&self.root).is_some()
    }

    /// Current root hash; fails if the root node cannot be found.
    pub fn root(&self) -> TrieResult<H256> {
        if self.db.lookup(&self.root).is_none() {
            return Err(TrieError::BadRoot(self.root));
        }
        Ok(self.root)
    }

    pub fn db(&self) -> &D {
        self.db
    }

    pub fn db_mut(&mut self) -> &mut D {
        self.db
    }

    /// Value stored under `key`, if any.
    pub fn at(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let root_bytes = self
            .db
            .lookup(&self.root)
            .ok_or(TrieError::RootNotFound(self.root))?;
        self.at_aux(&Node::decode(&root_bytes)?, NibbleSlice::new(key))
    }

    pub fn contains(&self, key: &[u8]) -> TrieResult<bool> {
        Ok(self.at(key)?.is_some())
    }

    /// In-order iterator over all pairs.
    pub fn iter(&self) -> TrieResult<TrieIterator<'_, 'db, D>> {
        TrieIterator::new(self)
    }

    /// In-order iterator starting at the first key not less than `key`.
    pub fn lower_bound(&self, key: &[u8]) -> TrieResult<TrieIterator<'_, 'db, D>> {
        TrieIterator::seeked(self, key)
    }

    /// Insert `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        trace!(key_len = key.len(), value_len = value.len(), "trie insert");
        let root_bytes = self
            .db
            .lookup(&self.root)
            .ok_or(TrieError::BadRoot(self.root))?;
        let root_node = Node::decode(&root_bytes)?;
        let replacement = self.merge_at(
            &root_node,
            &root_bytes,
            Some(self.root),
            NibbleSlice::new(key),
            value,
            false,
        )?;
        // merge_at only kills nodes of hashable size, but the root is always
        // referenced by hash no matter how short its encoding is.
        if root_bytes.len() < 32 {
            self.db.kill(&self.root);
        }
        self.root = self.force_insert(&replacement);
        Ok(())
    }

    /// Remove `key`; absent keys leave the trie untouched.
    pub fn remove(&mut self, key: &[u8]) -> TrieResult<()> {
        trace!(key_len = key.len(), "trie remove");
        let root_bytes = self
            .db
            .lookup(&self.root)
            .ok_or(TrieError::BadRoot(self.root))?;
        let root_node = Node::decode(&root_bytes)?;
        let replacement =
            self.delete_at(&root_node, &root_bytes, Some(self.root), NibbleSlice::new(key))?;
        if let Some(replacement) = replacement {
            if root_bytes.len() < 32 {
                self.db.kill(&self.root);
            }
            self.root = self.force_insert(&replacement);
        }
        Ok(())
    }

    // --- lookup ---

    fn at_aux(&self, here: &Node, key: NibbleSlice<'_>) -> TrieResult<Option<Vec<u8>>> {
        match here {
            Node::Empty => Ok(None),
            Node::Leaf { path, value } => {
                if key.eq_nibbles(path) {
                    Ok(Some(value.clone()))
                } else {
                    Ok(None)
                }
            }
            Node::Extension { path, child } => {
                if key.starts_with(path) {
                    let child_bytes = self.deref_child(child)?;
                    self.at_aux(&Node::decode(&child_bytes)?, key.mid(path.len()))
                } else {
                    Ok(None)
                }
            }
            Node::Branch { children, value } => {
                if key.is_empty() {
                    return Ok(value.clone());
                }
                match &children[key.at(0) as usize] {
                    ChildRef::Empty => Ok(None),
                    child => {
                        let child_bytes = self.deref_child(child)?;
                        self.at_aux(&Node::decode(&child_bytes)?, key.mid(1))
                    }
                }
            }
        }
    }

    /// Raw encoding behind a child reference.
    pub(crate) fn deref_child(&self, child: &ChildRef) -> TrieResult<Vec<u8>> {
        match child {
            ChildRef::Empty => Ok(rlp::NULL_RLP.to_vec()),
            ChildRef::Inline(raw) => Ok(raw.clone()),
            ChildRef::Hash(hash) => self.node_bytes(hash),
        }
    }

    pub(crate) fn node_bytes(&self, hash: &H256) -> TrieResult<Vec<u8>> {
        self.db
            .lookup(hash)
            .ok_or(TrieError::MissingNode(*hash))
    }

    pub(crate) fn root_node_bytes(&self) -> TrieResult<Vec<u8>> {
        self.db
            .lookup(&self.root)
            .ok_or(TrieError::RootNotFound(self.root))
    }

    // --- store plumbing ---

    fn force_insert(&mut self, encoded: &[u8]) -> H256 {
        let hash = keccak(encoded);
        self.db.insert(hash, encoded);
        hash
    }

    /// Drop the store reference of a replaced node. Only nodes of hashable
    /// size have a store entry; short nodes live inside their parent.
    fn kill_node(&mut self, encoded: &[u8], known_hash: Option<H256>) {
        if encoded.len() >= 32 {
            let hash = known_hash.unwrap_or_else(|| keccak(encoded));
            self.db.kill(&hash);
        }
    }

    /// Turn a freshly built encoding into a child reference, persisting it
    /// when it is too large to inline.
    fn stream_node(&mut self, encoded: Vec<u8>) -> ChildRef {
        if encoded.as_slice() == rlp::NULL_RLP {
            ChildRef::Empty
        } else if encoded.len() < 32 {
            ChildRef::Inline(encoded)
        } else {
            ChildRef::Hash(self.force_insert(&encoded))
        }
    }

    // --- insert (recursive merge) ---

    fn merge_at(
        &mut self,
        orig: &Node,
        orig_bytes: &[u8],
        orig_hash: Option<H256>,
        key: NibbleSlice<'_>,
        value: &[u8],
        in_line: bool,
    ) -> TrieResult<Vec<u8>> {
        match orig {
            Node::Empty => self.place(orig, orig_bytes, orig_hash, key, value),
            Node::Leaf { path, .. } if key.eq_nibbles(path) => {
                self.place(orig, orig_bytes, orig_hash, key, value)
            }
            Node::Extension { path, child } if key.starts_with(path) => {
                if !in_line {
                    self.kill_node(orig_bytes, orig_hash);
                }
                let new_child = self.merge_at_aux(child, key.mid(path.len()), value)?;
                Ok(Node::Extension {
                    path: path.clone(),
                    child: new_child,
                }
                .encode())
            }
            Node::Leaf { .. } | Node::Extension { .. } => {
                let shared = key.common_prefix(orig.path());
                if shared > 0 {
                    // Shared prefix: cleve at the disagreement and retry.
                    let cleaved = self.cleve(orig, orig_bytes, orig_hash, shared)?;
                    let node = Node::decode(&cleaved)?;
                    self.merge_at(&node, &cleaved, None, key, value, true)
                } else {
                    // Nothing shared: explode into a branch and retry.
                    let branched = self.branch_node(orig, orig_bytes, orig_hash)?;
                    let node = Node::decode(&branched)?;
                    self.merge_at(&node, &branched, None, key, value, true)
                }
            }
            Node::Branch { children, value: branch_value } => {
                if key.is_empty() {
                    return self.place(orig, orig_bytes, orig_hash, key, value);
                }
                if !in_line {
                    self.kill_node(orig_bytes, orig_hash);
                }
                let slot = key.at(0) as usize;
                let mut new_children = children.clone();
                new_children[slot] = self.merge_at_aux(&children[slot], key.mid(1), value)?;
                Ok(Node::Branch {
                    children: new_children,
                    value: branch_value.clone(),
                }
                .encode())
            }
        }
    }

    fn merge_at_aux(
        &mut self,
        child: &ChildRef,
        key: NibbleSlice<'_>,
        value: &[u8],
    ) -> TrieResult<ChildRef> {
        let replacement = match child {
            ChildRef::Empty => {
                self.merge_at(&Node::Empty, &rlp::NULL_RLP, None, key, value, true)?
            }
            ChildRef::Inline(raw) => {
                let node = Node::decode(raw)?;
                self.merge_at(&node, raw, None, key, value, true)?
            }
            ChildRef::Hash(hash) => {
                let bytes = self.node_bytes(hash)?;
                let node = Node::decode(&bytes)?;
                self.merge_at(&node, &bytes, Some(*hash), key, value, false)?
            }
        };
        Ok(self.stream_node(replacement))
    }

    /// Write `value` straight into `orig` (empty, exact leaf, or branch slot 16).
    fn place(
        &mut self,
        orig: &Node,
        orig_bytes: &[u8],
        orig_hash: Option<H256>,
        key: NibbleSlice<'_>,
        value: &[u8],
    ) -> TrieResult<Vec<u8>> {
        self.kill_node(orig_bytes, orig_hash);
        match orig {
            Node::Empty => Ok(Node::Leaf {
                path: key.to_vec(),
                value: value.to_vec(),
            }
            .encode()),
            Node::Leaf { path, .. } => Ok(Node::Leaf {
                path: path.clone(),
                value: value.to_vec(),
            }
            .encode()),
            Node::Extension { .. } => Err(TrieError::InvalidNode("value placed into an extension")),
            Node::Branch { children, .. } => Ok(Node::Branch {
                children: children.clone(),
                value: Some(value.to_vec()),
            }
            .encode()),
        }
    }

    /// Split a pair node at `shared` nibbles: an extension over the shared
    /// prefix pointing at the remainder of the original pair.
    fn cleve(
        &mut self,
        orig: &Node,
        orig_bytes: &[u8],
        orig_hash: Option<H256>,
        shared: usize,
    ) -> TrieResult<Vec<u8>> {
        self.kill_node(orig_bytes, orig_hash);
        let path = orig.path();
        debug_assert!(shared > 0 && shared <= path.len());
        let bottom = match orig {
            Node::Leaf { value, .. } => Node::Leaf {
                path: path[shared..].to_vec(),
                value: value.clone(),
            },
            Node::Extension { child, .. } => Node::Extension {
                path: path[shared..].to_vec(),
                child: child.clone(),
            },
            _ => return Err(TrieError::InvalidNode("cleve of a non-pair node")),
        };
        let bottom_ref = self.stream_node(bottom.encode());
        Ok(Node::Extension {
            path: path[..shared].to_vec(),
            child: bottom_ref,
        }
        .encode())
    }

    /// Explode a pair node into a 17-slot branch.
    fn branch_node(
        &mut self,
        orig: &Node,
        orig_bytes: &[u8],
        orig_hash: Option<H256>,
    ) -> TrieResult<Vec<u8>> {
        self.kill_node(orig_bytes, orig_hash);
        let path = orig.path();
        let mut children: Box<[ChildRef; 16]> = Box::new(std::array::from_fn(|_| ChildRef::Empty));
        let mut branch_value = None;

        if path.is_empty() {
            match orig {
                Node::Leaf { value, .. } => branch_value = Some(value.clone()),
                _ => return Err(TrieError::InvalidNode("pathless extension")),
            }
        } else {
            let slot = path[0] as usize;
            let sub = match orig {
                Node::Leaf { value, .. } => Some(Node::Leaf {
                    path: path[1..].to_vec(),
                    value: value.clone(),
                }),
                Node::Extension { child, .. } if path.len() > 1 => Some(Node::Extension {
                    path: path[1..].to_vec(),
                    child: child.clone(),
                }),
                Node::Extension { child, .. } => {
                    // One-nibble extension: its child takes the slot directly.
                    children[slot] = child.clone();
                    None
                }
                _ => return Err(TrieError::InvalidNode("branch of a non-pair node")),
            };
            if let Some(sub) = sub {
                children[slot] = self.stream_node(sub.encode());
            }
        }
        Ok(Node::Branch {
            children,
            value: branch_value,
        }
        .encode())
    }

    // --- remove (recursive delete) ---

    /// Returns the replacement encoding, or `None` when the key was absent
    /// and nothing changed.
    fn delete_at(
        &mut self,
        orig: &Node,
        orig_bytes: &[u8],
        orig_hash: Option<H256>,
        key: NibbleSlice<'_>,
    ) -> TrieResult<Option<Vec<u8>>> {
        match orig {
            Node::Empty => Ok(None),
            Node::Leaf { path, .. } => {
                if key.eq_nibbles(path) {
                    self.kill_node(orig_bytes, orig_hash);
                    Ok(Some(rlp::NULL_RLP.to_vec()))
                } else {
                    Ok(None)
                }
            }
            Node::Extension { path, child } => {
                if !key.starts_with(path) {
                    return Ok(None);
                }
                match self.delete_at_aux(child, key.mid(path.len()))? {
                    None => Ok(None),
                    Some(new_child) => {
                        self.kill_node(orig_bytes, orig_hash);
                        if self.is_pair_ref(&new_child)? {
                            Ok(Some(self.graft(path, &new_child)?))
                        } else {
                            Ok(Some(
                                Node::Extension {
                                    path: path.clone(),
                                    child: new_child,
                                }
                                .encode(),
                            ))
                        }
                    }
                }
            }
            Node::Branch { children, value } => {
                if key.is_empty() {
                    if value.is_none() {
                        return Ok(None);
                    }
                    self.kill_node(orig_bytes, orig_hash);
                    let stripped = Node::Branch {
                        children: children.clone(),
                        value: None,
                    };
                    self.collapse_branch(stripped)
                } else {
                    let slot = key.at(0) as usize;
                    match self.delete_at_aux(&children[slot], key.mid(1))? {
                        None => Ok(None),
                        Some(new_child) => {
                            self.kill_node(orig_bytes, orig_hash);
                            let mut new_children = children.clone();
                            new_children[slot] = new_child;
                            self.collapse_branch(Node::Branch {
                                children: new_children,
                                value: value.clone(),
                            })
                        }
                    }
                }
            }
        }
    }

    fn delete_at_aux(
        &mut self,
        child: &ChildRef,
        key: NibbleSlice<'_>,
    ) -> TrieResult<Option<ChildRef>> {
        let replacement = match child {
            ChildRef::Empty => return Ok(None),
            ChildRef::Inline(raw) => {
                let node = Node::decode(raw)?;
                self.delete_at(&node, raw, None, key)?
            }
            ChildRef::Hash(hash) => {
                let bytes = self.node_bytes(hash)?;
                let node = Node::decode(&bytes)?;
                self.delete_at(&node, &bytes, Some(*hash), key)?
            }
        };
        Ok(replacement.map(|encoded| self.stream_node(encoded)))
    }

    /// A branch left with a single occupant degenerates back into a pair;
    /// if that pair's child is itself a pair the two are grafted together.
    fn collapse_branch(&mut self, branch: Node) -> TrieResult<Option<Vec<u8>>> {
        let Node::Branch { ref children, ref value } = branch else {
            return Err(TrieError::InvalidNode("collapse of a non-branch node"));
        };
        match unique_in_use(children, value) {
            None => Ok(Some(branch.encode())),
            Some(16) => Ok(Some(
                Node::Leaf {
                    path: Vec::new(),
                    value: value.clone().unwrap_or_default(),
                }
                .encode(),
            )),
            Some(slot) => {
                let child = children[slot].clone();
                if self.is_pair_ref(&child)? {
                    Ok(Some(self.graft(&[slot as u8], &child)?))
                } else {
                    Ok(Some(
                        Node::Extension {
                            path: vec![slot as u8],
                            child,
                        }
                        .encode(),
                    ))
                }
            }
        }
    }

    /// Fuse an extension's path with its pair child into one pair node.
    fn graft(&mut self, path: &[u8], child: &ChildRef) -> TrieResult<Vec<u8>> {
        let child_bytes = match child {
            ChildRef::Inline(raw) => raw.clone(),
            ChildRef::Hash(hash) => {
                let bytes = self.node_bytes(hash)?;
                // The child stops being independently referenced.
                self.db.kill(hash);
                bytes
            }
            ChildRef::Empty => return Err(TrieError::InvalidNode("graft of an empty child")),
        };
        let mut combined = path.to_vec();
        match Node::decode(&child_bytes)? {
            Node::Leaf { path: sub, value } => {
                combined.extend_from_slice(&sub);
                Ok(Node::Leaf {
                    path: combined,
                    value,
                }
                .encode())
            }
            Node::Extension { path: sub, child } => {
                combined.extend_from_slice(&sub);
                Ok(Node::Extension {
                    path: combined,
                    child,
                }
                .encode())
            }
            _ => Err(TrieError::InvalidNode("graft of a non-pair child")),
        }
    }

    fn is_pair_ref(&self, child: &ChildRef) -> TrieResult<bool> {
        match child {
            ChildRef::Empty => Ok(false),
            ChildRef::Inline(raw) => Ok(Node::decode(raw)?.is_pair()),
            ChildRef::Hash(hash) => Ok(Node::decode(&self.node_bytes(hash)?)?.is_pair()),
        }
    }
}

/// The index of the only occupied slot (16 meaning the value), or `None`
/// when the occupancy count differs from one.
fn unique_in_use(children: &[ChildRef; 16], value: &Option<Vec<u8>>) -> Option<usize> {
    let mut used = None;
    for (slot, child) in children.iter().enumerate() {
        if !child.is_empty() {
            if used.is_some() {
                return None;
            }
            used = Some(slot);
        }
    }
    if value.is_some() {
        if used.is_some() {
            return None;
        }
        used = Some(16);
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::triehash::trie_root;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn oracle(pairs: &BTreeMap<Vec<u8>, Vec<u8>>) -> H256 {
        trie_root(pairs.clone())
    }

    #[test]
    fn fresh_trie_has_canonical_empty_root() {
        let mut db = MemoryDb::new();
        let trie = TrieDb::new(&mut db);
        assert!(trie.is_empty());
        assert_eq!(trie.root().unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn open_unknown_root_fails() {
        let mut db = MemoryDb::new();
        let bogus = H256::repeat_byte(0x77);
        match TrieDb::open(&mut db, bogus, Verification::Normal) {
            Err(TrieError::RootNotFound(root)) => assert_eq!(root, bogus),
            other => panic!("expected RootNotFound, got {:?}", other.map(|t| t.root)),
        }
    }

    #[test]
    fn open_empty_root_auto_initialises() {
        let mut db = MemoryDb::new();
        let trie = TrieDb::open(&mut db, EMPTY_TRIE_ROOT, Verification::Normal).unwrap();
        assert!(trie.is_empty());
    }

    #[test]
    fn insert_and_get_single_pair() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"hello", b"world").unwrap();
        assert_eq!(trie.at(b"hello").unwrap(), Some(b"world".to_vec()));
        assert!(trie.contains(b"hello").unwrap());
        assert_eq!(trie.at(b"hell").unwrap(), None);
        assert_eq!(trie.at(b"helloo").unwrap(), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"key", b"one").unwrap();
        let first_root = trie.root().unwrap();
        trie.insert(b"key", b"two").unwrap();
        assert_eq!(trie.at(b"key").unwrap(), Some(b"two".to_vec()));
        assert_ne!(trie.root().unwrap(), first_root);
    }

    #[test]
    fn dog_vector_root_is_order_independent() {
        let pairs: [(&[u8], &[u8]); 3] = [
            (b"do", b"verb"),
            (b"dog", b"puppy"),
            (b"doge", b"coin"),
        ];
        let mut roots = Vec::new();
        // All six insertion orders of the standard conformance vector.
        let orders = [
            [0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0],
        ];
        for order in orders {
            let mut db = MemoryDb::new();
            let mut trie = TrieDb::new(&mut db);
            for index in order {
                let (key, value) = pairs[index];
                trie.insert(key, value).unwrap();
            }
            for (key, value) in pairs {
                assert_eq!(trie.at(key).unwrap(), Some(value.to_vec()));
            }
            roots.push(trie.root().unwrap());
        }
        assert!(roots.windows(2).all(|pair| pair[0] == pair[1]));

        let map: BTreeMap<Vec<u8>, Vec<u8>> = pairs
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        assert_eq!(roots[0], oracle(&map));
    }

    #[test]
    fn insert_then_remove_restores_empty_root() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"transient", b"value").unwrap();
        assert_ne!(trie.root().unwrap(), EMPTY_TRIE_ROOT);
        trie.remove(b"transient").unwrap();
        assert_eq!(trie.at(b"transient").unwrap(), None);
        assert_eq!(trie.root().unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn remove_matches_never_inserted_root() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"do", b"verb").unwrap();
        trie.insert(b"dog", b"puppy").unwrap();
        trie.insert(b"doge", b"coin").unwrap();
        trie.remove(b"dog").unwrap();

        let mut reference_db = MemoryDb::new();
        let mut reference = TrieDb::new(&mut reference_db);
        reference.insert(b"do", b"verb").unwrap();
        reference.insert(b"doge", b"coin").unwrap();
        assert_eq!(trie.root().unwrap(), reference.root().unwrap());
    }

    #[test]
    fn remove_absent_key_is_a_no_op() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"present", b"value").unwrap();
        let root = trie.root().unwrap();
        trie.remove(b"absent").unwrap();
        trie.remove(b"presen").unwrap();
        trie.remove(b"presentX").unwrap();
        assert_eq!(trie.root().unwrap(), root);
    }

    #[test]
    fn branch_degeneration_grafts_paths() {
        // "dog"/"doge" share a long prefix; removing one must collapse the
        // split branch back into a single grafted pair.
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"dog", b"puppy").unwrap();
        trie.insert(b"doge", b"coin").unwrap();
        trie.remove(b"doge").unwrap();

        let map: BTreeMap<Vec<u8>, Vec<u8>> =
            [(b"dog".to_vec(), b"puppy".to_vec())].into_iter().collect();
        assert_eq!(trie.root().unwrap(), oracle(&map));
        assert_eq!(trie.at(b"dog").unwrap(), Some(b"puppy".to_vec()));
    }

    #[test]
    fn deep_removal_applies_degeneration_at_every_level() {
        let pairs: [(&[u8], &[u8]); 5] = [
            (b"abcdef", b"one"),
            (b"abcdeg", b"two"),
            (b"abcdx", b"three"),
            (b"abx", b"four"),
            (b"zzz", b"five"),
        ];
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        let mut map = BTreeMap::new();
        for (key, value) in pairs {
            trie.insert(key, value).unwrap();
            map.insert(key.to_vec(), value.to_vec());
        }
        assert_eq!(trie.root().unwrap(), oracle(&map));

        // Peel keys off one by one, checking the root against the oracle of
        // the remaining content after every removal.
        for (key, _) in pairs {
            trie.remove(key).unwrap();
            map.remove(key);
            assert_eq!(trie.root().unwrap(), oracle(&map));
        }
        assert_eq!(trie.root().unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn short_nodes_are_inlined_not_stored() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"do", b"verb").unwrap();
        trie.insert(b"dog", b"puppy").unwrap();
        trie.insert(b"doge", b"coin").unwrap();
        let root = trie.root().unwrap();
        drop(trie);

        db.purge();
        for hash in db.keys() {
            let encoded = db.lookup(&hash).unwrap();
            // Only hashable-size nodes (and the force-stored root) may own a
            // store entry.
            assert!(
                encoded.len() >= 32 || hash == root,
                "inlined-size node persisted: {} bytes under {hash}",
                encoded.len()
            );
        }
    }

    #[test]
    fn refcounts_return_store_to_empty_after_full_removal() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        let keys: [&[u8]; 6] = [b"do", b"dog", b"doge", b"horse", b"house", b"ho"];
        for key in keys {
            trie.insert(key, b"some-reasonably-long-value-payload").unwrap();
        }
        for key in keys {
            trie.remove(key).unwrap();
        }
        assert_eq!(trie.root().unwrap(), EMPTY_TRIE_ROOT);
        drop(trie);

        // Every node reference taken during the inserts must have been given
        // back during the removes.
        db.purge();
        assert_eq!(db.keys(), [EMPTY_TRIE_ROOT].into_iter().collect());
    }

    #[test]
    fn reopen_at_committed_root() {
        let mut db = MemoryDb::new();
        let root = {
            let mut trie = TrieDb::new(&mut db);
            trie.insert(b"persist", b"me").unwrap();
            trie.root().unwrap()
        };
        let trie = TrieDb::open(&mut db, root, Verification::Normal).unwrap();
        assert_eq!(trie.at(b"persist").unwrap(), Some(b"me".to_vec()));
    }

    proptest! {
        #[test]
        fn random_content_matches_oracle(
            pairs in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 0..6),
                proptest::collection::vec(any::<u8>(), 1..20),
                1..24,
            )
        ) {
            let mut db = MemoryDb::new();
            let mut trie = TrieDb::new(&mut db);
            for (key, value) in &pairs {
                trie.insert(key, value).unwrap();
            }
            prop_assert_eq!(trie.root().unwrap(), oracle(&pairs));
            for (key, value) in &pairs {
                prop_assert_eq!(trie.at(key).unwrap(), Some(value.clone()));
            }
        }

        #[test]
        fn insertion_order_never_changes_root(
            pairs in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 1..5),
                proptest::collection::vec(any::<u8>(), 1..8),
                2..12,
            ),
            seed in any::<u64>(),
        ) {
            let mut ordered: Vec<(Vec<u8>, Vec<u8>)> = pairs.clone().into_iter().collect();

            let mut db_a = MemoryDb::new();
            let mut trie_a = TrieDb::new(&mut db_a);
            for (key, value) in &ordered {
                trie_a.insert(key, value).unwrap();
            }
            let root_a = trie_a.root().unwrap();

            // Cheap deterministic shuffle.
            let mut state = seed | 1;
            for i in (1..ordered.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ordered.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let mut db_b = MemoryDb::new();
            let mut trie_b = TrieDb::new(&mut db_b);
            for (key, value) in &ordered {
                trie_b.insert(key, value).unwrap();
            }
            prop_assert_eq!(trie_b.root().unwrap(), root_a);
        }

        #[test]
        fn partial_removal_matches_oracle(
            pairs in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 1..5),
                proptest::collection::vec(any::<u8>(), 1..8),
                2..16,
            ),
            keep_mask in any::<u32>(),
        ) {
            let mut db = MemoryDb::new();
            let mut trie = TrieDb::new(&mut db);
            for (key, value) in &pairs {
                trie.insert(key, value).unwrap();
            }
            let mut remaining = pairs.clone();
            for (index, key) in pairs.keys().enumerate() {
                if keep_mask & (1 << (index % 32)) == 0 {
                    trie.remove(key).unwrap();
                    remaining.remove(key);
                }
            }
            prop_assert_eq!(trie.root().unwrap(), oracle(&remaining));
        }
    }
}
