//! In-order trie iteration
//!
//! The iterator keeps an explicit descent trail instead of recursing: each
//! entry records a node's encoding, the nibbles consumed on the way to it,
//! and a cursor over its children. The cursor runs entering -> value ->
//! slot 0..15 -> exiting, which yields pairs in lexicographic key order and
//! makes the walk restartable from any position.

use ledger_core::nibbles::nibbles_to_bytes;

use crate::error::TrieResult;
use crate::node::Node;
use crate::trie::{HashDb, TrieDb};

const ENTERING: u16 = 255;
const AT_VALUE: u16 = 16;
const EXITING: u16 = 17;

#[derive(Debug, Clone)]
struct TrailEntry {
    encoded: Vec<u8>,
    /// Nibbles consumed from the root down to this node.
    key: Vec<u8>,
    child: u16,
}

/// Lazy in-order iterator over `(key, value)` pairs.
pub struct TrieIterator<'a, 'db, D: HashDb> {
    trie: &'a TrieDb<'db, D>,
    trail: Vec<TrailEntry>,
    /// Item a seek landed on, handed out by the first `next` call.
    primed: Option<(Vec<u8>, Vec<u8>)>,
    failed: bool,
}

impl<'a, 'db, D: HashDb> TrieIterator<'a, 'db, D> {
    /// Iterator over the whole trie.
    pub fn new(trie: &'a TrieDb<'db, D>) -> TrieResult<Self> {
        Ok(Self {
            trie,
            trail: vec![TrailEntry {
                encoded: trie.root_node_bytes()?,
                key: Vec::new(),
                child: ENTERING,
            }],
            primed: None,
            failed: false,
        })
    }

    /// Iterator positioned at the first key not less than `key`.
    pub fn seeked(trie: &'a TrieDb<'db, D>, key: &[u8]) -> TrieResult<Self> {
        let mut iter = Self::new(trie)?;
        let seek = ledger_core::nibbles::bytes_to_nibbles(key);
        match iter.advance(Some(seek))? {
            Some(item) => iter.primed = Some(item),
            None => iter.trail.clear(),
        }
        Ok(iter)
    }

    fn step_cursor(child: u16) -> u16 {
        match child {
            AT_VALUE => 0,
            15 => EXITING,
            other => other + 1,
        }
    }

    fn advance(
        &mut self,
        mut seek: Option<Vec<u8>>,
    ) -> TrieResult<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if self.trail.is_empty() {
                return Ok(None);
            }
            let top = self.trail.len() - 1;
            let node = Node::decode(&self.trail[top].encoded)?;
            let cursor = self.trail[top].child;

            if cursor == ENTERING {
                match &node {
                    Node::Empty => {
                        seek = None;
                        self.trail.pop();
                        continue;
                    }
                    Node::Leaf { path, value } => {
                        if let Some(k) = seek.as_mut() {
                            if !nibbles_start_with(k, path) {
                                if !nibbles_earlier_than(k, path) {
                                    seek = None;
                                    self.trail.pop();
                                    continue;
                                }
                                k.clear();
                            }
                            let consumed = k.len().min(path.len());
                            k.drain(..consumed);
                            if !k.is_empty() {
                                // Key data left at a leaf: the target is past
                                // this subtree.
                                seek = None;
                                self.trail.pop();
                                continue;
                            }
                        }
                        let entry = &mut self.trail[top];
                        entry.key.extend_from_slice(path);
                        entry.child = 0;
                        return Ok(Some((nibbles_to_bytes(&entry.key), value.clone())));
                    }
                    Node::Extension { path, child } => {
                        if let Some(k) = seek.as_mut() {
                            if !nibbles_start_with(k, path) {
                                if !nibbles_earlier_than(k, path) {
                                    seek = None;
                                    self.trail.pop();
                                    continue;
                                }
                                k.clear();
                            }
                            let consumed = k.len().min(path.len());
                            k.drain(..consumed);
                        }
                        let child_bytes = self.trie.deref_child(child)?;
                        let entry = &mut self.trail[top];
                        entry.key.extend_from_slice(path);
                        entry.encoded = child_bytes;
                        continue;
                    }
                    Node::Branch { .. } => {
                        let entry = &mut self.trail[top];
                        entry.child = match seek.as_mut() {
                            Some(k) if !k.is_empty() => {
                                let slot = k.remove(0);
                                slot as u16
                            }
                            _ => AT_VALUE,
                        };
                    }
                }
            } else {
                match &node {
                    Node::Branch { .. } => {
                        let entry = &mut self.trail[top];
                        entry.child = Self::step_cursor(entry.child);
                    }
                    _ => {
                        seek = None;
                        self.trail.pop();
                        continue;
                    }
                }
            }

            let Node::Branch { children, value } = &node else {
                continue;
            };
            loop {
                let cursor = self.trail[top].child;
                if cursor == EXITING {
                    seek = None;
                    self.trail.pop();
                    break;
                }
                let used = if cursor == AT_VALUE {
                    value.is_some()
                } else {
                    !children[cursor as usize].is_empty()
                };
                if used {
                    if cursor == AT_VALUE {
                        let key_bytes = nibbles_to_bytes(&self.trail[top].key);
                        let value = value.clone().unwrap_or_default();
                        return Ok(Some((key_bytes, value)));
                    }
                    let child_bytes =
                        self.trie.deref_child(&children[cursor as usize])?;
                    let mut key = self.trail[top].key.clone();
                    key.push(cursor as u8);
                    self.trail.push(TrailEntry {
                        encoded: child_bytes,
                        key,
                        child: ENTERING,
                    });
                    break;
                }
                // Target slot unoccupied: everything below the next occupied
                // slot already sorts after the sought key.
                seek = None;
                self.trail[top].child = Self::step_cursor(cursor);
            }
        }
    }
}

impl<'a, 'db, D: HashDb> Iterator for TrieIterator<'a, 'db, D> {
    type Item = TrieResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(item) = self.primed.take() {
            return Some(Ok(item));
        }
        match self.advance(None) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

fn nibbles_start_with(key: &[u8], prefix: &[u8]) -> bool {
    key.len() >= prefix.len() && key[..prefix.len()] == *prefix
}

/// True iff `key` sorts strictly before every key under `prefix`.
fn nibbles_earlier_than(key: &[u8], prefix: &[u8]) -> bool {
    let mut i = 0;
    while i < prefix.len() && i < key.len() {
        if key[i] < prefix[i] {
            return true;
        } else if key[i] > prefix[i] {
            return false;
        }
        i += 1;
    }
    i < prefix.len()
}

#[cfg(test)]
mod tests {
    use crate::trie::TrieDb;
    use ledger_db::MemoryDb;

    fn sample_pairs() -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b"do".to_vec(), b"verb".to_vec()),
            (b"dog".to_vec(), b"puppy".to_vec()),
            (b"doge".to_vec(), b"coin".to_vec()),
            (b"horse".to_vec(), b"stallion".to_vec()),
            (b"house".to_vec(), b"building".to_vec()),
            (b"ho".to_vec(), b"greeting".to_vec()),
        ];
        pairs.sort();
        pairs
    }

    #[test]
    fn iterates_in_key_order() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        // Insert out of order; iteration must come back sorted.
        for (key, value) in sample_pairs().iter().rev() {
            trie.insert(key, value).unwrap();
        }
        let collected: Vec<(Vec<u8>, Vec<u8>)> =
            trie.iter().unwrap().map(|item| item.unwrap()).collect();
        assert_eq!(collected, sample_pairs());
    }

    #[test]
    fn empty_trie_yields_nothing() {
        let mut db = MemoryDb::new();
        let trie = TrieDb::new(&mut db);
        assert_eq!(trie.iter().unwrap().count(), 0);
    }

    #[test]
    fn single_pair_iteration() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        trie.insert(b"only", b"one").unwrap();
        let collected: Vec<_> = trie.iter().unwrap().map(|item| item.unwrap()).collect();
        assert_eq!(collected, vec![(b"only".to_vec(), b"one".to_vec())]);
    }

    #[test]
    fn lower_bound_seeks_to_first_not_less() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        for (key, value) in sample_pairs() {
            trie.insert(&key, &value).unwrap();
        }

        // Exact hit.
        let from_dog: Vec<_> = trie
            .lower_bound(b"dog")
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        let expected: Vec<_> = sample_pairs()
            .into_iter()
            .filter(|(key, _)| key.as_slice() >= b"dog".as_ref())
            .collect();
        assert_eq!(from_dog, expected);

        // Between keys: lands on the next one.
        let from_gap: Vec<_> = trie
            .lower_bound(b"e")
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        let expected_gap: Vec<_> = sample_pairs()
            .into_iter()
            .filter(|(key, _)| key.as_slice() >= b"e".as_ref())
            .collect();
        assert_eq!(from_gap, expected_gap);

        // Past the end: exhausted immediately.
        assert_eq!(trie.lower_bound(b"zzzz").unwrap().count(), 0);
    }

    #[test]
    fn lower_bound_from_start_matches_full_iteration() {
        let mut db = MemoryDb::new();
        let mut trie = TrieDb::new(&mut db);
        for (key, value) in sample_pairs() {
            trie.insert(&key, &value).unwrap();
        }
        let seeked: Vec<_> = trie
            .lower_bound(b"")
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(seeked, sample_pairs());
    }
}
