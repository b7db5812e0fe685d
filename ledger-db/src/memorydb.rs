//! Refcounted in-memory node store

use std::collections::{HashMap, HashSet};

use ethereum_types::H256;
use tracing::warn;

/// In-memory hash-keyed store with per-entry reference counts.
///
/// The trie inserts a node once per live reference and kills once per dropped
/// reference; an entry whose refcount has hit zero is garbage awaiting
/// [`MemoryDb::purge`]. A parallel auxiliary map carries non-refcounted
/// sidecar data (original keys for hashed-key tries).
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    main: HashMap<H256, (Vec<u8>, u32)>,
    aux: HashMap<H256, (Vec<u8>, bool)>,
    enforce_refs: bool,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, lookups treat refcount-zero entries as absent.
    pub fn set_enforce_refs(&mut self, enforce: bool) {
        self.enforce_refs = enforce;
    }

    /// Value stored under `hash`, if live.
    pub fn lookup(&self, hash: &H256) -> Option<Vec<u8>> {
        match self.main.get(hash) {
            Some((value, refs)) => {
                if !self.enforce_refs || *refs > 0 {
                    Some(value.clone())
                } else {
                    warn!(%hash, "lookup of value with refcount 0, probable trie issue");
                    None
                }
            }
            None => None,
        }
    }

    pub fn exists(&self, hash: &H256) -> bool {
        match self.main.get(hash) {
            Some((_, refs)) => !self.enforce_refs || *refs > 0,
            None => false,
        }
    }

    /// Store `value` under `hash`, bumping the reference count.
    pub fn insert(&mut self, hash: H256, value: &[u8]) {
        match self.main.get_mut(&hash) {
            Some(entry) => {
                entry.0 = value.to_vec();
                entry.1 += 1;
            }
            None => {
                self.main.insert(hash, (value.to_vec(), 1));
            }
        }
    }

    /// Drop one reference; refcounts floor at zero.
    ///
    /// Returns true iff a live reference was present.
    pub fn kill(&mut self, hash: &H256) -> bool {
        if let Some(entry) = self.main.get_mut(hash) {
            if entry.1 > 0 {
                entry.1 -= 1;
                return true;
            }
        }
        false
    }

    /// Permanently drop zero-refcount and dead-aux entries.
    pub fn purge(&mut self) {
        self.main.retain(|_, (_, refs)| *refs > 0);
        self.aux.retain(|_, (_, live)| *live);
    }

    /// Hashes of all live entries.
    pub fn keys(&self) -> HashSet<H256> {
        self.main
            .iter()
            .filter(|(_, (_, refs))| *refs > 0)
            .map(|(hash, _)| *hash)
            .collect()
    }

    pub fn lookup_aux(&self, hash: &H256) -> Option<Vec<u8>> {
        match self.aux.get(hash) {
            Some((value, live)) if !self.enforce_refs || *live => Some(value.clone()),
            _ => None,
        }
    }

    pub fn insert_aux(&mut self, hash: H256, value: &[u8]) {
        self.aux.insert(hash, (value.to_vec(), true));
    }

    /// Mark an auxiliary entry dead; it survives until the next purge.
    pub fn remove_aux(&mut self, hash: &H256) {
        if let Some(entry) = self.aux.get_mut(hash) {
            entry.1 = false;
        }
    }

    pub(crate) fn main_entries(&self) -> impl Iterator<Item = (&H256, &(Vec<u8>, u32))> {
        self.main.iter()
    }

    pub(crate) fn aux_entries(&self) -> impl Iterator<Item = (&H256, &(Vec<u8>, bool))> {
        self.aux.iter()
    }

    pub(crate) fn clear_overlay(&mut self) {
        self.main.clear();
        self.aux.clear();
    }

    pub(crate) fn clear_main(&mut self) {
        self.main.clear();
    }
}
