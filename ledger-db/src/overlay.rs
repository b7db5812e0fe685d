//! Write-back overlay over the durable backend

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ethereum_types::H256;
use ledger_core::types::EMPTY_TRIE_ROOT;
use tracing::{debug, warn};

use crate::backend::{aux_key, main_key, Backend, SharedBackend};
use crate::error::{DbError, DbResult};
use crate::memorydb::MemoryDb;

/// Attempts before a failing backend write becomes a hard error.
const COMMIT_ATTEMPTS: u32 = 10;

/// Base unit of the incremental retry backoff.
const COMMIT_BACKOFF: Duration = Duration::from_millis(20);

/// Refcounted memory overlay in front of an optional durable backend.
///
/// Writes accumulate in memory; `commit` flushes every live entry to the
/// backend and clears the overlay, `rollback` discards uncommitted node
/// writes. Reads fall through to the backend on overlay miss.
#[derive(Clone, Default)]
pub struct OverlayDb {
    memory: MemoryDb,
    backend: Option<SharedBackend>,
}

impl OverlayDb {
    /// Overlay with no durable backend; commits only clear the overlay.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            memory: MemoryDb::new(),
            backend: Some(backend),
        }
    }

    pub fn backend(&self) -> Option<&SharedBackend> {
        self.backend.as_ref()
    }

    /// When set, overlay lookups treat refcount-zero entries as absent.
    pub fn set_enforce_refs(&mut self, enforce: bool) {
        self.memory.set_enforce_refs(enforce);
    }

    pub fn lookup(&self, hash: &H256) -> Option<Vec<u8>> {
        if let Some(value) = self.memory.lookup(hash) {
            return Some(value);
        }
        self.backend_get(&main_key(hash))
    }

    pub fn exists(&self, hash: &H256) -> bool {
        self.memory.exists(hash) || self.backend_get(&main_key(hash)).is_some()
    }

    pub fn insert(&mut self, hash: H256, value: &[u8]) {
        self.memory.insert(hash, value);
    }

    pub fn kill(&mut self, hash: &H256) {
        if !self.memory.kill(hash) {
            // Empty storage tries never bump a ref for the null root, so a
            // miss on it is expected.
            if self.backend_get(&main_key(hash)).is_none() && *hash != EMPTY_TRIE_ROOT {
                debug!(%hash, "ref decrease with no stored node, probable corrupt trie");
            }
        }
    }

    pub fn lookup_aux(&self, hash: &H256) -> Option<Vec<u8>> {
        if let Some(value) = self.memory.lookup_aux(hash) {
            return Some(value);
        }
        let value = self.backend_get(&aux_key(hash));
        if value.is_none() {
            warn!(%hash, "aux entry not found");
        }
        value
    }

    pub fn insert_aux(&mut self, hash: H256, value: &[u8]) {
        self.memory.insert_aux(hash, value);
    }

    pub fn remove_aux(&mut self, hash: &H256) {
        self.memory.remove_aux(hash);
    }

    /// Permanently drop dead overlay entries.
    pub fn purge(&mut self) {
        self.memory.purge();
    }

    /// Hashes of all live overlay entries.
    pub fn keys(&self) -> HashSet<H256> {
        self.memory.keys()
    }

    /// Flush all live entries to the backend and clear the overlay.
    ///
    /// The whole batch is retried a bounded number of times with incremental
    /// backoff; exhausting the budget is reported as [`DbError::CommitFailed`]
    /// and the caller must treat it as fatal rather than continue on a
    /// diverged state.
    pub fn commit(&mut self) -> DbResult<()> {
        let Some(backend) = self.backend.clone() else {
            self.memory.clear_overlay();
            return Ok(());
        };

        let mut batch: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for (hash, (value, refs)) in self.memory.main_entries() {
            if *refs > 0 {
                batch.push((main_key(hash), value.clone()));
            }
        }
        for (hash, (value, live)) in self.memory.aux_entries() {
            if *live {
                batch.push((aux_key(hash), value.clone()));
            }
        }
        debug!(entries = batch.len(), "committing overlay to backend");

        let mut last_error = String::new();
        for attempt in 0..COMMIT_ATTEMPTS {
            match Self::write_batch(backend.as_ref(), &batch) {
                Ok(()) => {
                    self.memory.clear_overlay();
                    return Ok(());
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(attempt, error = %last_error, "error writing to state database, retrying");
                    thread::sleep(COMMIT_BACKOFF * (attempt + 1));
                }
            }
        }
        warn!("failed to write state database, giving up");
        Err(DbError::CommitFailed {
            attempts: COMMIT_ATTEMPTS,
            last_error,
        })
    }

    /// Discard uncommitted node writes. Auxiliary entries are kept, matching
    /// the sidecar's advisory role.
    pub fn rollback(&mut self) {
        self.memory.clear_main();
    }

    fn write_batch(backend: &dyn Backend, batch: &[(Vec<u8>, Vec<u8>)]) -> DbResult<()> {
        for (key, value) in batch {
            backend.put(key, value)?;
        }
        Ok(())
    }

    fn backend_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match &self.backend {
            Some(backend) => match backend.get(key) {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "backend read failed");
                    None
                }
            },
            None => None,
        }
    }
}
