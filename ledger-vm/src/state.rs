//! Account store over the state trie
//!
//! Holds the overlay database, the current state root, and an in-memory
//! address -> account cache for the duration of a trie session. Mutations
//! accumulate in the cache; `commit_cache` folds storage overlays into each
//! account's storage trie and the accounts themselves into the fat state
//! trie, and `commit` additionally flushes the overlay database to its
//! backend. Savepoints snapshot the cache so a failed call can be rolled
//! back without touching the tries.

use std::collections::HashMap;

use ethereum_types::{H256, U256};
use ledger_core::transaction::{ExecutionResult, Transaction};
use ledger_core::types::{h256_from_u256, Address, EMPTY_CODE_HASH, EMPTY_TRIE_ROOT};
use ledger_db::OverlayDb;
use ledger_trie::{FatTrieDb, SecTrieDb, TrieDb, Verification};
use rlp::Rlp;
use tracing::debug;

use crate::account::Account;
use crate::error::{ExecError, ExecResult};
use crate::executive::{Executive, ExecutionOptions};
use crate::ext::EnvInfo;
use crate::schedule::Schedule;

/// Whether `commit` drops accounts that are empty (zero nonce, zero balance,
/// no code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitBehaviour {
    KeepEmptyAccounts,
    RemoveEmptyAccounts,
}

/// The account-based state bound to one overlay database.
pub struct State {
    db: OverlayDb,
    root: H256,
    cache: HashMap<Address, Account>,
    snapshots: Vec<HashMap<Address, Account>>,
}

impl State {
    /// Fresh state over an empty trie.
    pub fn new(mut db: OverlayDb) -> ExecResult<Self> {
        let root = TrieDb::new(&mut db).root()?;
        Ok(Self {
            db,
            root,
            cache: HashMap::new(),
            snapshots: Vec::new(),
        })
    }

    /// Open the state at a known root.
    pub fn from_existing(mut db: OverlayDb, root: H256) -> ExecResult<Self> {
        TrieDb::open(&mut db, root, Verification::Normal)?;
        Ok(Self {
            db,
            root,
            cache: HashMap::new(),
            snapshots: Vec::new(),
        })
    }

    pub fn db(&self) -> &OverlayDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut OverlayDb {
        &mut self.db
    }

    /// Root reflecting everything committed to the trie so far.
    pub fn root_hash(&self) -> H256 {
        self.root
    }

    /// Repoint the view, discarding speculative execution state.
    pub fn set_root(&mut self, root: H256) {
        self.cache.clear();
        self.snapshots.clear();
        self.root = root;
    }

    /// Checkpoint token for a later [`State::rollback`].
    pub fn savepoint(&mut self) -> usize {
        self.snapshots.push(self.cache.clone());
        self.snapshots.len() - 1
    }

    /// Discard every account mutation made after `savepoint`.
    pub fn rollback(&mut self, savepoint: usize) {
        if savepoint < self.snapshots.len() {
            self.cache = self.snapshots[savepoint].clone();
            self.snapshots.truncate(savepoint);
        }
    }

    fn ensure_cached(&mut self, address: &Address) -> ExecResult<()> {
        if self.cache.contains_key(address) {
            return Ok(());
        }
        let trie = FatTrieDb::open(&mut self.db, self.root, Verification::Normal)?;
        let account = match trie.at(address.as_bytes())? {
            Some(bytes) => Account::from_rlp(&bytes)?,
            None => Account::dead(),
        };
        self.cache.insert(*address, account);
        Ok(())
    }

    /// Account for mutation; a dead record comes alive on first touch.
    fn require(&mut self, address: &Address) -> ExecResult<&mut Account> {
        self.ensure_cached(address)?;
        let account = self
            .cache
            .get_mut(address)
            .ok_or_else(|| ExecError::Internal("account evicted mid-operation".into()))?;
        if !account.is_alive() {
            *account = Account::new_touched();
        }
        Ok(account)
    }

    pub fn address_in_use(&mut self, address: &Address) -> ExecResult<bool> {
        self.ensure_cached(address)?;
        Ok(self.cache[address].is_alive())
    }

    pub fn address_has_code(&mut self, address: &Address) -> ExecResult<bool> {
        self.ensure_cached(address)?;
        let account = &self.cache[address];
        Ok(account.is_alive() && account.code_hash() != EMPTY_CODE_HASH)
    }

    pub fn nonce(&mut self, address: &Address) -> ExecResult<U256> {
        self.ensure_cached(address)?;
        let account = &self.cache[address];
        Ok(if account.is_alive() {
            account.nonce()
        } else {
            U256::zero()
        })
    }

    pub fn inc_nonce(&mut self, address: &Address) -> ExecResult<()> {
        self.require(address)?.inc_nonce();
        Ok(())
    }

    pub fn set_nonce(&mut self, address: &Address, nonce: U256) -> ExecResult<()> {
        self.require(address)?.set_nonce(nonce);
        Ok(())
    }

    pub fn balance(&mut self, address: &Address) -> ExecResult<U256> {
        self.ensure_cached(address)?;
        let account = &self.cache[address];
        Ok(if account.is_alive() {
            account.balance()
        } else {
            U256::zero()
        })
    }

    pub fn add_balance(&mut self, address: &Address, amount: U256) -> ExecResult<()> {
        self.require(address)?.add_balance(amount);
        Ok(())
    }

    /// Subtract from a balance. With `enforce` the subtraction fails rather
    /// than go negative; without it the word wraps, matching the relaxed
    /// ledger this implementation descends from.
    pub fn sub_balance(&mut self, address: &Address, amount: U256, enforce: bool) -> ExecResult<()> {
        if enforce {
            let balance = self.balance(address)?;
            if balance < amount {
                return Err(ExecError::NotEnoughCash {
                    required: amount,
                    got: balance,
                });
            }
        }
        self.require(address)?.sub_balance_unchecked(amount);
        Ok(())
    }

    pub fn transfer_balance(
        &mut self,
        from: &Address,
        to: &Address,
        amount: U256,
        enforce: bool,
    ) -> ExecResult<()> {
        self.sub_balance(from, amount, enforce)?;
        self.add_balance(to, amount)
    }

    pub fn code_hash(&mut self, address: &Address) -> ExecResult<H256> {
        self.ensure_cached(address)?;
        let account = &self.cache[address];
        Ok(if account.is_alive() {
            account.code_hash()
        } else {
            EMPTY_CODE_HASH
        })
    }

    pub fn code(&mut self, address: &Address) -> ExecResult<Vec<u8>> {
        self.ensure_cached(address)?;
        let (alive, cached, code_hash) = {
            let account = &self.cache[address];
            (
                account.is_alive(),
                if account.code().is_empty() {
                    None
                } else {
                    Some(account.code().to_vec())
                },
                account.code_hash(),
            )
        };
        if !alive || code_hash == EMPTY_CODE_HASH {
            return Ok(Vec::new());
        }
        if let Some(code) = cached {
            return Ok(code);
        }
        let code = self
            .db
            .lookup(&code_hash)
            .ok_or(ExecError::MissingCode(code_hash))?;
        if let Some(account) = self.cache.get_mut(address) {
            account.note_code(code.clone());
        }
        Ok(code)
    }

    pub fn code_size(&mut self, address: &Address) -> ExecResult<usize> {
        Ok(self.code(address)?.len())
    }

    /// Stage freshly deployed code on the account.
    pub fn set_new_code(&mut self, address: &Address, code: Vec<u8>) -> ExecResult<()> {
        self.require(address)?.set_new_code(code);
        Ok(())
    }

    pub fn storage(&mut self, address: &Address, key: &U256) -> ExecResult<U256> {
        self.ensure_cached(address)?;
        let (alive, overlay, root) = {
            let account = &self.cache[address];
            (
                account.is_alive(),
                account.overlay_value(key),
                account.storage_root(),
            )
        };
        if !alive {
            return Ok(U256::zero());
        }
        if let Some(value) = overlay {
            return Ok(value);
        }
        if root == EMPTY_TRIE_ROOT {
            return Ok(U256::zero());
        }
        let trie = SecTrieDb::open(&mut self.db, root, Verification::Normal)?;
        match trie.at(h256_from_u256(key).as_bytes())? {
            Some(bytes) => Ok(Rlp::new(&bytes).as_val()?),
            None => Ok(U256::zero()),
        }
    }

    pub fn set_storage(&mut self, address: &Address, key: U256, value: U256) -> ExecResult<()> {
        self.require(address)?.set_storage(key, value);
        Ok(())
    }

    /// Suicide: mark the account dead and wipe its transient state.
    pub fn kill(&mut self, address: &Address) -> ExecResult<()> {
        self.ensure_cached(address)?;
        if let Some(account) = self.cache.get_mut(address) {
            account.kill();
        }
        Ok(())
    }

    /// Fold dirty accounts into the tries and refresh the root.
    pub fn commit_cache(&mut self, behaviour: CommitBehaviour) -> ExecResult<H256> {
        let mut cache = std::mem::take(&mut self.cache);
        self.snapshots.clear();

        for account in cache.values_mut() {
            if !account.is_dirty() || !account.is_alive() {
                continue;
            }
            if account.has_new_code() {
                self.db.insert(account.code_hash(), account.code());
            }
            let overlay = account.take_storage_overlay();
            if !overlay.is_empty() {
                let mut storage =
                    SecTrieDb::open(&mut self.db, account.storage_root(), Verification::Normal)?;
                for (key, value) in overlay {
                    let key_image = h256_from_u256(&key);
                    if value.is_zero() {
                        storage.remove(key_image.as_bytes())?;
                    } else {
                        storage.insert(key_image.as_bytes(), &rlp::encode(&value))?;
                    }
                }
                account.set_storage_root(storage.root()?);
            }
        }

        let mut trie = FatTrieDb::open(&mut self.db, self.root, Verification::Normal)?;
        for (address, account) in cache.iter() {
            if !account.is_dirty() {
                continue;
            }
            if !account.is_alive()
                || (behaviour == CommitBehaviour::RemoveEmptyAccounts && account.is_empty())
            {
                trie.remove(address.as_bytes())?;
            } else {
                trie.insert(address.as_bytes(), &account.rlp())?;
            }
        }
        self.root = trie.root()?;
        debug!(root = %self.root, "committed account cache");
        Ok(self.root)
    }

    /// Commit the cache and flush the overlay database to its backend.
    pub fn commit(&mut self, behaviour: CommitBehaviour) -> ExecResult<H256> {
        let root = self.commit_cache(behaviour)?;
        self.db.commit()?;
        Ok(root)
    }

    /// Execute one transaction against this state: validate, run, finalize,
    /// and fold the outcome into the state trie. On error the caller should
    /// restore the previous root with [`State::set_root`].
    pub fn execute(
        &mut self,
        env: &EnvInfo,
        schedule: &Schedule,
        options: &ExecutionOptions,
        tx: &Transaction,
    ) -> ExecResult<ExecutionResult> {
        let result = {
            let mut executive = Executive::new(self, env, schedule, options, 0);
            executive.transact(tx)?
        };
        self.commit_cache(CommitBehaviour::RemoveEmptyAccounts)?;
        Ok(result)
    }
}
