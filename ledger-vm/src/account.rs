//! Account record and its in-memory lifecycle

use std::collections::HashMap;

use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use ledger_core::types::{EMPTY_CODE_HASH, EMPTY_TRIE_ROOT};
use rlp::{Rlp, RlpStream};

/// One account as cached between trie loads and commits.
///
/// The persisted record is the 4-tuple (nonce, balance, code hash, storage
/// root); everything else is transient session state: liveness, the dirty
/// flag, pending code, and the storage overlay layered over `storage_root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    nonce: U256,
    balance: U256,
    code_hash: H256,
    storage_root: H256,
    alive: bool,
    unchanged: bool,
    has_new_code: bool,
    storage_overlay: HashMap<U256, U256>,
    code_cache: Vec<u8>,
}

impl Account {
    /// A dead record: an account that never existed or was killed.
    pub fn dead() -> Self {
        Self {
            nonce: U256::zero(),
            balance: U256::zero(),
            code_hash: EMPTY_CODE_HASH,
            storage_root: EMPTY_TRIE_ROOT,
            alive: false,
            unchanged: false,
            has_new_code: false,
            storage_overlay: HashMap::new(),
            code_cache: Vec::new(),
        }
    }

    /// Fresh account created by a first touch this session.
    pub fn new_touched() -> Self {
        Self {
            alive: true,
            ..Self::dead()
        }
    }

    /// Account loaded from the state trie; starts unchanged.
    pub fn from_parts(nonce: U256, balance: U256, code_hash: H256, storage_root: H256) -> Self {
        Self {
            nonce,
            balance,
            code_hash,
            storage_root,
            alive: true,
            unchanged: true,
            has_new_code: false,
            storage_overlay: HashMap::new(),
            code_cache: Vec::new(),
        }
    }

    /// Decode the persisted 4-tuple.
    pub fn from_rlp(bytes: &[u8]) -> Result<Self, rlp::DecoderError> {
        let rlp = Rlp::new(bytes);
        Ok(Self::from_parts(
            rlp.val_at(0)?,
            rlp.val_at(1)?,
            rlp.val_at(2)?,
            rlp.val_at(3)?,
        ))
    }

    /// Encode the persisted 4-tuple.
    pub fn rlp(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(4);
        stream.append(&self.nonce);
        stream.append(&self.balance);
        stream.append(&self.code_hash);
        stream.append(&self.storage_root);
        stream.out().to_vec()
    }

    /// Kill this account: clears storage, resets hashes to the empty
    /// sentinels and zeroes the balances. `is_alive` is false afterwards.
    pub fn kill(&mut self) {
        self.alive = false;
        self.storage_overlay.clear();
        self.code_hash = EMPTY_CODE_HASH;
        self.storage_root = EMPTY_TRIE_ROOT;
        self.balance = U256::zero();
        self.nonce = U256::zero();
        self.changed();
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_dirty(&self) -> bool {
        !self.unchanged
    }

    /// Zero nonce, zero balance, no code.
    pub fn is_empty(&self) -> bool {
        self.nonce.is_zero() && self.balance.is_zero() && self.code_hash == EMPTY_CODE_HASH
    }

    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    pub fn inc_nonce(&mut self) {
        self.nonce += U256::one();
        self.changed();
    }

    pub fn set_nonce(&mut self, nonce: U256) {
        self.nonce = nonce;
        self.changed();
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn add_balance(&mut self, amount: U256) {
        self.balance = self.balance.overflowing_add(amount).0;
        self.changed();
    }

    /// Unchecked subtraction wraps like the 256-bit word it is; the state
    /// layer decides whether underflow is an error.
    pub fn sub_balance_unchecked(&mut self, amount: U256) {
        self.balance = self.balance.overflowing_sub(amount).0;
        self.changed();
    }

    pub fn storage_root(&self) -> H256 {
        self.storage_root
    }

    pub fn set_storage_root(&mut self, root: H256) {
        self.storage_root = root;
    }

    pub fn storage_overlay(&self) -> &HashMap<U256, U256> {
        &self.storage_overlay
    }

    pub fn overlay_value(&self, key: &U256) -> Option<U256> {
        self.storage_overlay.get(key).copied()
    }

    pub fn set_storage(&mut self, key: U256, value: U256) {
        self.storage_overlay.insert(key, value);
        self.changed();
    }

    pub fn take_storage_overlay(&mut self) -> HashMap<U256, U256> {
        std::mem::take(&mut self.storage_overlay)
    }

    pub fn code_hash(&self) -> H256 {
        self.code_hash
    }

    pub fn has_new_code(&self) -> bool {
        self.has_new_code
    }

    /// Code deployed by a create this transaction, pending commit.
    pub fn set_new_code(&mut self, code: Vec<u8>) {
        self.code_hash = keccak(&code);
        self.code_cache = code;
        self.has_new_code = true;
        self.changed();
    }

    pub fn reset_code(&mut self) {
        self.code_cache.clear();
        self.has_new_code = false;
        self.code_hash = EMPTY_CODE_HASH;
    }

    /// Attach code loaded from the store; must match `code_hash`.
    pub fn note_code(&mut self, code: Vec<u8>) {
        debug_assert_eq!(keccak(&code), self.code_hash);
        self.code_cache = code;
    }

    pub fn code(&self) -> &[u8] {
        &self.code_cache
    }

    pub fn mark_committed(&mut self) {
        self.has_new_code = false;
        self.unchanged = true;
    }

    fn changed(&mut self) {
        self.unchanged = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_account_is_empty_and_dirtyable() {
        let account = Account::dead();
        assert!(!account.is_alive());
        assert!(account.is_empty());
        assert_eq!(account.code_hash(), EMPTY_CODE_HASH);
        assert_eq!(account.storage_root(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn loaded_account_starts_unchanged() {
        let account = Account::from_parts(
            U256::from(3),
            U256::from(100),
            EMPTY_CODE_HASH,
            EMPTY_TRIE_ROOT,
        );
        assert!(account.is_alive());
        assert!(!account.is_dirty());
    }

    #[test]
    fn mutations_mark_dirty() {
        let mut account = Account::from_parts(
            U256::zero(),
            U256::zero(),
            EMPTY_CODE_HASH,
            EMPTY_TRIE_ROOT,
        );
        account.inc_nonce();
        assert!(account.is_dirty());
        assert_eq!(account.nonce(), U256::one());
    }

    #[test]
    fn rlp_round_trip_preserves_field_order() {
        let account = Account::from_parts(
            U256::from(7),
            U256::from(1_000_000),
            keccak(b"code"),
            EMPTY_TRIE_ROOT,
        );
        let encoded = account.rlp();
        let decoded = Account::from_rlp(&encoded).unwrap();
        assert_eq!(decoded, account);

        // Field order is part of the interop contract:
        // [nonce, balance, code_hash, storage_root].
        let rlp = Rlp::new(&encoded);
        assert_eq!(rlp.val_at::<U256>(0).unwrap(), U256::from(7));
        assert_eq!(rlp.val_at::<U256>(1).unwrap(), U256::from(1_000_000));
        assert_eq!(rlp.val_at::<H256>(2).unwrap(), keccak(b"code"));
        assert_eq!(rlp.val_at::<H256>(3).unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn kill_resets_everything() {
        let mut account = Account::new_touched();
        account.add_balance(U256::from(55));
        account.set_storage(U256::one(), U256::from(9));
        account.set_new_code(vec![0x60, 0x00]);

        account.kill();
        assert!(!account.is_alive());
        assert!(account.is_empty());
        assert!(account.storage_overlay().is_empty());
        assert_eq!(account.code_hash(), EMPTY_CODE_HASH);
    }

    #[test]
    fn new_code_updates_hash() {
        let mut account = Account::new_touched();
        let code = vec![0x60, 0x01, 0x60, 0x02];
        account.set_new_code(code.clone());
        assert!(account.has_new_code());
        assert_eq!(account.code_hash(), keccak(&code));
        assert_eq!(account.code(), code.as_slice());
        assert!(!account.is_empty());
    }

    #[test]
    fn balance_wraps_unchecked() {
        let mut account = Account::new_touched();
        account.sub_balance_unchecked(U256::one());
        assert_eq!(account.balance(), U256::MAX);
    }
}
