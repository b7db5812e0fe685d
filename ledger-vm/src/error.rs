//! VM and executive error types

use ethereum_types::U256;
use thiserror::Error;

/// Fault raised by the interpreter while executing bytecode.
///
/// Every variant except `Internal` aborts only the current call frame: the
/// executive catches it, classifies it and rolls the frame's state back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,

    #[error("bad instruction: {instruction:#04x}")]
    BadInstruction { instruction: u8 },

    #[error("bad jump destination: {destination}")]
    BadJumpDestination { destination: u64 },

    #[error("stack underflow: wanted {wanted}, have {on_stack}")]
    StackUnderflow { wanted: u32, on_stack: u32 },

    #[error("stack overflow: pushing {wanted} over limit {limit}")]
    OutOfStack { wanted: u32, limit: u32 },

    #[error("create with non-zero value")]
    CreateWithValue,

    /// Store or state failure surfaced through the externalities boundary.
    /// Not a user-triggerable fault; propagates out of the executive as a
    /// recoverable error instead of a transaction exception.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for interpreter operations.
pub type VmResult<T> = Result<T, VmError>;

/// Executive and state-layer error type.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("trie error: {0}")]
    Trie(#[from] ledger_trie::TrieError),

    #[error("database error: {0}")]
    Db(#[from] ledger_db::DbError),

    #[error("decode error: {0}")]
    Decode(#[from] rlp::DecoderError),

    #[error("not enough base gas: required {required}, got {got}")]
    OutOfGasBase { required: U256, got: U256 },

    #[error("invalid signature: sender unresolved")]
    InvalidSignature,

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: U256, got: U256 },

    #[error("not enough cash: required {required}, got {got}")]
    NotEnoughCash { required: U256, got: U256 },

    #[error("missing code for hash {0}")]
    MissingCode(ethereum_types::H256),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for state and executive operations.
pub type ExecResult<T> = Result<T, ExecError>;
