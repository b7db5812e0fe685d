//! Transaction and execution-result structures

use ethereum_types::{H256, U256};

use crate::types::Address;

/// What a transaction asks the execution layer to do.
///
/// Contract creation carries the target address assigned by the outer chain
/// layer; this core never derives top-level contract addresses itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deploy the transaction data as init code at the assigned address.
    Create { assigned: Address },
    /// Message call to an existing address.
    Call { to: Address },
}

/// A transaction as consumed by the executive.
///
/// Signature verification happens outside this core; the resolved sender is
/// injected with [`Transaction::force_sender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas: U256,
    pub action: Action,
    pub value: U256,
    pub data: Vec<u8>,
    sender: Option<Address>,
}

impl Transaction {
    /// Message-call transaction.
    pub fn call(to: Address, value: U256, gas_price: U256, gas: U256, data: Vec<u8>) -> Self {
        Self {
            nonce: U256::zero(),
            gas_price,
            gas,
            action: Action::Call { to },
            value,
            data,
            sender: None,
        }
    }

    /// Contract-creation transaction targeting an externally assigned address.
    pub fn create(assigned: Address, value: U256, gas_price: U256, gas: U256, init: Vec<u8>) -> Self {
        Self {
            nonce: U256::zero(),
            gas_price,
            gas,
            action: Action::Create { assigned },
            value,
            data: init,
            sender: None,
        }
    }

    pub fn with_nonce(mut self, nonce: U256) -> Self {
        self.nonce = nonce;
        self
    }

    /// Inject the sender recovered by the outer signature check.
    pub fn force_sender(&mut self, sender: Address) {
        self.sender = Some(sender);
    }

    /// The resolved sender, if any.
    pub fn sender(&self) -> Option<Address> {
        self.sender
    }

    pub fn is_creation(&self) -> bool {
        matches!(self.action, Action::Create { .. })
    }

    /// Call target or assigned creation address.
    pub fn receive_address(&self) -> Address {
        match self.action {
            Action::Create { assigned } => assigned,
            Action::Call { to } => to,
        }
    }
}

/// Classification of a failed (or reverted) transaction, surfaced in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionException {
    None,
    Unknown,
    BadRlp,
    InvalidFormat,
    OutOfGasBase,
    InvalidSignature,
    InvalidNonce,
    NotEnoughCash,
    BlockGasLimitReached,
    BadInstruction,
    BadJumpDestination,
    OutOfGas,
    OutOfStack,
    StackUnderflow,
    CreateWithValue,
    RevertInstruction,
    NoInformation,
}

/// Outcome of the code-deposit phase of a creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeDeposit {
    None,
    Failed,
    Success,
}

/// One log record emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// Description of the result of executing a transaction.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub gas_used: U256,
    pub excepted: TransactionException,
    pub new_address: Option<Address>,
    pub output: Vec<u8>,
    /// Failed if an attempted deposit ran out of gas in soft-failure mode.
    pub code_deposit: CodeDeposit,
    pub gas_refunded: U256,
    /// Size of the creation's attempted code deposit.
    pub deposit_size: usize,
    /// Gas remaining when the deposit phase began.
    pub gas_for_deposit: U256,
    pub logs: Vec<LogEntry>,
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            gas_used: U256::zero(),
            excepted: TransactionException::Unknown,
            new_address: None,
            output: Vec::new(),
            code_deposit: CodeDeposit::None,
            gas_refunded: U256::zero(),
            deposit_size: 0,
            gas_for_deposit: U256::zero(),
            logs: Vec::new(),
        }
    }
}

impl ExecutionResult {
    /// True when execution ran to completion without an exception.
    pub fn succeeded(&self) -> bool {
        self.excepted == TransactionException::None
    }
}
