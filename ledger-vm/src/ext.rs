//! Interpreter externalities
//!
//! The interpreter sees the outside world through the [`Ext`] trait: storage,
//! balances, code, logs, and the recursive CALL/CREATE entry points.
//! [`Externalities`] is the live implementation bound to a [`State`] and the
//! executing frame; nested calls spin up a fresh [`Executive`] one level
//! deeper on the same thread.

use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use ledger_core::transaction::LogEntry;
use ledger_core::types::{u256_to_address, Address};
use rlp::RlpStream;

use crate::error::{VmError, VmResult};
use crate::executive::{Executive, ExecutionOptions};
use crate::schedule::Schedule;
use crate::state::State;
use crate::substate::SubState;

/// Block-level context for one execution.
///
/// Supplied by the block-producing collaborator; defaults mirror the fixed
/// values the chain exposes when no block context is wired in.
#[derive(Debug, Clone)]
pub struct EnvInfo {
    pub number: u64,
    pub author: Address,
    pub timestamp: u64,
    pub difficulty: U256,
    pub gas_limit: u64,
}

impl Default for EnvInfo {
    fn default() -> Self {
        Self {
            number: 0,
            author: Address::zero(),
            timestamp: 123_456_789,
            difficulty: U256::zero(),
            gas_limit: 400_000,
        }
    }
}

/// Parameters of a message call as assembled by the interpreter.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub sender: Address,
    pub code_address: Address,
    pub receive_address: Address,
    pub value_transfer: U256,
    pub apparent_value: U256,
    /// In: gas forwarded to the callee (stipend included). Out: gas the
    /// callee left unspent.
    pub gas: U256,
    pub data: Vec<u8>,
}

/// The interpreter's window onto state and the wider chain.
pub trait Ext {
    fn schedule(&self) -> &Schedule;
    fn env(&self) -> &EnvInfo;
    fn depth(&self) -> usize;

    fn storage_at(&mut self, key: &U256) -> VmResult<U256>;
    fn set_storage(&mut self, key: U256, value: U256) -> VmResult<()>;

    fn exists(&mut self, address: &Address) -> VmResult<bool>;
    fn balance(&mut self, address: &Address) -> VmResult<U256>;
    fn code_at(&mut self, address: &Address) -> VmResult<Vec<u8>>;
    fn code_size_at(&mut self, address: &Address) -> VmResult<usize>;

    fn block_hash(&self, number: &U256) -> H256;

    /// Run init code in a fresh frame. Returns the deployed address, or
    /// `None` when the creation failed; `gas` is updated to what remains.
    fn create(&mut self, endowment: U256, gas: &mut U256, init: &[u8]) -> VmResult<Option<Address>>;

    /// Make a nested message call. Returns the callee's output on success,
    /// `None` on failure; `params.gas` is updated to what remains.
    fn call(&mut self, params: &mut CallParams) -> VmResult<Option<Vec<u8>>>;

    fn log(&mut self, topics: Vec<H256>, data: &[u8]) -> VmResult<()>;

    /// Queue the executing account for deletion, paying its balance out to
    /// the beneficiary.
    fn suicide(&mut self, beneficiary: &Address) -> VmResult<()>;

    /// Accrue a gas refund credit (storage clears).
    fn add_refund(&mut self, amount: u64);
}

fn internal(err: impl std::fmt::Display) -> VmError {
    VmError::Internal(err.to_string())
}

/// Live externalities bound to the executing frame.
pub struct Externalities<'a> {
    state: &'a mut State,
    env: &'a EnvInfo,
    schedule: &'a Schedule,
    options: &'a ExecutionOptions,
    sub: &'a mut SubState,
    depth: usize,
    origin: Address,
    address: Address,
    gas_price: U256,
}

impl<'a> Externalities<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a mut State,
        env: &'a EnvInfo,
        schedule: &'a Schedule,
        options: &'a ExecutionOptions,
        sub: &'a mut SubState,
        depth: usize,
        origin: Address,
        address: Address,
        gas_price: U256,
    ) -> Self {
        Self {
            state,
            env,
            schedule,
            options,
            sub,
            depth,
            origin,
            address,
            gas_price,
        }
    }
}

impl Ext for Externalities<'_> {
    fn schedule(&self) -> &Schedule {
        self.schedule
    }

    fn env(&self) -> &EnvInfo {
        self.env
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn storage_at(&mut self, key: &U256) -> VmResult<U256> {
        self.state.storage(&self.address, key).map_err(internal)
    }

    fn set_storage(&mut self, key: U256, value: U256) -> VmResult<()> {
        self.state
            .set_storage(&self.address, key, value)
            .map_err(internal)
    }

    fn exists(&mut self, address: &Address) -> VmResult<bool> {
        self.state.address_in_use(address).map_err(internal)
    }

    fn balance(&mut self, address: &Address) -> VmResult<U256> {
        self.state.balance(address).map_err(internal)
    }

    fn code_at(&mut self, address: &Address) -> VmResult<Vec<u8>> {
        self.state.code(address).map_err(internal)
    }

    fn code_size_at(&mut self, address: &Address) -> VmResult<usize> {
        self.state.code_size(address).map_err(internal)
    }

    fn block_hash(&self, _number: &U256) -> H256 {
        // Chain indexing lives outside this core.
        H256::zero()
    }

    fn create(&mut self, endowment: U256, gas: &mut U256, init: &[u8]) -> VmResult<Option<Address>> {
        // Below the transaction level no collaborator assigns the address,
        // so derive it from the creator and its pre-bump nonce.
        let nonce = self.state.nonce(&self.address).map_err(internal)?;
        let mut stream = RlpStream::new_list(2);
        stream.append(&self.address);
        stream.append(&nonce);
        let new_address = u256_to_address(&U256::from_big_endian(
            keccak(stream.out()).as_bytes(),
        ));

        let mut executive = Executive::new(
            self.state,
            self.env,
            self.schedule,
            self.options,
            self.depth + 1,
        );
        let done = executive
            .create_contract(
                self.address,
                endowment,
                self.gas_price,
                *gas,
                init,
                self.origin,
                new_address,
            )
            .map_err(internal)?;
        if !done {
            executive.go().map_err(internal)?;
        }
        executive.accrue_substate(self.sub);
        *gas = executive.gas_remaining();
        Ok(executive.new_address())
    }

    fn call(&mut self, params: &mut CallParams) -> VmResult<Option<Vec<u8>>> {
        let mut executive = Executive::new(
            self.state,
            self.env,
            self.schedule,
            self.options,
            self.depth + 1,
        );
        let done = executive
            .call_message(params.clone(), self.gas_price, self.origin)
            .map_err(internal)?;
        if !done {
            executive.go().map_err(internal)?;
        }
        executive.accrue_substate(self.sub);
        params.gas = executive.gas_remaining();
        if executive.succeeded() {
            Ok(Some(executive.take_output()))
        } else {
            Ok(None)
        }
    }

    fn log(&mut self, topics: Vec<H256>, data: &[u8]) -> VmResult<()> {
        self.sub.logs.push(LogEntry {
            address: self.address,
            topics,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn suicide(&mut self, beneficiary: &Address) -> VmResult<()> {
        let balance = self.state.balance(&self.address).map_err(internal)?;
        self.state
            .add_balance(beneficiary, balance)
            .map_err(internal)?;
        self.state
            .sub_balance(&self.address, balance, false)
            .map_err(internal)?;
        self.sub.suicides.insert(self.address);
        Ok(())
    }

    fn add_refund(&mut self, amount: u64) {
        self.sub.refunds += U256::from(amount);
    }
}
