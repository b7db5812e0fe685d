//! Transaction executive
//!
//! Drives one transaction (or one nested call/create frame) through
//! initialize -> execute -> go -> finalize, with an abort path to revert at
//! any point before finalize. VM faults are caught here, classified into a
//! `TransactionException`, and undo exactly this frame's state effects;
//! internal store failures propagate out as recoverable errors instead.

use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use ledger_core::transaction::{
    Action, CodeDeposit, ExecutionResult, LogEntry, Transaction, TransactionException,
};
use ledger_core::types::Address;
use tracing::{debug, warn};

use crate::error::{ExecError, ExecResult, VmError};
use crate::ext::{CallParams, EnvInfo, Externalities};
use crate::interpreter::{Interpreter, InterpreterParams, VmOutput};
use crate::schedule::Schedule;
use crate::state::State;
use crate::substate::SubState;

/// Sender-side validation switches.
///
/// The chain this implementation descends from ran with both checks off,
/// settling balances and nonces outside the account layer; flipping them on
/// gives standard ledger semantics. Both modes are covered by tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOptions {
    /// Reject transactions whose nonce differs from the sender's.
    pub enforce_nonce: bool,
    /// Reject value transfers that would overdraw the sender, and charge
    /// the gas cost up front.
    pub enforce_balance: bool,
}

impl ExecutionOptions {
    /// Standard account-ledger semantics.
    pub fn enforced() -> Self {
        Self {
            enforce_nonce: true,
            enforce_balance: true,
        }
    }
}

/// Interpreter frame waiting to run.
struct Frame {
    address: Address,
    caller: Address,
    origin: Address,
    value: U256,
    code: Vec<u8>,
    code_hash: H256,
    data: Vec<u8>,
    is_create: bool,
}

/// Orchestrates a single call or creation at one depth level.
pub struct Executive<'a> {
    state: &'a mut State,
    env: &'a EnvInfo,
    schedule: &'a Schedule,
    options: &'a ExecutionOptions,
    depth: usize,

    tx: Option<Transaction>,
    gas_price: U256,
    base_gas: U256,
    gas: U256,

    frame: Option<Frame>,
    ran_frame: bool,
    sub: SubState,
    savepoint: Option<usize>,

    is_creation: bool,
    new_address: Option<Address>,
    excepted: TransactionException,
    output: Vec<u8>,
    refunded: U256,

    code_deposit: CodeDeposit,
    deposit_size: usize,
    gas_for_deposit: U256,
}

impl<'a> Executive<'a> {
    pub fn new(
        state: &'a mut State,
        env: &'a EnvInfo,
        schedule: &'a Schedule,
        options: &'a ExecutionOptions,
        depth: usize,
    ) -> Self {
        Self {
            state,
            env,
            schedule,
            options,
            depth,
            tx: None,
            gas_price: U256::zero(),
            base_gas: U256::zero(),
            gas: U256::zero(),
            frame: None,
            ran_frame: false,
            sub: SubState::new(),
            savepoint: None,
            is_creation: false,
            new_address: None,
            excepted: TransactionException::None,
            output: Vec::new(),
            refunded: U256::zero(),
            code_deposit: CodeDeposit::None,
            deposit_size: 0,
            gas_for_deposit: U256::zero(),
        }
    }

    /// Gas left in this frame.
    pub fn gas_remaining(&self) -> U256 {
        self.gas
    }

    /// Gas consumed so far, intrinsic cost included.
    pub fn gas_used(&self) -> U256 {
        match &self.tx {
            Some(tx) => tx.gas - self.gas,
            None => U256::zero(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.excepted == TransactionException::None
    }

    pub fn new_address(&self) -> Option<Address> {
        self.new_address
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Merge this frame's side effects into the caller's sub-state.
    pub fn accrue_substate(&mut self, parent: &mut SubState) {
        parent.accrue(std::mem::take(&mut self.sub));
    }

    /// Full top-level transaction flow.
    pub fn transact(&mut self, tx: &Transaction) -> ExecResult<ExecutionResult> {
        self.initialize(tx)?;
        self.execute()?;
        self.go()?;
        self.finalize()
    }

    /// Validate the transaction and bind it to this executive.
    pub fn initialize(&mut self, tx: &Transaction) -> ExecResult<()> {
        self.base_gas = self
            .schedule
            .base_gas_required(tx.is_creation(), &tx.data);
        if self.base_gas > tx.gas {
            warn!(required = %self.base_gas, got = %tx.gas, "not enough gas for base transaction cost");
            self.excepted = TransactionException::OutOfGasBase;
            return Err(ExecError::OutOfGasBase {
                required: self.base_gas,
                got: tx.gas,
            });
        }

        let sender = match tx.sender() {
            Some(sender) => sender,
            None => {
                self.excepted = TransactionException::InvalidSignature;
                return Err(ExecError::InvalidSignature);
            }
        };

        if self.options.enforce_nonce {
            let expected = self.state.nonce(&sender)?;
            if expected != tx.nonce {
                self.excepted = TransactionException::InvalidNonce;
                return Err(ExecError::InvalidNonce {
                    expected,
                    got: tx.nonce,
                });
            }
        }

        if self.options.enforce_balance {
            let gas_cost = tx.gas.full_mul(tx.gas_price);
            let total_cost = ethereum_types::U512::from(tx.value) + gas_cost;
            let balance = ethereum_types::U512::from(self.state.balance(&sender)?);
            if balance < total_cost {
                self.excepted = TransactionException::NotEnoughCash;
                let required = tx
                    .value
                    .saturating_add(tx.gas.overflowing_mul(tx.gas_price).0);
                return Err(ExecError::NotEnoughCash {
                    required,
                    got: self.state.balance(&sender)?,
                });
            }
        }

        self.gas_price = tx.gas_price;
        self.tx = Some(tx.clone());
        Ok(())
    }

    /// Entry point for a user-executed transaction: dispatch to the call or
    /// creation path. Returns true when there is no code to run.
    pub fn execute(&mut self) -> ExecResult<bool> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| ExecError::Internal("execute before initialize".into()))?;
        let sender = tx.sender().ok_or(ExecError::InvalidSignature)?;
        debug!(creation = tx.is_creation(), gas = %tx.gas, "executing transaction");

        if self.options.enforce_balance {
            // Gas is paid up front and the unspent part refunded at finalize.
            self.state
                .sub_balance(&sender, tx.gas * tx.gas_price, true)?;
        }

        match tx.action {
            Action::Create { assigned } => self.create_contract(
                sender,
                tx.value,
                tx.gas_price,
                tx.gas - self.base_gas,
                &tx.data,
                sender,
                assigned,
            ),
            Action::Call { to } => self.call_message(
                CallParams {
                    sender,
                    code_address: to,
                    receive_address: to,
                    value_transfer: tx.value,
                    apparent_value: tx.value,
                    gas: tx.gas - self.base_gas,
                    data: tx.data.clone(),
                },
                tx.gas_price,
                sender,
            ),
        }
    }

    /// Set up a message call: savepoint, nonce bump for external
    /// transactions, an interpreter frame when the target has code, and the
    /// unconditional value transfer. Returns true when no code will run.
    pub fn call_message(
        &mut self,
        params: CallParams,
        gas_price: U256,
        origin: Address,
    ) -> ExecResult<bool> {
        if self.tx.is_some() {
            self.state.inc_nonce(&params.sender)?;
        }
        self.savepoint = Some(self.state.savepoint());
        self.gas = params.gas;
        self.gas_price = gas_price;

        if self.state.address_has_code(&params.code_address)? {
            let code = self.state.code(&params.code_address)?;
            let code_hash = self.state.code_hash(&params.code_address)?;
            self.frame = Some(Frame {
                address: params.receive_address,
                caller: params.sender,
                origin,
                value: params.apparent_value,
                code,
                code_hash,
                data: params.data.clone(),
                is_create: false,
            });
        }

        self.state.transfer_balance(
            &params.sender,
            &params.receive_address,
            params.value_transfer,
            self.options.enforce_balance,
        )?;
        Ok(self.frame.is_none())
    }

    /// Set up a creation at an address assigned by the caller: savepoint,
    /// nonce bump, endowment transfer, and an init-code frame when there is
    /// init code to run. Returns true when no code will run.
    #[allow(clippy::too_many_arguments)]
    pub fn create_contract(
        &mut self,
        sender: Address,
        endowment: U256,
        gas_price: U256,
        gas: U256,
        init: &[u8],
        origin: Address,
        new_address: Address,
    ) -> ExecResult<bool> {
        self.state.inc_nonce(&sender)?;
        self.savepoint = Some(self.state.savepoint());
        self.is_creation = true;
        self.new_address = Some(new_address);
        self.gas = gas;
        self.gas_price = gas_price;

        // Transfer the endowment before running init code; this also brings
        // the account into existence.
        self.state.transfer_balance(
            &sender,
            &new_address,
            endowment,
            self.options.enforce_balance,
        )?;

        if !init.is_empty() {
            self.frame = Some(Frame {
                address: new_address,
                caller: sender,
                origin,
                value: endowment,
                code: init.to_vec(),
                code_hash: keccak(init),
                data: Vec::new(),
                is_create: true,
            });
        } else if self.state.address_has_code(&new_address)? {
            // Address collision: overwrite the stale code with nothing.
            self.state.set_new_code(&new_address, Vec::new())?;
        }
        Ok(self.frame.is_none())
    }

    /// Run the interpreter to completion. VM faults are classified and this
    /// frame's effects rolled back; true means the frame (if any) completed
    /// without an exception.
    pub fn go(&mut self) -> ExecResult<bool> {
        let Some(frame) = self.frame.take() else {
            return Ok(true);
        };
        self.ran_frame = true;

        let params = InterpreterParams {
            address: frame.address,
            caller: frame.caller,
            origin: frame.origin,
            value: frame.value,
            gas_price: self.gas_price,
            code: frame.code,
            code_hash: frame.code_hash,
            data: frame.data,
        };
        let is_create = frame.is_create;
        let address = params.address;

        let mut gas = self.gas;
        let result = {
            let mut ext = Externalities::new(
                self.state,
                self.env,
                self.schedule,
                self.options,
                &mut self.sub,
                self.depth,
                params.origin,
                address,
                self.gas_price,
            );
            Interpreter::new(params, self.schedule.clone()).exec(&mut gas, &mut ext)
        };
        self.gas = gas;

        match result {
            Ok(VmOutput { data, reverted: false }) => {
                if is_create {
                    self.finish_creation(address, data)
                } else {
                    self.output = data;
                    Ok(true)
                }
            }
            Ok(VmOutput { data, reverted: true }) => {
                // Explicit abort: effects are undone but the output comes
                // back to the caller and unspent gas survives.
                self.excepted = TransactionException::RevertInstruction;
                self.output = data;
                self.revert();
                Ok(false)
            }
            Err(VmError::Internal(message)) => Err(ExecError::Internal(message)),
            Err(fault) => {
                debug!(%fault, "safe VM fault");
                self.gas = U256::zero();
                self.excepted = classify(&fault);
                self.revert();
                Ok(false)
            }
        }
    }

    /// Code-deposit phase of a creation.
    fn finish_creation(&mut self, address: Address, mut deposit: Vec<u8>) -> ExecResult<bool> {
        self.gas_for_deposit = self.gas;
        self.deposit_size = deposit.len();

        if deposit.len() as u64 > self.schedule.max_code_size {
            self.gas = U256::zero();
            self.excepted = TransactionException::OutOfGas;
            self.revert();
            return Ok(false);
        }
        let deposit_cost = U256::from(deposit.len() as u64) * self.schedule.create_data_gas;
        if deposit_cost <= self.gas {
            self.code_deposit = CodeDeposit::Success;
            self.gas -= deposit_cost;
        } else if self.schedule.exceptional_failed_code_deposit {
            self.gas = U256::zero();
            self.excepted = TransactionException::OutOfGas;
            self.revert();
            return Ok(false);
        } else {
            self.code_deposit = CodeDeposit::Failed;
            deposit = Vec::new();
        }
        self.output = deposit.clone();
        self.state.set_new_code(&address, deposit)?;
        Ok(true)
    }

    /// Apply refunds, suicides and logs, and assemble the result.
    pub fn finalize(&mut self) -> ExecResult<ExecutionResult> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| ExecError::Internal("finalize before initialize".into()))?;

        if self.ran_frame {
            self.sub.refunds += U256::from(self.schedule.suicide_refund_gas)
                * U256::from(self.sub.suicides.len());
        }

        // Refunds are capped at half of what the transaction consumed.
        let used = tx.gas - self.gas;
        self.refunded = (used / 2).min(self.sub.refunds);
        self.gas += self.refunded;

        if let Some(sender) = tx.sender() {
            let credit = self.gas.overflowing_mul(tx.gas_price).0;
            self.state.add_balance(&sender, credit)?;
        }

        let suicides: Vec<Address> = self.sub.suicides.iter().copied().collect();
        for address in suicides {
            self.state.kill(&address)?;
        }

        let logs: Vec<LogEntry> = self.sub.logs.clone();
        Ok(ExecutionResult {
            gas_used: self.gas_used(),
            excepted: self.excepted,
            new_address: if self.is_creation { self.new_address } else { None },
            output: std::mem::take(&mut self.output),
            code_deposit: self.code_deposit,
            gas_refunded: self.sub.refunds,
            deposit_size: self.deposit_size,
            gas_for_deposit: self.gas_for_deposit,
            logs,
        })
    }

    /// Undo this frame: drop its pending side effects, forget the would-be
    /// contract address, and roll the state back to the savepoint.
    pub fn revert(&mut self) {
        self.sub.clear();
        self.new_address = None;
        if let Some(savepoint) = self.savepoint {
            self.state.rollback(savepoint);
        }
    }
}

fn classify(fault: &VmError) -> TransactionException {
    match fault {
        VmError::OutOfGas => TransactionException::OutOfGas,
        VmError::BadInstruction { .. } => TransactionException::BadInstruction,
        VmError::BadJumpDestination { .. } => TransactionException::BadJumpDestination,
        VmError::StackUnderflow { .. } => TransactionException::StackUnderflow,
        VmError::OutOfStack { .. } => TransactionException::OutOfStack,
        VmError::CreateWithValue => TransactionException::CreateWithValue,
        VmError::Internal(_) => TransactionException::Unknown,
    }
}
