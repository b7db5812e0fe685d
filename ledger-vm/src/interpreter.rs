//! Bytecode interpreter
//!
//! A stack machine over 256-bit words: bounded operand stack, word-granular
//! memory with quadratic growth pricing, and a gas meter that charges a
//! static tier plus instruction-specific costs before any semantics run.
//! Dispatch is a single visible loop; branching instructions set the program
//! counter themselves and everything else advances by one. Faults return
//! early through `Result` and abort only the current frame.

use ethereum_types::{H256, U256, U512};
use keccak_hash::keccak;
use ledger_core::types::{address_to_u256, u256_to_address, Address};

use crate::error::{VmError, VmResult};
use crate::ext::{CallParams, Ext};
use crate::instructions::{Instruction, Tier};
use crate::schedule::Schedule;

/// Operand-stack slot limit.
const STACK_LIMIT: u32 = 1024;

/// Call/create recursion limit.
const DEPTH_LIMIT: usize = 1024;

/// Everything the interpreter needs to know about its frame.
#[derive(Debug, Clone, Default)]
pub struct InterpreterParams {
    /// Account whose storage and identity the code runs under.
    pub address: Address,
    pub caller: Address,
    pub origin: Address,
    /// Apparent value of the call (not re-transferred here).
    pub value: U256,
    pub gas_price: U256,
    pub code: Vec<u8>,
    pub code_hash: H256,
    pub data: Vec<u8>,
}

/// Terminal result of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOutput {
    pub data: Vec<u8>,
    /// Set when the frame ended in REVERT: the caller must undo state
    /// effects but still receives the output bytes.
    pub reverted: bool,
}

enum Step {
    Advance,
    /// The instruction set the program counter itself.
    Continue,
    Done(VmOutput),
}

/// One frame's execution state.
pub struct Interpreter {
    schedule: Schedule,
    params: InterpreterParams,
    /// Code padded with 33 zero bytes so immediate reads never bound-check.
    code: Vec<u8>,
    code_len: usize,
    jump_dests: Vec<u64>,
    stack: Vec<U256>,
    mem: Vec<u8>,
    pc: u64,
    gas: u64,
    run_gas: u64,
    new_mem_size: u64,
    copy_mem_size: u64,
}

impl Interpreter {
    pub fn new(params: InterpreterParams, schedule: Schedule) -> Self {
        let code_len = params.code.len();
        let mut code = params.code.clone();
        code.resize(code_len + 33, 0);
        let jump_dests = scan_jump_dests(&code[..code_len]);
        Self {
            schedule,
            params,
            code,
            code_len,
            jump_dests,
            stack: Vec::with_capacity(64),
            mem: Vec::new(),
            pc: 0,
            gas: 0,
            run_gas: 0,
            new_mem_size: 0,
            copy_mem_size: 0,
        }
    }

    /// Run to a terminal state. `gas` carries the budget in and the
    /// remainder out, on both success and fault.
    pub fn exec(mut self, gas: &mut U256, ext: &mut dyn Ext) -> VmResult<VmOutput> {
        self.gas = if *gas > U256::from(u64::MAX) {
            u64::MAX
        } else {
            gas.as_u64()
        };
        let result = self.run(ext);
        *gas = U256::from(self.gas);
        result
    }

    fn run(&mut self, ext: &mut dyn Ext) -> VmResult<VmOutput> {
        loop {
            let opcode = self.code[self.pc as usize];
            let instruction = Instruction::from_u8(opcode)
                .ok_or(VmError::BadInstruction { instruction: opcode })?;
            let info = instruction.info();
            if info.tier == Tier::Invalid {
                return Err(VmError::BadInstruction { instruction: opcode });
            }
            self.check_stack(info.args, info.ret)?;
            self.run_gas = self.schedule.tier_step_gas[info.tier.index()];
            self.new_mem_size = self.mem.len() as u64;
            self.copy_mem_size = 0;

            match self.step(instruction, ext)? {
                Step::Advance => self.pc += 1,
                Step::Continue => {}
                Step::Done(output) => return Ok(output),
            }
        }
    }

    // --- stack & gas plumbing ---

    fn check_stack(&self, removed: u32, added: u32) -> VmResult<()> {
        let size = self.stack.len() as u32;
        if size < removed {
            return Err(VmError::StackUnderflow {
                wanted: removed,
                on_stack: size,
            });
        }
        if size - removed + added > STACK_LIMIT {
            return Err(VmError::OutOfStack {
                wanted: added,
                limit: STACK_LIMIT,
            });
        }
        Ok(())
    }

    fn pop(&mut self) -> VmResult<U256> {
        self.stack.pop().ok_or(VmError::StackUnderflow {
            wanted: 1,
            on_stack: 0,
        })
    }

    fn push(&mut self, value: U256) {
        self.stack.push(value);
    }

    fn peek(&self, depth: usize) -> VmResult<U256> {
        self.stack
            .len()
            .checked_sub(1 + depth)
            .map(|index| self.stack[index])
            .ok_or(VmError::StackUnderflow {
                wanted: depth as u32 + 1,
                on_stack: self.stack.len() as u32,
            })
    }

    /// Subtract the accumulated instruction cost from the meter.
    fn charge(&mut self) -> VmResult<()> {
        if self.gas < self.run_gas {
            return Err(VmError::OutOfGas);
        }
        self.gas -= self.run_gas;
        Ok(())
    }

    fn add_run_gas(&mut self, amount: u64) -> VmResult<()> {
        self.run_gas = self.run_gas.checked_add(amount).ok_or(VmError::OutOfGas)?;
        Ok(())
    }

    fn gas_for_mem(&self, size: u64) -> VmResult<u64> {
        let words = U512::from(size / 32);
        let cost = U512::from(self.schedule.memory_gas) * words
            + words * words / U512::from(self.schedule.quad_coeff_div);
        to_int63_u512(cost)
    }

    fn update_gas(&mut self) -> VmResult<()> {
        if self.new_mem_size > self.mem.len() as u64 {
            let growth =
                self.gas_for_mem(self.new_mem_size)? - self.gas_for_mem(self.mem.len() as u64)?;
            self.add_run_gas(growth)?;
        }
        let copy_words = (self.copy_mem_size + 31) / 32;
        let copy_cost = self
            .schedule
            .copy_gas
            .checked_mul(copy_words)
            .ok_or(VmError::OutOfGas)?;
        self.add_run_gas(copy_cost)?;
        if self.gas < self.run_gas {
            return Err(VmError::OutOfGas);
        }
        Ok(())
    }

    /// Round the pending size up to a word boundary, price the growth, and
    /// grow the memory.
    fn update_mem(&mut self) -> VmResult<()> {
        self.new_mem_size = (self.new_mem_size + 31) / 32 * 32;
        self.update_gas()?;
        if self.new_mem_size > self.mem.len() as u64 {
            self.mem.resize(self.new_mem_size as usize, 0);
        }
        Ok(())
    }

    fn mem_need(&self, offset: U256, size: U256) -> VmResult<u64> {
        if size.is_zero() {
            Ok(0)
        } else {
            to_int63_u512(U512::from(offset) + U512::from(size))
        }
    }

    fn mem_slice(&self, offset: u64, size: u64) -> &[u8] {
        if size == 0 {
            &[]
        } else {
            &self.mem[offset as usize..(offset + size) as usize]
        }
    }

    fn verify_jump(&self, destination: U256) -> VmResult<u64> {
        if destination <= U256::from(0x7FFF_FFFF_FFFF_FFFFu64) {
            let pc = destination.as_u64();
            // Binary search: hashtable collisions would be exploitable here.
            if self.jump_dests.binary_search(&pc).is_ok() {
                return Ok(pc);
            }
        }
        Err(VmError::BadJumpDestination {
            destination: destination.low_u64(),
        })
    }

    /// Pops (dest-offset, source-index, size) and copies from `data` with
    /// zero fill past its end.
    fn copy_data_to_memory(&mut self, data: &[u8]) -> VmResult<()> {
        let offset = to_int63(self.pop()?)? as usize;
        let index_word = self.pop()?;
        let size = to_int63(self.pop()?)? as usize;

        let data_len = data.len();
        let copied = if U512::from(index_word) + U512::from(size) > U512::from(data_len) {
            if U256::from(data_len) < index_word {
                0
            } else {
                data_len - index_word.as_u64() as usize
            }
        } else {
            size
        };
        if copied > 0 {
            let index = index_word.as_u64() as usize;
            self.mem[offset..offset + copied].copy_from_slice(&data[index..index + copied]);
        }
        if size > copied {
            self.mem[offset + copied..offset + size].fill(0);
        }
        Ok(())
    }

    // --- dispatch ---

    fn step(&mut self, instruction: Instruction, ext: &mut dyn Ext) -> VmResult<Step> {
        use Instruction::*;
        match instruction {
            Stop => {
                self.charge()?;
                Ok(Step::Done(VmOutput {
                    data: Vec::new(),
                    reverted: false,
                }))
            }

            Add => self.binary_op(|a, b| a.overflowing_add(b).0),
            Mul => self.binary_op(|a, b| a.overflowing_mul(b).0),
            Sub => self.binary_op(|a, b| a.overflowing_sub(b).0),
            Div => self.binary_op(|a, b| if b.is_zero() { U256::zero() } else { a / b }),
            SDiv => self.binary_op(signed_div),
            Mod => self.binary_op(|a, b| if b.is_zero() { U256::zero() } else { a % b }),
            SMod => self.binary_op(signed_mod),
            AddMod => {
                self.charge()?;
                let a = self.pop()?;
                let b = self.pop()?;
                let modulus = self.pop()?;
                self.push(if modulus.is_zero() {
                    U256::zero()
                } else {
                    u512_mod(U512::from(a) + U512::from(b), modulus)
                });
                Ok(Step::Advance)
            }
            MulMod => {
                self.charge()?;
                let a = self.pop()?;
                let b = self.pop()?;
                let modulus = self.pop()?;
                self.push(if modulus.is_zero() {
                    U256::zero()
                } else {
                    u512_mod(U512::from(a) * U512::from(b), modulus)
                });
                Ok(Step::Advance)
            }
            Exp => {
                let exponent = self.peek(1)?;
                let byte_len = (exponent.bits() as u64 + 7) / 8;
                self.run_gas = self
                    .schedule
                    .exp_gas
                    .checked_add(
                        self.schedule
                            .exp_byte_gas
                            .checked_mul(byte_len)
                            .ok_or(VmError::OutOfGas)?,
                    )
                    .ok_or(VmError::OutOfGas)?;
                self.charge()?;
                let base = self.pop()?;
                let exponent = self.pop()?;
                self.push(exp256(base, exponent));
                Ok(Step::Advance)
            }
            SignExtend => {
                self.charge()?;
                let ext_byte = self.pop()?;
                let mut number = self.pop()?;
                if ext_byte < U256::from(31) {
                    let test_bit = ext_byte.as_u64() as usize * 8 + 7;
                    let mask = (U256::one() << test_bit) - U256::one();
                    if number.bit(test_bit) {
                        number = number | !mask;
                    } else {
                        number = number & mask;
                    }
                }
                self.push(number);
                Ok(Step::Advance)
            }

            Lt => self.binary_op(|a, b| bool_word(a < b)),
            Gt => self.binary_op(|a, b| bool_word(a > b)),
            Slt => self.binary_op(|a, b| bool_word(signed_lt(a, b))),
            Sgt => self.binary_op(|a, b| bool_word(signed_lt(b, a))),
            Eq => self.binary_op(|a, b| bool_word(a == b)),
            IsZero => {
                self.charge()?;
                let a = self.pop()?;
                self.push(bool_word(a.is_zero()));
                Ok(Step::Advance)
            }
            And => self.binary_op(|a, b| a & b),
            Or => self.binary_op(|a, b| a | b),
            Xor => self.binary_op(|a, b| a ^ b),
            Not => {
                self.charge()?;
                let a = self.pop()?;
                self.push(!a);
                Ok(Step::Advance)
            }
            Byte => self.binary_op(|index, word| {
                if index < U256::from(32) {
                    (word >> (8 * (31 - index.as_u64() as usize))) & U256::from(0xff)
                } else {
                    U256::zero()
                }
            }),

            Sha3 => {
                let size = self.peek(1)?;
                let word_cost = to_int63_u512(
                    (U512::from(size) + U512::from(31u64)) / U512::from(32u64)
                        * U512::from(self.schedule.sha3_word_gas),
                )?;
                self.run_gas = self
                    .schedule
                    .sha3_gas
                    .checked_add(word_cost)
                    .ok_or(VmError::OutOfGas)?;
                self.new_mem_size = self.mem_need(self.peek(0)?, size)?;
                self.update_mem()?;
                self.charge()?;
                let offset = to_int63(self.pop()?)?;
                let size = to_int63(self.pop()?)?;
                let hash = keccak(self.mem_slice(offset, size));
                self.push(U256::from_big_endian(hash.as_bytes()));
                Ok(Step::Advance)
            }

            Address => self.push_value(address_to_u256(&self.params.address)),
            Origin => self.push_value(address_to_u256(&self.params.origin)),
            Caller => self.push_value(address_to_u256(&self.params.caller)),
            CallValue => self.push_value(self.params.value),
            GasPrice => self.push_value(self.params.gas_price),
            CallDataSize => self.push_value(U256::from(self.params.data.len())),
            CodeSize => self.push_value(U256::from(self.code_len)),

            Balance => {
                self.run_gas = self.schedule.balance_gas;
                self.charge()?;
                let address = u256_to_address(&self.pop()?);
                let balance = ext.balance(&address)?;
                self.push(balance);
                Ok(Step::Advance)
            }
            ExtCodeSize => {
                self.run_gas = self.schedule.extcodesize_gas;
                self.charge()?;
                let address = u256_to_address(&self.pop()?);
                let size = ext.code_size_at(&address)?;
                self.push(U256::from(size));
                Ok(Step::Advance)
            }

            CallDataLoad => {
                self.charge()?;
                let index = self.pop()?;
                self.push(load_word_padded(&self.params.data, index));
                Ok(Step::Advance)
            }
            CallDataCopy => {
                self.copy_mem_size = to_int63(self.peek(2)?)?;
                self.new_mem_size = self.mem_need(self.peek(0)?, self.peek(2)?)?;
                self.update_mem()?;
                self.charge()?;
                let data = std::mem::take(&mut self.params.data);
                self.copy_data_to_memory(&data)?;
                self.params.data = data;
                Ok(Step::Advance)
            }
            CodeCopy => {
                self.copy_mem_size = to_int63(self.peek(2)?)?;
                self.new_mem_size = self.mem_need(self.peek(0)?, self.peek(2)?)?;
                self.update_mem()?;
                self.charge()?;
                let code = self.code[..self.code_len].to_vec();
                self.copy_data_to_memory(&code)?;
                Ok(Step::Advance)
            }
            ExtCodeCopy => {
                self.run_gas = self.schedule.extcodecopy_gas;
                self.copy_mem_size = to_int63(self.peek(3)?)?;
                self.new_mem_size = self.mem_need(self.peek(1)?, self.peek(3)?)?;
                self.update_mem()?;
                self.charge()?;
                let address = u256_to_address(&self.pop()?);
                let code = ext.code_at(&address)?;
                self.copy_data_to_memory(&code)?;
                Ok(Step::Advance)
            }

            BlockHash => {
                self.charge()?;
                let number = self.pop()?;
                let hash = ext.block_hash(&number);
                self.push(U256::from_big_endian(hash.as_bytes()));
                Ok(Step::Advance)
            }
            Coinbase => {
                self.charge()?;
                let author = ext.env().author;
                self.push(address_to_u256(&author));
                Ok(Step::Advance)
            }
            Timestamp => {
                self.charge()?;
                let timestamp = ext.env().timestamp;
                self.push(U256::from(timestamp));
                Ok(Step::Advance)
            }
            Number => {
                self.charge()?;
                let number = ext.env().number;
                self.push(U256::from(number));
                Ok(Step::Advance)
            }
            Difficulty => {
                self.charge()?;
                let difficulty = ext.env().difficulty;
                self.push(difficulty);
                Ok(Step::Advance)
            }
            GasLimit => {
                self.charge()?;
                let gas_limit = ext.env().gas_limit;
                self.push(U256::from(gas_limit));
                Ok(Step::Advance)
            }

            Pop => {
                self.charge()?;
                self.pop()?;
                Ok(Step::Advance)
            }
            MLoad => {
                self.new_mem_size = to_int63(self.peek(0)?)?
                    .checked_add(32)
                    .ok_or(VmError::OutOfGas)?;
                self.update_mem()?;
                self.charge()?;
                let offset = to_int63(self.pop()?)?;
                let word = U256::from_big_endian(self.mem_slice(offset, 32));
                self.push(word);
                Ok(Step::Advance)
            }
            MStore => {
                self.new_mem_size = to_int63(self.peek(0)?)?
                    .checked_add(32)
                    .ok_or(VmError::OutOfGas)?;
                self.update_mem()?;
                self.charge()?;
                let offset = to_int63(self.pop()?)? as usize;
                let word = self.pop()?;
                word.to_big_endian(&mut self.mem[offset..offset + 32]);
                Ok(Step::Advance)
            }
            MStore8 => {
                self.new_mem_size = to_int63(self.peek(0)?)?
                    .checked_add(1)
                    .ok_or(VmError::OutOfGas)?;
                self.update_mem()?;
                self.charge()?;
                let offset = to_int63(self.pop()?)? as usize;
                let value = self.pop()?;
                self.mem[offset] = value.byte(0);
                Ok(Step::Advance)
            }

            SLoad => {
                self.run_gas = self.schedule.sload_gas;
                self.charge()?;
                let key = self.pop()?;
                let value = ext.storage_at(&key)?;
                self.push(value);
                Ok(Step::Advance)
            }
            SStore => {
                let key = self.peek(0)?;
                let value = self.peek(1)?;
                let current = ext.storage_at(&key)?;
                if current.is_zero() && !value.is_zero() {
                    self.run_gas = self.schedule.sstore_set_gas;
                } else if !current.is_zero() && value.is_zero() {
                    self.run_gas = self.schedule.sstore_reset_gas;
                    ext.add_refund(self.schedule.sstore_refund_gas);
                } else {
                    self.run_gas = self.schedule.sstore_reset_gas;
                }
                self.charge()?;
                let key = self.pop()?;
                let value = self.pop()?;
                ext.set_storage(key, value)?;
                Ok(Step::Advance)
            }

            Jump => {
                self.charge()?;
                let destination = self.pop()?;
                self.pc = self.verify_jump(destination)?;
                Ok(Step::Continue)
            }
            JumpI => {
                self.charge()?;
                let destination = self.pop()?;
                let condition = self.pop()?;
                if !condition.is_zero() {
                    self.pc = self.verify_jump(destination)?;
                } else {
                    self.pc += 1;
                }
                Ok(Step::Continue)
            }
            Pc => {
                self.charge()?;
                let pc = self.pc;
                self.push(U256::from(pc));
                Ok(Step::Advance)
            }
            MSize => {
                self.charge()?;
                let size = self.mem.len();
                self.push(U256::from(size));
                Ok(Step::Advance)
            }
            Gas => {
                self.charge()?;
                let gas = self.gas;
                self.push(U256::from(gas));
                Ok(Step::Advance)
            }
            JumpDest => {
                self.run_gas = self.schedule.jumpdest_gas;
                self.charge()?;
                Ok(Step::Advance)
            }

            Push1 | Push2 | Push3 | Push4 | Push5 | Push6 | Push7 | Push8 | Push9 | Push10
            | Push11 | Push12 | Push13 | Push14 | Push15 | Push16 | Push17 | Push18 | Push19
            | Push20 | Push21 | Push22 | Push23 | Push24 | Push25 | Push26 | Push27 | Push28
            | Push29 | Push30 | Push31 | Push32 => {
                self.charge()?;
                let count = instruction.push_bytes();
                let mut value = U256::zero();
                self.pc += 1;
                // The code buffer is zero-padded, so reads past the real end
                // yield zeroes exactly like the reference loop.
                for _ in 0..count {
                    value = (value << 8) | U256::from(self.code[self.pc as usize]);
                    self.pc += 1;
                }
                self.push(value);
                Ok(Step::Continue)
            }

            Dup1 | Dup2 | Dup3 | Dup4 | Dup5 | Dup6 | Dup7 | Dup8 | Dup9 | Dup10 | Dup11
            | Dup12 | Dup13 | Dup14 | Dup15 | Dup16 => {
                self.charge()?;
                let value = self.peek(instruction.dup_depth() - 1)?;
                self.push(value);
                Ok(Step::Advance)
            }

            Swap1 | Swap2 | Swap3 | Swap4 | Swap5 | Swap6 | Swap7 | Swap8 | Swap9 | Swap10
            | Swap11 | Swap12 | Swap13 | Swap14 | Swap15 | Swap16 => {
                self.charge()?;
                let depth = instruction.swap_depth();
                let top = self.stack.len() - 1;
                self.stack.swap(top, top - depth);
                Ok(Step::Advance)
            }

            Log0 | Log1 | Log2 | Log3 | Log4 => {
                let topic_count = instruction.log_topics();
                let size = self.peek(1)?;
                let data_cost = to_int63_u512(
                    U512::from(self.schedule.log_data_gas) * U512::from(size),
                )?;
                self.run_gas = self
                    .schedule
                    .log_gas
                    .checked_add(self.schedule.log_topic_gas * topic_count as u64)
                    .and_then(|gas| gas.checked_add(data_cost))
                    .ok_or(VmError::OutOfGas)?;
                self.new_mem_size = self.mem_need(self.peek(0)?, size)?;
                self.update_mem()?;
                self.charge()?;

                let offset = to_int63(self.pop()?)?;
                let size = to_int63(self.pop()?)?;
                let mut topics = Vec::with_capacity(topic_count);
                for _ in 0..topic_count {
                    let mut bytes = [0u8; 32];
                    self.pop()?.to_big_endian(&mut bytes);
                    topics.push(H256(bytes));
                }
                let data = self.mem_slice(offset, size).to_vec();
                ext.log(topics, &data)?;
                Ok(Step::Advance)
            }

            Create => self.do_create(ext),
            Call | CallCode | DelegateCall => self.do_call(instruction, ext),

            Return => {
                self.new_mem_size = self.mem_need(self.peek(0)?, self.peek(1)?)?;
                self.update_mem()?;
                self.charge()?;
                let offset = to_int63(self.pop()?)?;
                let size = to_int63(self.pop()?)?;
                Ok(Step::Done(VmOutput {
                    data: self.mem_slice(offset, size).to_vec(),
                    reverted: false,
                }))
            }
            Revert => {
                self.new_mem_size = self.mem_need(self.peek(0)?, self.peek(1)?)?;
                self.update_mem()?;
                self.charge()?;
                let offset = to_int63(self.pop()?)?;
                let size = to_int63(self.pop()?)?;
                Ok(Step::Done(VmOutput {
                    data: self.mem_slice(offset, size).to_vec(),
                    reverted: true,
                }))
            }
            Suicide => {
                self.run_gas = self.schedule.suicide_gas;
                let beneficiary = u256_to_address(&self.peek(0)?);
                let own_balance = ext.balance(&self.params.address)?;
                if !own_balance.is_zero()
                    || self.schedule.zero_value_transfer_charges_new_account_gas()
                {
                    if self.schedule.suicide_charges_new_account_gas()
                        && !ext.exists(&beneficiary)?
                    {
                        self.add_run_gas(self.schedule.call_new_account_gas)?;
                    }
                }
                self.charge()?;
                self.pop()?;
                ext.suicide(&beneficiary)?;
                Ok(Step::Done(VmOutput {
                    data: Vec::new(),
                    reverted: false,
                }))
            }
        }
    }

    fn binary_op(&mut self, op: impl FnOnce(U256, U256) -> U256) -> VmResult<Step> {
        self.charge()?;
        let a = self.pop()?;
        let b = self.pop()?;
        self.push(op(a, b));
        Ok(Step::Advance)
    }

    fn push_value(&mut self, value: U256) -> VmResult<Step> {
        self.charge()?;
        self.push(value);
        Ok(Step::Advance)
    }

    fn do_create(&mut self, ext: &mut dyn Ext) -> VmResult<Step> {
        self.new_mem_size = self.mem_need(self.peek(1)?, self.peek(2)?)?;
        self.run_gas = self.schedule.create_gas;
        self.update_mem()?;
        self.charge()?;

        let endowment = self.pop()?;
        let init_offset = to_int63(self.pop()?)?;
        let init_size = to_int63(self.pop()?)?;

        // No state has been touched yet; the endowment guard fires before
        // any transfer or account creation.
        if !endowment.is_zero() {
            return Err(VmError::CreateWithValue);
        }

        if ext.balance(&self.params.address)? >= endowment && ext.depth() < DEPTH_LIMIT {
            let mut create_gas = U256::from(self.gas);
            if !self.schedule.static_call_depth_limit() {
                create_gas = create_gas - create_gas / 64;
            }
            let budget = create_gas;
            let mut gas = create_gas;
            let init = self.mem_slice(init_offset, init_size).to_vec();
            let created = ext.create(endowment, &mut gas, &init)?;
            self.push(match created {
                Some(address) => address_to_u256(&address),
                None => U256::zero(),
            });
            let spent = budget - gas;
            self.gas -= spent.low_u64();
        } else {
            self.push(U256::zero());
        }
        Ok(Step::Advance)
    }

    fn do_call(&mut self, instruction: Instruction, ext: &mut dyn Ext) -> VmResult<Step> {
        use Instruction::*;
        if instruction == DelegateCall && !self.schedule.have_delegate_call {
            return Err(VmError::BadInstruction {
                instruction: instruction as u8,
            });
        }
        self.run_gas = self.schedule.call_gas;

        let code_address = u256_to_address(&self.peek(1)?);
        if instruction == Call && !ext.exists(&code_address)? {
            let value = self.peek(2)?;
            if !value.is_zero() || self.schedule.zero_value_transfer_charges_new_account_gas() {
                self.add_run_gas(self.schedule.call_new_account_gas)?;
            }
        }
        if instruction != DelegateCall && !self.peek(2)?.is_zero() {
            self.add_run_gas(self.schedule.call_value_transfer_gas)?;
        }

        let sizes_offset = if instruction == DelegateCall { 2 } else { 3 };
        let input_need = self.mem_need(self.peek(sizes_offset)?, self.peek(sizes_offset + 1)?)?;
        let output_need =
            self.mem_need(self.peek(sizes_offset + 2)?, self.peek(sizes_offset + 3)?)?;
        self.new_mem_size = input_need.max(output_need);
        self.update_mem()?;
        self.charge()?;

        // Static costs are paid; now meter the forwarded gas itself.
        let requested = self.peek(0)?;
        let call_gas = if self.schedule.static_call_depth_limit() {
            requested
        } else {
            let max_allowed = U256::from(self.gas - self.gas / 64);
            requested.min(max_allowed)
        };
        self.run_gas = to_int63(call_gas)?;
        self.charge()?;

        let mut forwarded = call_gas;
        let has_value = instruction != DelegateCall && !self.peek(2)?.is_zero();
        if has_value {
            forwarded += U256::from(self.schedule.call_stipend);
        }

        self.pop()?; // requested gas, already accounted
        let code_address = u256_to_address(&self.pop()?);
        let (apparent_value, value_transfer) = if instruction == DelegateCall {
            (self.params.value, U256::zero())
        } else {
            let value = self.pop()?;
            (value, value)
        };
        let input_offset = to_int63(self.pop()?)?;
        let input_size = to_int63(self.pop()?)?;
        let output_offset = to_int63(self.pop()?)? as usize;
        let output_size = to_int63(self.pop()?)? as usize;

        if ext.balance(&self.params.address)? >= value_transfer && ext.depth() < DEPTH_LIMIT {
            let mut params = CallParams {
                sender: if instruction == DelegateCall {
                    self.params.caller
                } else {
                    self.params.address
                },
                code_address,
                receive_address: if instruction == Call {
                    code_address
                } else {
                    self.params.address
                },
                value_transfer,
                apparent_value,
                gas: forwarded,
                data: self.mem_slice(input_offset, input_size).to_vec(),
            };
            match ext.call(&mut params)? {
                Some(output) => {
                    let copied = output.len().min(output_size);
                    if copied > 0 {
                        self.mem[output_offset..output_offset + copied]
                            .copy_from_slice(&output[..copied]);
                    }
                    self.push(U256::one());
                }
                None => self.push(U256::zero()),
            }
            // Unused callee gas comes back to this frame.
            self.gas = self
                .gas
                .checked_add(params.gas.low_u64())
                .ok_or(VmError::OutOfGas)?;
        } else {
            self.push(U256::zero());
            self.gas = self
                .gas
                .checked_add(forwarded.low_u64())
                .ok_or(VmError::OutOfGas)?;
        }
        Ok(Step::Advance)
    }
}

fn scan_jump_dests(code: &[u8]) -> Vec<u64> {
    let mut dests = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let opcode = code[pc];
        if opcode == Instruction::JumpDest as u8 {
            dests.push(pc as u64);
        } else if (0x60..=0x7f).contains(&opcode) {
            pc += (opcode - 0x5f) as usize;
        }
        pc += 1;
    }
    dests
}

fn to_int63(value: U256) -> VmResult<u64> {
    if value > U256::from(0x7FFF_FFFF_FFFF_FFFFu64) {
        return Err(VmError::OutOfGas);
    }
    Ok(value.as_u64())
}

fn to_int63_u512(value: U512) -> VmResult<u64> {
    if value > U512::from(0x7FFF_FFFF_FFFF_FFFFu64) {
        return Err(VmError::OutOfGas);
    }
    Ok(value.as_u64())
}

fn bool_word(condition: bool) -> U256 {
    if condition {
        U256::one()
    } else {
        U256::zero()
    }
}

fn load_word_padded(data: &[u8], index: U256) -> U256 {
    if index >= U256::from(data.len()) {
        return U256::zero();
    }
    let start = index.as_u64() as usize;
    let mut word = [0u8; 32];
    let end = (start + 32).min(data.len());
    word[..end - start].copy_from_slice(&data[start..end]);
    U256::from_big_endian(&word)
}

fn signed_split(value: U256) -> (bool, U256) {
    if value.bit(255) {
        (true, (!value).overflowing_add(U256::one()).0)
    } else {
        (false, value)
    }
}

fn signed_join(negative: bool, magnitude: U256) -> U256 {
    if negative {
        (!magnitude).overflowing_add(U256::one()).0
    } else {
        magnitude
    }
}

fn signed_div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let (neg_a, mag_a) = signed_split(a);
    let (neg_b, mag_b) = signed_split(b);
    signed_join(neg_a ^ neg_b, mag_a / mag_b)
}

fn signed_mod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let (neg_a, mag_a) = signed_split(a);
    let (_, mag_b) = signed_split(b);
    signed_join(neg_a, mag_a % mag_b)
}

fn signed_lt(a: U256, b: U256) -> bool {
    let neg_a = a.bit(255);
    let neg_b = b.bit(255);
    if neg_a != neg_b {
        neg_a
    } else {
        a < b
    }
}

fn u512_mod(value: U512, modulus: U256) -> U256 {
    let result = value % U512::from(modulus);
    let mut bytes = [0u8; 64];
    result.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}

fn exp256(mut base: U256, mut exponent: U256) -> U256 {
    let mut result = U256::one();
    while !exponent.is_zero() {
        if exponent.bit(0) {
            result = result.overflowing_mul(base).0;
        }
        base = base.overflowing_mul(base).0;
        exponent = exponent >> 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::EnvInfo;
    use std::collections::{BTreeSet, HashMap};

    /// Canned externalities for exercising the interpreter in isolation.
    struct FakeExt {
        schedule: Schedule,
        env: EnvInfo,
        depth: usize,
        storage: HashMap<U256, U256>,
        balances: HashMap<Address, U256>,
        existing: BTreeSet<Address>,
        refunds: u64,
        logs: Vec<(Vec<H256>, Vec<u8>)>,
        suicides: Vec<Address>,
        calls: Vec<CallParams>,
        creates: usize,
        call_output: Option<Vec<u8>>,
    }

    impl FakeExt {
        fn new() -> Self {
            Self {
                schedule: Schedule::default(),
                env: EnvInfo::default(),
                depth: 0,
                storage: HashMap::new(),
                balances: HashMap::new(),
                existing: BTreeSet::new(),
                refunds: 0,
                logs: Vec::new(),
                suicides: Vec::new(),
                calls: Vec::new(),
                creates: 0,
                call_output: Some(Vec::new()),
            }
        }
    }

    impl Ext for FakeExt {
        fn schedule(&self) -> &Schedule {
            &self.schedule
        }
        fn env(&self) -> &EnvInfo {
            &self.env
        }
        fn depth(&self) -> usize {
            self.depth
        }
        fn storage_at(&mut self, key: &U256) -> VmResult<U256> {
            Ok(self.storage.get(key).copied().unwrap_or_default())
        }
        fn set_storage(&mut self, key: U256, value: U256) -> VmResult<()> {
            self.storage.insert(key, value);
            Ok(())
        }
        fn exists(&mut self, address: &Address) -> VmResult<bool> {
            Ok(self.existing.contains(address))
        }
        fn balance(&mut self, address: &Address) -> VmResult<U256> {
            Ok(self.balances.get(address).copied().unwrap_or_default())
        }
        fn code_at(&mut self, _address: &Address) -> VmResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn code_size_at(&mut self, _address: &Address) -> VmResult<usize> {
            Ok(0)
        }
        fn block_hash(&self, _number: &U256) -> H256 {
            H256::zero()
        }
        fn create(
            &mut self,
            _endowment: U256,
            _gas: &mut U256,
            _init: &[u8],
        ) -> VmResult<Option<Address>> {
            self.creates += 1;
            Ok(Some(Address::from_low_u64_be(0xc0de)))
        }
        fn call(&mut self, params: &mut CallParams) -> VmResult<Option<Vec<u8>>> {
            self.calls.push(params.clone());
            Ok(self.call_output.clone())
        }
        fn log(&mut self, topics: Vec<H256>, data: &[u8]) -> VmResult<()> {
            self.logs.push((topics, data.to_vec()));
            Ok(())
        }
        fn suicide(&mut self, beneficiary: &Address) -> VmResult<()> {
            self.suicides.push(*beneficiary);
            Ok(())
        }
        fn add_refund(&mut self, amount: u64) {
            self.refunds += amount;
        }
    }

    fn run(code: &[u8], gas_limit: u64, ext: &mut FakeExt) -> (VmResult<VmOutput>, u64) {
        let params = InterpreterParams {
            address: Address::from_low_u64_be(0xaa),
            caller: Address::from_low_u64_be(0xbb),
            origin: Address::from_low_u64_be(0xbb),
            value: U256::zero(),
            gas_price: U256::one(),
            code: code.to_vec(),
            code_hash: keccak(code),
            data: Vec::new(),
        };
        let interpreter = Interpreter::new(params, ext.schedule.clone());
        let mut gas = U256::from(gas_limit);
        let result = interpreter.exec(&mut gas, ext);
        (result, gas.as_u64())
    }

    /// PUSH1 a, PUSH1 b, <op>, then return the 32-byte word at memory 0.
    fn binary_program(a: u8, b: u8, op: u8) -> Vec<u8> {
        vec![
            0x60, a, // PUSH1 a   (second operand)
            0x60, b, // PUSH1 b   (top operand)
            op, 0x60, 0x00, // PUSH1 0
            0x52, // MSTORE
            0x60, 0x20, // PUSH1 32  (return size)
            0x60, 0x00, // PUSH1 0   (return offset)
            0xf3, // RETURN
        ]
    }

    fn word(result: &VmResult<VmOutput>) -> U256 {
        let output = result.as_ref().unwrap();
        assert!(!output.reverted);
        U256::from_big_endian(&output.data)
    }

    #[test]
    fn stop_returns_empty_output() {
        let mut ext = FakeExt::new();
        let (result, gas_left) = run(&[0x00], 1000, &mut ext);
        assert_eq!(result.unwrap(), VmOutput { data: vec![], reverted: false });
        assert_eq!(gas_left, 1000);
    }

    #[test]
    fn running_off_the_code_end_halts() {
        // Zero-padded code behaves as an implicit STOP.
        let mut ext = FakeExt::new();
        let (result, _) = run(&[0x60, 0x01], 1000, &mut ext);
        assert!(!result.unwrap().reverted);
    }

    #[test]
    fn arithmetic_results() {
        let cases: [(u8, u8, u8, u64); 7] = [
            (3, 4, 0x01, 7),   // ADD
            (10, 3, 0x02, 30), // MUL
            (3, 10, 0x03, 7),  // SUB: top - second
            (3, 12, 0x04, 4),  // DIV: top / second
            (4, 14, 0x06, 2),  // MOD
            (7, 2, 0x16, 2),   // AND
            (5, 3, 0x17, 7),   // OR
        ];
        for (a, b, op, expected) in cases {
            let mut ext = FakeExt::new();
            let (result, _) = run(&binary_program(a, b, op), 100_000, &mut ext);
            assert_eq!(word(&result), U256::from(expected), "op {op:#04x}");
        }
    }

    #[test]
    fn division_by_zero_yields_zero() {
        let mut ext = FakeExt::new();
        let (result, _) = run(&binary_program(0, 9, 0x04), 100_000, &mut ext);
        assert_eq!(word(&result), U256::zero());
    }

    #[test]
    fn signed_division_handles_negatives() {
        // -8 / 2 = -4 computed as (0 - 8) sdiv 2.
        let code = vec![
            0x60, 0x02, // PUSH1 2     (second operand: divisor)
            0x60, 0x08, // PUSH1 8
            0x60, 0x00, // PUSH1 0
            0x03, // SUB -> 0 - 8 = -8 (top: dividend)
            0x05, // SDIV
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        let minus_four = (!U256::from(4u64)).overflowing_add(U256::one()).0;
        assert_eq!(word(&result), minus_four);
    }

    #[test]
    fn exp_and_its_per_byte_gas() {
        // 2 ** 10 = 1024; exponent 10 is one significant byte.
        let code = binary_program(10, 2, 0x0a);
        let mut ext = FakeExt::new();
        let (result, gas_left) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::from(1024));

        let mut ext_zero = FakeExt::new();
        // 2 ** 0: zero significant exponent bytes costs exp_byte_gas less.
        let (result_zero, gas_left_zero) = run(&binary_program(0, 2, 0x0a), 100_000, &mut ext_zero);
        assert_eq!(word(&result_zero), U256::one());
        assert_eq!(gas_left_zero - gas_left, ext.schedule.exp_byte_gas);
    }

    #[test]
    fn comparisons_and_iszero() {
        let mut ext = FakeExt::new();
        // 2 < 3: LT with top=2, second=3.
        let (result, _) = run(&binary_program(3, 2, 0x10), 100_000, &mut ext);
        assert_eq!(word(&result), U256::one());

        let mut ext = FakeExt::new();
        let code = vec![
            0x60, 0x00, // PUSH1 0
            0x15, // ISZERO
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::one());
    }

    #[test]
    fn byte_extracts_from_word() {
        // BYTE(31, 0x1234) -> 0x34 (index from the most significant byte).
        let mut ext = FakeExt::new();
        let code = vec![
            0x61, 0x12, 0x34, // PUSH2 0x1234 (second: word)
            0x60, 0x1f, // PUSH1 31     (top: index)
            0x1a, // BYTE
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::from(0x34));
    }

    #[test]
    fn mstore_mload_round_trip() {
        let code = vec![
            0x60, 0x2a, // PUSH1 42
            0x60, 0x10, // PUSH1 16
            0x52, // MSTORE
            0x60, 0x10, // PUSH1 16
            0x51, // MLOAD
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::from(42));
    }

    #[test]
    fn jump_lands_only_on_jumpdest() {
        let code = vec![
            0x60, 0x04, // PUSH1 4
            0x56, // JUMP
            0x00, // skipped
            0x5b, // JUMPDEST @4
            0x60, 0x07, // PUSH1 7
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::from(7));
    }

    #[test]
    fn invalid_jump_faults() {
        let mut ext = FakeExt::new();
        let (result, _) = run(&[0x60, 0x03, 0x56, 0x00], 100_000, &mut ext);
        assert_eq!(
            result.unwrap_err(),
            VmError::BadJumpDestination { destination: 3 }
        );
    }

    #[test]
    fn jump_into_push_data_faults() {
        // Byte 1 is 0x5b but sits inside PUSH1's immediate.
        let mut ext = FakeExt::new();
        let (result, _) = run(&[0x60, 0x5b, 0x60, 0x01, 0x56], 100_000, &mut ext);
        assert!(matches!(
            result.unwrap_err(),
            VmError::BadJumpDestination { .. }
        ));
    }

    #[test]
    fn conditional_jump_falls_through_on_zero() {
        let code = vec![
            0x60, 0x00, // PUSH1 0 (condition)
            0x60, 0x07, // PUSH1 7 (destination)
            0x57, // JUMPI -> no jump
            0x60, 0x05, // PUSH1 5
            0x00, // STOP (balanced; dest 7 is a JUMPDEST)
            0x5b, 0x00,
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        assert!(!result.unwrap().reverted);
    }

    #[test]
    fn stack_underflow_faults() {
        let mut ext = FakeExt::new();
        let (result, _) = run(&[0x01], 100_000, &mut ext);
        assert!(matches!(result.unwrap_err(), VmError::StackUnderflow { .. }));
    }

    #[test]
    fn unknown_opcode_faults() {
        let mut ext = FakeExt::new();
        let (result, _) = run(&[0xfe], 100_000, &mut ext);
        assert_eq!(
            result.unwrap_err(),
            VmError::BadInstruction { instruction: 0xfe }
        );
    }

    #[test]
    fn out_of_gas_stops_execution() {
        // An unbounded loop must die by gas, not run forever.
        let code = vec![0x5b, 0x60, 0x00, 0x56]; // JUMPDEST; PUSH1 0; JUMP
        let mut ext = FakeExt::new();
        let (result, gas_left) = run(&code, 1_000, &mut ext);
        assert_eq!(result.unwrap_err(), VmError::OutOfGas);
        assert_eq!(gas_left, 0);
    }

    #[test]
    fn memory_growth_is_priced_quadratically() {
        // MSTORE far out of range: the word count overflows the budget.
        let code = vec![
            0x60, 0x01, // PUSH1 1 (value)
            0x64, 0xff, 0xff, 0xff, 0xff, 0xff, // PUSH5 big offset
            0x52, // MSTORE
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 1_000_000, &mut ext);
        assert_eq!(result.unwrap_err(), VmError::OutOfGas);
    }

    #[test]
    fn sstore_set_and_reset_pricing() {
        let schedule = Schedule::default();
        // Store 5 at slot 0: zero -> non-zero charges the set price.
        let code = vec![0x60, 0x05, 0x60, 0x00, 0x55];
        let mut ext = FakeExt::new();
        let (result, gas_left) = run(&code, 100_000, &mut ext);
        assert!(result.is_ok());
        assert_eq!(ext.storage[&U256::zero()], U256::from(5));
        assert_eq!(ext.refunds, 0);
        // Two pushes plus the set price.
        assert_eq!(100_000 - gas_left, 3 + 3 + schedule.sstore_set_gas);

        // Store 0 over 5: non-zero -> zero charges reset and refunds once.
        let code = vec![0x60, 0x00, 0x60, 0x00, 0x55];
        let mut ext = FakeExt::new();
        ext.storage.insert(U256::zero(), U256::from(5));
        let (result, gas_left) = run(&code, 100_000, &mut ext);
        assert!(result.is_ok());
        assert_eq!(ext.storage[&U256::zero()], U256::zero());
        assert_eq!(ext.refunds, schedule.sstore_refund_gas);
        assert_eq!(100_000 - gas_left, 3 + 3 + schedule.sstore_reset_gas);

        // Overwrite 5 with 6: reset price, no refund.
        let code = vec![0x60, 0x06, 0x60, 0x00, 0x55];
        let mut ext = FakeExt::new();
        ext.storage.insert(U256::zero(), U256::from(5));
        let (result, _) = run(&code, 100_000, &mut ext);
        assert!(result.is_ok());
        assert_eq!(ext.refunds, 0);
        assert_eq!(ext.storage[&U256::zero()], U256::from(6));
    }

    #[test]
    fn revert_preserves_output_and_flags() {
        let code = vec![
            0x60, 0x2a, // PUSH1 42
            0x60, 0x00, 0x52, // MSTORE @0
            0x60, 0x20, 0x60, 0x00, // size 32, offset 0
            0xfd, // REVERT
        ];
        let mut ext = FakeExt::new();
        let (result, gas_left) = run(&code, 100_000, &mut ext);
        let output = result.unwrap();
        assert!(output.reverted);
        assert_eq!(U256::from_big_endian(&output.data), U256::from(42));
        assert!(gas_left > 0);
    }

    #[test]
    fn logs_reach_the_externalities() {
        let code = vec![
            0x60, 0xee, 0x60, 0x00, 0x52, // MSTORE 0xee @0
            0x60, 0x07, // PUSH1 7 (topic)
            0x60, 0x20, // PUSH1 32 (size)
            0x60, 0x00, // PUSH1 0 (offset)
            0xa1, // LOG1
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        assert!(result.is_ok());
        assert_eq!(ext.logs.len(), 1);
        let (topics, data) = &ext.logs[0];
        assert_eq!(topics, &vec![H256::from_low_u64_be(7)]);
        assert_eq!(U256::from_big_endian(data), U256::from(0xee));
    }

    #[test]
    fn calldataload_pads_with_zeroes() {
        let code = vec![
            0x60, 0x00, // PUSH1 0
            0x35, // CALLDATALOAD
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut params_data = vec![0u8; 4];
        params_data[0] = 0x12;
        let params = InterpreterParams {
            code: code.clone(),
            code_hash: keccak(&code),
            data: params_data,
            ..Default::default()
        };
        let mut ext = FakeExt::new();
        let interpreter = Interpreter::new(params, ext.schedule.clone());
        let mut gas = U256::from(100_000u64);
        let output = interpreter.exec(&mut gas, &mut ext).unwrap();
        let mut expected = [0u8; 32];
        expected[0] = 0x12;
        assert_eq!(output.data, expected.to_vec());
    }

    #[test]
    fn call_writes_output_and_pushes_success() {
        // CALL with 64 bytes of output space at 0; callee returns 3 bytes.
        let code = vec![
            0x60, 0x20, // PUSH1 32 (out size)
            0x60, 0x00, // PUSH1 0  (out offset)
            0x60, 0x00, // PUSH1 0  (in size)
            0x60, 0x00, // PUSH1 0  (in offset)
            0x60, 0x00, // PUSH1 0  (value)
            0x60, 0xcc, // PUSH1 0xcc (to)
            0x61, 0x03, 0xe8, // PUSH2 1000 (gas)
            0xf1, // CALL
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        ext.call_output = Some(vec![0xde, 0xad, 0xbe]);
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::one()); // success flag
        assert_eq!(ext.calls.len(), 1);
        assert_eq!(ext.calls[0].code_address, Address::from_low_u64_be(0xcc));
        assert_eq!(ext.calls[0].gas, U256::from(1000));
    }

    #[test]
    fn failed_call_pushes_zero() {
        let code = vec![
            0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // out/in regions
            0x60, 0x00, // value
            0x60, 0xcc, // to
            0x61, 0x03, 0xe8, // gas
            0xf1, // CALL
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        ext.call_output = None;
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::zero());
    }

    #[test]
    fn value_call_adds_stipend_to_forwarded_gas() {
        let code = vec![
            0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // out/in regions
            0x60, 0x05, // value 5
            0x60, 0xcc, // to
            0x61, 0x03, 0xe8, // gas 1000
            0xf1, // CALL
        ];
        let mut ext = FakeExt::new();
        ext.existing.insert(Address::from_low_u64_be(0xcc));
        ext.balances
            .insert(Address::from_low_u64_be(0xaa), U256::from(100));
        let (result, _) = run(&code, 100_000, &mut ext);
        assert!(result.is_ok());
        let schedule = Schedule::default();
        assert_eq!(
            ext.calls[0].gas,
            U256::from(1000 + schedule.call_stipend)
        );
        assert_eq!(ext.calls[0].value_transfer, U256::from(5));
    }

    #[test]
    fn call_beyond_depth_limit_is_a_no_op() {
        let code = vec![
            0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // args
            0x60, 0xcc, 0x61, 0x03, 0xe8, // to, gas
            0xf1, // CALL
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        ext.depth = DEPTH_LIMIT;
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::zero());
        assert!(ext.calls.is_empty());
    }

    #[test]
    fn create_with_value_faults_before_side_effects() {
        let code = vec![
            0x60, 0x00, // PUSH1 0 (init size)
            0x60, 0x00, // PUSH1 0 (init offset)
            0x60, 0x01, // PUSH1 1 (endowment!)
            0xf0, // CREATE
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(result.unwrap_err(), VmError::CreateWithValue);
        assert_eq!(ext.creates, 0);
    }

    #[test]
    fn create_pushes_new_address() {
        let code = vec![
            0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // size, offset, endowment 0
            0xf0, // CREATE
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 200_000, &mut ext);
        assert_eq!(word(&result), U256::from(0xc0de));
        assert_eq!(ext.creates, 1);
    }

    #[test]
    fn suicide_halts_and_registers() {
        let code = vec![0x60, 0xdd, 0xff]; // PUSH1 0xdd; SUICIDE
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        assert!(!result.unwrap().reverted);
        assert_eq!(ext.suicides, vec![Address::from_low_u64_be(0xdd)]);
    }

    #[test]
    fn gas_instruction_reports_remaining() {
        let code = vec![
            0x5a, // GAS
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 10_000, &mut ext);
        // Base tier for GAS is 2; everything after is spent on returning.
        assert_eq!(word(&result), U256::from(10_000 - 2));
    }

    #[test]
    fn environment_instructions_read_the_frame() {
        let code = vec![
            0x33, // CALLER
            0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ];
        let mut ext = FakeExt::new();
        let (result, _) = run(&code, 100_000, &mut ext);
        assert_eq!(word(&result), U256::from(0xbb));
    }
}
