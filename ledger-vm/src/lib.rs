//! Account state and contract execution engine
//!
//! This crate ties the trie-backed account store to the bytecode
//! interpreter: accounts and their storage overlays, the gas schedule, the
//! interpreter itself, and the executive that runs one transaction through
//! validation, execution and finalization.

pub mod account;
pub mod error;
pub mod executive;
pub mod ext;
pub mod instructions;
pub mod interpreter;
pub mod schedule;
pub mod state;
pub mod substate;

pub use account::Account;
pub use error::{ExecError, ExecResult, VmError, VmResult};
pub use executive::{Executive, ExecutionOptions};
pub use ext::{CallParams, EnvInfo, Ext, Externalities};
pub use instructions::{Instruction, InstructionInfo, Tier};
pub use interpreter::{Interpreter, InterpreterParams, VmOutput};
pub use schedule::Schedule;
pub use state::{CommitBehaviour, State};
pub use substate::SubState;
