//! Per-execution side effects

use std::collections::BTreeSet;

use ethereum_types::U256;
use ledger_core::transaction::LogEntry;
use ledger_core::types::Address;

/// Side-band state accumulated while a frame executes: addresses queued for
/// deletion, emitted logs, and the gas-refund counter. Merged into the
/// caller's sub-state when a nested frame returns successfully.
#[derive(Debug, Clone, Default)]
pub struct SubState {
    pub suicides: BTreeSet<Address>,
    pub logs: Vec<LogEntry>,
    pub refunds: U256,
}

impl SubState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a returning frame's effects into this one.
    pub fn accrue(&mut self, other: SubState) {
        self.suicides.extend(other.suicides);
        self.logs.extend(other.logs);
        self.refunds += other.refunds;
    }

    pub fn clear(&mut self) {
        self.suicides.clear();
        self.logs.clear();
        self.refunds = U256::zero();
    }
}
