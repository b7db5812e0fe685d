//! Gas schedule for the interpreter and executive

use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, ExecResult};

/// Gas prices and behavioural switches for one execution context.
///
/// Passed explicitly into the interpreter and executive; there is no global
/// schedule. `Default` matches the values this chain launched with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    /// A creation whose deposit cannot be paid faults instead of deploying
    /// empty code.
    pub exceptional_failed_code_deposit: bool,
    pub have_delegate_call: bool,
    pub eip150_mode: bool,
    pub eip158_mode: bool,
    /// Base gas per pricing tier (zero, base, very-low, low, mid, high, ext,
    /// special).
    pub tier_step_gas: [u64; 8],
    pub exp_gas: u64,
    pub exp_byte_gas: u64,
    pub sha3_gas: u64,
    pub sha3_word_gas: u64,
    pub sload_gas: u64,
    pub sstore_set_gas: u64,
    pub sstore_reset_gas: u64,
    pub sstore_refund_gas: u64,
    pub jumpdest_gas: u64,
    pub log_gas: u64,
    pub log_data_gas: u64,
    pub log_topic_gas: u64,
    pub create_gas: u64,
    pub call_gas: u64,
    pub call_stipend: u64,
    pub call_value_transfer_gas: u64,
    pub call_new_account_gas: u64,
    pub suicide_refund_gas: u64,
    pub memory_gas: u64,
    pub quad_coeff_div: u64,
    pub create_data_gas: u64,
    pub tx_gas: u64,
    pub tx_create_gas: u64,
    pub tx_data_zero_gas: u64,
    pub tx_data_non_zero_gas: u64,
    pub copy_gas: u64,
    pub extcodesize_gas: u64,
    pub extcodecopy_gas: u64,
    pub balance_gas: u64,
    pub suicide_gas: u64,
    pub max_code_size: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            exceptional_failed_code_deposit: true,
            have_delegate_call: true,
            eip150_mode: false,
            eip158_mode: false,
            tier_step_gas: [0, 2, 3, 5, 8, 10, 20, 0],
            exp_gas: 10,
            exp_byte_gas: 10,
            sha3_gas: 30,
            sha3_word_gas: 6,
            sload_gas: 50,
            sstore_set_gas: 20000,
            sstore_reset_gas: 5000,
            sstore_refund_gas: 15000,
            jumpdest_gas: 1,
            log_gas: 375,
            log_data_gas: 8,
            log_topic_gas: 375,
            create_gas: 32000,
            call_gas: 40,
            call_stipend: 2300,
            call_value_transfer_gas: 9000,
            call_new_account_gas: 25000,
            suicide_refund_gas: 24000,
            memory_gas: 3,
            quad_coeff_div: 512,
            create_data_gas: 200,
            tx_gas: 21000,
            tx_create_gas: 53000,
            tx_data_zero_gas: 4,
            tx_data_non_zero_gas: 68,
            copy_gas: 3,
            extcodesize_gas: 20,
            extcodecopy_gas: 20,
            balance_gas: 20,
            suicide_gas: 0,
            max_code_size: u32::MAX as u64,
        }
    }
}

impl Schedule {
    /// Load a schedule from TOML; absent fields keep their defaults.
    pub fn from_toml(text: &str) -> ExecResult<Self> {
        toml::from_str(text).map_err(|e| ExecError::Internal(format!("bad gas schedule: {e}")))
    }

    pub fn to_toml(&self) -> ExecResult<String> {
        toml::to_string(self).map_err(|e| ExecError::Internal(format!("schedule serialize: {e}")))
    }

    /// Pre-eip150 rule: forward exactly the requested call gas instead of
    /// capping at 63/64ths of the remainder.
    pub fn static_call_depth_limit(&self) -> bool {
        !self.eip150_mode
    }

    pub fn suicide_charges_new_account_gas(&self) -> bool {
        self.eip150_mode
    }

    pub fn emptiness_is_nonexistence(&self) -> bool {
        self.eip158_mode
    }

    pub fn zero_value_transfer_charges_new_account_gas(&self) -> bool {
        !self.eip158_mode
    }

    /// Intrinsic gas of a transaction before any code runs.
    pub fn base_gas_required(&self, is_creation: bool, data: &[u8]) -> U256 {
        let mut gas = U256::from(if is_creation { self.tx_create_gas } else { self.tx_gas });
        for byte in data {
            gas += U256::from(if *byte == 0 {
                self.tx_data_zero_gas
            } else {
                self.tx_data_non_zero_gas
            });
        }
        gas
    }
}
