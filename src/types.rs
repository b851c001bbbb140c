// type definitions
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Solidity state mutability of an ABI entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

impl Mutability {
    pub fn is_payable(self) -> bool {
        self == Mutability::Payable
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Mutability::View | Mutability::Pure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mutability::Pure => "pure",
            Mutability::View => "view",
            Mutability::Nonpayable => "nonpayable",
            Mutability::Payable => "payable",
        }
    }
}

impl From<ethers::abi::StateMutability> for Mutability {
    fn from(mutability: ethers::abi::StateMutability) -> Self {
        match mutability {
            ethers::abi::StateMutability::Pure => Mutability::Pure,
            ethers::abi::StateMutability::View => Mutability::View,
            ethers::abi::StateMutability::NonPayable => Mutability::Nonpayable,
            ethers::abi::StateMutability::Payable => Mutability::Payable,
        }
    }
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receipt status, also used as the expected outcome of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Reverted,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Success => f.write_str("success"),
            TxStatus::Reverted => f.write_str("reverted"),
        }
    }
}

/// How a logical call reaches the contract under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallStyle {
    /// Transaction sent straight to the target.
    Direct,
    /// Relay `CALL` through `functionCall`.
    MessageCall,
    /// Relay `STATICCALL` through `functionStaticCall`.
    StaticCall,
    /// Relay `DELEGATECALL` through `functionDelegateCall`.
    DelegateCall,
    /// Relay `CALLCODE` through `functionCallCode`, value taken from the parent.
    CallCode,
    /// Relay `CALLCODE` with an explicit child value.
    CallCodeWithValue(U256),
    /// Solidity high-level call from a peer contract bound to the target.
    HighLevel,
}

impl CallStyle {
    pub fn label(&self) -> &'static str {
        match self {
            CallStyle::Direct => "external call",
            CallStyle::MessageCall => "message call",
            CallStyle::StaticCall => "message staticcall",
            CallStyle::DelegateCall => "message delegatecall",
            CallStyle::CallCode => "message callcode",
            CallStyle::CallCodeWithValue(_) => "message callcode with value",
            CallStyle::HighLevel => "high level call",
        }
    }

    /// Styles routed through the relay contract execute in its context.
    pub fn uses_relay(&self) -> bool {
        !matches!(self, CallStyle::Direct | CallStyle::HighLevel)
    }
}

/// Expected balance of the observed address after a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BalanceExpectation {
    Unchanged,
    IncreasedBy(U256),
}

impl BalanceExpectation {
    pub fn apply(self, starting_balance: U256) -> U256 {
        match self {
            BalanceExpectation::Unchanged => starting_balance,
            BalanceExpectation::IncreasedBy(delta) => starting_balance.saturating_add(delta),
        }
    }
}

/// Concrete transaction fields handed to the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub data: Vec<u8>,
    pub value: U256,
    pub gas: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub status: TxStatus,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

/// Outcome of an `eth_call` dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    Success(Vec<u8>),
    /// Rejected by the node; carries the error detail it reported.
    Reverted(String),
}

impl CallResult {
    pub fn status(&self) -> TxStatus {
        match self {
            CallResult::Success(_) => TxStatus::Success,
            CallResult::Reverted(_) => TxStatus::Reverted,
        }
    }
}

/// Observed result of executing one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub status: TxStatus,
    pub gas_used: u64,
    pub balance_after: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum TestResult {
    Passed,
    Failed(String),
    Skipped(String),
}

impl TestResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, TestResult::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_passed: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
}

impl RunSummary {
    pub fn record(&mut self, result: &TestResult) {
        match result {
            TestResult::Passed => self.total_passed += 1,
            TestResult::Failed(_) => self.total_failed += 1,
            TestResult::Skipped(_) => self.total_skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.total_passed + self.total_failed + self.total_skipped
    }
}
