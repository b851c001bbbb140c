use ethers::types::Address;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Funded, unlocked account of a kvtool node.
pub const DEFAULT_WHALE: &str = "0x03db6b11f47d074a532b9eb8a98ab7ada5845087";
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
/// Network name on which precompile suites run.
pub const DEFAULT_TARGET_NETWORK: &str = "kvtool";

/// Gas limits attached to generated transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasBudget {
    /// Direct call to the target.
    pub default_gas: u64,
    /// Any call routed through the relay or the peer caller.
    pub relay_gas: u64,
    /// Extra gas for `functionCallCode`, which re-enters the relay.
    pub callcode_headroom: u64,
    /// High-level call from the peer caller carrying value.
    pub high_level_value_gas: u64,
    /// Added on top of `relay_gas` for cases writing a fresh storage slot.
    pub storage_write_gas: u64,
}

impl Default for GasBudget {
    fn default() -> Self {
        Self {
            default_gas: 25_000,
            relay_gas: 35_000,
            callcode_headroom: 1_105,
            high_level_value_gas: 50_000,
            storage_write_gas: 202_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolling {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub rpc_url: String,
    /// Name of the network the harness is connected to.
    pub network: String,
    pub target_network: String,
    /// Funded, node-unlocked account signing every transaction.
    pub whale: Address,
    pub artifacts_dir: PathBuf,
    pub polling: ReceiptPolling,
    pub gas: GasBudget,
    /// Whether `functionCallCode` exposes the parent msg.value to the callee.
    pub callcode_forwards_value: bool,
}

impl HarnessConfig {
    /// Precompile suites only run against the target chain.
    pub fn target_chain_available(&self) -> bool {
        self.network == self.target_network
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            network: "localhost".to_string(),
            target_network: DEFAULT_TARGET_NETWORK.to_string(),
            whale: Address::from_str(DEFAULT_WHALE).unwrap_or_default(),
            artifacts_dir: PathBuf::from("artifacts"),
            polling: ReceiptPolling::default(),
            gas: GasBudget::default(),
            callcode_forwards_value: false,
        }
    }
}
