use anyhow::{Context, Result};
use clap::Parser;
use ethers::types::Address;
use evm_conformance::config::{
    GasBudget, HarnessConfig, ReceiptPolling, DEFAULT_RPC_URL, DEFAULT_TARGET_NETWORK,
    DEFAULT_WHALE,
};
use evm_conformance::{ConformanceRunner, RpcClient, Suite};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "evm-conformance")]
#[command(about = "Checks EVM call semantics of contracts and precompiles against a live node")]
#[command(version)]
struct Cli {
    /// JSON-RPC endpoint of the node under test
    #[arg(long, env = "E2E_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Name of the network the node belongs to
    #[arg(long, env = "E2E_NETWORK", default_value = "localhost")]
    network: String,

    /// Network on which precompile suites run
    #[arg(long, default_value = DEFAULT_TARGET_NETWORK)]
    target_network: String,

    /// Funded account, unlocked on the node, that signs every transaction
    #[arg(long, env = "E2E_WHALE_ADDRESS", default_value = DEFAULT_WHALE)]
    whale: Address,

    /// Directory holding the compiled fixture artifacts
    #[arg(long, env = "E2E_ARTIFACTS", default_value = "artifacts")]
    artifacts: PathBuf,

    /// Suite to run
    #[arg(long, value_enum, default_value = "all")]
    suite: Suite,

    #[arg(long, default_value = "30")]
    receipt_timeout_secs: u64,

    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,

    /// Expect the callee of a plain callcode to see the parent msg.value
    #[arg(long)]
    callcode_forwards_value: bool,

    /// Also write the report as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> HarnessConfig {
        HarnessConfig {
            rpc_url: self.rpc_url.clone(),
            network: self.network.clone(),
            target_network: self.target_network.clone(),
            whale: self.whale,
            artifacts_dir: self.artifacts.clone(),
            polling: ReceiptPolling {
                interval: Duration::from_millis(self.poll_interval_ms),
                timeout: Duration::from_secs(self.receipt_timeout_secs),
            },
            gas: GasBudget::default(),
            callcode_forwards_value: self.callcode_forwards_value,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .init();

    let config = cli.config();
    let client = RpcClient::new(&config.rpc_url);
    info!(
        "Running {} suites on {} via {}",
        cli.suite.name(),
        config.network,
        client.rpc_url()
    );

    let runner = ConformanceRunner::new(&client, &config);
    let report = runner.run(cli.suite).await;
    report.print();

    if let Some(path) = &cli.json {
        report
            .write_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
