use crate::config::ReceiptPolling;
use crate::error::{HarnessError, Result};
use crate::types::{CallResult, Log, Receipt, TxRequest, TxStatus};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Gas limit used for fixture deployments.
const DEPLOY_GAS: u64 = 0x1000000;

/// Selector of `Error(string)`, the standard revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// JSON-RPC error code of `execution reverted` carrying revert data.
const EXECUTION_REVERTED: i64 = 3;
/// Generic server error, shared by EVM failures and node-side failures.
const SERVER_ERROR: i64 = -32000;

/// Message fragments of `-32000` errors raised while executing the call.
const EXECUTION_FAILURES: [&str; 7] = [
    "revert",
    "out of gas",
    "invalid opcode",
    "invalid jump",
    "stack",
    "non-payable",
    "not allowed",
];

/// The chain capabilities the harness consumes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn balance(&self, address: Address) -> Result<U256>;

    async fn code(&self, address: Address) -> Result<Vec<u8>>;

    async fn nonce(&self, address: Address) -> Result<u64>;

    async fn storage_at(&self, address: Address, slot: U256) -> Result<H256>;

    /// Dry-run a call against the latest state.
    async fn call(&self, request: &TxRequest) -> Result<CallResult>;

    async fn send_transaction(&self, request: &TxRequest) -> Result<H256>;

    /// `None` while the transaction is still pending.
    async fn receipt(&self, tx_hash: H256) -> Result<Option<Receipt>>;
}

/// Wait for a transaction to be mined
pub async fn wait_for_receipt<C: ChainClient + ?Sized>(
    client: &C,
    tx_hash: H256,
    polling: &ReceiptPolling,
) -> Result<Receipt> {
    let started = Instant::now();
    loop {
        if let Some(receipt) = client.receipt(tx_hash).await? {
            return Ok(receipt);
        }

        let waited = started.elapsed();
        if waited >= polling.timeout {
            return Err(HarnessError::ReceiptTimeout { tx_hash, waited });
        }

        tokio::time::sleep(polling.interval).await;
    }
}

/// Deploy a contract and return its address
pub async fn deploy_contract<C: ChainClient + ?Sized>(
    client: &C,
    from: Address,
    contract_name: &str,
    bytecode: &[u8],
    constructor_args: Option<&[u8]>,
    polling: &ReceiptPolling,
) -> Result<Address> {
    debug!("Deploying contract: {}", contract_name);

    let mut deployment_bytecode = bytecode.to_vec();
    if let Some(args) = constructor_args {
        deployment_bytecode.extend_from_slice(args);
    }

    let request = TxRequest {
        from: Some(from),
        to: None,
        data: deployment_bytecode,
        value: U256::zero(),
        gas: Some(DEPLOY_GAS),
    };

    let tx_hash = client.send_transaction(&request).await?;
    let receipt = wait_for_receipt(client, tx_hash, polling).await?;

    if receipt.status != TxStatus::Success {
        // Simulate the deployment to surface a revert reason
        let reason = match client.call(&request).await {
            Ok(CallResult::Reverted(detail)) => detail,
            _ => "Unknown revert reason".to_string(),
        };
        return Err(HarnessError::Deployment {
            name: contract_name.to_string(),
            reason: format!("transaction reverted: {}", reason),
        });
    }

    let address = receipt
        .contract_address
        .ok_or_else(|| HarnessError::Deployment {
            name: contract_name.to_string(),
            reason: "no contract address in receipt".to_string(),
        })?;

    debug!("Contract {} deployed at: {:#x}", contract_name, address);
    Ok(address)
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    result: Option<Value>,
    error: Option<JsonRpcError>,
    id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "contractAddress")]
    contract_address: Option<String>,
    status: Option<String>,
    #[serde(rename = "gasUsed")]
    gas_used: String,
    #[serde(default)]
    logs: Vec<RawLog>,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    data: String,
}

/// `ChainClient` speaking Ethereum JSON-RPC over HTTP.
pub struct RpcClient {
    rpc_url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(rpc_url: &str) -> Self {
        debug!("Using JSON-RPC endpoint: {}", rpc_url);
        Self {
            rpc_url: rpc_url.to_string(),
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        debug!("-> {} {}", method, request.params);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|source| HarnessError::Transport {
                method: method.to_string(),
                source,
            })?;

        let rpc_response: JsonRpcResponse =
            response
                .json()
                .await
                .map_err(|source| HarnessError::Transport {
                    method: method.to_string(),
                    source,
                })?;

        if let Some(error) = rpc_response.error {
            if method == "eth_sendTransaction"
                && (error.code == -32601 || error.message.contains("not supported"))
            {
                warn!(
                    "{} does not accept eth_sendTransaction; the signer account must be unlocked on the node",
                    self.rpc_url
                );
            }
            return Err(HarnessError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        // A null result is valid for pending receipts
        Ok(rpc_response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn balance(&self, address: Address) -> Result<U256> {
        let result = self
            .rpc_call("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_u256("eth_getBalance", &result)
    }

    async fn code(&self, address: Address) -> Result<Vec<u8>> {
        let result = self
            .rpc_call("eth_getCode", json!([address, "latest"]))
            .await?;
        parse_bytes("eth_getCode", &result)
    }

    async fn nonce(&self, address: Address) -> Result<u64> {
        let result = self
            .rpc_call("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        parse_u64("eth_getTransactionCount", &result)
    }

    async fn storage_at(&self, address: Address, slot: U256) -> Result<H256> {
        let result = self
            .rpc_call("eth_getStorageAt", json!([address, slot, "latest"]))
            .await?;
        let bytes = parse_bytes("eth_getStorageAt", &result)?;
        if bytes.len() > 32 {
            return Err(HarnessError::malformed(
                "eth_getStorageAt",
                format!("{} byte storage word", bytes.len()),
            ));
        }
        // Some nodes strip leading zeros from the word
        let mut word = [0u8; 32];
        word[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(H256::from(word))
    }

    async fn call(&self, request: &TxRequest) -> Result<CallResult> {
        let params = json!([tx_object(request), "latest"]);
        match self.rpc_call("eth_call", params).await {
            Ok(result) => Ok(CallResult::Success(parse_bytes("eth_call", &result)?)),
            Err(HarnessError::Rpc {
                code,
                message,
                data,
            }) if is_execution_failure(code, &message, data.as_ref()) => {
                Ok(CallResult::Reverted(revert_detail(&message, data.as_ref())))
            }
            Err(e) => Err(e),
        }
    }

    async fn send_transaction(&self, request: &TxRequest) -> Result<H256> {
        let result = self
            .rpc_call("eth_sendTransaction", json!([tx_object(request)]))
            .await?;
        parse_h256("eth_sendTransaction", &result)
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<Receipt>> {
        let result = self
            .rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let raw: RawReceipt = serde_json::from_value(result)
            .map_err(|e| HarnessError::malformed("eth_getTransactionReceipt", e.to_string()))?;
        parse_receipt(raw).map(Some)
    }
}

fn tx_object(request: &TxRequest) -> Value {
    let mut tx = serde_json::Map::new();
    if let Some(from) = request.from {
        tx.insert("from".to_string(), json!(from));
    }
    if let Some(to) = request.to {
        tx.insert("to".to_string(), json!(to));
    }
    tx.insert(
        "data".to_string(),
        json!(format!("0x{}", hex::encode(&request.data))),
    );
    tx.insert("value".to_string(), json!(request.value));
    if let Some(gas) = request.gas {
        tx.insert("gas".to_string(), json!(format!("0x{:x}", gas)));
    }
    Value::Object(tx)
}

/// Whether an `eth_call` error is the call failing rather than the node.
fn is_execution_failure(code: i64, message: &str, data: Option<&Value>) -> bool {
    if code == EXECUTION_REVERTED {
        return true;
    }
    if code != SERVER_ERROR {
        return false;
    }
    let has_revert_data = data
        .and_then(Value::as_str)
        .map_or(false, |d| d.len() > 2 && d.starts_with("0x"));
    let message = message.to_lowercase();
    has_revert_data || EXECUTION_FAILURES.iter().any(|m| message.contains(m))
}

/// Error detail reported for a rejected `eth_call`, with any
/// `Error(string)` reason carried in the error data appended.
fn revert_detail(message: &str, data: Option<&Value>) -> String {
    let clean = message.replace('\n', " ").replace('\r', " ").trim().to_string();
    let reason = data
        .and_then(Value::as_str)
        .and_then(|hex_str| hex::decode(hex_str.trim_start_matches("0x")).ok())
        .and_then(|bytes| decode_error_string(&bytes));

    match reason {
        Some(reason) if !clean.contains(&reason) => format!("{}: {}", clean, reason),
        _ => clean,
    }
}

fn decode_error_string(revert_data: &[u8]) -> Option<String> {
    let payload = revert_data.strip_prefix(&ERROR_STRING_SELECTOR[..])?;
    ethers::abi::decode(&[ethers::abi::ParamType::String], payload)
        .ok()?
        .into_iter()
        .next()?
        .into_string()
}

fn parse_receipt(raw: RawReceipt) -> Result<Receipt> {
    const METHOD: &str = "eth_getTransactionReceipt";

    let status = match raw.status.as_deref() {
        Some("0x1") | Some("1") => TxStatus::Success,
        Some(_) => TxStatus::Reverted,
        None => return Err(HarnessError::malformed(METHOD, "receipt without status")),
    };

    let contract_address = raw
        .contract_address
        .as_deref()
        .map(|a| parse_address(METHOD, a))
        .transpose()?;

    let logs = raw
        .logs
        .iter()
        .map(|log| -> Result<Log> {
            Ok(Log {
                address: parse_address(METHOD, &log.address)?,
                topics: log
                    .topics
                    .iter()
                    .map(|t| parse_h256(METHOD, &Value::String(t.clone())))
                    .collect::<Result<Vec<_>>>()?,
                data: decode_hex(METHOD, &log.data)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Receipt {
        transaction_hash: parse_h256(METHOD, &Value::String(raw.transaction_hash))?,
        status,
        gas_used: parse_u64(METHOD, &Value::String(raw.gas_used))?,
        contract_address,
        logs,
    })
}

fn as_str<'a>(method: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| HarnessError::malformed(method, format!("expected hex string, got {}", value)))
}

fn decode_hex(method: &str, hex_str: &str) -> Result<Vec<u8>> {
    let clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(clean).map_err(|e| HarnessError::malformed(method, e.to_string()))
}

fn parse_bytes(method: &str, value: &Value) -> Result<Vec<u8>> {
    decode_hex(method, as_str(method, value)?)
}

fn parse_u256(method: &str, value: &Value) -> Result<U256> {
    let hex_str = as_str(method, value)?;
    let clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    U256::from_str_radix(clean, 16).map_err(|e| HarnessError::malformed(method, format!("{:?}", e)))
}

fn parse_u64(method: &str, value: &Value) -> Result<u64> {
    let hex_str = as_str(method, value)?;
    let clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u64::from_str_radix(clean, 16).map_err(|e| HarnessError::malformed(method, e.to_string()))
}

fn parse_h256(method: &str, value: &Value) -> Result<H256> {
    let bytes = parse_bytes(method, value)?;
    if bytes.len() != 32 {
        return Err(HarnessError::malformed(
            method,
            format!("expected 32 byte hash, got {} bytes", bytes.len()),
        ));
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_address(method: &str, address: &str) -> Result<Address> {
    Address::from_str(address).map_err(|e| HarnessError::malformed(method, e.to_string()))
}
