//! In-memory chain implementing `ChainClient`.
//!
//! Contracts are modelled by behaviour rather than bytecode: each deployable
//! artifact is registered with a `Kind`, matched by creation-code prefix.
//! Dispatch follows Solidity routing through `InterfaceDescriptor::route`, and
//! the relay implements call/staticcall/delegatecall/callcode context rules.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, H256, U256};
use evm_conformance::abi::{calculate_selector, keccak256, InterfaceDescriptor, Route};
use evm_conformance::config::{GasBudget, HarnessConfig, ReceiptPolling};
use evm_conformance::encoder::{
    FUNCTION_CALL, FUNCTION_CALL_CODE, FUNCTION_CALL_CODE_WITH_VALUE, FUNCTION_DELEGATE_CALL,
    FUNCTION_STATIC_CALL,
};
use evm_conformance::fixtures::{precompile_address, DISABLED_FIXTURE, NOOP_FIXTURES};
use evm_conformance::gas::intrinsic_gas;
use evm_conformance::matrix::{non_payable_detail, DISABLED_REVERT_DETAIL};
use evm_conformance::types::{CallResult, Log, Receipt, TxRequest, TxStatus};
use evm_conformance::ChainClient;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

pub const WHALE: &str = "0x03db6b11f47d074a532b9eb8a98ab7ada5845087";

/// Gas charged per executed code frame on top of the intrinsic cost.
const FRAME_GAS: u64 = 700;

#[derive(Debug, Clone)]
pub enum Kind {
    Interface {
        interface: InterfaceDescriptor,
        disabled: bool,
    },
    Relay,
    PeerCaller {
        target: Address,
    },
    ContextInspector,
    StorageBasic,
}

#[derive(Debug, Clone, Default)]
struct Account {
    balance: U256,
    nonce: u64,
    code: Vec<u8>,
    storage: HashMap<U256, U256>,
    kind: Option<Kind>,
}

#[derive(Debug, Clone)]
struct Deployable {
    creation: Vec<u8>,
    runtime: Vec<u8>,
    kind: Kind,
    /// Reads the peer caller's target from the trailing constructor word.
    takes_target: bool,
}

#[derive(Debug, Clone, Default)]
struct State {
    accounts: HashMap<Address, Account>,
    logs: Vec<Log>,
    frames: u64,
}

/// Execution context of one code frame.
#[derive(Debug, Clone)]
struct Context {
    caller: Address,
    /// Account whose storage, balance and logs the frame uses.
    address: Address,
    value: U256,
    data: Vec<u8>,
    is_static: bool,
}

type Exec = std::result::Result<Vec<u8>, String>;

pub struct FakeChain {
    state: Mutex<State>,
    deployables: Vec<Deployable>,
    receipts: Mutex<HashMap<H256, Receipt>>,
    /// Receipts reported as pending on their first poll.
    pending: Mutex<HashSet<H256>>,
    tx_count: Mutex<u64>,
    callcode_forwards_value: bool,
    /// Replaces the relay's reason for rejecting a valued static call.
    static_value_rejection: Option<String>,
    /// Receipts are never mined.
    stalled: bool,
}

fn word_address(data: &[u8]) -> Address {
    Address::from_slice(&data[data.len() - 20..])
}

fn encode_bytes(data: Vec<u8>) -> Vec<u8> {
    ethers::abi::encode(&[Token::Bytes(data)])
}

impl FakeChain {
    pub fn new(fixtures: &FixtureSet) -> Self {
        let mut state = State::default();
        state.accounts.insert(
            whale(),
            Account {
                balance: U256::exp10(24),
                ..Default::default()
            },
        );

        let chain = Self {
            state: Mutex::new(state),
            deployables: fixtures.deployables.clone(),
            receipts: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            tx_count: Mutex::new(0),
            callcode_forwards_value: false,
            static_value_rejection: None,
            stalled: false,
        };
        for fixture in NOOP_FIXTURES.iter() {
            chain.install_precompile(
                fixture.precompile,
                fixtures.interface(fixture.interface),
                false,
            );
        }
        chain.install_precompile(
            DISABLED_FIXTURE.precompile,
            fixtures.interface(DISABLED_FIXTURE.interface),
            true,
        );
        chain
    }

    pub fn with_callcode_forwarding(mut self) -> Self {
        self.callcode_forwards_value = true;
        self
    }

    pub fn with_static_value_rejection(mut self, reason: &str) -> Self {
        self.static_value_rejection = Some(reason.to_string());
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Replace the behaviour behind a precompile address.
    pub fn install_precompile(&self, index: u8, interface: InterfaceDescriptor, disabled: bool) {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(
            precompile_address(index),
            Account {
                nonce: 1,
                code: vec![0x01],
                kind: Some(Kind::Interface {
                    interface,
                    disabled,
                }),
                ..Default::default()
            },
        );
    }

    pub fn storage(&self, address: Address, slot: u64) -> U256 {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&U256::from(slot)).copied())
            .unwrap_or_default()
    }

    pub fn transaction_count(&self) -> u64 {
        *self.tx_count.lock().unwrap()
    }

    fn kind_of(state: &State, address: Address) -> Option<Kind> {
        state.accounts.get(&address).and_then(|a| a.kind.clone())
    }

    fn transfer(state: &mut State, from: Address, to: Address, value: U256) -> Exec {
        if value.is_zero() {
            return Ok(vec![]);
        }
        let sender = state.accounts.entry(from).or_default();
        if sender.balance < value {
            return Err("insufficient balance".to_string());
        }
        sender.balance -= value;
        state.accounts.entry(to).or_default().balance += value;
        Ok(vec![])
    }

    fn call(
        &self,
        state: &mut State,
        caller: Address,
        to: Address,
        value: U256,
        data: Vec<u8>,
        is_static: bool,
    ) -> Exec {
        if is_static && !value.is_zero() {
            return Err("value transfer in static context".to_string());
        }
        Self::transfer(state, caller, to, value)?;
        match Self::kind_of(state, to) {
            None => Ok(vec![]),
            Some(kind) => self.run_code(
                state,
                &kind,
                Context {
                    caller,
                    address: to,
                    value,
                    data,
                    is_static,
                },
            ),
        }
    }

    /// Runs `code`'s behaviour inside the relay's own context.
    fn call_code(&self, state: &mut State, ctx: &Context, code: Address, value: U256, data: Vec<u8>) -> Exec {
        let balance = state.accounts.get(&ctx.address).map(|a| a.balance).unwrap_or_default();
        if balance < value {
            return Err("insufficient balance".to_string());
        }
        match Self::kind_of(state, code) {
            None => Ok(vec![]),
            Some(kind) => self.run_code(
                state,
                &kind,
                Context {
                    caller: ctx.address,
                    address: ctx.address,
                    value,
                    data,
                    is_static: ctx.is_static,
                },
            ),
        }
    }

    fn run_code(&self, state: &mut State, kind: &Kind, ctx: Context) -> Exec {
        state.frames += 1;
        match kind {
            Kind::Interface {
                disabled: true, ..
            } => Err(DISABLED_REVERT_DETAIL.to_string()),
            Kind::Interface { interface, .. } => {
                let route = interface.route(&ctx.data);
                if matches!(route, Route::Unroutable) {
                    return Err("no matching function".to_string());
                }
                if !ctx.value.is_zero() && !interface.route_accepts_value(route) {
                    return Err("non-payable".to_string());
                }
                Ok(vec![])
            }
            Kind::PeerCaller { target } => {
                self.call(state, ctx.address, *target, ctx.value, ctx.data.clone(), ctx.is_static)
            }
            Kind::Relay => self.run_relay(state, &ctx),
            Kind::ContextInspector => {
                let selector = ctx.data.get(..4).unwrap_or_default();
                if selector == calculate_selector("getMsgSender()") {
                    return Ok(ethers::abi::encode(&[Token::Address(ctx.caller)]));
                }
                let (event, data) = if selector == calculate_selector("emitMsgSender()") {
                    if !ctx.value.is_zero() {
                        return Err("non-payable".to_string());
                    }
                    ("MsgSender(address)", ethers::abi::encode(&[Token::Address(ctx.caller)]))
                } else if selector == calculate_selector("emitMsgValue()") {
                    ("MsgValue(uint256)", ethers::abi::encode(&[Token::Uint(ctx.value)]))
                } else {
                    return Err("no matching function".to_string());
                };
                if ctx.is_static {
                    return Err("log in static context".to_string());
                }
                state.logs.push(Log {
                    address: ctx.address,
                    topics: vec![H256::from(keccak256(event.as_bytes()))],
                    data,
                });
                Ok(vec![])
            }
            Kind::StorageBasic => {
                if ctx.data.get(..4) != Some(&calculate_selector("setStorageValue(uint256)")[..]) {
                    return Err("no matching function".to_string());
                }
                if ctx.is_static {
                    return Err("state change in static context".to_string());
                }
                let value = ethers::abi::decode(&[ParamType::Uint(256)], &ctx.data[4..])
                    .map_err(|e| e.to_string())?
                    .remove(0)
                    .into_uint()
                    .unwrap_or_default();
                state
                    .accounts
                    .entry(ctx.address)
                    .or_default()
                    .storage
                    .insert(U256::zero(), value);
                Ok(vec![])
            }
        }
    }

    fn run_relay(&self, state: &mut State, ctx: &Context) -> Exec {
        let selector = ctx.data.get(..4).ok_or("no selector")?;
        let args = &ctx.data[4..];
        let target_and_data = || -> std::result::Result<(Address, Vec<u8>), String> {
            let mut tokens = ethers::abi::decode(&[ParamType::Address, ParamType::Bytes], args)
                .map_err(|e| e.to_string())?;
            let data = tokens.pop().and_then(Token::into_bytes).unwrap_or_default();
            let target = tokens.pop().and_then(Token::into_address).unwrap_or_default();
            Ok((target, data))
        };

        if selector == calculate_selector(FUNCTION_CALL) {
            let (target, data) = target_and_data()?;
            let out = self.call(state, ctx.address, target, ctx.value, data, ctx.is_static)?;
            Ok(encode_bytes(out))
        } else if selector == calculate_selector(FUNCTION_STATIC_CALL) {
            if !ctx.value.is_zero() {
                return Err(self
                    .static_value_rejection
                    .clone()
                    .unwrap_or_else(|| non_payable_detail(ctx.value)));
            }
            let (target, data) = target_and_data()?;
            let out = self.call(state, ctx.address, target, U256::zero(), data, true)?;
            Ok(encode_bytes(out))
        } else if selector == calculate_selector(FUNCTION_DELEGATE_CALL) {
            let (target, data) = target_and_data()?;
            let out = match Self::kind_of(state, target) {
                None => vec![],
                Some(kind) => self.run_code(
                    state,
                    &kind,
                    Context {
                        data,
                        ..ctx.clone()
                    },
                )?,
            };
            Ok(encode_bytes(out))
        } else if selector == calculate_selector(FUNCTION_CALL_CODE) {
            let (target, data) = target_and_data()?;
            let value = if self.callcode_forwards_value {
                ctx.value
            } else {
                U256::zero()
            };
            let out = self.call_code(state, ctx, target, value, data)?;
            Ok(encode_bytes(out))
        } else if selector == calculate_selector(FUNCTION_CALL_CODE_WITH_VALUE) {
            let mut tokens = ethers::abi::decode(
                &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
                args,
            )
            .map_err(|e| e.to_string())?;
            let data = tokens.pop().and_then(Token::into_bytes).unwrap_or_default();
            let value = tokens.pop().and_then(Token::into_uint).unwrap_or_default();
            let target = tokens.pop().and_then(Token::into_address).unwrap_or_default();
            let out = self.call_code(state, ctx, target, value, data)?;
            Ok(encode_bytes(out))
        } else {
            Err("no matching function".to_string())
        }
    }

    fn deploy(&self, state: &mut State, from: Address, data: &[u8]) -> std::result::Result<Address, String> {
        let deployable = self
            .deployables
            .iter()
            .find(|d| data.starts_with(&d.creation))
            .ok_or("unknown creation code")?;
        let kind = match (&deployable.kind, deployable.takes_target) {
            (Kind::PeerCaller { .. }, true) if data.len() >= deployable.creation.len() + 32 => {
                Kind::PeerCaller {
                    target: word_address(data),
                }
            }
            (_, true) => return Err("missing constructor argument".to_string()),
            (kind, false) => kind.clone(),
        };

        let nonce = state.accounts.get(&from).map(|a| a.nonce).unwrap_or_default();
        let mut seed = from.as_bytes().to_vec();
        seed.extend_from_slice(&nonce.to_be_bytes());
        let address = Address::from_slice(&keccak256(&seed)[12..]);
        state.accounts.insert(
            address,
            Account {
                nonce: 1,
                code: deployable.runtime.clone(),
                kind: Some(kind),
                ..Default::default()
            },
        );
        Ok(address)
    }

    /// Executes `request` on a copy of the state.
    fn execute(
        &self,
        state: &State,
        request: &TxRequest,
    ) -> (State, std::result::Result<(Vec<u8>, Option<Address>), String>) {
        let mut scratch = state.clone();
        scratch.logs.clear();
        scratch.frames = 0;
        let from = request.from.unwrap_or_else(whale);
        let outcome = match request.to {
            None => self
                .deploy(&mut scratch, from, &request.data)
                .map(|address| (vec![], Some(address))),
            Some(to) => self
                .call(&mut scratch, from, to, request.value, request.data.clone(), false)
                .map(|out| (out, None)),
        };
        (scratch, outcome)
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn balance(&self, address: Address) -> evm_conformance::Result<U256> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(&address).map(|a| a.balance).unwrap_or_default())
    }

    async fn code(&self, address: Address) -> evm_conformance::Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(&address).map(|a| a.code.clone()).unwrap_or_default())
    }

    async fn nonce(&self, address: Address) -> evm_conformance::Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(&address).map(|a| a.nonce).unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: U256) -> evm_conformance::Result<H256> {
        let state = self.state.lock().unwrap();
        let value = state
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&slot).copied())
            .unwrap_or_default();
        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        Ok(H256::from(word))
    }

    async fn call(&self, request: &TxRequest) -> evm_conformance::Result<CallResult> {
        let state = self.state.lock().unwrap();
        let (_, outcome) = self.execute(&state, request);
        Ok(match outcome {
            Ok((out, _)) => CallResult::Success(out),
            Err(detail) => CallResult::Reverted(format!("execution reverted: {}", detail)),
        })
    }

    async fn send_transaction(&self, request: &TxRequest) -> evm_conformance::Result<H256> {
        let mut state = self.state.lock().unwrap();
        let from = request.from.unwrap_or_else(whale);
        let (scratch, outcome) = self.execute(&state, request);
        let frames = scratch.frames;

        let (status, contract_address, logs) = match outcome {
            Ok((_, address)) => {
                let logs = scratch.logs.clone();
                *state = scratch;
                (TxStatus::Success, address, logs)
            }
            Err(_) => (TxStatus::Reverted, None, vec![]),
        };
        state.accounts.entry(from).or_default().nonce += 1;
        state.logs.clear();

        let mut count = self.tx_count.lock().unwrap();
        *count += 1;
        let tx_hash = H256::from(keccak256(&count.to_be_bytes()));

        let mut gas_used = intrinsic_gas(&request.data) + frames * FRAME_GAS;
        if let Some(limit) = request.gas {
            gas_used = gas_used.min(limit);
        }
        self.receipts.lock().unwrap().insert(
            tx_hash,
            Receipt {
                transaction_hash: tx_hash,
                status,
                gas_used,
                contract_address,
                logs,
            },
        );
        self.pending.lock().unwrap().insert(tx_hash);
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: H256) -> evm_conformance::Result<Option<Receipt>> {
        if self.stalled {
            return Ok(None);
        }
        if self.pending.lock().unwrap().remove(&tx_hash) {
            return Ok(None);
        }
        Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
    }
}

pub fn whale() -> Address {
    Address::from_str(WHALE).unwrap()
}

pub fn noop_abi(receive: bool, fallback: Option<&str>) -> Value {
    let mut abi = vec![
        json!({"inputs": [], "name": "noopPure", "outputs": [], "stateMutability": "pure", "type": "function"}),
        json!({"inputs": [], "name": "noopView", "outputs": [], "stateMutability": "view", "type": "function"}),
        json!({"inputs": [], "name": "noopNonpayable", "outputs": [], "stateMutability": "nonpayable", "type": "function"}),
        json!({"inputs": [], "name": "noopPayable", "outputs": [], "stateMutability": "payable", "type": "function"}),
    ];
    if receive {
        abi.push(json!({"stateMutability": "payable", "type": "receive"}));
    }
    if let Some(mutability) = fallback {
        abi.push(json!({"stateMutability": mutability, "type": "fallback"}));
    }
    Value::Array(abi)
}

fn context_inspector_abi() -> Value {
    json!([
        {"anonymous": false, "inputs": [{"indexed": false, "name": "sender", "type": "address"}], "name": "MsgSender", "type": "event"},
        {"anonymous": false, "inputs": [{"indexed": false, "name": "value", "type": "uint256"}], "name": "MsgValue", "type": "event"},
        {"inputs": [], "name": "emitMsgSender", "outputs": [], "stateMutability": "nonpayable", "type": "function"},
        {"inputs": [], "name": "emitMsgValue", "outputs": [], "stateMutability": "payable", "type": "function"},
        {"inputs": [], "name": "getMsgSender", "outputs": [{"name": "", "type": "address"}], "stateMutability": "view", "type": "function"}
    ])
}

fn storage_basic_abi() -> Value {
    json!([
        {"inputs": [{"name": "value", "type": "uint256"}], "name": "setStorageValue", "outputs": [], "stateMutability": "nonpayable", "type": "function"}
    ])
}

/// Artifacts written to disk plus the behaviours the fake chain gives them.
pub struct FixtureSet {
    pub dir: tempfile::TempDir,
    deployables: Vec<Deployable>,
    interfaces: HashMap<String, InterfaceDescriptor>,
}

impl FixtureSet {
    pub fn new() -> Self {
        let mut set = Self {
            dir: tempfile::tempdir().unwrap(),
            deployables: Vec::new(),
            interfaces: HashMap::new(),
        };

        let noop_shapes: [(&str, bool, Option<&str>); 6] = [
            ("NoopNoReceiveNoFallback", false, None),
            ("NoopReceiveNoFallback", true, None),
            ("NoopReceivePayableFallback", true, Some("payable")),
            ("NoopReceiveNonpayableFallback", true, Some("nonpayable")),
            ("NoopNoReceivePayableFallback", false, Some("payable")),
            ("NoopNoReceiveNonpayableFallback", false, Some("nonpayable")),
        ];
        for (name, receive, fallback) in noop_shapes {
            let abi = noop_abi(receive, fallback);
            let interface = InterfaceDescriptor::from_json(name, &abi).unwrap();
            set.write_interface(name, &abi);
            set.add_contract(
                &format!("{}Mock", name),
                &abi,
                Kind::Interface {
                    interface: interface.clone(),
                    disabled: false,
                },
                false,
            );
            set.interfaces.insert(name.to_string(), interface);
        }

        let disabled_abi = noop_abi(true, Some("payable"));
        let disabled = InterfaceDescriptor::from_json("NoopDisabledMock", &disabled_abi).unwrap();
        set.add_contract(
            "NoopDisabledMock",
            &disabled_abi,
            Kind::Interface {
                interface: disabled,
                disabled: true,
            },
            false,
        );

        set.add_contract("Caller", &json!([]), Kind::Relay, false);
        set.add_contract(
            "NoopCaller",
            &json!([{"inputs": [{"name": "_target", "type": "address"}], "stateMutability": "nonpayable", "type": "constructor"},
                    {"stateMutability": "payable", "type": "fallback"}]),
            Kind::PeerCaller {
                target: Address::zero(),
            },
            true,
        );

        set.write_interface("ContextInspector", &context_inspector_abi());
        set.add_contract(
            "ContextInspectorMock",
            &context_inspector_abi(),
            Kind::ContextInspector,
            false,
        );
        set.write_interface("StorageBasic", &storage_basic_abi());
        set.add_contract("StorageBasicMock", &storage_basic_abi(), Kind::StorageBasic, false);
        set
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn interface(&self, name: &str) -> InterfaceDescriptor {
        self.interfaces[name].clone()
    }

    pub fn config(&self, network: &str) -> HarnessConfig {
        HarnessConfig {
            rpc_url: "memory".to_string(),
            network: network.to_string(),
            target_network: "kvtool".to_string(),
            whale: whale(),
            artifacts_dir: self.path().to_path_buf(),
            polling: ReceiptPolling {
                interval: Duration::from_millis(1),
                timeout: Duration::from_secs(5),
            },
            gas: GasBudget::default(),
            callcode_forwards_value: false,
        }
    }

    /// Removes an artifact so suites depending on it abort.
    pub fn remove(&self, name: &str) {
        std::fs::remove_file(self.artifact_path(name)).unwrap();
    }

    fn artifact_path(&self, name: &str) -> std::path::PathBuf {
        self.path()
            .join("contracts")
            .join(format!("{}.sol", name))
            .join(format!("{}.json", name))
    }

    fn write_artifact(&self, name: &str, abi: &Value, creation: &[u8], runtime: &[u8]) {
        let path = self.artifact_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let artifact = json!({
            "_format": "hh-sol-artifact-1",
            "contractName": name,
            "abi": abi,
            "bytecode": format!("0x{}", hex::encode(creation)),
            "deployedBytecode": format!("0x{}", hex::encode(runtime)),
        });
        std::fs::write(path, serde_json::to_string_pretty(&artifact).unwrap()).unwrap();
    }

    fn write_interface(&self, name: &str, abi: &Value) {
        self.write_artifact(name, abi, &[], &[]);
    }

    fn add_contract(&mut self, name: &str, abi: &Value, kind: Kind, takes_target: bool) {
        let mut creation = vec![0x60, 0x80, 0x60, 0x40, 0x52];
        creation.extend_from_slice(&keccak256(name.as_bytes())[..8]);
        let mut runtime = vec![0x60, 0x80, 0x60, 0x40];
        runtime.extend_from_slice(&keccak256(name.as_bytes())[8..16]);
        self.write_artifact(name, abi, &creation, &runtime);
        self.deployables.push(Deployable {
            creation,
            runtime,
            kind,
            takes_target,
        });
    }
}
