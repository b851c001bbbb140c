//! Executes cases against a [`ChainClient`] and checks every expectation.
//!
//! A mismatch fails the case that produced it and nothing else. Transport and
//! RPC errors fail the running case with the client's message.

use crate::abi::{keccak256, InterfaceDescriptor};
use crate::client::{wait_for_receipt, ChainClient};
use crate::config::{GasBudget, ReceiptPolling};
use crate::encoder::{build_request, decode_relay_return, style_gas, CallTargets};
use crate::gas::{empty_account_calldata, fresh_account, intrinsic_gas};
use crate::matrix::{CaseSpec, ContextCase, ContextCheck, Party};
use crate::types::{
    CallResult, CallStyle, Receipt, TestResult, TransactionOutcome, TxRequest, TxStatus,
};
use anyhow::{anyhow, bail, ensure, Result};
use ethers::abi::ParamType;
use ethers::types::{Address, H256, U256};
use tracing::debug;

pub const MSG_SENDER_EVENT: &str = "MsgSender(address)";
pub const MSG_VALUE_EVENT: &str = "MsgValue(uint256)";

/// A deployed contract (or precompile address) and the interface it implements.
#[derive(Debug, Clone)]
pub struct ContractUnderTest {
    pub name: String,
    pub address: Address,
    pub interface: InterfaceDescriptor,
    /// Peer contract making high-level calls into `address`.
    pub peer_caller: Option<Address>,
}

/// A [`CaseSpec`] bound to concrete addresses.
#[derive(Debug, Clone)]
pub struct CallCase {
    pub spec: CaseSpec,
    pub request: TxRequest,
    /// Account whose balance the case observes.
    pub observed: Address,
    pub gas: u64,
}

impl CallCase {
    pub fn encode(
        spec: &CaseSpec,
        contract: &ContractUnderTest,
        signer: Address,
        relay: Address,
        budget: &GasBudget,
    ) -> crate::error::Result<Self> {
        let targets = CallTargets {
            sender: signer,
            target: contract.address,
            relay,
            peer_caller: contract.peer_caller,
        };
        let gas = spec
            .gas
            .unwrap_or_else(|| style_gas(spec.style, spec.value, budget));
        let request = build_request(&targets, spec.style, spec.payload.to_bytes(), spec.value, gas)?;
        let observed = match spec.style {
            // value stays with the frame that runs the code
            CallStyle::DelegateCall | CallStyle::CallCode | CallStyle::CallCodeWithValue(_) => relay,
            _ => contract.address,
        };

        Ok(Self {
            spec: spec.clone(),
            request,
            observed,
            gas,
        })
    }
}

fn failed(name: &str, err: anyhow::Error) -> TestResult {
    TestResult::Failed(format!("{}: {:#}", name, err))
}

fn expect_status(stage: &str, expected: TxStatus, actual: TxStatus) -> Result<()> {
    ensure!(
        expected == actual,
        "{} expected {} but was {}",
        stage,
        expected,
        actual
    );
    Ok(())
}

pub struct AssertionEngine<'a, C: ChainClient + ?Sized> {
    client: &'a C,
    signer: Address,
    relay: Address,
    gas: GasBudget,
    polling: ReceiptPolling,
}

impl<'a, C: ChainClient + ?Sized> AssertionEngine<'a, C> {
    pub fn new(
        client: &'a C,
        signer: Address,
        relay: Address,
        gas: GasBudget,
        polling: ReceiptPolling,
    ) -> Self {
        Self {
            client,
            signer,
            relay,
            gas,
            polling,
        }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub async fn run_case(&self, contract: &ContractUnderTest, spec: &CaseSpec) -> TestResult {
        match self.execute_case(contract, spec).await {
            Ok(_) => TestResult::Passed,
            Err(e) => failed(&spec.name, e),
        }
    }

    /// Runs one case end to end and returns what was observed.
    pub async fn execute_case(
        &self,
        contract: &ContractUnderTest,
        spec: &CaseSpec,
    ) -> Result<TransactionOutcome> {
        let case = CallCase::encode(spec, contract, self.signer, self.relay, &self.gas)?;
        debug!(
            "{} / {} via {} -> {:?}",
            contract.name,
            spec.name,
            spec.style.label(),
            case.request.to
        );

        let starting_balance = self.client.balance(case.observed).await?;

        let simulated = self.client.call(&case.request).await?;
        expect_status("simulation", spec.expected, simulated.status())?;
        if let (Some(needle), CallResult::Reverted(detail)) = (spec.revert_detail, &simulated) {
            ensure!(
                detail.contains(needle),
                "revert detail {:?} does not contain {:?}",
                detail,
                needle
            );
        }

        let receipt = self.submit(&case.request).await?;
        expect_status("receipt status", spec.expected, receipt.status)?;
        ensure!(
            receipt.gas_used < case.gas,
            "gas used {} is not below the limit {}",
            receipt.gas_used,
            case.gas
        );

        let balance_after = self.client.balance(case.observed).await?;
        let expected_balance = spec.balance.apply(starting_balance);
        ensure!(
            balance_after == expected_balance,
            "balance of {:#x} is {} but expected {}",
            case.observed,
            balance_after,
            expected_balance
        );

        Ok(TransactionOutcome {
            status: receipt.status,
            gas_used: receipt.gas_used,
            balance_after,
        })
    }

    async fn submit(&self, request: &TxRequest) -> Result<Receipt> {
        let tx_hash = self.client.send_transaction(request).await?;
        Ok(wait_for_receipt(self.client, tx_hash, &self.polling).await?)
    }

    /// Code, nonce and balance at the contract address.
    pub async fn check_state(
        &self,
        address: Address,
        expected_code: &[u8],
    ) -> Vec<(String, TestResult)> {
        let code = async {
            let code = self.client.code(address).await?;
            ensure!(
                code == expected_code,
                "code is 0x{} but expected 0x{}",
                hex::encode(&code),
                hex::encode(expected_code)
            );
            Ok::<(), anyhow::Error>(())
        };
        let nonce = async {
            let nonce = self.client.nonce(address).await?;
            ensure!(nonce == 1, "nonce is {} but expected 1", nonce);
            Ok::<(), anyhow::Error>(())
        };
        let balance = async {
            let balance = self.client.balance(address).await?;
            ensure!(balance.is_zero(), "balance is {} but expected 0", balance);
            Ok::<(), anyhow::Error>(())
        };

        let mut results = Vec::new();
        for (name, outcome) in [
            ("has correct code set in state", code.await),
            ("has default nonce set", nonce.await),
            ("has correct starting balance", balance.await),
        ] {
            let result = match outcome {
                Ok(()) => TestResult::Passed,
                Err(e) => failed(name, e),
            };
            results.push((name.to_string(), result));
        }
        results
    }

    pub async fn run_context_case(
        &self,
        case: &ContextCase,
        inspector: Address,
        storage: Address,
    ) -> TestResult {
        match self.execute_context_case(case, inspector, storage).await {
            Ok(()) => TestResult::Passed,
            Err(e) => failed(case.name, e),
        }
    }

    async fn execute_context_case(
        &self,
        case: &ContextCase,
        inspector: Address,
        storage: Address,
    ) -> Result<()> {
        let implementation = match case.check {
            ContextCheck::StorageLocation { .. } => storage,
            _ => inspector,
        };
        let party = |party: Party| match party {
            Party::Signer => self.signer,
            Party::Relay => self.relay,
            Party::Implementation => implementation,
        };

        let targets = CallTargets {
            sender: self.signer,
            target: implementation,
            relay: self.relay,
            peer_caller: None,
        };
        let request = build_request(&targets, case.style, case.calldata(), case.value, case.gas)?;
        let simulated = self.client.call(&request).await?;

        if case.expect_rejection {
            expect_status("simulation", TxStatus::Reverted, simulated.status())?;
            if let (Some(needle), CallResult::Reverted(detail)) = (&case.revert_detail, &simulated) {
                ensure!(
                    detail.contains(needle.as_str()),
                    "revert detail {:?} does not contain {:?}",
                    detail,
                    needle
                );
            }
            return Ok(());
        }

        // a static call has nothing to submit; read the answer from the dry run
        if case.style == CallStyle::StaticCall {
            let ContextCheck::MsgSender { expected } = case.check else {
                bail!("static call can only observe msg.sender");
            };
            let data = match simulated {
                CallResult::Success(data) => data,
                CallResult::Reverted(detail) => bail!("simulation reverted: {}", detail),
            };
            let inner = decode_relay_return(&data)
                .ok_or_else(|| anyhow!("relay returned malformed bytes 0x{}", hex::encode(&data)))?;
            let sender = decode_address(&inner)?;
            ensure!(
                sender == party(expected),
                "msg.sender is {:#x} but expected {:#x}",
                sender,
                party(expected)
            );
            return Ok(());
        }

        expect_status("simulation", TxStatus::Success, simulated.status())?;

        let recipient = match case.check {
            ContextCheck::MsgValue { recipient, .. } => Some(party(recipient)),
            _ => None,
        };
        let starting_balance = match recipient {
            Some(address) => Some(self.client.balance(address).await?),
            None => None,
        };

        let receipt = self.submit(&request).await?;
        expect_status("receipt status", TxStatus::Success, receipt.status)?;
        ensure!(
            receipt.gas_used < case.gas,
            "gas used {} is not below the limit {}",
            receipt.gas_used,
            case.gas
        );

        match case.check {
            ContextCheck::MsgSender { expected } => {
                let data = single_event(&receipt, MSG_SENDER_EVENT)?;
                let sender = decode_address(data)?;
                ensure!(
                    sender == party(expected),
                    "msg.sender is {:#x} but expected {:#x}",
                    sender,
                    party(expected)
                );
            }
            ContextCheck::MsgValue { child_value, .. } => {
                let data = single_event(&receipt, MSG_VALUE_EVENT)?;
                let value = decode_uint(data)?;
                ensure!(
                    value == child_value,
                    "msg.value is {} but expected {}",
                    value,
                    child_value
                );
                if let (Some(address), Some(start)) = (recipient, starting_balance) {
                    let balance = self.client.balance(address).await?;
                    ensure!(
                        balance == start.saturating_add(case.value),
                        "balance of {:#x} is {} but expected {}",
                        address,
                        balance,
                        start.saturating_add(case.value)
                    );
                }
            }
            ContextCheck::StorageLocation { stored, owner } => {
                let owner = party(owner);
                let word = self.client.storage_at(owner, U256::zero()).await?;
                let value = U256::from_big_endian(word.as_bytes());
                ensure!(
                    value == stored,
                    "slot 0 of {:#x} holds {} but expected {}",
                    owner,
                    value,
                    stored
                );
            }
        }
        Ok(())
    }

    /// Checks a never-touched account and the exact cost of a call to it.
    pub async fn run_empty_account(&self) -> Vec<(String, TestResult)> {
        let account = match self.client.nonce(self.signer).await {
            Ok(nonce) => fresh_account(self.signer, nonce),
            Err(e) => {
                return vec![(
                    "empty account".to_string(),
                    failed("empty account", e.into()),
                )]
            }
        };
        debug!("Empty account under test: {:#x}", account);

        let mut results = Vec::new();
        let balance = async {
            let balance = self.client.balance(account).await?;
            ensure!(balance.is_zero(), "balance is {} but expected 0", balance);
            Ok::<(), anyhow::Error>(())
        };
        results.push(("has zero balance", balance.await));

        let code = async {
            let code = self.client.code(account).await?;
            ensure!(code.is_empty(), "code is 0x{}", hex::encode(&code));
            Ok::<(), anyhow::Error>(())
        };
        results.push(("has no code", code.await));

        let nonce = async {
            let nonce = self.client.nonce(account).await?;
            ensure!(nonce == 0, "nonce is {} but expected 0", nonce);
            Ok::<(), anyhow::Error>(())
        };
        results.push(("has zero nonce", nonce.await));

        let gas = async {
            let data = empty_account_calldata();
            let expected = intrinsic_gas(&data);
            let request = TxRequest {
                from: Some(self.signer),
                to: Some(account),
                data,
                value: U256::zero(),
                gas: Some(self.gas.default_gas),
            };
            let receipt = self.submit(&request).await?;
            expect_status("receipt status", TxStatus::Success, receipt.status)?;
            ensure!(
                receipt.gas_used == expected,
                "gas used {} but expected exactly {}",
                receipt.gas_used,
                expected
            );
            Ok::<(), anyhow::Error>(())
        };
        results.push(("uses only intrinsic gas for a call with data", gas.await));

        results
            .into_iter()
            .map(|(name, outcome): (&str, Result<()>)| {
                let result = match outcome {
                    Ok(()) => TestResult::Passed,
                    Err(e) => failed(name, e),
                };
                (name.to_string(), result)
            })
            .collect()
    }
}

/// Data of the only log in `receipt`, which must be `event`.
fn single_event<'r>(receipt: &'r Receipt, event: &str) -> Result<&'r [u8]> {
    ensure!(
        receipt.logs.len() == 1,
        "expected exactly one log, got {}",
        receipt.logs.len()
    );
    let log = &receipt.logs[0];
    let topic = H256::from(keccak256(event.as_bytes()));
    ensure!(
        log.topics.first() == Some(&topic),
        "log is not a {} event",
        event
    );
    Ok(&log.data)
}

fn decode_address(data: &[u8]) -> Result<Address> {
    ethers::abi::decode(&[ParamType::Address], data)?
        .into_iter()
        .next()
        .and_then(|token| token.into_address())
        .ok_or_else(|| anyhow!("expected an address, got 0x{}", hex::encode(data)))
}

fn decode_uint(data: &[u8]) -> Result<U256> {
    ethers::abi::decode(&[ParamType::Uint(256)], data)?
        .into_iter()
        .next()
        .and_then(|token| token.into_uint())
        .ok_or_else(|| anyhow!("expected a uint256, got 0x{}", hex::encode(data)))
}
