use crate::abi::{calculate_selector, Selector, EXTRA_DATA, SHORT_SELECTOR};
use crate::config::GasBudget;
use crate::error::{HarnessError, Result};
use crate::types::{CallStyle, TxRequest};
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};

// Relay (`Caller`) forwarding functions
pub const FUNCTION_CALL: &str = "functionCall(address,bytes)";
pub const FUNCTION_STATIC_CALL: &str = "functionStaticCall(address,bytes)";
pub const FUNCTION_DELEGATE_CALL: &str = "functionDelegateCall(address,bytes)";
pub const FUNCTION_CALL_CODE: &str = "functionCallCode(address,bytes)";
pub const FUNCTION_CALL_CODE_WITH_VALUE: &str =
    "functionCallCodeWithValue(address,uint256,bytes)";

/// Calldata handed to the contract under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Selector(Selector),
    SelectorWithExtraData(Selector),
    NonMatchingSelector,
    NonMatchingSelectorWithExtraData,
    ShortSelector,
    /// Fully encoded call, arguments included.
    Raw(Vec<u8>),
}

impl Payload {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Empty => Vec::new(),
            Payload::Selector(selector) => selector.0.to_vec(),
            Payload::SelectorWithExtraData(selector) => with_extra_data(selector),
            Payload::NonMatchingSelector => Selector::non_matching().0.to_vec(),
            Payload::NonMatchingSelectorWithExtraData => with_extra_data(&Selector::non_matching()),
            Payload::ShortSelector => SHORT_SELECTOR.to_vec(),
            Payload::Raw(data) => data.clone(),
        }
    }
}

fn with_extra_data(selector: &Selector) -> Vec<u8> {
    let mut data = selector.0.to_vec();
    data.push(EXTRA_DATA);
    data
}

/// Addresses a case may be routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTargets {
    /// Signer of every transaction.
    pub sender: Address,
    /// Contract (or precompile) under test.
    pub target: Address,
    /// Low-level relay exposing the `function*Call*` forwarders.
    pub relay: Address,
    /// Peer contract making Solidity high-level calls into `target`.
    pub peer_caller: Option<Address>,
}

fn relay_calldata(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = calculate_selector(signature).to_vec();
    data.extend(ethers::abi::encode(tokens));
    data
}

/// Wraps `payload` in the relay function implementing `style`.
///
/// Returns `None` for styles that do not go through the relay.
pub fn wrap_for_relay(style: CallStyle, target: Address, payload: Vec<u8>) -> Option<Vec<u8>> {
    let data = match style {
        CallStyle::Direct | CallStyle::HighLevel => return None,
        CallStyle::MessageCall => relay_calldata(
            FUNCTION_CALL,
            &[Token::Address(target), Token::Bytes(payload)],
        ),
        CallStyle::StaticCall => relay_calldata(
            FUNCTION_STATIC_CALL,
            &[Token::Address(target), Token::Bytes(payload)],
        ),
        CallStyle::DelegateCall => relay_calldata(
            FUNCTION_DELEGATE_CALL,
            &[Token::Address(target), Token::Bytes(payload)],
        ),
        CallStyle::CallCode => relay_calldata(
            FUNCTION_CALL_CODE,
            &[Token::Address(target), Token::Bytes(payload)],
        ),
        CallStyle::CallCodeWithValue(value) => relay_calldata(
            FUNCTION_CALL_CODE_WITH_VALUE,
            &[
                Token::Address(target),
                Token::Uint(value),
                Token::Bytes(payload),
            ],
        ),
    };
    Some(data)
}

/// Gas limit a style needs when no case-specific limit is given.
pub fn style_gas(style: CallStyle, value: U256, budget: &GasBudget) -> u64 {
    match style {
        CallStyle::Direct => budget.default_gas,
        CallStyle::HighLevel if !value.is_zero() => budget.high_level_value_gas,
        // functionCallCode re-enters the relay through functionCallCodeWithValue
        CallStyle::CallCode => budget.relay_gas + budget.callcode_headroom,
        _ => budget.relay_gas,
    }
}

/// Translate a logical call into concrete transaction fields.
pub fn build_request(
    targets: &CallTargets,
    style: CallStyle,
    payload: Vec<u8>,
    value: U256,
    gas: u64,
) -> Result<TxRequest> {
    let (to, data) = match style {
        CallStyle::Direct => (targets.target, payload),
        CallStyle::HighLevel => {
            let peer = targets.peer_caller.ok_or(HarnessError::MissingCaller {
                style: style.label(),
                missing: "peer caller",
                target: targets.target,
            })?;
            (peer, payload)
        }
        _ => {
            let wrapped = wrap_for_relay(style, targets.target, payload)
                .unwrap_or_default();
            (targets.relay, wrapped)
        }
    };

    Ok(TxRequest {
        from: Some(targets.sender),
        to: Some(to),
        data,
        value,
        gas: Some(gas),
    })
}

/// Unwrap the `bytes` returned by a relay forwarder.
pub fn decode_relay_return(data: &[u8]) -> Option<Vec<u8>> {
    ethers::abi::decode(&[ParamType::Bytes], data)
        .ok()?
        .into_iter()
        .next()?
        .into_bytes()
}

/// ABI-encode constructor arguments binding a peer caller to its target.
pub fn encode_peer_constructor(target: Address) -> Vec<u8> {
    ethers::abi::encode(&[Token::Address(target)])
}
