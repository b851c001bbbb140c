//! Derives conformance cases from the shape of an ABI.
//!
//! Every case comes from a static template table. A template names the call
//! style, the calldata shape, the value sent and the expected outcome, and is
//! guarded by a [`Requirement`] evaluated once against the function and the
//! contract's `receive`/`fallback` entries. Nothing here touches the chain.

use crate::abi::{AbiFunction, InterfaceDescriptor, Selector, SpecialFunction};
use crate::config::GasBudget;
use crate::encoder::Payload;
use crate::types::{BalanceExpectation, CallStyle, TxStatus};
use ethers::types::U256;

/// Revert detail reported by a disabled precompile.
pub const DISABLED_REVERT_DETAIL: &str = "call not allowed to disabled contract";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Always,
    ViewOrPure,
    Payable,
    NotPayable,
    /// A receive entry or a fallback of any mutability.
    ReceiveOrFallback,
    NeitherReceiveNorFallback,
    /// A receive entry or a payable fallback.
    AcceptsPlainValue,
    RejectsPlainValue,
    HasFallback,
    NoFallback,
    PayableFallback,
    NonpayableFallback,
}

impl Requirement {
    pub fn holds(
        self,
        function: Option<&AbiFunction>,
        receive: Option<&SpecialFunction>,
        fallback: Option<&SpecialFunction>,
    ) -> bool {
        let mutability = function.map(|f| f.mutability);
        let payable_fallback = fallback.map_or(false, |f| f.is_payable());
        match self {
            Requirement::Always => true,
            Requirement::ViewOrPure => mutability.map_or(false, |m| m.is_read_only()),
            Requirement::Payable => mutability.map_or(false, |m| m.is_payable()),
            Requirement::NotPayable => mutability.map_or(false, |m| !m.is_payable()),
            Requirement::ReceiveOrFallback => receive.is_some() || fallback.is_some(),
            Requirement::NeitherReceiveNorFallback => receive.is_none() && fallback.is_none(),
            Requirement::AcceptsPlainValue => receive.is_some() || payable_fallback,
            Requirement::RejectsPlainValue => receive.is_none() && !payable_fallback,
            Requirement::HasFallback => fallback.is_some(),
            Requirement::NoFallback => fallback.is_none(),
            Requirement::PayableFallback => payable_fallback,
            Requirement::NonpayableFallback => fallback.is_some() && !payable_fallback,
        }
    }
}

/// Calldata shape of a template; resolved against a function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Empty,
    Selector,
    SelectorWithExtraData,
    NonMatchingSelector,
    NonMatchingSelectorWithExtraData,
    ShortSelector,
}

impl PayloadShape {
    fn resolve(self, selector: Option<Selector>) -> Payload {
        match (self, selector) {
            (PayloadShape::Selector, Some(s)) => Payload::Selector(s),
            (PayloadShape::SelectorWithExtraData, Some(s)) => Payload::SelectorWithExtraData(s),
            (PayloadShape::Selector, None) | (PayloadShape::Empty, _) => Payload::Empty,
            (PayloadShape::SelectorWithExtraData, None) => Payload::Empty,
            (PayloadShape::NonMatchingSelector, _) => Payload::NonMatchingSelector,
            (PayloadShape::NonMatchingSelectorWithExtraData, _) => {
                Payload::NonMatchingSelectorWithExtraData
            }
            (PayloadShape::ShortSelector, _) => Payload::ShortSelector,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaseTemplate {
    pub name: &'static str,
    pub requirement: Requirement,
    pub style: CallStyle,
    pub payload: PayloadShape,
    pub value: u64,
    pub expected: TxStatus,
}

/// A fully resolved case, not yet bound to addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseSpec {
    /// Section the case is reported under.
    pub group: String,
    pub name: String,
    pub style: CallStyle,
    pub payload: Payload,
    pub value: U256,
    /// Overrides the style's default gas limit.
    pub gas: Option<u64>,
    pub expected: TxStatus,
    pub balance: BalanceExpectation,
    /// Substring the simulated revert detail must contain.
    pub revert_detail: Option<&'static str>,
}

impl CaseSpec {
    /// Key identifying the case across mock and precompile runs.
    pub fn key(&self) -> String {
        format!("{} / {}", self.group, self.name)
    }
}

impl CaseTemplate {
    fn resolve(&self, group: &str, selector: Option<Selector>) -> CaseSpec {
        let value = U256::from(self.value);
        let balance = match self.expected {
            TxStatus::Success if !value.is_zero() => BalanceExpectation::IncreasedBy(value),
            _ => BalanceExpectation::Unchanged,
        };
        CaseSpec {
            group: group.to_string(),
            name: self.name.to_string(),
            style: self.style,
            payload: self.payload.resolve(selector),
            value,
            gas: None,
            expected: self.expected,
            balance,
            revert_detail: None,
        }
    }
}

const fn template(
    name: &'static str,
    requirement: Requirement,
    style: CallStyle,
    payload: PayloadShape,
    value: u64,
    expected: TxStatus,
) -> CaseTemplate {
    CaseTemplate {
        name,
        requirement,
        style,
        payload,
        value,
        expected,
    }
}

use CallStyle::{Direct, HighLevel, MessageCall, StaticCall};
use PayloadShape::{
    Empty, NonMatchingSelector, Selector as Sel, SelectorWithExtraData, ShortSelector,
};
use Requirement::*;
use TxStatus::{Reverted, Success};

/// Run against every function declared in the ABI.
pub const FUNCTION_TEMPLATES: &[CaseTemplate] = &[
    template("can be called", Always, Direct, Sel, 0, Success),
    template("can be called by low level contract call", Always, MessageCall, Sel, 0, Success),
    template("can be called by static call", ViewOrPure, StaticCall, Sel, 0, Success),
    template("can be called by static call with extra data", ViewOrPure, StaticCall, SelectorWithExtraData, 0, Success),
    template("can be called by high level contract call", Always, HighLevel, Sel, 0, Success),
    template("can be called with value", Payable, Direct, Sel, 1, Success),
    template("can not be called with value", NotPayable, Direct, Sel, 1, Reverted),
    template("can be called by low level contract call with value", Payable, MessageCall, Sel, 1, Success),
    template("can not be called by low level contract call with value", NotPayable, MessageCall, Sel, 1, Reverted),
    template("can be called by high level contract call with value", Payable, HighLevel, Sel, 1, Success),
    template("can not be called by high level contract call with value", NotPayable, HighLevel, Sel, 1, Reverted),
    template("can be called with extra data", Always, Direct, SelectorWithExtraData, 0, Success),
    template("can be called with value and extra data", Payable, Direct, SelectorWithExtraData, 1, Success),
    template("can not be called with value and extra data", NotPayable, Direct, SelectorWithExtraData, 1, Reverted),
];

/// Run once per contract against its receive/fallback shape.
pub const SPECIAL_FUNCTION_TEMPLATES: &[CaseTemplate] = &[
    template("can receive zero value transfers with no data", ReceiveOrFallback, Direct, Empty, 0, Success),
    template("can be called by another contract with no data", ReceiveOrFallback, MessageCall, Empty, 0, Success),
    template("can be called by static call with no data", ReceiveOrFallback, StaticCall, Empty, 0, Success),
    template("can not receive zero value transfers with no data", NeitherReceiveNorFallback, Direct, Empty, 0, Reverted),
    template("can not receive zero value transfers by high level contract call with no data", NeitherReceiveNorFallback, MessageCall, Empty, 0, Reverted),
    template("can not receive zero value transfers by static call with no data", NeitherReceiveNorFallback, StaticCall, Empty, 0, Reverted),
    template("can not receive plain transfers", RejectsPlainValue, Direct, Empty, 1, Reverted),
    template("can not receive plain transfers via message call", RejectsPlainValue, MessageCall, Empty, 1, Reverted),
    template("can receive plain transfers", AcceptsPlainValue, Direct, Empty, 1, Success),
    template("can receive plain transfers via message call", AcceptsPlainValue, MessageCall, Empty, 1, Success),
    template("can be called with a non-matching function selector", HasFallback, Direct, NonMatchingSelector, 0, Success),
    template("can not be called with a non-matching function selector", NoFallback, Direct, NonMatchingSelector, 0, Reverted),
    template("can be called with a non-matching function selector via message call", HasFallback, MessageCall, NonMatchingSelector, 0, Success),
    template("can not be called with a non-matching function selector via message call", NoFallback, MessageCall, NonMatchingSelector, 0, Reverted),
    template("can be called with a non-matching function selector via static call", HasFallback, StaticCall, NonMatchingSelector, 0, Success),
    template("can not be called with a non-matching function selector via static call", NoFallback, StaticCall, NonMatchingSelector, 0, Reverted),
    template("can be called with an invalid (short) function selector", HasFallback, Direct, ShortSelector, 0, Success),
    template("can not be called with an invalid (short) function selector", NoFallback, Direct, ShortSelector, 0, Reverted),
    template("can be called with an invalid (short) function selector via message call", HasFallback, MessageCall, ShortSelector, 0, Success),
    template("can not be called with an invalid (short) function selector via message call", NoFallback, MessageCall, ShortSelector, 0, Reverted),
    template("can be called with an invalid (short) function selector via static call", HasFallback, StaticCall, ShortSelector, 0, Success),
    template("can not be called with an invalid (short) function selector via static call", NoFallback, StaticCall, ShortSelector, 0, Reverted),
    template("can receive value with a non-matching function selector", PayableFallback, Direct, NonMatchingSelector, 1, Success),
    template("can not receive value with a non-matching function selector", NonpayableFallback, Direct, NonMatchingSelector, 1, Reverted),
    template("can receive value with a non-matching function selector via message call", PayableFallback, MessageCall, NonMatchingSelector, 1, Success),
    template("can not receive value with a non-matching function selector via message call", NonpayableFallback, MessageCall, NonMatchingSelector, 1, Reverted),
    template("can receive value with an invalid (short) function selector", PayableFallback, Direct, ShortSelector, 1, Success),
    template("can not receive value with an invalid (short) function selector", NonpayableFallback, Direct, ShortSelector, 1, Reverted),
    template("can receive value with an invalid (short) function selector via message call", PayableFallback, MessageCall, ShortSelector, 1, Success),
    template("can not receive value with an invalid (short) function selector via message call", NonpayableFallback, MessageCall, ShortSelector, 1, Reverted),
];

pub fn function_group(function: &AbiFunction) -> String {
    format!("ABI functions: {} {}", function.name, function.mutability)
}

pub fn special_group(receive: Option<&SpecialFunction>, fallback: Option<&SpecialFunction>) -> String {
    format!(
        "ABI special functions: {}receive and {} fallback",
        if receive.is_some() { "" } else { "no " },
        fallback.map(|f| f.mutability.as_str()).unwrap_or("no")
    )
}

/// Cases for a single ABI function.
pub fn derive_function_cases(
    function: &AbiFunction,
    receive: Option<&SpecialFunction>,
    fallback: Option<&SpecialFunction>,
) -> Vec<CaseSpec> {
    let group = function_group(function);
    let selector = function.selector();
    FUNCTION_TEMPLATES
        .iter()
        .filter(|t| t.requirement.holds(Some(function), receive, fallback))
        .map(|t| t.resolve(&group, Some(selector)))
        .collect()
}

/// Cases for the receive/fallback entries (or their absence).
pub fn derive_special_cases(
    receive: Option<&SpecialFunction>,
    fallback: Option<&SpecialFunction>,
) -> Vec<CaseSpec> {
    let group = special_group(receive, fallback);
    SPECIAL_FUNCTION_TEMPLATES
        .iter()
        .filter(|t| t.requirement.holds(None, receive, fallback))
        .map(|t| t.resolve(&group, None))
        .collect()
}

/// The full matrix for an interface: every function, then the special entries.
pub fn derive_interface_cases(interface: &InterfaceDescriptor) -> Vec<CaseSpec> {
    let receive = interface.receive();
    let fallback = interface.fallback();
    interface
        .functions
        .iter()
        .flat_map(|f| derive_function_cases(f, receive, fallback))
        .chain(derive_special_cases(receive, fallback))
        .collect()
}

const DISABLED_STYLES: [CallStyle; 4] = [
    CallStyle::Direct,
    CallStyle::MessageCall,
    CallStyle::DelegateCall,
    CallStyle::StaticCall,
];

/// Every call shape against a disabled contract must revert with
/// [`DISABLED_REVERT_DETAIL`], whatever the interface declares.
pub fn derive_disabled_cases(interface: &InterfaceDescriptor) -> Vec<CaseSpec> {
    let mut shapes: Vec<(String, Payload, u64)> = vec![
        ("zero value transfer".to_string(), Payload::Empty, 0),
        ("value transfer".to_string(), Payload::Empty, 1),
        ("invalid function selector".to_string(), Payload::ShortSelector, 0),
        ("invalid function selector with value".to_string(), Payload::ShortSelector, 1),
        ("non-matching function selector".to_string(), Payload::NonMatchingSelector, 0),
        ("non-matching function selector with value".to_string(), Payload::NonMatchingSelector, 1),
        (
            "non-matching function selector with extra data".to_string(),
            Payload::NonMatchingSelectorWithExtraData,
            0,
        ),
        (
            "non-matching function selector with value and extra data".to_string(),
            Payload::NonMatchingSelectorWithExtraData,
            1,
        ),
    ];

    for function in &interface.functions {
        let selector = function.selector();
        let name = &function.name;
        shapes.push((name.clone(), Payload::Selector(selector), 0));
        shapes.push((format!("{} with value", name), Payload::Selector(selector), 1));
        shapes.push((
            format!("{} with extra data", name),
            Payload::SelectorWithExtraData(selector),
            0,
        ));
        shapes.push((
            format!("{} with value and extra data", name),
            Payload::SelectorWithExtraData(selector),
            1,
        ));
    }

    shapes
        .into_iter()
        .flat_map(|(group, payload, value)| {
            DISABLED_STYLES.iter().map(move |style| CaseSpec {
                group: group.clone(),
                name: format!("reverts on {}", style.label()),
                style: *style,
                payload: payload.clone(),
                value: U256::from(value),
                gas: None,
                expected: TxStatus::Reverted,
                balance: BalanceExpectation::Unchanged,
                // the relay's static forwarder is not payable and rejects value first
                revert_detail: if *style == CallStyle::StaticCall && value > 0 {
                    None
                } else {
                    Some(DISABLED_REVERT_DETAIL)
                },
            })
        })
        .collect()
}

/// Which account a context check expects to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Signer,
    Relay,
    Implementation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextCheck {
    /// `MsgSender(address)` event (or `getMsgSender()` return for static calls).
    MsgSender { expected: Party },
    /// `MsgValue(uint256)` event, plus the balance gain at `recipient`.
    MsgValue { child_value: U256, recipient: Party },
    /// Slot 0 of `owner` holds `stored` after `setStorageValue(stored)`.
    StorageLocation { stored: U256, owner: Party },
}

/// A message-call context check against `ContextInspector` or `StorageBasic`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextCase {
    pub group: &'static str,
    pub name: &'static str,
    pub style: CallStyle,
    /// Implementation function invoked, with its encoded arguments.
    pub signature: &'static str,
    pub args: Vec<ethers::abi::Token>,
    pub value: U256,
    pub gas: u64,
    /// When set, the simulation must be rejected and nothing is submitted.
    pub expect_rejection: bool,
    /// Substring the rejection detail must contain.
    pub revert_detail: Option<String>,
    pub check: ContextCheck,
}

impl ContextCase {
    pub fn calldata(&self) -> Vec<u8> {
        let mut data = Selector::from_signature(self.signature).0.to_vec();
        data.extend(ethers::abi::encode(&self.args));
        data
    }
}

pub const MSG_SENDER_GROUP: &str = "msg.sender";
pub const MSG_VALUE_GROUP: &str = "msg.value";
pub const STORAGE_GROUP: &str = "storage location";

pub const EMIT_MSG_SENDER: &str = "emitMsgSender()";
pub const GET_MSG_SENDER: &str = "getMsgSender()";
pub const EMIT_MSG_VALUE: &str = "emitMsgValue()";
pub const SET_STORAGE_VALUE: &str = "setStorageValue(uint256)";

/// Rejection of value sent to a non-payable entry point.
pub fn non_payable_detail(value: U256) -> String {
    format!("non-payable function was called with value {}", value)
}

/// msg.sender / msg.value / storage-location checks for the relay call styles.
///
/// `callcode_forwards_value` decides what the callee of `functionCallCode`
/// observes as msg.value: the parent value, or zero.
pub fn derive_context_cases(budget: &GasBudget, callcode_forwards_value: bool) -> Vec<ContextCase> {
    let parent_value = U256::from(10);
    let child_override = U256::from(5);
    let relay_gas = budget.relay_gas;
    let callcode_gas = budget.relay_gas + budget.callcode_headroom;
    let storage_gas = budget.relay_gas + budget.storage_write_gas;

    let sender = |name, style, signature, gas, expected| ContextCase {
        group: MSG_SENDER_GROUP,
        name,
        style,
        signature,
        args: vec![],
        value: U256::zero(),
        gas,
        expect_rejection: false,
        revert_detail: None,
        check: ContextCheck::MsgSender { expected },
    };

    let value = |name, style, gas, child_value, recipient, expect_rejection: bool| ContextCase {
        group: MSG_VALUE_GROUP,
        name,
        style,
        signature: EMIT_MSG_VALUE,
        args: vec![],
        value: parent_value,
        gas,
        expect_rejection,
        // the relay's static forwarder is not payable
        revert_detail: expect_rejection.then(|| non_payable_detail(parent_value)),
        check: ContextCheck::MsgValue {
            child_value,
            recipient,
        },
    };

    let storage = |name, style, stored: u64, owner, expect_rejection| ContextCase {
        group: STORAGE_GROUP,
        name,
        style,
        signature: SET_STORAGE_VALUE,
        args: vec![ethers::abi::Token::Uint(U256::from(stored))],
        value: U256::zero(),
        gas: storage_gas,
        expect_rejection,
        revert_detail: None,
        check: ContextCheck::StorageLocation {
            stored: U256::from(stored),
            owner,
        },
    };

    let callcode_child_value = if callcode_forwards_value {
        parent_value
    } else {
        U256::zero()
    };

    vec![
        sender("direct call is parent (signer)", CallStyle::Direct, EMIT_MSG_SENDER, budget.default_gas, Party::Signer),
        sender("callcode msg.sender is parent (caller)", CallStyle::CallCode, EMIT_MSG_SENDER, callcode_gas, Party::Relay),
        sender("delegatecall propagates msg.sender (same as caller, parent signer)", CallStyle::DelegateCall, EMIT_MSG_SENDER, relay_gas, Party::Signer),
        sender("staticcall msg.sender is parent (caller)", CallStyle::StaticCall, GET_MSG_SENDER, relay_gas, Party::Relay),
        value("direct call", CallStyle::Direct, budget.default_gas, parent_value, Party::Implementation, false),
        value("delegatecall propagates msg.value", CallStyle::DelegateCall, relay_gas, parent_value, Party::Relay, false),
        value("callcode without a value override", CallStyle::CallCode, callcode_gas, callcode_child_value, Party::Relay, false),
        value("callcode with a value != parent msg.value", CallStyle::CallCodeWithValue(child_override), relay_gas, child_override, Party::Relay, false),
        value("staticcall", CallStyle::StaticCall, relay_gas, U256::zero(), Party::Relay, true),
        storage("call storage in implementation", CallStyle::Direct, 1, Party::Implementation, false),
        storage("callcode storage in caller", CallStyle::CallCode, 2, Party::Relay, false),
        storage("delegatecall storage in caller", CallStyle::DelegateCall, 3, Party::Relay, false),
        storage("staticcall storage not allowed", CallStyle::StaticCall, 4, Party::Relay, true),
    ]
}
