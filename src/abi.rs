use crate::error::{HarnessError, Result};
use crate::types::Mutability;
use ethers::abi::{Abi, Function};
use serde_json::{Map, Value};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Signature whose selector no fixture interface declares.
pub const NON_MATCHING_SIGNATURE: &str = "does_not_exist()";

/// Calldata shorter than a selector, routed to the fallback.
pub const SHORT_SELECTOR: [u8; 3] = [0x01, 0x02, 0x03];

/// Trailing byte appended to exercise extra-calldata tolerance.
pub const EXTRA_DATA: u8 = 0x01;

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let hash = Keccak256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hash);
    out
}

/// Calculate the 4-byte function selector from a method signature
pub fn calculate_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    pub fn from_signature(signature: &str) -> Self {
        Selector(calculate_selector(signature))
    }

    pub fn non_matching() -> Self {
        Self::from_signature(NON_MATCHING_SIGNATURE)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl FromStr for Selector {
    type Err = hex::FromHexError;

    /// Accepts `0x`-prefixed or bare hex in either case.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let clean = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(clean, &mut bytes)?;
        Ok(Selector(bytes))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// How the EVM dispatcher sees a piece of calldata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalldataKind {
    /// No data: receive, else fallback.
    Empty,
    /// 1-3 bytes: no selector, fallback only.
    Short,
    Selector(Selector),
}

pub fn classify_calldata(data: &[u8]) -> CalldataKind {
    match data.len() {
        0 => CalldataKind::Empty,
        1..=3 => CalldataKind::Short,
        _ => CalldataKind::Selector(Selector([data[0], data[1], data[2], data[3]])),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbiFunction {
    pub name: String,
    pub mutability: Mutability,
    pub function: Function,
}

impl AbiFunction {
    pub fn new(function: Function) -> Self {
        Self {
            name: function.name.clone(),
            mutability: function.state_mutability.into(),
            function,
        }
    }

    /// Build method signature string (e.g., "transfer(address,uint256)")
    pub fn signature(&self) -> String {
        let param_types: Vec<String> = self
            .function
            .inputs
            .iter()
            .map(|p| p.kind.to_string())
            .collect();
        format!("{}({})", self.name, param_types.join(","))
    }

    pub fn selector(&self) -> Selector {
        Selector(self.function.short_signature())
    }
}

/// A `receive` or `fallback` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialFunction {
    pub mutability: Mutability,
}

impl SpecialFunction {
    pub fn is_payable(&self) -> bool {
        self.mutability.is_payable()
    }
}

/// Where the dispatcher of a contract sends a call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Route<'a> {
    Function(&'a AbiFunction),
    Receive,
    Fallback,
    /// Nothing handles the call; it reverts.
    Unroutable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub functions: Vec<AbiFunction>,
    pub receive: Option<SpecialFunction>,
    pub fallback: Option<SpecialFunction>,
}

/// Mutability declared by a function or fallback entry.
fn declared_mutability(entry: &Map<String, Value>) -> serde_json::Result<Mutability> {
    if let Some(value) = entry.get("stateMutability") {
        return serde_json::from_value(value.clone());
    }
    // Pre-0.5 compilers emit payable/constant instead.
    let flag = |key: &str| entry.get(key).and_then(Value::as_bool).unwrap_or(false);
    Ok(if flag("payable") {
        Mutability::Payable
    } else if flag("constant") {
        Mutability::View
    } else {
        Mutability::Nonpayable
    })
}

impl InterfaceDescriptor {
    /// Parse a JSON ABI array. Constructors, events and errors are skipped.
    pub fn from_json(name: &str, abi: &Value) -> Result<Self> {
        let invalid = |reason: String| HarnessError::InvalidAbi {
            name: name.to_string(),
            reason,
        };
        let entries = abi
            .as_array()
            .ok_or_else(|| invalid("expected a JSON array".to_string()))?;

        let mut normalized = Vec::with_capacity(entries.len());
        let mut fallback = None;
        for entry in entries {
            let mut entry = entry
                .as_object()
                .cloned()
                .ok_or_else(|| invalid(format!("entry {} is not an object", entry)))?;
            // An omitted type means "function".
            let kind = entry
                .entry("type")
                .or_insert_with(|| Value::from("function"))
                .as_str()
                .unwrap_or_default()
                .to_string();
            if kind == "function" || kind == "fallback" {
                let mutability = declared_mutability(&entry).map_err(|e| invalid(e.to_string()))?;
                entry.insert("stateMutability".to_string(), Value::from(mutability.as_str()));
                if kind == "fallback" {
                    fallback.get_or_insert(SpecialFunction { mutability });
                }
            }
            if kind == "function" {
                for key in ["inputs", "outputs"] {
                    entry.entry(key).or_insert_with(|| Value::Array(vec![]));
                }
            }
            normalized.push(Value::Object(entry));
        }

        let parsed: Abi = serde_json::from_value(Value::Array(normalized.clone()))
            .map_err(|e| invalid(e.to_string()))?;

        // Abi groups overloads by name; keep declaration order instead.
        let mut overloads: HashMap<&str, usize> = HashMap::new();
        let mut functions = Vec::new();
        for entry in normalized.iter().filter(|e| e["type"] == "function") {
            let function_name = entry["name"].as_str().unwrap_or_default();
            if function_name.is_empty() {
                return Err(invalid("function entry without a name".to_string()));
            }
            let index = overloads.entry(function_name).or_default();
            let function = parsed
                .functions
                .get(function_name)
                .and_then(|overloaded| overloaded.get(*index))
                .ok_or_else(|| invalid(format!("function {} not parsed", function_name)))?;
            *index += 1;
            functions.push(AbiFunction::new(function.clone()));
        }

        Ok(Self {
            name: name.to_string(),
            functions,
            receive: parsed.receive.then_some(SpecialFunction {
                mutability: Mutability::Payable,
            }),
            fallback,
        })
    }

    pub fn from_json_str(name: &str, abi: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(abi).map_err(|e| HarnessError::InvalidAbi {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(name, &value)
    }

    pub fn receive(&self) -> Option<&SpecialFunction> {
        self.receive.as_ref()
    }

    pub fn fallback(&self) -> Option<&SpecialFunction> {
        self.fallback.as_ref()
    }

    pub fn function(&self, name: &str) -> Option<&AbiFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Plain value transfers land in receive or a payable fallback.
    pub fn accepts_plain_value(&self) -> bool {
        self.receive.is_some() || self.fallback.map_or(false, |f| f.is_payable())
    }

    /// Route calldata the way a Solidity dispatcher does.
    pub fn route(&self, data: &[u8]) -> Route<'_> {
        match classify_calldata(data) {
            CalldataKind::Empty => {
                if self.receive.is_some() {
                    Route::Receive
                } else if self.fallback.is_some() {
                    Route::Fallback
                } else {
                    Route::Unroutable
                }
            }
            CalldataKind::Short => {
                if self.fallback.is_some() {
                    Route::Fallback
                } else {
                    Route::Unroutable
                }
            }
            CalldataKind::Selector(selector) => self
                .functions
                .iter()
                .find(|f| f.selector() == selector)
                .map(Route::Function)
                .unwrap_or(if self.fallback.is_some() {
                    Route::Fallback
                } else {
                    Route::Unroutable
                }),
        }
    }

    /// Whether a routed call may carry value.
    pub fn route_accepts_value(&self, route: Route<'_>) -> bool {
        match route {
            Route::Function(f) => f.mutability.is_payable(),
            Route::Receive => true,
            Route::Fallback => self.fallback.map_or(false, |f| f.is_payable()),
            Route::Unroutable => false,
        }
    }

    /// Describes the receive/fallback shape, e.g. "no receive and payable fallback".
    pub fn special_functions_label(&self) -> String {
        format!(
            "{}receive and {} fallback",
            if self.receive.is_some() { "" } else { "no " },
            self.fallback
                .map(|f| f.mutability.as_str())
                .unwrap_or("no")
        )
    }
}
