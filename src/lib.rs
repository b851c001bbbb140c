//! Conformance harness for EVM call semantics: ABI dispatch, receive and
//! fallback routing, and message-call context propagation, checked against a
//! live node over JSON-RPC.

pub mod abi;
pub mod artifacts;
pub mod assertion;
pub mod client;
pub mod config;
pub mod encoder;
pub mod error;
pub mod fixtures;
pub mod gas;
pub mod matrix;
pub mod report;
pub mod runner;
pub mod types;

pub use client::{ChainClient, RpcClient};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use runner::{ConformanceRunner, Suite};
