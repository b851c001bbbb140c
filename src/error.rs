use ethers::types::H256;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a case or a whole suite.
///
/// Expected reverts are never represented here: they are ordinary outcomes
/// checked by the assertion engine.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to send {method} request: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("RPC error: {message} (code: {code})")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("malformed {method} response: {reason}")]
    MalformedResponse { method: String, reason: String },

    #[error("transaction {tx_hash:#x} not mined after {waited:?}")]
    ReceiptTimeout { tx_hash: H256, waited: Duration },

    #[error("artifact {name} not found under {dir}")]
    MissingArtifact { name: String, dir: PathBuf },

    #[error("artifact {name} has no {field}")]
    MissingBytecode { name: String, field: &'static str },

    #[error("artifact {name} {field} is not valid hex: {source}")]
    InvalidBytecode {
        name: String,
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("artifact {name} could not be read: {reason}")]
    UnreadableArtifact { name: String, reason: String },

    #[error("invalid ABI for {name}: {reason}")]
    InvalidAbi { name: String, reason: String },

    #[error("deployment of {name} failed: {reason}")]
    Deployment { name: String, reason: String },

    #[error("call style {style} needs a {missing} address for {target:#x}")]
    MissingCaller {
        style: &'static str,
        missing: &'static str,
        target: ethers::types::Address,
    },
}

impl HarnessError {
    pub(crate) fn malformed(method: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures loading fixtures, which abort the whole suite.
    pub fn is_fixture_error(&self) -> bool {
        matches!(
            self,
            Self::MissingArtifact { .. }
                | Self::MissingBytecode { .. }
                | Self::InvalidBytecode { .. }
                | Self::UnreadableArtifact { .. }
                | Self::InvalidAbi { .. }
                | Self::Deployment { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
