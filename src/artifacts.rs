use crate::abi::InterfaceDescriptor;
use crate::error::{HarnessError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A compiled contract as emitted by Hardhat (or Foundry).
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub abi: Value,
    /// Creation code.
    pub bytecode: Vec<u8>,
    /// Runtime code expected at the deployed address.
    pub deployed_bytecode: Vec<u8>,
}

impl Artifact {
    pub fn interface(&self) -> Result<InterfaceDescriptor> {
        InterfaceDescriptor::from_json(&self.name, &self.abi)
    }

    /// Parse an artifact document. Bytecode fields may be a hex string or a
    /// `{ "object": "0x.." }` object.
    pub fn from_json(name: &str, artifact: &Value) -> Result<Self> {
        let abi = artifact
            .get("abi")
            .cloned()
            .ok_or_else(|| HarnessError::InvalidAbi {
                name: name.to_string(),
                reason: "artifact has no abi".to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            abi,
            bytecode: bytecode_field(name, artifact, "bytecode")?,
            deployed_bytecode: bytecode_field(name, artifact, "deployedBytecode")?,
        })
    }
}

fn bytecode_field(name: &str, artifact: &Value, field: &'static str) -> Result<Vec<u8>> {
    let hex_str = artifact
        .get(field)
        .and_then(|v| v.get("object"))
        .and_then(|v| v.as_str())
        .or_else(|| artifact.get(field).and_then(|v| v.as_str()))
        .ok_or_else(|| HarnessError::MissingBytecode {
            name: name.to_string(),
            field,
        })?;

    hex::decode(hex_str.strip_prefix("0x").unwrap_or(hex_str)).map_err(|source| {
        HarnessError::InvalidBytecode {
            name: name.to_string(),
            field,
            source,
        }
    })
}

/// Looks up artifacts by contract name under a build output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `<name>.json`, skipping debug files and build-info.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        let file_name = format!("{}.json", name);
        let mut matches: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != "build-info")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
            .map(|e| e.into_path())
            .collect();

        matches.sort();
        matches.into_iter().next()
    }

    pub fn load(&self, name: &str) -> Result<Artifact> {
        let path = self.find(name).ok_or_else(|| HarnessError::MissingArtifact {
            name: name.to_string(),
            dir: self.root.clone(),
        })?;
        debug!("Loading artifact {} from {:?}", name, path);

        let content = std::fs::read_to_string(&path).map_err(|e| HarnessError::UnreadableArtifact {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let artifact: Value =
            serde_json::from_str(&content).map_err(|e| HarnessError::UnreadableArtifact {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Artifact::from_json(name, &artifact)
    }

    pub fn interface(&self, name: &str) -> Result<InterfaceDescriptor> {
        self.load(name)?.interface()
    }
}
