use std::collections::BTreeSet;

use evreg_types::Address;
use serde::Deserialize;

use crate::error::{LedgerError, LedgerResult};

/// Functions every registry contract must expose.
pub const REQUIRED_FUNCTIONS: [&str; 3] = ["registry", "changeStatus", "getRegistry"];

/// ABI of the stock registry contract.
pub const DEFAULT_REGISTRY_ABI: &str = r#"[
  {
    "type": "function",
    "name": "registry",
    "stateMutability": "nonpayable",
    "inputs": [
      { "name": "cid", "type": "string" },
      { "name": "validTo", "type": "uint256" }
    ],
    "outputs": []
  },
  {
    "type": "function",
    "name": "changeStatus",
    "stateMutability": "nonpayable",
    "inputs": [
      { "name": "cid", "type": "string" },
      { "name": "status", "type": "string" }
    ],
    "outputs": []
  },
  {
    "type": "function",
    "name": "getRegistry",
    "stateMutability": "view",
    "inputs": [{ "name": "cid", "type": "string" }],
    "outputs": [
      { "name": "cid", "type": "string" },
      { "name": "status", "type": "string" },
      { "name": "validTo", "type": "uint256" },
      { "name": "timestamp", "type": "uint256" },
      { "name": "exists", "type": "bool" }
    ]
  },
  {
    "type": "event",
    "name": "Registered",
    "inputs": [
      { "name": "cid", "type": "string", "indexed": false },
      { "name": "validTo", "type": "uint256", "indexed": false }
    ]
  }
]"#;

#[derive(Deserialize)]
struct AbiItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
}

/// Parsed contract interface, reduced to the callable function names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbiDescriptor {
    functions: BTreeSet<String>,
}

impl AbiDescriptor {
    /// Parse a JSON ABI and check it exposes the registry functions.
    pub fn from_json(json: &str) -> LedgerResult<Self> {
        let items: Vec<AbiItem> =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidAbi(e.to_string()))?;
        let functions: BTreeSet<String> = items
            .into_iter()
            .filter(|item| item.kind == "function")
            .map(|item| item.name)
            .collect();

        let missing: Vec<&str> = REQUIRED_FUNCTIONS
            .iter()
            .copied()
            .filter(|f| !functions.contains(*f))
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::InvalidAbi(format!(
                "missing functions: {}",
                missing.join(", ")
            )));
        }
        Ok(Self { functions })
    }

    /// The stock registry ABI.
    pub fn registry_default() -> LedgerResult<Self> {
        Self::from_json(DEFAULT_REGISTRY_ABI)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }
}

/// A deployed registry contract the client writes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractBinding {
    pub address: Address,
    pub abi: AbiDescriptor,
}

impl ContractBinding {
    /// Bind to `address`. The zero address is never a deployed contract.
    pub fn new(address: Address, abi: AbiDescriptor) -> LedgerResult<Self> {
        if address.is_zero() {
            return Err(LedgerError::NotConfigured(
                "contract address is the zero address".into(),
            ));
        }
        Ok(Self { address, abi })
    }
}
