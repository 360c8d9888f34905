//! Registry configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//! a local content cache, no pinning, and an unbound ledger.
//!
//! ```toml
//! data_dir = ".evreg"
//!
//! [content]
//! cid_version = 0
//! gateway_url = "https://ipfs.io"
//!
//! [pinning]
//! enabled = true
//! jwt = "..."
//!
//! [ledger]
//! rpc_url = "http://127.0.0.1:8545"
//! contract_address = "0x..."
//! signer_key = "..."
//!
//! [registry]
//! transition_policy = "lifecycle"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use evreg_crypto::{CidVersion, SigningKey};
use evreg_store::PinataAuth;
use evreg_types::Address;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RegistryError, RegistryResult};

const REDACTED: &str = "<redacted>";

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root for the content cache and the index.
    pub data_dir: PathBuf,
    pub content: ContentConfig,
    pub pinning: PinningConfig,
    pub ledger: LedgerConfig,
    pub registry: PolicyConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".evreg"),
            content: ContentConfig::default(),
            pinning: PinningConfig::default(),
            ledger: LedgerConfig::default(),
            registry: PolicyConfig::default(),
        }
    }
}

/// `[content]`: CID scheme and remote content sources.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// `0` for CIDv0, `1` for CIDv1 with the raw codec.
    pub cid_version: u8,
    /// Public gateway, tried last on resolve and used for links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    /// Content network HTTP API (`/api/v0/add`, `/api/v0/cat`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_api_url: Option<String>,
    pub fetch_timeout_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            cid_version: 0,
            gateway_url: None,
            ipfs_api_url: None,
            fetch_timeout_secs: 15,
        }
    }
}

/// `[pinning]`: Pinata-compatible pinning service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinningConfig {
    pub enabled: bool,
    pub api_url: String,
    pub gateway_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    pub timeout_secs: u64,
    /// Name attached to every pin.
    pub pin_name: String,
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://api.pinata.cloud".into(),
            gateway_url: "https://gateway.pinata.cloud".into(),
            jwt: None,
            api_key: None,
            secret_key: None,
            timeout_secs: 30,
            pin_name: "EPCIS Document".into(),
        }
    }
}

impl fmt::Debug for PinningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinningConfig")
            .field("enabled", &self.enabled)
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .field("jwt", &self.jwt.as_ref().map(|_| REDACTED))
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("secret_key", &self.secret_key.as_ref().map(|_| REDACTED))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl PinningConfig {
    /// Credentials, JWT first.
    pub fn auth(&self) -> Option<PinataAuth> {
        if let Some(jwt) = &self.jwt {
            return Some(PinataAuth::Jwt(jwt.clone()));
        }
        match (&self.api_key, &self.secret_key) {
            (Some(api_key), Some(secret_key)) => Some(PinataAuth::KeyPair {
                api_key: api_key.clone(),
                secret_key: secret_key.clone(),
            }),
            _ => None,
        }
    }
}

/// Where the registry contract lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// A node reached over JSON-RPC.
    #[default]
    Rpc,
    /// A process-local chain. State does not outlive the process.
    Memory,
}

/// `[ledger]`: node, contract, and signer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub rpc_url: String,
    pub chain_id: u64,
    /// Deployed registry contract. Unset leaves the ledger unbound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    /// JSON ABI file; the built-in registry ABI when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abi_path: Option<PathBuf>,
    /// Hex-encoded signer secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_key: Option<String>,
    /// Block explorer base for transaction links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub rpc_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Rpc,
            rpc_url: "http://127.0.0.1:8545".into(),
            chain_id: 1337,
            contract_address: None,
            abi_path: None,
            signer_key: None,
            explorer_url: None,
            rpc_timeout_secs: 10,
            poll_interval_ms: 500,
            confirmation_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("backend", &self.backend)
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("contract_address", &self.contract_address)
            .field("abi_path", &self.abi_path)
            .field("signer_key", &self.signer_key.as_ref().map(|_| REDACTED))
            .field("explorer_url", &self.explorer_url)
            .finish_non_exhaustive()
    }
}

/// Which status changes `change_status` accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Any of `active`, `rejected`, `inactive` from any current status.
    #[default]
    Open,
    /// Only `active -> rejected | inactive`; returning to `active` goes
    /// through `reactivate`.
    Lifecycle,
}

/// Index storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Sled,
    Memory,
}

/// `[registry]`: engine policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub transition_policy: TransitionPolicy,
    pub index: IndexBackend,
}

pub(crate) fn parse_url(field: &str, value: &str) -> RegistryResult<Url> {
    Url::parse(value).map_err(|e| RegistryError::Config(format!("{field}: {e}")))
}

impl RegistryConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> RegistryResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> RegistryResult<String> {
        toml::to_string_pretty(self).map_err(|e| RegistryError::Config(e.to_string()))
    }

    /// Copy with every secret replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let hide = |s: &mut Option<String>| {
            if s.is_some() {
                *s = Some(REDACTED.into());
            }
        };
        hide(&mut copy.pinning.jwt);
        hide(&mut copy.pinning.api_key);
        hide(&mut copy.pinning.secret_key);
        hide(&mut copy.ledger.signer_key);
        copy
    }

    pub fn validate(&self) -> RegistryResult<()> {
        self.cid_version()?;

        self.gateway()?;
        if let Some(api) = &self.content.ipfs_api_url {
            parse_url("content.ipfs_api_url", api)?;
        }
        if self.content.fetch_timeout_secs == 0 {
            return Err(RegistryError::Config(
                "content.fetch_timeout_secs must be positive".into(),
            ));
        }

        if self.pinning.enabled {
            parse_url("pinning.api_url", &self.pinning.api_url)?;
            parse_url("pinning.gateway_url", &self.pinning.gateway_url)?;
            if self.pinning.auth().is_none() {
                return Err(RegistryError::Config(
                    "pinning.enabled requires pinning.jwt or pinning.api_key with pinning.secret_key"
                        .into(),
                ));
            }
        }

        if self.ledger.backend == LedgerBackend::Rpc {
            parse_url("ledger.rpc_url", &self.ledger.rpc_url)?;
        }
        self.explorer()?;
        let contract = self.contract_address()?;
        let signer = self.signer_key()?;
        if self.ledger.backend == LedgerBackend::Rpc && contract.is_some() && signer.is_none() {
            return Err(RegistryError::Config(
                "ledger.contract_address is set but ledger.signer_key is missing".into(),
            ));
        }
        if self.ledger.rpc_timeout_secs == 0 || self.ledger.confirmation_timeout_secs == 0 {
            return Err(RegistryError::Config("ledger timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn cid_version(&self) -> RegistryResult<CidVersion> {
        CidVersion::try_from(self.content.cid_version)
            .map_err(|e| RegistryError::Config(format!("content.cid_version: {e}")))
    }

    pub fn gateway(&self) -> RegistryResult<Option<Url>> {
        self.content
            .gateway_url
            .as_deref()
            .map(|u| parse_url("content.gateway_url", u))
            .transpose()
    }

    pub fn explorer(&self) -> RegistryResult<Option<Url>> {
        self.ledger
            .explorer_url
            .as_deref()
            .map(|u| parse_url("ledger.explorer_url", u))
            .transpose()
    }

    pub fn contract_address(&self) -> RegistryResult<Option<Address>> {
        self.ledger
            .contract_address
            .as_deref()
            .map(|a| {
                a.parse::<Address>()
                    .map_err(|e| RegistryError::Config(format!("ledger.contract_address: {e}")))
            })
            .transpose()
    }

    pub fn signer_key(&self) -> RegistryResult<Option<SigningKey>> {
        self.ledger
            .signer_key
            .as_deref()
            .map(|k| {
                SigningKey::from_hex(k)
                    .map_err(|e| RegistryError::Config(format!("ledger.signer_key: {e}")))
            })
            .transpose()
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        self.registry.transition_policy
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.content.fetch_timeout_secs)
    }

    pub fn pin_timeout(&self) -> Duration {
        Duration::from_secs(self.pinning.timeout_secs)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.data_dir.join("content")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}
