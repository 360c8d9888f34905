//! JSON-RPC 2.0 transport to a registry node.
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `evreg_getTransactionCount` | `[address]` | next nonce |
//! | `evreg_sendTransaction` | `[signedTx]` | tx hash |
//! | `evreg_getTransactionReceipt` | `[txHash]` | receipt or `null` |
//! | `evreg_getRegistry` | `[contract, cid]` | registry entry |

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use evreg_types::{Address, Cid, TxHash};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{LedgerError, LedgerResult};
use crate::traits::{RegistryChain, RegistryEntry, TxReceipt};
use crate::transaction::SignedTransaction;

#[derive(Debug, Deserialize)]
#[serde(bound = "T: Deserialize<'de>")]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Map a node error object onto the ledger error taxonomy.
fn classify(err: RpcErrorObject) -> LedgerError {
    let lower = err.message.to_lowercase();
    if lower.contains("insufficient funds") {
        LedgerError::InsufficientFunds(err.message)
    } else if lower.contains("nonce") {
        LedgerError::Submission(err.message)
    } else {
        LedgerError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Registry chain reached over HTTP JSON-RPC.
#[derive(Debug)]
pub struct JsonRpcChain {
    http: reqwest::Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl JsonRpcChain {
    pub fn new(endpoint: Url, timeout: Duration) -> LedgerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> LedgerResult<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("{method}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Transport(format!(
                "{method}: HTTP {status}: {text}"
            )));
        }
        let parsed: RpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| LedgerError::Serialization(format!("{method}: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(classify(err));
        }
        debug!(method, id, "rpc call completed");
        Ok(parsed.result)
    }

    async fn call_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> LedgerResult<T> {
        self.call(method, params)
            .await?
            .ok_or_else(|| LedgerError::Serialization(format!("{method}: missing result")))
    }
}

#[async_trait]
impl RegistryChain for JsonRpcChain {
    async fn nonce(&self, account: &Address) -> LedgerResult<u64> {
        self.call_required("evreg_getTransactionCount", serde_json::json!([account]))
            .await
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> LedgerResult<TxHash> {
        self.call_required("evreg_sendTransaction", serde_json::json!([tx]))
            .await
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<TxReceipt>> {
        self.call("evreg_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }

    async fn get_registry(&self, contract: &Address, cid: &Cid) -> LedgerResult<RegistryEntry> {
        self.call_required("evreg_getRegistry", serde_json::json!([contract, cid]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evreg_crypto::ContentHasher;
    use evreg_types::Status;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn chain(server: &MockServer) -> JsonRpcChain {
        JsonRpcChain::new(server.uri().parse().unwrap(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn get_registry_decodes_entry() {
        let server = MockServer::start().await;
        let id = ContentHasher::default().cid(b"doc");
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "method": "evreg_getRegistry",
                "params": ["0x0101010101010101010101010101010101010101", id.as_str()]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "exists": true, "status": "inactive", "validTo": 0, "timestamp": 1704067200 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entry = chain(&server)
            .await
            .get_registry(&Address::from_bytes([1; 20]), &id)
            .await
            .unwrap();
        assert!(entry.exists);
        assert_eq!(entry.status, Status::Inactive);
        assert_eq!(entry.timestamp, 1_704_067_200);
    }

    #[tokio::test]
    async fn pending_receipt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": null
            })))
            .mount(&server)
            .await;

        let receipt = chain(&server)
            .await
            .transaction_receipt(&TxHash::from_bytes([2; 32]))
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn error_objects_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "insufficient funds for gas" }
            })))
            .mount(&server)
            .await;

        let err = chain(&server)
            .await
            .nonce(&Address::from_bytes([3; 20]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds(_)));
    }

    #[tokio::test]
    async fn http_failure_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = chain(&server)
            .await
            .nonce(&Address::from_bytes([3; 20]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
        assert!(err.is_retryable());
    }
}
