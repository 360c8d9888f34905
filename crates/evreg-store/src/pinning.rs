use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use evreg_types::Cid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::remote::{endpoint, ensure_success, gateway_url, http_client, transport};
use crate::source::ContentSource;

/// Descriptive metadata attached to a pin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMetadata {
    pub name: String,
    #[serde(default)]
    pub keyvalues: BTreeMap<String, String>,
}

impl Default for PinMetadata {
    fn default() -> Self {
        Self {
            name: "EPCIS Document".into(),
            keyvalues: BTreeMap::new(),
        }
    }
}

impl PinMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyvalues: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keyvalues.insert(key.into(), value.into());
        self
    }
}

/// What a pinning service reports after accepting content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinReceipt {
    /// Identifier assigned by the service. Treated as canonical.
    pub cid: Cid,
    pub size: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// An external authority that stores content and assigns its identifier.
#[async_trait]
pub trait PinningService: Send + Sync {
    fn name(&self) -> &str;

    async fn pin(&self, data: &[u8], metadata: &PinMetadata) -> StoreResult<PinReceipt>;
}

/// Credentials for the Pinata API.
#[derive(Clone)]
pub enum PinataAuth {
    /// Bearer JWT.
    Jwt(String),
    /// Legacy API key + secret headers.
    KeyPair { api_key: String, secret_key: String },
}

impl fmt::Debug for PinataAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jwt(_) => write!(f, "Jwt(<redacted>)"),
            Self::KeyPair { api_key, .. } => {
                write!(f, "KeyPair {{ api_key: {api_key:?}, secret_key: <redacted> }}")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PinataPinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
    #[serde(rename = "PinSize", default)]
    pin_size: u64,
    #[serde(rename = "Timestamp", default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Client for the Pinata pinning API.
///
/// JSON payloads go through `pinJSONToIPFS`; anything else is uploaded as a
/// file through `pinFileToIPFS`. Both request CID version 0. Reads go
/// through the Pinata gateway.
pub struct PinataClient {
    http: reqwest::Client,
    api_url: Url,
    gateway_url: Url,
    auth: PinataAuth,
}

impl fmt::Debug for PinataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinataClient")
            .field("api_url", &self.api_url.as_str())
            .field("gateway_url", &self.gateway_url.as_str())
            .field("auth", &self.auth)
            .finish()
    }
}

impl PinataClient {
    pub fn new(
        api_url: Url,
        gateway_url: Url,
        auth: PinataAuth,
        timeout: Duration,
    ) -> StoreResult<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_url,
            gateway_url,
            auth,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            PinataAuth::Jwt(jwt) => req.bearer_auth(jwt),
            PinataAuth::KeyPair {
                api_key,
                secret_key,
            } => req
                .header("pinata_api_key", api_key)
                .header("pinata_secret_api_key", secret_key),
        }
    }

    /// Check that the configured credentials are accepted.
    pub async fn test_authentication(&self) -> StoreResult<()> {
        let url = endpoint(&self.api_url, "data/testAuthentication");
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(transport(&url))?;
        ensure_success(resp, &url).await?;
        info!("pinata authentication succeeded");
        Ok(())
    }

    /// Remove a pin.
    pub async fn unpin(&self, cid: &Cid) -> StoreResult<()> {
        let url = endpoint(&self.api_url, &format!("pinning/unpin/{cid}"));
        let resp = self
            .authorize(self.http.delete(&url))
            .send()
            .await
            .map_err(transport(&url))?;
        ensure_success(resp, &url).await?;
        info!(cid = %cid, "unpinned content");
        Ok(())
    }

    async fn pin_json(
        &self,
        content: serde_json::Value,
        metadata: &PinMetadata,
    ) -> StoreResult<reqwest::Response> {
        let url = endpoint(&self.api_url, "pinning/pinJSONToIPFS");
        let body = serde_json::json!({
            "pinataContent": content,
            "pinataMetadata": metadata,
            "pinataOptions": { "cidVersion": 0 },
        });
        let resp = self
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport(&url))?;
        ensure_success(resp, &url).await
    }

    async fn pin_file(&self, data: &[u8], metadata: &PinMetadata) -> StoreResult<reqwest::Response> {
        let url = endpoint(&self.api_url, "pinning/pinFileToIPFS");
        let metadata_json = serde_json::to_string(metadata).map_err(|e| StoreError::Decode {
            endpoint: url.clone(),
            reason: e.to_string(),
        })?;
        let file = reqwest::multipart::Part::bytes(data.to_vec()).file_name(metadata.name.clone());
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("pinataMetadata", metadata_json)
            .text("pinataOptions", r#"{"cidVersion":0}"#);
        let resp = self
            .authorize(self.http.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(transport(&url))?;
        ensure_success(resp, &url).await
    }
}

#[async_trait]
impl PinningService for PinataClient {
    fn name(&self) -> &str {
        "pinata"
    }

    async fn pin(&self, data: &[u8], metadata: &PinMetadata) -> StoreResult<PinReceipt> {
        let resp = match serde_json::from_slice::<serde_json::Value>(data) {
            Ok(json) => self.pin_json(json, metadata).await?,
            Err(_) => self.pin_file(data, metadata).await?,
        };
        let url = resp.url().to_string();
        let body: PinataPinResponse = resp.json().await.map_err(|e| StoreError::Decode {
            endpoint: url,
            reason: e.to_string(),
        })?;
        let cid = Cid::parse(&body.ipfs_hash)?;
        debug!(cid = %cid, size = body.pin_size, "pinned content");
        Ok(PinReceipt {
            cid,
            size: body.pin_size,
            timestamp: body.timestamp,
        })
    }
}

#[async_trait]
impl ContentSource for PinataClient {
    fn name(&self) -> &str {
        "pinata"
    }

    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Bytes>> {
        let url = gateway_url(&self.gateway_url, cid);
        let resp = self.http.get(&url).send().await.map_err(transport(&url))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, &url).await?;
        let data = resp.bytes().await.map_err(transport(&url))?;
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evreg_crypto::ContentHasher;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, auth: PinataAuth) -> PinataClient {
        let base: Url = server.uri().parse().unwrap();
        PinataClient::new(base.clone(), base, auth, Duration::from_secs(5)).unwrap()
    }

    fn jwt() -> PinataAuth {
        PinataAuth::Jwt("test-jwt".into())
    }

    #[tokio::test]
    async fn pin_json_sends_content_metadata_and_v0_option() {
        let server = MockServer::start().await;
        let pinned = ContentHasher::default().cid(b"wrapped");
        Mock::given(method("POST"))
            .and(path("/pinning/pinJSONToIPFS"))
            .and(header("authorization", "Bearer test-jwt"))
            .and(body_partial_json(serde_json::json!({
                "pinataContent": { "type": "ObjectEvent" },
                "pinataMetadata": { "name": "evt", "keyvalues": { "kind": "epcis" } },
                "pinataOptions": { "cidVersion": 0 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "IpfsHash": pinned.as_str(),
                "PinSize": 42,
                "Timestamp": "2024-01-01T00:00:00.000Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let meta = PinMetadata::named("evt").with("kind", "epcis");
        let receipt = client(&server, jwt())
            .pin(br#"{"type":"ObjectEvent"}"#, &meta)
            .await
            .unwrap();
        assert_eq!(receipt.cid, pinned);
        assert_eq!(receipt.size, 42);
        assert!(receipt.timestamp.is_some());
    }

    #[tokio::test]
    async fn key_pair_auth_uses_legacy_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/testAuthentication"))
            .and(header("pinata_api_key", "key"))
            .and(header("pinata_secret_api_key", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let auth = PinataAuth::KeyPair {
            api_key: "key".into(),
            secret_key: "secret".into(),
        };
        client(&server, auth).test_authentication().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_credentials_surface_as_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/testAuthentication"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = client(&server, jwt()).test_authentication().await.unwrap_err();
        assert!(matches!(err, StoreError::Api { status: 401, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn non_json_bytes_use_file_upload() {
        let server = MockServer::start().await;
        let pinned = ContentHasher::default().cid(b"\x00\x01");
        Mock::given(method("POST"))
            .and(path("/pinning/pinFileToIPFS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "IpfsHash": pinned.as_str(),
                "PinSize": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client(&server, jwt())
            .pin(b"\x00\x01", &PinMetadata::default())
            .await
            .unwrap();
        assert_eq!(receipt.cid, pinned);
        assert!(receipt.timestamp.is_none());
    }

    #[tokio::test]
    async fn unpin_deletes_by_cid() {
        let server = MockServer::start().await;
        let id = ContentHasher::default().cid(b"bye");
        Mock::given(method("DELETE"))
            .and(path(format!("/pinning/unpin/{id}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, jwt()).unpin(&id).await.unwrap();
    }

    #[test]
    fn debug_redacts_secrets() {
        let auth = PinataAuth::KeyPair {
            api_key: "visible".into(),
            secret_key: "hidden".into(),
        };
        let debug = format!("{auth:?}");
        assert!(debug.contains("visible"));
        assert!(!debug.contains("hidden"));
        assert!(!format!("{:?}", PinataAuth::Jwt("tok".into())).contains("tok"));
    }
}
