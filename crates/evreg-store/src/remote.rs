//! HTTP clients for the remote content network and public gateways.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use evreg_types::Cid;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::pinning::{PinMetadata, PinReceipt, PinningService};
use crate::source::ContentSource;

/// Build the shared HTTP client with a per-request timeout.
pub(crate) fn http_client(timeout: Duration) -> StoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::Http {
            endpoint: "client_init".into(),
            source: e,
        })
}

/// Join a path onto a base URL, tolerating a trailing slash on the base.
pub(crate) fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// Turn a non-success response into [`StoreError::Api`].
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
    endpoint: &str,
) -> StoreResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Api {
        endpoint: endpoint.to_string(),
        status,
        body,
    })
}

pub(crate) fn transport(endpoint: &str) -> impl FnOnce(reqwest::Error) -> StoreError + '_ {
    move |source| StoreError::Http {
        endpoint: endpoint.to_string(),
        source,
    }
}

/// Response of the content network's `add` call. Older nodes answer with
/// `Hash`, some gateways with `cid`.
#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash", alias = "cid")]
    hash: String,
}

/// Client for an IPFS-compatible HTTP API (`/api/v0/add`, `/api/v0/cat`).
#[derive(Debug, Clone)]
pub struct IpfsApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl IpfsApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> StoreResult<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Add bytes to the network and return the identifier it assigned.
    pub async fn add(&self, data: &[u8]) -> StoreResult<Cid> {
        let url = endpoint(&self.base_url, "api/v0/add");
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name("content")
            .mime_str("application/octet-stream")
            .map_err(transport(&url))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport(&url))?;
        let resp = ensure_success(resp, &url).await?;
        let body: AddResponse = resp.json().await.map_err(|e| StoreError::Decode {
            endpoint: url.clone(),
            reason: e.to_string(),
        })?;
        let cid = Cid::parse(&body.hash)?;
        debug!(cid = %cid, bytes = data.len(), "added content to network");
        Ok(cid)
    }

    /// Fetch bytes by CID. `Ok(None)` when the node answers 404.
    pub async fn cat(&self, cid: &Cid) -> StoreResult<Option<Bytes>> {
        let url = endpoint(&self.base_url, "api/v0/cat");
        let resp = self
            .http
            .post(&url)
            .query(&[("arg", cid.as_str())])
            .send()
            .await
            .map_err(transport(&url))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, &url).await?;
        let data = resp.bytes().await.map_err(transport(&url))?;
        Ok(Some(data))
    }
}

#[async_trait]
impl ContentSource for IpfsApiClient {
    fn name(&self) -> &str {
        "ipfs"
    }

    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Bytes>> {
        self.cat(cid).await
    }
}

#[async_trait]
impl PinningService for IpfsApiClient {
    fn name(&self) -> &str {
        "ipfs"
    }

    async fn pin(&self, data: &[u8], _metadata: &PinMetadata) -> StoreResult<PinReceipt> {
        let cid = self.add(data).await?;
        Ok(PinReceipt {
            cid,
            size: data.len() as u64,
            timestamp: None,
        })
    }
}

/// Read-only public gateway: `GET {base}/ipfs/{cid}`.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GatewayClient {
    pub fn new(base_url: Url, timeout: Duration) -> StoreResult<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url,
        })
    }

    /// Public link for a CID.
    pub fn url_for(&self, cid: &Cid) -> String {
        gateway_url(&self.base_url, cid)
    }
}

/// `{base}/ipfs/{cid}`.
pub fn gateway_url(base: &Url, cid: &Cid) -> String {
    endpoint(base, &format!("ipfs/{cid}"))
}

#[async_trait]
impl ContentSource for GatewayClient {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Bytes>> {
        let url = self.url_for(cid);
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
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cid(data: &[u8]) -> Cid {
        ContentHasher::default().cid(data)
    }

    async fn ipfs(server: &MockServer) -> IpfsApiClient {
        IpfsApiClient::new(server.uri().parse().unwrap(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn add_returns_network_cid() {
        let server = MockServer::start().await;
        let expected = cid(b"remote");
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Name": "content",
                "Hash": expected.as_str(),
                "Size": "6"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let got = ipfs(&server).await.add(b"remote").await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn add_accepts_lowercase_cid_field() {
        let server = MockServer::start().await;
        let expected = cid(b"alt");
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "cid": expected.as_str() })),
            )
            .mount(&server)
            .await;

        assert_eq!(ipfs(&server).await.add(b"alt").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn add_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(ResponseTemplate::new(500).set_body_string("node offline"))
            .mount(&server)
            .await;

        let err = ipfs(&server).await.add(b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::Api { status: 500, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn cat_passes_cid_as_arg() {
        let server = MockServer::start().await;
        let id = cid(b"body");
        Mock::given(method("POST"))
            .and(path("/api/v0/cat"))
            .and(query_param("arg", id.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"body".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let got = ipfs(&server).await.cat(&id).await.unwrap();
        assert_eq!(got.unwrap(), Bytes::from_static(b"body"));
    }

    #[tokio::test]
    async fn cat_maps_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/cat"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(ipfs(&server).await.cat(&cid(b"nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gateway_fetches_by_path() {
        let server = MockServer::start().await;
        let id = cid(b"gw");
        Mock::given(method("GET"))
            .and(path(format!("/ipfs/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"gw".to_vec()))
            .mount(&server)
            .await;

        let gateway =
            GatewayClient::new(server.uri().parse().unwrap(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            gateway.fetch(&id).await.unwrap().unwrap(),
            Bytes::from_static(b"gw")
        );
    }

    #[test]
    fn gateway_url_tolerates_trailing_slash() {
        let id = cid(b"link");
        let a = gateway_url(&"https://ipfs.io".parse().unwrap(), &id);
        let b = gateway_url(&"https://ipfs.io/".parse().unwrap(), &id);
        assert_eq!(a, b);
        assert_eq!(a, format!("https://ipfs.io/ipfs/{id}"));
    }
}
