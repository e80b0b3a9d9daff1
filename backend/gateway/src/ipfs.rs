//! Document storage on IPFS through a pinning service.
//!
//! - [`IpfsPinner`] abstracts the pinning service so tests and mock mode can
//!   run without network access.
//! - [`PinataClient`] talks to the Pinata pinning API.
//! - [`MockPinner`] keeps content in memory with deterministic CIDs.
//! - [`IpfsBridge`] is what the rest of the gateway uses: uploads, gateway
//!   URLs and plain-text reads for token metadata.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::errors::{GatewayError, Result};

/// A file handed to the pinning service.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    #[cfg(test)]
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
pub trait IpfsPinner: Send + Sync {
    /// Pin a file and return its CID.
    async fn pin_file(&self, file: UploadFile) -> Result<String>;

    /// Pin a JSON document and return its CID.
    async fn pin_json(&self, value: &Value) -> Result<String>;

    /// GET `url` and return the body as text.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// `<gateway>/<cid>[/<filename>]`
pub fn gateway_url(gateway: &str, cid: &str, filename: Option<&str>) -> String {
    let base = gateway.trim_end_matches('/');
    match filename {
        Some(name) => format!("{base}/{cid}/{name}"),
        None => format!("{base}/{cid}"),
    }
}

// ─────────────────────────────────────────────────────────
// Pinata
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

pub struct PinataClient {
    client: Client,
    api_url: String,
    jwt: Option<String>,
}

impl PinataClient {
    pub fn new(client: Client, api_url: &str, jwt: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            jwt,
        }
    }

    fn jwt(&self) -> Result<&str> {
        self.jwt
            .as_deref()
            .ok_or_else(|| GatewayError::UploadFailed("PINATA_JWT is not configured".to_string()))
    }

    async fn read_pin(response: reqwest::Response) -> Result<String> {
        let response = response
            .error_for_status()
            .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;
        let body: PinResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;
        Ok(body.ipfs_hash)
    }
}

#[async_trait]
impl IpfsPinner for PinataClient {
    async fn pin_file(&self, file: UploadFile) -> Result<String> {
        let jwt = self.jwt()?;

        let mut part = Part::bytes(file.bytes).file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;
        }
        let form = Form::new()
            .part("file", part)
            .text("pinataMetadata", json!({ "name": file.file_name }).to_string());

        let response = self
            .client
            .post(format!("{}/pinning/pinFileToIPFS", self.api_url))
            .bearer_auth(jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;

        Self::read_pin(response).await
    }

    async fn pin_json(&self, value: &Value) -> Result<String> {
        let jwt = self.jwt()?;
        let response = self
            .client
            .post(format!("{}/pinning/pinJSONToIPFS", self.api_url))
            .bearer_auth(jwt)
            .json(value)
            .send()
            .await
            .map_err(|e| GatewayError::UploadFailed(e.to_string()))?;

        Self::read_pin(response).await
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

// ─────────────────────────────────────────────────────────
// Mock
// ─────────────────────────────────────────────────────────

/// In-memory pinning service.
///
/// CIDs are derived from a hash of the content, so pinning the same bytes
/// twice yields the same CID. `fetch_text` serves pinned content for any URL
/// whose last path segment is a known CID, plus any page registered with
/// [`MockPinner::serve`].
#[derive(Default)]
pub struct MockPinner {
    pinned: RwLock<HashMap<String, Vec<u8>>>,
    pages: RwLock<HashMap<String, String>>,
    failing: bool,
}

impl MockPinner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pinner whose uploads always fail.
    #[cfg(test)]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Serve `body` for an exact `url`.
    #[cfg(test)]
    pub async fn serve(&self, url: &str, body: &str) {
        self.pages
            .write()
            .await
            .insert(url.to_string(), body.to_string());
    }

    #[cfg(test)]
    pub async fn has_cid(&self, cid: &str) -> bool {
        self.pinned.read().await.contains_key(cid)
    }

    async fn pin_bytes(&self, bytes: Vec<u8>) -> Result<String> {
        if self.failing {
            return Err(GatewayError::UploadFailed(
                "pinning service unavailable".to_string(),
            ));
        }
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        let cid = format!("bafymock{:016x}", hasher.finish());
        self.pinned.write().await.insert(cid.clone(), bytes);
        Ok(cid)
    }
}

#[async_trait]
impl IpfsPinner for MockPinner {
    async fn pin_file(&self, file: UploadFile) -> Result<String> {
        self.pin_bytes(file.bytes).await
    }

    async fn pin_json(&self, value: &Value) -> Result<String> {
        self.pin_bytes(serde_json::to_vec(value)?).await
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        if let Some(body) = self.pages.read().await.get(url) {
            return Ok(body.clone());
        }
        let cid = url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let pinned = self.pinned.read().await;
        let bytes = pinned
            .get(cid)
            .ok_or_else(|| GatewayError::NotFound(url.to_string()))?;
        String::from_utf8(bytes.clone()).map_err(|e| GatewayError::Metadata(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────

pub struct IpfsBridge {
    pinner: Arc<dyn IpfsPinner>,
    gateway_url: String,
    read_gateway_url: String,
}

impl IpfsBridge {
    pub fn new(pinner: Arc<dyn IpfsPinner>, gateway_url: &str, read_gateway_url: &str) -> Self {
        Self {
            pinner,
            gateway_url: gateway_url.to_string(),
            read_gateway_url: read_gateway_url.to_string(),
        }
    }

    /// Upload a file. Any failure is reported as [`GatewayError::UploadFailed`].
    pub async fn upload(&self, file: UploadFile) -> Result<String> {
        let name = file.file_name.clone();
        let size = file.bytes.len();
        match self.pinner.pin_file(file).await {
            Ok(cid) => {
                info!("Pinned {name} ({size} bytes) as {cid}");
                Ok(cid)
            }
            Err(e) => {
                error!("Error uploading {name} to IPFS: {e}");
                Err(into_upload_failed(e))
            }
        }
    }

    /// Upload files one after another; the first failure aborts the batch.
    pub async fn upload_many(&self, files: Vec<UploadFile>) -> Result<Vec<String>> {
        let mut cids = Vec::with_capacity(files.len());
        for file in files {
            cids.push(self.upload(file).await?);
        }
        Ok(cids)
    }

    pub async fn upload_json(&self, value: &Value) -> Result<String> {
        self.pinner.pin_json(value).await.map_err(|e| {
            error!("Error uploading metadata to IPFS: {e}");
            into_upload_failed(e)
        })
    }

    /// Public URL of a pinned document.
    pub fn resolve(&self, cid: &str, filename: Option<&str>) -> String {
        gateway_url(&self.gateway_url, cid, filename)
    }

    /// URL used to read `ipfs://` content such as token metadata.
    pub fn read_url(&self, cid: &str) -> String {
        gateway_url(&self.read_gateway_url, cid, None)
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("Fetching {url}");
        self.pinner.fetch_text(url).await
    }
}

fn into_upload_failed(e: GatewayError) -> GatewayError {
    match e {
        GatewayError::UploadFailed(_) => e,
        other => GatewayError::UploadFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(pinner: MockPinner) -> IpfsBridge {
        IpfsBridge::new(
            Arc::new(pinner),
            "https://gateway.pinata.cloud/ipfs/",
            "https://ipfs.io/ipfs/",
        )
    }

    #[test]
    fn gateway_url_with_and_without_filename() {
        assert_eq!(
            gateway_url("https://gateway.pinata.cloud/ipfs/", "QmAbc", None),
            "https://gateway.pinata.cloud/ipfs/QmAbc"
        );
        assert_eq!(
            gateway_url("https://gateway.pinata.cloud/ipfs", "QmAbc", Some("deck.pdf")),
            "https://gateway.pinata.cloud/ipfs/QmAbc/deck.pdf"
        );
    }

    #[tokio::test]
    async fn upload_then_read_back() {
        let ipfs = bridge(MockPinner::new());
        let cid = ipfs
            .upload(UploadFile::new("pitch.txt", b"hello".to_vec()))
            .await
            .unwrap();
        let text = ipfs.fetch_text(&ipfs.read_url(&cid)).await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(
            ipfs.resolve(&cid, None),
            format!("https://gateway.pinata.cloud/ipfs/{cid}")
        );
    }

    #[tokio::test]
    async fn identical_content_gets_identical_cid() {
        let ipfs = bridge(MockPinner::new());
        let a = ipfs.upload(UploadFile::new("a", b"same".to_vec())).await.unwrap();
        let b = ipfs.upload(UploadFile::new("b", b"same".to_vec())).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn pinning_failure_is_upload_failed() {
        let ipfs = bridge(MockPinner::failing());
        let err = ipfs
            .upload(UploadFile::new("a", b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UploadFailed(_)));

        let err = ipfs.upload_json(&json!({ "name": "x" })).await.unwrap_err();
        assert!(matches!(err, GatewayError::UploadFailed(_)));
    }

    #[tokio::test]
    async fn upload_many_returns_cids_in_order() {
        let ipfs = bridge(MockPinner::new());
        let cids = ipfs
            .upload_many(vec![
                UploadFile::new("one", b"1".to_vec()),
                UploadFile::new("two", b"2".to_vec()),
            ])
            .await
            .unwrap();
        assert_eq!(cids.len(), 2);
        assert_ne!(cids[0], cids[1]);
    }

    #[tokio::test]
    async fn pinata_without_jwt_fails_before_any_request() {
        let pinata = PinataClient::new(Client::new(), "http://127.0.0.1:9", None);
        let err = pinata
            .pin_file(UploadFile::new("a", b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UploadFailed(_)));
    }
}
