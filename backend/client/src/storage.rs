//! Off-chain payload storage.
//!
//! Device metadata and readings are stored as JSON documents on IPFS via
//! web3.storage and referenced on-chain by their CID.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::errors::{DappError, Result};

/// Maximum payload size accepted on retrieval
const MAX_PAYLOAD_SIZE: u64 = 10 * 1024 * 1024;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a JSON payload under a file name and return its CID.
    async fn store(&self, name: &str, payload: &Value) -> Result<String>;

    /// Fetch a previously stored JSON payload.
    async fn retrieve(&self, cid: &str) -> Result<Value>;
}

/// Device description stored off-chain at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub location: String,
    pub owner: String,
    pub status: String,
    pub registered_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<BTreeMap<String, Value>>,
}

impl DeviceMetadata {
    /// New active device, stamped with the current time.
    pub fn new(name: &str, device_type: &str, location: &str, owner: &str) -> Self {
        let registered_at = Utc::now().to_rfc3339();
        let mut additional_info = BTreeMap::new();
        additional_info.insert("registeredAt".to_string(), Value::String(registered_at.clone()));
        Self {
            name: name.to_string(),
            device_type: device_type.to_string(),
            location: location.to_string(),
            owner: owner.to_string(),
            status: "active".to_string(),
            registered_at,
            additional_info: Some(additional_info),
        }
    }

    /// Upload file name: the device name with whitespace runs replaced by `-`.
    pub fn file_name(&self) -> String {
        let slug = self.name.split_whitespace().collect::<Vec<_>>().join("-");
        format!("{slug}.json")
    }
}

pub async fn store_device_metadata(
    store: &dyn ContentStore,
    metadata: &DeviceMetadata,
) -> Result<String> {
    let payload = serde_json::to_value(metadata)
        .map_err(|e| DappError::Storage(format!("Failed to encode device metadata: {e}")))?;
    let cid = store.store(&metadata.file_name(), &payload).await?;
    info!("Stored metadata for device '{}' as {}", metadata.name, cid);
    Ok(cid)
}

pub async fn retrieve_device_metadata(
    store: &dyn ContentStore,
    cid: &str,
) -> Result<DeviceMetadata> {
    let payload = store.retrieve(cid).await?;
    serde_json::from_value(payload)
        .map_err(|e| DappError::Storage(format!("Malformed device metadata at {cid}: {e}")))
}

/// Store a free-form reading for a device under `device-{id}-{millis}.json`.
pub async fn store_device_data(
    store: &dyn ContentStore,
    device_id: &str,
    data: &Value,
) -> Result<String> {
    let name = format!("device-{}-{}.json", device_id, Utc::now().timestamp_millis());
    store.store(&name, data).await
}

/// web3.storage HTTP client.
pub struct Web3Storage {
    client: Client,
    api_url: String,
    gateway: String,
    token: Option<String>,
}

impl Web3Storage {
    pub fn new(api_url: &str, gateway: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DappError::Storage(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            gateway: gateway.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.storage_api_url,
            &config.ipfs_gateway,
            config.web3_storage_token.clone(),
            config.timeout(),
        )
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| DappError::Storage("Web3Storage token not configured".to_string()))
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    cid: String,
}

#[async_trait]
impl ContentStore for Web3Storage {
    async fn store(&self, name: &str, payload: &Value) -> Result<String> {
        let token = self.token()?;
        let body = serde_json::to_vec(payload)
            .map_err(|e| DappError::Storage(format!("Failed to encode payload: {e}")))?;

        let response = self
            .client
            .post(format!("{}/upload", self.api_url))
            .bearer_auth(token)
            .header("X-Name", name)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!("Error uploading {}: {}", name, e);
                DappError::Storage(format!("Upload failed: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(DappError::Storage(format!(
                "Upload of {name} returned status {}",
                response.status()
            )));
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| DappError::Storage(format!("Failed to parse upload response: {e}")))?;

        debug!("Stored {} with CID {}", name, upload.cid);
        Ok(upload.cid)
    }

    async fn retrieve(&self, cid: &str) -> Result<Value> {
        let url = format!("{}/ipfs/{}", self.gateway, cid);
        info!("Fetching payload from: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DappError::Storage(format!("IPFS fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DappError::Storage(format!(
                "IPFS returned status {}: CID {} not found or inaccessible",
                response.status(),
                cid
            )));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_PAYLOAD_SIZE {
                return Err(DappError::Storage(format!(
                    "Payload too large: {len} bytes (max: {MAX_PAYLOAD_SIZE} bytes)"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DappError::Storage(format!("Failed to read response body: {e}")))?;

        if bytes.is_empty() {
            return Err(DappError::Storage(format!("No content found at {cid}")));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| DappError::Storage(format!("Payload at {cid} is not JSON: {e}")))
    }
}
