//! Node REST API access

use crate::config::NodeConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Read-only contract query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmValueRequest {
    /// Queried contract
    pub sc_address: String,
    /// View function
    pub func_name: String,
    /// Caller address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    /// Call value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Hex-encoded arguments
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VmValueResponse {
    #[serde(default)]
    data: Option<VmValueData>,
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Default, Deserialize)]
struct VmValueData {
    #[serde(default)]
    data: Option<VmOutput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmOutput {
    #[serde(default)]
    return_data: Option<Vec<Option<String>>>,
}

/// Subset of `/network/config` the tool needs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    /// Genesis unix time
    pub erd_start_time: i64,
    /// Chain identifier
    #[serde(default)]
    pub erd_chain_id: String,
}

#[derive(Debug, Deserialize)]
struct NetworkConfigResponse {
    data: NetworkConfigData,
}

#[derive(Debug, Deserialize)]
struct NetworkConfigData {
    config: NetworkConfig,
}

/// Node gateway used for contract views and network parameters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Execute a view function; returns the decoded `returnData` items
    async fn query_vm_values(&self, request: &VmValueRequest) -> Result<Vec<Vec<u8>>>;

    /// Network parameters
    async fn network_config(&self) -> Result<NetworkConfig>;
}

/// reqwest-backed [`NodeApi`]
pub struct HttpNodeApi {
    base_url: String,
    client: Client,
}

impl HttpNodeApi {
    /// Client for the configured gateway
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    async fn query_vm_values(&self, request: &VmValueRequest) -> Result<Vec<Vec<u8>>> {
        let url = format!("{}/vm-values/query", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("vm-values query {} failed: {}", request.func_name, e);
                Error::Fetch(format!("vm-values request failed: {}", e))
            })?;

        let status = response.status();
        let body = response.json::<VmValueResponse>().await.map_err(|e| {
            Error::Fetch(format!(
                "failed to parse vm-values response (status {}): {}",
                status, e
            ))
        })?;

        if !body.error.is_empty() {
            return Err(Error::Fetch(format!(
                "vm-values {} returned {}: {}",
                request.func_name, body.code, body.error
            )));
        }
        if !status.is_success() {
            return Err(Error::Fetch(format!("vm-values failed with status {}", status)));
        }

        decode_return_data(body)
    }

    async fn network_config(&self) -> Result<NetworkConfig> {
        let url = format!("{}/network/config", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("network config request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!(
                "network config failed with status {}: {}",
                status, error_text
            )));
        }

        let body = response
            .json::<NetworkConfigResponse>()
            .await
            .map_err(|e| Error::Fetch(format!("failed to parse network config: {}", e)))?;

        debug!(start_time = body.data.config.erd_start_time, "network config");
        Ok(body.data.config)
    }
}

fn decode_return_data(body: VmValueResponse) -> Result<Vec<Vec<u8>>> {
    let items = body
        .data
        .and_then(|d| d.data)
        .and_then(|o| o.return_data)
        .unwrap_or_default();

    items
        .into_iter()
        .map(|item| match item {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| Error::Decode(format!("returnData item is not base64: {}", e))),
            None => Ok(Vec::new()),
        })
        .collect()
}
