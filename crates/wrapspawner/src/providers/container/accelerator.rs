//! Host accelerator discovery.
//!
//! The discovery endpoint describes the volumes and devices a container needs
//! to use the host GPUs. Its answer is turned into launcher arguments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::error::{ContainerError, ContainerResult};
use crate::profile::LauncherConfig;

/// Produces launcher arguments granting accelerator access.
#[async_trait]
pub trait AcceleratorSource: Send + Sync {
    async fn accelerator_args(&self) -> ContainerResult<LauncherConfig>;
}

/// Discovery endpoint response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AcceleratorInfo {
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub volume_driver: Option<String>,
    #[serde(default)]
    pub devices: Vec<String>,
}

impl AcceleratorInfo {
    /// Launcher arguments for this accelerator setup.
    ///
    /// `host:container` volumes become a read-only volume map; entries
    /// without a container path are skipped.
    pub fn to_launcher_args(&self) -> LauncherConfig {
        let volumes: serde_json::Map<String, serde_json::Value> = self
            .volumes
            .iter()
            .filter_map(|volume| volume.split_once(':'))
            .map(|(host, container)| {
                let container = container.split(':').next().unwrap_or(container);
                (host.to_string(), json!(container))
            })
            .collect();

        let mut args = LauncherConfig::new();
        args.insert("read_only_volumes".to_string(), volumes.into());
        args.insert(
            "extra_create_kwargs".to_string(),
            json!({"volume_driver": self.volume_driver}),
        );
        args.insert(
            "extra_host_config".to_string(),
            json!({"devices": self.devices}),
        );
        args
    }
}

/// Queries the discovery endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAcceleratorSource {
    client: Client,
    url: String,
}

impl HttpAcceleratorSource {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: url.into(),
        }
    }

    fn discovery_error(&self, message: impl ToString) -> ContainerError {
        ContainerError::Discovery {
            url: self.url.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl AcceleratorSource for HttpAcceleratorSource {
    async fn accelerator_args(&self) -> ContainerResult<LauncherConfig> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.discovery_error(e))?;

        if !response.status().is_success() {
            return Err(self.discovery_error(format!("status {}", response.status())));
        }

        let info: AcceleratorInfo = response
            .json()
            .await
            .map_err(|e| self.discovery_error(e))?;
        Ok(info.to_launcher_args())
    }
}
