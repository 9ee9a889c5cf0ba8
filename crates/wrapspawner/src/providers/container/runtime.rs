//! Image enumeration through the docker or podman CLI.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::error::{ContainerError, ContainerResult};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    #[default]
    Docker,
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_binary())
    }
}

/// Lists the image tags available to the local runtime.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn image_tags(&self) -> ContainerResult<Vec<String>>;
}

/// Container runtime CLI client.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    /// Path to the container binary
    binary: String,
}

impl ContainerRuntime {
    /// Detect an installed runtime, preferring Docker.
    pub fn detect() -> ContainerResult<Self> {
        [RuntimeType::Docker, RuntimeType::Podman]
            .into_iter()
            .find(|runtime| Self::is_binary_available(runtime.default_binary()))
            .map(Self::with_type)
            .ok_or(ContainerError::NoRuntimeAvailable)
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    /// Create a container runtime with a custom binary path.
    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Check if a binary is available in PATH.
    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// All `repository:tag` names of local images.
    pub async fn list_image_tags(&self) -> ContainerResult<Vec<String>> {
        let output = Command::new(&self.binary)
            .args(["images", "--format", "json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "images".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: "images".to_string(),
                message: stderr.to_string(),
            });
        }

        parse_image_tags(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ImageSource for ContainerRuntime {
    async fn image_tags(&self) -> ContainerResult<Vec<String>> {
        self.list_image_tags().await
    }
}

/// One line of `docker images --format json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerImage {
    repository: String,
    tag: String,
}

/// One element of `podman images --format json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PodmanImage {
    #[serde(default)]
    names: Option<Vec<String>>,
}

/// Parse image listings. Docker prints one object per line, podman one array.
pub(crate) fn parse_image_tags(stdout: &str) -> ContainerResult<Vec<String>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let images: Vec<PodmanImage> =
            serde_json::from_str(trimmed).map_err(|e| ContainerError::ParseError(e.to_string()))?;
        return Ok(images
            .into_iter()
            .flat_map(|image| image.names.unwrap_or_default())
            .collect());
    }

    let mut tags = Vec::new();
    for line in trimmed.lines().filter(|line| !line.trim().is_empty()) {
        let image: DockerImage =
            serde_json::from_str(line).map_err(|e| ContainerError::ParseError(e.to_string()))?;
        if image.repository == "<none>" || image.tag == "<none>" {
            continue;
        }
        tags.push(format!("{}:{}", image.repository, image.tag));
    }
    Ok(tags)
}
