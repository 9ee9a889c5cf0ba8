//! One profile per local container image whose tag matches a suffix.

mod accelerator;
mod error;
mod runtime;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ProfileProvider;
use crate::context::SpawnContext;
use crate::error::{SpawnerError, SpawnerResult};
use crate::profile::{Catalog, LauncherConfig, Profile};
use crate::resolver::validate_catalog;

pub use accelerator::{AcceleratorInfo, AcceleratorSource, HttpAcceleratorSource};
pub use error::{ContainerError, ContainerResult};
pub use runtime::{ContainerRuntime, ImageSource, RuntimeType};

/// Configuration for [`ContainerImageProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerProviderSettings {
    /// Runtime to query. Auto-detected when unset.
    pub runtime: Option<RuntimeType>,
    /// Custom runtime binary path.
    pub binary: Option<String>,
    /// Only tags ending with this suffix become profiles.
    pub tag_suffix: String,
    /// Launcher identifier of synthesized profiles.
    pub launcher: String,
    /// Arguments merged into every synthesized profile.
    pub launcher_args: LauncherConfig,
    /// Accelerator discovery endpoint. Empty disables discovery.
    pub accelerator_url: String,
    /// Profiles offered before the image profiles.
    pub default_profiles: Catalog,
}

impl Default for ContainerProviderSettings {
    fn default() -> Self {
        Self {
            runtime: None,
            binary: None,
            tag_suffix: "jupyterhub".to_string(),
            launcher: "docker".to_string(),
            launcher_args: LauncherConfig::new(),
            accelerator_url: "http://localhost:3476/v1.0/docker/cli/json".to_string(),
            default_profiles: Vec::new(),
        }
    }
}

/// Enumerates local images on every request.
pub struct ContainerImageProvider {
    settings: ContainerProviderSettings,
    tag_pattern: Regex,
    images: Arc<dyn ImageSource>,
    accelerator: Option<Arc<dyn AcceleratorSource>>,
}

impl ContainerImageProvider {
    /// Provider backed by the container CLI and the HTTP discovery endpoint.
    pub fn new(settings: ContainerProviderSettings) -> SpawnerResult<Self> {
        let runtime = match (settings.runtime, &settings.binary) {
            (Some(runtime), Some(binary)) => ContainerRuntime::with_binary(runtime, binary),
            (Some(runtime), None) => ContainerRuntime::with_type(runtime),
            (None, _) => ContainerRuntime::detect().unwrap_or_else(|e| {
                warn!("{}; image profiles will be unavailable", e);
                ContainerRuntime::with_type(RuntimeType::default())
            }),
        };

        let accelerator: Option<Arc<dyn AcceleratorSource>> = if settings.accelerator_url.is_empty()
        {
            None
        } else {
            Some(Arc::new(HttpAcceleratorSource::new(
                settings.accelerator_url.clone(),
            )))
        };

        Self::with_sources(settings, Arc::new(runtime), accelerator)
    }

    pub fn with_sources(
        settings: ContainerProviderSettings,
        images: Arc<dyn ImageSource>,
        accelerator: Option<Arc<dyn AcceleratorSource>>,
    ) -> SpawnerResult<Self> {
        validate_catalog(&settings.default_profiles)?;
        let tag_pattern = Regex::new(&format!("^.*{}$", regex::escape(&settings.tag_suffix)))
            .map_err(|e| SpawnerError::Config(format!("invalid tag suffix: {e}")))?;

        Ok(Self {
            settings,
            tag_pattern,
            images,
            accelerator,
        })
    }

    async fn accelerator_args(&self) -> LauncherConfig {
        let Some(source) = &self.accelerator else {
            return LauncherConfig::new();
        };
        source.accelerator_args().await.unwrap_or_else(|e| {
            warn!("Accelerator discovery unavailable: {}", e);
            LauncherConfig::new()
        })
    }

    fn image_profile(&self, user: &str, tag: &str, accelerator: &LauncherConfig) -> Profile {
        let mut config = LauncherConfig::new();
        config.insert("container_image".to_string(), json!(tag));
        config.insert("network_name".to_string(), json!(user));
        config.extend(self.settings.launcher_args.clone());
        config.extend(accelerator.clone());

        let gpu = if accelerator.is_empty() { "no GPU" } else { "w/GPU" };
        Profile {
            display_name: format!("Docker: ({gpu}): {tag}"),
            key: format!("docker-{tag}"),
            launcher: self.settings.launcher.clone(),
            config,
            allowed_groups: None,
        }
    }
}

#[async_trait]
impl ProfileProvider for ContainerImageProvider {
    async fn profiles(&self, ctx: &SpawnContext) -> Catalog {
        let mut catalog = self.settings.default_profiles.clone();

        let tags = match self.images.image_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Could not enumerate container images: {}", e);
                return catalog;
            }
        };

        let matching: Vec<String> = tags
            .into_iter()
            .filter(|tag| self.tag_pattern.is_match(tag))
            .collect();
        debug!(
            "{} container images match suffix '{}'",
            matching.len(),
            self.settings.tag_suffix
        );
        if matching.is_empty() {
            return catalog;
        }

        let accelerator = self.accelerator_args().await;
        let mut keys: HashSet<String> = catalog.iter().map(|p| p.key.clone()).collect();
        for tag in &matching {
            let profile = self.image_profile(&ctx.user, tag, &accelerator);
            if !keys.insert(profile.key.clone()) {
                warn!(
                    "Skipping container image {}: profile key '{}' is already in use",
                    tag, profile.key
                );
                continue;
            }
            catalog.push(profile);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeImages(ContainerResult<Vec<String>>);

    #[async_trait]
    impl ImageSource for FakeImages {
        async fn image_tags(&self) -> ContainerResult<Vec<String>> {
            match &self.0 {
                Ok(tags) => Ok(tags.clone()),
                Err(_) => Err(ContainerError::NoRuntimeAvailable),
            }
        }
    }

    struct FakeAccelerator(Option<LauncherConfig>);

    #[async_trait]
    impl AcceleratorSource for FakeAccelerator {
        async fn accelerator_args(&self) -> ContainerResult<LauncherConfig> {
            self.0.clone().ok_or_else(|| ContainerError::Discovery {
                url: "http://localhost:3476".to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn tags(tags: &[&str]) -> Arc<FakeImages> {
        Arc::new(FakeImages(Ok(tags.iter().map(|t| t.to_string()).collect())))
    }

    fn settings() -> ContainerProviderSettings {
        ContainerProviderSettings {
            launcher_args: crate::profile::config_from_value(json!({"remove": true})),
            default_profiles: vec![Profile::new("Local", "local", "local")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_matching_tags_become_profiles_after_defaults() {
        let provider = ContainerImageProvider::with_sources(
            settings(),
            tags(&["lab:jupyterhub", "base:latest", "gpu/jupyterhub"]),
            None,
        )
        .unwrap();

        let catalog = provider.profiles(&SpawnContext::new("alice")).await;
        let keys: Vec<&str> = catalog.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["local", "docker-lab:jupyterhub", "docker-gpu/jupyterhub"]);

        let image = &catalog[1];
        assert_eq!(image.display_name, "Docker: (no GPU): lab:jupyterhub");
        assert_eq!(image.launcher, "docker");
        assert_eq!(image.config["container_image"], "lab:jupyterhub");
        assert_eq!(image.config["network_name"], "alice");
        assert_eq!(image.config["remove"], true);
    }

    #[tokio::test]
    async fn test_accelerator_args_mark_gpu_profiles() {
        let accel = crate::profile::config_from_value(json!({
            "extra_host_config": {"devices": ["/dev/nvidia0"]}
        }));
        let provider = ContainerImageProvider::with_sources(
            settings(),
            tags(&["lab:jupyterhub"]),
            Some(Arc::new(FakeAccelerator(Some(accel)))),
        )
        .unwrap();

        let catalog = provider.profiles(&SpawnContext::new("bob")).await;
        assert_eq!(catalog[1].display_name, "Docker: (w/GPU): lab:jupyterhub");
        assert_eq!(
            catalog[1].config["extra_host_config"],
            json!({"devices": ["/dev/nvidia0"]})
        );
    }

    #[tokio::test]
    async fn test_failed_discovery_yields_plain_profiles() {
        let provider = ContainerImageProvider::with_sources(
            settings(),
            tags(&["lab:jupyterhub"]),
            Some(Arc::new(FakeAccelerator(None))),
        )
        .unwrap();

        let catalog = provider.profiles(&SpawnContext::new("carol")).await;
        assert_eq!(catalog.len(), 2);
        assert!(catalog[1].display_name.contains("no GPU"));
        assert!(!catalog[1].config.contains_key("extra_host_config"));
    }

    #[tokio::test]
    async fn test_image_colliding_with_default_key_is_skipped() {
        testing_logger::setup();

        let mut settings = settings();
        settings
            .default_profiles
            .push(Profile::new("Pinned lab", "docker-lab:jupyterhub", "docker"));
        let provider = ContainerImageProvider::with_sources(
            settings,
            tags(&["lab:jupyterhub", "r:jupyterhub", "r:jupyterhub"]),
            None,
        )
        .unwrap();

        let catalog = provider.profiles(&SpawnContext::new("erin")).await;
        let keys: Vec<&str> = catalog.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["local", "docker-lab:jupyterhub", "docker-r:jupyterhub"]);
        assert_eq!(catalog[1].display_name, "Pinned lab");
        assert!(validate_catalog(&catalog).is_ok());

        testing_logger::validate(|logs| {
            let skipped = logs
                .iter()
                .filter(|l| l.level == log::Level::Warn && l.body.starts_with("Skipping container image"))
                .count();
            assert_eq!(skipped, 2);
        });
    }

    #[tokio::test]
    async fn test_runtime_failure_keeps_default_profiles() {
        let provider = ContainerImageProvider::with_sources(
            settings(),
            Arc::new(FakeImages(Err(ContainerError::NoRuntimeAvailable))),
            None,
        )
        .unwrap();

        let catalog = provider.profiles(&SpawnContext::new("dave")).await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].key, "local");
    }

    #[test]
    fn test_suffix_is_matched_literally() {
        let provider = ContainerImageProvider::with_sources(
            ContainerProviderSettings {
                tag_suffix: "hub.v1".to_string(),
                ..Default::default()
            },
            tags(&[]),
            None,
        )
        .unwrap();
        assert!(provider.tag_pattern.is_match("lab:hub.v1"));
        assert!(!provider.tag_pattern.is_match("lab:hubxv1"));
    }

    #[test]
    fn test_duplicate_default_profiles_are_rejected() {
        let result = ContainerImageProvider::with_sources(
            ContainerProviderSettings {
                default_profiles: vec![
                    Profile::new("A", "same", "local"),
                    Profile::new("B", "same", "local"),
                ],
                ..Default::default()
            },
            tags(&[]),
            None,
        );
        assert!(matches!(result, Err(SpawnerError::DuplicateProfileKeys(_))));
    }
}
