//! Service configuration.
//!
//! Loaded from defaults, then an optional TOML file, then environment
//! variables prefixed with `WRAPSPAWNER__` (`__` separates nested keys,
//! e.g. `WRAPSPAWNER__PROVIDER__KIND=file`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::SpawnContext;
use crate::error::{SpawnerError, SpawnerResult};
use crate::filter::FilterKind;
use crate::form::FormConfig;
use crate::profile::{Catalog, LauncherConfig, Profile, WILDCARD_GROUP};
use crate::providers::{
    ContainerImageProvider, ContainerProviderSettings, FileProvider, FileProviderSettings,
    FilteredProvider, ProfileProvider, RemoteProvider, RemoteProviderSettings, StaticProvider,
};
use crate::registry::{LOCAL_LAUNCHER, LauncherRegistry};
use crate::wrapper::WrapSpawner;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "WRAPSPAWNER";

/// A profile as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub display_name: String,
    pub key: String,
    pub launcher: String,
    #[serde(default)]
    pub config: LauncherConfig,
    #[serde(default = "default_allowed_groups")]
    pub allowed_groups: Vec<String>,
}

fn default_allowed_groups() -> Vec<String> {
    vec![WILDCARD_GROUP.to_string()]
}

impl ProfileConfig {
    fn to_profile(&self) -> Profile {
        Profile {
            display_name: self.display_name.clone(),
            key: self.key.clone(),
            launcher: self.launcher.clone(),
            config: self.config.clone(),
            allowed_groups: Some(self.allowed_groups.clone()),
        }
    }
}

fn to_catalog(profiles: &[ProfileConfig], keep_groups: bool) -> Catalog {
    profiles
        .iter()
        .map(ProfileConfig::to_profile)
        .map(|p| if keep_groups { p } else { p.without_groups() })
        .collect()
}

/// Where profiles come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// The same list for everyone.
    Static { profiles: Vec<ProfileConfig> },
    /// A list narrowed per user by group membership.
    Filtered {
        profiles: Vec<ProfileConfig>,
        #[serde(default)]
        filter: FilterKind,
    },
    /// Common and per-user JSON files.
    File(FileProviderSettings),
    /// A remote profile service.
    Remote(RemoteProviderSettings),
    /// Local container images.
    Container(ContainerProviderSettings),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Static {
            profiles: vec![ProfileConfig {
                display_name: "Local Notebook Server".to_string(),
                key: "local".to_string(),
                launcher: LOCAL_LAUNCHER.to_string(),
                config: crate::profile::config_from_value(
                    json!({"start_timeout": 15, "http_timeout": 10}),
                ),
                allowed_groups: default_allowed_groups(),
            }],
        }
    }
}

impl ProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Static { .. } => "static",
            ProviderConfig::Filtered { .. } => "filtered",
            ProviderConfig::File(_) => "file",
            ProviderConfig::Remote(_) => "remote",
            ProviderConfig::Container(_) => "container",
        }
    }
}

/// Launcher registry settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Extra launcher names mapped onto registered identifiers.
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapSpawnerConfig {
    pub provider: ProviderConfig,
    pub form: FormConfig,
    /// Wrapper-side shared field values, linked into launchers.
    pub shared: LauncherConfig,
    pub registry: RegistryConfig,
}

impl Default for WrapSpawnerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            form: FormConfig::default(),
            shared: crate::profile::config_from_value(
                json!({"start_timeout": 60, "http_timeout": 30}),
            ),
            registry: RegistryConfig::default(),
        }
    }
}

impl WrapSpawnerConfig {
    /// Load from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> SpawnerResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let built = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| SpawnerError::Config(e.to_string()))?;

        let mut config: Self = built
            .try_deserialize()
            .map_err(|e| SpawnerError::Config(e.to_string()))?;
        config.expand_paths()?;
        Ok(config)
    }

    fn expand_paths(&mut self) -> SpawnerResult<()> {
        if let ProviderConfig::File(settings) = &mut self.provider {
            settings.common_profiles_path = expand_path(&settings.common_profiles_path)?;
            if let Some(base) = &settings.home_base_dir {
                settings.home_base_dir = Some(expand_path(base)?);
            }
        }
        Ok(())
    }

    /// Built-in launchers plus the configured aliases.
    pub fn build_registry(&self) -> LauncherRegistry {
        let mut registry = LauncherRegistry::with_builtin();
        for (alias, target) in &self.registry.aliases {
            registry.alias(alias, target);
        }
        registry
    }

    /// Build the configured provider.
    ///
    /// Configured lists are validated here: duplicate keys, empty lists and
    /// unknown launchers are fatal.
    pub fn build_provider(
        &self,
        registry: &LauncherRegistry,
    ) -> SpawnerResult<Arc<dyn ProfileProvider>> {
        let provider: Arc<dyn ProfileProvider> = match &self.provider {
            ProviderConfig::Static { profiles } => {
                let catalog = to_catalog(profiles, false);
                registry.validate(&catalog)?;
                Arc::new(StaticProvider::new(catalog)?)
            }
            ProviderConfig::Filtered { profiles, filter } => {
                let catalog = to_catalog(profiles, true);
                registry.validate(&catalog)?;
                Arc::new(FilteredProvider::new(catalog, filter.build())?)
            }
            ProviderConfig::File(settings) => Arc::new(FileProvider::new(settings.clone())),
            ProviderConfig::Remote(settings) => Arc::new(RemoteProvider::new(settings.clone())),
            ProviderConfig::Container(settings) => {
                registry.validate(&settings.default_profiles)?;
                Arc::new(ContainerImageProvider::new(settings.clone())?)
            }
        };
        Ok(provider)
    }

    /// A wrapper for one session, carrying the configured shared fields and form.
    pub fn build_wrapper(
        &self,
        ctx: SpawnContext,
        provider: Arc<dyn ProfileProvider>,
        registry: Arc<LauncherRegistry>,
    ) -> WrapSpawner {
        WrapSpawner::new(ctx, provider, registry)
            .with_shared_fields(self.shared.clone())
            .with_form(self.form.clone())
    }
}

fn expand_path(path: &Path) -> SpawnerResult<PathBuf> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    let expanded = shellexpand::full(text)
        .map_err(|e| SpawnerError::Config(format!("expanding path {text}: {e}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
