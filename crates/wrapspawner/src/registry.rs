//! Registry mapping launcher identifiers to factories.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;

use crate::context::SpawnContext;
use crate::error::{SpawnerError, SpawnerResult};
use crate::launcher::Launcher;
use crate::launchers::LocalProcessLauncher;
use crate::profile::{LauncherConfig, Profile};

/// Builds a launcher for one session.
pub trait LauncherFactory: Send + Sync {
    fn construct(&self, ctx: &SpawnContext, config: &LauncherConfig) -> Result<Box<dyn Launcher>>;
}

impl<F> LauncherFactory for F
where
    F: Fn(&SpawnContext, &LauncherConfig) -> Result<Box<dyn Launcher>> + Send + Sync,
{
    fn construct(&self, ctx: &SpawnContext, config: &LauncherConfig) -> Result<Box<dyn Launcher>> {
        self(ctx, config)
    }
}

/// Identifier of the built-in local process launcher.
pub const LOCAL_LAUNCHER: &str = "local";

/// Known launcher factories, keyed by identifier.
#[derive(Clone, Default)]
pub struct LauncherRegistry {
    factories: HashMap<String, Arc<dyn LauncherFactory>>,
    aliases: HashMap<String, String>,
}

impl std::fmt::Debug for LauncherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherRegistry")
            .field("launchers", &self.ids())
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl LauncherRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in launchers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            LOCAL_LAUNCHER,
            |ctx: &SpawnContext, config: &LauncherConfig| -> Result<Box<dyn Launcher>> {
                Ok(Box::new(LocalProcessLauncher::new(ctx, config)?))
            },
        );
        registry
    }

    /// Register a factory under `id`, replacing any previous one.
    pub fn register(&mut self, id: impl Into<String>, factory: impl LauncherFactory + 'static) {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    /// Make `alias` resolve to the launcher registered as `target`.
    pub fn alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
    }

    fn canonical<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Whether `id` (or an alias of it) is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(self.canonical(id))
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> BTreeSet<String> {
        self.factories.keys().cloned().collect()
    }

    /// Construct the launcher a profile asks for.
    pub fn construct(
        &self,
        ctx: &SpawnContext,
        profile_key: &str,
        launcher: &str,
        config: &LauncherConfig,
    ) -> SpawnerResult<Box<dyn Launcher>> {
        let factory = self
            .factories
            .get(self.canonical(launcher))
            .ok_or_else(|| SpawnerError::UnknownLauncher {
                launcher: launcher.to_string(),
                profile: profile_key.to_string(),
            })?;

        factory
            .construct(ctx, config)
            .map_err(|e| SpawnerError::launcher("construct", e))
    }

    /// Fail on the first profile whose launcher is not registered.
    pub fn validate(&self, catalog: &[Profile]) -> SpawnerResult<()> {
        match catalog.iter().find(|p| !self.contains(&p.launcher)) {
            Some(p) => Err(SpawnerError::UnknownLauncher {
                launcher: p.launcher.clone(),
                profile: p.key.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_local() {
        let registry = LauncherRegistry::with_builtin();
        assert!(registry.contains(LOCAL_LAUNCHER));
        assert!(!registry.contains("batch"));
    }

    #[test]
    fn test_alias_resolves_to_target() {
        let mut registry = LauncherRegistry::with_builtin();
        registry.alias("jupyterhub.spawner.LocalProcessSpawner", LOCAL_LAUNCHER);
        assert!(registry.contains("jupyterhub.spawner.LocalProcessSpawner"));
        assert_eq!(registry.ids().len(), 1);
    }

    #[test]
    fn test_construct_unknown_launcher_fails() {
        let registry = LauncherRegistry::new();
        let ctx = SpawnContext::new("alice");
        let err = registry
            .construct(&ctx, "gpu", "batch", &LauncherConfig::new())
            .err()
            .unwrap();
        assert!(matches!(err, SpawnerError::UnknownLauncher { .. }));
    }

    #[test]
    fn test_validate_reports_offending_profile() {
        let registry = LauncherRegistry::with_builtin();
        let catalog = vec![
            Profile::new("Local", "local", LOCAL_LAUNCHER),
            Profile::new("Slurm", "slurm", "batchspawner.SlurmSpawner"),
        ];
        match registry.validate(&catalog).unwrap_err() {
            SpawnerError::UnknownLauncher { launcher, profile } => {
                assert_eq!(launcher, "batchspawner.SlurmSpawner");
                assert_eq!(profile, "slurm");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
