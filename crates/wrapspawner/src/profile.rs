//! Profile and catalog types.

use serde::{Deserialize, Serialize};

/// Configuration map handed to a launcher factory.
pub type LauncherConfig = serde_json::Map<String, serde_json::Value>;

/// Opaque state blob owned by a launcher.
pub type StateMap = serde_json::Map<String, serde_json::Value>;

/// Group name that makes a profile visible to everyone.
pub const WILDCARD_GROUP: &str = "*";

/// A named launcher configuration a user can pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Human-readable name shown in the options form.
    pub display_name: String,
    /// Unique key within a catalog.
    pub key: String,
    /// Launcher class identifier, looked up in the launcher registry.
    pub launcher: String,
    /// Launcher configuration applied at construction.
    #[serde(default)]
    pub config: LauncherConfig,
    /// Groups allowed to use this profile, scanned in order.
    ///
    /// `None` means the profile carries no group constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_groups: Option<Vec<String>>,
}

impl Profile {
    /// Create an unconstrained profile with an empty configuration.
    pub fn new(
        display_name: impl Into<String>,
        key: impl Into<String>,
        launcher: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            key: key.into(),
            launcher: launcher.into(),
            config: LauncherConfig::new(),
            allowed_groups: None,
        }
    }

    /// Set the launcher configuration.
    pub fn with_config(mut self, config: LauncherConfig) -> Self {
        self.config = config;
        self
    }

    /// Restrict the profile to the given groups.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Copy of this profile without its group constraint.
    pub fn without_groups(&self) -> Self {
        Self {
            allowed_groups: None,
            ..self.clone()
        }
    }
}

/// Ordered list of profiles visible to one user for one request.
///
/// The first entry is the default selection.
pub type Catalog = Vec<Profile>;

/// Find a profile by key.
pub fn find_profile<'a>(catalog: &'a [Profile], key: &str) -> Option<&'a Profile> {
    catalog.iter().find(|p| p.key == key)
}

/// Build a [`LauncherConfig`] from a JSON object literal.
///
/// Non-object values produce an empty map.
pub fn config_from_value(value: serde_json::Value) -> LauncherConfig {
    match value {
        serde_json::Value::Object(map) => map,
        _ => LauncherConfig::new(),
    }
}
