//! Profile filters that narrow a catalog to what one user may use.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::profile::{Profile, WILDCARD_GROUP};

/// Strategy that decides which profiles a user may see.
#[async_trait]
pub trait ProfileFilter: Send + Sync {
    /// Return the profiles `user` is permitted to use, in catalog order.
    async fn apply(&self, profiles: &[Profile], user: &str) -> Vec<Profile>;
}

/// Lets everyone use every profile. Group constraints are stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllFilter;

#[async_trait]
impl ProfileFilter for AllowAllFilter {
    async fn apply(&self, profiles: &[Profile], _user: &str) -> Vec<Profile> {
        profiles.iter().map(Profile::without_groups).collect()
    }
}

/// Source of group membership.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Members of `group`, or `None` when the group does not exist.
    async fn members(&self, group: &str) -> Result<Option<Vec<String>>>;
}

/// Group directory backed by `getent group`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetentGroupDirectory;

#[async_trait]
impl GroupDirectory for GetentGroupDirectory {
    async fn members(&self, group: &str) -> Result<Option<Vec<String>>> {
        let output = Command::new("getent")
            .args(["group", group])
            .output()
            .await
            .context("looking up group members")?;

        if !output.status.success() {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&output.stdout);
        Ok(Some(parse_group_line(&line)))
    }
}

/// Parse the member list out of a `name:passwd:gid:members` group entry.
fn parse_group_line(line: &str) -> Vec<String> {
    line.trim()
        .split(':')
        .nth(3)
        .map(|members| {
            members
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// In-memory group directory.
#[derive(Debug, Clone, Default)]
pub struct StaticGroupDirectory {
    groups: HashMap<String, Vec<String>>,
}

impl StaticGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group with its members.
    pub fn group<I, S>(mut self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl GroupDirectory for StaticGroupDirectory {
    async fn members(&self, group: &str) -> Result<Option<Vec<String>>> {
        Ok(self.groups.get(group).cloned())
    }
}

/// Admits a profile when the user belongs to one of its allowed groups.
///
/// Unknown groups are logged and treated as empty. A wildcard entry admits
/// the profile without further lookups. Profiles with no group list are
/// admitted unchanged.
pub struct UnixGroupFilter {
    directory: Arc<dyn GroupDirectory>,
}

impl UnixGroupFilter {
    /// Filter backed by the system group database.
    pub fn new() -> Self {
        Self::with_directory(Arc::new(GetentGroupDirectory))
    }

    /// Filter backed by a custom group directory.
    pub fn with_directory(directory: Arc<dyn GroupDirectory>) -> Self {
        Self { directory }
    }

    async fn permits(&self, profile: &Profile, groups: &[String], user: &str) -> bool {
        for group in groups {
            if group == WILDCARD_GROUP {
                return true;
            }

            let members = match self.directory.members(group).await {
                Ok(Some(members)) => members,
                Ok(None) => {
                    warn!(
                        "Config problem: unknown group '{}' for profile '{}', ignoring",
                        group, profile.key
                    );
                    Vec::new()
                }
                Err(e) => {
                    warn!(
                        "Could not resolve group '{}' for profile '{}': {:#}",
                        group, profile.key, e
                    );
                    Vec::new()
                }
            };

            if members.iter().any(|m| m == user) {
                debug!("User {} admitted to profile {} via group {}", user, profile.key, group);
                return true;
            }
        }
        false
    }
}

impl Default for UnixGroupFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileFilter for UnixGroupFilter {
    async fn apply(&self, profiles: &[Profile], user: &str) -> Vec<Profile> {
        let mut permitted = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let admitted = match &profile.allowed_groups {
                Some(groups) => self.permits(profile, groups, user).await,
                None => true,
            };
            if admitted {
                permitted.push(profile.clone());
            }
        }
        permitted
    }
}

/// Filter selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Everyone sees everything.
    #[default]
    AllowAll,
    /// Membership in the system group database decides.
    UnixGroup,
}

impl FilterKind {
    /// Instantiate the configured filter.
    pub fn build(self) -> Arc<dyn ProfileFilter> {
        match self {
            FilterKind::AllowAll => Arc::new(AllowAllFilter),
            FilterKind::UnixGroup => Arc::new(UnixGroupFilter::new()),
        }
    }
}
