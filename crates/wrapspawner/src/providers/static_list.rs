//! Providers backed by an administrator-configured list.

use std::sync::Arc;

use async_trait::async_trait;

use super::ProfileProvider;
use crate::context::SpawnContext;
use crate::error::{SpawnerError, SpawnerResult};
use crate::filter::ProfileFilter;
use crate::profile::{Catalog, Profile};
use crate::resolver::validate_catalog;

fn validate_configured(profiles: &[Profile]) -> SpawnerResult<()> {
    if profiles.is_empty() {
        return Err(SpawnerError::EmptyCatalog);
    }
    validate_catalog(profiles)
}

/// The same list for every user.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    profiles: Catalog,
}

impl StaticProvider {
    /// Validate and wrap a configured list.
    ///
    /// Empty lists and duplicate keys are configuration errors.
    pub fn new(profiles: Catalog) -> SpawnerResult<Self> {
        validate_configured(&profiles)?;
        Ok(Self { profiles })
    }

    /// The configured list.
    pub fn list(&self) -> &[Profile] {
        &self.profiles
    }
}

#[async_trait]
impl ProfileProvider for StaticProvider {
    async fn profiles(&self, _ctx: &SpawnContext) -> Catalog {
        self.profiles.clone()
    }

    fn is_dynamic(&self) -> bool {
        false
    }
}

/// A configured list narrowed per user by a filter.
pub struct FilteredProvider {
    profiles: Catalog,
    filter: Arc<dyn ProfileFilter>,
}

impl FilteredProvider {
    /// Validate the unfiltered list and attach a filter.
    pub fn new(profiles: Catalog, filter: Arc<dyn ProfileFilter>) -> SpawnerResult<Self> {
        validate_configured(&profiles)?;
        Ok(Self { profiles, filter })
    }
}

#[async_trait]
impl ProfileProvider for FilteredProvider {
    async fn profiles(&self, ctx: &SpawnContext) -> Catalog {
        self.filter.apply(&self.profiles, &ctx.user).await
    }
}
