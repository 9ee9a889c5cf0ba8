//! Maps a requested profile key onto a launcher selection.
//!
//! Unknown keys are not errors: the current (or default) selection stays in
//! place. Duplicate keys are a configuration error reported when a catalog is
//! validated, never at request time.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{SpawnerError, SpawnerResult};
use crate::profile::{LauncherConfig, Profile};

/// The profile a session is bound to.
///
/// The key is the durable identity; launcher and config are re-derived from
/// the catalog on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub profile_key: String,
    pub launcher: String,
    pub launcher_config: LauncherConfig,
}

impl From<&Profile> for Selection {
    fn from(profile: &Profile) -> Self {
        Self {
            profile_key: profile.key.clone(),
            launcher: profile.launcher.clone(),
            launcher_config: profile.config.clone(),
        }
    }
}

/// Reject catalogs in which two profiles share a key.
///
/// The error carries every duplicated key.
pub fn validate_catalog(catalog: &[Profile]) -> SpawnerResult<()> {
    let mut seen = HashSet::new();
    let duplicated: BTreeSet<String> = catalog
        .iter()
        .filter(|p| !seen.insert(p.key.as_str()))
        .map(|p| p.key.clone())
        .collect();

    if duplicated.is_empty() {
        Ok(())
    } else {
        Err(SpawnerError::DuplicateProfileKeys(duplicated))
    }
}

/// Resolve a key against a catalog.
///
/// `None` picks the first profile. A key that is not in the catalog yields
/// `None` so the caller can keep its previous selection.
pub fn resolve(catalog: &[Profile], key: Option<&str>) -> Option<Selection> {
    match key {
        None => catalog.first().map(Selection::from),
        Some(key) => catalog.iter().find(|p| p.key == key).map(Selection::from),
    }
}

/// Update `current` from a requested key.
///
/// When nothing is selected yet the default (first) profile is applied
/// before looking up `key`, so an unknown key falls back to the default on
/// the first call and to the prior selection afterwards. Returns whether
/// the requested key matched.
pub fn select_profile(
    current: &mut Option<Selection>,
    catalog: &[Profile],
    key: Option<&str>,
) -> SpawnerResult<bool> {
    if current.is_none() {
        *current = Some(resolve(catalog, None).ok_or(SpawnerError::EmptyCatalog)?);
    }

    match key.and_then(|k| resolve(catalog, Some(k))) {
        Some(selection) => {
            *current = Some(selection);
            Ok(true)
        }
        None => Ok(key.is_none()),
    }
}
