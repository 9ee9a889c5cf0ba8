//! Persisted session-state envelope.
//!
//! The host stores one JSON object per session. The wrapper owns three keys
//! in it; everything else belongs to the host and is carried through as is.

use serde::{Deserialize, Serialize};

use crate::error::SpawnerResult;
use crate::profile::{LauncherConfig, StateMap};

/// Wrapper state as stored by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Key of the selected profile. Empty when nothing was selected.
    #[serde(default)]
    pub profile: String,
    /// Launcher configuration of the selection.
    #[serde(default)]
    pub child_conf: LauncherConfig,
    /// The launcher's own state blob, never interpreted here.
    #[serde(default)]
    pub child_state: StateMap,
    /// Keys written by the host's generic session state.
    #[serde(flatten)]
    pub extra: StateMap,
}

impl PersistedState {
    /// Whether the envelope names a profile to restore.
    pub fn has_selection(&self) -> bool {
        !self.profile.is_empty()
    }

    /// Parse a stored state object.
    pub fn from_map(state: StateMap) -> SpawnerResult<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(state))?)
    }

    /// Serialize back into a state object.
    pub fn into_map(self) -> SpawnerResult<StateMap> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(StateMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::config_from_value;
    use serde_json::json;

    #[test]
    fn test_envelope_keeps_host_keys() {
        let stored = config_from_value(json!({
            "profile": "batch",
            "child_conf": {"queue": "gpu"},
            "child_state": {"job_id": "1234"},
            "last_activity": "2026-10-19T08:00:00Z"
        }));

        let state = PersistedState::from_map(stored.clone()).unwrap();
        assert!(state.has_selection());
        assert_eq!(state.child_state["job_id"], "1234");
        assert_eq!(state.extra["last_activity"], "2026-10-19T08:00:00Z");
        assert_eq!(state.into_map().unwrap(), stored);
    }

    #[test]
    fn test_missing_keys_mean_no_selection() {
        let state = PersistedState::from_map(StateMap::new()).unwrap();
        assert!(!state.has_selection());
        assert!(state.child_state.is_empty());
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        let result = PersistedState::from_map(config_from_value(json!({"child_state": 3})));
        assert!(result.is_err());
    }
}
