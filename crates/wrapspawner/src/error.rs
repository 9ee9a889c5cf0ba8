//! Error types for profile selection and launcher delegation.

use std::collections::BTreeSet;

use thiserror::Error;

/// Result type for wrapper, resolver and catalog operations.
pub type SpawnerResult<T> = Result<T, SpawnerError>;

/// Errors that can occur while selecting, constructing or driving a launcher.
#[derive(Debug, Error)]
pub enum SpawnerError {
    /// Two or more profiles in one catalog share a key.
    #[error("invalid profiles, profile keys are not unique: {}", join_keys(.0))]
    DuplicateProfileKeys(BTreeSet<String>),

    /// A catalog that must offer at least one profile is empty.
    #[error("no profiles available")]
    EmptyCatalog,

    /// A profile refers to a launcher identifier nobody registered.
    #[error("unknown launcher '{launcher}' (profile '{profile}')")]
    UnknownLauncher { launcher: String, profile: String },

    /// A persisted profile key no longer resolves in the current catalog.
    #[error("cannot restore session: profile '{0}' is no longer offered")]
    ProfileNotFound(String),

    /// Construction was requested before any profile was selected.
    #[error("no profile selected")]
    NoSelection,

    /// The operation needs a bound launcher and there is none.
    #[error("no launcher exists yet: {0}")]
    NoLauncher(&'static str),

    /// A launcher factory or lifecycle call failed.
    #[error("launcher {operation} failed: {source:#}")]
    Launcher {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A pre-spawn or auth-state hook failed.
    #[error("{hook} hook failed: {source:#}")]
    Hook {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Persisted state could not be (de)serialized.
    #[error("invalid persisted state: {0}")]
    State(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SpawnerError {
    /// Wrap a launcher failure with the lifecycle operation that produced it.
    pub fn launcher(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Launcher { operation, source }
    }

    /// Wrap a hook failure with the hook's name.
    pub fn hook(hook: &'static str, source: anyhow::Error) -> Self {
        Self::Hook { hook, source }
    }

    /// Whether this error is a configuration problem that should prevent startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateProfileKeys(_)
                | Self::EmptyCatalog
                | Self::UnknownLauncher { .. }
                | Self::Config(_)
        )
    }
}

fn join_keys(keys: &BTreeSet<String>) -> String {
    keys.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_display_lists_every_key() {
        let keys: BTreeSet<String> = ["gpu", "local"].iter().map(|k| k.to_string()).collect();
        let err = SpawnerError::DuplicateProfileKeys(keys);
        assert_eq!(
            err.to_string(),
            "invalid profiles, profile keys are not unique: gpu, local"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn test_restore_error_is_not_configuration() {
        let err = SpawnerError::ProfileNotFound("batch".to_string());
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("batch"));
    }
}
