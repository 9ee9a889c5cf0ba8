//! Container provider error types.

use thiserror::Error;

/// Result type for image enumeration and accelerator discovery.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur while enumerating images or discovering accelerators.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container command failed.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Failed to parse container output.
    #[error("failed to parse container output: {0}")]
    ParseError(String),

    /// No container runtime available.
    #[error("no container runtime available (docker or podman)")]
    NoRuntimeAvailable,

    /// The accelerator discovery endpoint could not be queried.
    #[error("accelerator discovery at {url} failed: {message}")]
    Discovery { url: String, message: String },

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
