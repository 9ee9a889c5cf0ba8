//! The contract every concrete launcher implements.
//!
//! A launcher starts, polls and stops exactly one user session (a local
//! process, a container, a batch job). The wrapper forwards to it and never
//! implements session semantics itself.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::profile::StateMap;

/// Where a started session can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchInfo {
    pub ip: String,
    pub port: u16,
}

impl LaunchInfo {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }
}

/// Result of polling a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "code")]
pub enum PollStatus {
    /// The session is up.
    Running,
    /// The session exited with this code.
    Exited(i32),
    /// No launcher was ever bound, so nothing could be running.
    NotStarted,
}

impl PollStatus {
    pub fn is_running(self) -> bool {
        matches!(self, PollStatus::Running)
    }
}

/// One progress update emitted while a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Percentage, 0-100.
    pub progress: u8,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: progress.min(100),
            message: message.into(),
        }
    }
}

/// Stream of progress events.
pub type ProgressStream = BoxStream<'static, ProgressEvent>;

/// A concrete session launcher.
#[async_trait]
pub trait Launcher: Send {
    /// Names of configuration fields the wrapper may keep in sync.
    fn shared_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Current value of a shared field.
    fn field(&self, _name: &str) -> Option<serde_json::Value> {
        None
    }

    /// Overwrite a shared field.
    fn set_field(&mut self, _name: &str, _value: serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Start the session.
    async fn start(&mut self) -> Result<LaunchInfo>;

    /// Check whether the session is still running.
    async fn poll(&mut self) -> Result<PollStatus>;

    /// Stop the session. `force` skips graceful shutdown.
    async fn stop(&mut self, force: bool) -> Result<()>;

    /// Serialize enough state to find the session again after a restart.
    fn get_state(&self) -> StateMap;

    /// Restore state produced by [`Launcher::get_state`].
    fn load_state(&mut self, state: &StateMap);

    /// Forget all persisted state.
    fn clear_state(&mut self);

    /// Progress events for the current start.
    fn progress(&mut self) -> ProgressStream {
        stream::empty().boxed()
    }

    async fn pre_spawn_hook(&mut self) -> Result<()> {
        Ok(())
    }

    async fn post_stop_hook(&mut self) -> Result<()> {
        Ok(())
    }

    async fn auth_state_hook(&mut self, _auth_state: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}
