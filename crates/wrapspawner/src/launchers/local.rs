//! Launcher that runs the session as a local child process.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::context::SpawnContext;
use crate::launcher::{LaunchInfo, Launcher, PollStatus, ProgressEvent, ProgressStream};
use crate::profile::{LauncherConfig, StateMap};

/// How long a graceful stop waits before giving up on reaping the child.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Configuration for [`LocalProcessLauncher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalLauncherSettings {
    /// Command to run; the first element is the binary.
    pub cmd: Vec<String>,
    /// Extra arguments appended to `cmd`.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Working directory. Supports `~`.
    pub notebook_dir: Option<String>,
    /// Address the session listens on.
    pub ip: String,
    pub port: u16,
    /// Seconds the hub waits for the session to start.
    pub start_timeout: u64,
    /// Seconds the hub waits for the session to answer HTTP.
    pub http_timeout: u64,
}

impl Default for LocalLauncherSettings {
    fn default() -> Self {
        Self {
            cmd: vec!["jupyterhub-singleuser".to_string()],
            args: Vec::new(),
            env: HashMap::new(),
            notebook_dir: None,
            ip: "127.0.0.1".to_string(),
            port: 8888,
            start_timeout: 60,
            http_timeout: 30,
        }
    }
}

const SHARED_FIELDS: &[&str] = &[
    "cmd",
    "args",
    "env",
    "notebook_dir",
    "ip",
    "port",
    "start_timeout",
    "http_timeout",
];

/// Runs the session as a child process of this service.
#[derive(Debug)]
pub struct LocalProcessLauncher {
    user: String,
    settings: LocalLauncherSettings,
    child: Option<Child>,
    pid: Option<libc::pid_t>,
}

impl LocalProcessLauncher {
    /// Build a launcher from a profile configuration.
    pub fn new(ctx: &SpawnContext, config: &LauncherConfig) -> Result<Self> {
        let settings: LocalLauncherSettings =
            serde_json::from_value(serde_json::Value::Object(config.clone()))
                .context("parsing local launcher configuration")?;
        Ok(Self {
            user: ctx.user.clone(),
            settings,
            child: None,
            pid: None,
        })
    }

    pub fn settings(&self) -> &LocalLauncherSettings {
        &self.settings
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        self.pid
    }

    fn command(&self) -> Result<Command> {
        let (binary, rest) = self
            .settings
            .cmd
            .split_first()
            .context("local launcher has an empty command")?;

        let mut command = Command::new(binary);
        command
            .args(rest)
            .args(&self.settings.args)
            .envs(&self.settings.env)
            .env("JUPYTERHUB_USER", &self.user)
            .stdin(Stdio::null());

        if let Some(dir) = &self.settings.notebook_dir {
            command.current_dir(shellexpand::tilde(dir).into_owned());
        }
        Ok(command)
    }
}

/// Only positive pids name a single process; `kill` treats 0 and negative
/// values as process groups.
fn single_pid(pid: u64) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|pid| *pid > 0)
}

fn process_alive(pid: libc::pid_t) -> bool {
    pid > 0 && unsafe { libc::kill(pid, 0) == 0 }
}

fn signal(pid: libc::pid_t, sig: libc::c_int) -> bool {
    pid > 0 && unsafe { libc::kill(pid, sig) == 0 }
}

#[async_trait]
impl Launcher for LocalProcessLauncher {
    fn shared_fields(&self) -> &'static [&'static str] {
        SHARED_FIELDS
    }

    fn field(&self, name: &str) -> Option<serde_json::Value> {
        let value = serde_json::to_value(&self.settings).ok()?;
        value.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: serde_json::Value) -> Result<()> {
        let mut current = serde_json::to_value(&self.settings)?;
        current[name] = value;
        self.settings = serde_json::from_value(current)
            .with_context(|| format!("setting local launcher field '{name}'"))?;
        Ok(())
    }

    async fn start(&mut self) -> Result<LaunchInfo> {
        let child = self
            .command()?
            .spawn()
            .with_context(|| format!("spawning {:?}", self.settings.cmd))?;
        let pid = child
            .id()
            .and_then(|pid| single_pid(pid.into()))
            .context("spawned process has no pid")?;

        info!("Started local session for {} with pid {}", self.user, pid);
        self.pid = Some(pid);
        self.child = Some(child);
        Ok(LaunchInfo::new(self.settings.ip.clone(), self.settings.port))
    }

    async fn poll(&mut self) -> Result<PollStatus> {
        if let Some(child) = self.child.as_mut() {
            return Ok(match child.try_wait().context("polling child process")? {
                None => PollStatus::Running,
                Some(status) => PollStatus::Exited(status.code().unwrap_or(-1)),
            });
        }

        // Restored from state: we no longer own a handle, only the pid.
        match self.pid {
            Some(pid) if process_alive(pid) => Ok(PollStatus::Running),
            _ => Ok(PollStatus::Exited(0)),
        }
    }

    async fn stop(&mut self, force: bool) -> Result<()> {
        let Some(pid) = self.pid.take() else {
            return Ok(());
        };

        if let Some(mut child) = self.child.take() {
            if force {
                child.kill().await.context("killing child process")?;
                return Ok(());
            }
            signal(pid, libc::SIGTERM);
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("Process {} exited with {}", pid, status),
                Ok(Err(e)) => warn!("Error waiting for process {}: {:?}", pid, e),
                Err(_) => {
                    warn!("Process {} ignored SIGTERM, killing", pid);
                    child.kill().await.context("killing child process")?;
                }
            }
            return Ok(());
        }

        let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
        if !signal(pid, sig) && process_alive(pid) {
            anyhow::bail!("failed to signal process {}", pid);
        }
        Ok(())
    }

    fn get_state(&self) -> StateMap {
        let mut state = StateMap::new();
        if let Some(pid) = self.pid {
            state.insert("pid".to_string(), pid.into());
        }
        state
    }

    fn load_state(&mut self, state: &StateMap) {
        self.pid = state
            .get("pid")
            .and_then(serde_json::Value::as_u64)
            .and_then(single_pid);
    }

    fn clear_state(&mut self) {
        self.pid = None;
        self.child = None;
    }

    fn progress(&mut self) -> ProgressStream {
        let mut events = vec![ProgressEvent::new(50, "Spawning local process")];
        if let Some(pid) = self.pid {
            events.push(ProgressEvent::new(100, format!("Process {pid} started")));
        }
        stream::iter(events).boxed()
    }
}
