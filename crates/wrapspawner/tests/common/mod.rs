//! Test utilities and common setup.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use wrapspawner::launcher::{LaunchInfo, Launcher, PollStatus, ProgressEvent, ProgressStream};
use wrapspawner::profile::{Catalog, LauncherConfig, Profile, StateMap, config_from_value};
use wrapspawner::{LauncherRegistry, ProfileProvider, SpawnContext};

/// Shared log of launcher calls, in order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    constructed: Arc<Mutex<usize>>,
}

impl Recorder {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn constructed(&self) -> usize {
        *self.constructed.lock().unwrap()
    }
}

pub const FAKE_SHARED_FIELDS: &[&str] = &["start_timeout", "http_timeout", "notebook_dir"];

/// Launcher that records every call and keeps its state in memory.
///
/// Profile config keys `fail_pre_spawn`, `fail_post_stop` and `fail_stop`
/// make the matching call fail.
pub struct FakeLauncher {
    kind: String,
    recorder: Recorder,
    config: LauncherConfig,
    fields: LauncherConfig,
    job_id: Option<String>,
    running: bool,
}

impl FakeLauncher {
    pub fn new(kind: &str, ctx: &SpawnContext, config: &LauncherConfig, recorder: Recorder) -> Self {
        recorder.record(format!("construct {kind} for {}", ctx.user));
        *recorder.constructed.lock().unwrap() += 1;

        let mut fields = LauncherConfig::new();
        fields.insert("start_timeout".to_string(), Value::from(60));
        fields.insert("http_timeout".to_string(), Value::from(30));
        for (key, value) in config {
            if FAKE_SHARED_FIELDS.contains(&key.as_str()) {
                fields.insert(key.clone(), value.clone());
            }
        }

        Self {
            kind: kind.to_string(),
            recorder,
            config: config.clone(),
            fields,
            // Generic initialization leaves stale state behind.
            job_id: Some("stale".to_string()),
            running: false,
        }
    }

    fn flag(&self, name: &str) -> bool {
        self.config.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    fn shared_fields(&self) -> &'static [&'static str] {
        FAKE_SHARED_FIELDS
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        self.recorder.record(format!("set {name}={value}"));
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    async fn start(&mut self) -> Result<LaunchInfo> {
        self.recorder.record(format!("start {}", self.kind));
        self.running = true;
        self.job_id = Some(format!("{}-job", self.kind));
        Ok(LaunchInfo::new("10.0.0.5", 9000))
    }

    async fn poll(&mut self) -> Result<PollStatus> {
        self.recorder.record("poll");
        Ok(if self.running {
            PollStatus::Running
        } else {
            PollStatus::Exited(0)
        })
    }

    async fn stop(&mut self, force: bool) -> Result<()> {
        self.recorder.record(format!("stop force={force}"));
        if self.flag("fail_stop") {
            bail!("scheduler unreachable");
        }
        self.running = false;
        Ok(())
    }

    fn get_state(&self) -> StateMap {
        let mut state = StateMap::new();
        if let Some(job_id) = &self.job_id {
            state.insert("job_id".to_string(), Value::from(job_id.clone()));
        }
        state
    }

    fn load_state(&mut self, state: &StateMap) {
        self.recorder.record("load_state");
        self.job_id = state
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    fn clear_state(&mut self) {
        self.recorder.record("clear_state");
        self.job_id = None;
    }

    fn progress(&mut self) -> ProgressStream {
        stream::iter(vec![
            ProgressEvent::new(10, "queued"),
            ProgressEvent::new(100, "running"),
        ])
        .boxed()
    }

    async fn pre_spawn_hook(&mut self) -> Result<()> {
        self.recorder.record("launcher pre_spawn");
        if self.flag("fail_pre_spawn") {
            bail!("quota exceeded");
        }
        Ok(())
    }

    async fn post_stop_hook(&mut self) -> Result<()> {
        self.recorder.record("launcher post_stop");
        if self.flag("fail_post_stop") {
            bail!("cleanup failed");
        }
        Ok(())
    }

    async fn auth_state_hook(&mut self, auth_state: &Value) -> Result<()> {
        self.recorder.record(format!("launcher auth_state {auth_state}"));
        Ok(())
    }
}

/// Registry with fake `local` and `batch` launchers sharing one recorder.
pub fn fake_registry(recorder: &Recorder) -> Arc<LauncherRegistry> {
    let mut registry = LauncherRegistry::new();
    for kind in ["local", "batch"] {
        let recorder = recorder.clone();
        registry.register(
            kind,
            move |ctx: &SpawnContext, config: &LauncherConfig| -> Result<Box<dyn Launcher>> {
                Ok(Box::new(FakeLauncher::new(kind, ctx, config, recorder.clone())))
            },
        );
    }
    Arc::new(registry)
}

/// Provider whose catalog can be swapped between calls.
#[derive(Clone, Default)]
pub struct MutableProvider {
    catalog: Arc<Mutex<Catalog>>,
}

impl MutableProvider {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(Mutex::new(catalog)),
        }
    }

    pub fn set(&self, catalog: Catalog) {
        *self.catalog.lock().unwrap() = catalog;
    }
}

#[async_trait]
impl ProfileProvider for MutableProvider {
    async fn profiles(&self, _ctx: &SpawnContext) -> Catalog {
        self.catalog.lock().unwrap().clone()
    }
}

/// `[Local (local), Batch (batch, queue=gpu)]`.
pub fn local_and_batch() -> Catalog {
    vec![
        Profile::new("Local", "local", "local"),
        Profile::new("Batch", "batch", "batch")
            .with_config(config_from_value(serde_json::json!({"queue": "gpu"}))),
    ]
}
