//! The delegating session wrapper.
//!
//! A [`WrapSpawner`] presents one stable lifecycle to the host while the
//! actual work is done by a launcher picked from the user's catalog. The
//! launcher is built lazily, once per selection, and every lifecycle call is
//! forwarded to it.
//!
//! ```text
//! Empty --select--> Selected --construct--> Bound --start--> Running
//!   ^                                                           |
//!   +--------------------- clear_state ------------- Stopped <--+
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::context::SpawnContext;
use crate::error::{SpawnerError, SpawnerResult};
use crate::form::{self, FormConfig, OptionsForm, UserOptions};
use crate::hooks::{AuthStateHook, SpawnHook};
use crate::launcher::{LaunchInfo, Launcher, PollStatus, ProgressStream};
use crate::profile::{Catalog, LauncherConfig, StateMap, find_profile};
use crate::providers::ProfileProvider;
use crate::registry::LauncherRegistry;
use crate::resolver::{Selection, select_profile, validate_catalog};
use crate::state::PersistedState;

/// Lifecycle position of a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperState {
    /// No selection, no launcher.
    #[default]
    Empty,
    /// A profile is selected, the launcher is not built yet.
    Selected,
    /// The launcher is built and linked.
    Bound,
    /// The launcher was started.
    Running,
    /// The launcher was stopped or exited.
    Stopped,
}

/// A shared field copied from the wrapper into the launcher on every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLink {
    pub field: &'static str,
}

/// Shared fields the launcher declares, minus those the profile sets itself.
///
/// A linked field is forwarded on every later wrapper write, including
/// fields the wrapper has no value for yet.
fn collect_links(launcher_fields: &[&'static str], profile_config: &LauncherConfig) -> Vec<FieldLink> {
    launcher_fields
        .iter()
        .filter(|field| !profile_config.contains_key(**field))
        .map(|field| FieldLink { field: *field })
        .collect()
}

#[derive(Default)]
struct WrapperHooks {
    pre_spawn: Option<Arc<dyn SpawnHook>>,
    post_stop: Option<Arc<dyn SpawnHook>>,
    auth_state: Option<Arc<dyn AuthStateHook>>,
}

/// Delegating wrapper around one user's session launcher.
pub struct WrapSpawner {
    ctx: SpawnContext,
    provider: Arc<dyn ProfileProvider>,
    registry: Arc<LauncherRegistry>,
    form: OptionsForm,
    user_options: UserOptions,
    /// Wrapper-side values of shared fields.
    fields: LauncherConfig,
    selection: Option<Selection>,
    /// Launcher state waiting to be applied at construction.
    child_state: StateMap,
    child: Option<Box<dyn Launcher>>,
    links: Vec<FieldLink>,
    phase: WrapperState,
    hooks: WrapperHooks,
    /// Host-owned keys of the persisted envelope.
    extra_state: StateMap,
}

impl std::fmt::Debug for WrapSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapSpawner")
            .field("user", &self.ctx.user)
            .field("server_name", &self.ctx.server_name)
            .field("phase", &self.phase)
            .field("selection", &self.selection)
            .field("links", &self.links)
            .finish()
    }
}

impl WrapSpawner {
    pub fn new(
        ctx: SpawnContext,
        provider: Arc<dyn ProfileProvider>,
        registry: Arc<LauncherRegistry>,
    ) -> Self {
        Self {
            ctx,
            provider,
            registry,
            form: OptionsForm::default(),
            user_options: UserOptions::default(),
            fields: LauncherConfig::new(),
            selection: None,
            child_state: StateMap::new(),
            child: None,
            links: Vec::new(),
            phase: WrapperState::Empty,
            hooks: WrapperHooks::default(),
            extra_state: StateMap::new(),
        }
    }

    /// Initial values of the wrapper's shared fields.
    pub fn with_shared_fields(mut self, fields: LauncherConfig) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_form(mut self, config: FormConfig) -> Self {
        self.form = OptionsForm::new(config);
        self
    }

    pub fn with_pre_spawn_hook(mut self, hook: impl SpawnHook + 'static) -> Self {
        self.hooks.pre_spawn = Some(Arc::new(hook));
        self
    }

    pub fn with_post_stop_hook(mut self, hook: impl SpawnHook + 'static) -> Self {
        self.hooks.post_stop = Some(Arc::new(hook));
        self
    }

    pub fn with_auth_state_hook(mut self, hook: impl AuthStateHook + 'static) -> Self {
        self.hooks.auth_state = Some(Arc::new(hook));
        self
    }

    pub fn context(&self) -> &SpawnContext {
        &self.ctx
    }

    pub fn state(&self) -> WrapperState {
        self.phase
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn links(&self) -> &[FieldLink] {
        &self.links
    }

    pub fn launcher(&self) -> Option<&dyn Launcher> {
        self.child.as_deref()
    }

    pub fn user_options(&self) -> &UserOptions {
        &self.user_options
    }

    /// Options submitted with the next spawn request.
    pub fn set_user_options(&mut self, options: UserOptions) {
        self.user_options = options;
    }

    /// Current catalog snapshot for this user, with keys checked for uniqueness.
    pub async fn catalog(&self) -> SpawnerResult<Catalog> {
        let catalog = self.provider.profiles(&self.ctx).await;
        validate_catalog(&catalog)?;
        Ok(catalog)
    }

    /// Render the profile selection form.
    pub async fn options_form(&self) -> SpawnerResult<String> {
        self.form.render(self.provider.as_ref(), &self.ctx).await
    }

    /// Parse submitted form data into user options.
    pub async fn options_from_form(
        &self,
        formdata: &HashMap<String, Vec<String>>,
    ) -> SpawnerResult<UserOptions> {
        let catalog = self.catalog().await?;
        form::options_from_form(formdata, &catalog)
    }

    /// Select a profile by key, or the default when `key` is `None`.
    ///
    /// Unknown keys keep the current selection (the default on the first
    /// call). Once a launcher is bound the selection no longer changes.
    /// Returns whether the key matched.
    pub async fn select(&mut self, key: Option<&str>) -> SpawnerResult<bool> {
        if self.child.is_some() {
            debug!(
                "Launcher already bound for {}, ignoring selection {:?}",
                self.ctx.user, key
            );
            return Ok(false);
        }

        let catalog = self.catalog().await?;
        let matched = select_profile(&mut self.selection, &catalog, key)?;
        if let (Some(key), false) = (key, matched) {
            warn!(
                "Profile '{}' is not offered to {}, keeping '{}'",
                key,
                self.ctx.user,
                self.selection
                    .as_ref()
                    .map(|s| s.profile_key.as_str())
                    .unwrap_or_default()
            );
        }
        if let Some(selection) = &self.selection {
            debug!("Selected profile '{}' for {}", selection.profile_key, self.ctx.user);
        }
        self.phase = WrapperState::Selected;
        Ok(matched)
    }

    /// Build and link the launcher for the current selection.
    ///
    /// Idempotent: an existing launcher is returned unchanged.
    pub fn construct(&mut self) -> SpawnerResult<&mut (dyn Launcher + 'static)> {
        if self.child.is_none() {
            let selection = self.selection.as_ref().ok_or(SpawnerError::NoSelection)?;
            let mut launcher = self.registry.construct(
                &self.ctx,
                &selection.profile_key,
                &selection.launcher,
                &selection.launcher_config,
            )?;

            // Whatever the factory left behind belongs to no session.
            launcher.clear_state();
            if !self.child_state.is_empty() {
                launcher.load_state(&self.child_state);
            }

            let links = collect_links(launcher.shared_fields(), &selection.launcher_config);
            for link in &links {
                if let Some(value) = self.fields.get(link.field) {
                    launcher
                        .set_field(link.field, value.clone())
                        .map_err(|e| SpawnerError::launcher("link", e))?;
                }
            }

            debug!(
                "Constructed '{}' launcher for {} (profile '{}'), linked fields: {:?}",
                selection.launcher,
                self.ctx.user,
                selection.profile_key,
                links.iter().map(|l| l.field).collect::<Vec<_>>()
            );
            self.links = links;
            self.child = Some(launcher);
            self.phase = WrapperState::Bound;
        }

        self.child
            .as_deref_mut()
            .ok_or(SpawnerError::NoLauncher("construct"))
    }

    /// Select from the user's options (if nothing is bound yet) and construct.
    pub async fn ensure_launcher(&mut self) -> SpawnerResult<&mut (dyn Launcher + 'static)> {
        if self.child.is_none() {
            let requested = self.user_options.profile.clone();
            self.select(requested.as_deref()).await?;
        }
        self.construct()
    }

    /// Current value of a wrapper-side shared field.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Set a wrapper-side shared field, forwarding it to a linked launcher.
    pub fn set_field(&mut self, name: &str, value: serde_json::Value) -> SpawnerResult<()> {
        let linked = self.links.iter().any(|l| l.field == name);
        if let (true, Some(child)) = (linked, self.child.as_deref_mut()) {
            child
                .set_field(name, value.clone())
                .map_err(|e| SpawnerError::launcher("link", e))?;
        }
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Start the session, constructing the launcher first if needed.
    pub async fn start(&mut self) -> SpawnerResult<LaunchInfo> {
        let launcher = self.ensure_launcher().await?;
        let info = launcher
            .start()
            .await
            .map_err(|e| SpawnerError::launcher("start", e))?;

        info!("Started session for {} at {}:{}", self.ctx.user, info.ip, info.port);
        self.phase = WrapperState::Running;
        Ok(info)
    }

    /// Run the hook chain the host runs before a start, then start.
    pub async fn spawn(
        &mut self,
        auth_state: Option<&serde_json::Value>,
    ) -> SpawnerResult<LaunchInfo> {
        if let Some(auth_state) = auth_state {
            self.run_auth_state_hook(auth_state).await?;
        }
        self.run_pre_spawn_hook().await?;
        self.start().await
    }

    /// Stop the session. Without a launcher there is nothing to stop.
    ///
    /// The post-stop hook chain runs afterwards; its failures are logged and
    /// never reported.
    pub async fn stop(&mut self, force: bool) -> SpawnerResult<()> {
        let Some(child) = self.child.as_deref_mut() else {
            return Ok(());
        };

        child
            .stop(force)
            .await
            .map_err(|e| SpawnerError::launcher("stop", e))?;
        self.phase = WrapperState::Stopped;

        self.run_post_stop_hook().await;
        Ok(())
    }

    /// Poll the session. Without a launcher this is [`PollStatus::NotStarted`].
    pub async fn poll(&mut self) -> SpawnerResult<PollStatus> {
        let Some(child) = self.child.as_deref_mut() else {
            return Ok(PollStatus::NotStarted);
        };

        let status = child
            .poll()
            .await
            .map_err(|e| SpawnerError::launcher("poll", e))?;
        if let (PollStatus::Exited(_), WrapperState::Running) = (status, self.phase) {
            self.phase = WrapperState::Stopped;
        }
        Ok(status)
    }

    /// Progress events of the bound launcher.
    pub fn progress(&mut self) -> SpawnerResult<ProgressStream> {
        self.child
            .as_deref_mut()
            .map(|child| child.progress())
            .ok_or(SpawnerError::NoLauncher("cannot report progress"))
    }

    /// Wrapper hook first, then the launcher's. Failures abort the spawn.
    pub async fn run_pre_spawn_hook(&mut self) -> SpawnerResult<()> {
        if let Some(hook) = self.hooks.pre_spawn.clone() {
            hook.run(&self.ctx)
                .await
                .map_err(|e| SpawnerError::hook("pre_spawn", e))?;
        }

        let launcher = self.ensure_launcher().await?;
        launcher
            .pre_spawn_hook()
            .await
            .map_err(|e| SpawnerError::hook("pre_spawn", e))
    }

    /// Wrapper hook first, then the launcher's. Failures are logged only.
    pub async fn run_post_stop_hook(&mut self) {
        if let Err(e) = self.post_stop_chain().await {
            error!("post_stop_hook failed for {}: {}", self.ctx.user, e);
        }
    }

    async fn post_stop_chain(&mut self) -> SpawnerResult<()> {
        if let Some(hook) = self.hooks.post_stop.clone() {
            hook.run(&self.ctx)
                .await
                .map_err(|e| SpawnerError::hook("post_stop", e))?;
        }

        if let Some(child) = self.child.as_deref_mut() {
            child
                .post_stop_hook()
                .await
                .map_err(|e| SpawnerError::hook("post_stop", e))?;
        }
        Ok(())
    }

    /// Wrapper hook first, then the launcher's, constructing it if needed.
    pub async fn run_auth_state_hook(&mut self, auth_state: &serde_json::Value) -> SpawnerResult<()> {
        if let Some(hook) = self.hooks.auth_state.clone() {
            hook.run(&self.ctx, auth_state)
                .await
                .map_err(|e| SpawnerError::hook("auth_state", e))?;
        }

        let launcher = self.ensure_launcher().await?;
        launcher
            .auth_state_hook(auth_state)
            .await
            .map_err(|e| SpawnerError::hook("auth_state", e))
    }

    /// Persisted envelope for the current session.
    pub fn get_state(&self) -> SpawnerResult<StateMap> {
        let child_state = match &self.child {
            Some(child) => child.get_state(),
            None => self.child_state.clone(),
        };

        PersistedState {
            profile: self
                .selection
                .as_ref()
                .map(|s| s.profile_key.clone())
                .unwrap_or_default(),
            child_conf: self
                .selection
                .as_ref()
                .map(|s| s.launcher_config.clone())
                .unwrap_or_default(),
            child_state,
            extra: self.extra_state.clone(),
        }
        .into_map()
    }

    /// Restore a persisted envelope and rebuild its launcher.
    ///
    /// The stored key is resolved against the current catalog; a key that is
    /// no longer offered fails with [`SpawnerError::ProfileNotFound`]. An
    /// envelope without a key restores nothing.
    pub async fn load_state(&mut self, state: StateMap) -> SpawnerResult<()> {
        let mut envelope = PersistedState::from_map(state)?;
        self.extra_state = std::mem::take(&mut envelope.extra);

        if self.child.is_some() {
            debug!("Launcher already bound for {}, keeping it", self.ctx.user);
            return Ok(());
        }
        if !envelope.has_selection() {
            debug!("No persisted profile for {}", self.ctx.user);
            return Ok(());
        }

        let catalog = self.catalog().await?;
        let profile = find_profile(&catalog, &envelope.profile)
            .ok_or_else(|| SpawnerError::ProfileNotFound(envelope.profile.clone()))?;

        let mut selection = Selection::from(profile);
        selection.launcher_config.extend(envelope.child_conf);
        debug!("Restored profile '{}' for {}", selection.profile_key, self.ctx.user);

        self.selection = Some(selection);
        self.child_state = envelope.child_state;
        self.phase = WrapperState::Selected;
        self.construct()?;
        Ok(())
    }

    /// Forget the session: clear the launcher, then the selection.
    pub fn clear_state(&mut self) {
        if let Some(child) = self.child.as_deref_mut() {
            child.clear_state();
        }
        self.child = None;
        self.selection = None;
        self.child_state.clear();
        self.links.clear();
        self.extra_state.clear();
        self.phase = WrapperState::Empty;
    }
}
