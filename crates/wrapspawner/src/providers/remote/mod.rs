//! Profiles served by a remote HTTP service.
//!
//! The service is called with a short-lived user token issued by the hub.
//! The token is cached in the wrapper's [`TokenSlot`](crate::context::TokenSlot)
//! and refreshed once when it is missing or rejected.

mod client;
mod error;
mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::ProfileProvider;
use crate::context::SpawnContext;
use crate::profile::{Catalog, Profile};

pub use client::{HubApi, HubClient};
pub use error::{RemoteError, RemoteResult};
pub use types::{RemoteProfileRecord, RemoteProfilesResponse, TokenRequest, TokenResponse};

/// Configuration for [`RemoteProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteProviderSettings {
    /// Profile service endpoint.
    pub profiles_url: String,
    /// Hub API base URL. Falls back to the one in the spawn context.
    pub hub_api_url: Option<String>,
    /// Service token used to issue user tokens.
    pub api_token: String,
    /// Lifetime of issued user tokens in seconds.
    pub token_expires_in: u64,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Launcher used by records without a `spawner` entry.
    pub default_launcher: String,
}

impl Default for RemoteProviderSettings {
    fn default() -> Self {
        Self {
            profiles_url: "http://127.0.0.1:8003/services/jupyterhub_profile_tool/profiles/data"
                .to_string(),
            hub_api_url: None,
            api_token: String::new(),
            token_expires_in: 300,
            request_timeout: 30,
            default_launcher: "batch".to_string(),
        }
    }
}

/// Run `op`; on an authentication failure call `refresh` and run `op` once more.
///
/// A failing refresh ends the attempt with the refresh error.
pub async fn with_token_retry<T, Op, OpFut, Refresh, RefreshFut>(
    mut op: Op,
    refresh: Refresh,
) -> RemoteResult<T>
where
    Op: FnMut() -> OpFut,
    OpFut: Future<Output = RemoteResult<T>>,
    Refresh: FnOnce() -> RefreshFut,
    RefreshFut: Future<Output = RemoteResult<()>>,
{
    match op().await {
        Err(e) if e.is_auth_failure() => {
            warn!("Authentication failed ({}), refreshing token and retrying", e);
            refresh().await?;
            op().await
        }
        other => other,
    }
}

/// Fetches profiles from the remote service on every request.
pub struct RemoteProvider {
    settings: RemoteProviderSettings,
    api: Arc<dyn HubApi>,
}

impl RemoteProvider {
    pub fn new(settings: RemoteProviderSettings) -> Self {
        let api = HubClient::new(
            settings.profiles_url.clone(),
            settings.api_token.clone(),
            settings.token_expires_in,
            Duration::from_secs(settings.request_timeout),
        );
        Self::with_api(settings, Arc::new(api))
    }

    pub fn with_api(settings: RemoteProviderSettings, api: Arc<dyn HubApi>) -> Self {
        Self { settings, api }
    }

    /// Issue a new user token and store it in the context's slot.
    async fn refresh_token(&self, ctx: &SpawnContext) -> RemoteResult<()> {
        let hub_api_url = self
            .settings
            .hub_api_url
            .as_deref()
            .or(ctx.hub_api_url.as_deref())
            .ok_or(RemoteError::MissingHubUrl)?;

        ctx.hub_token.clear().await;
        match self.api.issue_user_token(hub_api_url, &ctx.user).await {
            Ok(token) => {
                info!("Temporary user token for user {} created", ctx.user);
                ctx.hub_token.set(token).await;
                Ok(())
            }
            Err(e) => {
                error!("Error creating temporary user token for user {}: {}", ctx.user, e);
                Err(e)
            }
        }
    }

    async fn fetch(&self, ctx: &SpawnContext) -> RemoteResult<Vec<RemoteProfileRecord>> {
        let api = self.api.as_ref();
        let fetch_once = move || async move {
            let token = ctx.hub_token.get().await.ok_or(RemoteError::MissingToken)?;
            api.fetch_profiles(&token).await
        };
        with_token_retry(fetch_once, move || self.refresh_token(ctx)).await
    }

    fn into_catalog(&self, records: Vec<RemoteProfileRecord>) -> Catalog {
        records
            .into_iter()
            .map(|record| Profile {
                display_name: record.description,
                key: record.profile_id,
                launcher: record
                    .spawner
                    .unwrap_or_else(|| self.settings.default_launcher.clone()),
                config: record.options,
                allowed_groups: None,
            })
            .collect()
    }
}

#[async_trait]
impl ProfileProvider for RemoteProvider {
    async fn profiles(&self, ctx: &SpawnContext) -> Catalog {
        match self.fetch(ctx).await {
            Ok(records) => self.into_catalog(records),
            Err(e) => {
                error!(
                    "Failed to fetch profiles for user {} from {} (status {:?}): {}",
                    ctx.user,
                    self.settings.profiles_url,
                    e.status(),
                    e
                );
                Vec::new()
            }
        }
    }
}
