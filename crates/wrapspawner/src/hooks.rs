//! Hooks an operator can attach to the wrapper itself.
//!
//! Wrapper hooks run before the bound launcher's own hooks.

use anyhow::Result;
use async_trait::async_trait;

use crate::context::SpawnContext;

/// Hook run before spawning or after stopping a session.
#[async_trait]
pub trait SpawnHook: Send + Sync {
    async fn run(&self, ctx: &SpawnContext) -> Result<()>;
}

/// Hook receiving the authenticator's per-user state before spawn.
#[async_trait]
pub trait AuthStateHook: Send + Sync {
    async fn run(&self, ctx: &SpawnContext, auth_state: &serde_json::Value) -> Result<()>;
}

/// Adapts a plain closure into a [`SpawnHook`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> SpawnHook for FnHook<F>
where
    F: Fn(&SpawnContext) -> Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &SpawnContext) -> Result<()> {
        (self.0)(ctx)
    }
}
