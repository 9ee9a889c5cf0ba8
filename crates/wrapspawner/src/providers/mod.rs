//! Profile catalog providers.
//!
//! A provider produces a fresh catalog snapshot per call. Providers that
//! depend on files, HTTP services or the container runtime degrade to a
//! smaller (possibly empty) catalog when a source is unavailable; they never
//! fail the request.
//!
//! - [`StaticProvider`]: fixed list validated once at configuration time
//! - [`FilteredProvider`]: fixed list narrowed per user by a [`ProfileFilter`](crate::filter::ProfileFilter)
//! - [`FileProvider`]: common + per-user JSON files
//! - [`RemoteProvider`]: profile service behind the hub's token issuance
//! - [`ContainerImageProvider`]: one profile per matching local container image

pub mod container;
mod file;
pub mod remote;
mod static_list;

use async_trait::async_trait;

use crate::context::SpawnContext;
use crate::profile::Catalog;

pub use container::{ContainerImageProvider, ContainerProviderSettings};
pub use file::{
    AccountDirectory, FileProvider, FileProviderSettings, GetentAccountDirectory, ProfileRecord, UserAccount,
};
pub use remote::{RemoteProvider, RemoteProviderSettings};
pub use static_list::{FilteredProvider, StaticProvider};

/// Source of the profiles offered to one user.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    /// Catalog snapshot for the user in `ctx`.
    async fn profiles(&self, ctx: &SpawnContext) -> Catalog;

    /// Whether two calls may return different catalogs.
    ///
    /// Options forms of non-dynamic providers are rendered once.
    fn is_dynamic(&self) -> bool {
        true
    }
}
