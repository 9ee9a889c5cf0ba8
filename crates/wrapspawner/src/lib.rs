//! Profile-driven delegation for per-user session launchers.
//!
//! A user picks a profile from a catalog; the profile names a launcher and
//! its configuration. The [`WrapSpawner`] builds that launcher on demand,
//! forwards the session lifecycle to it and persists enough state to find
//! the session again after a restart.
//!
//! ```text
//! ProfileProvider --> ProfileFilter --> resolver --> LauncherRegistry
//!                                                        |
//!                           host <--> WrapSpawner <--> Launcher
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod form;
pub mod hooks;
pub mod launcher;
pub mod launchers;
pub mod profile;
pub mod providers;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod wrapper;

pub use config::WrapSpawnerConfig;
pub use context::SpawnContext;
pub use error::{SpawnerError, SpawnerResult};
pub use launcher::{LaunchInfo, Launcher, PollStatus, ProgressEvent};
pub use profile::{Catalog, Profile};
pub use providers::ProfileProvider;
pub use registry::LauncherRegistry;
pub use wrapper::{WrapSpawner, WrapperState};
