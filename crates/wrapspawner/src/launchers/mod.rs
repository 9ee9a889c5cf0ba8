//! Built-in launcher implementations.

mod local;

pub use local::{LocalLauncherSettings, LocalProcessLauncher};
