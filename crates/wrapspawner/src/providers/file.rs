//! Profiles read from a common JSON file plus one file per user.
//!
//! Records only carry a description, an optional launcher and options.
//! Keys are generated (`prof_<index>`) across the merged list, common
//! profiles first.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::ProfileProvider;
use crate::context::SpawnContext;
use crate::profile::{Catalog, LauncherConfig, Profile};

/// One entry of a profiles JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub description: String,
    /// Launcher identifier; the provider's default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawner: Option<String>,
    pub options: LauncherConfig,
}

/// Configuration for [`FileProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProviderSettings {
    /// JSON file with profiles offered to every user.
    pub common_profiles_path: PathBuf,
    /// Base of user home directories. When unset the system home from the
    /// passwd database is used.
    pub home_base_dir: Option<PathBuf>,
    /// Directory below the home directory holding the user's profiles file.
    pub user_subdir: String,
    /// File name of the user's profiles file.
    pub user_profiles_file: String,
    /// Launcher used by records without a `spawner` entry.
    pub default_launcher: String,
}

impl Default for FileProviderSettings {
    fn default() -> Self {
        Self {
            common_profiles_path: PathBuf::from("/etc/jupyterhub/common_profiles.json"),
            home_base_dir: None,
            user_subdir: ".jupyterhub".to_string(),
            user_profiles_file: "user_profiles.json".to_string(),
            default_launcher: "batch".to_string(),
        }
    }
}

/// The passwd entry fields the provider needs for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

/// Resolves a user's account in the passwd database.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// The account of `user`, or `None` when no such user exists.
    async fn account(&self, user: &str) -> Result<Option<UserAccount>>;
}

/// Account lookup via `getent passwd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetentAccountDirectory;

#[async_trait]
impl AccountDirectory for GetentAccountDirectory {
    async fn account(&self, user: &str) -> Result<Option<UserAccount>> {
        let output = Command::new("getent")
            .args(["passwd", user])
            .output()
            .await
            .context("looking up user account")?;

        if !output.status.success() {
            return Ok(None);
        }

        Ok(parse_passwd_line(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `name:passwd:uid:gid:gecos:home:shell`.
fn parse_passwd_line(line: &str) -> Option<UserAccount> {
    let parts: Vec<&str> = line.trim().split(':').collect();
    if parts.len() < 6 {
        return None;
    }

    Some(UserAccount {
        home: PathBuf::from(parts[5]),
        uid: parts[2].parse().ok()?,
        gid: parts[3].parse().ok()?,
    })
}

/// Reads profiles from disk on every request.
pub struct FileProvider {
    settings: FileProviderSettings,
    accounts: Arc<dyn AccountDirectory>,
}

impl FileProvider {
    /// Provider using the system passwd database for user accounts.
    pub fn new(settings: FileProviderSettings) -> Self {
        Self::with_accounts(settings, Arc::new(GetentAccountDirectory))
    }

    pub fn with_accounts(settings: FileProviderSettings, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { settings, accounts }
    }

    /// Location of the user's profiles file.
    pub fn user_profiles_path(&self, user: &str, account: &UserAccount) -> PathBuf {
        let home = match &self.settings.home_base_dir {
            Some(base) => {
                let home = base.join(user);
                debug!("Home dir overridden, using {} for user {}", home.display(), user);
                home
            }
            None => {
                debug!("Using system home directory {} for user {}", account.home.display(), user);
                account.home.clone()
            }
        };

        home.join(&self.settings.user_subdir)
            .join(&self.settings.user_profiles_file)
    }

    async fn user_records(&self, user: &str) -> Vec<ProfileRecord> {
        let account = match self.accounts.account(user).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!("No account found for user {}, skipping user profiles", user);
                return Vec::new();
            }
            Err(e) => {
                warn!("Could not look up account for user {}: {:#}", user, e);
                return Vec::new();
            }
        };

        let path = self.user_profiles_path(user, &account);
        debug!("User profiles location is {}", path.display());
        read_records_as(&path, &account).await
    }

    fn into_catalog(&self, records: Vec<ProfileRecord>) -> Catalog {
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| Profile {
                display_name: record.description,
                key: format!("prof_{index}"),
                launcher: record
                    .spawner
                    .unwrap_or_else(|| self.settings.default_launcher.clone()),
                config: record.options,
                allowed_groups: None,
            })
            .collect()
    }
}

fn parse_records(contents: &[u8], path: &Path, label: &str) -> Vec<ProfileRecord> {
    match serde_json::from_slice(contents) {
        Ok(records) => records,
        Err(e) => {
            warn!(
                "JSON containing {} at {} is invalid: {}",
                label,
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

/// Read one profiles file. Any failure is logged and yields no records.
async fn read_records(path: &Path, label: &str) -> Vec<ProfileRecord> {
    match tokio::fs::read(path).await {
        Ok(contents) => parse_records(&contents, path, label),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("JSON containing {} not found at {}", label, path.display());
            Vec::new()
        }
        Err(e) => {
            warn!(
                "JSON containing {} at {} could not be read: {}",
                label,
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

/// Read a user-controlled file with that user's uid and gid, so links in
/// the user's home only reach what the user could read.
async fn read_records_as(path: &Path, account: &UserAccount) -> Vec<ProfileRecord> {
    let output = match Command::new("cat")
        .arg(path)
        .uid(account.uid)
        .gid(account.gid)
        .kill_on_drop(true)
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            error!(
                "Invalid arguments for reading user profiles at {}: {}",
                path.display(),
                e
            );
            return Vec::new();
        }
    };

    if !output.status.success() {
        warn!(
            "Non-normal exit code when reading JSON containing user profiles at {}. Code {}",
            path.display(),
            output
                .status
                .code()
                .map_or_else(|| "none".to_string(), |code| code.to_string())
        );
        return Vec::new();
    }

    parse_records(&output.stdout, path, "user profiles")
}

#[async_trait]
impl ProfileProvider for FileProvider {
    async fn profiles(&self, ctx: &SpawnContext) -> Catalog {
        let mut records = read_records(&self.settings.common_profiles_path, "common profiles").await;
        records.extend(self.user_records(&ctx.user).await);

        if records.is_empty() {
            error!(
                "No profiles collected for user {}. There will be nothing to spawn.",
                ctx.user
            );
        } else {
            debug!("Collected {} profiles for user {}", records.len(), ctx.user);
        }

        self.into_catalog(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::os::unix::fs::{PermissionsExt, symlink};

    fn write_json(path: &Path, value: serde_json::Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
    }

    fn settings(root: &Path) -> FileProviderSettings {
        FileProviderSettings {
            common_profiles_path: root.join("common_profiles.json"),
            home_base_dir: Some(root.join("home")),
            ..Default::default()
        }
    }

    /// Every user maps to a fixed account.
    struct FixedAccount(UserAccount);

    #[async_trait]
    impl AccountDirectory for FixedAccount {
        async fn account(&self, _user: &str) -> Result<Option<UserAccount>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct NoAccount;

    #[async_trait]
    impl AccountDirectory for NoAccount {
        async fn account(&self, _user: &str) -> Result<Option<UserAccount>> {
            Ok(None)
        }
    }

    fn current_account() -> UserAccount {
        UserAccount {
            home: PathBuf::from("/nonexistent"),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn provider(root: &Path) -> FileProvider {
        FileProvider::with_accounts(settings(root), Arc::new(FixedAccount(current_account())))
    }

    #[tokio::test]
    async fn test_merges_common_then_user_profiles() {
        let temp = tempfile::tempdir().unwrap();
        write_json(
            &temp.path().join("common_profiles.json"),
            json!([{"description": "Shared", "options": {"queue": "cpu"}}]),
        );
        write_json(
            &temp.path().join("home/alice/.jupyterhub/user_profiles.json"),
            json!([{"description": "Mine", "spawner": "local", "options": {}}]),
        );

        let catalog = provider(temp.path()).profiles(&SpawnContext::new("alice")).await;

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].key, "prof_0");
        assert_eq!(catalog[0].display_name, "Shared");
        assert_eq!(catalog[0].launcher, "batch");
        assert_eq!(catalog[0].config["queue"], "cpu");
        assert_eq!(catalog[1].key, "prof_1");
        assert_eq!(catalog[1].launcher, "local");
    }

    #[tokio::test]
    async fn test_missing_common_file_keeps_user_profiles() {
        testing_logger::setup();

        let temp = tempfile::tempdir().unwrap();
        write_json(
            &temp.path().join("home/bob/.jupyterhub/user_profiles.json"),
            json!([
                {"description": "One", "options": {}},
                {"description": "Two", "options": {"cores": 4}}
            ]),
        );

        let catalog = provider(temp.path()).profiles(&SpawnContext::new("bob")).await;

        let names: Vec<&str> = catalog.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["One", "Two"]);
        assert_eq!(catalog[1].key, "prof_1");

        testing_logger::validate(|logs| {
            let warnings: Vec<_> = logs
                .iter()
                .filter(|l| l.level == log::Level::Warn)
                .collect();
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].body.contains("common profiles not found"));
            assert!(!logs.iter().any(|l| l.level == log::Level::Error));
        });
    }

    #[tokio::test]
    async fn test_no_files_yield_empty_catalog() {
        let temp = tempfile::tempdir().unwrap();
        assert!(
            provider(temp.path())
                .profiles(&SpawnContext::new("carol"))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_invalid_json_degrades_to_other_file() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("common_profiles.json"), "{not json").unwrap();
        write_json(
            &temp.path().join("home/dave/.jupyterhub/user_profiles.json"),
            json!([{"description": "Mine", "options": {}}]),
        );

        let catalog = provider(temp.path()).profiles(&SpawnContext::new("dave")).await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].key, "prof_0");
    }

    #[tokio::test]
    async fn test_failed_user_read_contributes_nothing() {
        testing_logger::setup();

        let temp = tempfile::tempdir().unwrap();
        write_json(
            &temp.path().join("common_profiles.json"),
            json!([{"description": "Shared", "options": {}}]),
        );
        // A directory in place of the file makes the read exit non-zero.
        fs::create_dir_all(temp.path().join("home/erin/.jupyterhub/user_profiles.json")).unwrap();

        let catalog = provider(temp.path()).profiles(&SpawnContext::new("erin")).await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].display_name, "Shared");

        testing_logger::validate(|logs| {
            assert!(logs.iter().any(|l| {
                l.level == log::Level::Warn && l.body.contains("Non-normal exit code")
            }));
        });
    }

    #[tokio::test]
    async fn test_unknown_account_skips_user_file() {
        let temp = tempfile::tempdir().unwrap();
        write_json(
            &temp.path().join("common_profiles.json"),
            json!([{"description": "Shared", "options": {}}]),
        );
        write_json(
            &temp.path().join("home/ghost/.jupyterhub/user_profiles.json"),
            json!([{"description": "Mine", "options": {}}]),
        );

        let provider = FileProvider::with_accounts(settings(temp.path()), Arc::new(NoAccount));
        let catalog = provider.profiles(&SpawnContext::new("ghost")).await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].display_name, "Shared");
    }

    #[tokio::test]
    async fn test_user_file_is_read_with_user_privileges() {
        // Switching to another uid needs root.
        if unsafe { libc::getuid() } != 0 {
            return;
        }

        let temp = tempfile::Builder::new().tempdir_in("/tmp").unwrap();
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o755)).unwrap();

        let secret = temp.path().join("secret.json");
        write_json(&secret, json!([{"description": "Root only", "options": {}}]));
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o600)).unwrap();

        let public = temp.path().join("public.json");
        write_json(&public, json!([{"description": "Readable", "options": {}}]));
        fs::set_permissions(&public, fs::Permissions::from_mode(0o644)).unwrap();

        for (user, target) in [("mallory", &secret), ("trent", &public)] {
            let dir = temp.path().join("home").join(user).join(".jupyterhub");
            fs::create_dir_all(&dir).unwrap();
            symlink(target, dir.join("user_profiles.json")).unwrap();
        }
        for dir in ["home", "home/mallory", "home/mallory/.jupyterhub", "home/trent", "home/trent/.jupyterhub"] {
            fs::set_permissions(temp.path().join(dir), fs::Permissions::from_mode(0o755)).unwrap();
        }

        let nobody = UserAccount {
            home: PathBuf::from("/nonexistent"),
            uid: 65534,
            gid: 65534,
        };
        let provider = FileProvider::with_accounts(settings(temp.path()), Arc::new(FixedAccount(nobody)));

        assert!(provider.profiles(&SpawnContext::new("mallory")).await.is_empty());
        let catalog = provider.profiles(&SpawnContext::new("trent")).await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].display_name, "Readable");
    }

    #[test]
    fn test_user_profiles_path_uses_system_home() {
        let provider = FileProvider::with_accounts(FileProviderSettings::default(), Arc::new(NoAccount));
        let account = UserAccount {
            home: PathBuf::from("/srv/home/erin"),
            ..current_account()
        };
        assert_eq!(
            provider.user_profiles_path("erin", &account),
            PathBuf::from("/srv/home/erin/.jupyterhub/user_profiles.json")
        );
    }

    #[test]
    fn test_user_profiles_path_with_base_override() {
        let provider = FileProvider::with_accounts(
            FileProviderSettings {
                home_base_dir: Some(PathBuf::from("/home")),
                user_subdir: ".config/profiles".to_string(),
                ..Default::default()
            },
            Arc::new(NoAccount),
        );
        assert_eq!(
            provider.user_profiles_path("frank", &current_account()),
            PathBuf::from("/home/frank/.config/profiles/user_profiles.json")
        );
    }

    #[test]
    fn test_parse_passwd_line() {
        assert_eq!(
            parse_passwd_line("erin:x:1001:100:Erin:/home/erin:/bin/bash\n"),
            Some(UserAccount {
                home: PathBuf::from("/home/erin"),
                uid: 1001,
                gid: 100,
            })
        );
        assert_eq!(parse_passwd_line("erin:x:notanumber:100:Erin:/home/erin:/bin/sh"), None);
        assert_eq!(parse_passwd_line("short:x"), None);
    }

    #[test]
    fn test_record_requires_options() {
        let result: Result<ProfileRecord, _> = serde_json::from_value(json!({"description": "x"}));
        assert!(result.is_err());
    }
}
