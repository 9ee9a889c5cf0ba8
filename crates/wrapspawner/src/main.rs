use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info};
use serde::Serialize;

use wrapspawner::config::ProviderConfig;
use wrapspawner::{LauncherRegistry, ProfileProvider, SpawnContext, WrapSpawnerConfig};

const APP_NAME: &str = "wrapspawner";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Profiles(cmd) => async_profiles(ctx, cmd),
        Command::Form(cmd) => async_form(ctx, cmd),
        Command::Resolve(cmd) => async_resolve(ctx, cmd),
        Command::Validate => handle_validate(&ctx),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[tokio::main]
async fn async_profiles(ctx: RuntimeContext, cmd: UserArgs) -> Result<()> {
    handle_profiles(&ctx, cmd).await
}

#[tokio::main]
async fn async_form(ctx: RuntimeContext, cmd: UserArgs) -> Result<()> {
    handle_form(&ctx, cmd).await
}

#[tokio::main]
async fn async_resolve(ctx: RuntimeContext, cmd: ResolveCommand) -> Result<()> {
    handle_resolve(&ctx, cmd).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Inspect and validate profile-driven session launcher configuration.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the profiles offered to a user
    Profiles(UserArgs),
    /// Render the profile selection form for a user
    Form(UserArgs),
    /// Resolve a profile key to the launcher it selects
    Resolve(ResolveCommand),
    /// Build the configured provider and check configured profiles
    Validate,
    /// Write a default config file
    Init(InitCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct UserArgs {
    /// User to build the catalog for
    #[arg(long, short = 'u')]
    user: String,
    /// Hub API URL used to issue user tokens
    #[arg(long, value_name = "URL", env = "JUPYTERHUB_API_URL")]
    hub_api_url: Option<String>,
}

impl UserArgs {
    fn spawn_context(&self) -> SpawnContext {
        let ctx = SpawnContext::new(self.user.clone());
        match &self.hub_api_url {
            Some(url) => ctx.hub_api_url(url.clone()),
            None => ctx,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ResolveCommand {
    #[command(flatten)]
    user: UserArgs,
    /// Requested profile key; the first profile when omitted
    #[arg(long, short = 'p')]
    profile: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: WrapSpawnerConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = match &common.config {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        let config = WrapSpawnerConfig::load(Some(&config_file))
            .with_context(|| format!("loading config from {}", config_file.display()))?;

        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level},reqwest={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }

        // The library logs through `log`.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn build(&self) -> Result<(Arc<LauncherRegistry>, Arc<dyn ProfileProvider>)> {
        let registry = self.config.build_registry();
        let provider = self
            .config
            .build_provider(&registry)
            .context("building profile provider")?;
        Ok((Arc::new(registry), provider))
    }

    /// Print `value` as JSON/YAML when requested, otherwise `text`.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        let output = if self.common.json {
            serde_json::to_string_pretty(value).context("serializing output to JSON")?
        } else if self.common.yaml {
            serde_yaml::to_string(value).context("serializing output to YAML")?
        } else {
            text()
        };
        println!("{output}");
        Ok(())
    }
}

async fn handle_profiles(ctx: &RuntimeContext, cmd: UserArgs) -> Result<()> {
    let (registry, provider) = ctx.build()?;
    let wrapper = ctx
        .config
        .build_wrapper(cmd.spawn_context(), provider, registry);
    let catalog = wrapper.catalog().await?;

    ctx.emit(&catalog, || {
        if catalog.is_empty() {
            return format!("No profiles available for {}", cmd.user);
        }
        catalog
            .iter()
            .map(|p| format!("{:<24} {:<16} {}", p.key, p.launcher, p.display_name))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

async fn handle_form(ctx: &RuntimeContext, cmd: UserArgs) -> Result<()> {
    let (registry, provider) = ctx.build()?;
    let wrapper = ctx
        .config
        .build_wrapper(cmd.spawn_context(), provider, registry);
    let form = wrapper.options_form().await?;
    println!("{form}");
    Ok(())
}

async fn handle_resolve(ctx: &RuntimeContext, cmd: ResolveCommand) -> Result<()> {
    let (registry, provider) = ctx.build()?;
    let mut wrapper = ctx
        .config
        .build_wrapper(cmd.user.spawn_context(), provider, registry);

    let matched = wrapper.select(cmd.profile.as_deref()).await?;
    let selection = wrapper
        .selection()
        .ok_or_else(|| anyhow!("no profile selected"))?;
    if !matched {
        info!(
            "profile {:?} not offered to {}, using '{}'",
            cmd.profile, cmd.user.user, selection.profile_key
        );
    }

    ctx.emit(selection, || {
        format!(
            "{} -> {} {}",
            selection.profile_key,
            selection.launcher,
            serde_json::Value::Object(selection.launcher_config.clone())
        )
    })
}

fn handle_validate(ctx: &RuntimeContext) -> Result<()> {
    let (registry, _provider) = ctx.build()?;
    let configured = match &ctx.config.provider {
        ProviderConfig::Static { profiles } | ProviderConfig::Filtered { profiles, .. } => {
            Some(profiles.len())
        }
        ProviderConfig::Container(settings) => Some(settings.default_profiles.len()),
        ProviderConfig::File(_) | ProviderConfig::Remote(_) => None,
    };

    let report = serde_json::json!({
        "provider": ctx.config.provider.kind(),
        "configured_profiles": configured,
        "launchers": registry.ids(),
    });
    ctx.emit(&report, || match configured {
        Some(count) => format!(
            "configuration valid: {} provider, {} configured profiles",
            ctx.config.provider.kind(),
            count
        ),
        None => format!(
            "configuration valid: {} provider (profiles are loaded per request)",
            ctx.config.provider.kind()
        ),
    })
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.config_file.display()
        ));
    }

    write_default_config(&ctx.config_file)?;
    info!("wrote default config to {}", ctx.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = WrapSpawnerConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Environment overrides use the WRAPSPAWNER__ prefix, e.g.\n");
    buffer.push_str("# WRAPSPAWNER__PROVIDER__KIND=file\n");
    buffer.push('\n');
    buffer
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => {
            let expanded = shellexpand::full(text).context("expanding path")?;
            Ok(PathBuf::from(expanded.to_string()))
        }
        None => Ok(path.to_path_buf()),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}
