//! Command-line definition.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand};

use crate::config::layer::parse_list;
use crate::config::ConfigLayer;

#[derive(Debug, Parser)]
#[command(
    name = "fa",
    version,
    about = "Launch and supervise FastAPI applications",
    styles = help_styles(),
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Project directory (defaults to the current directory).
    #[arg(long, short = 'C', global = true, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the development server with auto-reload.
    Dev(DevArgs),
    /// Start the production server.
    Start(StartArgs),
    /// Stop the running server.
    Stop(StopArgs),
    /// Restart the server (stop + start).
    Restart(RestartArgs),
    /// Show server status.
    Status(StatusArgs),
    /// View server logs.
    Logs(LogsArgs),
    /// Check server health.
    Health(HealthArgs),
    /// Show the effective configuration.
    Config(EnvArg),
    /// Check configuration and dependencies.
    Check,
    /// Remove runtime files (PID, logs).
    Clean(CleanArgs),
    /// Add launcher configuration to pyproject.toml.
    Init(InitArgs),
    /// Start in dev or prod mode depending on the detected environment.
    Run(RunArgs),
    /// Ask the running server to reload its workers.
    Reload(EnvArg),
    /// Live view of the server and its workers.
    Monitor(MonitorArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct EnvArg {
    /// Named environment from pyproject.toml (e.g. staging).
    #[arg(long, short = 'e', value_name = "NAME")]
    pub env: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BindArgs {
    /// Application import path, e.g. main:app.
    #[arg(long, short = 'a')]
    pub app: Option<String>,
    /// Bind host.
    #[arg(long)]
    pub host: Option<String>,
    /// Bind port.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}

impl BindArgs {
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            app: self.app.clone(),
            host: self.host.clone(),
            port: self.port.map(i64::from),
            ..ConfigLayer::default()
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct DevArgs {
    #[command(flatten)]
    pub bind: BindArgs,
    /// Enable auto-reload.
    #[arg(long, overrides_with = "no_reload")]
    pub reload: bool,
    /// Disable auto-reload.
    #[arg(long, overrides_with = "reload")]
    pub no_reload: bool,
    /// Comma-separated directories to watch.
    #[arg(long, value_name = "DIRS")]
    pub reload_dirs: Option<String>,
    /// Log level.
    #[arg(long, short = 'l')]
    pub log_level: Option<String>,
    #[command(flatten)]
    pub env: EnvArg,
}

impl DevArgs {
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            reload: flag_pair(self.reload, self.no_reload),
            reload_dirs: self.reload_dirs.as_deref().map(parse_list),
            log_level: self.log_level.clone(),
            ..self.bind.layer()
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct StartArgs {
    #[command(flatten)]
    pub bind: BindArgs,
    /// Number of worker processes.
    #[arg(long, short = 'w')]
    pub workers: Option<u32>,
    /// Run in the background.
    #[arg(long, short = 'd', overrides_with = "no_daemon")]
    pub daemon: bool,
    /// Stay in the foreground.
    #[arg(long, short = 'D', overrides_with = "daemon")]
    pub no_daemon: bool,
    /// Log level.
    #[arg(long, short = 'l')]
    pub log_level: Option<String>,
    /// Server backend: uvicorn or gunicorn.
    #[arg(long, short = 's')]
    pub server: Option<String>,
    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, value_name = "SECS")]
    pub timeout_graceful_shutdown: Option<u64>,
    /// Requests per worker before it is recycled (gunicorn).
    #[arg(long)]
    pub max_requests: Option<u64>,
    #[command(flatten)]
    pub env: EnvArg,
}

impl StartArgs {
    pub fn daemon(&self) -> Option<bool> {
        flag_pair(self.daemon, self.no_daemon)
    }

    /// Everything except `--server`, which the command validates itself.
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            workers: self.workers.map(i64::from),
            daemon: self.daemon(),
            log_level: self.log_level.clone(),
            timeout_graceful_shutdown: self.timeout_graceful_shutdown.map(saturating_i64),
            max_requests: self.max_requests.map(saturating_i64),
            ..self.bind.layer()
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct StopArgs {
    /// Kill immediately instead of a graceful stop.
    #[arg(long, short = 'f')]
    pub force: bool,
    /// Seconds to wait before force-killing.
    #[arg(long, short = 't', default_value_t = 10.0)]
    pub timeout: f64,
    #[command(flatten)]
    pub env: EnvArg,
}

#[derive(Debug, Clone, Args)]
pub struct RestartArgs {
    /// Seconds to wait for the old server to stop.
    #[arg(long, short = 't', default_value_t = 10.0)]
    pub timeout: f64,
    #[command(flatten)]
    pub env: EnvArg,
}

#[derive(Debug, Clone, Default, Args)]
pub struct StatusArgs {
    /// Include per-worker details.
    #[arg(long, short = 'v')]
    pub verbose: bool,
    #[command(flatten)]
    pub env: EnvArg,
}

#[derive(Debug, Clone, Args)]
pub struct LogsArgs {
    /// Number of lines to show.
    #[arg(long, short = 'n', default_value_t = 100)]
    pub lines: usize,
    /// Keep printing new lines.
    #[arg(long, short = 'f')]
    pub follow: bool,
    /// Log type: main, access or error.
    #[arg(long = "type", short = 't', default_value = "main")]
    pub log_type: String,
    #[command(flatten)]
    pub env: EnvArg,
}

#[derive(Debug, Clone, Args)]
pub struct HealthArgs {
    /// Server host.
    #[arg(long)]
    pub host: Option<String>,
    /// Server port.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
    /// Health endpoint path.
    #[arg(long)]
    pub path: Option<String>,
    /// Request timeout in seconds.
    #[arg(long, short = 't')]
    pub timeout: Option<f64>,
    /// Keep polling for up to this many seconds until the server is healthy.
    #[arg(long, short = 'w', value_name = "SECS")]
    pub wait: Option<f64>,
    #[command(flatten)]
    pub env: EnvArg,
}

#[derive(Debug, Clone, Default, Args)]
pub struct CleanArgs {
    /// Only remove log files.
    #[arg(long, short = 'l')]
    pub logs: bool,
    /// Do not ask for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
    #[command(flatten)]
    pub env: EnvArg,
}

#[derive(Debug, Clone, Default, Args)]
pub struct InitArgs {
    /// Also write a .env.example template.
    #[arg(long, short = 'e')]
    pub env: bool,
    /// Replace an existing configuration.
    #[arg(long, short = 'f')]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub bind: BindArgs,
}

#[derive(Debug, Clone, Args)]
pub struct MonitorArgs {
    /// Plain line output instead of the full-screen UI.
    #[arg(long)]
    pub no_tui: bool,
    /// Refresh interval in seconds.
    #[arg(long, short = 'r', default_value_t = 1.0)]
    pub refresh: f64,
    #[command(flatten)]
    pub env: EnvArg,
}

/// `--x`/`--no-x` as an override; neither flag leaves the setting alone.
pub fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
