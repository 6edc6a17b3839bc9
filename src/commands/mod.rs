//! Subcommand implementations.
//!
//! Each command reports to the operator through the session's output sink
//! and returns a [`CommandStatus`]; only unexpected plumbing failures escape
//! as errors.

mod inspect;
mod lifecycle;
mod project;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::app_path::AppResolver;
use crate::cli::{Commands, EnvArg};
use crate::config::model::DEFAULT_RUNTIME_DIR;
use crate::config::sources::load_project_section;
use crate::config::{Config, ConfigError, ConfigResolver, ResolveRequest};
use crate::daemon::{platform_daemonizer, Daemonizer};
use crate::launcher::{LaunchContext, Launcher, OutputSink};
use crate::paths::RuntimePaths;
use crate::runner::ProcessRunner;
use crate::ui::Console;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure,
}

impl From<CommandStatus> for ExitCode {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Success => ExitCode::SUCCESS,
            CommandStatus::Failure => ExitCode::FAILURE,
        }
    }
}

/// Per-invocation state shared by every command.
pub struct Session {
    project_dir: PathBuf,
    env: Vec<(String, String)>,
    output: Arc<dyn OutputSink>,
    daemonizer: fn() -> Box<dyn Daemonizer>,
}

impl Session {
    /// Session for the real terminal and process environment.
    pub fn from_env(project_dir: Option<PathBuf>) -> Result<Self> {
        let project_dir = match project_dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("failed to resolve current directory")?,
        };
        Ok(Self::new(project_dir, std::env::vars().collect(), Arc::new(Console)))
    }

    pub fn new(project_dir: PathBuf, env: Vec<(String, String)>, output: Arc<dyn OutputSink>) -> Self {
        Self {
            project_dir,
            env,
            output,
            daemonizer: platform_daemonizer,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn output(&self) -> &dyn OutputSink {
        self.output.as_ref()
    }

    pub fn env_var(&self, key: &str) -> Option<String> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    }

    pub fn resolver(&self) -> ConfigResolver {
        ConfigResolver::with_env(&self.project_dir, self.env.clone())
    }

    pub fn launcher(&self) -> Launcher<ProcessRunner> {
        Launcher::new(
            LaunchContext::new(self.output.clone()),
            AppResolver::default(),
            (self.daemonizer)(),
            ProcessRunner,
        )
    }

    /// `--env` if given, else the environment the last `start` recorded.
    ///
    /// A recorded name the project no longer defines is ignored with a
    /// warning; only an explicit `--env` may fail resolution.
    pub fn env_name(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(name) = explicit {
            return Some(name.to_string());
        }
        let name = self.persisted_env_name()?;
        match load_project_section(&self.project_dir) {
            Ok(project) if !project.envs.contains_key(&name) => {
                self.output.warning(&format!(
                    "Ignoring recorded environment '{name}': not defined in pyproject.toml"
                ));
                None
            }
            _ => Some(name),
        }
    }

    // The marker is looked up in the default runtime dir first, then in the
    // one the base configuration points at.
    fn persisted_env_name(&self) -> Option<String> {
        let default = RuntimePaths::new(self.project_dir.join(DEFAULT_RUNTIME_DIR));
        if let Some(name) = default.read_env_name() {
            return Some(name);
        }
        let config = self.resolver().resolve(&ResolveRequest::default()).ok()?;
        let configured = RuntimePaths::for_config(&config);
        if configured.root() == default.root() {
            return None;
        }
        configured.read_env_name()
    }

    /// Effective configuration for `--env`, reporting failures.
    pub fn load_config(&self, env: &EnvArg) -> Option<Config> {
        let request = ResolveRequest::default().with_env_name(self.env_name(env.env.as_deref()));
        match self.resolver().resolve(&request) {
            Ok(config) => Some(config),
            Err(err) => {
                self.report_config_error(&err);
                None
            }
        }
    }

    pub fn report_config_error(&self, err: &ConfigError) {
        let fields = err.field_errors();
        if fields.is_empty() {
            self.output.error(&err.to_string());
            return;
        }
        self.output.error("Invalid configuration");
        for field in fields {
            self.output.hint(&field.to_string());
        }
    }
}

pub fn dispatch(session: &Session, command: Commands) -> Result<CommandStatus> {
    match command {
        Commands::Dev(args) => Ok(lifecycle::dev(session, &args)),
        Commands::Start(args) => Ok(lifecycle::start(session, &args)),
        Commands::Stop(args) => Ok(lifecycle::stop(session, &args)),
        Commands::Restart(args) => Ok(lifecycle::restart(session, &args)),
        Commands::Reload(args) => Ok(lifecycle::reload(session, &args)),
        Commands::Run(args) => Ok(lifecycle::run(session, &args)),
        Commands::Status(args) => Ok(inspect::status(session, &args)),
        Commands::Logs(args) => inspect::logs(session, &args),
        Commands::Health(args) => Ok(inspect::health(session, &args)),
        Commands::Config(args) => Ok(inspect::config(session, &args)),
        Commands::Check => Ok(inspect::check(session)),
        Commands::Monitor(args) => inspect::monitor(session, &args),
        Commands::Clean(args) => project::clean(session, &args),
        Commands::Init(args) => Ok(project::init(session, &args)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::daemon::Foreground;
    use crate::launcher::tests::Recorder;

    /// Session over a temp project that never detaches.
    pub(crate) fn session(dir: &TempDir) -> (Session, Arc<Recorder>) {
        let output = Arc::new(Recorder::default());
        let mut session = Session::new(dir.path().to_path_buf(), Vec::new(), output.clone());
        session.daemonizer = foreground;
        (session, output)
    }

    fn foreground() -> Box<dyn Daemonizer> {
        Box::new(Foreground)
    }

    #[test]
    fn env_name_prefers_flag_then_marker() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.fastapi-launcher.envs.staging]\nworkers = 2\n",
        )
        .unwrap();
        let (session, _) = session(&dir);
        assert_eq!(session.env_name(None), None);

        RuntimePaths::new(dir.path().join("runtime"))
            .write_env_name("staging")
            .unwrap();
        assert_eq!(session.env_name(None).as_deref(), Some("staging"));
        assert_eq!(session.env_name(Some("qa")).as_deref(), Some("qa"));
    }

    #[test]
    fn env_marker_in_configured_runtime_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.fastapi-launcher]\nruntime_dir = \"var/run\"\n\n[tool.fastapi-launcher.envs.qa]\nport = 9001\n",
        )
        .unwrap();
        RuntimePaths::new(dir.path().join("var/run"))
            .write_env_name("qa")
            .unwrap();
        let (session, _) = session(&dir);
        assert_eq!(session.env_name(None).as_deref(), Some("qa"));
    }

    #[test]
    fn undefined_recorded_env_is_ignored() {
        let dir = TempDir::new().unwrap();
        RuntimePaths::new(dir.path().join("runtime"))
            .write_env_name("staging")
            .unwrap();
        let (session, output) = session(&dir);

        assert_eq!(session.env_name(None), None);
        assert!(output.contains("warning: Ignoring recorded environment 'staging'"));
        let config = session.load_config(&EnvArg::default()).unwrap();
        assert_eq!(config.env_name, None);

        let explicit = EnvArg {
            env: Some("staging".into()),
        };
        assert!(session.load_config(&explicit).is_none());
        assert!(output.contains("error: environment 'staging' not found"));
    }

    #[test]
    fn config_errors_are_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "[tool.fastapi-launcher]\nworkers = 0\n").unwrap();
        let (session, output) = session(&dir);
        assert!(session.load_config(&EnvArg::default()).is_none());
        assert!(output.contains("error: Invalid configuration"));
        assert!(output.contains("hint: workers"));
    }
}
