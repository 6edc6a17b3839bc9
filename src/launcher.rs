//! One launch, start to finish.
//!
//! Steps run strictly in order: resolve config, preflight (port, app),
//! runtime dir, optional detach, PID file, signal handlers, summary,
//! backend. The PID file is removed on every way out once written.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info};

use crate::app_path::{AppResolveError, AppResolver, ImportPath, ResolvedApp};
use crate::backend::{build_command, BackendCommand};
use crate::config::{Config, ConfigError, ConfigResolver, ResolveRequest, RunMode, ServerBackend};
use crate::daemon::{DaemonOptions, Daemonizer, Detached};
use crate::logs::{rotate_logs, RotationPolicy};
use crate::paths::{LogKind, RuntimePaths};
use crate::port::{self, PortInfo};
use crate::process::{self, FORCE_KILL_GRACE};
use crate::runner::{ControlSignals, ServeOutcome, ServeRequest, ServerRunner};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("port {port} on {host} is already in use{}", owner_suffix(.occupant))]
    PortInUse {
        host: String,
        port: u16,
        occupant: PortInfo,
    },
    #[error(transparent)]
    App(#[from] AppResolveError),
    #[error("failed to prepare runtime directory {}: {source}", .path.display())]
    RuntimeDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write PID file {}: {source}", .path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to detach from the terminal: {0:#}")]
    Daemonize(anyhow::Error),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
    #[error("failed to run {backend}: {source}")]
    Spawn {
        backend: ServerBackend,
        #[source]
        source: io::Error,
    },
    #[error("{backend} exited with {status}")]
    BackendExited {
        backend: ServerBackend,
        status: String,
    },
}

const FOREGROUND_FALLBACK: &str =
    "Daemon mode is not supported on this platform, running in the foreground";

fn owner_suffix(occupant: &PortInfo) -> String {
    occupant
        .describe_owner()
        .map(|owner| format!(" by {owner}"))
        .unwrap_or_default()
}

/// Where the launcher reports progress to the operator.
pub trait OutputSink {
    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
    /// Follow-up suggestion for the preceding message.
    fn hint(&self, message: &str) {
        self.info(message);
    }
    fn startup_summary(&self, summary: &StartupSummary);
}

/// Everything the launcher would otherwise take from globals.
#[derive(Clone)]
pub struct LaunchContext {
    pub output: Arc<dyn OutputSink>,
    pub install_signals: fn() -> io::Result<ControlSignals>,
    pub clock: fn() -> DateTime<Local>,
}

impl LaunchContext {
    pub fn new(output: Arc<dyn OutputSink>) -> Self {
        Self {
            output,
            install_signals: ControlSignals::install,
            clock: Local::now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartupSummary {
    pub app: String,
    pub discovered: bool,
    pub url: String,
    pub mode: RunMode,
    pub server: ServerBackend,
    pub workers: u32,
    pub reload: bool,
    pub pid: process::Pid,
    pub env_name: Option<String>,
    pub command: String,
    pub started_at: DateTime<Local>,
}

pub enum ConfigInput {
    Ready(Config),
    Resolve {
        resolver: ConfigResolver,
        request: ResolveRequest,
    },
}

pub struct LaunchRequest {
    pub config: ConfigInput,
    pub mode: Option<RunMode>,
    pub daemon: bool,
    pub show_summary: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchReport {
    pub app: ImportPath,
    pub daemonized: bool,
    pub outcome: ServeOutcome,
}

/// Removes the PID file when dropped.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if process::remove_pid(&self.path) {
            debug!(path = %self.path.display(), "removed PID file");
        }
    }
}

pub struct Launcher<R> {
    context: LaunchContext,
    apps: AppResolver,
    daemonizer: Box<dyn Daemonizer>,
    runner: R,
}

impl<R: ServerRunner> Launcher<R> {
    pub fn new(
        context: LaunchContext,
        apps: AppResolver,
        daemonizer: Box<dyn Daemonizer>,
        runner: R,
    ) -> Self {
        Self {
            context,
            apps,
            daemonizer,
            runner,
        }
    }

    pub fn launch(&self, request: LaunchRequest) -> Result<LaunchReport, LaunchError> {
        let mut config = match request.config {
            ConfigInput::Ready(config) => config,
            ConfigInput::Resolve {
                resolver,
                request: resolve,
            } => {
                let mode = request.mode.or(resolve.mode);
                resolver.resolve(&resolve.with_mode(mode))?
            }
        };
        if let Some(mode) = request.mode {
            config.mode = mode;
        }
        if config.mode == RunMode::Dev {
            config.reload = true;
        }

        let app = self.preflight(&config)?;

        let paths = RuntimePaths::for_config(&config);
        paths.ensure().map_err(|source| LaunchError::RuntimeDir {
            path: paths.root().to_path_buf(),
            source,
        })?;
        let pid_file = paths.pid_file();

        let daemonized = request.daemon && self.detach(&config, &paths, &pid_file)?;
        if !daemonized {
            process::write_pid(&pid_file, None).map_err(|source| LaunchError::PidFile {
                path: pid_file.clone(),
                source,
            })?;
        }
        let _guard = PidFileGuard::new(pid_file);

        let command = build_command(&config, &app.import_path, daemonized.then_some(&paths));
        let grace = Duration::from_secs(config.timeout_graceful_shutdown) + FORCE_KILL_GRACE;
        info!(command = %command.display(), pid = process::current_pid(), "launching backend");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(LaunchError::Runtime)?;
        let outcome = runtime.block_on(async {
            let signals = (self.context.install_signals)().map_err(LaunchError::Signals)?;
            if request.show_summary && !daemonized {
                let summary = self.summary(&config, &app, &command);
                self.context.output.startup_summary(&summary);
            }
            self.runner.serve(ServeRequest { command: &command, grace }, signals).await
        })?;

        if let ServeOutcome::Stopped(signal) = outcome {
            info!(signal = signal.label(), "launcher stopped");
        }
        Ok(LaunchReport {
            app: app.import_path,
            daemonized,
            outcome,
        })
    }

    fn preflight(&self, config: &Config) -> Result<ResolvedApp, LaunchError> {
        if port::is_in_use(config.port, &config.host) {
            return Err(LaunchError::PortInUse {
                host: config.host.clone(),
                port: config.port,
                occupant: port::info(config.port),
            });
        }
        let app = self.apps.resolve(config.app.as_deref(), &config.app_dir)?;
        if app.discovered {
            self.context
                .output
                .info(&format!("Auto-discovered app: {}", app.import_path));
        }
        Ok(app)
    }

    // Returns true in the detached daemon; false if the platform kept us in
    // the foreground.
    fn detach(&self, config: &Config, paths: &RuntimePaths, pid_file: &Path) -> Result<bool, LaunchError> {
        if !self.daemonizer.is_supported() {
            self.context.output.warning(FOREGROUND_FALLBACK);
            return Ok(false);
        }
        let logs_dir = paths.ensure_logs_dir().map_err(|source| LaunchError::RuntimeDir {
            path: paths.logs_dir(),
            source,
        })?;
        rotate_logs(paths, RotationPolicy::default());
        let log_file = paths.log_file(LogKind::Main);
        self.context.output.info(&format!(
            "Starting {} in the background on {} (logs: {})",
            config.server,
            config.url(),
            logs_dir.display()
        ));

        let options = DaemonOptions {
            pid_file: Some(pid_file.to_path_buf()),
            log_file: Some(log_file),
            work_dir: Some(config.project_dir.clone()),
        };
        match self.daemonizer.daemonize(&options).map_err(LaunchError::Daemonize)? {
            Detached::Daemon => Ok(true),
            Detached::Foreground => {
                self.context.output.warning(FOREGROUND_FALLBACK);
                Ok(false)
            }
        }
    }

    fn summary(&self, config: &Config, app: &ResolvedApp, command: &BackendCommand) -> StartupSummary {
        StartupSummary {
            app: app.import_path.to_string(),
            discovered: app.discovered,
            url: config.url(),
            mode: config.mode,
            server: config.server,
            workers: config.workers,
            reload: config.reload,
            pid: process::current_pid(),
            env_name: config.env_name.clone(),
            command: command.display(),
            started_at: (self.context.clock)(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::net::TcpListener;
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;
    use crate::daemon::Foreground;

    /// Output sink that records every message.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub lines: Mutex<Vec<String>>,
        pub summaries: Mutex<Vec<StartupSummary>>,
    }

    impl Recorder {
        pub fn contains(&self, needle: &str) -> bool {
            self.lines.lock().unwrap().iter().any(|line| line.contains(needle))
        }
    }

    impl OutputSink for Recorder {
        fn info(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("info: {message}"));
        }
        fn success(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("success: {message}"));
        }
        fn warning(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("warning: {message}"));
        }
        fn error(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("error: {message}"));
        }
        fn hint(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("hint: {message}"));
        }
        fn startup_summary(&self, summary: &StartupSummary) {
            self.summaries.lock().unwrap().push(summary.clone());
        }
    }

    /// Records what it was asked to run and whether the PID file existed.
    struct FakeRunner {
        pid_file: PathBuf,
        fail: bool,
        seen: RefCell<Option<(BackendCommand, Option<process::Pid>)>>,
    }

    impl ServerRunner for FakeRunner {
        async fn serve(
            &self,
            request: ServeRequest<'_>,
            _signals: ControlSignals,
        ) -> Result<ServeOutcome, LaunchError> {
            let recorded = process::read_pid(&self.pid_file);
            *self.seen.borrow_mut() = Some((request.command.clone(), recorded));
            if self.fail {
                Err(LaunchError::BackendExited {
                    backend: request.command.backend,
                    status: "exit status: 1".into(),
                })
            } else {
                Ok(ServeOutcome::Exited)
            }
        }
    }

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn project(port: u16) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            format!("[tool.fastapi-launcher]\nport = {port}\n"),
        )
        .unwrap();
        fs::write(dir.path().join("main.py"), "app = FastAPI()\n").unwrap();
        dir
    }

    fn launcher(dir: &TempDir, fail: bool, output: Arc<Recorder>) -> Launcher<FakeRunner> {
        let context = LaunchContext {
            output,
            install_signals: || Ok(ControlSignals::disabled()),
            clock: Local::now,
        };
        let runner = FakeRunner {
            pid_file: dir.path().join("runtime").join("fa.pid"),
            fail,
            seen: RefCell::new(None),
        };
        Launcher::new(context, AppResolver::default(), Box::new(Foreground), runner)
    }

    fn request(dir: &TempDir, mode: Option<RunMode>) -> LaunchRequest {
        LaunchRequest {
            config: ConfigInput::Resolve {
                resolver: ConfigResolver::with_env(dir.path(), Vec::new()),
                request: ResolveRequest::default(),
            },
            mode,
            daemon: false,
            show_summary: true,
        }
    }

    #[test]
    fn dev_launch_writes_and_removes_pid_file() {
        let port = free_port();
        let dir = project(port);
        let output = Arc::new(Recorder::default());
        let launcher = launcher(&dir, false, output.clone());

        let report = launcher.launch(request(&dir, Some(RunMode::Dev))).unwrap();
        assert_eq!(report.app.to_string(), "main:app");
        assert_eq!(report.outcome, ServeOutcome::Exited);
        assert!(!report.daemonized);

        let (command, recorded) = launcher.runner.seen.borrow().clone().unwrap();
        assert_eq!(recorded, Some(process::current_pid()));
        assert!(command.args.contains(&"--reload".to_string()));
        assert!(command.args.contains(&port.to_string()));
        assert!(!dir.path().join("runtime/fa.pid").exists());

        assert!(output.contains("Auto-discovered app: main:app"));
        let summaries = output.summaries.lock().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].mode, RunMode::Dev);
        assert!(summaries[0].reload);
        assert_eq!(summaries[0].url, format!("http://127.0.0.1:{port}"));
    }

    #[test]
    fn pid_file_is_removed_when_backend_fails() {
        let dir = project(free_port());
        let launcher = launcher(&dir, true, Arc::new(Recorder::default()));
        let err = launcher.launch(request(&dir, None)).unwrap_err();
        assert!(matches!(err, LaunchError::BackendExited { .. }));
        let (_, recorded) = launcher.runner.seen.borrow().clone().unwrap();
        assert!(recorded.is_some());
        assert!(!dir.path().join("runtime/fa.pid").exists());
    }

    #[test]
    fn occupied_port_aborts_before_side_effects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = project(port);
        let launcher = launcher(&dir, false, Arc::new(Recorder::default()));

        let err = launcher.launch(request(&dir, None)).unwrap_err();
        assert!(matches!(err, LaunchError::PortInUse { port: p, .. } if p == port));
        assert!(launcher.runner.seen.borrow().is_none());
        assert!(!dir.path().join("runtime").exists());
    }

    #[test]
    fn unresolvable_app_aborts() {
        let dir = project(free_port());
        fs::remove_file(dir.path().join("main.py")).unwrap();
        let launcher = launcher(&dir, false, Arc::new(Recorder::default()));
        let err = launcher.launch(request(&dir, None)).unwrap_err();
        assert!(matches!(err, LaunchError::App(AppResolveError::NotFound { .. })));
        assert!(!dir.path().join("runtime/fa.pid").exists());
    }

    #[test]
    fn config_errors_surface_as_launch_errors() {
        let dir = project(free_port());
        let launcher = launcher(&dir, false, Arc::new(Recorder::default()));
        let mut launch = request(&dir, None);
        launch.config = ConfigInput::Resolve {
            resolver: ConfigResolver::with_env(dir.path(), Vec::new()),
            request: ResolveRequest::default().with_env_name(Some("missing".into())),
        };
        let err = launcher.launch(launch).unwrap_err();
        assert!(matches!(err, LaunchError::Config(ConfigError::EnvironmentNotFound { .. })));
    }

    #[test]
    fn unsupported_daemon_falls_back_to_foreground() {
        let dir = project(free_port());
        let output = Arc::new(Recorder::default());
        let launcher = launcher(&dir, false, output.clone());
        let mut launch = request(&dir, Some(RunMode::Prod));
        launch.daemon = true;

        let report = launcher.launch(launch).unwrap();
        assert!(!report.daemonized);
        assert!(output.contains("warning: Daemon mode is not supported"));
        let (command, recorded) = launcher.runner.seen.borrow().clone().unwrap();
        assert_eq!(recorded, Some(process::current_pid()));
        assert!(!command.args.contains(&"--reload".to_string()));
        assert!(!dir.path().join("runtime/fa.pid").exists());
    }
}
