//! Commands that start, stop or signal the server.

use std::time::Duration;

use tracing::{debug, warn};

use super::{CommandStatus, Session};
use crate::app_path::AppResolveError;
use crate::cli::{DevArgs, EnvArg, RestartArgs, RunArgs, StartArgs, StopArgs};
use crate::config::{ConfigLayer, ResolveRequest, RunMode, ServerBackend};
use crate::launcher::{ConfigInput, LaunchError, LaunchRequest};
use crate::paths::RuntimePaths;
use crate::port;
use crate::process::{self, Pid, ProcessSignal};
use crate::runner::ServeOutcome;
use crate::smart_mode::detect_environment;

const PORT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn dev(session: &Session, args: &DevArgs) -> CommandStatus {
    let env_name = session.env_name(args.env.env.as_deref());
    launch_resolved(session, args.layer(), RunMode::Dev, env_name)
}

pub fn start(session: &Session, args: &StartArgs) -> CommandStatus {
    let mut cli = args.layer();
    if let Some(server) = &args.server {
        match server.parse::<ServerBackend>() {
            Ok(backend) => cli.server = Some(backend),
            Err(_) => {
                session.output().error(&format!(
                    "Invalid server backend: {server}. Use 'uvicorn' or 'gunicorn'"
                ));
                return CommandStatus::Failure;
            }
        }
    }

    let env_name = session.env_name(args.env.env.as_deref());
    let request = ResolveRequest {
        cli,
        mode: Some(RunMode::Prod),
        env_name: env_name.clone(),
    };
    let config = match session.resolver().resolve(&request) {
        Ok(config) => config,
        Err(err) => {
            session.report_config_error(&err);
            return CommandStatus::Failure;
        }
    };

    if let Some(name) = &env_name {
        if let Err(err) = RuntimePaths::for_config(&config).write_env_name(name) {
            warn!(env = %name, error = %err, "could not record environment name");
        }
    }
    let daemon = args.daemon().unwrap_or(config.daemon);
    launch(
        session,
        LaunchRequest {
            config: ConfigInput::Ready(config),
            mode: Some(RunMode::Prod),
            daemon,
            show_summary: true,
        },
    )
}

pub fn stop(session: &Session, args: &StopArgs) -> CommandStatus {
    let Some(config) = session.load_config(&args.env) else {
        return CommandStatus::Failure;
    };
    let pid_file = RuntimePaths::for_config(&config).pid_file();
    let Some(pid) = process::read_pid(&pid_file) else {
        session
            .output()
            .warning("No PID file found. Server may not be running.");
        return CommandStatus::Failure;
    };
    if !process::is_live(pid) {
        session.output().warning(&format!(
            "Process {pid} is not running. Cleaning up stale PID file."
        ));
        process::remove_pid(&pid_file);
        return CommandStatus::Success;
    }

    if args.force {
        session.output().info(&format!("Force killing server (PID: {pid})..."));
    } else {
        session.output().info(&format!("Stopping server (PID: {pid})..."));
    }
    let timeout = seconds(args.timeout).unwrap_or(DEFAULT_STOP_TIMEOUT);
    if !stop_server(pid, args.force, timeout) {
        session.output().error(&format!("Failed to stop server (PID: {pid})"));
        return CommandStatus::Failure;
    }
    process::remove_pid(&pid_file);
    if !port::wait_until_free(config.port, PORT_RELEASE_TIMEOUT) {
        debug!(port = config.port, "port still busy after stop");
    }
    session.output().success("Server stopped successfully");
    CommandStatus::Success
}

pub fn restart(session: &Session, args: &RestartArgs) -> CommandStatus {
    let Some(config) = session.load_config(&args.env) else {
        return CommandStatus::Failure;
    };
    let pid_file = RuntimePaths::for_config(&config).pid_file();

    // A live recorded PID is taken to mean the server was daemonized.
    let mut was_daemon = false;
    if let Some(pid) = process::read_pid(&pid_file).filter(|pid| process::is_live(*pid)) {
        session.output().info("Stopping current server...");
        was_daemon = true;
        let timeout = seconds(args.timeout).unwrap_or(DEFAULT_STOP_TIMEOUT);
        if !stop_server(pid, false, timeout) {
            session.output().error("Failed to stop server");
            return CommandStatus::Failure;
        }
        process::remove_pid(&pid_file);
        port::wait_until_free(config.port, PORT_RELEASE_TIMEOUT);
        session.output().success("Server stopped");
    }

    session.output().info("Starting server...");
    launch(
        session,
        LaunchRequest {
            config: ConfigInput::Ready(config),
            mode: None,
            daemon: was_daemon,
            show_summary: true,
        },
    )
}

pub fn reload(session: &Session, args: &EnvArg) -> CommandStatus {
    if cfg!(not(unix)) {
        session
            .output()
            .error("Reload is not supported on this platform (it needs SIGHUP)");
        return CommandStatus::Failure;
    }
    let Some(config) = session.load_config(args) else {
        return CommandStatus::Failure;
    };
    let pid_file = RuntimePaths::for_config(&config).pid_file();
    let Some(pid) = process::read_pid(&pid_file) else {
        session
            .output()
            .error("No server is running (PID file not found)");
        return CommandStatus::Failure;
    };
    if !process::is_live(pid) {
        session
            .output()
            .error(&format!("Server process {pid} is not running"));
        process::remove_pid(&pid_file);
        return CommandStatus::Failure;
    }
    if process::send_signal(pid, ProcessSignal::Hangup) {
        session
            .output()
            .success(&format!("Reload triggered (sent SIGHUP to PID {pid})"));
        CommandStatus::Success
    } else {
        session.output().error("Failed to send SIGHUP");
        CommandStatus::Failure
    }
}

pub fn run(session: &Session, args: &RunArgs) -> CommandStatus {
    let detection = detect_environment(session.project_dir(), |key| session.env_var(key));
    session.output().info(&format!(
        "Detected environment: {} (mode: {}, from {})",
        detection.name, detection.mode, detection.source
    ));
    let env_name = detection.named_environment().map(str::to_string);
    launch_resolved(session, args.bind.layer(), detection.mode, env_name)
}

fn launch_resolved(
    session: &Session,
    cli: ConfigLayer,
    mode: RunMode,
    env_name: Option<String>,
) -> CommandStatus {
    launch(
        session,
        LaunchRequest {
            config: ConfigInput::Resolve {
                resolver: session.resolver(),
                request: ResolveRequest {
                    cli,
                    mode: Some(mode),
                    env_name,
                },
            },
            mode: Some(mode),
            daemon: false,
            show_summary: true,
        },
    )
}

fn launch(session: &Session, request: LaunchRequest) -> CommandStatus {
    match session.launcher().launch(request) {
        Ok(report) => {
            match report.outcome {
                ServeOutcome::Stopped(signal) => session
                    .output()
                    .info(&format!("Server stopped ({})", signal.label())),
                ServeOutcome::Exited => session.output().info("Server exited"),
            }
            CommandStatus::Success
        }
        Err(err) => {
            report_launch_error(session, &err);
            CommandStatus::Failure
        }
    }
}

fn report_launch_error(session: &Session, err: &LaunchError) {
    let output = session.output();
    match err {
        LaunchError::Config(err) => session.report_config_error(err),
        LaunchError::PortInUse { port, occupant, .. } => {
            output.error(&format!("Port {port} is already in use"));
            if let Some(owner) = occupant.describe_owner() {
                output.hint(&format!("Held by {owner}"));
            }
            if occupant.pid.is_some() {
                output.hint("Stop it with: fa stop --force");
            }
            output.hint(&format!(
                "Or use a different port: fa dev --port {}",
                port.saturating_add(1)
            ));
        }
        LaunchError::App(AppResolveError::NotFound { candidates, .. }) => {
            output.error("Could not find a FastAPI application");
            output.hint("Create main.py with 'app = FastAPI()'");
            output.hint("Or pass --app module:attr");
            if !candidates.is_empty() {
                output.hint(&format!("Files checked: {}", candidates.join(", ")));
            }
        }
        other => output.error(&other.to_string()),
    }
}

/// Graceful tree stop, or an immediate kill of every process in the tree.
pub fn stop_server(pid: Pid, force: bool, timeout: Duration) -> bool {
    let children = process::descendants(pid);
    if !force {
        return if children.is_empty() {
            process::terminate_graceful(pid, timeout)
        } else {
            process::terminate_tree(pid, timeout)
        };
    }
    for child in children {
        process::send_signal(child, ProcessSignal::Kill);
    }
    process::force_kill(pid)
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::cli::BindArgs;
    use crate::commands::tests::session;

    fn stop_args() -> StopArgs {
        StopArgs {
            force: false,
            timeout: 1.0,
            env: EnvArg::default(),
        }
    }

    #[test]
    fn invalid_server_fails_before_launch() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        let args = StartArgs {
            server: Some("invalid".into()),
            ..StartArgs::default()
        };
        assert_eq!(start(&session, &args), CommandStatus::Failure);
        assert!(output.contains("Invalid server backend: invalid"));
        assert!(!dir.path().join("runtime").exists());
    }

    #[test]
    fn stop_without_pid_file_fails() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        assert_eq!(stop(&session, &stop_args()), CommandStatus::Failure);
        assert!(output.contains("warning: No PID file found"));
    }

    #[test]
    fn stop_with_stale_pid_cleans_up() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("runtime").join("fa.pid");
        process::write_pid(&pid_file, Some(2_000_000_000)).unwrap();
        let (session, output) = session(&dir);

        assert_eq!(stop(&session, &stop_args()), CommandStatus::Success);
        assert!(!pid_file.exists());
        assert!(output.contains("warning: Process 2000000000 is not running"));
    }

    #[cfg(unix)]
    #[test]
    fn stop_terminates_live_server() {
        use std::process::Command;

        let dir = TempDir::new().unwrap();
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as Pid;
        let pid_file = dir.path().join("runtime").join("fa.pid");
        process::write_pid(&pid_file, Some(pid)).unwrap();
        // Reap concurrently so the child does not linger as a zombie.
        let reaper = std::thread::spawn(move || child.wait());

        let (session, output) = session(&dir);
        assert_eq!(stop(&session, &stop_args()), CommandStatus::Success);
        assert!(!pid_file.exists());
        assert!(output.contains("success: Server stopped successfully"));
        reaper.join().unwrap().unwrap();
    }

    #[test]
    fn reload_requires_running_server() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        assert_eq!(reload(&session, &EnvArg::default()), CommandStatus::Failure);
        if cfg!(unix) {
            assert!(output.contains("PID file not found"));
        }
    }

    #[test]
    fn dev_reports_missing_app() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        let args = DevArgs {
            bind: BindArgs {
                port: port::find_free(40_000, 41_000),
                ..BindArgs::default()
            },
            ..DevArgs::default()
        };
        assert_eq!(dev(&session, &args), CommandStatus::Failure);
        assert!(output.contains("error: Could not find a FastAPI application"));
        assert!(!dir.path().join("runtime").join("fa.pid").exists());
    }

    #[test]
    fn unknown_environment_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.fastapi-launcher.envs.staging]\nworkers = 2\n",
        )
        .unwrap();
        let (session, output) = session(&dir);
        let args = StopArgs {
            env: EnvArg {
                env: Some("qa".into()),
            },
            ..stop_args()
        };
        assert_eq!(stop(&session, &args), CommandStatus::Failure);
        assert!(output.contains("environment 'qa' not found (available: staging)"));
    }
}
