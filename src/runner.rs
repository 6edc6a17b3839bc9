//! Backend execution.
//!
//! The backend runs as a child of the launcher in its own process group.
//! SIGTERM/SIGINT received by the launcher become a graceful stop of that
//! group; SIGHUP is passed through so the backend can reload its workers.

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::backend::BackendCommand;
use crate::launcher::LaunchError;
use crate::process::ProcessSignal;

/// Termination and reload signals delivered to the launcher.
pub struct ControlSignals {
    source: SignalSource,
}

enum SignalSource {
    #[cfg(unix)]
    Unix {
        terminate: tokio::signal::unix::Signal,
        interrupt: tokio::signal::unix::Signal,
        hangup: tokio::signal::unix::Signal,
    },
    #[cfg(not(unix))]
    CtrlC,
    Disabled,
}

impl ControlSignals {
    /// Registers the handlers. Must be called inside a tokio runtime.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            source: SignalSource::Unix {
                terminate: signal(SignalKind::terminate())?,
                interrupt: signal(SignalKind::interrupt())?,
                hangup: signal(SignalKind::hangup())?,
            },
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            source: SignalSource::CtrlC,
        })
    }

    /// Never fires.
    pub fn disabled() -> Self {
        Self {
            source: SignalSource::Disabled,
        }
    }

    pub async fn recv(&mut self) -> ProcessSignal {
        match &mut self.source {
            #[cfg(unix)]
            SignalSource::Unix {
                terminate,
                interrupt,
                hangup,
            } => {
                tokio::select! {
                    Some(()) = terminate.recv() => ProcessSignal::Terminate,
                    Some(()) = interrupt.recv() => ProcessSignal::Interrupt,
                    Some(()) = hangup.recv() => ProcessSignal::Hangup,
                    else => std::future::pending().await,
                }
            }
            #[cfg(not(unix))]
            SignalSource::CtrlC => match tokio::signal::ctrl_c().await {
                Ok(()) => ProcessSignal::Interrupt,
                Err(_) => std::future::pending().await,
            },
            SignalSource::Disabled => std::future::pending().await,
        }
    }
}

pub struct ServeRequest<'a> {
    pub command: &'a BackendCommand,
    /// Time the backend gets to exit after SIGTERM before it is killed.
    pub grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The backend exited successfully on its own.
    Exited,
    /// The launcher was asked to stop and brought the backend down.
    Stopped(ProcessSignal),
}

pub trait ServerRunner {
    /// Runs the backend until it exits or a stop signal arrives.
    fn serve(
        &self,
        request: ServeRequest<'_>,
        signals: ControlSignals,
    ) -> impl Future<Output = Result<ServeOutcome, LaunchError>>;
}

/// Spawns the backend as a real child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

enum Wake {
    Exited(io::Result<ExitStatus>),
    Signal(ProcessSignal),
}

impl ServerRunner for ProcessRunner {
    async fn serve(
        &self,
        request: ServeRequest<'_>,
        mut signals: ControlSignals,
    ) -> Result<ServeOutcome, LaunchError> {
        let spec = request.command;
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            backend: spec.backend,
            source,
        })?;
        let pid = child.id().unwrap_or(0);
        info!(pid, backend = %spec.backend, "backend started");

        loop {
            let wake = tokio::select! {
                status = child.wait() => Wake::Exited(status),
                signal = signals.recv() => Wake::Signal(signal),
            };
            match wake {
                Wake::Exited(status) => {
                    let status = status.map_err(|source| LaunchError::Spawn {
                        backend: spec.backend,
                        source,
                    })?;
                    info!(pid, %status, "backend exited");
                    return if status.success() {
                        Ok(ServeOutcome::Exited)
                    } else {
                        Err(LaunchError::BackendExited {
                            backend: spec.backend,
                            status: status.to_string(),
                        })
                    };
                }
                Wake::Signal(ProcessSignal::Hangup) => {
                    info!(pid, "forwarding SIGHUP to backend");
                    send_group_signal(pid, ProcessSignal::Hangup);
                }
                Wake::Signal(signal) => {
                    info!(pid, signal = signal.label(), "stopping backend");
                    stop_child(&mut child, pid, request.grace).await;
                    return Ok(ServeOutcome::Stopped(signal));
                }
            }
        }
    }
}

async fn stop_child(child: &mut Child, pid: u32, grace: Duration) {
    send_group_signal(pid, ProcessSignal::Terminate);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(pid, %status, "backend stopped");
            return;
        }
        Ok(Err(err)) => warn!(pid, error = %err, "waiting for backend failed"),
        Err(_) => warn!(pid, grace_secs = grace.as_secs(), "backend ignored SIGTERM, killing"),
    }
    send_group_signal(pid, ProcessSignal::Kill);
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(unix)]
fn send_group_signal(pid: u32, signal: ProcessSignal) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if pid <= 0 {
        return;
    }
    // SAFETY: kill(2) with a negative pid signals the process group we
    // created for the child in pre_exec.
    unsafe {
        let _ = libc::kill(-pid, signal.raw());
        let _ = libc::kill(pid, signal.raw());
    }
}

#[cfg(not(unix))]
fn send_group_signal(pid: u32, signal: ProcessSignal) {
    if signal != ProcessSignal::Hangup {
        crate::process::send_signal(pid as crate::process::Pid, signal);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::time::Instant;

    use super::*;
    use crate::config::ServerBackend;

    fn sh(script: &str) -> BackendCommand {
        BackendCommand {
            backend: ServerBackend::Uvicorn,
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            work_dir: PathBuf::from("/"),
        }
    }

    fn request(command: &BackendCommand) -> ServeRequest<'_> {
        ServeRequest {
            command,
            grace: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn clean_exit_is_success() {
        let command = sh("exit 0");
        let outcome = ProcessRunner
            .serve(request(&command), ControlSignals::disabled())
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::Exited);
    }

    #[tokio::test]
    async fn failing_backend_is_an_error() {
        let command = sh("exit 3");
        let err = ProcessRunner
            .serve(request(&command), ControlSignals::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::BackendExited { .. }));
        assert!(err.to_string().contains("uvicorn exited"));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let command = BackendCommand {
            program: "fa-test-no-such-binary".into(),
            ..sh("")
        };
        let err = ProcessRunner
            .serve(request(&command), ControlSignals::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[tokio::test]
    async fn stop_signal_escalates_to_kill() {
        let command = sh("trap '' TERM; exec sleep 30");
        let signals = ControlSignals::install().unwrap();
        let serve = ProcessRunner.serve(request(&command), signals);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            // SAFETY: signals this test process, whose handlers are installed above.
            unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
            std::future::pending::<()>().await
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            outcome = serve => outcome.unwrap(),
            _ = trigger => unreachable!(),
        };
        assert_eq!(outcome, ServeOutcome::Stopped(ProcessSignal::Terminate));
        assert!(started.elapsed() >= Duration::from_millis(800));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
