//! Detaching the launcher from its terminal.
//!
//! Must run before any tokio runtime exists: `fork()` only carries the
//! calling thread into the child.

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub pid_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// What the surviving process is after [`Daemonizer::daemonize`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// Running as the detached grandchild; the PID file has been written.
    Daemon,
    /// Still attached to the terminal; nothing was written.
    Foreground,
}

pub trait Daemonizer {
    fn daemonize(&self, options: &DaemonOptions) -> Result<Detached>;

    fn is_supported(&self) -> bool;
}

pub fn platform_daemonizer() -> Box<dyn Daemonizer> {
    #[cfg(unix)]
    {
        Box::new(DoubleFork)
    }
    #[cfg(not(unix))]
    {
        Box::new(Foreground)
    }
}

/// Stays in the foreground and says so.
#[derive(Debug, Clone, Copy, Default)]
pub struct Foreground;

impl Daemonizer for Foreground {
    fn daemonize(&self, _options: &DaemonOptions) -> Result<Detached> {
        warn!("daemon mode is not supported on this platform, running in the foreground");
        Ok(Detached::Foreground)
    }

    fn is_supported(&self) -> bool {
        false
    }
}

#[cfg(unix)]
pub use unix::DoubleFork;

#[cfg(unix)]
mod unix {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Write};
    use std::os::fd::AsRawFd;
    use std::path::Path;

    use anyhow::{Context, Result};

    use super::{DaemonOptions, Daemonizer, Detached};
    use crate::process;

    const DAEMON_UMASK: libc::mode_t = 0o022;

    /// Classic fork, setsid, fork. Only the grandchild returns.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct DoubleFork;

    impl Daemonizer for DoubleFork {
        fn daemonize(&self, options: &DaemonOptions) -> Result<Detached> {
            let _ = io::stdout().flush();
            let _ = io::stderr().flush();

            fork_and_exit_parent("first");
            // SAFETY: setsid has no preconditions; we are a fresh fork child.
            if unsafe { libc::setsid() } == -1 {
                eprintln!("setsid failed: {}", io::Error::last_os_error());
                std::process::exit(1);
            }
            // SAFETY: umask only swaps the process file-creation mask.
            unsafe { libc::umask(DAEMON_UMASK) };
            fork_and_exit_parent("second");

            let work_dir = options.work_dir.as_deref().unwrap_or(Path::new("/"));
            std::env::set_current_dir(work_dir)
                .with_context(|| format!("failed to change directory to {}", work_dir.display()))?;

            redirect_streams(options.log_file.as_deref())?;

            if let Some(pid_file) = &options.pid_file {
                process::write_pid(pid_file, None)
                    .with_context(|| format!("failed to write PID file {}", pid_file.display()))?;
            }
            Ok(Detached::Daemon)
        }

        fn is_supported(&self) -> bool {
            true
        }
    }

    // A failed fork leaves nothing half-detached: the invocation ends here.
    fn fork_and_exit_parent(stage: &str) {
        // SAFETY: the launcher is single-threaded at this point, so the child
        // inherits a consistent address space.
        match unsafe { libc::fork() } {
            -1 => {
                eprintln!("{stage} fork failed: {}", io::Error::last_os_error());
                std::process::exit(1);
            }
            0 => {}
            _ => std::process::exit(0),
        }
    }

    fn redirect_streams(log_file: Option<&Path>) -> Result<()> {
        let null = File::open("/dev/null").context("failed to open /dev/null")?;
        dup_onto(&null, libc::STDIN_FILENO)?;

        let output = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create log directory {}", parent.display())
                    })?;
                }
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open log file {}", path.display()))?
            }
            None => OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .context("failed to open /dev/null")?,
        };
        dup_onto(&output, libc::STDOUT_FILENO)?;
        dup_onto(&output, libc::STDERR_FILENO)?;
        Ok(())
    }

    fn dup_onto(file: &File, target: libc::c_int) -> Result<()> {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(file.as_raw_fd(), target) } == -1 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("failed to redirect descriptor {target}"));
        }
        Ok(())
    }
}
