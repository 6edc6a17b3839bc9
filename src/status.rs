//! Reconciles the PID file with what the OS reports.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::paths::RuntimePaths;
use crate::port;
use crate::process::{self, Pid, ProcessSnapshot};

/// CPU usage above this marks a worker as busy.
pub const IDLE_CPU_THRESHOLD: f32 = 0.5;

/// How a running server was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedBy {
    PidFile,
    /// Port answers but no live PID file; started outside the launcher.
    Port,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Idle,
}

impl WorkerState {
    pub fn from_cpu(cpu_percent: f32) -> Self {
        if cpu_percent > IDLE_CPU_THRESHOLD {
            WorkerState::Running
        } else {
            WorkerState::Idle
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Running => "running",
            WorkerState::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatus {
    pub pid: Pid,
    pub state: WorkerState,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub uptime: Duration,
    /// Always zero; the backend does not expose per-worker counters.
    pub requests_handled: u64,
}

impl From<ProcessSnapshot> for WorkerStatus {
    fn from(snapshot: ProcessSnapshot) -> Self {
        Self {
            pid: snapshot.pid,
            state: WorkerState::from_cpu(snapshot.cpu_percent),
            cpu_percent: snapshot.cpu_percent,
            memory_mb: snapshot.memory_mb,
            uptime: snapshot.uptime,
            requests_handled: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunningServer {
    pub detected_by: DetectedBy,
    pub pid: Option<Pid>,
    pub process: Option<ProcessSnapshot>,
    pub workers: Vec<WorkerStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    pub running: Option<RunningServer>,
    pub url: String,
    pub pid_file: PathBuf,
    /// PID recorded in a file whose process is gone.
    pub stale_pid: Option<Pid>,
    pub env_name: Option<String>,
}

impl StatusView {
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

pub fn status(config: &Config, verbose: bool) -> StatusView {
    let paths = RuntimePaths::for_config(config);
    let pid_file = paths.pid_file();
    let recorded = process::read_pid(&pid_file);

    let mut view = StatusView {
        running: None,
        url: config.url(),
        pid_file,
        stale_pid: None,
        env_name: config.env_name.clone(),
    };

    match recorded {
        Some(pid) if process::is_live(pid) => {
            view.running = Some(running(DetectedBy::PidFile, Some(pid), verbose));
            return view;
        }
        Some(pid) => {
            debug!(pid, "PID file is stale");
            view.stale_pid = Some(pid);
        }
        None => {}
    }

    if port::is_in_use(config.port, &config.host) {
        let owner = port::info(config.port).pid;
        debug!(port = config.port, pid = ?owner, "server detected via port");
        view.running = Some(running(DetectedBy::Port, owner, verbose));
    }
    view
}

fn running(detected_by: DetectedBy, pid: Option<Pid>, verbose: bool) -> RunningServer {
    let process = pid.and_then(process::snapshot);
    let workers = match pid {
        Some(pid) if verbose => worker_statuses(pid),
        _ => Vec::new(),
    };
    RunningServer {
        detected_by,
        pid,
        process,
        workers,
    }
}

/// Every live descendant of `pid`, sampled together.
pub fn worker_statuses(pid: Pid) -> Vec<WorkerStatus> {
    let children = process::descendants(pid);
    process::sample(&children)
        .into_iter()
        .map(WorkerStatus::from)
        .collect()
}
