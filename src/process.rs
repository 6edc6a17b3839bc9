//! PID-file supervision and OS process control.
//!
//! Every lookup here tolerates the target vanishing mid-check: failures map
//! to "not running" or `false`, never to an error the caller must handle.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone};
use sysinfo::{ProcessRefreshKind, ProcessStatus as OsStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

pub type Pid = i32;

/// Interval between liveness polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long a force-killed process gets to disappear.
pub const FORCE_KILL_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Interrupt,
    Terminate,
    Kill,
    Hangup,
}

impl ProcessSignal {
    pub fn label(self) -> &'static str {
        match self {
            ProcessSignal::Interrupt => "SIGINT",
            ProcessSignal::Terminate => "SIGTERM",
            ProcessSignal::Kill => "SIGKILL",
            ProcessSignal::Hangup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    pub(crate) fn raw(self) -> libc::c_int {
        match self {
            ProcessSignal::Interrupt => libc::SIGINT,
            ProcessSignal::Terminate => libc::SIGTERM,
            ProcessSignal::Kill => libc::SIGKILL,
            ProcessSignal::Hangup => libc::SIGHUP,
        }
    }
}

pub fn current_pid() -> Pid {
    std::process::id() as Pid
}

/// Writes `pid` (default: this process) to `path`, creating parent
/// directories. Any previous content is overwritten.
pub fn write_pid(path: &Path, pid: Option<Pid>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let pid = pid.unwrap_or_else(current_pid);
    fs::write(path, pid.to_string())
}

/// Malformed or missing content reads as `None`.
pub fn read_pid(path: &Path) -> Option<Pid> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Returns whether a file was actually removed.
pub fn remove_pid(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %err, "could not remove pid file");
            }
            false
        }
    }
}

fn os_pid(pid: Pid) -> sysinfo::Pid {
    sysinfo::Pid::from_u32(pid as u32)
}

fn refresh_one(system: &mut System, pid: Pid) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[os_pid(pid)]),
        true,
        ProcessRefreshKind::everything(),
    );
}

/// Zombies count as gone; reaping them is the parent's job.
pub fn is_live(pid: Pid) -> bool {
    if pid <= 0 {
        return false;
    }
    let mut system = System::new();
    refresh_one(&mut system, pid);
    system
        .process(os_pid(pid))
        .is_some_and(|process| process.status() != OsStatus::Zombie)
}

/// Delivers `signal`; a missing process or denied permission yields `false`.
#[cfg(unix)]
pub fn send_signal(pid: Pid, signal: ProcessSignal) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(2) takes plain integers; pid > 0 targets a single process.
    let result = unsafe { libc::kill(pid, signal.raw()) };
    if result != 0 {
        debug!(pid, signal = signal.label(), error = %io::Error::last_os_error(), "signal not delivered");
    }
    result == 0
}

#[cfg(not(unix))]
pub fn send_signal(pid: Pid, signal: ProcessSignal) -> bool {
    if pid <= 0 || signal == ProcessSignal::Hangup {
        return false;
    }
    let mut system = System::new();
    refresh_one(&mut system, pid);
    system
        .process(os_pid(pid))
        .is_some_and(|process| process.kill())
}

/// Polls until `pid` is gone or `timeout` elapses.
pub fn wait_for_exit(pid: Pid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_live(pid) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// SIGTERM, wait up to `timeout`, then SIGKILL and wait [`FORCE_KILL_GRACE`].
/// Returns whether the process is confirmed gone.
pub fn terminate_graceful(pid: Pid, timeout: Duration) -> bool {
    if !is_live(pid) {
        return true;
    }
    send_signal(pid, ProcessSignal::Terminate);
    if wait_for_exit(pid, timeout) {
        return true;
    }
    warn!(pid, timeout_secs = timeout.as_secs_f64(), "process ignored SIGTERM, sending SIGKILL");
    send_signal(pid, ProcessSignal::Kill);
    wait_for_exit(pid, FORCE_KILL_GRACE)
}

pub fn force_kill(pid: Pid) -> bool {
    if !is_live(pid) {
        return true;
    }
    send_signal(pid, ProcessSignal::Kill);
    wait_for_exit(pid, FORCE_KILL_GRACE)
}

/// All live descendants of `pid`, parents before children.
pub fn descendants(pid: Pid) -> Vec<Pid> {
    if pid <= 0 {
        return Vec::new();
    }
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (child, process) in system.processes() {
        if process.status() == OsStatus::Zombie || process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32() as Pid)
                .or_default()
                .push(child.as_u32() as Pid);
        }
    }

    let mut found = Vec::new();
    let mut queue = vec![pid];
    while let Some(current) = queue.pop() {
        if let Some(kids) = children.get(&current) {
            for kid in kids {
                if *kid != pid && !found.contains(kid) {
                    found.push(*kid);
                    queue.push(*kid);
                }
            }
        }
    }
    found
}

/// Terminates descendants first, then `pid`, waits for all of them, and
/// force-kills whatever survives `timeout`.
pub fn terminate_tree(pid: Pid, timeout: Duration) -> bool {
    if !is_live(pid) {
        return true;
    }
    let mut targets = descendants(pid);
    for child in &targets {
        send_signal(*child, ProcessSignal::Terminate);
    }
    send_signal(pid, ProcessSignal::Terminate);
    targets.push(pid);

    let survivors = wait_all(&targets, timeout);
    if survivors.is_empty() {
        return true;
    }
    warn!(pid, survivors = ?survivors, "processes ignored SIGTERM, sending SIGKILL");
    for survivor in &survivors {
        send_signal(*survivor, ProcessSignal::Kill);
    }
    wait_all(&survivors, FORCE_KILL_GRACE).is_empty()
}

fn wait_all(pids: &[Pid], timeout: Duration) -> Vec<Pid> {
    let deadline = Instant::now() + timeout;
    let mut remaining = pids.to_vec();
    loop {
        remaining.retain(|pid| is_live(*pid));
        let now = Instant::now();
        if remaining.is_empty() || now >= deadline {
            return remaining;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Point-in-time metrics for one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: Pid,
    pub name: String,
    pub command: String,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub started_at: Option<DateTime<Local>>,
    pub uptime: Duration,
}

/// Samples CPU usage across a short window, so this blocks for roughly
/// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`]. Missing or zombie processes are
/// left out of the result.
pub fn sample(pids: &[Pid]) -> Vec<ProcessSnapshot> {
    let targets: Vec<sysinfo::Pid> = pids
        .iter()
        .filter(|pid| **pid > 0)
        .map(|pid| os_pid(*pid))
        .collect();
    if targets.is_empty() {
        return Vec::new();
    }
    let mut system = System::new();
    let refresh = |system: &mut System| {
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&targets),
            true,
            ProcessRefreshKind::everything(),
        );
    };
    refresh(&mut system);
    thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(POLL_INTERVAL));
    refresh(&mut system);

    targets
        .iter()
        .filter_map(|target| {
            let process = system.process(*target)?;
            if process.status() == OsStatus::Zombie {
                return None;
            }
            let command = process
                .cmd()
                .iter()
                .map(|part| part.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            Some(ProcessSnapshot {
                pid: target.as_u32() as Pid,
                name: process.name().to_string_lossy().into_owned(),
                command,
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
                started_at: Local.timestamp_opt(process.start_time() as i64, 0).single(),
                uptime: Duration::from_secs(process.run_time()),
            })
        })
        .collect()
}

pub fn snapshot(pid: Pid) -> Option<ProcessSnapshot> {
    sample(&[pid]).into_iter().next()
}
