//! Log files under the runtime directory.
//!
//! Provides bounded tailing through a ring buffer, live following, numbered
//! size-based rotation, and cleanup.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use strip_ansi_escapes::strip;
use tracing::{debug, info, warn};

use crate::paths::{LogKind, RuntimePaths};
use crate::process::POLL_INTERVAL;

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BACKUP_COUNT: usize = 5;

/// A fixed-capacity ring buffer of lines.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(1024)),
        }
    }

    /// Returns `true` if an old line was dropped to make room.
    pub fn push(&mut self, line: String) -> bool {
        let mut dropped = false;
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            dropped = true;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Removes ANSI escape codes; invalid UTF-8 is replaced.
pub fn sanitize_text(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

/// Last `lines` lines of `path`, read in one pass.
pub fn tail_lines(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    if lines == 0 {
        return Ok(Vec::new());
    }
    let mut buffer = LogBuffer::new(lines);
    for line in BufReader::new(file).lines() {
        buffer.push(line?);
    }
    Ok(buffer.into_lines())
}

/// Emits the last `initial` lines, then every line appended afterwards,
/// until `on_line` breaks. A truncated or replaced file is re-read from
/// the start.
pub fn follow<F>(path: &Path, initial: usize, mut on_line: F) -> Result<()>
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
    );
    let mut backlog = LogBuffer::new(initial);
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 || !line.ends_with('\n') {
            break;
        }
        backlog.push(line.trim_end_matches(['\r', '\n']).to_string());
    }
    for existing in backlog.into_lines() {
        if on_line(&existing).is_break() {
            return Ok(());
        }
    }
    // Any partial trailing line stays in `line` until its newline arrives.
    let mut position = reader.stream_position()?;

    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        notify::Config::default(),
    )
    .context("failed to create file watcher")?;
    let watch_target = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(path);
    if let Err(err) = watcher.watch(watch_target, RecursiveMode::NonRecursive) {
        debug!(path = %watch_target.display(), error = %err, "watch failed, polling only");
    }

    loop {
        if let Err(RecvTimeoutError::Disconnected) = rx.recv_timeout(POLL_INTERVAL) {
            thread::sleep(POLL_INTERVAL);
        }

        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        if len < position {
            debug!(path = %path.display(), "log truncated or rotated, reopening");
            reader = BufReader::new(File::open(path)?);
            position = 0;
            line.clear();
        }

        loop {
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            position += read as u64;
            if !line.ends_with('\n') {
                break;
            }
            let complete = line.trim_end_matches(['\r', '\n']).to_string();
            line.clear();
            if on_line(&complete).is_break() {
                return Ok(());
            }
        }
        reader.seek(SeekFrom::Start(position))?;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub backup_count: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            backup_count: DEFAULT_BACKUP_COUNT,
        }
    }
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{index}"));
    path.with_file_name(name)
}

/// Shifts `path` into `path.1`, `path.1` into `path.2`, and so on, dropping
/// the oldest backup. Returns `Ok(false)` when the file is under the limit.
pub fn rotate_if_needed(path: &Path, policy: RotationPolicy) -> Result<bool> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err).context("failed to read log file metadata"),
    };
    if metadata.len() <= policy.max_bytes {
        return Ok(false);
    }

    if policy.backup_count == 0 {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        return Ok(true);
    }

    let oldest = backup_path(path, policy.backup_count);
    if oldest.exists() {
        fs::remove_file(&oldest)
            .with_context(|| format!("failed to remove {}", oldest.display()))?;
    }
    for index in (1..policy.backup_count).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            let to = backup_path(path, index + 1);
            fs::rename(&from, &to)
                .with_context(|| format!("failed to rotate {} to {}", from.display(), to.display()))?;
        }
    }
    let first = backup_path(path, 1);
    fs::rename(path, &first)
        .with_context(|| format!("failed to rotate log file to {}", first.display()))?;

    info!(
        log = %path.display(),
        size_mb = metadata.len() / (1024 * 1024),
        "rotated log file"
    );
    Ok(true)
}

/// Rotates every launcher log that has outgrown the policy.
pub fn rotate_logs(paths: &RuntimePaths, policy: RotationPolicy) -> usize {
    LogKind::ALL
        .iter()
        .filter(|kind| match rotate_if_needed(&paths.log_file(**kind), policy) {
            Ok(rotated) => rotated,
            Err(err) => {
                warn!(log = %kind, error = %err, "log rotation failed");
                false
            }
        })
        .count()
}

/// Deletes `*.log` files and their numbered backups. Returns how many.
pub fn clean_logs(paths: &RuntimePaths) -> Result<usize> {
    let dir = paths.logs_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err).with_context(|| format!("failed to list {}", dir.display())),
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !path.is_file() || !name.contains(".log") {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %path.display(), error = %err, "failed to delete log file"),
        }
    }
    Ok(removed)
}
