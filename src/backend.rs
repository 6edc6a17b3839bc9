//! Translation of the effective configuration into a backend command line.

use std::path::PathBuf;

use crate::app_path::ImportPath;
use crate::config::{Config, RunMode, ServerBackend};
use crate::paths::{LogKind, RuntimePaths};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub backend: ServerBackend,
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
}

impl BackendCommand {
    /// Shell-quoted form for display.
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

/// `log_files` is set when running detached so the alternate backend writes
/// its own access and error logs.
pub fn build_command(
    config: &Config,
    app: &ImportPath,
    log_files: Option<&RuntimePaths>,
) -> BackendCommand {
    let args = match config.server {
        ServerBackend::Uvicorn => uvicorn_args(config, app),
        ServerBackend::Gunicorn => gunicorn_args(config, app, log_files),
    };
    BackendCommand {
        backend: config.server,
        program: config.server.executable().to_string(),
        args,
        work_dir: config.app_dir.clone(),
    }
}

fn uvicorn_args(config: &Config, app: &ImportPath) -> Vec<String> {
    let mut args = vec![
        app.to_string(),
        "--host".into(),
        config.host.clone(),
        "--port".into(),
        config.port.to_string(),
        "--log-level".into(),
        config.log_level.clone(),
    ];
    if !config.access_log {
        args.push("--no-access-log".into());
    }
    match config.mode {
        RunMode::Dev => {
            if config.reload {
                args.push("--reload".into());
                for dir in &config.reload_dirs {
                    args.push("--reload-dir".into());
                    args.push(dir.clone());
                }
            }
        }
        RunMode::Prod => {
            if config.workers > 1 {
                args.push("--workers".into());
                args.push(config.workers.to_string());
            }
        }
    }
    if config.timeout_graceful_shutdown > 0 {
        args.push("--timeout-graceful-shutdown".into());
        args.push(config.timeout_graceful_shutdown.to_string());
    }
    args
}

fn gunicorn_args(config: &Config, app: &ImportPath, log_files: Option<&RuntimePaths>) -> Vec<String> {
    let bind = if config.host.contains(':') {
        format!("[{}]:{}", config.host, config.port)
    } else {
        format!("{}:{}", config.host, config.port)
    };
    let mut args = vec![
        app.to_string(),
        "--bind".into(),
        bind,
        "--worker-class".into(),
        config.worker_class.clone(),
        "--log-level".into(),
        config.log_level.clone(),
    ];
    match config.mode {
        RunMode::Dev => {
            if config.reload {
                args.push("--reload".into());
            }
        }
        RunMode::Prod => {
            if config.workers > 1 {
                args.push("--workers".into());
                args.push(config.workers.to_string());
            }
        }
    }
    if config.access_log {
        let target = log_files
            .map(|paths| paths.log_file(LogKind::Access).display().to_string())
            .unwrap_or_else(|| "-".into());
        args.push("--access-logfile".into());
        args.push(target);
    }
    if let Some(paths) = log_files {
        args.push("--error-logfile".into());
        args.push(paths.log_file(LogKind::Error).display().to_string());
    }
    if config.timeout_graceful_shutdown > 0 {
        args.push("--graceful-timeout".into());
        args.push(config.timeout_graceful_shutdown.to_string());
    }
    if config.max_requests > 0 {
        args.push("--max-requests".into());
        args.push(config.max_requests.to_string());
        if config.max_requests_jitter > 0 {
            args.push("--max-requests-jitter".into());
            args.push(config.max_requests_jitter.to_string());
        }
    }
    args
}
