//! Read-only commands: they report on the server without changing it.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use anyhow::Result;

use super::{CommandStatus, Session};
use crate::access_log::{self, AccessFilter};
use crate::app_path::AppResolver;
use crate::checker;
use crate::cli::{EnvArg, HealthArgs, LogsArgs, MonitorArgs, StatusArgs};
use crate::config::{LogFormat, ResolveRequest};
use crate::health::{check_health, wait_for_healthy, HealthTarget};
use crate::logs;
use crate::monitor::{self, MonitorOptions};
use crate::paths::{LogKind, RuntimePaths};
use crate::port;
use crate::process;
use crate::status;
use crate::ui;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Always succeeds: a configuration that cannot be resolved is reported
/// in place of the status view.
pub fn status(session: &Session, args: &StatusArgs) -> CommandStatus {
    let Some(config) = session.load_config(&args.env) else {
        return CommandStatus::Success;
    };
    let view = status::status(&config, args.verbose);
    if let Some(pid) = view.stale_pid {
        session
            .output()
            .warning(&format!("Removing stale PID file (process {pid} is gone)"));
        process::remove_pid(&view.pid_file);
    }
    ui::print_status(&view);
    CommandStatus::Success
}

pub fn logs(session: &Session, args: &LogsArgs) -> Result<CommandStatus> {
    let kind = match args.log_type.parse::<LogKind>() {
        Ok(kind) => kind,
        Err(err) => {
            session.output().error(&err.to_string());
            session.output().info(&format!(
                "Available types: {}",
                LogKind::ALL.map(LogKind::as_str).join(", ")
            ));
            return Ok(CommandStatus::Failure);
        }
    };
    let Some(config) = session.load_config(&args.env) else {
        return Ok(CommandStatus::Failure);
    };
    let path = RuntimePaths::for_config(&config).log_file(kind);
    if !path.exists() {
        session
            .output()
            .warning(&format!("Log file not found: {}", path.display()));
        session
            .output()
            .hint("Logs are only written when the server runs as a daemon (fa start -d)");
        return Ok(CommandStatus::Success);
    }

    let render = |line: &str| {
        if kind != LogKind::Access {
            println!("{}", logs::sanitize_text(line));
            return;
        }
        match access_log::parse_entry(line, config.slow_request_threshold) {
            Some(entry) if !access_log::should_log_request(&entry.path, &config.exclude_paths) => {}
            Some(entry) if config.log_format == LogFormat::Json => {
                println!("{}", entry.render(LogFormat::Json));
            }
            Some(entry) => ui::print_access_entry(&entry),
            None => println!("{}", logs::sanitize_text(line)),
        }
    };

    if args.follow {
        session.output().info(&format!(
            "Following {} (Ctrl+C to stop)",
            path.display()
        ));
        logs::follow(&path, args.lines, |line| {
            render(line);
            ControlFlow::Continue(())
        })?;
        return Ok(CommandStatus::Success);
    }

    if kind == LogKind::Access {
        let entries = access_log::read_access_log(
            &path,
            args.lines,
            &config.exclude_paths,
            config.slow_request_threshold,
            &AccessFilter::default(),
        )?;
        for entry in &entries {
            match config.log_format {
                LogFormat::Json => println!("{}", entry.render(LogFormat::Json)),
                LogFormat::Pretty => ui::print_access_entry(entry),
            }
        }
        return Ok(CommandStatus::Success);
    }
    for line in logs::tail_lines(&path, args.lines)? {
        render(&line);
    }
    Ok(CommandStatus::Success)
}

pub fn health(session: &Session, args: &HealthArgs) -> CommandStatus {
    let Some(config) = session.load_config(&args.env) else {
        return CommandStatus::Failure;
    };
    let target = HealthTarget::new(
        args.host.clone().unwrap_or_else(|| config.host.clone()),
        args.port.unwrap_or(config.port),
        args.path.clone().unwrap_or_else(|| config.health_path.clone()),
    );
    let timeout = args
        .timeout
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(Duration::from_secs(config.health_timeout));
    if let Some(wait) = args.wait.and_then(|secs| Duration::try_from_secs_f64(secs).ok()) {
        session
            .output()
            .info(&format!("Waiting up to {:.0}s for {}", wait.as_secs_f64(), target.url()));
        wait_for_server(&target, wait);
    }
    let result = check_health(&target, timeout);
    ui::print_health(&target.url(), &result);
    if result.healthy {
        CommandStatus::Success
    } else {
        CommandStatus::Failure
    }
}

// Port first, so a server that is still booting costs no HTTP round-trips.
fn wait_for_server(target: &HealthTarget, wait: Duration) -> bool {
    let started = Instant::now();
    if !port::wait_until_in_use(target.port, &target.host, wait) {
        return false;
    }
    let remaining = wait.saturating_sub(started.elapsed());
    wait_for_healthy(target, remaining, HEALTH_POLL_INTERVAL)
}

/// Shows the effective configuration. Problems are reported but never
/// change the exit status.
pub fn config(session: &Session, args: &EnvArg) -> CommandStatus {
    let env_name = session.env_name(args.env.as_deref());
    let request = ResolveRequest::default().with_env_name(env_name.clone());
    match session.resolver().resolve(&request) {
        Ok(config) => {
            let title = match &env_name {
                Some(name) => format!("Configuration ({name})"),
                None => "Configuration".to_string(),
            };
            ui::print_config(&title, &config.summary());
        }
        Err(err) => session.report_config_error(&err),
    }
    CommandStatus::Success
}

pub fn check(session: &Session) -> CommandStatus {
    let report = checker::run_all(&session.resolver(), &AppResolver::default());
    ui::print_check_report(&report);
    if report.all_passed() {
        CommandStatus::Success
    } else {
        CommandStatus::Failure
    }
}

pub fn monitor(session: &Session, args: &MonitorArgs) -> Result<CommandStatus> {
    let Some(config) = session.load_config(&args.env) else {
        return Ok(CommandStatus::Failure);
    };
    let Ok(refresh) = Duration::try_from_secs_f64(args.refresh) else {
        session
            .output()
            .error(&format!("Invalid refresh interval: {}", args.refresh));
        return Ok(CommandStatus::Failure);
    };
    if !status::status(&config, false).is_running() {
        session
            .output()
            .warning("Server is not running; waiting for it to come up");
    }
    monitor::run(
        MonitorOptions {
            refresh,
            tui: !args.no_tui,
        },
        || status::status(&config, true),
    )?;
    Ok(CommandStatus::Success)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::commands::tests::session;

    fn logs_args(log_type: &str) -> LogsArgs {
        LogsArgs {
            lines: 10,
            follow: false,
            log_type: log_type.into(),
            env: EnvArg::default(),
        }
    }

    #[test]
    fn status_removes_stale_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("runtime").join("fa.pid");
        process::write_pid(&pid_file, Some(2_000_000_000)).unwrap();
        let (session, output) = session(&dir);

        assert_eq!(status(&session, &StatusArgs::default()), CommandStatus::Success);
        assert!(!pid_file.exists());
        assert!(output.contains("warning: Removing stale PID file"));
    }

    #[test]
    fn status_reports_invalid_config_and_succeeds() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.fastapi-launcher]\nport = 0\n",
        )
        .unwrap();
        let (session, output) = session(&dir);
        assert_eq!(status(&session, &StatusArgs::default()), CommandStatus::Success);
        assert!(output.contains("error: Invalid configuration"));
        assert!(output.contains("hint: port"));
    }

    #[test]
    fn config_reports_errors_but_succeeds() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.fastapi-launcher]\nworkers = 0\n",
        )
        .unwrap();
        let (session, output) = session(&dir);
        assert_eq!(config(&session, &EnvArg::default()), CommandStatus::Success);
        assert!(output.contains("error: Invalid configuration"));
    }

    #[test]
    fn unknown_log_type_lists_choices() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        let status = logs(&session, &logs_args("debug")).unwrap();
        assert_eq!(status, CommandStatus::Failure);
        assert!(output.contains("info: Available types: main, access, error"));
    }

    #[test]
    fn missing_log_file_is_a_warning() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        let status = logs(&session, &logs_args("main")).unwrap();
        assert_eq!(status, CommandStatus::Success);
        assert!(output.contains("warning: Log file not found"));
    }

    #[test]
    fn existing_log_file_is_printed() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("runtime").join("logs").join("fa.log");
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, "one\ntwo\n").unwrap();
        let (session, output) = session(&dir);
        let status = logs(&session, &logs_args("main")).unwrap();
        assert_eq!(status, CommandStatus::Success);
        assert!(!output.contains("warning"));
    }

    #[test]
    fn health_fails_when_nothing_listens() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        let args = HealthArgs {
            host: Some("127.0.0.1".into()),
            port: crate::port::find_free(41_000, 42_000),
            path: None,
            timeout: Some(0.5),
            wait: Some(0.3),
            env: EnvArg::default(),
        };
        assert_eq!(health(&session, &args), CommandStatus::Failure);
        assert!(output.contains("info: Waiting up to 0s"));
    }

    #[test]
    fn invalid_refresh_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (session, output) = session(&dir);
        let args = MonitorArgs {
            no_tui: true,
            refresh: -1.0,
            env: EnvArg::default(),
        };
        assert_eq!(monitor(&session, &args).unwrap(), CommandStatus::Failure);
        assert!(output.contains("Invalid refresh interval"));
    }
}
