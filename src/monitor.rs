//! `fa monitor`: periodically refreshed status.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::warn;

use crate::status::StatusView;
use crate::tui::{self, MonitorFrame, TuiTerminal};
use crate::ui::format_uptime;

pub const MIN_REFRESH: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub refresh: Duration,
    pub tui: bool,
}

/// Runs until the operator quits. `fetch` is called once per refresh.
pub fn run<F>(options: MonitorOptions, fetch: F) -> Result<()>
where
    F: FnMut() -> StatusView,
{
    let refresh = options.refresh.max(MIN_REFRESH);
    if options.tui {
        match tui::init_terminal() {
            Ok(terminal) => return run_tui(terminal, refresh, fetch),
            Err(err) => warn!(error = %err, "terminal UI unavailable, using line output"),
        }
    }
    run_lines(refresh, fetch)
}

fn run_tui<F>(mut terminal: TuiTerminal, refresh: Duration, mut fetch: F) -> Result<()>
where
    F: FnMut() -> StatusView,
{
    let result = (|| -> Result<()> {
        loop {
            let view = fetch();
            let frame = MonitorFrame {
                view: &view,
                refreshed_at: Local::now(),
                refresh_secs: refresh.as_secs_f64(),
            };
            tui::draw(&mut terminal, &frame).context("failed to draw monitor")?;
            if wait_for_quit(refresh)? {
                return Ok(());
            }
        }
    })();
    tui::restore_terminal(terminal).context("failed to restore terminal")?;
    result
}

// Waits out one refresh interval; true if a quit key arrived.
fn wait_for_quit(refresh: Duration) -> Result<bool> {
    let deadline = Instant::now() + refresh;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        if !event::poll(remaining).context("failed to poll terminal events")? {
            return Ok(false);
        }
        if let Event::Key(key) = event::read().context("failed to read terminal event")? {
            if is_quit(&key) {
                return Ok(true);
            }
        }
    }
}

pub fn is_quit(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn run_lines<F>(refresh: Duration, mut fetch: F) -> Result<()>
where
    F: FnMut() -> StatusView,
{
    loop {
        let view = fetch();
        for line in render_lines(&view, Local::now()) {
            println!("{line}");
        }
        thread::sleep(refresh);
    }
}

/// Plain-text rendering used without the full-screen UI.
pub fn render_lines(view: &StatusView, now: DateTime<Local>) -> Vec<String> {
    let stamp = now.format("%H:%M:%S");
    let Some(running) = &view.running else {
        return vec![format!("[{stamp}] ○ stopped  {}", view.url)];
    };
    let pid = running
        .pid
        .map_or_else(|| "?".to_string(), |pid| pid.to_string());
    let mut head = format!("[{stamp}] ● running  pid {pid}  {}", view.url);
    if let Some(process) = &running.process {
        head.push_str(&format!(
            "  up {}  {:.1} MB  {:.1}% cpu",
            format_uptime(process.uptime),
            process.memory_mb,
            process.cpu_percent
        ));
    }
    head.push_str(&format!("  workers {}", running.workers.len()));

    let mut lines = vec![head];
    lines.extend(running.workers.iter().map(|worker| {
        format!(
            "    {:>7}  {:<7}  {:>5.1}%  {:>8.1} MB  {}",
            worker.pid,
            worker.state.as_str(),
            worker.cpu_percent,
            worker.memory_mb,
            format_uptime(worker.uptime)
        )
    }));
    lines
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::TimeZone;

    use super::*;
    use crate::status::{DetectedBy, RunningServer, WorkerState, WorkerStatus};

    fn at_noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn stopped_line() {
        let view = StatusView {
            running: None,
            url: "http://127.0.0.1:8000".into(),
            pid_file: PathBuf::from("runtime/fa.pid"),
            stale_pid: None,
            env_name: None,
        };
        assert_eq!(
            render_lines(&view, at_noon()),
            vec!["[12:00:00] ○ stopped  http://127.0.0.1:8000"]
        );
    }

    #[test]
    fn running_lines_include_workers() {
        let view = StatusView {
            running: Some(RunningServer {
                detected_by: DetectedBy::Port,
                pid: None,
                process: None,
                workers: vec![WorkerStatus {
                    pid: 77,
                    state: WorkerState::Idle,
                    cpu_percent: 0.0,
                    memory_mb: 10.0,
                    uptime: Duration::from_secs(5),
                    requests_handled: 0,
                }],
            }),
            url: "http://0.0.0.0:9000".into(),
            pid_file: PathBuf::from("runtime/fa.pid"),
            stale_pid: None,
            env_name: None,
        };
        let lines = render_lines(&view, at_noon());
        assert_eq!(lines[0], "[12:00:00] ● running  pid ?  http://0.0.0.0:9000  workers 1");
        assert!(lines[1].contains("77"));
        assert!(lines[1].contains("idle"));
        assert!(lines[1].ends_with("5s"));
    }

    #[test]
    fn quit_keys() {
        assert!(is_quit(&KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit(&KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE)));
    }
}
