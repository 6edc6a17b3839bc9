//! Operator-facing terminal output.
//!
//! Everything here writes to stdout/stderr for a human; diagnostics go
//! through `tracing` instead. Colour is dropped automatically when the
//! stream is not a terminal.

use std::time::Duration;

use anyhow::{Context, Result};
use dialoguer::console::{measure_text_width, style, StyledObject};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;

use crate::access_log::AccessLogEntry;
use crate::checker::CheckReport;
use crate::config::RunMode;
use crate::health::HealthCheckResult;
use crate::launcher::{OutputSink, StartupSummary};
use crate::status::{DetectedBy, StatusView, WorkerState, WorkerStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct Console;

impl OutputSink for Console {
    fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    fn success(&self, message: &str) {
        println!("{} {}", style("✓").green().bold(), message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
    }

    fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), style(message).red());
    }

    fn hint(&self, message: &str) {
        eprintln!("    {} {}", style("→").dim(), style(message).dim());
    }

    fn startup_summary(&self, summary: &StartupSummary) {
        let mode = match summary.mode {
            RunMode::Dev => style("Development").cyan(),
            RunMode::Prod => style("Production").yellow(),
        };
        let app = if summary.discovered {
            format!("{} (auto-discovered)", summary.app)
        } else {
            summary.app.clone()
        };
        let mut rows = vec![
            ("Mode", mode.to_string()),
            ("App", style(app).cyan().to_string()),
            ("URL", style(&summary.url).green().bold().to_string()),
            ("Server", summary.server.to_string()),
            ("PID", summary.pid.to_string()),
        ];
        if let Some(env) = &summary.env_name {
            rows.push(("Environment", env.clone()));
        }
        if summary.reload {
            rows.push(("Reload", style("enabled").green().to_string()));
        }
        if summary.mode == RunMode::Prod {
            rows.push(("Workers", summary.workers.to_string()));
        }
        rows.push(("Started", summary.started_at.format("%Y-%m-%d %H:%M:%S").to_string()));

        println!();
        println!("{}", style("Starting server").bold().cyan());
        print_rows(&rows);
        println!("  {}", style(&summary.command).dim());
        println!();
    }
}

/// Yes/no prompt on the terminal, defaulting to no.
pub fn confirm(prompt: &str) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("failed to read confirmation")
}

fn print_rows(rows: &[(&str, String)]) {
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in rows {
        println!("  {}  {}", style(format!("{label:<width$}")).dim(), value);
    }
}

fn heading(title: &str) {
    println!("{}", style(title).bold().cyan());
}

pub fn print_config(title: &str, rows: &[(&'static str, String)]) {
    heading(title);
    print_rows(rows);
}

pub fn print_status(view: &StatusView) {
    heading("Server Status");
    let Some(running) = &view.running else {
        print_rows(&[
            ("Status", style("○ Stopped").red().dim().to_string()),
            ("PID file", view.pid_file.display().to_string()),
        ]);
        return;
    };

    let mut rows = vec![("Status", style("● Running").green().bold().to_string())];
    rows.push((
        "PID",
        running.pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string()),
    ));
    rows.push(("URL", view.url.clone()));
    if running.detected_by == DetectedBy::Port {
        rows.push(("Source", "port probe (no PID file)".to_string()));
    }
    if let Some(env) = &view.env_name {
        rows.push(("Environment", env.clone()));
    }
    if let Some(process) = &running.process {
        rows.push(("Uptime", format_uptime(process.uptime)));
        rows.push(("Memory", format!("{:.1} MB", process.memory_mb)));
        rows.push(("CPU", format!("{:.1}%", process.cpu_percent)));
    }
    if !running.workers.is_empty() {
        rows.push(("Workers", running.workers.len().to_string()));
    }
    print_rows(&rows);

    if !running.workers.is_empty() {
        println!();
        print_workers(&running.workers);
    }
}

pub fn print_workers(workers: &[WorkerStatus]) {
    if workers.is_empty() {
        println!("{}", style("No worker processes found").dim());
        return;
    }
    heading("Worker Status");
    let header = ["PID", "Status", "CPU %", "Memory", "Uptime"];
    let rows: Vec<[String; 5]> = workers
        .iter()
        .map(|worker| {
            [
                worker.pid.to_string(),
                worker_state(worker.state).to_string(),
                format!("{:.1}%", worker.cpu_percent),
                format!("{:.1} MB", worker.memory_mb),
                format_uptime(worker.uptime),
            ]
        })
        .collect();
    print_table(&header, &rows);
}

fn worker_state(state: WorkerState) -> StyledObject<String> {
    match state {
        WorkerState::Running => style(format!("● {}", state.as_str())).green(),
        WorkerState::Idle => style(format!("○ {}", state.as_str())).dim(),
    }
}

fn print_table<const N: usize>(header: &[&str; N], rows: &[[String; N]]) {
    let mut widths = header.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(measure_text_width(cell));
        }
    }
    let line = |cells: Vec<String>| cells.join("  ");
    println!(
        "  {}",
        style(line(header.iter().zip(widths).map(|(h, w)| format!("{h:<w$}")).collect())).bold()
    );
    for row in rows {
        let cells = row
            .iter()
            .zip(widths)
            .map(|(cell, w)| pad(cell, w))
            .collect();
        println!("  {}", line(cells));
    }
}

// Pads by visible width so styled cells line up.
fn pad(cell: &str, width: usize) -> String {
    let visible = measure_text_width(cell);
    format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
}

pub fn print_check_report(report: &CheckReport) {
    println!();
    heading("Check Results");
    println!();
    let console = Console;
    for result in &report.results {
        let line = format!("{}: {}", result.name, result.message);
        if result.passed {
            console.success(&line);
        } else {
            console.error(&line);
            for suggestion in &result.suggestions {
                console.hint(suggestion);
            }
        }
    }
    println!();
    if report.all_passed() {
        console.success(&format!("All {} checks passed!", report.passed_count()));
    } else {
        console.warning(&format!(
            "{} passed, {} failed",
            report.passed_count(),
            report.failed_count()
        ));
    }
}

pub fn print_health(url: &str, result: &HealthCheckResult) {
    if result.healthy {
        let time = result
            .response_time_ms
            .map(|ms| format!(" ({ms:.0}ms)"))
            .unwrap_or_default();
        println!("{} {url}{time}", style("● Healthy").green().bold());
        if let Some(body) = &result.body {
            println!("  {}", style(body).dim());
        }
        return;
    }
    let reason = match (&result.failure, result.status_code) {
        (Some(failure), _) => failure.to_string(),
        (None, Some(code)) => format!("HTTP {code}"),
        (None, None) => "no response".to_string(),
    };
    println!("{} {url} ({reason})", style("○ Unhealthy").red().bold());
}

pub fn print_access_entry(entry: &AccessLogEntry) {
    let method = method_style(&entry.method);
    let status = status_style(entry.status_code);
    let time = format!("{:.3}s", entry.response_time);
    let time = if entry.is_slow {
        style(time).red()
    } else {
        style(time).dim()
    };
    let slow = if entry.is_slow {
        format!(" {}", style("[SLOW]").red().bold())
    } else {
        String::new()
    };
    println!(
        "{} {} {:40} {} {}{}",
        style(entry.timestamp.format("%H:%M:%S")).dim(),
        method,
        entry.path,
        status,
        time,
        slow
    );
}

fn method_style(method: &str) -> StyledObject<String> {
    let padded = format!("{method:7}");
    match method.to_ascii_uppercase().as_str() {
        "GET" => style(padded).green(),
        "POST" => style(padded).blue(),
        "PUT" | "PATCH" => style(padded).yellow(),
        "DELETE" => style(padded).red(),
        _ => style(padded).white(),
    }
}

fn status_style(code: u16) -> StyledObject<u16> {
    match code {
        0..=199 => style(code).dim(),
        200..=299 => style(code).green(),
        300..=399 => style(code).yellow(),
        400..=499 => style(code).red(),
        _ => style(code).red().bold(),
    }
}

/// `1d 2h 3m 4s`, omitting leading zero units; seconds always shown.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, rest) = (total / 86_400, total % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, seconds) = (rest / 60, rest % 60);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(3_600)), "1h 0s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }

    #[test]
    fn padding_ignores_escape_codes() {
        let styled = style("ok").green().force_styling(true).to_string();
        assert_eq!(measure_text_width(&pad(&styled, 5)), 5);
        assert_eq!(pad("abc", 2), "abc");
    }
}
