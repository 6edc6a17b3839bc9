//! Full-screen rendering for `fa monitor`.

use std::io::{self, Stdout};

use chrono::{DateTime, Local};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table};
use ratatui::Terminal;

use crate::status::{DetectedBy, StatusView, WorkerState};
use crate::ui::format_uptime;

pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Raw mode plus the alternate screen. Raw mode is undone if the screen
/// switch fails.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    if let Err(err) = execute!(stdout, EnterAlternateScreen, SetTitle("fa monitor")) {
        let _ = disable_raw_mode();
        return Err(err);
    }
    Terminal::new(CrosstermBackend::new(stdout))
}

pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// One refresh worth of data.
pub struct MonitorFrame<'a> {
    pub view: &'a StatusView,
    pub refreshed_at: DateTime<Local>,
    pub refresh_secs: f64,
}

pub fn draw<B: Backend>(terminal: &mut Terminal<B>, frame_data: &MonitorFrame<'_>) -> io::Result<()> {
    terminal.draw(|frame| {
        let area = frame.size();
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(8), Constraint::Min(3), Constraint::Length(3)])
            .split(area);
        let border_style = Style::default().fg(Color::DarkGray);

        let master = Paragraph::new(master_lines(frame_data.view)).block(
            Block::default()
                .title("Server")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(border_style),
        );
        frame.render_widget(master, vertical[0]);

        let workers = frame_data
            .view
            .running
            .as_ref()
            .map(|running| running.workers.as_slice())
            .unwrap_or_default();
        let rows: Vec<Row> = workers
            .iter()
            .map(|worker| {
                let state = match worker.state {
                    WorkerState::Running => Cell::from("● running").style(Style::default().fg(Color::Green)),
                    WorkerState::Idle => Cell::from("○ idle").style(Style::default().fg(Color::DarkGray)),
                };
                Row::new(vec![
                    Cell::from(worker.pid.to_string()),
                    state,
                    Cell::from(format!("{:.1}%", worker.cpu_percent)),
                    Cell::from(format!("{:.1} MB", worker.memory_mb)),
                    Cell::from(format_uptime(worker.uptime)),
                ])
            })
            .collect();
        let widths = [
            Constraint::Length(10),
            Constraint::Length(12),
            Constraint::Length(8),
            Constraint::Length(12),
            Constraint::Min(10),
        ];
        let table = Table::new(rows, widths)
            .header(
                Row::new(vec!["PID", "Status", "CPU %", "Memory", "Uptime"])
                    .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            )
            .block(
                Block::default()
                    .title(format!("Workers ({})", workers.len()))
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .border_style(border_style),
            );
        frame.render_widget(table, vertical[1]);

        let footer = Paragraph::new(Line::from(Span::styled(
            format!(
                "Updated {} | every {}s | q quit",
                frame_data.refreshed_at.format("%H:%M:%S"),
                frame_data.refresh_secs
            ),
            Style::default().fg(Color::DarkGray),
        )))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(border_style),
        );
        frame.render_widget(footer, vertical[2]);
    })?;
    Ok(())
}

fn master_lines(view: &StatusView) -> Text<'static> {
    let label = |text: &str| Span::styled(format!("{text:<8}"), Style::default().fg(Color::DarkGray));
    let Some(running) = &view.running else {
        return Text::from(vec![
            Line::from(vec![
                label("Status"),
                Span::styled("○ Stopped", Style::default().fg(Color::Red)),
            ]),
            Line::from(vec![label("URL"), Span::raw(view.url.clone())]),
        ]);
    };

    let status = match running.detected_by {
        DetectedBy::PidFile => "● Running",
        DetectedBy::Port => "● Running (no PID file)",
    };
    let pid = running
        .pid
        .map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
    let mut lines = vec![
        Line::from(vec![
            label("Status"),
            Span::styled(status, Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(vec![label("PID"), Span::raw(pid)]),
        Line::from(vec![label("URL"), Span::raw(view.url.clone())]),
    ];
    if let Some(process) = &running.process {
        lines.push(Line::from(vec![label("Uptime"), Span::raw(format_uptime(process.uptime))]));
        lines.push(Line::from(vec![
            label("Memory"),
            Span::raw(format!("{:.1} MB", process.memory_mb)),
        ]));
        lines.push(Line::from(vec![
            label("CPU"),
            Span::raw(format!("{:.1}%", process.cpu_percent)),
        ]));
    }
    Text::from(lines)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use ratatui::backend::TestBackend;

    use super::*;
    use crate::status::{RunningServer, WorkerStatus};

    fn screen(view: &StatusView) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        let frame = MonitorFrame {
            view,
            refreshed_at: Local::now(),
            refresh_secs: 2.0,
        };
        draw(&mut terminal, &frame).unwrap();
        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|cell| cell.symbol()).collect()
    }

    fn stopped() -> StatusView {
        StatusView {
            running: None,
            url: "http://127.0.0.1:8000".into(),
            pid_file: PathBuf::from("runtime/fa.pid"),
            stale_pid: None,
            env_name: None,
        }
    }

    #[test]
    fn renders_stopped_server() {
        let text = screen(&stopped());
        assert!(text.contains("Stopped"));
        assert!(text.contains("Workers (0)"));
    }

    #[test]
    fn renders_worker_rows() {
        let mut view = stopped();
        view.running = Some(RunningServer {
            detected_by: DetectedBy::PidFile,
            pid: Some(100),
            process: None,
            workers: vec![WorkerStatus {
                pid: 4321,
                state: WorkerState::Running,
                cpu_percent: 12.5,
                memory_mb: 64.0,
                uptime: Duration::from_secs(65),
                requests_handled: 0,
            }],
        });
        let text = screen(&view);
        assert!(text.contains("Running"));
        assert!(text.contains("4321"));
        assert!(text.contains("12.5%"));
        assert!(text.contains("1m 5s"));
    }
}
