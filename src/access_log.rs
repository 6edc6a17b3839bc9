//! Access log parsing, filtering and rendering.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::LogFormat;
use crate::logs::tail_lines;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Local>,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    pub status_code: u16,
    /// Seconds.
    #[serde(default)]
    pub response_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub is_slow: bool,
}

impl AccessLogEntry {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        status_code: u16,
        response_time: f64,
        slow_threshold: f64,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            method: method.into(),
            path: path.into(),
            query_string: None,
            status_code,
            response_time,
            client_ip: None,
            user_agent: None,
            content_length: None,
            is_slow: is_slow_request(response_time, slow_threshold),
        }
    }

    pub fn render(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Json => serde_json::to_string(self).unwrap_or_default(),
            LogFormat::Pretty => {
                let slow = if self.is_slow { " [SLOW]" } else { "" };
                format!(
                    "{} | {:7} {} | {} | {:.3}s{}",
                    self.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    self.method,
                    self.path,
                    self.status_code,
                    self.response_time,
                    slow
                )
            }
        }
    }
}

/// Inclusive: a response exactly at the threshold is slow.
pub fn is_slow_request(response_time: f64, threshold: f64) -> bool {
    response_time >= threshold
}

/// `false` for excluded paths and anything below them.
pub fn should_log_request(path: &str, exclude: &BTreeSet<String>) -> bool {
    !exclude.iter().any(|excluded| {
        path == excluded
            || path
                .strip_prefix(excluded.trim_end_matches('/'))
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn access_line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(\S+)\s+-\s+"(\w+)\s+(\S+)\s+HTTP/[\d.]+"\s+(\d+)"#).ok())
        .as_ref()
}

/// Parses a server access line such as
/// `127.0.0.1:51234 - "GET /items?id=1 HTTP/1.1" 200 OK`.
pub fn parse_access_line(line: &str, slow_threshold: f64) -> Option<AccessLogEntry> {
    let captures = access_line_pattern()?.captures(line)?;
    let target = &captures[3];
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    let client = captures[1].rsplit_once(':').map_or(&captures[1], |(ip, _)| ip);
    let mut entry = AccessLogEntry::new(
        &captures[2],
        path,
        captures[4].parse().ok()?,
        0.0,
        slow_threshold,
    );
    entry.query_string = query;
    entry.client_ip = Some(client.to_string());
    Some(entry)
}

/// Accepts JSON entries as well as raw server lines.
pub fn parse_entry(line: &str, slow_threshold: f64) -> Option<AccessLogEntry> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(entry) = serde_json::from_str::<AccessLogEntry>(trimmed) {
            return Some(entry);
        }
    }
    parse_access_line(trimmed, slow_threshold)
}

#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    pub method: Option<String>,
    pub path_prefix: Option<String>,
    pub status: Option<u16>,
    pub slow_only: bool,
}

impl AccessFilter {
    pub fn matches(&self, entry: &AccessLogEntry) -> bool {
        self.method
            .as_deref()
            .map_or(true, |method| entry.method.eq_ignore_ascii_case(method))
            && self
                .path_prefix
                .as_deref()
                .map_or(true, |prefix| entry.path.starts_with(prefix))
            && self.status.map_or(true, |status| entry.status_code == status)
            && (!self.slow_only || entry.is_slow)
    }
}

/// Last `lines` lines of an access log, parsed, excluded and filtered.
pub fn read_access_log(
    path: &Path,
    lines: usize,
    exclude: &BTreeSet<String>,
    slow_threshold: f64,
    filter: &AccessFilter,
) -> Result<Vec<AccessLogEntry>> {
    let raw = tail_lines(path, lines)
        .with_context(|| format!("failed to read access log {}", path.display()))?;
    Ok(raw
        .iter()
        .filter_map(|line| parse_entry(line, slow_threshold))
        .filter(|entry| should_log_request(&entry.path, exclude))
        .filter(|entry| filter.matches(entry))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn excluded() -> BTreeSet<String> {
        ["/health".to_string(), "/metrics".to_string()].into()
    }

    #[test]
    fn slow_boundary_is_inclusive() {
        assert!(is_slow_request(1.0, 1.0));
        assert!(!is_slow_request(0.999, 1.0));
        assert!(is_slow_request(0.0, 0.0));
    }

    #[test]
    fn excluded_paths_and_subpaths() {
        let exclude = excluded();
        assert!(!should_log_request("/health", &exclude));
        assert!(!should_log_request("/health/live", &exclude));
        assert!(should_log_request("/healthcheck", &exclude));
        assert!(should_log_request("/api/users", &exclude));
    }

    #[test]
    fn parses_server_access_line() {
        let entry = parse_access_line(
            r#"INFO:     127.0.0.1:51234 - "GET /items?id=1 HTTP/1.1" 404 Not Found"#,
            1.0,
        )
        .unwrap();
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.path, "/items");
        assert_eq!(entry.query_string.as_deref(), Some("id=1"));
        assert_eq!(entry.status_code, 404);
        assert_eq!(entry.client_ip.as_deref(), Some("127.0.0.1"));
        assert!(!entry.is_slow);

        assert!(parse_access_line("Application startup complete.", 1.0).is_none());
    }

    #[test]
    fn pretty_rendering() {
        let mut entry = AccessLogEntry::new("GET", "/slow", 200, 1.5, 1.0);
        entry.timestamp = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(
            entry.render(LogFormat::Pretty),
            "2024-03-01 12:30:05 | GET     /slow | 200 | 1.500s [SLOW]"
        );
    }

    #[test]
    fn json_entries_are_read_back() {
        let entry = AccessLogEntry::new("POST", "/orders", 201, 0.2, 1.0);
        let line = entry.render(LogFormat::Json);
        assert_eq!(parse_entry(&line, 1.0), Some(entry));
    }

    #[test]
    fn reads_and_filters_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        fs::write(
            &path,
            concat!(
                "127.0.0.1:1 - \"GET /health HTTP/1.1\" 200\n",
                "127.0.0.1:2 - \"GET /users HTTP/1.1\" 200\n",
                "127.0.0.1:3 - \"POST /users HTTP/1.1\" 500\n",
                "garbage\n",
            ),
        )
        .unwrap();

        let all = read_access_log(&path, 100, &excluded(), 1.0, &AccessFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let filter = AccessFilter {
            method: Some("post".into()),
            ..Default::default()
        };
        let posts = read_access_log(&path, 100, &excluded(), 1.0, &filter).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status_code, 500);
    }
}
