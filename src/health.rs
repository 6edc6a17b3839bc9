//! HTTP health probing of the running server.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Why a probe produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthFailure {
    Timeout,
    ConnectionRefused,
    Other(String),
}

impl fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthFailure::Timeout => f.write_str("request timed out"),
            HealthFailure::ConnectionRefused => f.write_str("connection refused"),
            HealthFailure::Other(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub failure: Option<HealthFailure>,
    pub body: Option<serde_json::Value>,
}

impl HealthCheckResult {
    fn failed(failure: HealthFailure) -> Self {
        Self {
            healthy: false,
            status_code: None,
            response_time_ms: None,
            failure: Some(failure),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl HealthTarget {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    pub fn url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" => "[::1]",
            host if host.contains(':') && !host.starts_with('[') => {
                return format!("http://[{host}]:{}{}", self.port, self.normalized_path())
            }
            host => host,
        };
        format!("http://{host}:{}{}", self.port, self.normalized_path())
    }

    fn normalized_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

/// Healthy iff the server answers with a 2xx status.
pub async fn check_health_async(target: &HealthTarget, timeout: Duration) -> HealthCheckResult {
    let client = match reqwest::Client::builder()
        .user_agent(format!("fa/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
    {
        Ok(client) => client,
        Err(err) => return HealthCheckResult::failed(HealthFailure::Other(err.to_string())),
    };

    let url = target.url();
    let started = Instant::now();
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(url, error = %err, "health request failed");
            return HealthCheckResult::failed(classify(&err));
        }
    };
    let status = response.status();
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return HealthCheckResult::failed(classify(&err)),
    };
    let elapsed = started.elapsed();

    HealthCheckResult {
        healthy: status.is_success(),
        status_code: Some(status.as_u16()),
        response_time_ms: Some(elapsed.as_secs_f64() * 1000.0),
        failure: None,
        body: serde_json::from_slice(&bytes).ok(),
    }
}

/// Blocking entry point; must not be called from inside a tokio runtime.
pub fn check_health(target: &HealthTarget, timeout: Duration) -> HealthCheckResult {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(check_health_async(target, timeout)),
        Err(err) => HealthCheckResult::failed(HealthFailure::Other(format!(
            "failed to start async runtime: {err}"
        ))),
    }
}

/// Polls every `interval` until a check succeeds or `timeout` elapses.
pub fn wait_for_healthy(target: &HealthTarget, timeout: Duration, interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        if check_health(target, remaining.min(Duration::from_secs(5))).healthy {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        thread::sleep(interval.min(remaining));
    }
}

fn classify(err: &reqwest::Error) -> HealthFailure {
    if err.is_timeout() {
        HealthFailure::Timeout
    } else if err.is_connect() {
        HealthFailure::ConnectionRefused
    } else {
        HealthFailure::Other(err.to_string())
    }
}
