//! The typed intermediate every configuration source produces.
//!
//! Each field is `Option<T>`: `None` means the source said nothing about it,
//! so merging never lets an absent value overwrite a defined one.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use super::model::{LogFormat, RunMode, ServerBackend};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigLayer {
    pub app: Option<String>,
    pub app_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub mode: Option<RunMode>,
    pub server: Option<ServerBackend>,
    pub reload: Option<bool>,
    pub reload_dirs: Option<Vec<String>>,
    pub workers: Option<i64>,
    pub daemon: Option<bool>,
    pub timeout_graceful_shutdown: Option<i64>,
    pub max_requests: Option<i64>,
    pub max_requests_jitter: Option<i64>,
    pub worker_class: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub access_log: Option<bool>,
    pub runtime_dir: Option<PathBuf>,
    pub health_path: Option<String>,
    pub health_timeout: Option<i64>,
    pub slow_request_threshold: Option<f64>,
    pub exclude_paths: Option<Vec<String>>,
}

impl ConfigLayer {
    /// Overlays `higher` on top of `self`; fields `higher` leaves unset keep
    /// their current value.
    pub fn merge(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            app: higher.app.or(self.app),
            app_dir: higher.app_dir.or(self.app_dir),
            host: higher.host.or(self.host),
            port: higher.port.or(self.port),
            mode: higher.mode.or(self.mode),
            server: higher.server.or(self.server),
            reload: higher.reload.or(self.reload),
            reload_dirs: higher.reload_dirs.or(self.reload_dirs),
            workers: higher.workers.or(self.workers),
            daemon: higher.daemon.or(self.daemon),
            timeout_graceful_shutdown: higher
                .timeout_graceful_shutdown
                .or(self.timeout_graceful_shutdown),
            max_requests: higher.max_requests.or(self.max_requests),
            max_requests_jitter: higher.max_requests_jitter.or(self.max_requests_jitter),
            worker_class: higher.worker_class.or(self.worker_class),
            log_level: higher.log_level.or(self.log_level),
            log_format: higher.log_format.or(self.log_format),
            access_log: higher.access_log.or(self.access_log),
            runtime_dir: higher.runtime_dir.or(self.runtime_dir),
            health_path: higher.health_path.or(self.health_path),
            health_timeout: higher.health_timeout.or(self.health_timeout),
            slow_request_threshold: higher
                .slow_request_threshold
                .or(self.slow_request_threshold),
            exclude_paths: higher.exclude_paths.or(self.exclude_paths),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ConfigLayer::default()
    }

    /// Builds a layer from string key/value pairs, where keys are the
    /// suffixes after the `FA_` prefix (`PORT`, `LOG_LEVEL`, ...).
    ///
    /// Values that fail coercion are dropped so a lower layer can still
    /// supply the field. Unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> ConfigLayer
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut layer = ConfigLayer::default();
        for (key, value) in pairs {
            let key = key.as_ref().to_ascii_uppercase();
            let value = value.as_ref();
            let applied = layer.apply(&key, value);
            if applied == Some(false) {
                debug!(key = %key, value, "dropping value that failed coercion");
            }
        }
        layer
    }

    // Some(true) applied, Some(false) rejected, None unknown key.
    fn apply(&mut self, key: &str, value: &str) -> Option<bool> {
        let applied = match key {
            "APP" => set(&mut self.app, Some(value.to_string())),
            "APP_DIR" => set(&mut self.app_dir, Some(PathBuf::from(value))),
            "HOST" => set(&mut self.host, Some(value.to_string())),
            "PORT" => set(&mut self.port, parse_int(value)),
            "MODE" => set(&mut self.mode, parse_enum(value)),
            "SERVER" => set(&mut self.server, parse_enum(value)),
            "RELOAD" => set(&mut self.reload, parse_bool(value)),
            "RELOAD_DIRS" => set(&mut self.reload_dirs, Some(parse_list(value))),
            "WORKERS" => set(&mut self.workers, parse_int(value)),
            "DAEMON" => set(&mut self.daemon, parse_bool(value)),
            "TIMEOUT_GRACEFUL_SHUTDOWN" => {
                set(&mut self.timeout_graceful_shutdown, parse_int(value))
            }
            "MAX_REQUESTS" => set(&mut self.max_requests, parse_int(value)),
            "MAX_REQUESTS_JITTER" => set(&mut self.max_requests_jitter, parse_int(value)),
            "WORKER_CLASS" => set(&mut self.worker_class, Some(value.to_string())),
            "LOG_LEVEL" => set(&mut self.log_level, Some(value.to_string())),
            "LOG_FORMAT" => set(&mut self.log_format, parse_enum(value)),
            "ACCESS_LOG" => set(&mut self.access_log, parse_bool(value)),
            "RUNTIME_DIR" => set(&mut self.runtime_dir, Some(PathBuf::from(value))),
            "HEALTH_PATH" => set(&mut self.health_path, Some(value.to_string())),
            "HEALTH_TIMEOUT" => set(&mut self.health_timeout, parse_int(value)),
            "SLOW_REQUEST_THRESHOLD" => {
                set(&mut self.slow_request_threshold, parse_float(value))
            }
            "EXCLUDE_PATHS" => set(&mut self.exclude_paths, Some(parse_list(value))),
            _ => return None,
        };
        Some(applied)
    }
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *slot = Some(value);
            true
        }
        None => false,
    }
}

pub fn parse_int(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

pub fn parse_float(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_enum<T: FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}
