use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use super::error::{ConfigError, ConfigResult, FieldError};
use super::layer::ConfigLayer;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DEV_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROD_HOST: &str = "0.0.0.0";
pub const DEFAULT_DEV_WORKERS: u32 = 1;
pub const DEFAULT_PROD_WORKERS: u32 = 4;
pub const DEFAULT_GRACEFUL_TIMEOUT: u64 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_RUNTIME_DIR: &str = "runtime";
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_HEALTH_TIMEOUT: u64 = 5;
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: f64 = 1.0;
pub const DEFAULT_WORKER_CLASS: &str = "uvicorn.workers.UvicornWorker";
pub const DEFAULT_EXCLUDE_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Returned when a string names no variant of one of the config enums.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}' (expected one of: {expected})")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

macro_rules! config_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: value.to_string(),
                        expected: concat!($($text, ", "),+).trim_end_matches(", "),
                    }),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Dev,
    Prod,
}

config_enum!(RunMode, "mode", { Dev => "dev", Prod => "prod" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerBackend {
    #[default]
    Uvicorn,
    Gunicorn,
}

config_enum!(ServerBackend, "server", { Uvicorn => "uvicorn", Gunicorn => "gunicorn" });

impl ServerBackend {
    pub fn executable(self) -> &'static str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

config_enum!(LogFormat, "log format", { Pretty => "pretty", Json => "json" });

/// The fully validated configuration a command runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub project_dir: PathBuf,
    pub app: Option<String>,
    pub app_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub mode: RunMode,
    pub server: ServerBackend,
    pub reload: bool,
    pub reload_dirs: Vec<String>,
    pub workers: u32,
    pub daemon: bool,
    pub timeout_graceful_shutdown: u64,
    pub max_requests: u64,
    pub max_requests_jitter: u64,
    pub worker_class: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub access_log: bool,
    pub runtime_dir: PathBuf,
    pub health_path: String,
    pub health_timeout: u64,
    pub slow_request_threshold: f64,
    pub exclude_paths: BTreeSet<String>,
    pub environments: BTreeMap<String, ConfigLayer>,
    /// Named environment this configuration was resolved for, if any.
    pub env_name: Option<String>,
}

impl Config {
    /// Validates a merged layer, filling defaults for every absent field.
    ///
    /// All field errors are collected before returning, so the operator sees
    /// every problem at once.
    pub fn from_layer(layer: ConfigLayer, project_dir: &Path) -> ConfigResult<Self> {
        let mut errors = Vec::new();
        let mode = layer.mode.unwrap_or_default();

        if let Some(app) = &layer.app {
            if !is_import_path(app) {
                errors.push(FieldError::new(
                    "app",
                    format!("'{app}' must use the 'module:attribute' format"),
                ));
            }
        }

        let host = layer.host.unwrap_or_else(|| match mode {
            RunMode::Dev => DEFAULT_DEV_HOST.to_string(),
            RunMode::Prod => DEFAULT_PROD_HOST.to_string(),
        });
        if host.trim().is_empty() {
            errors.push(FieldError::new("host", "must not be empty"));
        }

        let port = match layer.port {
            None => DEFAULT_PORT,
            Some(value) => match u16::try_from(value) {
                Ok(port) if port > 0 => port,
                _ => {
                    errors.push(FieldError::new(
                        "port",
                        format!("{value} is not between 1 and 65535"),
                    ));
                    DEFAULT_PORT
                }
            },
        };

        let workers = match layer.workers {
            None => match mode {
                RunMode::Dev => DEFAULT_DEV_WORKERS,
                RunMode::Prod => DEFAULT_PROD_WORKERS,
            },
            Some(value) => match u32::try_from(value) {
                Ok(workers) if workers >= 1 => workers,
                _ => {
                    errors.push(FieldError::new(
                        "workers",
                        format!("{value} must be at least 1"),
                    ));
                    DEFAULT_DEV_WORKERS
                }
            },
        };

        let timeout_graceful_shutdown = non_negative(
            &mut errors,
            "timeout_graceful_shutdown",
            layer.timeout_graceful_shutdown,
            DEFAULT_GRACEFUL_TIMEOUT,
        );
        let max_requests = non_negative(&mut errors, "max_requests", layer.max_requests, 0);
        let max_requests_jitter = non_negative(
            &mut errors,
            "max_requests_jitter",
            layer.max_requests_jitter,
            0,
        );

        let health_timeout = match layer.health_timeout {
            None => DEFAULT_HEALTH_TIMEOUT,
            Some(value) if value >= 1 => value as u64,
            Some(value) => {
                errors.push(FieldError::new(
                    "health_timeout",
                    format!("{value} must be at least 1"),
                ));
                DEFAULT_HEALTH_TIMEOUT
            }
        };

        let slow_request_threshold = match layer.slow_request_threshold {
            None => DEFAULT_SLOW_REQUEST_THRESHOLD,
            Some(value) if value.is_finite() && value >= 0.0 => value,
            Some(value) => {
                errors.push(FieldError::new(
                    "slow_request_threshold",
                    format!("{value} must be a non-negative number"),
                ));
                DEFAULT_SLOW_REQUEST_THRESHOLD
            }
        };

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        let app_dir = layer
            .app_dir
            .map(|dir| resolve_against(project_dir, &dir))
            .unwrap_or_else(|| project_dir.to_path_buf());
        let exclude_paths = layer
            .exclude_paths
            .map(|paths| paths.into_iter().collect())
            .unwrap_or_else(|| DEFAULT_EXCLUDE_PATHS.iter().map(|p| p.to_string()).collect());

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            app: layer.app,
            app_dir,
            host,
            port,
            mode,
            server: layer.server.unwrap_or_default(),
            reload: layer.reload.unwrap_or(false),
            reload_dirs: layer.reload_dirs.unwrap_or_default(),
            workers,
            daemon: layer.daemon.unwrap_or(false),
            timeout_graceful_shutdown,
            max_requests,
            max_requests_jitter,
            worker_class: layer
                .worker_class
                .unwrap_or_else(|| DEFAULT_WORKER_CLASS.to_string()),
            log_level: layer
                .log_level
                .map(|level| level.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format: layer.log_format.unwrap_or_default(),
            access_log: layer.access_log.unwrap_or(true),
            runtime_dir: layer
                .runtime_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_DIR)),
            health_path: layer
                .health_path
                .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string()),
            health_timeout,
            slow_request_threshold,
            exclude_paths,
            environments: BTreeMap::new(),
            env_name: None,
        })
    }

    /// Runtime directory with relative paths anchored at the project.
    pub fn runtime_path(&self) -> PathBuf {
        resolve_against(&self.project_dir, &self.runtime_dir)
    }

    /// Address clients should use to reach the server.
    ///
    /// A wildcard bind is reported as loopback since that is where local
    /// probes connect.
    pub fn client_host(&self) -> &str {
        match self.host.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1",
            host => host,
        }
    }

    /// Operator-facing base URL, built from [`Config::client_host`].
    pub fn url(&self) -> String {
        match self.client_host() {
            host if host.contains(':') => format!("http://[{host}]:{}", self.port),
            host => format!("http://{host}:{}", self.port),
        }
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    /// Label/value pairs shown by `fa config`.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("App", self.app.clone().unwrap_or_else(|| "(auto-discover)".into())),
            ("App dir", self.app_dir.display().to_string()),
            ("Host", self.host.clone()),
            ("Port", self.port.to_string()),
            ("Mode", self.mode.to_string()),
            ("Server", self.server.to_string()),
            ("Reload", self.reload.to_string()),
            ("Workers", self.workers.to_string()),
            ("Daemon", self.daemon.to_string()),
            ("Log level", self.log_level.clone()),
            ("Log format", self.log_format.to_string()),
            ("Access log", self.access_log.to_string()),
            ("Runtime dir", self.runtime_path().display().to_string()),
            ("Health path", self.health_path.clone()),
            ("Health timeout", format!("{}s", self.health_timeout)),
            (
                "Graceful shutdown",
                format!("{}s", self.timeout_graceful_shutdown),
            ),
            ("Slow threshold", format!("{}s", self.slow_request_threshold)),
        ];
        if !self.reload_dirs.is_empty() {
            rows.push(("Reload dirs", self.reload_dirs.join(", ")));
        }
        if self.server == ServerBackend::Gunicorn {
            rows.push(("Worker class", self.worker_class.clone()));
            rows.push(("Max requests", self.max_requests.to_string()));
            rows.push(("Max requests jitter", self.max_requests_jitter.to_string()));
        }
        if !self.exclude_paths.is_empty() {
            let paths: Vec<&str> = self.exclude_paths.iter().map(String::as_str).collect();
            rows.push(("Exclude paths", paths.join(", ")));
        }
        if let Some(name) = &self.env_name {
            rows.push(("Environment", name.clone()));
        }
        if !self.environments.is_empty() {
            rows.push(("Environments", self.environment_names().join(", ")));
        }
        rows
    }
}

/// `module:attr`, with a dotted module and an identifier attribute.
pub fn is_import_path(value: &str) -> bool {
    let Some((module, attr)) = value.split_once(':') else {
        return false;
    };
    let is_ident = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_')
    };
    module.split('.').all(is_ident) && is_ident(attr)
}

pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_negative(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: Option<i64>,
    default: u64,
) -> u64 {
    match value {
        None => default,
        Some(value) if value >= 0 => value as u64,
        Some(value) => {
            errors.push(FieldError::new(field, format!("{value} must not be negative")));
            default
        }
    }
}
