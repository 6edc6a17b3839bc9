//! Environment detection for `fa run`.

use std::fmt;
use std::path::Path;

use crate::config::sources::dotenv_value;
use crate::config::RunMode;

/// Process variables consulted first, highest priority first.
pub const ENV_VARS: [&str; 3] = ["FA_ENV", "PYTHON_ENV", "NODE_ENV"];
/// Keys honoured in the project's `.env`.
pub const DOTENV_KEYS: [&str; 2] = ["FA_ENV", "PYTHON_ENV"];

const DEV_MARKERS: [&str; 2] = [".git/hooks/pre-commit", ".pre-commit-config.yaml"];
const PROD_MARKERS: [&str; 5] = [
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "Procfile",
    "app.yaml",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionSource {
    Variable(&'static str),
    Dotenv(&'static str),
    Marker(&'static str),
    Fallback,
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionSource::Variable(name) => write!(f, "${name}"),
            DetectionSource::Dotenv(name) => write!(f, "{name} in .env"),
            DetectionSource::Marker(file) => write!(f, "found {file}"),
            DetectionSource::Fallback => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Environment name as found, lowercased.
    pub name: String,
    pub mode: RunMode,
    pub source: DetectionSource,
}

impl Detection {
    fn from_name(name: &str, source: DetectionSource) -> Self {
        let name = name.trim().to_ascii_lowercase();
        Self {
            mode: mode_for(&name),
            name,
            source,
        }
    }

    /// Names outside the dev/prod aliases select a named environment.
    pub fn named_environment(&self) -> Option<&str> {
        match self.name.as_str() {
            "dev" | "development" | "local" | "prod" | "production" => None,
            name => Some(name),
        }
    }
}

pub fn mode_for(name: &str) -> RunMode {
    match name {
        "dev" | "development" | "local" => RunMode::Dev,
        _ => RunMode::Prod,
    }
}

pub fn detect_environment<F>(project_dir: &Path, env: F) -> Detection
where
    F: Fn(&str) -> Option<String>,
{
    for var in ENV_VARS {
        if let Some(value) = env(var).filter(|value| !value.trim().is_empty()) {
            return Detection::from_name(&value, DetectionSource::Variable(var));
        }
    }
    for key in DOTENV_KEYS {
        if let Some(value) =
            dotenv_value(project_dir, key).filter(|value| !value.trim().is_empty())
        {
            return Detection::from_name(&value, DetectionSource::Dotenv(key));
        }
    }
    if let Some(marker) = DEV_MARKERS.iter().find(|m| project_dir.join(m).exists()) {
        return Detection::from_name("dev", DetectionSource::Marker(*marker));
    }
    if let Some(marker) = PROD_MARKERS.iter().find(|m| project_dir.join(m).exists()) {
        return Detection::from_name("prod", DetectionSource::Marker(*marker));
    }
    Detection::from_name("dev", DetectionSource::Fallback)
}
