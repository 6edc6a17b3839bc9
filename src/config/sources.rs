use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use super::error::{ConfigError, ConfigResult};
use super::layer::ConfigLayer;
use super::model::RunMode;

pub const PROJECT_FILE: &str = "pyproject.toml";
pub const DOTENV_FILE: &str = ".env";
pub const SECTION_NAME: &str = "fastapi-launcher";
pub const ENV_PREFIX: &str = "FA_";

#[derive(Debug, Default, Deserialize)]
struct RawProject {
    #[serde(default)]
    tool: RawTool,
}

#[derive(Debug, Default, Deserialize)]
struct RawTool {
    #[serde(default, rename = "fastapi-launcher")]
    launcher: Option<ProjectSection>,
}

/// The launcher's section of the project file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectSection {
    #[serde(flatten)]
    pub base: ConfigLayer,
    #[serde(default)]
    pub dev: Option<ConfigLayer>,
    #[serde(default)]
    pub prod: Option<ConfigLayer>,
    #[serde(default)]
    pub envs: BTreeMap<String, ConfigLayer>,
}

impl ProjectSection {
    /// Legacy per-mode override section.
    pub fn mode_override(&self, mode: RunMode) -> Option<&ConfigLayer> {
        match mode {
            RunMode::Dev => self.dev.as_ref(),
            RunMode::Prod => self.prod.as_ref(),
        }
    }
}

pub fn project_file(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_FILE)
}

/// Reads the launcher section, reporting every failure.
///
/// `Ok(None)` means there is no project file or it has no launcher section.
pub fn read_project_section(project_dir: &Path) -> ConfigResult<Option<ProjectSection>> {
    let path = project_file(project_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::ReadFailure { path, source }),
    };
    let raw: RawProject =
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
    Ok(raw.tool.launcher)
}

/// Like [`read_project_section`] but an unreadable file is treated as empty.
/// Malformed contents are still an error.
pub fn load_project_section(project_dir: &Path) -> ConfigResult<ProjectSection> {
    match read_project_section(project_dir) {
        Ok(section) => Ok(section.unwrap_or_default()),
        Err(ConfigError::ReadFailure { path, source }) => {
            warn!(path = %path.display(), error = %source, "ignoring unreadable project file");
            Ok(ProjectSection::default())
        }
        Err(err) => Err(err),
    }
}

/// `FA_`-prefixed keys from the project's `.env` file.
pub fn load_dotenv(project_dir: &Path) -> ConfigLayer {
    let path = project_dir.join(DOTENV_FILE);
    if !path.is_file() {
        return ConfigLayer::default();
    }
    match dotenvy::from_path_iter(&path) {
        Ok(iter) => {
            let pairs: Vec<(String, String)> = iter
                .filter_map(|item| match item {
                    Ok(pair) => Some(pair),
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "skipping malformed dotenv line");
                        None
                    }
                })
                .collect();
            layer_from_env(&pairs)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable dotenv file");
            ConfigLayer::default()
        }
    }
}

/// Reads a single raw value from the project's `.env` file.
pub fn dotenv_value(project_dir: &Path, key: &str) -> Option<String> {
    let path = project_dir.join(DOTENV_FILE);
    let iter = dotenvy::from_path_iter(&path).ok()?;
    iter.filter_map(Result::ok)
        .find(|(name, _)| name == key)
        .map(|(_, value)| value)
}

/// Layer from an environment snapshot; only `FA_` keys participate.
pub fn layer_from_env(vars: &[(String, String)]) -> ConfigLayer {
    ConfigLayer::from_pairs(vars.iter().filter_map(|(key, value)| {
        key.strip_prefix(ENV_PREFIX)
            .map(|suffix| (suffix, value.as_str()))
    }))
}
