use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{ConfigError, ConfigResult};
use super::layer::ConfigLayer;
use super::model::{Config, RunMode};
use super::sources::{layer_from_env, load_dotenv, load_project_section};

/// What a command asks the resolver for.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub cli: ConfigLayer,
    pub mode: Option<RunMode>,
    pub env_name: Option<String>,
}

impl ResolveRequest {
    pub fn with_env_name(mut self, env_name: Option<String>) -> Self {
        self.env_name = env_name;
        self
    }

    pub fn with_mode(mut self, mode: Option<RunMode>) -> Self {
        self.mode = mode;
        self
    }
}

/// Produces the effective configuration for a project directory.
///
/// The process environment is captured once at construction so resolution
/// is a pure function of the project files and that snapshot.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    project_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl ConfigResolver {
    pub fn with_env<I>(project_dir: impl Into<PathBuf>, env: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            project_dir: project_dir.into(),
            env: env.into_iter().collect(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Layers, lowest first: project base, selected override section, dotenv,
    /// environment, CLI. The mode override is applied last.
    pub fn resolve(&self, request: &ResolveRequest) -> ConfigResult<Config> {
        let project = load_project_section(&self.project_dir)?;

        let override_layer = match &request.env_name {
            Some(name) => match project.envs.get(name) {
                Some(layer) => Some(layer.clone()),
                None => {
                    return Err(ConfigError::EnvironmentNotFound {
                        name: name.clone(),
                        available: project.envs.keys().cloned().collect(),
                    })
                }
            },
            None => None,
        };

        let upper = load_dotenv(&self.project_dir)
            .merge(layer_from_env(&self.env))
            .merge(request.cli.clone());

        let override_layer = override_layer.or_else(|| {
            let mode = request
                .mode
                .or(upper.mode)
                .or(project.base.mode)
                .unwrap_or_default();
            project.mode_override(mode).cloned()
        });

        let mut merged = project.base.clone();
        if let Some(layer) = override_layer {
            merged = merged.merge(layer);
        }
        merged = merged.merge(upper);
        if let Some(mode) = request.mode {
            merged.mode = Some(mode);
        }
        debug!(project = %self.project_dir.display(), ?merged, "merged configuration layers");

        let mut config = Config::from_layer(merged, &self.project_dir)?;
        config.environments = project.envs;
        config.env_name = request.env_name.clone();
        Ok(config)
    }
}
