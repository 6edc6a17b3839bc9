//! `fa init`: writes a starter configuration into `pyproject.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::config::sources::{PROJECT_FILE, SECTION_NAME};

pub const ENV_EXAMPLE_FILE: &str = ".env.example";

pub const CONFIG_TEMPLATE: &str = r#"[tool.fastapi-launcher]
app = "main:app"
host = "127.0.0.1"
port = 8000
log_level = "info"
runtime_dir = "runtime"

# Development overrides
[tool.fastapi-launcher.dev]
reload = true
log_level = "debug"

# Production overrides
[tool.fastapi-launcher.prod]
host = "0.0.0.0"
workers = 4
daemon = false
log_level = "warning"

# Named environments, selected with --env <name>
# [tool.fastapi-launcher.envs.staging]
# host = "0.0.0.0"
# workers = 2
# log_level = "info"
"#;

pub const ENV_TEMPLATE: &str = r#"# fa launcher environment
# Copy to .env and uncomment what you need.

# Environment used by `fa run` (dev, prod or a named environment)
# FA_ENV=dev

# Server
# FA_HOST=127.0.0.1
# FA_PORT=8000
# FA_WORKERS=4
# FA_SERVER=uvicorn

# Graceful shutdown, in seconds
# FA_TIMEOUT_GRACEFUL_SHUTDOWN=10

# gunicorn only
# FA_MAX_REQUESTS=1000
# FA_MAX_REQUESTS_JITTER=100

# Logging
# FA_LOG_LEVEL=info
# FA_LOG_FORMAT=pretty
# FA_ACCESS_LOG=true

# Runtime
# FA_RUNTIME_DIR=runtime
# FA_HEALTH_PATH=/health
"#;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("pyproject.toml not found in {}; create it first", .0.display())]
    MissingProjectFile(PathBuf),
    #[error("configuration already exists in pyproject.toml; use --force to overwrite")]
    AlreadyConfigured,
    #[error("failed to update {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub project_file: PathBuf,
    pub replaced: bool,
    /// `Some(true)` if `.env.example` was written, `Some(false)` if it
    /// already existed and was left alone.
    pub env_example: Option<bool>,
}

fn section_header() -> String {
    format!("[tool.{SECTION_NAME}")
}

pub fn has_launcher_section(contents: &str) -> bool {
    let header = section_header();
    contents.lines().any(|line| line.trim_start().starts_with(&header))
}

/// Drops every `[tool.fastapi-launcher*]` table and collapses the blank
/// runs left behind.
pub fn strip_launcher_section(contents: &str) -> String {
    let header = section_header();
    let mut kept = Vec::new();
    let mut skipping = false;
    for line in contents.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with(&header) {
            skipping = true;
            continue;
        }
        if skipping && trimmed.starts_with('[') {
            skipping = false;
        }
        if !skipping {
            kept.push(line);
        }
    }

    let mut out = String::new();
    let mut blank_run = 0;
    for line in kept {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> InitError {
    let path = path.to_path_buf();
    move |source| InitError::Io { path, source }
}

pub fn init_config(project_dir: &Path, force: bool, with_env: bool) -> Result<InitOutcome, InitError> {
    let path = project_dir.join(PROJECT_FILE);
    if !path.is_file() {
        return Err(InitError::MissingProjectFile(project_dir.to_path_buf()));
    }
    let existing = fs::read_to_string(&path).map_err(io_err(&path))?;

    let replaced = has_launcher_section(&existing);
    if replaced && !force {
        return Err(InitError::AlreadyConfigured);
    }
    let base = if replaced {
        strip_launcher_section(&existing)
    } else {
        existing
    };
    let mut updated = base.trim_end().to_string();
    if !updated.is_empty() {
        updated.push_str("\n\n");
    }
    updated.push_str(CONFIG_TEMPLATE);
    fs::write(&path, updated).map_err(io_err(&path))?;
    info!(path = %path.display(), replaced, "wrote launcher configuration");

    let env_example = if with_env {
        let env_path = project_dir.join(ENV_EXAMPLE_FILE);
        if env_path.exists() && !force {
            Some(false)
        } else {
            fs::write(&env_path, ENV_TEMPLATE).map_err(io_err(&env_path))?;
            Some(true)
        }
    } else {
        None
    };

    Ok(InitOutcome {
        project_file: path,
        replaced,
        env_example,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::sources::read_project_section;

    const PROJECT: &str = "[project]\nname = \"demo\"\n";

    #[test]
    fn missing_project_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = init_config(dir.path(), false, false).unwrap_err();
        assert!(matches!(err, InitError::MissingProjectFile(_)));
    }

    #[test]
    fn appends_a_parseable_section() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROJECT_FILE), PROJECT).unwrap();

        let outcome = init_config(dir.path(), false, true).unwrap();
        assert!(!outcome.replaced);
        assert_eq!(outcome.env_example, Some(true));

        let text = fs::read_to_string(dir.path().join(PROJECT_FILE)).unwrap();
        assert!(text.starts_with(PROJECT));
        let section = read_project_section(dir.path()).unwrap().unwrap();
        assert_eq!(section.base.app.as_deref(), Some("main:app"));
        assert_eq!(section.prod.unwrap().workers, Some(4));
        assert!(dir.path().join(ENV_EXAMPLE_FILE).exists());
    }

    #[test]
    fn existing_section_needs_force() {
        let dir = TempDir::new().unwrap();
        let custom = format!("{PROJECT}\n[tool.fastapi-launcher]\nport = 9000\n\n[tool.fastapi-launcher.dev]\nreload = false\n\n[tool.black]\nline-length = 100\n");
        fs::write(dir.path().join(PROJECT_FILE), &custom).unwrap();

        let err = init_config(dir.path(), false, false).unwrap_err();
        assert!(matches!(err, InitError::AlreadyConfigured));

        let outcome = init_config(dir.path(), true, false).unwrap();
        assert!(outcome.replaced);
        let text = fs::read_to_string(dir.path().join(PROJECT_FILE)).unwrap();
        assert!(!text.contains("port = 9000"));
        assert!(text.contains("[tool.black]\nline-length = 100"));
        assert_eq!(text.matches("[tool.fastapi-launcher]").count(), 1);
    }

    #[test]
    fn strip_removes_only_launcher_tables() {
        let input = "[a]\nx = 1\n\n\n[tool.fastapi-launcher]\ny = 2\n[tool.fastapi-launcher.envs.qa]\nz = 3\n\n[b]\nw = 4\n";
        assert_eq!(strip_launcher_section(input), "[a]\nx = 1\n\n[b]\nw = 4\n");
    }
}
