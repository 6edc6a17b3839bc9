//! Files the launcher keeps under its runtime directory.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Result};
use tracing::debug;

use crate::config::Config;

pub const PID_FILE_NAME: &str = "fa.pid";
pub const ENV_FILE_NAME: &str = "fa.env";
pub const LOGS_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Main,
    Access,
    Error,
}

impl LogKind {
    pub const ALL: [LogKind; 3] = [LogKind::Main, LogKind::Access, LogKind::Error];

    pub fn file_name(self) -> &'static str {
        match self {
            LogKind::Main => "fa.log",
            LogKind::Access => "access.log",
            LogKind::Error => "error.log",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Main => "main",
            LogKind::Access => "access",
            LogKind::Error => "error",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "main" => Ok(LogKind::Main),
            "access" => Ok(LogKind::Access),
            "error" => Ok(LogKind::Error),
            other => bail!("unknown log type '{other}' (expected main, access or error)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    root: PathBuf,
}

impl RuntimePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(config.runtime_path())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE_NAME)
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join(ENV_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR_NAME)
    }

    pub fn log_file(&self, kind: LogKind) -> PathBuf {
        self.logs_dir().join(kind.file_name())
    }

    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn ensure_logs_dir(&self) -> io::Result<PathBuf> {
        let dir = self.logs_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Named environment recorded by the last `start`, if any.
    pub fn read_env_name(&self) -> Option<String> {
        let contents = fs::read_to_string(self.env_file()).ok()?;
        let name = contents.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn write_env_name(&self, name: &str) -> io::Result<()> {
        self.ensure()?;
        fs::write(self.env_file(), name)
    }

    pub fn remove_env_name(&self) -> bool {
        match fs::remove_file(self.env_file()) {
            Ok(()) => true,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!(path = %self.env_file().display(), error = %err, "could not remove env marker");
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout_under_root() {
        let paths = RuntimePaths::new("/srv/app/runtime");
        assert_eq!(paths.pid_file(), PathBuf::from("/srv/app/runtime/fa.pid"));
        assert_eq!(
            paths.log_file(LogKind::Access),
            PathBuf::from("/srv/app/runtime/logs/access.log")
        );
    }

    #[test]
    fn env_marker_round_trip() {
        let dir = TempDir::new().unwrap();
        let paths = RuntimePaths::new(dir.path().join("runtime"));
        assert_eq!(paths.read_env_name(), None);
        paths.write_env_name("staging").unwrap();
        assert_eq!(paths.read_env_name().as_deref(), Some("staging"));
        assert!(paths.remove_env_name());
        assert!(!paths.remove_env_name());
    }

    #[test]
    fn log_kind_parsing() {
        assert_eq!("access".parse::<LogKind>().unwrap(), LogKind::Access);
        assert!("debug".parse::<LogKind>().is_err());
    }
}
