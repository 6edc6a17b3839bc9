use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// A single field that failed validation, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),
    #[error("environment '{name}' not found (available: {})", join_names(.available))]
    EnvironmentNotFound { name: String, available: Vec<String> },
}

impl ConfigError {
    /// Field-level detail for validation failures, empty for other kinds.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ConfigError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_lists_every_field() {
        let err = ConfigError::Invalid(vec![
            FieldError::new("port", "must be between 1 and 65535"),
            FieldError::new("workers", "must be at least 1"),
        ]);
        let message = err.to_string();
        assert!(message.contains("port: must be between 1 and 65535"));
        assert!(message.contains("workers: must be at least 1"));
        assert_eq!(err.field_errors().len(), 2);
    }

    #[test]
    fn unknown_environment_without_any_defined() {
        let err = ConfigError::EnvironmentNotFound {
            name: "staging".into(),
            available: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "environment 'staging' not found (available: none)"
        );
        assert!(err.field_errors().is_empty());
    }
}
