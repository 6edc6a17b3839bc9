//! `fa check`: environment and project diagnostics.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::app_path::{AppResolveError, AppResolver};
use crate::config::sources::{project_file, read_project_section, PROJECT_FILE, SECTION_NAME};
use crate::config::{ConfigResolver, ResolveRequest, ServerBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl CheckResult {
    fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    fn fail(name: impl Into<String>, message: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            suggestions,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }
}

/// Runs every check against `resolver`'s project and environment.
pub fn run_all(resolver: &ConfigResolver, apps: &AppResolver) -> CheckReport {
    let search_path = resolver.env_var("PATH").map(OsStr::new);
    let mut report = CheckReport::default();
    report.results.push(check_backend(ServerBackend::Uvicorn, search_path, true));
    report.results.push(check_backend(ServerBackend::Gunicorn, search_path, false));
    report.results.push(check_project_file(resolver.project_dir()));

    match resolver.resolve(&ResolveRequest::default()) {
        Ok(config) => {
            report.results.push(CheckResult::pass("Configuration", "Configuration is valid"));
            report.results.push(check_app(apps, config.app.as_deref(), &config.app_dir));
        }
        Err(err) => {
            report.results.push(CheckResult::fail(
                "Configuration",
                format!("Invalid configuration: {err}"),
                vec![
                    format!("Check the [tool.{SECTION_NAME}] section of {PROJECT_FILE}"),
                    "Verify the .env file format".into(),
                    "Check environment variables with the FA_ prefix".into(),
                ],
            ));
            report.results.push(CheckResult::fail(
                "App path",
                "Cannot check the app path while the configuration is invalid",
                Vec::new(),
            ));
        }
    }
    report
}

/// Looks `name` up in a `PATH`-style list.
pub fn find_executable(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let search_path = search_path?;
    env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

pub fn check_backend(backend: ServerBackend, search_path: Option<&OsStr>, required: bool) -> CheckResult {
    let name = format!("Backend: {backend}");
    match find_executable(backend.executable(), search_path) {
        Some(path) => CheckResult::pass(name, format!("{backend} found at {}", path.display())),
        None if required => CheckResult::fail(
            name,
            format!("{backend} is not installed"),
            vec![format!("Install with: pip install {backend}")],
        ),
        None => CheckResult::pass(name, format!("{backend} is not installed (optional)")),
    }
}

pub fn check_project_file(project_dir: &Path) -> CheckResult {
    if !project_file(project_dir).exists() {
        return CheckResult::pass(PROJECT_FILE, format!("No {PROJECT_FILE} found (using defaults)"));
    }
    match read_project_section(project_dir) {
        Ok(Some(_)) => CheckResult::pass(
            PROJECT_FILE,
            format!("Found [tool.{SECTION_NAME}] configuration"),
        ),
        Ok(None) => CheckResult::pass(
            PROJECT_FILE,
            format!("No [tool.{SECTION_NAME}] section (using defaults)"),
        ),
        Err(err) => CheckResult::fail(PROJECT_FILE, format!("Error reading {PROJECT_FILE}: {err}"), Vec::new()),
    }
}

pub fn check_app(apps: &AppResolver, explicit: Option<&str>, root: &Path) -> CheckResult {
    match apps.resolve(explicit, root) {
        Ok(app) if app.discovered => {
            CheckResult::pass("App path", format!("Auto-discovered app: {}", app.import_path))
        }
        Ok(app) => CheckResult::pass("App path", format!("App path is valid: {}", app.import_path)),
        Err(AppResolveError::NotFound { candidates, .. }) => {
            let mut suggestions = vec![
                "Create main.py with 'app = FastAPI()'".to_string(),
                format!("Set the app in {PROJECT_FILE}: [tool.{SECTION_NAME}] app = \"main:app\""),
            ];
            if !candidates.is_empty() {
                suggestions.push(format!("Found candidates: {}", candidates.join(", ")));
            }
            CheckResult::fail("App path", "Could not auto-discover a FastAPI app", suggestions)
        }
        Err(AppResolveError::Invalid { path }) => CheckResult::fail(
            "App path",
            format!("Cannot load app from: {path}"),
            vec![
                "Check that the module exists".into(),
                "Ensure the app variable is defined".into(),
            ],
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[cfg(unix)]
    fn fake_binary(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn backend_lookup_uses_search_path() {
        let bin = TempDir::new().unwrap();
        fake_binary(bin.path(), "uvicorn");
        fs::write(bin.path().join("gunicorn"), "not executable").unwrap();
        let path = OsString::from(bin.path());

        assert!(check_backend(ServerBackend::Uvicorn, Some(path.as_os_str()), true).passed);
        let gunicorn = check_backend(ServerBackend::Gunicorn, Some(path.as_os_str()), false);
        assert!(gunicorn.passed);
        assert!(gunicorn.message.contains("optional"));

        let missing = check_backend(ServerBackend::Uvicorn, None, true);
        assert!(!missing.passed);
        assert_eq!(missing.suggestions, vec!["Install with: pip install uvicorn"]);
    }

    #[test]
    fn project_file_states() {
        let dir = TempDir::new().unwrap();
        assert!(check_project_file(dir.path()).message.contains("No pyproject.toml"));

        fs::write(dir.path().join(PROJECT_FILE), "[project]\nname = \"x\"\n").unwrap();
        assert!(check_project_file(dir.path()).message.contains("using defaults"));

        fs::write(dir.path().join(PROJECT_FILE), "[tool.fastapi-launcher]\nport = 1\n").unwrap();
        assert!(check_project_file(dir.path()).message.starts_with("Found"));

        fs::write(dir.path().join(PROJECT_FILE), "[tool.fastapi-launcher\n").unwrap();
        assert!(!check_project_file(dir.path()).passed);
    }

    #[test]
    fn report_counts_failures() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROJECT_FILE), "[tool.fastapi-launcher]\nport = 0\n").unwrap();
        let resolver = ConfigResolver::with_env(dir.path(), Vec::new());

        let report = run_all(&resolver, &AppResolver::default());
        assert!(!report.all_passed());
        let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            ["Backend: uvicorn", "Backend: gunicorn", "pyproject.toml", "Configuration", "App path"]
        );
        // uvicorn missing (no PATH), config invalid, app unchecked.
        assert_eq!(report.failed_count(), 3);
        assert_eq!(report.passed_count(), 2);
    }

    #[test]
    fn app_check_lists_candidates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.py"), "print(1)\n").unwrap();
        let result = check_app(&AppResolver::default(), None, dir.path());
        assert!(!result.passed);
        assert_eq!(result.suggestions.last().unwrap(), "Found candidates: app.py");

        fs::write(dir.path().join("app.py"), "app = FastAPI()\n").unwrap();
        let result = check_app(&AppResolver::default(), None, dir.path());
        assert_eq!(result.message, "Auto-discovered app: app:app");
    }
}
