//! Locating the application object the backend should serve.
//!
//! Discovery recognises applications by capability, read from the module
//! source: a route host (an object built by `FastAPI(...)` or returned by an
//! app factory call) or a factory function that builds one. An explicit path
//! only needs its attribute bound at module top level; what the binding
//! holds is left for the backend to load.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::model::is_import_path;

pub const CONVENTIONAL_FILES: [&str; 5] =
    ["main.py", "app.py", "api.py", "server.py", "application.py"];
pub const CONVENTIONAL_NAMES: [&str; 3] = ["app", "application", "api"];
pub const SOURCE_DIRS: [&str; 2] = ["", "src"];

/// A `module:attr` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportPath {
    pub module: String,
    pub attr: String,
}

impl ImportPath {
    pub fn new(module: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            attr: attr.into(),
        }
    }

    /// Candidate source files for the module, relative to `root`.
    pub fn module_files(&self, root: &Path) -> [PathBuf; 2] {
        let relative: PathBuf = self.module.split('.').collect();
        [
            root.join(relative.with_extension("py")),
            root.join(&relative).join("__init__.py"),
        ]
    }
}

impl fmt::Display for ImportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.attr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not in 'module:attribute' form")]
pub struct MalformedImportPath(pub String);

impl FromStr for ImportPath {
    type Err = MalformedImportPath;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !is_import_path(value) {
            return Err(MalformedImportPath(value.to_string()));
        }
        let (module, attr) = value
            .rsplit_once(':')
            .ok_or_else(|| MalformedImportPath(value.to_string()))?;
        Ok(ImportPath::new(module, attr))
    }
}

/// What an attribute can do for the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSurface {
    /// An application instance that registers routes.
    RouteHost,
    /// A callable that builds the application.
    Factory,
    /// A top-level name whose value is only known once the module runs.
    Binding,
}

pub trait AppInspector {
    /// `None` when the module cannot be found or exposes neither surface.
    fn inspect(&self, path: &ImportPath, root: &Path) -> Option<AppSurface>;
}

/// Reads module source text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceInspector;

impl AppInspector for SourceInspector {
    fn inspect(&self, path: &ImportPath, root: &Path) -> Option<AppSurface> {
        let source = path
            .module_files(root)
            .iter()
            .find_map(|file| fs::read_to_string(file).ok())?;
        binding_in_source(&source, &path.attr)
    }
}

// Any unindented binding of `attr`: an assignment from any expression, a
// `def` or `class`, or an import that names it.
fn binding_in_source(source: &str, attr: &str) -> Option<AppSurface> {
    let name = regex::escape(attr);
    let definition =
        Regex::new(&format!(r"(?m)^(?:(?:async\s+)?def|class)\s+{name}\b")).ok()?;
    if definition.is_match(source) {
        return Some(AppSurface::Factory);
    }
    let assignment = Regex::new(&format!(r"(?m)^{name}\s*(?::[^=\n]+)?=(?:[^=]|$)")).ok()?;
    if assignment.is_match(source) {
        return Some(AppSurface::Binding);
    }
    let module_alias = Regex::new(&format!(r"(?m)^import\s+[^\n#]*\bas\s+{name}\b")).ok()?;
    if module_alias.is_match(source) {
        return Some(AppSurface::Binding);
    }
    imported_names(source)
        .iter()
        .any(|bound| bound == attr)
        .then_some(AppSurface::Binding)
}

/// Names bound by top-level `from module import ...` statements, including
/// parenthesised lists spanning several lines.
fn imported_names(source: &str) -> Vec<String> {
    let Ok(statement) = Regex::new(
        r"(?m)^from\s+[\w.]+\s+import\s+(?:\(([^)]*)\)|([^\n#]*))",
    ) else {
        return Vec::new();
    };
    statement
        .captures_iter(source)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .flat_map(|list| {
            list.as_str()
                .lines()
                .map(|line| line.split('#').next().unwrap_or_default())
                .flat_map(|line| line.split(','))
                .map(|item| item.trim().trim_end_matches('\\').trim())
                .filter(|item| !item.is_empty())
                .map(|item| match item.split_once(" as ") {
                    Some((_, alias)) => alias.trim().to_string(),
                    None => item.to_string(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn surface_in_source(source: &str, attr: &str) -> Option<AppSurface> {
    let name = regex::escape(attr);
    let route_host = Regex::new(&format!(
        r"(?m)^\s*{name}\s*(?::\s*[\w.\[\]]+\s*)?=\s*(?:[\w.]+\.)?(?:FastAPI|create_app)\("
    ))
    .ok()?;
    if route_host.is_match(source) {
        return Some(AppSurface::RouteHost);
    }
    let factory = Regex::new(&format!(r"(?m)^\s*(?:async\s+)?def\s+{name}\s*\(")).ok()?;
    factory.is_match(source).then_some(AppSurface::Factory)
}

/// Outcome of a discovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub found: Option<ImportPath>,
    /// Conventional files present but without a recognisable application.
    pub candidates: Vec<String>,
}

pub trait DiscoveryStrategy {
    fn discover(&self, root: &Path) -> Discovery;
}

/// Conventional file names in the project root, then `src/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConventionalLayout;

impl DiscoveryStrategy for ConventionalLayout {
    fn discover(&self, root: &Path) -> Discovery {
        let mut discovery = Discovery::default();
        for dir in SOURCE_DIRS {
            for file in CONVENTIONAL_FILES {
                let relative = if dir.is_empty() {
                    PathBuf::from(file)
                } else {
                    Path::new(dir).join(file)
                };
                let Ok(source) = fs::read_to_string(root.join(&relative)) else {
                    continue;
                };
                let module = relative
                    .with_extension("")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(".");
                let found = CONVENTIONAL_NAMES.iter().find(|name| {
                    surface_in_source(&source, name) == Some(AppSurface::RouteHost)
                });
                match found {
                    Some(name) => {
                        discovery.found = Some(ImportPath::new(module, *name));
                        return discovery;
                    }
                    None => discovery.candidates.push(relative.display().to_string()),
                }
            }
        }
        discovery
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApp {
    pub import_path: ImportPath,
    pub discovered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppResolveError {
    #[error("no application found in {}", .root.display())]
    NotFound {
        root: PathBuf,
        candidates: Vec<String>,
    },
    #[error("cannot load application '{path}'")]
    Invalid { path: String },
}

pub struct AppResolver {
    inspector: Box<dyn AppInspector>,
    strategy: Box<dyn DiscoveryStrategy>,
}

impl Default for AppResolver {
    fn default() -> Self {
        Self::new(Box::new(SourceInspector), Box::new(ConventionalLayout))
    }
}

impl AppResolver {
    pub fn new(inspector: Box<dyn AppInspector>, strategy: Box<dyn DiscoveryStrategy>) -> Self {
        Self {
            inspector,
            strategy,
        }
    }

    pub fn validate(&self, path: &str, root: &Path) -> bool {
        match path.parse::<ImportPath>() {
            Ok(import) => self.inspector.inspect(&import, root).is_some(),
            Err(_) => false,
        }
    }

    pub fn discover(&self, root: &Path) -> Discovery {
        self.strategy.discover(root)
    }

    /// Validates `explicit` if given, otherwise discovers.
    pub fn resolve(
        &self,
        explicit: Option<&str>,
        root: &Path,
    ) -> Result<ResolvedApp, AppResolveError> {
        if let Some(path) = explicit {
            if !self.validate(path, root) {
                return Err(AppResolveError::Invalid {
                    path: path.to_string(),
                });
            }
            let import_path = path
                .parse()
                .map_err(|_| AppResolveError::Invalid { path: path.to_string() })?;
            return Ok(ResolvedApp {
                import_path,
                discovered: false,
            });
        }

        let discovery = self.discover(root);
        match discovery.found {
            Some(import_path) => {
                debug!(app = %import_path, "discovered application");
                Ok(ResolvedApp {
                    import_path,
                    discovered: true,
                })
            }
            None => Err(AppResolveError::NotFound {
                root: root.to_path_buf(),
                candidates: discovery.candidates,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn parses_import_paths() {
        let path: ImportPath = "api.main:app".parse().unwrap();
        assert_eq!(path.module, "api.main");
        assert_eq!(path.attr, "app");
        assert_eq!(path.to_string(), "api.main:app");
        assert!("main".parse::<ImportPath>().is_err());
    }

    #[test]
    fn recognises_surfaces() {
        let source = "from fastapi import FastAPI\n\napp: FastAPI = FastAPI(title=\"x\")\n\ndef build():\n    return app\n\nweb = create_app()\n";
        assert_eq!(surface_in_source(source, "app"), Some(AppSurface::RouteHost));
        assert_eq!(surface_in_source(source, "web"), Some(AppSurface::RouteHost));
        assert_eq!(surface_in_source(source, "build"), Some(AppSurface::Factory));
        assert_eq!(surface_in_source(source, "missing"), None);
        assert_eq!(surface_in_source("application = FastAPI()", "app"), None);
    }

    #[test]
    fn validates_explicit_paths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "service/api.py", "import fastapi\napp = fastapi.FastAPI()\n");
        write(dir.path(), "pkg/__init__.py", "async def make_app():\n    ...\n");
        let resolver = AppResolver::default();
        assert!(resolver.validate("service.api:app", dir.path()));
        assert!(resolver.validate("pkg:make_app", dir.path()));
        assert!(!resolver.validate("service.api:router", dir.path()));
        assert!(!resolver.validate("nowhere:app", dir.path()));

        let err = resolver.resolve(Some("nowhere:app"), dir.path()).unwrap_err();
        assert_eq!(err, AppResolveError::Invalid { path: "nowhere:app".into() });
    }

    #[test]
    fn explicit_paths_accept_any_top_level_binding() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "reexport.py", "from api.core import app\n");
        write(dir.path(), "aliased.py", "from api.core import build as app  # noqa\n");
        write(
            dir.path(),
            "grouped.py",
            "from api.core import (\n    settings,\n    web_app as app,\n)\n",
        );
        write(dir.path(), "factory_call.py", "app = get_application()\n");
        write(dir.path(), "wrapped.py", "app = (\n    FastAPI()\n)\n");
        write(dir.path(), "annotated.py", "app: Starlette = build(\n    debug=True,\n)\n");
        write(dir.path(), "classy.py", "class app(FastAPI):\n    pass\n");
        write(dir.path(), "module_alias.py", "import api.core.application as app\n");
        let resolver = AppResolver::default();
        for module in [
            "reexport",
            "aliased",
            "grouped",
            "factory_call",
            "wrapped",
            "annotated",
            "classy",
            "module_alias",
        ] {
            assert!(resolver.validate(&format!("{module}:app"), dir.path()), "{module}");
        }
        let resolved = resolver.resolve(Some("wrapped:app"), dir.path()).unwrap();
        assert_eq!(resolved.import_path.to_string(), "wrapped:app");
        assert!(!resolved.discovered);
    }

    #[test]
    fn explicit_paths_reject_unbound_attributes() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "main.py",
            "from api.core import application\n\ndef build():\n    app = FastAPI()\n    return app\n\nif app == other:\n    pass\n",
        );
        let resolver = AppResolver::default();
        assert!(!resolver.validate("main:app", dir.path()));
        assert!(!resolver.validate("main:api", dir.path()));
        assert!(resolver.validate("main:application", dir.path()));
    }

    #[test]
    fn discovery_still_needs_a_route_host() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "main.py", "from api.core import app\n");
        let err = AppResolver::default().resolve(None, dir.path()).unwrap_err();
        assert!(matches!(err, AppResolveError::NotFound { .. }));
    }

    #[test]
    fn discovers_root_before_src() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.py", "app = FastAPI()\n");
        let resolved = AppResolver::default().resolve(None, dir.path()).unwrap();
        assert_eq!(resolved.import_path.to_string(), "src.main:app");
        assert!(resolved.discovered);

        write(dir.path(), "server.py", "api = FastAPI()\n");
        let resolved = AppResolver::default().resolve(None, dir.path()).unwrap();
        assert_eq!(resolved.import_path.to_string(), "server:api");
    }

    #[test]
    fn reports_candidates_when_nothing_matches() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "main.py", "print('hello')\n");
        let err = AppResolver::default().resolve(None, dir.path()).unwrap_err();
        assert_eq!(
            err,
            AppResolveError::NotFound {
                root: dir.path().to_path_buf(),
                candidates: vec!["main.py".into()],
            }
        );
    }
}
