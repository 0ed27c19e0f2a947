//! Package lookup service
//!
//! Package resolution is an external concern: the engine only asks "where
//! does package X live" and never inspects package contents. The default
//! implementation searches a colon-separated list of root directories, taken
//! from the `SKYLAUNCH_PACKAGE_PATH` environment variable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable holding colon-separated package search roots
pub const PACKAGE_PATH_ENV: &str = "SKYLAUNCH_PACKAGE_PATH";

/// Resolves package names to filesystem paths
pub trait PackageRegistry: Send + Sync {
    /// Find the root directory of a package
    fn find(&self, package: &str) -> Result<PathBuf, RegistryError>;
}

/// Registry that searches a list of root directories for a directory named
/// after the package
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    search_paths: Vec<PathBuf>,
}

impl PathRegistry {
    /// Create a registry over explicit search roots
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Create a registry from the `SKYLAUNCH_PACKAGE_PATH` environment
    /// variable, falling back to the current directory when unset
    pub fn from_env() -> Self {
        let search_paths = match std::env::var(PACKAGE_PATH_ENV) {
            Ok(value) => value
                .split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(_) => vec![PathBuf::from(".")],
        };
        Self { search_paths }
    }

    /// Parse a colon-separated search path string
    pub fn from_search_path(value: &str) -> Self {
        Self {
            search_paths: value
                .split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect(),
        }
    }
}

impl PackageRegistry for PathRegistry {
    fn find(&self, package: &str) -> Result<PathBuf, RegistryError> {
        for root in &self.search_paths {
            let candidate = root.join(package);
            if candidate.is_dir() {
                log::debug!("Resolved package '{}' to {}", package, candidate.display());
                return Ok(candidate);
            }
        }
        Err(RegistryError::PackageNotFound {
            package: package.to_string(),
            searched: self.search_paths.clone(),
        })
    }
}

/// Fixed package map, mainly for tests and embedded setups
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    packages: HashMap<String, PathBuf>,
}

impl StaticRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package at a fixed path
    pub fn with_package(mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.packages
            .insert(name.into(), path.as_ref().to_path_buf());
        self
    }
}

impl PackageRegistry for StaticRegistry {
    fn find(&self, package: &str) -> Result<PathBuf, RegistryError> {
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| RegistryError::PackageNotFound {
                package: package.to_string(),
                searched: Vec::new(),
            })
    }
}

/// Errors from package lookup
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Package '{package}' not found (searched: {})", format_searched(searched))]
    PackageNotFound {
        package: String,
        searched: Vec<PathBuf>,
    },
}

fn format_searched(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no search paths".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
