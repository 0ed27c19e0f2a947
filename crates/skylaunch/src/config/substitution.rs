//! Substitution engine for $(arg), $(find), $(env) patterns
//!
//! Resolution is a single textual pass over the input: expressions embedded
//! in literal text are each replaced exactly once, and the replacement text
//! is never re-scanned for further expressions. A value that happens to
//! contain `$(...)` therefore stays literal instead of triggering another
//! round of resolution.

use crate::registry::{PackageRegistry, RegistryError};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Regex for matching substitution patterns: $(type value)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)\s+([^)]+)\)|\$\((\w+)\)").unwrap());

/// Resolves substitution expressions against one scope's argument bindings
///
/// Bindings are immutable once the resolver is built; the tree builder
/// constructs a fresh resolver per included description. Resolution is a pure
/// function of the binding table, the environment, and the package registry.
#[derive(Clone)]
pub struct Resolver {
    /// Resolved argument bindings for this scope
    args: HashMap<String, String>,
    /// Environment overrides consulted before the process environment
    env: HashMap<String, String>,
    /// External package lookup service
    registry: Arc<dyn PackageRegistry>,
}

impl Resolver {
    /// Create a resolver with an empty binding table
    pub fn new(registry: Arc<dyn PackageRegistry>) -> Self {
        Self {
            args: HashMap::new(),
            env: HashMap::new(),
            registry,
        }
    }

    /// Add an argument binding
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add an environment override
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Check whether an argument is bound in this scope
    pub fn has_arg(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    /// Bind an argument in place; returns false if the name is already bound
    pub fn bind_arg(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.args.contains_key(&name) {
            return false;
        }
        self.args.insert(name, value.into());
        true
    }

    /// The current binding table
    pub fn bindings(&self) -> &HashMap<String, String> {
        &self.args
    }

    /// Resolve all substitution expressions in a string
    pub fn resolve(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = SUBSTITUTION_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }

            match self.resolve_capture(caps) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Resolve a single capture group
    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        // Pattern 1: $(type value) - e.g., $(arg env)
        if let (Some(subst_type), Some(value)) = (caps.get(1), caps.get(2)) {
            return self.resolve_typed(subst_type.as_str(), value.as_str().trim());
        }

        // Pattern 2: $(type) with no operand - always invalid here
        if let Some(subst_type) = caps.get(3) {
            return Err(SubstitutionError::MissingOperand(
                subst_type.as_str().to_string(),
            ));
        }

        Err(SubstitutionError::InvalidPattern(
            caps.get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        ))
    }

    /// Resolve a typed substitution
    fn resolve_typed(&self, subst_type: &str, value: &str) -> Result<String, SubstitutionError> {
        match subst_type {
            "arg" => self.resolve_arg(value),
            "find" => self.resolve_find(value),
            "env" => self.resolve_env(value),
            _ => Err(SubstitutionError::UnknownType(subst_type.to_string())),
        }
    }

    /// Resolve an argument reference
    fn resolve_arg(&self, name: &str) -> Result<String, SubstitutionError> {
        self.args
            .get(name)
            .cloned()
            .ok_or_else(|| SubstitutionError::UnresolvedArg(name.to_string()))
    }

    /// Resolve a package-path lookup
    fn resolve_find(&self, package: &str) -> Result<String, SubstitutionError> {
        let path = self.registry.find(package)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Resolve an environment variable reference
    fn resolve_env(&self, name: &str) -> Result<String, SubstitutionError> {
        // Local overrides take precedence over the process environment
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }

        std::env::var(name).map_err(|_| SubstitutionError::UndefinedEnv(name.to_string()))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("args", &self.args)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Unresolved argument '{0}': no default and no override supplied")]
    UnresolvedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error(transparent)]
    PackageNotFound(#[from] RegistryError),

    #[error("Substitution '$({0})' is missing an operand")]
    MissingOperand(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),
}
