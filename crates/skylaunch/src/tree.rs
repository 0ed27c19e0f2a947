//! Launch tree construction
//!
//! Expands a root launch description depth-first into a resolved tree:
//! includes are opened recursively with a fresh argument scope (override
//! values from the including scope take precedence over local defaults),
//! namespaces are pushed by `ns:` on includes, and the set of descriptions
//! currently being expanded is tracked explicitly so that include cycles are
//! reported with the full chain instead of overflowing the stack.

use crate::config::{
    LaunchFile, LaunchFileError, LaunchItem, ExitPolicy, OutputMode, Resolver, SubstitutionError,
};
use crate::params::ns_join;
use crate::registry::{PackageRegistry, RegistryError};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Where a resolved item came from, for error reporting
#[derive(Debug, Clone)]
pub struct Location {
    /// The launch description file
    pub file: PathBuf,
    /// The item within it, e.g. `node 'agent'`
    pub element: String,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}", self.element, self.file.display())
    }
}

/// A resolved launch tree
///
/// Subtrees are owned exclusively by their parent; dropping the root tears
/// down the whole structure.
#[derive(Debug)]
pub struct LaunchTree {
    /// The description this tree was expanded from
    pub file: PathBuf,
    /// Absolute namespace prefix for everything defined here
    pub namespace: String,
    /// Argument bindings this scope resolved to
    pub args: HashMap<String, String>,
    /// Resolved items in document order
    pub items: Vec<TreeItem>,
}

/// One resolved item in the tree
#[derive(Debug)]
pub enum TreeItem {
    /// A parameter file to load during the load phase
    ParamLoad(ParamLoad),
    /// A process to spawn during the run phase
    Process(ProcessSpec),
    /// An expanded include
    Include(Box<LaunchTree>),
}

/// A resolved `rosparam load`
#[derive(Debug, Clone)]
pub struct ParamLoad {
    /// Absolute namespace the file's mapping lands under
    pub namespace: String,
    /// Resolved path of the parameter file
    pub file: PathBuf,
    /// Source of this directive
    pub location: Location,
}

/// A fully resolved process declaration
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Fully namespaced node name, e.g. `/sim/agent`
    pub name: String,
    /// Package the executable came from, if any
    pub package: Option<String>,
    /// Resolved executable path
    pub executable: PathBuf,
    /// Raw command line arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Output handling
    pub output: OutputMode,
    /// Exit policy
    pub on_exit: ExitPolicy,
    /// Node-private parameters as resolved literals, in declaration order
    pub params: IndexMap<String, String>,
    /// Source of this declaration
    pub location: Location,
}

impl LaunchTree {
    /// All parameter loads, depth-first in resolution order
    pub fn param_loads(&self) -> Vec<&ParamLoad> {
        let mut out = Vec::new();
        self.collect(&mut |item| {
            if let TreeItem::ParamLoad(load) = item {
                out.push(load);
            }
        });
        out
    }

    /// All process specs, depth-first in resolution order
    pub fn processes(&self) -> Vec<&ProcessSpec> {
        let mut out = Vec::new();
        self.collect(&mut |item| {
            if let TreeItem::Process(spec) = item {
                out.push(spec);
            }
        });
        out
    }

    fn collect<'a>(&'a self, visit: &mut impl FnMut(&'a TreeItem)) {
        for item in &self.items {
            visit(item);
            if let TreeItem::Include(subtree) = item {
                subtree.collect(visit);
            }
        }
    }
}

/// Builds resolved launch trees from description files
pub struct TreeBuilder {
    registry: Arc<dyn PackageRegistry>,
    cancel: Option<watch::Receiver<()>>,
}

impl TreeBuilder {
    /// Create a builder using the given package lookup service
    pub fn new(registry: Arc<dyn PackageRegistry>) -> Self {
        Self {
            registry,
            cancel: None,
        }
    }

    /// Abort expansion when the channel reports a shutdown request
    pub fn with_cancel(mut self, cancel: watch::Receiver<()>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Expand a root description into a resolved tree
    pub fn build(
        &self,
        root_file: &Path,
        overrides: HashMap<String, String>,
    ) -> Result<LaunchTree, TreeError> {
        let mut active = Vec::new();
        let mut node_names = HashSet::new();
        self.expand(root_file, "/", overrides, &mut active, &mut node_names)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|rx| rx.has_changed().unwrap_or(true))
            .unwrap_or(false)
    }

    fn expand(
        &self,
        file: &Path,
        namespace: &str,
        overrides: HashMap<String, String>,
        active: &mut Vec<PathBuf>,
        node_names: &mut HashSet<String>,
    ) -> Result<LaunchTree, TreeError> {
        if self.cancelled() {
            return Err(TreeError::Cancelled);
        }

        let canonical = file.canonicalize().map_err(|e| TreeError::Io {
            path: file.to_path_buf(),
            source: e,
        })?;

        if active.contains(&canonical) {
            let mut chain = active.clone();
            chain.push(canonical);
            return Err(TreeError::CyclicInclude { chain });
        }

        let launch_file = LaunchFile::from_file(file).map_err(|source| TreeError::Parse {
            file: file.to_path_buf(),
            source,
        })?;

        active.push(canonical);
        let result = self.expand_items(
            file,
            &launch_file,
            namespace,
            &overrides,
            active,
            node_names,
        );
        active.pop();

        let (items, args) = result?;

        Ok(LaunchTree {
            file: file.to_path_buf(),
            namespace: namespace.to_string(),
            args,
            items,
        })
    }

    fn expand_items(
        &self,
        file: &Path,
        launch_file: &LaunchFile,
        namespace: &str,
        overrides: &HashMap<String, String>,
        active: &mut Vec<PathBuf>,
        node_names: &mut HashSet<String>,
    ) -> Result<(Vec<TreeItem>, HashMap<String, String>), TreeError> {
        let mut resolver = Resolver::new(self.registry.clone());
        let mut items = Vec::new();

        for item in &launch_file.launch {
            if self.cancelled() {
                return Err(TreeError::Cancelled);
            }

            let location = Location {
                file: file.to_path_buf(),
                element: item.describe(),
            };

            match item {
                LaunchItem::Arg(decl) => {
                    // Override from the including scope wins over the local
                    // default; bindings are immutable once resolved.
                    let value = match overrides.get(&decl.name) {
                        Some(value) => value.clone(),
                        None => match &decl.default {
                            Some(default) => default.as_str(),
                            None => {
                                return Err(TreeError::UnresolvedArg {
                                    name: decl.name.clone(),
                                    location,
                                })
                            }
                        },
                    };
                    if !resolver.bind_arg(decl.name.clone(), value) {
                        return Err(TreeError::DuplicateArg {
                            name: decl.name.clone(),
                            location,
                        });
                    }
                }

                LaunchItem::Rosparam(decl) => {
                    let param_file = self.resolve(&resolver, &decl.file, &location)?;
                    let target_ns = match &decl.ns {
                        Some(ns) => {
                            let resolved = self.resolve(&resolver, ns, &location)?;
                            ns_join(namespace, &resolved)
                        }
                        None => namespace.to_string(),
                    };
                    items.push(TreeItem::ParamLoad(ParamLoad {
                        namespace: target_ns,
                        file: PathBuf::from(param_file),
                        location,
                    }));
                }

                LaunchItem::Include(decl) => {
                    let included_file = self.resolve(&resolver, &decl.file, &location)?;

                    // Override values resolve in the including scope
                    let mut child_overrides = HashMap::new();
                    for (name, expr) in &decl.args {
                        let value = self.resolve(&resolver, expr, &location)?;
                        child_overrides.insert(name.clone(), value);
                    }

                    let child_ns = match &decl.ns {
                        Some(ns) => {
                            let resolved = self.resolve(&resolver, ns, &location)?;
                            ns_join(namespace, &resolved)
                        }
                        None => namespace.to_string(),
                    };

                    let subtree = self.expand(
                        Path::new(&included_file),
                        &child_ns,
                        child_overrides,
                        active,
                        node_names,
                    )?;
                    items.push(TreeItem::Include(Box::new(subtree)));
                }

                LaunchItem::Node(decl) => {
                    let name = self.resolve(&resolver, &decl.name, &location)?;
                    let full_name = ns_join(namespace, &name);
                    if !node_names.insert(full_name.clone()) {
                        return Err(TreeError::DuplicateNode {
                            name: full_name,
                            location,
                        });
                    }

                    let (package, executable) = match (&decl.pkg, &decl.node_type) {
                        (Some(pkg), Some(node_type)) => {
                            let pkg = self.resolve(&resolver, pkg, &location)?;
                            let node_type = self.resolve(&resolver, node_type, &location)?;
                            let pkg_root = self.registry.find(&pkg).map_err(|source| {
                                TreeError::Package {
                                    location: location.clone(),
                                    source,
                                }
                            })?;
                            (Some(pkg), pkg_root.join(node_type))
                        }
                        _ => {
                            // Validation guarantees `executable` is set here
                            let exec = decl.executable.as_deref().unwrap_or_default();
                            let exec = self.resolve(&resolver, exec, &location)?;
                            (None, PathBuf::from(exec))
                        }
                    };

                    let mut args = Vec::with_capacity(decl.args.len());
                    for arg in &decl.args {
                        args.push(self.resolve(&resolver, arg, &location)?);
                    }

                    let mut env = HashMap::new();
                    for (key, value) in &decl.env {
                        env.insert(key.clone(), self.resolve(&resolver, value, &location)?);
                    }

                    let cwd = match &decl.cwd {
                        Some(dir) => Some(PathBuf::from(self.resolve(&resolver, dir, &location)?)),
                        None => None,
                    };

                    let mut params = IndexMap::new();
                    for (key, expr) in &decl.params {
                        params.insert(key.clone(), self.resolve(&resolver, expr, &location)?);
                    }

                    items.push(TreeItem::Process(ProcessSpec {
                        name: full_name,
                        package,
                        executable,
                        args,
                        env,
                        cwd,
                        output: decl.output,
                        on_exit: decl.on_exit,
                        params,
                        location,
                    }));
                }
            }
        }

        // Overrides naming an argument this description never declares are
        // an error, not a silent no-op.
        for name in overrides.keys() {
            if !resolver.has_arg(name) {
                return Err(TreeError::UnknownArg {
                    name: name.clone(),
                    file: file.to_path_buf(),
                });
            }
        }

        Ok((items, resolver.bindings().clone()))
    }

    fn resolve(
        &self,
        resolver: &Resolver,
        input: &str,
        location: &Location,
    ) -> Result<String, TreeError> {
        resolver
            .resolve(input)
            .map_err(|source| TreeError::Substitution {
                location: location.clone(),
                source,
            })
    }
}

/// Errors that can occur while building the launch tree
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Failed to load launch description '{file}': {source}")]
    Parse {
        file: PathBuf,
        #[source]
        source: LaunchFileError,
    },

    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cyclic include: {}", format_chain(chain))]
    CyclicInclude { chain: Vec<PathBuf> },

    #[error("Unresolved argument '{name}' ({location}): no default and no override supplied")]
    UnresolvedArg { name: String, location: Location },

    #[error("Duplicate declaration of argument '{name}' ({location})")]
    DuplicateArg { name: String, location: Location },

    #[error("Override for unknown argument '{name}' passed to {}", file.display())]
    UnknownArg { name: String, file: PathBuf },

    #[error("Duplicate node name '{name}' ({location}); use include namespaces to disambiguate")]
    DuplicateNode { name: String, location: Location },

    #[error("Substitution failed at {location}: {source}")]
    Substitution {
        location: Location,
        #[source]
        source: SubstitutionError,
    },

    #[error("Package lookup failed at {location}: {source}")]
    Package {
        location: Location,
        #[source]
        source: RegistryError,
    },

    #[error("Launch aborted by shutdown request")]
    Cancelled,
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
