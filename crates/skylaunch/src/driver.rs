//! Orchestration driver
//!
//! Coordinates one launch invocation: build the tree, run the sequential
//! parameter load phase, then hand the resolved process set to the
//! supervisor. Structural errors abort before anything is spawned, so a
//! build-time failure never leaves a partial process set running.

use crate::config::SubstitutionError;
use crate::params::{ns_join, ParamError, ParamStore, ParamValue};
use crate::registry::PackageRegistry;
use crate::runtime::{RunStatus, Supervisor, SupervisorConfig, SupervisorError};
use crate::tree::{LaunchTree, Location, TreeBuilder, TreeError};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// The orchestration driver
pub struct Driver {
    registry: Arc<dyn PackageRegistry>,
    supervisor_config: SupervisorConfig,
}

impl Driver {
    /// Create a driver over the given package lookup service
    pub fn new(registry: Arc<dyn PackageRegistry>) -> Self {
        Self {
            registry,
            supervisor_config: SupervisorConfig::default(),
        }
    }

    /// Use a non-default supervisor configuration
    pub fn with_supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.supervisor_config = config;
        self
    }

    /// Build the tree and run the load phase, without spawning anything
    pub fn prepare(
        &self,
        launch_file: &Path,
        overrides: HashMap<String, String>,
        cancel: Option<watch::Receiver<()>>,
    ) -> Result<(LaunchTree, ParamStore), LaunchError> {
        let mut builder = TreeBuilder::new(self.registry.clone());
        if let Some(cancel) = cancel {
            builder = builder.with_cancel(cancel);
        }
        let tree = builder.build(launch_file, overrides)?;

        // Load phase: strictly sequential, in resolution order, so later
        // loads observe earlier ones (last-write-wins).
        let mut store = ParamStore::new();
        for load in tree.param_loads() {
            log::info!(
                "Loading parameters from {} into {}",
                load.file.display(),
                load.namespace
            );
            store
                .load_file(&load.namespace, &load.file)
                .map_err(|source| LaunchError::ParamLoad {
                    location: load.location.clone(),
                    source,
                })?;
        }

        // Node-private parameters land after all loads, so the most
        // specific scope wins regardless of document order.
        for spec in tree.processes() {
            for (key, value) in &spec.params {
                let path = ns_join(&spec.name, key);
                store.set(&path, ParamValue::parse_literal(value))?;
            }
        }

        Ok((tree, store))
    }

    /// Run a launch invocation to completion
    pub async fn run(
        &self,
        launch_file: &Path,
        overrides: HashMap<String, String>,
        shutdown_rx: watch::Receiver<()>,
    ) -> Result<RunStatus, LaunchError> {
        let (tree, store) =
            self.prepare(launch_file, overrides, Some(shutdown_rx.clone()))?;

        let specs = tree.processes().into_iter().cloned().collect();
        let mut supervisor = Supervisor::new(self.supervisor_config.clone());
        let status = supervisor.start(specs, &store, shutdown_rx).await?;
        Ok(status)
    }

    /// Produce a launch plan without spawning anything (dry-run mode)
    pub fn plan(
        &self,
        launch_file: &Path,
        overrides: HashMap<String, String>,
    ) -> Result<LaunchPlan, LaunchError> {
        let (tree, store) = self.prepare(launch_file, overrides, None)?;

        let mut args: Vec<PlanArg> = tree
            .args
            .iter()
            .map(|(name, value)| PlanArg {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        args.sort_by(|a, b| a.name.cmp(&b.name));

        let param_loads = tree
            .param_loads()
            .iter()
            .map(|load| PlanParamLoad {
                namespace: load.namespace.clone(),
                file: load.file.clone(),
            })
            .collect();

        let parameters = store
            .leaves()
            .into_iter()
            .map(|(path, value)| PlanParameter {
                path,
                value: value.to_string(),
            })
            .collect();

        let nodes = tree
            .processes()
            .into_iter()
            .map(|spec| PlanNode {
                name: spec.name.clone(),
                executable: spec.executable.clone(),
                args: spec.args.clone(),
                output: format!("{:?}", spec.output).to_lowercase(),
                on_exit: format!("{:?}", spec.on_exit).to_lowercase(),
                params: spec.params.clone(),
            })
            .collect();

        Ok(LaunchPlan {
            args,
            param_loads,
            parameters,
            nodes,
        })
    }
}

/// Launch plan for dry-run mode
#[derive(Debug, Serialize)]
pub struct LaunchPlan {
    /// Root-scope argument bindings, sorted by name
    pub args: Vec<PlanArg>,
    /// Parameter files in load order
    pub param_loads: Vec<PlanParamLoad>,
    /// Flattened parameter store after the load phase
    pub parameters: Vec<PlanParameter>,
    /// Processes in resolution order
    pub nodes: Vec<PlanNode>,
}

/// One resolved argument binding in the plan
#[derive(Debug, Serialize)]
pub struct PlanArg {
    pub name: String,
    pub value: String,
}

/// One parameter load in the plan
#[derive(Debug, Serialize)]
pub struct PlanParamLoad {
    pub namespace: String,
    pub file: PathBuf,
}

/// One resolved parameter in the plan
#[derive(Debug, Serialize)]
pub struct PlanParameter {
    pub path: String,
    pub value: String,
}

/// One process in the plan
#[derive(Debug, Serialize)]
pub struct PlanNode {
    pub name: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub output: String,
    pub on_exit: String,
    pub params: IndexMap<String, String>,
}

impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;

        if !self.args.is_empty() {
            writeln!(f)?;
            writeln!(f, "Arguments:")?;
            for arg in &self.args {
                writeln!(f, "  {} = {}", arg.name, arg.value)?;
            }
        }

        if !self.param_loads.is_empty() {
            writeln!(f)?;
            writeln!(f, "Parameter loads:")?;
            for (i, load) in self.param_loads.iter().enumerate() {
                writeln!(
                    f,
                    "  {}. {} <- {}",
                    i + 1,
                    load.namespace,
                    load.file.display()
                )?;
            }
        }

        if !self.parameters.is_empty() {
            writeln!(f)?;
            writeln!(f, "Parameters:")?;
            for param in &self.parameters {
                writeln!(f, "  {}: {}", param.path, param.value)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Nodes (in launch order):")?;
        for (i, node) in self.nodes.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  {}. {} [{}]", i + 1, node.name, node.on_exit)?;
            writeln!(
                f,
                "     Command: {} {}",
                node.executable.display(),
                node.args.join(" ")
            )?;
            writeln!(f, "     Output: {}", node.output)?;
            if !node.params.is_empty() {
                writeln!(f, "     Params:")?;
                for (key, value) in &node.params {
                    writeln!(f, "       {}={}", key, value)?;
                }
            }
        }

        Ok(())
    }
}

/// Top-level launch error
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Parameter load failed at {location}: {source}")]
    ParamLoad {
        location: Location,
        #[source]
        source: ParamError,
    },

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl LaunchError {
    /// Map the failure kind to a distinct process exit code
    ///
    /// 2 parse/validation, 3 unresolved argument, 4 cyclic include,
    /// 5 package not found, 6 missing file or IO, 7 parameter errors,
    /// 130 interrupted.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Tree(tree) => match tree {
                TreeError::Parse { .. } => 2,
                TreeError::UnresolvedArg { .. } => 3,
                TreeError::Substitution { source, .. } => match source {
                    SubstitutionError::UnresolvedArg(_) => 3,
                    SubstitutionError::PackageNotFound(_) => 5,
                    _ => 2,
                },
                TreeError::CyclicInclude { .. } => 4,
                TreeError::Package { .. } => 5,
                TreeError::Io { .. } => 6,
                TreeError::UnknownArg { .. }
                | TreeError::DuplicateArg { .. }
                | TreeError::DuplicateNode { .. } => 2,
                TreeError::Cancelled => 130,
            },
            LaunchError::ParamLoad { source, .. } | LaunchError::Param(source) => match source {
                ParamError::Io { .. } => 6,
                _ => 7,
            },
            LaunchError::Supervisor(SupervisorError::Param(_)) => 7,
            LaunchError::Supervisor(SupervisorError::LogDir { .. }) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_prepare_runs_loads_then_node_params() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "cfg.yaml", "env: from_load\nrate: 10\n");
        let root = write_file(
            dir.path(),
            "root.launch.yaml",
            &format!(
                r#"
launch:
  - rosparam: {{ command: load, file: "{}/cfg.yaml", ns: agent }}
  - node:
      executable: "/bin/true"
      name: agent
      params: {{ env: "from_node" }}
"#,
                dir.path().display()
            ),
        );

        let driver = Driver::new(Arc::new(StaticRegistry::new()));
        let (_, store) = driver.prepare(&root, HashMap::new(), None).unwrap();

        // Node-level param wins over the outer load for the same path
        assert_eq!(
            store.get("/agent/env").unwrap(),
            &ParamValue::String("from_node".into())
        );
        // Unrelated loaded keys are untouched
        assert_eq!(store.get("/agent/rate").unwrap(), &ParamValue::Int(10));
    }

    #[test]
    fn test_plan_lists_loads_and_nodes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "cfg.yaml", "rate: 1\n");
        let root = write_file(
            dir.path(),
            "root.launch.yaml",
            &format!(
                r#"
launch:
  - rosparam: {{ command: load, file: "{0}/cfg.yaml", ns: sim }}
  - node: {{ executable: "/bin/a", name: first }}
  - node: {{ executable: "/bin/b", name: second }}
"#,
                dir.path().display()
            ),
        );

        let driver = Driver::new(Arc::new(StaticRegistry::new()));
        let plan = driver.plan(&root, HashMap::new()).unwrap();

        assert_eq!(plan.param_loads.len(), 1);
        assert_eq!(plan.param_loads[0].namespace, "/sim");
        let names: Vec<_> = plan.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["/first", "/second"]);

        let rendered = plan.to_string();
        assert!(rendered.contains("Nodes (in launch order):"));
        assert!(serde_json::to_string(&plan).is_ok());
    }

    #[test]
    fn test_exit_codes_by_failure_kind() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::new(Arc::new(StaticRegistry::new()));

        // Parse failure
        let bad = write_file(dir.path(), "bad.launch.yaml", "launch: {not: a list}\n");
        let err = driver.plan(&bad, HashMap::new()).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        // Unresolved argument
        let unresolved = write_file(
            dir.path(),
            "unresolved.launch.yaml",
            "launch:\n  - arg: { name: missing }\n",
        );
        let err = driver.plan(&unresolved, HashMap::new()).unwrap_err();
        assert_eq!(err.exit_code(), 3);

        // Package not found
        let pkg = write_file(
            dir.path(),
            "pkg.launch.yaml",
            "launch:\n  - node: { pkg: nope, type: x, name: n }\n",
        );
        let err = driver.plan(&pkg, HashMap::new()).unwrap_err();
        assert_eq!(err.exit_code(), 5);

        // Missing parameter file
        let missing = write_file(
            dir.path(),
            "missing.launch.yaml",
            "launch:\n  - rosparam: { command: load, file: \"/no/such.yaml\" }\n",
        );
        let err = driver.plan(&missing, HashMap::new()).unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_build_error_spawns_nothing_and_cancel_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let root = write_file(
            dir.path(),
            "root.launch.yaml",
            "launch:\n  - node: { executable: \"/bin/sleep\", args: [\"30\"], name: n }\n",
        );

        let driver = Driver::new(Arc::new(StaticRegistry::new()));
        let (tx, rx) = watch::channel(());
        tx.send(()).unwrap();

        // Shutdown already requested: the build phase aborts immediately
        let err = driver.run(&root, HashMap::new(), rx).await.unwrap_err();
        assert_eq!(err.exit_code(), 130);
    }
}
