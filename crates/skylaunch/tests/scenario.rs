//! End-to-end launch scenarios
//!
//! Builds a small simulation package on disk (a package directory with
//! config files and an included launch description), then drives the
//! whole pipeline through the public `Driver` API: tree expansion,
//! parameter loading, plan generation, and a real supervised run.

use skylaunch::runtime::SupervisorConfig;
use skylaunch::{Driver, ParamValue, PathRegistry, StaticRegistry};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

/// Lay out a `mavros_gym` package with per-environment configs and an
/// includable agent description, plus a top-level launch file next to it.
fn setup_gym_workspace(root: &Path) -> (PathBuf, PathBuf) {
    let pkg = root.join("mavros_gym");

    write_file(
        &pkg.join("config/envA.yaml"),
        "world: alpha\nwind:\n  speed: 2.5\n",
    );
    write_file(
        &pkg.join("config/envB.yaml"),
        "world: bravo\nwind:\n  speed: 9.0\n",
    );
    write_file(&pkg.join("config/agent_envA.yaml"), "takeoff_alt: 10\n");
    write_file(&pkg.join("config/agent_envB.yaml"), "takeoff_alt: 25\n");

    write_file(
        &pkg.join("launch/agent.launch.yaml"),
        r#"
launch:
  - arg:
      name: env
  - rosparam:
      command: load
      file: "$(find mavros_gym)/config/agent_$(arg env).yaml"
  - node:
      executable: "/bin/true"
      name: agent
      on_exit: ignore
      params:
        env: "$(arg env)"
"#,
    );

    let top = root.join("sim.launch.yaml");
    write_file(
        &top,
        r#"
launch:
  - arg:
      name: env
      default: "envA"
  - rosparam:
      command: load
      file: "$(find mavros_gym)/config/$(arg env).yaml"
      ns: sim
  - include:
      file: "$(find mavros_gym)/launch/agent.launch.yaml"
      ns: agent
      args:
        env: "$(arg env)"
"#,
    );

    (pkg, top)
}

fn gym_driver(root: &Path) -> Driver {
    Driver::new(Arc::new(PathRegistry::new(vec![root.to_path_buf()])))
}

#[test]
fn test_default_environment_selects_env_a() {
    let dir = tempfile::tempdir().unwrap();
    let (_, top) = setup_gym_workspace(dir.path());

    let driver = gym_driver(dir.path());
    let (tree, store) = driver.prepare(&top, HashMap::new(), None).unwrap();

    let loads = tree.param_loads();
    assert_eq!(loads.len(), 2);
    assert!(loads[0].file.ends_with("config/envA.yaml"));
    assert!(loads[1].file.ends_with("config/agent_envA.yaml"));

    assert_eq!(
        store.get("/sim/world").unwrap(),
        &ParamValue::String("alpha".into())
    );
    assert_eq!(store.get("/sim/wind/speed").unwrap(), &ParamValue::Float(2.5));
    assert_eq!(store.get("/agent/takeoff_alt").unwrap(), &ParamValue::Int(10));
    assert_eq!(
        store.get("/agent/agent/env").unwrap(),
        &ParamValue::String("envA".into())
    );
}

#[test]
fn test_override_switches_to_env_b() {
    let dir = tempfile::tempdir().unwrap();
    let (_, top) = setup_gym_workspace(dir.path());

    let driver = gym_driver(dir.path());
    let overrides = HashMap::from([("env".to_string(), "envB".to_string())]);
    let (tree, store) = driver.prepare(&top, overrides, None).unwrap();

    let loads = tree.param_loads();
    assert!(loads[0].file.ends_with("config/envB.yaml"));
    assert!(loads[1].file.ends_with("config/agent_envB.yaml"));

    assert_eq!(
        store.get("/sim/world").unwrap(),
        &ParamValue::String("bravo".into())
    );
    assert_eq!(store.get("/agent/takeoff_alt").unwrap(), &ParamValue::Int(25));
    assert_eq!(
        store.get("/agent/agent/env").unwrap(),
        &ParamValue::String("envB".into())
    );
}

#[test]
fn test_plan_reflects_override() {
    let dir = tempfile::tempdir().unwrap();
    let (_, top) = setup_gym_workspace(dir.path());

    let driver = gym_driver(dir.path());
    let overrides = HashMap::from([("env".to_string(), "envB".to_string())]);
    let plan = driver.plan(&top, overrides).unwrap();

    assert_eq!(plan.args.len(), 1);
    assert_eq!(plan.args[0].name, "env");
    assert_eq!(plan.args[0].value, "envB");

    assert_eq!(plan.nodes.len(), 1);
    assert_eq!(plan.nodes[0].name, "/agent/agent");
    assert_eq!(plan.nodes[0].params.get("env"), Some(&"envB".to_string()));

    let rendered = plan.to_string();
    assert!(rendered.contains("/agent/agent"));
    assert!(rendered.contains("envB"));
}

#[tokio::test]
async fn test_run_to_completion_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let top = dir.path().join("run.launch.yaml");
    write_file(
        &top,
        r#"
launch:
  - node:
      executable: "/bin/sh"
      args: ["-c", "exit 0"]
      name: first
      output: screen
      on_exit: ignore
  - node:
      executable: "/bin/sh"
      args: ["-c", "exit 0"]
      name: second
      output: screen
      on_exit: ignore
"#,
    );

    let driver = Driver::new(Arc::new(StaticRegistry::new())).with_supervisor_config(
        SupervisorConfig {
            grace_period: Duration::from_millis(500),
            ..Default::default()
        },
    );

    let (_tx, rx) = watch::channel(());
    let status = driver.run(&top, HashMap::new(), rx).await.unwrap();
    assert!(status.success());
    assert_eq!(status.exit_code(), 0);
}

#[tokio::test]
async fn test_required_failure_yields_run_failure_code() {
    let dir = tempfile::tempdir().unwrap();
    let top = dir.path().join("fail.launch.yaml");
    write_file(
        &top,
        r#"
launch:
  - node:
      executable: "/bin/sh"
      args: ["-c", "exit 3"]
      name: flaky
      output: screen
      on_exit: required
"#,
    );

    let driver = Driver::new(Arc::new(StaticRegistry::new())).with_supervisor_config(
        SupervisorConfig {
            grace_period: Duration::from_millis(500),
            ..Default::default()
        },
    );

    let (_tx, rx) = watch::channel(());
    let status = driver.run(&top, HashMap::new(), rx).await.unwrap();
    assert!(!status.success());
    assert_eq!(status.exit_code(), 1);
    assert_eq!(status.failures[0].name, "/flaky");
    assert_eq!(status.failures[0].code, Some(3));
}

#[tokio::test]
async fn test_params_injected_on_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("seen_args.txt");
    let top = dir.path().join("inject.launch.yaml");
    write_file(
        &top,
        &format!(
            r#"
launch:
  - node:
      executable: "/bin/sh"
      args: ["-c", "echo \"$@\" > {}", "argv0"]
      name: probe
      output: screen
      on_exit: ignore
      params:
        env: "envA"
"#,
            marker.display()
        ),
    );

    let driver = Driver::new(Arc::new(StaticRegistry::new())).with_supervisor_config(
        SupervisorConfig {
            grace_period: Duration::from_millis(500),
            ..Default::default()
        },
    );

    let (_tx, rx) = watch::channel(());
    let status = driver.run(&top, HashMap::new(), rx).await.unwrap();
    assert!(status.success());

    let seen = std::fs::read_to_string(&marker).unwrap();
    assert!(seen.contains("--env envA"), "got: {}", seen);
}
