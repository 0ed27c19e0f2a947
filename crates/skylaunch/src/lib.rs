//! Skylaunch
//!
//! A launch orchestrator for process graphs described by hierarchical
//! YAML launch files.
//!
//! # Overview
//!
//! The launch system allows you to:
//! - Describe processes, parameters, and includes in ordered YAML files
//! - Compose descriptions hierarchically with namespaced includes
//! - Substitute `$(arg ...)`, `$(find ...)`, and `$(env ...)` expressions
//! - Load parameter files into a shared store before anything spawns
//! - Supervise processes with per-node exit policies and graceful teardown
//!
//! # Example Launch File
//!
//! ```yaml
//! version: "1.0"
//!
//! launch:
//!   - arg:
//!       name: env
//!       default: "envA"
//!
//!   - rosparam:
//!       command: load
//!       file: "$(find mavros_gym)/config/$(arg env).yaml"
//!
//!   - include:
//!       file: "$(find mavros_gym)/launch/agent.launch.yaml"
//!       ns: agent
//!       args:
//!         env: "$(arg env)"
//!
//!   - node:
//!       pkg: mavros_gym
//!       type: monitor_node
//!       name: monitor
//!       on_exit: ignore
//! ```

pub mod cli;
pub mod config;
pub mod driver;
pub mod params;
pub mod registry;
pub mod runtime;
pub mod tree;

pub use cli::LaunchArgs;
pub use config::{LaunchFile, LaunchFileError, Resolver, SubstitutionError};
pub use driver::{Driver, LaunchError, LaunchPlan};
pub use params::{ParamError, ParamStore, ParamValue};
pub use registry::{PackageRegistry, PathRegistry, RegistryError, StaticRegistry};
pub use tree::{LaunchTree, ProcessSpec, TreeBuilder, TreeError};
