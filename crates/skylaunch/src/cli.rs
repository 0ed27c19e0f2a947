//! Command-line interface for skylaunch

use argh::FromArgs;
use std::collections::HashMap;

/// Launch orchestrator for hierarchical YAML launch descriptions
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the launch file (default: launch/default.launch.yaml)
    #[argh(positional, default = "String::from(\"launch/default.launch.yaml\")")]
    pub launch_file: String,

    /// override launch arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// emit the launch plan as JSON (implies --dry-run)
    #[argh(switch)]
    pub json: bool,

    /// validate launch file and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,

    /// seconds to wait for graceful shutdown before force-killing (default: 5)
    #[argh(option, default = "5")]
    pub grace_period: u64,

    /// directory for node log files (default: logs)
    #[argh(option, default = "String::from(\"logs\")")]
    pub log_dir: String,

    /// colon-separated package search path (default: $SKYLAUNCH_PACKAGE_PATH)
    #[argh(option)]
    pub package_path: Option<String>,

    /// deliver node parameters via environment variables instead of flags
    #[argh(switch)]
    pub env_params: bool,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, ":=").collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

impl LaunchArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }
}
