//! Skylaunch CLI
//!
//! Usage:
//!   skylaunch launch/default.launch.yaml
//!   skylaunch launch/default.launch.yaml -a env:=envB
//!   skylaunch launch/default.launch.yaml --dry-run

use skylaunch::runtime::{ParamDelivery, SupervisorConfig};
use skylaunch::{Driver, LaunchArgs, LaunchFile, PathRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    // Validate only mode: parse and check a single file, no expansion
    if args.validate {
        match LaunchFile::from_file(Path::new(&args.launch_file)) {
            Ok(launch_file) => {
                println!("Launch file '{}' is valid", args.launch_file);
                println!("  Version: {}", launch_file.version);
                println!("  Items: {}", launch_file.launch.len());
                return;
            }
            Err(e) => {
                log::error!("Validation failed: {}", e);
                std::process::exit(2);
            }
        }
    }

    let registry = match &args.package_path {
        Some(value) => PathRegistry::from_search_path(value),
        None => PathRegistry::from_env(),
    };

    let param_delivery = if args.env_params {
        ParamDelivery::Environment
    } else {
        ParamDelivery::CommandLine
    };

    let driver = Driver::new(Arc::new(registry)).with_supervisor_config(SupervisorConfig {
        grace_period: Duration::from_secs(args.grace_period),
        log_dir: PathBuf::from(&args.log_dir),
        param_delivery,
        ..Default::default()
    });

    let launch_file = PathBuf::from(&args.launch_file);
    let overrides = args.arg_overrides();

    // Dry run mode: resolve the full tree and print the plan
    if args.dry_run || args.json {
        match driver.plan(&launch_file, overrides) {
            Ok(plan) => {
                if args.json {
                    match serde_json::to_string_pretty(&plan) {
                        Ok(json) => println!("{}", json),
                        Err(e) => {
                            log::error!("Failed to serialize launch plan: {}", e);
                            std::process::exit(1);
                        }
                    }
                } else {
                    println!("{}", plan);
                }
                return;
            }
            Err(e) => {
                log::error!("Failed to generate launch plan: {}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Failed to set Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    log::info!("Loading launch file: {}", args.launch_file);
    match driver.run(&launch_file, overrides, shutdown_rx).await {
        Ok(status) => {
            if status.success() {
                log::info!("All nodes finished, exiting");
            } else {
                for failure in &status.failures {
                    log::error!(
                        "Node {} failed with exit code {:?}",
                        failure.name,
                        failure.code
                    );
                }
            }
            std::process::exit(status.exit_code());
        }
        Err(e) => {
            log::error!("Launch failed: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
