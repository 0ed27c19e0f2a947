//! Process supervision
//!
//! Spawns the resolved process set in order, multiplexes over process events
//! and the shutdown channel, applies per-node exit policies, and guarantees a
//! fully terminated process set before returning a composite status.

use crate::config::{ExitPolicy, OutputMode};
use crate::params::{ns_join, ParamError, ParamStore};
use crate::runtime::process::{
    OutputSink, ProcessConfig, ProcessEvent, ProcessHandle, ProcessStatus,
};
use crate::tree::ProcessSpec;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// How resolved parameters reach the child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamDelivery {
    /// Inject as `--key value` command line arguments
    #[default]
    CommandLine,
    /// Inject as `SKYPARAM_<KEY>` environment variables
    Environment,
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long to wait between graceful stop and force kill
    pub grace_period: Duration,
    /// Delay before restarting a `respawn` process
    pub respawn_delay: Duration,
    /// Parameter injection policy
    pub param_delivery: ParamDelivery,
    /// Directory for per-node log sinks
    pub log_dir: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            respawn_delay: Duration::from_secs(1),
            param_delivery: ParamDelivery::default(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// A node failure recorded during the run
#[derive(Debug, Clone)]
pub struct NodeFailure {
    /// Fully namespaced node name
    pub name: String,
    /// Exit code, if the process got far enough to have one
    pub code: Option<i32>,
}

/// Composite status of a finished run
#[derive(Debug, Default)]
pub struct RunStatus {
    /// Failures of required nodes and spawn failures
    pub failures: Vec<NodeFailure>,
}

impl RunStatus {
    /// True when no required node failed
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

/// The process supervisor
pub struct Supervisor {
    config: SupervisorConfig,
    handles: IndexMap<String, ProcessHandle>,
    policies: HashMap<String, ExitPolicy>,
    /// Respawns scheduled but not yet handled; keeps the monitor loop alive
    /// while nothing is running but a restart is due
    pending_respawns: usize,
    event_tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    event_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
}

impl Supervisor {
    /// Create a supervisor with the given configuration
    pub fn new(config: SupervisorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            handles: IndexMap::new(),
            policies: HashMap::new(),
            pending_respawns: 0,
            event_tx,
            event_rx,
        }
    }

    /// Run the whole process set to completion
    ///
    /// Spawns every spec in resolution order with its parameters resolved
    /// from the store, supervises until all processes are terminal (or a
    /// shutdown request / required-node failure triggers teardown), and
    /// returns the composite status only once nothing is left running.
    pub async fn start(
        &mut self,
        specs: Vec<ProcessSpec>,
        store: &ParamStore,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> Result<RunStatus, SupervisorError> {
        let needs_log_dir = specs.iter().any(|s| s.output == OutputMode::Log);
        if needs_log_dir {
            std::fs::create_dir_all(&self.config.log_dir).map_err(|e| {
                SupervisorError::LogDir {
                    path: self.config.log_dir.clone(),
                    source: e,
                }
            })?;
        }

        // Resolve all configs before spawning anything, so a missing
        // parameter aborts with nothing started.
        for spec in &specs {
            let config = self.build_config(spec, store)?;
            self.policies.insert(spec.name.clone(), spec.on_exit);
            self.handles.insert(
                spec.name.clone(),
                ProcessHandle::new(config, self.event_tx.clone()),
            );
        }

        let mut status = RunStatus::default();

        // Spawn phase, in resolution order
        let names: Vec<String> = self.handles.keys().cloned().collect();
        for name in names {
            if shutdown_rx.has_changed().unwrap_or(true) {
                log::info!("Shutdown requested, aborting startup");
                self.teardown().await;
                return Ok(status);
            }

            let policy = self.policies[&name];
            let spawn_result = match self.handles.get_mut(&name) {
                Some(handle) => handle.spawn().await,
                None => continue,
            };
            if let Err(e) = spawn_result {
                match policy {
                    ExitPolicy::Required => {
                        log::error!("Required node failed to start: {}", e);
                        status.failures.push(NodeFailure {
                            name: name.clone(),
                            code: None,
                        });
                        self.teardown().await;
                        return Ok(status);
                    }
                    ExitPolicy::Respawn | ExitPolicy::Ignore => {
                        log::warn!("Node failed to start, continuing per policy: {}", e);
                    }
                }
            }
        }

        log::info!("All nodes launched, supervising...");

        // Monitor phase: event-driven, no polling. A scheduled respawn keeps
        // supervision alive even while nothing is currently running.
        loop {
            if !self.any_running() && self.pending_respawns == 0 {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received");
                    self.teardown().await;
                    break;
                }

                event = self.event_rx.recv() => {
                    let Some((name, event)) = event else { break };
                    let done = self
                        .handle_event(name, event, &mut status, &mut shutdown_rx)
                        .await;
                    if done {
                        break;
                    }
                }
            }
        }

        log::info!(
            "Run finished: {}",
            if status.success() { "success" } else { "failure" }
        );
        Ok(status)
    }

    /// Current status of every handle, in spawn order
    pub fn status(&self) -> Vec<(&str, ProcessStatus)> {
        self.handles
            .iter()
            .map(|(name, handle)| (name.as_str(), handle.status))
            .collect()
    }

    /// Build the spawn configuration for one spec, consulting the store for
    /// its private parameters
    fn build_config(
        &self,
        spec: &ProcessSpec,
        store: &ParamStore,
    ) -> Result<ProcessConfig, SupervisorError> {
        let mut args = spec.args.clone();
        let mut env = spec.env.clone();

        for key in spec.params.keys() {
            let path = ns_join(&spec.name, key);
            let value = store.get(&path)?;
            match self.config.param_delivery {
                ParamDelivery::CommandLine => {
                    args.push(format!("--{}", key));
                    args.push(value.to_string());
                }
                ParamDelivery::Environment => {
                    env.insert(
                        format!("SKYPARAM_{}", key.to_uppercase()),
                        value.to_string(),
                    );
                }
            }
        }

        let output = match spec.output {
            OutputMode::Screen => OutputSink::Screen,
            OutputMode::Log => {
                let file_name = format!("{}.log", spec.name.trim_start_matches('/').replace('/', "_"));
                OutputSink::LogFile(self.config.log_dir.join(file_name))
            }
        };

        Ok(ProcessConfig {
            name: spec.name.clone(),
            executable: spec.executable.clone(),
            args,
            env,
            working_dir: spec.cwd.clone(),
            output,
        })
    }

    /// Apply one process event during the monitor phase.
    /// Returns true when supervision is finished.
    async fn handle_event(
        &mut self,
        name: String,
        event: ProcessEvent,
        status: &mut RunStatus,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> bool {
        match event {
            ProcessEvent::Output { line, is_stderr } => {
                if is_stderr {
                    log::warn!("[{}] {}", name, line);
                } else {
                    log::info!("[{}] {}", name, line);
                }
            }
            ProcessEvent::Started { pid } => {
                log::info!("[{}] Started with PID {}", name, pid);
            }
            ProcessEvent::Failed { error } => {
                log::error!("[{}] {}", name, error);
            }
            ProcessEvent::Exited { code } => {
                if let Some(handle) = self.handles.get_mut(&name) {
                    handle.mark_exited(code);
                }
                let policy = self
                    .policies
                    .get(&name)
                    .copied()
                    .unwrap_or(ExitPolicy::Required);

                match policy {
                    ExitPolicy::Required => {
                        // An exit racing a stop request is a requested stop,
                        // not a failure
                        if shutdown_rx.has_changed().unwrap_or(true) {
                            log::info!("[{}] Exited after stop request", name);
                            self.teardown().await;
                            return true;
                        }
                        log::error!(
                            "[{}] Required node exited with code {:?}, tearing down",
                            name,
                            code
                        );
                        status.failures.push(NodeFailure { name, code });
                        self.teardown().await;
                        return true;
                    }
                    ExitPolicy::Respawn => {
                        log::warn!(
                            "[{}] Exited with code {:?}, respawning in {:?}",
                            name,
                            code,
                            self.config.respawn_delay
                        );
                        // The delay runs off-loop so other events and the
                        // shutdown channel stay serviced meanwhile
                        self.pending_respawns += 1;
                        let event_tx = self.event_tx.clone();
                        let delay = self.config.respawn_delay;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = event_tx.send((name, ProcessEvent::RespawnDue));
                        });
                    }
                    ExitPolicy::Ignore => {
                        log::info!("[{}] Exited with code {:?}, continuing", name, code);
                    }
                }
            }
            ProcessEvent::RespawnDue => {
                self.pending_respawns = self.pending_respawns.saturating_sub(1);
                if shutdown_rx.has_changed().unwrap_or(true) {
                    return false;
                }
                if let Some(handle) = self.handles.get_mut(&name) {
                    if !handle.status.is_running() {
                        handle.restart_count += 1;
                        if let Err(e) = handle.spawn().await {
                            log::error!("[{}] Respawn failed: {}", name, e);
                        }
                    }
                }
            }
        }
        false
    }

    /// True while any process is live
    fn any_running(&self) -> bool {
        self.handles.values().any(|h| h.status.is_running())
    }

    /// Stop everything: graceful signal in reverse spawn order, bounded
    /// grace wait, then force-kill survivors. Returns once nothing is live.
    async fn teardown(&mut self) {
        if !self.any_running() {
            return;
        }
        log::info!("Stopping all processes...");

        for (_, handle) in self.handles.iter_mut().rev() {
            if handle.status.is_running() {
                handle.signal_stop();
            }
        }

        let deadline = Instant::now() + self.config.grace_period;
        self.drain_exits_until(deadline).await;

        if self.any_running() {
            for handle in self.handles.values_mut() {
                if handle.status.is_running() {
                    handle.force_kill();
                }
            }
            // SIGKILL cannot be ignored; this bound only covers reaping
            let deadline = Instant::now() + self.config.grace_period;
            self.drain_exits_until(deadline).await;
        }

        log::info!("All processes stopped");
    }

    /// Consume events until every handle is terminal or the deadline passes
    async fn drain_exits_until(&mut self, deadline: Instant) {
        while self.any_running() {
            match tokio::time::timeout_at(deadline, self.event_rx.recv()).await {
                Ok(Some((name, event))) => match event {
                    ProcessEvent::Exited { code } => {
                        log::info!("[{}] Exited with code {:?}", name, code);
                        if let Some(handle) = self.handles.get_mut(&name) {
                            handle.mark_exited(code);
                        }
                    }
                    ProcessEvent::Output { line, is_stderr } => {
                        if is_stderr {
                            log::warn!("[{}] {}", name, line);
                        } else {
                            log::info!("[{}] {}", name, line);
                        }
                    }
                    _ => {}
                },
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }
}

/// Errors that can occur before or while supervising
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error("Failed to create log directory '{path}': {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
