//! Process supervision runtime

pub mod process;
pub mod supervisor;

pub use process::{OutputSink, ProcessConfig, ProcessError, ProcessEvent, ProcessHandle, ProcessStatus};
pub use supervisor::{
    NodeFailure, ParamDelivery, RunStatus, Supervisor, SupervisorConfig, SupervisorError,
};
