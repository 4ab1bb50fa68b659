//! Error types for the runtime registry

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to a foreign process
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Invalid process id: {0}")]
    InvalidProcessId(String),

    #[error("Attaching to processes is not supported on this platform")]
    Unsupported,

    #[error("Attach listener of process {process_id} did not start within {timeout:?}")]
    ListenerNotStarted {
        process_id: String,
        timeout: Duration,
    },

    #[error("Command '{command}' failed with code {code}: {message}")]
    CommandFailed {
        command: String,
        code: i32,
        message: String,
    },

    #[error("Agent initialization failed with return code {0}")]
    AgentInitialization(i32),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors of the environment registry and the shutdown coordinator
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Attach failure: {0}")]
    Attach(#[from] AttachError),

    #[error("Call on process {process_id} did not finish within {timeout:?}")]
    TimeoutDeadlock {
        process_id: String,
        timeout: Duration,
    },

    #[error("Worker calling process {0} panicked")]
    WorkerPanicked(String),

    #[error("No shutdown agent payload configured")]
    ShutdownAgentMissing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
