//! Remote shutdown through an injected java agent
//!
//! The coordinator never signals or kills the target itself. The shutdown
//! agent runs inside the target and performs the graceful exit, or the halt
//! after the forced timeout.

use super::attach::Attacher;
use super::error::{RegistryError, Result};
use super::guard::TimeoutGuard;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;

const AGENT_FILE_PREFIX: &str = "eosgi-shutdownJavaAgent";

/// Where the shutdown agent payload comes from
#[derive(Debug, Clone)]
pub enum ShutdownAgent {
    /// Agent jar bytes held in memory
    Bytes(Arc<[u8]>),
    /// Agent jar on disk, copied on first use
    File(PathBuf),
}

impl ShutdownAgent {
    fn read(&self) -> std::io::Result<std::borrow::Cow<'_, [u8]>> {
        match self {
            ShutdownAgent::Bytes(bytes) => Ok(std::borrow::Cow::Borrowed(&bytes[..])),
            ShutdownAgent::File(path) => std::fs::read(path).map(std::borrow::Cow::Owned),
        }
    }
}

/// Forced shutdown parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcedShutdown {
    /// How long the agent waits for the graceful exit
    pub timeout_ms: u64,
    /// Exit code used when the agent halts the process
    pub halt_code: i32,
}

impl ForcedShutdown {
    /// Agent options understood by the shutdown agent
    pub fn agent_options(&self) -> String {
        format!("timeout={},haltcode={}", self.timeout_ms, self.halt_code)
    }
}

/// Materializes the shutdown agent and loads it into target processes
#[derive(Debug)]
pub struct ShutdownCoordinator {
    agent: Option<ShutdownAgent>,
    agent_file: Option<NamedTempFile>,
}

impl ShutdownCoordinator {
    pub fn new(agent: Option<ShutdownAgent>) -> Self {
        Self {
            agent,
            agent_file: None,
        }
    }

    /// Path of the materialized agent. The temp file is written on the first
    /// call and reused afterwards.
    pub fn shutdown_agent_path(&mut self) -> Result<PathBuf> {
        if let Some(file) = &self.agent_file {
            return Ok(file.path().to_path_buf());
        }

        let agent = self
            .agent
            .as_ref()
            .ok_or(RegistryError::ShutdownAgentMissing)?;
        let payload = agent.read()?;

        let mut file = tempfile::Builder::new()
            .prefix(AGENT_FILE_PREFIX)
            .suffix(".jar")
            .tempfile()?;
        file.write_all(&payload)?;
        file.flush()?;

        let path = file.path().to_path_buf();
        log::debug!("Shutdown agent written to {}", path.display());
        self.agent_file = Some(file);
        Ok(path)
    }

    /// Ask a process to shut down.
    ///
    /// Without `forced` the agent starts an orderly shutdown. With `forced`
    /// the agent additionally halts the process with the given code when it
    /// is still alive after the timeout.
    pub async fn shutdown(
        &mut self,
        attacher: &Arc<dyn Attacher>,
        guard: &TimeoutGuard,
        process_id: &str,
        forced: Option<ForcedShutdown>,
    ) -> Result<()> {
        let agent_path = self.shutdown_agent_path()?;
        let options = forced.map(|f| f.agent_options());

        log::info!(
            "Shutting down process {} ({})",
            process_id,
            options.as_deref().unwrap_or("graceful")
        );

        let attacher = Arc::clone(attacher);
        let target = process_id.to_string();
        guard
            .call(process_id, move || {
                let mut process = attacher.attach(&target)?;
                let loaded = process.load_agent(&agent_path, options.as_deref());
                if let Err(e) = process.detach() {
                    log::debug!("Failed to detach from process {}: {}", target, e);
                }
                loaded
            })
            .await?;

        Ok(())
    }

    /// Delete the materialized agent file
    pub fn release(&mut self) {
        if let Some(file) = self.agent_file.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                log::warn!("Failed to delete shutdown agent {}: {}", path.display(), e);
            }
        }
    }

    /// Whether the agent file has been materialized
    pub fn is_materialized(&self) -> bool {
        self.agent_file.is_some()
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        self.release();
    }
}
