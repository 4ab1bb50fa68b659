//! Attach capability: enumerate processes and call into them

use super::error::AttachError;
use std::collections::HashMap;
use std::path::Path;

/// System or agent properties read from a process
pub type Properties = HashMap<String, String>;

/// A running process as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessDescriptor {
    pub id: String,
    pub display_name: String,
}

impl ProcessDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Enumerates processes and attaches to them.
///
/// Implementations are called from blocking workers, never from async code
/// directly, so every method may block.
pub trait Attacher: Send + Sync + 'static {
    /// Processes that can currently be attached to
    fn list(&self) -> Vec<ProcessDescriptor>;

    /// Attach to the process with the given id
    fn attach(&self, process_id: &str) -> Result<Box<dyn AttachedProcess>, AttachError>;
}

/// An attached process
pub trait AttachedProcess: Send {
    fn id(&self) -> &str;

    /// System properties of the process
    fn system_properties(&mut self) -> Result<Properties, AttachError>;

    /// Connector address of the local management agent, starting the agent if
    /// it is not running yet. `None` when no endpoint can be obtained.
    fn start_management_agent(&mut self) -> Result<Option<String>, AttachError>;

    /// Load a java agent into the process
    fn load_agent(&mut self, path: &Path, options: Option<&str>) -> Result<(), AttachError>;

    /// Release the attachment
    fn detach(self: Box<Self>) -> Result<(), AttachError>;
}
