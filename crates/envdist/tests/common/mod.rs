//! Test helpers: a scripted in-memory attacher

#![allow(dead_code)]

use envdist::runtime::{
    AttachError, AttachedProcess, Attacher, ProcessDescriptor, Properties, SYSPROP_ENVIRONMENT_ID,
    SYSPROP_LAUNCH_UNIQUE_ID,
};
use envdist::{EnvironmentRegistry, RegistryConfig};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a hanging fake blocks; well above the short test timeouts
pub const HANG: Duration = Duration::from_millis(300);

/// Call timeout used by tests that expect a deadlock
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(50);

/// Scripted behaviour of one fake process
#[derive(Debug, Clone, Default)]
pub struct FakeProcess {
    pub properties: Properties,
    pub endpoint: Option<String>,
    pub hang_on_attach: bool,
    pub hang_on_load: bool,
    pub fail_attach: bool,
}

impl FakeProcess {
    /// A JVM that is not an environment
    pub fn plain() -> Self {
        let mut properties = Properties::new();
        properties.insert("user.dir".to_string(), "/home/dev".to_string());
        Self {
            properties,
            endpoint: Some("service:jmx:rmi:///jndi/plain".to_string()),
            ..Default::default()
        }
    }

    /// A JVM running `environment_id` in `working_directory`
    pub fn environment(environment_id: &str, working_directory: &str) -> Self {
        let mut properties = Properties::new();
        properties.insert(SYSPROP_ENVIRONMENT_ID.to_string(), environment_id.to_string());
        properties.insert("user.dir".to_string(), working_directory.to_string());
        Self {
            properties,
            endpoint: Some(format!("service:jmx:rmi:///jndi/{}", environment_id)),
            ..Default::default()
        }
    }

    pub fn with_launch_id(mut self, launch_id: &str) -> Self {
        self.properties
            .insert(SYSPROP_LAUNCH_UNIQUE_ID.to_string(), launch_id.to_string());
        self
    }

    pub fn without_endpoint(mut self) -> Self {
        self.endpoint = None;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_on_attach = true;
        self
    }

    pub fn hanging_on_load(mut self) -> Self {
        self.hang_on_load = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_attach = true;
        self
    }
}

/// Agent load recorded by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAgent {
    pub process_id: String,
    pub path: PathBuf,
    pub options: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<String, FakeProcess>,
    attach_counts: HashMap<String, usize>,
    loaded_agents: Vec<LoadedAgent>,
}

/// In-memory process table
#[derive(Clone, Default)]
pub struct FakeAttacher {
    state: Arc<Mutex<FakeState>>,
}

impl FakeAttacher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, process_id: &str, process: FakeProcess) {
        self.state
            .lock()
            .unwrap()
            .processes
            .insert(process_id.to_string(), process);
    }

    pub fn remove(&self, process_id: &str) {
        self.state.lock().unwrap().processes.remove(process_id);
    }

    pub fn attach_count(&self, process_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attach_counts
            .get(process_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn loaded_agents(&self) -> Vec<LoadedAgent> {
        self.state.lock().unwrap().loaded_agents.clone()
    }

    pub fn shared(&self) -> Arc<dyn Attacher> {
        Arc::new(self.clone())
    }
}

impl Attacher for FakeAttacher {
    fn list(&self) -> Vec<ProcessDescriptor> {
        self.state
            .lock()
            .unwrap()
            .processes
            .keys()
            .map(|id| ProcessDescriptor::new(id.clone(), "java"))
            .collect()
    }

    fn attach(&self, process_id: &str) -> Result<Box<dyn AttachedProcess>, AttachError> {
        let process = {
            let mut state = self.state.lock().unwrap();
            *state
                .attach_counts
                .entry(process_id.to_string())
                .or_default() += 1;
            state.processes.get(process_id).cloned()
        };

        let process = process.ok_or_else(|| AttachError::ProcessNotFound(process_id.to_string()))?;
        if process.hang_on_attach {
            std::thread::sleep(HANG);
        }
        if process.fail_attach {
            return Err(AttachError::Protocol("attach refused".to_string()));
        }

        Ok(Box::new(FakeAttachedProcess {
            id: process_id.to_string(),
            process,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeAttachedProcess {
    id: String,
    process: FakeProcess,
    state: Arc<Mutex<FakeState>>,
}

impl AttachedProcess for FakeAttachedProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn system_properties(&mut self) -> Result<Properties, AttachError> {
        Ok(self.process.properties.clone())
    }

    fn start_management_agent(&mut self) -> Result<Option<String>, AttachError> {
        Ok(self.process.endpoint.clone())
    }

    fn load_agent(&mut self, path: &Path, options: Option<&str>) -> Result<(), AttachError> {
        if self.process.hang_on_load {
            std::thread::sleep(HANG);
        }
        let payload = std::fs::read(path)?;
        self.state.lock().unwrap().loaded_agents.push(LoadedAgent {
            process_id: self.id.clone(),
            path: path.to_path_buf(),
            options: options.map(str::to_string),
            payload,
        });
        Ok(())
    }

    fn detach(self: Box<Self>) -> Result<(), AttachError> {
        Ok(())
    }
}

/// Open a registry over `attacher` with the default configuration
pub async fn open_registry(attacher: &FakeAttacher) -> EnvironmentRegistry {
    EnvironmentRegistry::open(attacher.shared(), RegistryConfig::default())
        .await
        .expect("Failed to open registry")
}
