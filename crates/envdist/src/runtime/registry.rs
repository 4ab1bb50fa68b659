//! Registry of running environment processes
//!
//! The registry keeps one snapshot of the process ids seen by the previous
//! refresh. A refresh only attaches to ids missing from that snapshot, so
//! every process is classified at most once during its lifetime.

use super::attach::{AttachedProcess, Attacher, ProcessDescriptor};
use super::error::{RegistryError, Result};
use super::guard::{DeadlockPolicy, TimeoutGuard, DEFAULT_CALL_TIMEOUT};
use super::info::EnvironmentRuntimeInfo;
use super::shutdown::{ForcedShutdown, ShutdownAgent, ShutdownCoordinator};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// System property that marks a process as an environment
pub const SYSPROP_ENVIRONMENT_ID: &str = "org.everit.osgi.dev.environmentId";

/// System property carrying the id of the launch that started the process
pub const SYSPROP_LAUNCH_UNIQUE_ID: &str = "org.everit.osgi.dev.launchUniqueId";

/// System property holding the working directory of a JVM
const SYSPROP_USER_DIR: &str = "user.dir";

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Bound of every call into a foreign process
    pub call_timeout: Duration,
    /// Reaction to calls that exceed `call_timeout`
    pub deadlock_policy: DeadlockPolicy,
    /// Marker property holding the environment id
    pub environment_id_property: String,
    /// Marker property holding the launch unique id
    pub launch_id_property: String,
    /// Payload of the shutdown agent
    pub shutdown_agent: Option<ShutdownAgent>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            deadlock_policy: DeadlockPolicy::default(),
            environment_id_property: SYSPROP_ENVIRONMENT_ID.to_string(),
            launch_id_property: SYSPROP_LAUNCH_UNIQUE_ID.to_string(),
            shutdown_agent: None,
        }
    }
}

/// Handle returned by [`EnvironmentRegistry::add_state_change_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Result of looking at one new process
#[derive(Debug)]
enum Classification {
    /// No environment id marker
    Unmanaged,
    /// Environment process without a reachable management endpoint
    NoEndpoint { environment_id: String },
    /// Environment process that does not report `user.dir`
    NoWorkingDirectory { environment_id: String },
    Environment {
        info: EnvironmentRuntimeInfo,
        launch_id: Option<String>,
    },
}

#[derive(Default)]
struct RegistryState {
    closed: bool,
    known_process_ids: HashSet<String>,
    environments: IndexMap<String, IndexSet<EnvironmentRuntimeInfo>>,
    environment_id_by_process_id: HashMap<String, String>,
    launch_id_by_process_id: HashMap<String, String>,
    process_id_by_launch_id: HashMap<String, String>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
}

impl RegistryState {
    fn record(&mut self, info: EnvironmentRuntimeInfo, launch_id: Option<String>) {
        let process_id = info.process_id.clone();

        if let Some(launch_id) = launch_id {
            self.process_id_by_launch_id
                .insert(launch_id.clone(), process_id.clone());
            self.launch_id_by_process_id
                .insert(process_id.clone(), launch_id);
        }

        self.environment_id_by_process_id
            .insert(process_id, info.environment_id.clone());
        self.environments
            .entry(info.environment_id.clone())
            .or_default()
            .replace(info);
    }

    fn remove_process(&mut self, process_id: &str) {
        if let Some(launch_id) = self.launch_id_by_process_id.remove(process_id) {
            self.process_id_by_launch_id.remove(&launch_id);
        }

        let Some(environment_id) = self.environment_id_by_process_id.remove(process_id) else {
            return;
        };

        if let Some(infos) = self.environments.get_mut(&environment_id) {
            infos.retain(|info| info.process_id != process_id);
            if infos.is_empty() {
                self.environments.shift_remove(&environment_id);
            }
        }

        log::info!(
            "Environment '{}' process {} is gone",
            environment_id,
            process_id
        );
    }

    fn clear(&mut self) {
        self.known_process_ids.clear();
        self.environments.clear();
        self.environment_id_by_process_id.clear();
        self.launch_id_by_process_id.clear();
        self.process_id_by_launch_id.clear();
    }
}

/// Tracks processes that run environments.
///
/// Lifecycle: [`open`](Self::open), any number of refreshes and queries, then
/// [`close`](Self::close). All operations share one lock. After `close` every
/// operation is a no-op or returns an empty result.
pub struct EnvironmentRegistry {
    attacher: Arc<dyn Attacher>,
    guard: TimeoutGuard,
    environment_id_property: String,
    launch_id_property: String,
    state: Mutex<RegistryState>,
    shutdown: Mutex<ShutdownCoordinator>,
}

impl EnvironmentRegistry {
    /// Create a registry and run the first refresh
    pub async fn open(attacher: Arc<dyn Attacher>, config: RegistryConfig) -> Result<Self> {
        let registry = Self {
            attacher,
            guard: TimeoutGuard::new(config.call_timeout, config.deadlock_policy),
            environment_id_property: config.environment_id_property,
            launch_id_property: config.launch_id_property,
            state: Mutex::new(RegistryState::default()),
            shutdown: Mutex::new(ShutdownCoordinator::new(config.shutdown_agent)),
        };

        registry.refresh().await?;
        Ok(registry)
    }

    pub fn guard(&self) -> &TimeoutGuard {
        &self.guard
    }

    /// Register a callback that runs after every refresh that changed the set
    /// of alive processes
    pub async fn add_state_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.state.lock().await;
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        id
    }

    pub async fn remove_state_change_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        state.listeners.len() != before
    }

    /// Re-read the process table and classify new processes
    pub async fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }

        let descriptors = self.list_processes().await?;
        let alive: HashSet<String> = descriptors.iter().map(|d| d.id.clone()).collect();

        let new_descriptors: Vec<&ProcessDescriptor> = descriptors
            .iter()
            .filter(|d| !state.known_process_ids.contains(&d.id))
            .collect();

        // applied only once every new process went through, so an escalated
        // timeout leaves the indexes exactly as the snapshot describes them
        let mut found = Vec::new();
        for descriptor in new_descriptors {
            match self.classify(descriptor).await {
                Ok(Some(Classification::Environment { info, launch_id })) => {
                    found.push((info, launch_id));
                }
                Ok(Some(Classification::NoEndpoint { environment_id })) => {
                    log::debug!(
                        "Process {} runs environment '{}' but has no management endpoint",
                        descriptor.id,
                        environment_id
                    );
                }
                Ok(Some(Classification::NoWorkingDirectory { environment_id })) => {
                    log::debug!(
                        "Process {} runs environment '{}' but reports no working directory",
                        descriptor.id,
                        environment_id
                    );
                }
                Ok(Some(Classification::Unmanaged)) | Ok(None) => {}
                Err(e @ RegistryError::TimeoutDeadlock { .. }) => return Err(e),
                Err(e) => {
                    log::debug!("Skipping process {}: {}", descriptor.id, e);
                }
            }
        }

        for (info, launch_id) in found {
            log::info!(
                "Environment '{}' found in process {} ({})",
                info.environment_id,
                info.process_id,
                info.working_directory.display()
            );
            state.record(info, launch_id);
        }

        let gone: Vec<String> = state
            .known_process_ids
            .difference(&alive)
            .cloned()
            .collect();
        for process_id in &gone {
            state.remove_process(process_id);
        }

        let changed = state.known_process_ids != alive;
        state.known_process_ids = alive;

        let listeners: Vec<Listener> = if changed {
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        } else {
            Vec::new()
        };
        drop(state);

        for listener in listeners {
            listener();
        }

        Ok(())
    }

    async fn list_processes(&self) -> Result<Vec<ProcessDescriptor>> {
        let attacher = Arc::clone(&self.attacher);
        let descriptors = tokio::task::spawn_blocking(move || attacher.list())
            .await
            .map_err(|_| RegistryError::WorkerPanicked("process list".to_string()))?;
        Ok(descriptors)
    }

    async fn classify(&self, descriptor: &ProcessDescriptor) -> Result<Option<Classification>> {
        let attacher = Arc::clone(&self.attacher);
        let process_id = descriptor.id.clone();
        let environment_id_property = self.environment_id_property.clone();
        let launch_id_property = self.launch_id_property.clone();

        self.guard
            .call(&descriptor.id, move || {
                let mut process = attacher.attach(&process_id)?;
                let classification = classify_process(
                    process.as_mut(),
                    &environment_id_property,
                    &launch_id_property,
                );
                if let Err(e) = process.detach() {
                    log::debug!("Failed to detach from process {}: {}", process_id, e);
                }
                classification
            })
            .await
    }

    /// Runtime information of an environment whose processes run in
    /// `root_dir` or one of its subdirectories
    pub async fn runtime_informations(
        &self,
        environment_id: &str,
        root_dir: &Path,
    ) -> Vec<EnvironmentRuntimeInfo> {
        let state = self.state.lock().await;
        if state.closed {
            return Vec::new();
        }

        state
            .environments
            .get(environment_id)
            .map(|infos| {
                infos
                    .iter()
                    .filter(|info| info.runs_under(root_dir))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every tracked environment process
    pub async fn all_runtime_informations(&self) -> Vec<EnvironmentRuntimeInfo> {
        let state = self.state.lock().await;
        state.environments.values().flatten().cloned().collect()
    }

    /// Process id of the process started by the given launch
    pub async fn lookup_process_by_launch_id(&self, launch_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.process_id_by_launch_id.get(launch_id).cloned()
    }

    /// Path of the materialized shutdown agent
    pub async fn shutdown_agent_path(&self) -> Result<PathBuf> {
        self.shutdown.lock().await.shutdown_agent_path()
    }

    /// Ask a process to shut down through the shutdown agent
    pub async fn shutdown(&self, process_id: &str, forced: Option<ForcedShutdown>) -> Result<()> {
        let state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }

        let mut coordinator = self.shutdown.lock().await;
        let result = coordinator
            .shutdown(&self.attacher, &self.guard, process_id, forced)
            .await;
        drop(state);
        result
    }

    /// Release the shutdown agent file and forget every process
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.clear();
        state.listeners.clear();
        state.closed = true;
        self.shutdown.lock().await.release();
        log::debug!("Environment registry closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

fn classify_process(
    process: &mut dyn AttachedProcess,
    environment_id_property: &str,
    launch_id_property: &str,
) -> std::result::Result<Classification, super::error::AttachError> {
    let mut properties = process.system_properties()?;

    let Some(environment_id) = properties.remove(environment_id_property) else {
        return Ok(Classification::Unmanaged);
    };

    let Some(working_directory) = properties
        .remove(SYSPROP_USER_DIR)
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
    else {
        return Ok(Classification::NoWorkingDirectory { environment_id });
    };

    let Some(management_endpoint) = process.start_management_agent()? else {
        return Ok(Classification::NoEndpoint { environment_id });
    };

    Ok(Classification::Environment {
        info: EnvironmentRuntimeInfo {
            process_id: process.id().to_string(),
            environment_id,
            management_endpoint,
            working_directory,
        },
        launch_id: properties.remove(launch_id_property),
    })
}
