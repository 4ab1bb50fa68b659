//! Environment distribution tooling
//!
//! Tracks running OSGi environment processes and computes the launch
//! arguments an environment receives for a given usage context.
//!
//! # Overview
//!
//! - [`EnvironmentRegistry`] discovers JVMs, classifies the ones that carry an
//!   environment id marker, and tracks them across refreshes
//! - [`TimeoutGuard`] bounds every call into a foreign process
//! - [`ShutdownCoordinator`] injects the shutdown agent (graceful or forced)
//! - [`resolve`] applies usage-scoped override blocks to a base launch config
//!
//! # Example Distribution File
//!
//! ```yaml
//! id: equinoxtest
//! launch_config:
//!   main_class: org.eclipse.core.runtime.adaptor.EclipseStarter
//!   classpath: "bin/org.eclipse.osgi.jar"
//!   vm_arguments:
//!     - key: debug
//!       value: "-Xdebug"
//!   overrides:
//!     - use_by: IDE
//!       vm_arguments:
//!         - key: debug
//! ```

pub mod cli;
pub mod config;
pub mod runtime;

pub use cli::CliArgs;
pub use config::{
    merge, merge_defaults, merge_overrides, resolve, resolve_environment, ArgumentEntry,
    DistFile, DistFileError, LaunchConfig, LaunchConfiguration, OverrideBlock, ResolveError,
    ResolvedEnvironment, UseBy,
};
pub use runtime::{
    AttachError, AttachedProcess, Attacher, DeadlockEvent, DeadlockPolicy, EnvironmentRegistry,
    EnvironmentRuntimeInfo, ForcedShutdown, ListenerId, ProcessDescriptor, RegistryConfig,
    RegistryError, ShutdownAgent, ShutdownCoordinator, TimeoutGuard,
};
