//! Usage-scoped override resolution

use super::dist_file::{
    Arguments, ArgumentEntry, Artifact, DistFile, LaunchConfig, Parsable, UseBy,
};
use super::merge::merge;
use serde::Serialize;

/// Distribution file with the overrides of one usage context applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEnvironment {
    pub id: String,
    pub use_by: UseBy,
    pub framework_start_level: Option<u32>,
    pub initial_bundle_start_level: Option<u32>,
    pub artifacts: Vec<Artifact>,
    pub parsables: Vec<Parsable>,
    pub main_class: Option<String>,
    pub classpath: Option<String>,
    pub main_jar: Option<String>,
    /// Normalized arguments: no blank values, sorted by key
    pub arguments: Arguments,
}

/// Final launch arguments of an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchConfiguration {
    pub main_class: String,
    pub classpath: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_jar: Option<String>,
    pub system_properties: Vec<String>,
    pub vm_arguments: Vec<String>,
    pub program_arguments: Vec<String>,
}

/// Errors that can occur while resolving a launch configuration
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Malformed configuration of environment '{environment}': missing '{field}'")]
    MalformedConfiguration {
        environment: String,
        field: &'static str,
    },
}

/// Apply the override blocks of `use_by` to the arguments of `launch_config`.
///
/// Matching blocks are applied in document order, each category independently.
/// The result has blank entries stripped and every category sorted by key.
pub fn resolve_arguments(launch_config: &LaunchConfig, use_by: UseBy) -> Arguments {
    let mut arguments = launch_config.arguments.clone();

    for block in launch_config.overrides.iter().filter(|o| o.use_by == use_by) {
        arguments.system_properties =
            merge(&arguments.system_properties, &block.arguments.system_properties);
        arguments.vm_arguments = merge(&arguments.vm_arguments, &block.arguments.vm_arguments);
        arguments.program_arguments =
            merge(&arguments.program_arguments, &block.arguments.program_arguments);
    }

    normalize(&mut arguments.system_properties);
    normalize(&mut arguments.vm_arguments);
    normalize(&mut arguments.program_arguments);

    arguments
}

fn normalize(entries: &mut Vec<ArgumentEntry>) {
    entries.retain(|e| !e.is_blank());
    // stable: entries sharing a key keep their relative order
    entries.sort_by(|a, b| a.key.cmp(&b.key));
}

/// Resolve the whole distribution file for one usage context
pub fn resolve_environment(dist: &DistFile, use_by: UseBy) -> ResolvedEnvironment {
    let launch_config = &dist.launch_config;

    ResolvedEnvironment {
        id: dist.id.clone(),
        use_by,
        framework_start_level: dist.framework_start_level,
        initial_bundle_start_level: dist.initial_bundle_start_level,
        artifacts: dist.artifacts.clone(),
        parsables: dist.parsables.clone(),
        main_class: launch_config.main_class.clone(),
        classpath: launch_config.classpath.clone(),
        main_jar: launch_config.main_jar.clone(),
        arguments: resolve_arguments(launch_config, use_by),
    }
}

/// Resolve the launch configuration of a distribution file for one usage context
pub fn resolve(dist: &DistFile, use_by: UseBy) -> Result<LaunchConfiguration, ResolveError> {
    resolve_environment(dist, use_by).launch_configuration()
}

impl ResolvedEnvironment {
    /// Render the resolved arguments into their command line form
    pub fn launch_configuration(&self) -> Result<LaunchConfiguration, ResolveError> {
        let main_class = self.required(&self.main_class, "main_class")?;
        let classpath = self.required(&self.classpath, "classpath")?;

        Ok(LaunchConfiguration {
            main_class,
            classpath,
            main_jar: self.main_jar.clone(),
            system_properties: self
                .arguments
                .system_properties
                .iter()
                .map(render_system_property)
                .collect(),
            vm_arguments: render_values(&self.arguments.vm_arguments),
            program_arguments: render_values(&self.arguments.program_arguments),
        })
    }

    fn required(
        &self,
        value: &Option<String>,
        field: &'static str,
    ) -> Result<String, ResolveError> {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::MalformedConfiguration {
                environment: self.id.clone(),
                field,
            })
    }
}

fn render_system_property(entry: &ArgumentEntry) -> String {
    format!("-D{}={}", entry.key, entry.value.as_deref().unwrap_or_default())
}

fn render_values(entries: &[ArgumentEntry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| e.value.clone())
        .collect()
}

impl LaunchConfiguration {
    /// Check whether this (new) configuration differs from `existing`.
    ///
    /// VM arguments mentioning jacoco are ignored pairwise, as coverage agents
    /// carry a session id that changes on every build.
    pub fn is_changed(&self, existing: Option<&LaunchConfiguration>) -> bool {
        let Some(existing) = existing else {
            return false;
        };

        existing.classpath != self.classpath
            || existing.main_class != self.main_class
            || existing.main_jar != self.main_jar
            || existing.program_arguments != self.program_arguments
            || existing.system_properties != self.system_properties
            || self.vm_arguments_changed(existing)
    }

    fn vm_arguments_changed(&self, existing: &LaunchConfiguration) -> bool {
        if existing.vm_arguments.len() != self.vm_arguments.len() {
            return true;
        }

        existing
            .vm_arguments
            .iter()
            .zip(&self.vm_arguments)
            .any(|(old, new)| old != new && !old.contains("jacoco") && !new.contains("jacoco"))
    }
}
