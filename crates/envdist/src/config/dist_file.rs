//! Distribution file YAML schema definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the distribution document inside a distribution directory
pub const DIST_FILE_NAME: &str = ".eosgi.dist.yaml";

/// Root distribution file of one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistFile {
    /// Environment id
    pub id: String,

    /// Start level of the framework after launch
    #[serde(default)]
    pub framework_start_level: Option<u32>,

    /// Start level assigned to newly installed bundles
    #[serde(default)]
    pub initial_bundle_start_level: Option<u32>,

    /// Artifacts copied into the distribution
    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    /// Files processed by the parsables pass
    #[serde(default, alias = "parseables")]
    pub parsables: Vec<Parsable>,

    /// Base launch configuration plus its override blocks
    pub launch_config: LaunchConfig,
}

/// An artifact of the distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact coordinates (groupId:artifactId:version)
    pub id: String,
    #[serde(default)]
    pub target_folder: Option<String>,
    #[serde(default)]
    pub target_file: Option<String>,
    /// Present when the artifact is an OSGi bundle
    #[serde(default)]
    pub bundle: Option<BundleData>,
}

/// Bundle related settings of an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleData {
    pub symbolic_name: String,
    pub version: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub action: BundleAction,
    #[serde(default)]
    pub start_level: Option<u32>,
}

/// What the framework does with a bundle on startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BundleAction {
    None,
    Install,
    #[default]
    Start,
}

/// A parsable file of the distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parsable {
    pub path: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Keyed argument. A missing or blank value on an override layer deletes the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentEntry {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl ArgumentEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Entry that removes `key` when applied as an override
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    /// True when the value is missing or empty
    pub fn is_empty(&self) -> bool {
        self.value.as_deref().map_or(true, str::is_empty)
    }

    /// True when the value is missing or whitespace only
    pub fn is_blank(&self) -> bool {
        self.value.as_deref().map_or(true, |v| v.trim().is_empty())
    }
}

/// The three argument categories of a launch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub system_properties: Vec<ArgumentEntry>,
    #[serde(default)]
    pub vm_arguments: Vec<ArgumentEntry>,
    #[serde(default)]
    pub program_arguments: Vec<ArgumentEntry>,
}

/// Base launch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default, alias = "class_path")]
    pub classpath: Option<String>,
    #[serde(default)]
    pub main_jar: Option<String>,
    #[serde(flatten)]
    pub arguments: Arguments,
    /// Usage scoped layers, applied in document order
    #[serde(default)]
    pub overrides: Vec<OverrideBlock>,
}

/// Override layer for one usage context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideBlock {
    pub use_by: UseBy,
    #[serde(flatten)]
    pub arguments: Arguments,
}

/// Consumer of a launch configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UseBy {
    IntegrationTest,
    Parsables,
    Ide,
}

impl UseBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UseBy::IntegrationTest => "INTEGRATION_TEST",
            UseBy::Parsables => "PARSABLES",
            UseBy::Ide => "IDE",
        }
    }
}

impl fmt::Display for UseBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UseBy {
    type Err = String;

    /// Accepts both the document form (`INTEGRATION_TEST`) and the CLI form (`integration-test`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "INTEGRATION_TEST" => Ok(UseBy::IntegrationTest),
            "PARSABLES" | "PARSEABLES" => Ok(UseBy::Parsables),
            "IDE" => Ok(UseBy::Ide),
            _ => Err(format!(
                "Unknown usage context '{}'. Expected one of: ide, integration-test, parsables",
                s
            )),
        }
    }
}

impl DistFile {
    /// Load the distribution file of a distribution directory.
    ///
    /// Returns `Ok(None)` when the directory has no distribution file.
    pub fn from_dist_dir(dist_dir: &Path) -> Result<Option<Self>, DistFileError> {
        let path = dist_dir.join(DIST_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        Self::from_file(&path).map(Some)
    }

    /// Load a distribution file from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, DistFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| DistFileError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a distribution file from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, DistFileError> {
        let dist_file: DistFile = serde_yaml::from_str(content).map_err(DistFileError::Parse)?;
        dist_file.validate()?;
        Ok(dist_file)
    }

    /// Validate the distribution file
    pub fn validate(&self) -> Result<(), DistFileError> {
        if self.id.trim().is_empty() {
            return Err(DistFileError::Validation(
                "environment 'id' must not be empty".to_string(),
            ));
        }

        let categories = std::iter::once(("launch_config", &self.launch_config.arguments)).chain(
            self.launch_config
                .overrides
                .iter()
                .map(|o| ("override", &o.arguments)),
        );
        for (location, arguments) in categories {
            let entries = arguments
                .system_properties
                .iter()
                .chain(&arguments.vm_arguments)
                .chain(&arguments.program_arguments);
            for entry in entries {
                if entry.key.trim().is_empty() {
                    return Err(DistFileError::Validation(format!(
                        "{} of environment '{}' contains an entry without key",
                        location, self.id
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Errors that can occur when loading a distribution file
#[derive(Debug, thiserror::Error)]
pub enum DistFileError {
    #[error("Failed to read distribution file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse distribution file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
