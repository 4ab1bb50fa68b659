//! Runtime information of a live environment process

use serde::Serialize;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// A process classified as a running environment.
///
/// Two records with the same process id are the same record, whatever their
/// other fields say.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentRuntimeInfo {
    pub process_id: String,
    pub environment_id: String,
    pub management_endpoint: String,
    pub working_directory: PathBuf,
}

impl PartialEq for EnvironmentRuntimeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.process_id == other.process_id
    }
}

impl Eq for EnvironmentRuntimeInfo {}

impl Hash for EnvironmentRuntimeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.process_id.hash(state);
    }
}

impl EnvironmentRuntimeInfo {
    /// True when the working directory is `root_dir` or lies below it
    pub fn runs_under(&self, root_dir: &Path) -> bool {
        self.working_directory
            .ancestors()
            .any(|ancestor| ancestor == root_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(process_id: &str, working_directory: &str) -> EnvironmentRuntimeInfo {
        EnvironmentRuntimeInfo {
            process_id: process_id.to_string(),
            environment_id: "env".to_string(),
            management_endpoint: "service:jmx:rmi://127.0.0.1/stub".to_string(),
            working_directory: PathBuf::from(working_directory),
        }
    }

    #[test]
    fn test_identity_by_process_id() {
        let mut other = info("42", "/a");
        other.management_endpoint = "service:jmx:other".to_string();
        other.working_directory = PathBuf::from("/b");
        assert_eq!(info("42", "/a"), other);
        assert_ne!(info("42", "/a"), info("43", "/a"));
    }

    #[test]
    fn test_runs_under() {
        assert!(info("1", "/a/b").runs_under(Path::new("/a/b")));
        assert!(info("1", "/a/b/c").runs_under(Path::new("/a/b")));
        assert!(info("1", "/a/b/c/").runs_under(Path::new("/a/b/")));
        assert!(!info("1", "/a/x").runs_under(Path::new("/a/b")));
        assert!(!info("1", "/a/bc").runs_under(Path::new("/a/b")));
        assert!(!info("1", "/a").runs_under(Path::new("/a/b")));
    }
}
