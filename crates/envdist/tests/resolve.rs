//! Resolving launch configurations from distribution directories on disk

use envdist::config::DIST_FILE_NAME;
use envdist::{resolve, resolve_environment, DistFile, UseBy};

const DIST: &str = r#"
id: equinoxtest
framework_start_level: 4
artifacts:
  - id: org.eclipse.platform:org.eclipse.osgi:3.13.0
    target_folder: bin
    bundle:
      symbolic_name: org.eclipse.osgi
      version: 3.13.0
parseables:
  - path: bin/runConsole.sh
launch_config:
  main_class: org.eclipse.core.runtime.adaptor.EclipseStarter
  classpath: bin/org.eclipse.osgi.jar
  system_properties:
    - key: osgi.console
      value: "5555"
    - key: eosgi.testEnvironment
      value: equinoxtest
  vm_arguments:
    - key: xmx
      value: -Xmx256m
    - key: debug
      value: -agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=4000
  program_arguments:
    - key: console
      value: -console
  overrides:
    - use_by: IDE
      vm_arguments:
        - key: debug
    - use_by: INTEGRATION_TEST
      system_properties:
        - key: osgi.console
        - key: eosgi.testRunner
          value: junit4
      program_arguments:
        - key: console
          value: "  "
"#;

fn write_dist() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(DIST_FILE_NAME), DIST).unwrap();
    dir
}

#[test]
fn test_missing_dist_file_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DistFile::from_dist_dir(dir.path()).unwrap().is_none());
}

#[test]
fn test_ide_resolution_from_disk() {
    let dir = write_dist();
    let dist = DistFile::from_dist_dir(dir.path()).unwrap().unwrap();

    let launch = resolve(&dist, UseBy::Ide).unwrap();
    assert_eq!(launch.main_class, "org.eclipse.core.runtime.adaptor.EclipseStarter");
    assert_eq!(launch.classpath, "bin/org.eclipse.osgi.jar");
    assert_eq!(
        launch.system_properties,
        vec!["-Deosgi.testEnvironment=equinoxtest", "-Dosgi.console=5555"]
    );
    assert_eq!(launch.vm_arguments, vec!["-Xmx256m"]);
    assert_eq!(launch.program_arguments, vec!["-console"]);
}

#[test]
fn test_integration_test_resolution_from_disk() {
    let dir = write_dist();
    let dist = DistFile::from_dist_dir(dir.path()).unwrap().unwrap();

    let resolved = resolve_environment(&dist, UseBy::IntegrationTest);
    assert_eq!(resolved.id, "equinoxtest");
    assert_eq!(resolved.framework_start_level, Some(4));
    assert_eq!(resolved.artifacts.len(), 1);
    assert_eq!(resolved.parsables.len(), 1);

    let launch = resolved.launch_configuration().unwrap();
    assert_eq!(
        launch.system_properties,
        vec!["-Deosgi.testEnvironment=equinoxtest", "-Deosgi.testRunner=junit4"]
    );
    assert_eq!(launch.vm_arguments.len(), 2);
    assert!(launch.program_arguments.is_empty());
}

#[test]
fn test_parsables_context_keeps_base_arguments() {
    let dir = write_dist();
    let dist = DistFile::from_dist_dir(dir.path()).unwrap().unwrap();

    let launch = resolve(&dist, UseBy::Parsables).unwrap();
    assert_eq!(launch.system_properties.len(), 2);
    assert_eq!(launch.vm_arguments.len(), 2);
    assert_eq!(launch.program_arguments, vec!["-console"]);
    assert!(!launch.is_changed(Some(&launch.clone())));
}
