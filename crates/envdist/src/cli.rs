//! Command-line interface for envdist

use crate::config::{merge_defaults, ArgumentEntry, ResolvedEnvironment, UseBy};
use argh::FromArgs;
use std::collections::HashMap;
use std::path::PathBuf;

/// Inspect OSGi environment distributions and the processes running them
#[derive(FromArgs, Debug)]
pub struct CliArgs {
    #[argh(subcommand)]
    pub command: Command,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,

    /// bound of every call into a foreign process in milliseconds (default: 3000)
    #[argh(option, default = "3000")]
    pub call_timeout_ms: u64,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum Command {
    Resolve(ResolveArgs),
    List(ListArgs),
    Watch(WatchArgs),
    Shutdown(ShutdownArgs),
    Lookup(LookupArgs),
}

/// Print the launch configuration of a distribution for a usage context
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "resolve")]
pub struct ResolveArgs {
    /// distribution directory containing .eosgi.dist.yaml
    #[argh(positional)]
    pub dist_dir: PathBuf,

    /// usage context: ide, integration-test or parsables
    #[argh(option, short = 'u', from_str_fn(parse_use_by))]
    pub use_by: UseBy,

    /// extra system property (format: key=value, empty value removes the key)
    #[argh(option, short = 'D', from_str_fn(parse_define))]
    pub define: Vec<(String, String)>,

    /// print JSON instead of a command line
    #[argh(switch)]
    pub json: bool,
}

/// List running processes of an environment below a directory
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "list")]
pub struct ListArgs {
    /// environment id
    #[argh(option, short = 'e')]
    pub environment: Option<String>,

    /// distribution root directory (default: current directory)
    #[argh(option, short = 'r')]
    pub root: Option<PathBuf>,

    /// print JSON
    #[argh(switch)]
    pub json: bool,
}

/// Refresh periodically and log environment processes coming and going
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "watch")]
pub struct WatchArgs {
    /// refresh interval in milliseconds (default: 2000)
    #[argh(option, default = "2000")]
    pub interval_ms: u64,
}

/// Shut down an environment process through the shutdown agent
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "shutdown")]
pub struct ShutdownArgs {
    /// process id
    #[argh(positional)]
    pub process_id: String,

    /// path of the shutdown agent jar
    #[argh(option, short = 'a')]
    pub agent: PathBuf,

    /// halt the process if it is still alive after this many milliseconds
    #[argh(option)]
    pub timeout_ms: Option<u64>,

    /// exit code used when halting (default: 1)
    #[argh(option, default = "1")]
    pub halt_code: i32,
}

/// Print the process id started by a launch
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "lookup")]
pub struct LookupArgs {
    /// launch unique id
    #[argh(positional)]
    pub launch_id: String,
}

/// Parse usage context in format "ide", "integration-test" or "parsables"
fn parse_use_by(s: &str) -> Result<UseBy, String> {
    s.parse()
}

/// Parse system property definition in format "key=value"
fn parse_define(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!(
            "Invalid definition format '{}'. Expected 'key=value'",
            s
        )),
    }
}

impl ResolveArgs {
    /// Definitions as a map, later definitions winning
    pub fn defines(&self) -> HashMap<String, String> {
        self.define.iter().cloned().collect()
    }
}

/// Overlay command line definitions onto the system properties of a resolved
/// environment. Empty values remove the property.
pub fn apply_defines(resolved: &mut ResolvedEnvironment, defines: &HashMap<String, String>) {
    if defines.is_empty() {
        return;
    }

    let base: HashMap<String, String> = resolved
        .arguments
        .system_properties
        .iter()
        .map(|e| (e.key.clone(), e.value.clone().unwrap_or_default()))
        .collect();

    let mut entries: Vec<ArgumentEntry> = merge_defaults(&base, defines)
        .into_iter()
        .map(|(key, value)| ArgumentEntry::new(key, value))
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    resolved.arguments.system_properties = entries;
}
