//! HotSpot dynamic attach
//!
//! A HotSpot JVM opens its attach listener on demand: the client drops an
//! `.attach_pid<pid>` file and sends `SIGQUIT`, then the JVM creates a unix
//! socket `.java_pid<pid>` in its temp directory. Every command is a fresh
//! connection carrying `1\0<cmd>\0<arg>\0<arg>\0<arg>\0`. The reply starts
//! with a numeric status line.

use super::attach::{AttachedProcess, Attacher, ProcessDescriptor, Properties};
use super::error::AttachError;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Agent property set once the local management agent is running
pub const LOCAL_CONNECTOR_ADDRESS: &str = "com.sun.management.jmxremote.localConnectorAddress";

const PROTOCOL_VERSION: &str = "1";
const MAX_ARGS: usize = 3;

/// [`Attacher`] for local HotSpot JVMs
#[derive(Debug, Clone)]
pub struct HotSpotAttacher {
    /// How long to wait for the attach listener to come up
    pub listener_timeout: Duration,
    /// Socket read and write timeout of a single command
    pub io_timeout: Duration,
}

impl Default for HotSpotAttacher {
    fn default() -> Self {
        Self {
            listener_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(10),
        }
    }
}

impl Attacher for HotSpotAttacher {
    fn list(&self) -> Vec<ProcessDescriptor> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let perf_pids = hsperfdata_pids(&std::env::temp_dir());

        let mut jvms: Vec<(u32, ProcessDescriptor)> = system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let pid = pid.as_u32();
                let name = process.name().to_string_lossy();
                if !name.starts_with("java") && !perf_pids.contains(&pid) {
                    return None;
                }
                Some((pid, ProcessDescriptor::new(pid.to_string(), name)))
            })
            .collect();

        jvms.sort_by_key(|(pid, _)| *pid);
        jvms.into_iter().map(|(_, descriptor)| descriptor).collect()
    }

    fn attach(&self, process_id: &str) -> Result<Box<dyn AttachedProcess>, AttachError> {
        let pid = parse_pid(process_id)?;
        if !is_running(pid) {
            return Err(AttachError::ProcessNotFound(process_id.to_string()));
        }

        #[cfg(unix)]
        {
            let process = unix::HotSpotProcess::attach(pid, self.listener_timeout, self.io_timeout)?;
            Ok(Box::new(process))
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            Err(AttachError::Unsupported)
        }
    }
}

/// Parse a process id that is safe to signal.
///
/// Zero and negative values address process groups in `kill(2)`, so only
/// positive ids that fit a `pid_t` are accepted.
pub(crate) fn parse_pid(process_id: &str) -> Result<u32, AttachError> {
    match process_id.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid as u32),
        _ => Err(AttachError::InvalidProcessId(process_id.to_string())),
    }
}

fn is_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Pids of JVMs that publish perf data under `<tmp>/hsperfdata_<user>/<pid>`
pub(crate) fn hsperfdata_pids(tmp: &Path) -> HashSet<u32> {
    let Ok(entries) = std::fs::read_dir(tmp) else {
        return HashSet::new();
    };

    entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("hsperfdata_"))
        .filter_map(|entry| std::fs::read_dir(entry.path()).ok())
        .flat_map(|files| files.flatten())
        .filter_map(|file| file.file_name().to_str()?.parse::<u32>().ok())
        .collect()
}

/// Encode one attach request
pub(crate) fn encode_request(command: &str, args: &[&str]) -> Vec<u8> {
    let mut request = Vec::new();
    for field in std::iter::once(PROTOCOL_VERSION)
        .chain(std::iter::once(command))
        .chain(
            args.iter()
                .copied()
                .chain(std::iter::repeat(""))
                .take(MAX_ARGS),
        )
    {
        request.extend_from_slice(field.as_bytes());
        request.push(0);
    }
    request
}

/// Split a reply into its status code and body
pub(crate) fn parse_response(command: &str, response: &str) -> Result<String, AttachError> {
    let (status, body) = response.split_once('\n').unwrap_or((response, ""));
    let code: i32 = status
        .trim()
        .parse()
        .map_err(|_| AttachError::Protocol(format!("invalid status line '{}'", status)))?;

    if code != 0 {
        return Err(AttachError::CommandFailed {
            command: command.to_string(),
            code,
            message: body.trim().to_string(),
        });
    }
    Ok(body.to_string())
}

/// Interpret the body of a `load` reply.
///
/// Newer JVMs answer `return code: N`, older ones a bare number.
pub(crate) fn parse_agent_load_result(body: &str) -> Result<(), AttachError> {
    let line = body.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(line) = line else {
        return Ok(());
    };

    let code = line.strip_prefix("return code:").unwrap_or(line).trim();
    match code.parse::<i32>() {
        Ok(0) => Ok(()),
        Ok(code) => Err(AttachError::AgentInitialization(code)),
        Err(_) => Err(AttachError::Protocol(format!(
            "unexpected agent load reply '{}'",
            line
        ))),
    }
}

/// Parse the text form of `java.util.Properties`
pub fn parse_properties(text: &str) -> Properties {
    let mut properties = Properties::new();
    let mut logical = String::new();

    for raw in text.lines() {
        let line = raw.trim_start();
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!'))
        {
            continue;
        }

        logical.push_str(line);
        if ends_with_continuation(&logical) {
            logical.pop();
            continue;
        }

        let (key, value) = split_property(&logical);
        properties.insert(unescape(key), unescape(value));
        logical.clear();
    }

    if !logical.is_empty() {
        let (key, value) = split_property(&logical);
        properties.insert(unescape(key), unescape(value));
    }

    properties
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_property(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (index, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..index], line[index + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[index..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..index], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Options string of a `load instrument` request
pub(crate) fn agent_argument(path: &Path, options: Option<&str>) -> String {
    match options {
        Some(options) => format!("{}={}", path.display(), options),
        None => path.display().to_string(),
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use std::time::Instant;

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub(super) struct HotSpotProcess {
        id: String,
        socket_path: PathBuf,
        io_timeout: Duration,
    }

    fn temp_dir(pid: u32) -> PathBuf {
        if cfg!(target_os = "linux") {
            let root_tmp = PathBuf::from(format!("/proc/{}/root/tmp", pid));
            if root_tmp.is_dir() {
                return root_tmp;
            }
        }
        std::env::temp_dir()
    }

    impl HotSpotProcess {
        pub(super) fn attach(
            pid: u32,
            listener_timeout: Duration,
            io_timeout: Duration,
        ) -> Result<Self, AttachError> {
            let socket_path = temp_dir(pid).join(format!(".java_pid{}", pid));
            if !socket_path.exists() {
                start_listener(pid, &socket_path, listener_timeout)?;
            }

            log::trace!("Attached to JVM {} via {}", pid, socket_path.display());
            Ok(Self {
                id: pid.to_string(),
                socket_path,
                io_timeout,
            })
        }

        fn execute(&self, command: &str, args: &[&str]) -> Result<String, AttachError> {
            let mut stream = UnixStream::connect(&self.socket_path)?;
            stream.set_read_timeout(Some(self.io_timeout))?;
            stream.set_write_timeout(Some(self.io_timeout))?;

            stream.write_all(&encode_request(command, args))?;

            let mut response = String::new();
            stream.read_to_string(&mut response)?;
            parse_response(command, &response)
        }

        fn agent_properties(&self) -> Result<Properties, AttachError> {
            self.execute("agentProperties", &[])
                .map(|body| parse_properties(&body))
        }
    }

    fn start_listener(
        pid: u32,
        socket_path: &Path,
        timeout: Duration,
    ) -> Result<(), AttachError> {
        let cwd_trigger = PathBuf::from(format!("/proc/{}/cwd/.attach_pid{}", pid, pid));
        let trigger = match std::fs::File::create(&cwd_trigger) {
            Ok(_) => cwd_trigger,
            Err(_) => {
                let fallback = temp_dir(pid).join(format!(".attach_pid{}", pid));
                std::fs::File::create(&fallback)?;
                fallback
            }
        };

        let result = (|| -> Result<(), AttachError> {
            kill(NixPid::from_raw(pid as i32), Signal::SIGQUIT).map_err(std::io::Error::from)?;

            let deadline = Instant::now() + timeout;
            while !socket_path.exists() {
                if Instant::now() >= deadline {
                    return Err(AttachError::ListenerNotStarted {
                        process_id: pid.to_string(),
                        timeout,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Ok(())
        })();

        let _ = std::fs::remove_file(&trigger);
        result
    }

    impl AttachedProcess for HotSpotProcess {
        fn id(&self) -> &str {
            &self.id
        }

        fn system_properties(&mut self) -> Result<Properties, AttachError> {
            self.execute("properties", &[])
                .map(|body| parse_properties(&body))
        }

        fn start_management_agent(&mut self) -> Result<Option<String>, AttachError> {
            if let Some(address) = self.agent_properties()?.remove(LOCAL_CONNECTOR_ADDRESS) {
                return Ok(Some(address));
            }

            self.execute("jcmd", &["ManagementAgent.start_local"])?;
            Ok(self.agent_properties()?.remove(LOCAL_CONNECTOR_ADDRESS))
        }

        fn load_agent(&mut self, path: &Path, options: Option<&str>) -> Result<(), AttachError> {
            let argument = agent_argument(path, options);
            let body = self.execute("load", &["instrument", "false", &argument])?;
            parse_agent_load_result(&body)
        }

        fn detach(self: Box<Self>) -> Result<(), AttachError> {
            Ok(())
        }
    }
}
