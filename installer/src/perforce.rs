//! Connection details for a Perforce server and parsing of `p4` command output.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Default client binary when the environment does not name one.
pub const DEFAULT_P4BIN: &str = "p4";

/// How to reach (and authenticate against) a Perforce server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    /// Client binary to invoke.
    pub bin: String,
    /// `P4PORT` of the server.
    pub port: String,
    /// `P4USER` to run commands as.
    pub user: String,
    /// Extra environment for every invocation (the loaded SDP environment, if any).
    pub env: BTreeMap<String, String>,
}

impl Connection {
    /// Connection with no extra environment.
    pub fn new(port: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            bin: DEFAULT_P4BIN.to_string(),
            port: port.into(),
            user: user.into(),
            env: BTreeMap::new(),
        }
    }

    /// Full argument list for a `p4` invocation (global options first).
    pub fn args<'a>(&'a self, command: &[&'a str]) -> Vec<&'a str> {
        let mut args = vec!["-p", self.port.as_str(), "-u", self.user.as_str()];
        args.extend_from_slice(command);
        args
    }
}

/// Extracts the server id from `p4 serverid` output (`Server identity: <id>`).
///
/// Returns an empty string when the server has no id.
pub fn parse_server_id(output: &str) -> String {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Server identity:"))
        .map(|id| id.trim().to_string())
        .unwrap_or_default()
}

/// Reads `Case Handling:` from `p4 info` output. Servers are case sensitive unless
/// they report otherwise.
pub fn parse_case_sensitive(output: &str) -> bool {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Case Handling:"))
        .map(|value| value.trim() != "insensitive")
        .unwrap_or(true)
}

/// Looks up a configurable in `p4 configure show` output.
///
/// Lines look like `P4LOG=/p4/1/logs/log (configure)`; the source annotation is dropped.
pub fn parse_configurable(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix(name)?.strip_prefix('=')?;
        let value = match value.rfind(" (") {
            Some(idx) if value.ends_with(')') => &value[..idx],
            _ => value,
        };
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Resolves the server log path from `p4 configure show` output.
///
/// A relative `P4LOG` is relative to `P4ROOT`.
pub fn parse_log_path(output: &str) -> Option<PathBuf> {
    let log = PathBuf::from(parse_configurable(output, "P4LOG")?);
    if log.is_absolute() {
        return Some(log);
    }
    let root = parse_configurable(output, "P4ROOT")?;
    Some(Path::new(&root).join(log))
}
