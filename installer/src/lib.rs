//! Install and wire together the Perforce monitoring stack on a Linux host.
//!
//! Three independent components are provisioned, in order:
//!
//! 1. `node_exporter`, serving host metrics and the textfile collector directory.
//! 2. `p4prometheus`, turning the p4d server log into metrics files.
//! 3. The `monitor_metrics` companion scripts, scheduled from the crontab of the
//!    OS user p4d runs as (optionally pushing to a push-gateway).
//!
//! The installer works either against a Server Deployment Package (SDP) instance, in which
//! case connection details are loaded from the SDP environment, or against a standalone
//! server whose connection details are supplied explicitly. All parameters are resolved
//! (and the server probed) before the first side effect: see [resolve::resolve].
//!
//! Every interaction with the operating system or the network goes through the [host::Host]
//! trait so the full install can be exercised against [host::mocks::Host].

use std::{fmt, path::PathBuf};
use thiserror::Error;

pub mod cli;
pub mod host;
pub mod install;
pub mod perforce;
pub mod render;
pub mod resolve;
pub mod settings;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// CPU architecture of a host, as named in release artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    /// Maps a Rust target architecture (`std::env::consts::ARCH`) to a release architecture.
    pub fn from_target(arch: &str) -> Result<Self, Error> {
        match arch {
            "x86_64" => Ok(Self::Amd64),
            "aarch64" => Ok(Self::Arm64),
            other => Err(Error::UnsupportedArchitecture(other.to_string())),
        }
    }

    /// Name used in release artifact file names.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while installing the monitoring stack.
#[derive(Error, Debug)]
pub enum Error {
    #[error("must be run as root (or with sudo)")]
    NotRoot,
    #[error("specify either an SDP instance or -nosdp")]
    MissingMode,
    #[error("an SDP instance ({0}) and -nosdp are mutually exclusive")]
    ConflictingMode(String),
    #[error("{0} not set: pass it explicitly or set it in the environment")]
    MissingConnection(&'static str),
    #[error("SDP environment does not define {0}")]
    MissingVariable(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("can't connect to P4PORT {port}: {reason}")]
    Unreachable { port: String, reason: String },
    #[error("user {user} is not logged in to {port}: {reason}")]
    NotAuthenticated {
        port: String,
        user: String,
        reason: String,
    },
    #[error("server does not report P4LOG, pass --p4log")]
    MissingLogPath,
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    #[error("{program} failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("expected artifact missing: {0}")]
    MissingArtifact(PathBuf),
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("service {0} failed to become active")]
    ServiceInactive(String),
    #[error("settings file {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
