//! Optional YAML settings: pinned release versions, download locations, and host paths.
//!
//! Every field has a default, so an empty (or absent) settings file reproduces a standard
//! install. Tests point [Paths] at a temporary directory.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

/// Version of node_exporter to download and install
pub const NODE_EXPORTER_VERSION: &str = "1.8.2";

/// Version of p4prometheus to download and install
pub const P4PROMETHEUS_VERSION: &str = "0.9.5";

/// Base URL of node_exporter releases
pub const NODE_EXPORTER_URL: &str = "https://github.com/prometheus/node_exporter/releases/download";

/// Base URL of p4prometheus releases
pub const P4PROMETHEUS_URL: &str = "https://github.com/perforce/p4prometheus/releases/download";

/// Raw-file endpoint the companion scripts are fetched from
pub const SCRIPTS_URL: &str = "https://raw.githubusercontent.com/perforce/p4prometheus/master/scripts";

/// Maximum number of polling attempts for service status
pub const MAX_POLL_ATTEMPTS: usize = 30;

/// Seconds between service status polls
pub const POLL_INTERVAL_SECS: u64 = 1;

/// All installer settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub releases: Releases,
    pub paths: Paths,
    pub exporter: ExporterOptions,
    pub push: PushDefaults,
    pub service_poll: ServicePoll,
}

impl Settings {
    /// Loads settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(|source| Error::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads settings from `path` if provided, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Pinned versions and download locations.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Releases {
    pub node_exporter_version: String,
    pub node_exporter_url: String,
    pub p4prometheus_version: String,
    pub p4prometheus_url: String,
    pub scripts_url: String,
}

impl Default for Releases {
    fn default() -> Self {
        Self {
            node_exporter_version: NODE_EXPORTER_VERSION.to_string(),
            node_exporter_url: NODE_EXPORTER_URL.to_string(),
            p4prometheus_version: P4PROMETHEUS_VERSION.to_string(),
            p4prometheus_url: P4PROMETHEUS_URL.to_string(),
            scripts_url: SCRIPTS_URL.to_string(),
        }
    }
}

impl Releases {
    /// Name of the node_exporter release archive (and of the directory it unpacks to, minus
    /// the `.tar.gz` suffix).
    pub fn node_exporter_stem(&self, arch: crate::Architecture) -> String {
        format!("node_exporter-{}.linux-{arch}", self.node_exporter_version)
    }

    /// Download URL of the node_exporter release archive.
    pub fn node_exporter_download_url(&self, arch: crate::Architecture) -> String {
        format!(
            "{}/v{}/{}.tar.gz",
            self.node_exporter_url.trim_end_matches('/'),
            self.node_exporter_version,
            self.node_exporter_stem(arch)
        )
    }

    /// Name of the (decompressed) p4prometheus release binary.
    pub fn p4prometheus_stem(&self, arch: crate::Architecture) -> String {
        format!("p4prometheus.linux-{arch}")
    }

    /// Download URL of the gzip-compressed p4prometheus release binary.
    pub fn p4prometheus_download_url(&self, arch: crate::Architecture) -> String {
        format!(
            "{}/v{}/{}.gz",
            self.p4prometheus_url.trim_end_matches('/'),
            self.p4prometheus_version,
            self.p4prometheus_stem(arch)
        )
    }

    /// Download URL of a companion script.
    pub fn script_download_url(&self, name: &str) -> String {
        format!("{}/{name}", self.scripts_url.trim_end_matches('/'))
    }
}

/// Locations on the host.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Root of the SDP layout (`/p4`).
    pub sdp_root: PathBuf,
    /// Directory systemd unit files are written to.
    pub systemd_dir: PathBuf,
    /// Directory binaries (and standalone scripts) are installed to.
    pub bin_dir: PathBuf,
    /// Scratch directory for downloads.
    pub work_dir: PathBuf,
    /// Config directory for standalone installs.
    pub config_dir: PathBuf,
    /// Default textfile collector directory.
    pub metrics_root: PathBuf,
    /// Default legacy link to the metrics root (SDP only).
    pub metrics_link: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            sdp_root: PathBuf::from("/p4"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            bin_dir: PathBuf::from("/usr/local/bin"),
            work_dir: PathBuf::from("/tmp"),
            config_dir: PathBuf::from("/etc/p4prometheus"),
            metrics_root: PathBuf::from("/p4/metrics"),
            metrics_link: PathBuf::from("/hxlogs/metrics"),
        }
    }
}

impl Paths {
    /// Script that loads the SDP environment for an instance.
    pub fn sdp_environment_script(&self) -> PathBuf {
        self.sdp_root.join("common/bin/p4_vars")
    }

    /// Config directory of an SDP install.
    pub fn sdp_config_dir(&self) -> PathBuf {
        self.sdp_root.join("common/config")
    }

    /// Site script directory of an SDP install.
    pub fn sdp_script_dir(&self) -> PathBuf {
        self.sdp_root.join("common/site/bin")
    }
}

/// Feature flags written to the p4prometheus configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExporterOptions {
    pub output_cmds_by_user: bool,
    pub output_cmds_by_ip: bool,
    pub output_cmds_by_user_regex: String,
    pub fail_on_missing_logfile: bool,
    /// `None` uses the case handling reported by the server.
    pub case_sensitive_server: Option<bool>,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            output_cmds_by_user: true,
            output_cmds_by_ip: true,
            output_cmds_by_user_regex: String::new(),
            fail_on_missing_logfile: false,
            case_sensitive_server: None,
        }
    }
}

/// Placeholder values written to the push-gateway configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PushDefaults {
    pub metrics_host: String,
    pub metrics_user: String,
    pub metrics_passwd: String,
    pub metrics_job: String,
    pub metrics_customer: String,
}

impl Default for PushDefaults {
    fn default() -> Self {
        Self {
            metrics_host: "https://monitorgw.hra.net:9091".to_string(),
            metrics_user: "customerid_CHANGEME".to_string(),
            metrics_passwd: "MySecurePassword_CHANGEME".to_string(),
            metrics_job: "pushgateway".to_string(),
            metrics_customer: "Customer_CHANGEME".to_string(),
        }
    }
}

/// How long to wait for an installed service to become active.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServicePoll {
    pub attempts: usize,
    pub interval_secs: u64,
}

impl Default for ServicePoll {
    fn default() -> Self {
        Self {
            attempts: MAX_POLL_ATTEMPTS,
            interval_secs: POLL_INTERVAL_SECS,
        }
    }
}

impl ServicePoll {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
