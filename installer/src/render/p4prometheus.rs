//! Configuration of the p4prometheus log exporter (`p4prometheus.yaml`).

use super::check_line;
use crate::Error;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Name of the metrics file p4prometheus writes into the textfile collector directory.
pub const METRICS_FILE: &str = "p4_cmds.prom";

/// Header of the generated file.
const HEADER: &str = "# p4prometheus configuration, generated by install-p4prom.\n\
# Rerunning the installer overwrites this file.\n";

/// Comment written above each key.
const DOCS: &[(&str, &str)] = &[
    (
        "sdp_instance",
        "SDP instance, typically 1 for SDP installations. Used as a label in metrics.",
    ),
    ("log_path", "Path to the p4d server log."),
    (
        "metrics_output",
        "File written for node_exporter's textfile collector. Must end in .prom.",
    ),
    (
        "server_id",
        "Server id used as a label in metrics (from 'p4 serverid').",
    ),
    (
        "output_cmds_by_user",
        "Output command metrics per user. With many users this multiplies the number\n\
of series; restrict it with output_cmds_by_user_regex.",
    ),
    (
        "case_sensitive_server",
        "Set to false for case-insensitive servers so that user names differing only\n\
in case are counted together.",
    ),
    (
        "output_cmds_by_ip",
        "Output command metrics per client IP address. Adds one series per address.",
    ),
    (
        "output_cmds_by_user_regex",
        "Only users matching this regex get per-user metrics (empty matches everyone).\n\
Use it to keep per-user cardinality bounded, e.g. \"svc_.*|build\".",
    ),
    (
        "fail_on_missing_logfile",
        "Exit instead of waiting when log_path does not exist.",
    ),
];

/// Settings p4prometheus reads at startup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub sdp_instance: String,
    pub log_path: String,
    pub metrics_output: String,
    pub server_id: String,
    pub output_cmds_by_user: bool,
    pub case_sensitive_server: bool,
    pub output_cmds_by_ip: bool,
    pub output_cmds_by_user_regex: String,
    pub fail_on_missing_logfile: bool,
}

impl Config {
    /// Checks the values p4prometheus would otherwise only reject (or misuse) at runtime.
    pub fn validate(&self) -> Result<(), Error> {
        for (field, value) in [
            ("sdp_instance", &self.sdp_instance),
            ("log_path", &self.log_path),
            ("metrics_output", &self.metrics_output),
            ("server_id", &self.server_id),
            ("output_cmds_by_user_regex", &self.output_cmds_by_user_regex),
        ] {
            check_line(field, value)?;
        }
        if !self.log_path.starts_with('/') {
            return Err(invalid("log_path", "must be an absolute path"));
        }
        if !self.metrics_output.starts_with('/') {
            return Err(invalid("metrics_output", "must be an absolute path"));
        }
        if !self.metrics_output.ends_with(".prom") {
            return Err(invalid("metrics_output", "must end in .prom"));
        }
        if let Err(e) = regex::Regex::new(&self.output_cmds_by_user_regex) {
            return Err(invalid("output_cmds_by_user_regex", &e.to_string()));
        }
        Ok(())
    }

    /// Validates and renders the configuration, each key preceded by its documentation.
    ///
    /// The rendered document is parsed back and must equal `self`.
    pub fn render(&self) -> Result<String, Error> {
        self.validate()?;
        let Value::Mapping(mapping) = serde_yaml::to_value(self)? else {
            return Err(invalid("p4prometheus.yaml", "not a mapping"));
        };

        let mut rendered = String::from(HEADER);
        for (key, value) in mapping {
            let name = key.as_str().unwrap_or_default();
            if let Some((_, doc)) = DOCS.iter().find(|(field, _)| *field == name) {
                rendered.push('\n');
                for line in doc.lines() {
                    rendered.push_str("# ");
                    rendered.push_str(line);
                    rendered.push('\n');
                }
            }
            let mut entry = Mapping::new();
            entry.insert(key, value);
            rendered.push_str(&serde_yaml::to_string(&entry)?);
        }

        let parsed: Config = serde_yaml::from_str(&rendered)?;
        if parsed != *self {
            return Err(invalid("p4prometheus.yaml", "rendered document does not round-trip"));
        }
        Ok(rendered)
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
