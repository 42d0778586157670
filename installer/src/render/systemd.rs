//! Service unit definitions.

use super::check_line;
use crate::Error;

/// A simple, always-restarted service started once the network is online.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    pub description: String,
    pub user: String,
    pub group: String,
    /// Program followed by its arguments.
    pub exec: Vec<String>,
}

impl Unit {
    /// Validates and renders the unit file.
    pub fn render(&self) -> Result<String, Error> {
        check_line("Description", &self.description)?;
        check_line("User", &self.user)?;
        check_line("Group", &self.group)?;
        let Some(program) = self.exec.first() else {
            return Err(Error::InvalidField {
                field: "ExecStart".to_string(),
                reason: "no program".to_string(),
            });
        };
        if !program.starts_with('/') {
            return Err(Error::InvalidField {
                field: "ExecStart".to_string(),
                reason: format!("program must be an absolute path: {program}"),
            });
        }
        for arg in &self.exec {
            check_line("ExecStart", arg)?;
        }
        let exec = self
            .exec
            .iter()
            .map(|arg| quote(arg))
            .collect::<Vec<_>>()
            .join(" ");

        Ok(format!(
            r#"[Unit]
Description={}
Wants=network-online.target
After=network-online.target

[Service]
User={}
Group={}
Type=simple
ExecStart={}
Restart=always
TimeoutStopSec=60

[Install]
WantedBy=multi-user.target
"#,
            escape(&self.description),
            self.user,
            self.group,
            exec
        ))
    }
}

/// Escapes systemd specifiers (`%`) and environment expansion (`$`).
fn escape(value: &str) -> String {
    value.replace('%', "%%").replace('$', "$$")
}

/// Quotes one `ExecStart` word.
///
/// Backslashes and double quotes are escaped; words containing whitespace (or empty words)
/// are wrapped in double quotes.
fn quote(arg: &str) -> String {
    let escaped = escape(arg).replace('\\', r"\\").replace('"', "\\\"");
    if arg.is_empty() || arg.chars().any(char::is_whitespace) || arg.contains('"') {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}
