//! Crontab entries managed by the installer.
//!
//! Each managed entry is identified by the script it runs (its key) together with the first
//! argument it passes, which tells SDP instances apart (`monitor_metrics.sh 1` and
//! `monitor_metrics.sh 2` are different entries). Any uncommented line running the same
//! script with the same first argument belongs to that entry: installing an entry replaces
//! such a line (and drops duplicates of it), or appends the entry when there is none.
//! All other lines are preserved as-is.

use super::{check_line, shell_quote};
use crate::Error;

/// Appended to every command: discard output and never report failure to cron.
const QUIET: &str = "> /dev/null 2>&1 ||:";

/// Run every minute.
pub const EVERY_MINUTE: &str = "*/1 * * * *";

/// Run once a day at 23:00.
pub const DAILY: &str = "0 23 * * *";

/// A scheduled command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Name of the script the entry runs.
    pub key: String,
    pub schedule: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

impl Entry {
    pub fn new(key: &str, schedule: &str, command: Vec<String>) -> Self {
        Self {
            key: key.to_string(),
            schedule: schedule.to_string(),
            command,
        }
    }

    /// Returns true if `line` (uncommented) runs this entry's script with the same first
    /// argument.
    pub fn matches(&self, line: &str) -> bool {
        if line.trim_start().starts_with('#') {
            return false;
        }
        let selector = self.command.get(1).map(|arg| quote_word(arg));
        let words: Vec<&str> = line.split_whitespace().collect();
        words.iter().enumerate().any(|(idx, word)| {
            let program = word.trim_matches('\'');
            let name = program.rsplit('/').next().unwrap_or(program);
            name == self.key
                && match &selector {
                    Some(selector) => words.get(idx + 1).copied() == Some(selector.as_str()),
                    None => true,
                }
        })
    }

    /// Renders the crontab line.
    pub fn line(&self) -> Result<String, Error> {
        check_line("schedule", &self.schedule)?;
        if self.schedule.split_whitespace().count() != 5 {
            return Err(Error::InvalidField {
                field: "schedule".to_string(),
                reason: format!("expected five fields: {}", self.schedule),
            });
        }
        let mut words = Vec::with_capacity(self.command.len());
        for arg in &self.command {
            check_line("command", arg)?;
            words.push(quote_word(arg));
        }
        let line = format!("{} {} {QUIET}", self.schedule, words.join(" "));
        if !line.contains(&self.key) {
            return Err(Error::InvalidField {
                field: "command".to_string(),
                reason: format!("does not mention its key {}", self.key),
            });
        }
        Ok(line)
    }
}

/// Quotes one command word for a crontab line.
fn quote_word(arg: &str) -> String {
    // cron turns unescaped % into newlines
    shell_quote(arg).replace('%', r"\%")
}

/// Outcome of installing an [Entry].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Added,
    Updated,
    Unchanged,
}

/// The lines of a user's crontab.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Crontab {
    lines: Vec<String>,
}

impl Crontab {
    pub fn parse(contents: &str) -> Self {
        Self {
            lines: contents.lines().map(String::from).collect(),
        }
    }

    /// Installs `entry`, replacing the line(s) it [Entry::matches].
    pub fn upsert(&mut self, entry: &Entry) -> Result<Change, Error> {
        let line = entry.line()?;
        let matching: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| entry.matches(l))
            .map(|(idx, _)| idx)
            .collect();
        let Some((&first, rest)) = matching.split_first() else {
            self.lines.push(line);
            return Ok(Change::Added);
        };
        if rest.is_empty() && self.lines[first] == line {
            return Ok(Change::Unchanged);
        }
        self.lines[first] = line;
        for &idx in rest.iter().rev() {
            self.lines.remove(idx);
        }
        Ok(Change::Updated)
    }

    /// Number of uncommented lines containing `key`.
    pub fn count(&self, key: &str) -> usize {
        self.lines
            .iter()
            .filter(|l| !l.trim_start().starts_with('#') && l.contains(key))
            .count()
    }

    pub fn render(&self) -> String {
        let mut rendered = self.lines.join("\n");
        if !rendered.is_empty() {
            rendered.push('\n');
        }
        rendered
    }
}
