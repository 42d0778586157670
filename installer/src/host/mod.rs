//! Side effects on the host: accounts, downloads, processes, systemd, and cron.
//!
//! Files inside the configured [crate::settings::Paths] are written directly by the
//! installers; everything else (anything that talks to another program, another account,
//! or the network) goes through [Host].

use crate::{perforce::Connection, Architecture, Error};
use std::{
    collections::BTreeMap,
    future::Future,
    path::{Path, PathBuf},
};

pub mod mocks;
mod system;
pub use system::{parse_environment, parse_group_entry, System};

/// Interface to the machine being provisioned.
pub trait Host: Send + Sync {
    /// Returns true if the installer runs with root privileges.
    fn is_root(&self) -> bool;

    /// Architecture of the host.
    fn architecture(&self) -> Result<Architecture, Error>;

    /// Host name up to the first `.` (used to label pushed metrics).
    fn hostname(&self) -> Result<String, Error>;

    /// Returns true if SELinux is present and enforcing.
    fn selinux_enforcing(&self) -> impl Future<Output = bool> + Send;

    /// Returns true if an account named `user` exists.
    fn user_exists(&self, user: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Creates an unprivileged account without a home directory or login shell.
    fn add_service_user(&self, user: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Name of the primary group of `user`.
    fn primary_group(&self, user: &str) -> impl Future<Output = Result<String, Error>> + Send;

    /// Name of the group owning `path`.
    fn group_owner(&self, path: &Path) -> impl Future<Output = Result<String, Error>> + Send;

    /// Changes ownership of `path` to `user:group`.
    fn chown(
        &self,
        path: &Path,
        user: &str,
        group: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Sources an environment script (with `instance` as its argument) and returns the
    /// resulting environment.
    fn load_environment(
        &self,
        script: &Path,
        instance: &str,
    ) -> impl Future<Output = Result<BTreeMap<String, String>, Error>> + Send;

    /// Runs a `p4` command against `connection`, returning its standard output.
    fn p4(
        &self,
        connection: &Connection,
        command: &[&str],
    ) -> impl Future<Output = Result<String, Error>> + Send;

    /// Downloads `url` to `dest`.
    fn fetch(&self, url: &str, dest: &Path) -> impl Future<Output = Result<(), Error>> + Send;

    /// Unpacks a `.tar.gz` archive into `into`.
    fn extract(&self, archive: &Path, into: &Path)
        -> impl Future<Output = Result<(), Error>> + Send;

    /// Decompresses a `.gz` file in place, returning the path of the decompressed file.
    fn decompress(&self, file: &Path) -> impl Future<Output = Result<PathBuf, Error>> + Send;

    /// Labels `path` as an executable (`bin_t`) for SELinux.
    fn label_binary(&self, path: &Path) -> impl Future<Output = Result<(), Error>> + Send;

    /// Runs `systemctl` with `args`.
    fn systemctl(&self, args: &[&str]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Returns true if `unit` is active.
    fn service_active(&self, unit: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Current crontab of `user` (empty if the user has none).
    fn crontab(&self, user: &str) -> impl Future<Output = Result<String, Error>> + Send;

    /// Replaces the crontab of `user`.
    fn set_crontab(
        &self,
        user: &str,
        contents: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
