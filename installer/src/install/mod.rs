//! Provisioning of the three monitoring components.
//!
//! Components are installed in a fixed order and there is no rollback: a failure leaves
//! whatever was already installed in place, and rerunning the installer converges.

use crate::{
    cli::Args,
    host::Host,
    render::systemd::Unit,
    resolve::{resolve, Params},
    settings::Settings,
    Error,
};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tokio::time::sleep;
use tracing::{debug, info};

pub mod monitor_metrics;
pub mod node_exporter;
pub mod p4prometheus;

/// Mode of installed binaries and scripts.
const EXECUTABLE_MODE: u32 = 0o755;

/// Mode of unit files and public configuration.
const PUBLIC_MODE: u32 = 0o644;

/// Mode of configuration carrying credentials.
const PRIVATE_MODE: u32 = 0o600;

/// Resolves all parameters, then installs node_exporter, p4prometheus, and the
/// monitor_metrics scripts.
pub async fn run<H: Host>(host: &H, settings: &Settings, args: &Args) -> Result<Params, Error> {
    let params = resolve(host, settings, args).await?;
    node_exporter::install(host, settings, &params).await?;
    p4prometheus::install(host, settings, &params).await?;
    monitor_metrics::install(host, settings, &params).await?;
    info!(
        metrics_root = ?params.metrics_root,
        config = ?params.config_file(),
        "installation complete"
    );
    Ok(params)
}

/// Temporary sibling used to replace `path` atomically.
fn staging_path(path: &Path) -> Result<PathBuf, Error> {
    let Some(name) = path.file_name() else {
        return Err(Error::InvalidArgument(format!(
            "not a file path: {}",
            path.display()
        )));
    };
    Ok(path.with_file_name(format!(".{}.tmp", name.to_string_lossy())))
}

/// Writes `contents` to `path` with `mode`, replacing any existing file in one step.
pub(crate) fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), Error> {
    let staging = staging_path(path)?;
    fs::write(&staging, contents)?;
    fs::set_permissions(&staging, fs::Permissions::from_mode(mode))?;
    fs::rename(&staging, path)?;
    debug!(path = ?path, mode = %format!("{mode:o}"), "wrote file");
    Ok(())
}

/// Copies an executable from `src` to `dest` (mode 0755) without truncating a running binary.
pub(crate) fn install_executable(src: &Path, dest: &Path) -> Result<(), Error> {
    if !src.is_file() {
        return Err(Error::MissingArtifact(src.to_path_buf()));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = staging_path(dest)?;
    fs::copy(src, &staging)?;
    fs::set_permissions(&staging, fs::Permissions::from_mode(EXECUTABLE_MODE))?;
    fs::rename(&staging, dest)?;
    info!(path = ?dest, "installed executable");
    Ok(())
}

/// Creates `path` (and its parents) if missing and hands it to `user:group`.
pub(crate) async fn ensure_dir<H: Host>(
    host: &H,
    path: &Path,
    user: &str,
    group: &str,
) -> Result<(), Error> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
        info!(path = ?path, "created directory");
    }
    host.chown(path, user, group).await
}

/// Creates a private (0700, randomly named) scratch directory under the work directory.
///
/// Downloads and archives are only ever unpacked inside it; it is removed when dropped.
pub(crate) fn scratch_dir(settings: &Settings) -> Result<TempDir, Error> {
    let work_dir = &settings.paths.work_dir;
    fs::create_dir_all(work_dir)?;
    let dir = tempfile::Builder::new()
        .prefix("install-p4prom.")
        .tempdir_in(work_dir)?;
    debug!(path = ?dir.path(), "created scratch directory");
    Ok(dir)
}

/// Writes the unit file `name`, then (re)starts the service and waits until it is active.
pub(crate) async fn install_service<H: Host>(
    host: &H,
    settings: &Settings,
    name: &str,
    unit: &Unit,
) -> Result<(), Error> {
    let rendered = unit.render()?;
    let systemd_dir = &settings.paths.systemd_dir;
    fs::create_dir_all(systemd_dir)?;
    let path = systemd_dir.join(name);
    write_file(&path, rendered.as_bytes(), PUBLIC_MODE)?;
    info!(path = ?path, "wrote service unit");

    host.systemctl(&["daemon-reload"]).await?;
    host.systemctl(&["enable", name]).await?;
    host.systemctl(&["restart", name]).await?;
    poll_service_status(host, settings, name).await?;
    info!(service = name, "service active");
    Ok(())
}

/// Polls `systemctl is-active` until `service` reports active.
async fn poll_service_status<H: Host>(
    host: &H,
    settings: &Settings,
    service: &str,
) -> Result<(), Error> {
    let poll = &settings.service_poll;
    for attempt in 0..poll.attempts {
        if host.service_active(service).await? {
            return Ok(());
        }
        debug!(service, attempt, "service not active yet");
        sleep(poll.interval()).await;
    }
    Err(Error::ServiceInactive(service.to_string()))
}
