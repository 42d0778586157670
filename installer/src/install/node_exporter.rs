//! Host metrics exporter (node_exporter) with the textfile collector pointed at the metrics
//! root.

use super::{install_executable, install_service, scratch_dir};
use crate::{host::Host, render::systemd::Unit, resolve::Params, settings::Settings, Error};
use std::{
    fs, io,
    os::unix::fs::{symlink, PermissionsExt},
    path::Path,
};
use tracing::{debug, info, warn};

/// Account node_exporter runs as
pub const SERVICE_USER: &str = "node_exporter";

/// Name of the installed binary
pub const BINARY: &str = "node_exporter";

/// Name of the service unit
pub const UNIT: &str = "node_exporter.service";

/// Only systemd units matching this pattern are reported.
const UNIT_INCLUDE: &str = r"(p4.*|node_exporter)\.service";

/// Installs node_exporter, prepares the metrics root, and starts the service.
pub async fn install<H: Host>(host: &H, settings: &Settings, params: &Params) -> Result<(), Error> {
    ensure_service_user(host).await?;

    // Download and install the binary
    let releases = &settings.releases;
    let scratch = scratch_dir(settings)?;
    let stem = releases.node_exporter_stem(params.arch);
    let archive = scratch.path().join(format!("{stem}.tar.gz"));
    let url = releases.node_exporter_download_url(params.arch);
    info!(url = url.as_str(), "downloading node_exporter");
    host.fetch(&url, &archive).await?;
    host.extract(&archive, scratch.path()).await?;
    let binary = settings.paths.bin_dir.join(BINARY);
    install_executable(&scratch.path().join(&stem).join(BINARY), &binary)?;
    drop(scratch);
    if params.selinux {
        host.label_binary(&binary).await?;
    }

    prepare_metrics_root(host, params).await?;
    if let Some(link) = &params.metrics_link {
        link_metrics_root(&params.metrics_root, link)?;
    }

    let unit = Unit {
        description: "Node Exporter".to_string(),
        user: SERVICE_USER.to_string(),
        group: SERVICE_USER.to_string(),
        exec: vec![
            binary.display().to_string(),
            "--collector.systemd".to_string(),
            format!("--collector.systemd.unit-include={UNIT_INCLUDE}"),
            format!(
                "--collector.textfile.directory={}",
                params.metrics_root.display()
            ),
        ],
    };
    install_service(host, settings, UNIT, &unit).await
}

async fn ensure_service_user<H: Host>(host: &H) -> Result<(), Error> {
    if host.user_exists(SERVICE_USER).await? {
        debug!(user = SERVICE_USER, "service account exists");
        return Ok(());
    }
    host.add_service_user(SERVICE_USER).await?;
    info!(user = SERVICE_USER, "created service account");
    Ok(())
}

/// Creates the metrics root (owned by the p4d account, 0755) and makes every ancestor
/// traversable so node_exporter can read it.
///
/// Ancestors only gain `o+rx`: they are never chowned and never forced to 0755, so a shared
/// parent such as `/p4` keeps its owner and any stricter group or owner bits.
async fn prepare_metrics_root<H: Host>(host: &H, params: &Params) -> Result<(), Error> {
    let root = &params.metrics_root;
    fs::create_dir_all(root)?;
    host.chown(root, &params.os_user, &params.os_group).await?;
    fs::set_permissions(root, fs::Permissions::from_mode(0o755))?;
    for ancestor in root.ancestors().skip(1) {
        if ancestor.parent().is_none() || ancestor.as_os_str().is_empty() {
            break;
        }
        let mode = fs::metadata(ancestor)?.permissions().mode();
        if mode & 0o005 != 0o005 {
            fs::set_permissions(ancestor, fs::Permissions::from_mode(mode | 0o005))?;
            info!(path = ?ancestor, "made directory traversable");
        }
    }
    info!(path = ?root, "prepared metrics root");
    Ok(())
}

/// Points the legacy `link` at `root`, leaving anything already at `link` alone.
fn link_metrics_root(root: &Path, link: &Path) -> Result<(), Error> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() && fs::read_link(link)? == root => {
            debug!(link = ?link, "metrics link exists");
        }
        Ok(_) => {
            warn!(link = ?link, target = ?root, "path exists and is not a link to the metrics root, leaving it alone");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent)?;
            }
            symlink(root, link)?;
            info!(link = ?link, target = ?root, "linked metrics root");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
