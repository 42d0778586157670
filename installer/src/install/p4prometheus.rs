//! Log metrics exporter (p4prometheus), reading the p4d server log.

use super::{
    ensure_dir, install_executable, install_service, scratch_dir, write_file, PUBLIC_MODE,
};
use crate::{
    host::Host,
    render::{p4prometheus::Config, systemd::Unit},
    resolve::Params,
    settings::{ExporterOptions, Settings},
    Error,
};
use std::fs;
use tracing::info;

/// Name of the installed binary
pub const BINARY: &str = "p4prometheus";

/// Name of the service unit
pub const UNIT: &str = "p4prometheus.service";

/// Builds the p4prometheus configuration for `params`.
///
/// A case sensitivity set in `options` overrides the one reported by the server.
pub fn config(params: &Params, options: &ExporterOptions) -> Config {
    Config {
        sdp_instance: params.instance().unwrap_or_default().to_string(),
        log_path: params.log_path.display().to_string(),
        metrics_output: params.metrics_output().display().to_string(),
        server_id: params.server_id.clone(),
        output_cmds_by_user: options.output_cmds_by_user,
        case_sensitive_server: options
            .case_sensitive_server
            .unwrap_or(params.case_sensitive),
        output_cmds_by_ip: options.output_cmds_by_ip,
        output_cmds_by_user_regex: options.output_cmds_by_user_regex.clone(),
        fail_on_missing_logfile: options.fail_on_missing_logfile,
    }
}

/// Installs p4prometheus, writes its configuration, and starts the service.
pub async fn install<H: Host>(host: &H, settings: &Settings, params: &Params) -> Result<(), Error> {
    // Render first: a bad value must not leave a half-installed exporter behind
    let config_file = params.config_file();
    let rendered = config(params, &settings.exporter).render()?;

    let releases = &settings.releases;
    let scratch = scratch_dir(settings)?;
    let url = releases.p4prometheus_download_url(params.arch);
    let download = scratch
        .path()
        .join(format!("{}.gz", releases.p4prometheus_stem(params.arch)));
    info!(url = url.as_str(), "downloading p4prometheus");
    host.fetch(&url, &download).await?;
    let decompressed = host.decompress(&download).await?;
    let binary = settings.paths.bin_dir.join(BINARY);
    install_executable(&decompressed, &binary)?;
    drop(scratch);
    if params.selinux {
        host.label_binary(&binary).await?;
    }

    ensure_dir(host, &params.config_dir, &params.os_user, &params.os_group).await?;
    ensure_dir(host, &params.script_dir, &params.os_user, &params.os_group).await?;
    write_file(&config_file, rendered.as_bytes(), PUBLIC_MODE)?;
    host.chown(&config_file, &params.os_user, &params.os_group)
        .await?;
    info!(path = ?config_file, "wrote p4prometheus config");

    let unit = Unit {
        description: "P4prometheus".to_string(),
        user: params.os_user.clone(),
        group: params.os_group.clone(),
        exec: vec![
            binary.display().to_string(),
            format!("--config={}", config_file.display()),
        ],
    };
    install_service(host, settings, UNIT, &unit).await
}
