//! Companion scripts (`monitor_metrics.sh` and friends) run from the crontab of the p4d
//! account, optionally reporting to a push-gateway.

use super::{ensure_dir, install_executable, scratch_dir, write_file, PRIVATE_MODE};
use crate::{
    host::Host,
    render::{
        crontab::{Change, Crontab, Entry, DAILY, EVERY_MINUTE},
        push,
    },
    resolve::{Mode, Params},
    settings::Settings,
    Error,
};
use std::{fs, path::Path};
use tracing::{debug, info, warn};

/// Collects server metrics into the metrics root.
pub const MONITOR_METRICS: &str = "monitor_metrics.sh";

/// Runs the longer-running checks of `monitor_metrics.py`.
pub const MONITOR_WRAPPER: &str = "monitor_wrapper.sh";

/// Pushes the metrics root to a push-gateway.
pub const PUSH_METRICS: &str = "push_metrics.sh";

/// Reports instance details to the push-gateway once a day.
pub const REPORT_INSTANCE_DATA: &str = "report_instance_data.sh";

/// Scripts installed into the script directory.
pub const SCRIPTS: &[&str] = &[
    MONITOR_METRICS,
    "monitor_metrics.py",
    MONITOR_WRAPPER,
    PUSH_METRICS,
    REPORT_INSTANCE_DATA,
    "check_for_updates.sh",
];

/// Crontab entries for `params`.
pub fn entries(params: &Params) -> Vec<Entry> {
    let script = |name: &str| params.script_dir.join(name).display().to_string();
    let monitor_args: Vec<String> = match &params.mode {
        Mode::Sdp { instance } => vec![instance.clone()],
        Mode::Standalone => vec![
            "-p".to_string(),
            params.connection.port.clone(),
            "-u".to_string(),
            params.connection.user.clone(),
            "-nosdp".to_string(),
            "-m".to_string(),
            params.metrics_root.display().to_string(),
        ],
    };
    let mut entries = Vec::with_capacity(4);
    for name in [MONITOR_METRICS, MONITOR_WRAPPER] {
        let mut command = vec![script(name)];
        command.extend(monitor_args.iter().cloned());
        entries.push(Entry::new(name, EVERY_MINUTE, command));
    }
    if params.push {
        let config = params.push_config_file().display().to_string();
        for (name, schedule) in [(PUSH_METRICS, EVERY_MINUTE), (REPORT_INSTANCE_DATA, DAILY)] {
            let command = vec![script(name), "-c".to_string(), config.clone()];
            entries.push(Entry::new(name, schedule, command));
        }
    }
    entries
}

/// Label pushed metrics are grouped under: the host name, qualified by the SDP instance.
pub fn metrics_instance(hostname: &str, params: &Params) -> String {
    match params.instance() {
        Some(instance) => format!("{hostname}-{instance}"),
        None => hostname.to_string(),
    }
}

/// Installs the scripts, the push-gateway configuration (if requested), and the crontab
/// entries.
pub async fn install<H: Host>(host: &H, settings: &Settings, params: &Params) -> Result<(), Error> {
    // Render everything before the first write
    let entries = entries(params);
    for entry in &entries {
        entry.line()?;
    }
    let push_config = if params.push {
        let instance = metrics_instance(&host.hostname()?, params);
        Some(push::Config::template(&settings.push, instance).render()?)
    } else {
        None
    };

    ensure_dir(host, &params.script_dir, &params.os_user, &params.os_group).await?;
    let scratch = scratch_dir(settings)?;
    for name in SCRIPTS {
        install_script(host, settings, params, scratch.path(), name).await?;
    }
    drop(scratch);

    if let Some(rendered) = push_config {
        ensure_dir(host, &params.config_dir, &params.os_user, &params.os_group).await?;
        let path = params.push_config_file();
        if path.exists() {
            warn!(path = ?path, "overwriting push-gateway config");
        }
        write_file(&path, rendered.as_bytes(), PRIVATE_MODE)?;
        host.chown(&path, &params.os_user, &params.os_group).await?;
        info!(path = ?path, "wrote push-gateway config (disabled until edited)");
    }

    update_crontab(host, &params.os_user, &entries).await
}

async fn install_script<H: Host>(
    host: &H,
    settings: &Settings,
    params: &Params,
    scratch: &Path,
    name: &str,
) -> Result<(), Error> {
    let url = settings.releases.script_download_url(name);
    let download = scratch.join(name);
    host.fetch(&url, &download).await?;
    let dest = params.script_dir.join(name);
    install_executable(&download, &dest)?;
    host.chown(&dest, &params.os_user, &params.os_group).await
}

/// Installs `entries` into the crontab of `user`, rewriting it only if something changed.
async fn update_crontab<H: Host>(host: &H, user: &str, entries: &[Entry]) -> Result<(), Error> {
    let current = host.crontab(user).await?;
    let mut crontab = Crontab::parse(&current);
    let mut changed = false;
    for entry in entries {
        match crontab.upsert(entry)? {
            Change::Added => {
                info!(user, key = entry.key.as_str(), "added crontab entry");
                changed = true;
            }
            Change::Updated => {
                warn!(user, key = entry.key.as_str(), "updated crontab entry");
                changed = true;
            }
            Change::Unchanged => {
                debug!(user, key = entry.key.as_str(), "crontab entry up to date");
            }
        }
    }
    if changed {
        host.set_crontab(user, &crontab.render()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::mocks::{self, Call},
        perforce::Connection,
        Architecture,
    };
    use std::path::PathBuf;

    fn params(dir: &Path, mode: Mode, push: bool) -> Params {
        Params {
            mode,
            os_user: "perforce".to_string(),
            os_group: "perforce".to_string(),
            connection: Connection::new("ssl:perforce:1666", "admin"),
            server_id: "master.1".to_string(),
            case_sensitive: true,
            log_path: PathBuf::from("/p4/1/logs/log"),
            metrics_root: PathBuf::from("/p4/metrics"),
            metrics_link: None,
            config_dir: dir.join("config"),
            script_dir: dir.join("scripts"),
            push,
            selinux: false,
            arch: Architecture::Amd64,
        }
    }

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.paths.work_dir = dir.join("work");
        settings
    }

    fn sdp() -> Mode {
        Mode::Sdp {
            instance: "1".to_string(),
        }
    }

    #[test]
    fn test_entries_sdp() {
        let params = params(Path::new("/p4/common"), sdp(), false);
        let lines: Vec<String> = entries(&params).iter().map(|e| e.line().unwrap()).collect();
        assert_eq!(
            lines,
            vec![
                "*/1 * * * * /p4/common/scripts/monitor_metrics.sh 1 > /dev/null 2>&1 ||:",
                "*/1 * * * * /p4/common/scripts/monitor_wrapper.sh 1 > /dev/null 2>&1 ||:",
            ]
        );
    }

    #[test]
    fn test_entries_standalone_with_push() {
        let params = params(Path::new("/etc"), Mode::Standalone, true);
        let lines: Vec<String> = entries(&params).iter().map(|e| e.line().unwrap()).collect();
        assert_eq!(
            lines,
            vec![
                "*/1 * * * * /etc/scripts/monitor_metrics.sh -p ssl:perforce:1666 -u admin -nosdp -m /p4/metrics > /dev/null 2>&1 ||:",
                "*/1 * * * * /etc/scripts/monitor_wrapper.sh -p ssl:perforce:1666 -u admin -nosdp -m /p4/metrics > /dev/null 2>&1 ||:",
                "*/1 * * * * /etc/scripts/push_metrics.sh -c /etc/config/.push_metrics.cfg > /dev/null 2>&1 ||:",
                "0 23 * * * /etc/scripts/report_instance_data.sh -c /etc/config/.push_metrics.cfg > /dev/null 2>&1 ||:",
            ]
        );
    }

    #[test]
    fn test_metrics_instance() {
        let dir = Path::new("/p4");
        assert_eq!(metrics_instance("p4host", &params(dir, sdp(), true)), "p4host-1");
        assert_eq!(
            metrics_instance("p4host", &params(dir, Mode::Standalone, true)),
            "p4host"
        );
    }

    #[tokio::test]
    async fn test_install_push() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let params = params(dir.path(), sdp(), true);
        let host = mocks::Host::new(mocks::Config::default());
        install(&host, &settings, &params).await.unwrap();

        for name in SCRIPTS {
            let script = params.script_dir.join(name);
            assert_eq!(
                fs::read_to_string(&script).unwrap(),
                settings.releases.script_download_url(name)
            );
        }
        let config = fs::read_to_string(params.push_config_file()).unwrap();
        assert!(config.contains("\nmetrics_instance=p4host-1\n"));
        assert!(config.ends_with("\nenabled=0\n"));

        let crontab = Crontab::parse(&host.crontab_of("perforce").unwrap());
        for key in [MONITOR_METRICS, MONITOR_WRAPPER, PUSH_METRICS, REPORT_INSTANCE_DATA] {
            assert_eq!(crontab.count(key), 1, "{key}");
        }
    }

    #[tokio::test]
    async fn test_crontab_rewritten_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let params = params(dir.path(), sdp(), false);
        let host = mocks::Host::new(mocks::Config::default());
        host.seed_crontab("perforce", "0 1 * * * /bin/backup\n");
        install(&host, &settings, &params).await.unwrap();
        install(&host, &settings, &params).await.unwrap();
        let writes = host
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::SetCrontab { .. }))
            .count();
        assert_eq!(writes, 1);
        let crontab = host.crontab_of("perforce").unwrap();
        assert!(crontab.starts_with("0 1 * * * /bin/backup\n"));
        assert_eq!(crontab.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_changed_arguments_replace_entries() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = mocks::Host::new(mocks::Config::default());
        install(&host, &settings, &params(dir.path(), Mode::Standalone, false))
            .await
            .unwrap();
        let mut moved = params(dir.path(), Mode::Standalone, false);
        moved.metrics_root = PathBuf::from("/srv/metrics");
        install(&host, &settings, &moved).await.unwrap();

        let crontab = host.crontab_of("perforce").unwrap();
        assert_eq!(crontab.lines().count(), 2);
        assert!(!crontab.contains("/p4/metrics"));
        assert_eq!(crontab.matches("-m /srv/metrics").count(), 2);
    }

    #[tokio::test]
    async fn test_second_instance_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = mocks::Host::new(mocks::Config::default());
        install(&host, &settings, &params(dir.path(), sdp(), false))
            .await
            .unwrap();
        let second = Mode::Sdp {
            instance: "2".to_string(),
        };
        install(&host, &settings, &params(dir.path(), second, false))
            .await
            .unwrap();

        let crontab = host.crontab_of("perforce").unwrap();
        assert_eq!(crontab.lines().count(), 4);
        for instance in ["1", "2"] {
            for name in [MONITOR_METRICS, MONITOR_WRAPPER] {
                let needle = format!("/{name} {instance} ");
                assert_eq!(crontab.matches(&needle).count(), 1, "{needle}");
            }
        }

        // Rerunning either instance changes nothing
        install(&host, &settings, &params(dir.path(), sdp(), false))
            .await
            .unwrap();
        assert_eq!(host.crontab_of("perforce").unwrap(), crontab);
    }

    #[tokio::test]
    async fn test_downloads_ignore_planted_links() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let params = params(dir.path(), sdp(), false);
        let victim = dir.path().join("victim");
        fs::write(&victim, "precious").unwrap();
        fs::create_dir_all(&settings.paths.work_dir).unwrap();
        for name in SCRIPTS {
            std::os::unix::fs::symlink(&victim, settings.paths.work_dir.join(name)).unwrap();
        }

        let host = mocks::Host::new(mocks::Config::default());
        install(&host, &settings, &params).await.unwrap();
        assert_eq!(fs::read_to_string(&victim).unwrap(), "precious");
        assert_eq!(
            fs::read_to_string(params.script_dir.join(MONITOR_METRICS)).unwrap(),
            settings.releases.script_download_url(MONITOR_METRICS)
        );

        // Only the planted links remain; the scratch directory is gone
        assert_eq!(
            fs::read_dir(&settings.paths.work_dir).unwrap().count(),
            SCRIPTS.len()
        );
    }

    #[tokio::test]
    async fn test_failed_download_leaves_crontab_alone() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let params = params(dir.path(), sdp(), false);
        let host = mocks::Host::new(mocks::Config {
            failing_urls: [settings.releases.script_download_url("monitor_metrics.py")].into(),
            ..mocks::Config::default()
        });
        assert!(install(&host, &settings, &params).await.is_err());
        assert_eq!(host.crontab_of("perforce"), None);
    }
}
