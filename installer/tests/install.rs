//! End-to-end installs against the recording host, inside a temporary directory.

use p4prom_installer::{
    cli::{self, Args},
    host::mocks::{self, Call},
    install,
    render::{crontab::Crontab, p4prometheus},
    settings::{ServicePoll, Settings},
    Error,
};
use std::{collections::BTreeMap, fs, path::Path};
use tempfile::TempDir;

fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.paths.sdp_root = dir.join("p4");
    settings.paths.systemd_dir = dir.join("etc/systemd/system");
    settings.paths.bin_dir = dir.join("usr/local/bin");
    settings.paths.work_dir = dir.join("tmp");
    settings.paths.config_dir = dir.join("etc/p4prometheus");
    settings.paths.metrics_root = dir.join("p4/metrics");
    settings.paths.metrics_link = dir.join("hxlogs/metrics");
    settings.service_poll = ServicePoll {
        attempts: 2,
        interval_secs: 0,
    };
    settings
}

fn host(settings: &Settings, config: mocks::Config) -> mocks::Host {
    mocks::Host::new(config.with_node_exporter(&settings.releases))
}

fn standalone(extra: &[&str]) -> Args {
    let mut argv = vec![
        "install-p4prom",
        "-nosdp",
        "-p",
        "ssl:perforce:1666",
        "-u",
        "admin",
        "-osuser",
        "perforce",
    ];
    argv.extend_from_slice(extra);
    cli::parse(argv).unwrap()
}

fn sdp_config(settings: &Settings) -> mocks::Config {
    mocks::Config {
        path_groups: BTreeMap::from([(settings.paths.sdp_root.clone(), "perforce".to_string())]),
        environment: Some(BTreeMap::from([
            ("P4PORT".to_string(), "ssl:1666".to_string()),
            ("P4USER".to_string(), "perforce".to_string()),
            ("LOGS".to_string(), "/p4/1/logs".to_string()),
        ])),
        server_id: "commit.1".to_string(),
        ..mocks::Config::default()
    }
}

fn units(settings: &Settings) -> Vec<String> {
    let mut units: Vec<String> = fs::read_dir(&settings.paths.systemd_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    units.sort();
    units
}

fn crontab(host: &mocks::Host) -> Crontab {
    Crontab::parse(&host.crontab_of("perforce").unwrap_or_default())
}

#[tokio::test]
async fn test_standalone_install() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let host = host(&settings, mocks::Config::default());
    let params = install::run(&host, &settings, &standalone(&[]))
        .await
        .unwrap();

    // One config document
    let config_dir = &settings.paths.config_dir;
    assert_eq!(fs::read_dir(config_dir).unwrap().count(), 1);
    let rendered = fs::read_to_string(config_dir.join("p4prometheus.yaml")).unwrap();
    let config: p4prometheus::Config = serde_yaml::from_str(&rendered).unwrap();
    assert_eq!(config.log_path, "/srv/p4root/logs/log");
    assert_eq!(config.server_id, "master.1");
    assert_eq!(config.sdp_instance, "");

    // Two units, both enabled and restarted
    assert_eq!(units(&settings), vec!["node_exporter.service", "p4prometheus.service"]);
    let calls = host.calls();
    for unit in ["node_exporter.service", "p4prometheus.service"] {
        for action in ["enable", "restart"] {
            assert!(calls.contains(&Call::Systemctl(vec![action.to_string(), unit.to_string()])));
        }
    }

    // Scraper entries
    let crontab = crontab(&host);
    assert_eq!(crontab.count("monitor_metrics.sh"), 1);
    assert_eq!(crontab.count("monitor_wrapper.sh"), 1);
    assert_eq!(crontab.count("push_metrics.sh"), 0);
    assert!(crontab.render().contains(&format!(
        "monitor_metrics.sh -p ssl:perforce:1666 -u admin -nosdp -m {}",
        params.metrics_root.display()
    )));
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_crontab_entries() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let host = host(&settings, mocks::Config::default());
    host.seed_crontab("perforce", "0 2 * * * /usr/local/bin/backup.sh\n");
    let args = standalone(&["-push"]);
    install::run(&host, &settings, &args).await.unwrap();
    let first = host.crontab_of("perforce").unwrap();
    install::run(&host, &settings, &args).await.unwrap();
    assert_eq!(host.crontab_of("perforce").unwrap(), first);
    assert_eq!(first.lines().count(), 5);
    assert!(first.starts_with("0 2 * * * /usr/local/bin/backup.sh\n"));
}

#[tokio::test]
async fn test_push() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let host = host(&settings, mocks::Config::default());
    install::run(&host, &settings, &standalone(&["-push"]))
        .await
        .unwrap();

    let config_dir = &settings.paths.config_dir;
    assert_eq!(fs::read_dir(config_dir).unwrap().count(), 2);
    let push = fs::read_to_string(config_dir.join(".push_metrics.cfg")).unwrap();
    assert!(push.contains("\nmetrics_instance=p4host\n"));
    assert_eq!(push.matches("\nenabled=").count(), 1);
    assert!(push.ends_with("\nenabled=0\n"));

    let crontab = crontab(&host);
    assert_eq!(crontab.count("push_metrics.sh"), 1);
    assert_eq!(crontab.count("report_instance_data.sh"), 1);
    assert_eq!(crontab.render().lines().count(), 4);
}

#[tokio::test]
async fn test_sdp_install() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let host = host(&settings, sdp_config(&settings));
    let params = install::run(&host, &settings, &cli::parse(["install-p4prom", "1", "-push"]).unwrap())
        .await
        .unwrap();

    let config_file = settings.paths.sdp_root.join("common/config/p4prometheus.yaml");
    let config: p4prometheus::Config =
        serde_yaml::from_str(&fs::read_to_string(config_file).unwrap()).unwrap();
    assert_eq!(config.sdp_instance, "1");
    assert_eq!(config.log_path, "/p4/1/logs/log");
    assert_eq!(config.server_id, "commit.1");

    let scripts = settings.paths.sdp_root.join("common/site/bin");
    assert!(scripts.join("monitor_metrics.sh").is_file());
    assert_eq!(
        fs::read_link(&settings.paths.metrics_link).unwrap(),
        params.metrics_root
    );
    let push =
        fs::read_to_string(settings.paths.sdp_root.join("common/config/.push_metrics.cfg")).unwrap();
    assert!(push.contains("\nmetrics_instance=p4host-1\n"));
    assert!(crontab(&host)
        .render()
        .contains(&format!("{} 1 ", scripts.join("monitor_metrics.sh").display())));
}

#[tokio::test]
async fn test_missing_mode_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let host = host(&settings, mocks::Config::default());
    let args = cli::parse(["install-p4prom", "-p", "1666", "-u", "admin"]).unwrap();
    let err = install::run(&host, &settings, &args).await.unwrap_err();
    assert!(matches!(err, Error::MissingMode));
    assert!(host.calls().is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unreachable_server_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let host = host(
        &settings,
        mocks::Config {
            reachable: false,
            ..mocks::Config::default()
        },
    );
    let err = install::run(&host, &settings, &standalone(&["-push"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unreachable { .. }));
    assert!(host.calls().iter().all(|call| !call.is_mutation()));
    assert_eq!(host.crontab_of("perforce"), None);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_explicit_log_path() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let host = host(
        &settings,
        mocks::Config {
            configure: String::new(),
            ..mocks::Config::default()
        },
    );
    let err = install::run(&host, &settings, &standalone(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingLogPath));

    install::run(&host, &settings, &standalone(&["--p4log", "/var/log/p4d.log"]))
        .await
        .unwrap();
    let rendered =
        fs::read_to_string(settings.paths.config_dir.join("p4prometheus.yaml")).unwrap();
    let config: p4prometheus::Config = serde_yaml::from_str(&rendered).unwrap();
    assert_eq!(config.log_path, "/var/log/p4d.log");
}
