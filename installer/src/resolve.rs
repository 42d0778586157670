//! Resolution of every installation parameter, before any side effect.
//!
//! In SDP mode connection details come from the SDP environment of the instance; in
//! standalone mode they must be supplied. Either way the server is probed (reachable, then
//! logged in) so a bad connection aborts the install before anything is written.

use crate::{
    cli::Args,
    host::Host,
    perforce::{self, Connection},
    render::{check_line, p4prometheus::METRICS_FILE, push},
    settings::Settings,
    Architecture, Error,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// OS user p4d runs as unless told otherwise.
pub const DEFAULT_OS_USER: &str = "perforce";

/// Name of the p4prometheus configuration file (inside the config directory).
pub const CONFIG_FILE: &str = "p4prometheus.yaml";

/// How the server is managed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Server Deployment Package instance.
    Sdp { instance: String },
    /// Server managed outside the SDP.
    Standalone,
}

/// Everything the installers need, resolved once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Params {
    pub mode: Mode,
    pub os_user: String,
    pub os_group: String,
    pub connection: Connection,
    pub server_id: String,
    pub case_sensitive: bool,
    pub log_path: PathBuf,
    pub metrics_root: PathBuf,
    /// Legacy link to `metrics_root` (SDP only).
    pub metrics_link: Option<PathBuf>,
    pub config_dir: PathBuf,
    pub script_dir: PathBuf,
    pub push: bool,
    pub selinux: bool,
    pub arch: Architecture,
}

impl Params {
    /// SDP instance, if any.
    pub fn instance(&self) -> Option<&str> {
        match &self.mode {
            Mode::Sdp { instance } => Some(instance),
            Mode::Standalone => None,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn push_config_file(&self) -> PathBuf {
        self.config_dir.join(push::CONFIG_FILE)
    }

    pub fn metrics_output(&self) -> PathBuf {
        self.metrics_root.join(METRICS_FILE)
    }
}

/// Resolves [Params] from the command line, the settings, and the host.
pub async fn resolve<H: Host>(host: &H, settings: &Settings, args: &Args) -> Result<Params, Error> {
    if !host.is_root() {
        return Err(Error::NotRoot);
    }
    let mode = match (&args.instance, args.no_sdp) {
        (Some(instance), true) => return Err(Error::ConflictingMode(instance.clone())),
        (None, false) => return Err(Error::MissingMode),
        (Some(instance), false) => {
            check_instance(instance)?;
            Mode::Sdp {
                instance: instance.clone(),
            }
        }
        (None, true) => Mode::Standalone,
    };
    let paths = &settings.paths;
    let os_user = args
        .os_user
        .clone()
        .unwrap_or_else(|| DEFAULT_OS_USER.to_string());
    check_line("osuser", &os_user)?;
    let metrics_root = absolute(
        "metrics root",
        args.metrics_root.as_ref().unwrap_or(&paths.metrics_root),
    )?;

    // Connection details, ownership, and locations depend on the mode
    let (os_group, connection, log_path, metrics_link, config_dir, script_dir) = match &mode {
        Mode::Sdp { instance } => {
            if args.explicit_connection {
                warn!("ignoring -p/-u: connection details come from the SDP environment");
            }
            if args.p4log.is_some() {
                warn!("ignoring --p4log: the log path comes from the SDP environment");
            }
            let os_group = host.group_owner(&paths.sdp_root).await?;
            let script = paths.sdp_environment_script();
            let env = host.load_environment(&script, instance).await?;
            info!(script = ?script, instance = instance.as_str(), "loaded SDP environment");
            let variable = |name: &'static str| {
                env.get(name)
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .ok_or(Error::MissingVariable(name))
            };
            let connection = Connection {
                bin: env
                    .get("P4BIN")
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .unwrap_or_else(|| perforce::DEFAULT_P4BIN.to_string()),
                port: variable("P4PORT")?,
                user: variable("P4USER")?,
                env: env.clone(),
            };
            let log_path = PathBuf::from(variable("LOGS")?).join("log");
            let metrics_link = absolute(
                "metrics link",
                args.metrics_link.as_ref().unwrap_or(&paths.metrics_link),
            )?;
            (
                os_group,
                connection,
                Some(log_path),
                Some(metrics_link),
                paths.sdp_config_dir(),
                paths.sdp_script_dir(),
            )
        }
        Mode::Standalone => {
            if args.metrics_link.is_some() {
                warn!("ignoring -l: the metrics link is only created for SDP instances");
            }
            let port = args
                .port
                .clone()
                .filter(|p| !p.is_empty())
                .ok_or(Error::MissingConnection("P4PORT"))?;
            let user = args
                .user
                .clone()
                .filter(|u| !u.is_empty())
                .ok_or(Error::MissingConnection("P4USER"))?;
            let os_group = host.primary_group(&os_user).await?;
            (
                os_group,
                Connection::new(port, user),
                args.p4log.clone(),
                None,
                paths.config_dir.clone(),
                paths.bin_dir.clone(),
            )
        }
    };
    check_line("P4PORT", &connection.port)?;
    check_line("P4USER", &connection.user)?;
    let config_dir = absolute(
        "config dir",
        args.config_dir.as_ref().unwrap_or(&config_dir),
    )?;

    // Probe availability, then authentication
    let info = host
        .p4(&connection, &["info", "-s"])
        .await
        .map_err(|e| Error::Unreachable {
            port: connection.port.clone(),
            reason: e.to_string(),
        })?;
    host.p4(&connection, &["login", "-s"])
        .await
        .map_err(|e| Error::NotAuthenticated {
            port: connection.port.clone(),
            user: connection.user.clone(),
            reason: e.to_string(),
        })?;
    info!(
        port = connection.port.as_str(),
        user = connection.user.as_str(),
        "connected to server"
    );
    let server_id = perforce::parse_server_id(&host.p4(&connection, &["serverid"]).await?);
    let log_path = match log_path {
        Some(log_path) => log_path,
        None => match host.p4(&connection, &["configure", "show"]).await {
            Ok(output) => perforce::parse_log_path(&output).ok_or(Error::MissingLogPath)?,
            Err(e) => {
                warn!(error = ?e, "failed to read server configuration");
                return Err(Error::MissingLogPath);
            }
        },
    };
    let log_path = absolute("log path", &log_path)?;

    let params = Params {
        mode,
        os_user,
        os_group,
        case_sensitive: perforce::parse_case_sensitive(&info),
        connection,
        server_id,
        log_path,
        metrics_root,
        metrics_link,
        config_dir,
        script_dir,
        push: args.push,
        selinux: host.selinux_enforcing().await,
        arch: host.architecture()?,
    };
    info!(
        instance = params.instance().unwrap_or("-"),
        os_user = params.os_user.as_str(),
        os_group = params.os_group.as_str(),
        server_id = params.server_id.as_str(),
        log_path = ?params.log_path,
        metrics_root = ?params.metrics_root,
        selinux = params.selinux,
        arch = %params.arch,
        "resolved parameters"
    );
    Ok(params)
}

/// SDP instances are short names (`1`, `master`) that end up in paths and cron lines.
fn check_instance(instance: &str) -> Result<(), Error> {
    let valid = !instance.is_empty()
        && instance
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !instance.starts_with('-');
    if !valid {
        return Err(Error::InvalidArgument(format!("invalid SDP instance: {instance}")));
    }
    Ok(())
}

fn absolute(what: &str, path: &Path) -> Result<PathBuf, Error> {
    let Some(value) = path.to_str() else {
        return Err(Error::InvalidArgument(format!("{what} is not valid UTF-8")));
    };
    check_line(what, value)?;
    if !path.is_absolute() {
        return Err(Error::InvalidArgument(format!(
            "{what} must be absolute: {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mocks::{self, Call};
    use std::collections::BTreeMap;

    fn standalone() -> Args {
        Args {
            no_sdp: true,
            port: Some("ssl:perforce:1666".to_string()),
            user: Some("admin".to_string()),
            explicit_connection: true,
            ..Args::default()
        }
    }

    fn sdp_config() -> mocks::Config {
        mocks::Config {
            path_groups: BTreeMap::from([(PathBuf::from("/p4"), "p4admins".to_string())]),
            environment: Some(BTreeMap::from([
                ("P4PORT".to_string(), "ssl:1666".to_string()),
                ("P4USER".to_string(), "perforce".to_string()),
                ("P4BIN".to_string(), "/p4/1/bin/p4_1".to_string()),
                ("LOGS".to_string(), "/p4/1/logs".to_string()),
                ("P4TICKETS".to_string(), "/p4/1/.p4tickets".to_string()),
            ])),
            ..mocks::Config::default()
        }
    }

    #[tokio::test]
    async fn test_standalone() {
        let host = mocks::Host::new(mocks::Config::default());
        let params = resolve(&host, &Settings::default(), &standalone())
            .await
            .unwrap();
        assert_eq!(params.mode, Mode::Standalone);
        assert_eq!(params.instance(), None);
        assert_eq!(params.os_user, "perforce");
        assert_eq!(params.os_group, "perforce");
        assert_eq!(params.connection, Connection::new("ssl:perforce:1666", "admin"));
        assert_eq!(params.server_id, "master.1");
        assert!(params.case_sensitive);
        assert_eq!(params.log_path, PathBuf::from("/srv/p4root/logs/log"));
        assert_eq!(params.metrics_root, PathBuf::from("/p4/metrics"));
        assert_eq!(params.metrics_link, None);
        assert_eq!(params.config_file(), PathBuf::from("/etc/p4prometheus/p4prometheus.yaml"));
        assert_eq!(params.script_dir, PathBuf::from("/usr/local/bin"));
        assert_eq!(params.arch, Architecture::Amd64);

        // Resolution only reads
        assert!(host.calls().iter().all(|call| !call.is_mutation()));
    }

    #[tokio::test]
    async fn test_sdp() {
        let host = mocks::Host::new(sdp_config());
        let args = Args {
            instance: Some("1".to_string()),
            push: true,
            ..Args::default()
        };
        let params = resolve(&host, &Settings::default(), &args).await.unwrap();
        assert_eq!(params.instance(), Some("1"));
        assert_eq!(params.os_group, "p4admins");
        assert_eq!(params.connection.bin, "/p4/1/bin/p4_1");
        assert_eq!(params.connection.port, "ssl:1666");
        assert_eq!(
            params.connection.env.get("P4TICKETS").map(String::as_str),
            Some("/p4/1/.p4tickets")
        );
        assert_eq!(params.log_path, PathBuf::from("/p4/1/logs/log"));
        assert_eq!(params.metrics_link, Some(PathBuf::from("/hxlogs/metrics")));
        assert_eq!(params.config_dir, PathBuf::from("/p4/common/config"));
        assert_eq!(params.script_dir, PathBuf::from("/p4/common/site/bin"));
        assert_eq!(
            params.push_config_file(),
            PathBuf::from("/p4/common/config/.push_metrics.cfg")
        );
        assert!(host.calls().contains(&Call::LoadEnvironment {
            script: PathBuf::from("/p4/common/bin/p4_vars"),
            instance: "1".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_mode_required() {
        let host = mocks::Host::new(mocks::Config::default());
        let err = resolve(&host, &Settings::default(), &Args::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingMode));

        let args = Args {
            instance: Some("1".to_string()),
            ..standalone()
        };
        let err = resolve(&host, &Settings::default(), &args).await.unwrap_err();
        assert!(matches!(err, Error::ConflictingMode(instance) if instance == "1"));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_requires_root() {
        let host = mocks::Host::new(mocks::Config {
            root: false,
            ..mocks::Config::default()
        });
        let err = resolve(&host, &Settings::default(), &standalone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotRoot));
    }

    #[tokio::test]
    async fn test_standalone_requires_connection() {
        let host = mocks::Host::new(mocks::Config::default());
        let args = Args {
            port: None,
            ..standalone()
        };
        let err = resolve(&host, &Settings::default(), &args).await.unwrap_err();
        assert!(matches!(err, Error::MissingConnection("P4PORT")));
        let args = Args {
            user: Some(String::new()),
            ..standalone()
        };
        let err = resolve(&host, &Settings::default(), &args).await.unwrap_err();
        assert!(matches!(err, Error::MissingConnection("P4USER")));
    }

    #[tokio::test]
    async fn test_unreachable_then_unauthenticated() {
        let host = mocks::Host::new(mocks::Config {
            reachable: false,
            ..mocks::Config::default()
        });
        let err = resolve(&host, &Settings::default(), &standalone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unreachable { port, .. } if port == "ssl:perforce:1666"));

        let host = mocks::Host::new(mocks::Config {
            authenticated: false,
            ..mocks::Config::default()
        });
        let err = resolve(&host, &Settings::default(), &standalone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated { user, .. } if user == "admin"));
    }

    #[tokio::test]
    async fn test_sdp_environment_incomplete() {
        let mut config = sdp_config();
        if let Some(env) = config.environment.as_mut() {
            env.remove("LOGS");
        }
        let host = mocks::Host::new(config);
        let args = Args {
            instance: Some("1".to_string()),
            ..Args::default()
        };
        let err = resolve(&host, &Settings::default(), &args).await.unwrap_err();
        assert!(matches!(err, Error::MissingVariable("LOGS")));

        let host = mocks::Host::new(mocks::Config::default());
        let err = resolve(&host, &Settings::default(), &args).await.unwrap_err();
        assert!(matches!(err, Error::UnknownGroup(_)));
    }

    #[tokio::test]
    async fn test_log_path() {
        // Explicit path wins
        let host = mocks::Host::new(mocks::Config::default());
        let args = Args {
            p4log: Some(PathBuf::from("/var/log/p4d.log")),
            ..standalone()
        };
        let params = resolve(&host, &Settings::default(), &args).await.unwrap();
        assert_eq!(params.log_path, PathBuf::from("/var/log/p4d.log"));

        // Server without P4LOG
        let host = mocks::Host::new(mocks::Config {
            configure: "P4PORT=1666 (-p)\n".to_string(),
            ..mocks::Config::default()
        });
        let err = resolve(&host, &Settings::default(), &standalone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingLogPath));
    }

    #[tokio::test]
    async fn test_case_insensitive_server() {
        let host = mocks::Host::new(mocks::Config {
            case_handling: "insensitive".to_string(),
            ..mocks::Config::default()
        });
        let params = resolve(&host, &Settings::default(), &standalone())
            .await
            .unwrap();
        assert!(!params.case_sensitive);
    }

    #[tokio::test]
    async fn test_rejects_bad_arguments() {
        let host = mocks::Host::new(mocks::Config::default());
        for args in [
            Args {
                instance: Some("1; reboot".to_string()),
                ..Args::default()
            },
            Args {
                metrics_root: Some(PathBuf::from("metrics")),
                ..standalone()
            },
            Args {
                config_dir: Some(PathBuf::from("etc/p4prometheus")),
                ..standalone()
            },
        ] {
            let err = resolve(&host, &Settings::default(), &args).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{err:?}");
        }
    }

    #[test]
    fn test_check_instance() {
        assert!(check_instance("1").is_ok());
        assert!(check_instance("master_2").is_ok());
        assert!(check_instance("").is_err());
        assert!(check_instance("-1").is_err());
        assert!(check_instance("../1").is_err());
    }
}
