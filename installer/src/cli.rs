//! Command-line arguments.
//!
//! The historical single-dash spellings (`-nosdp`, `-osuser`, `-push`) are rewritten to
//! their double-dash form before parsing, so `-push` is not read as `-p ush`.

use clap::{parser::ValueSource, Arg, ArgAction, ArgMatches, Command};
use std::{ffi::OsString, path::PathBuf};

/// Flag for verbose output
pub const VERBOSE_FLAG: &str = "verbose";

const INSTANCE: &str = "instance";
const NOSDP: &str = "nosdp";
const METRICS_ROOT: &str = "metrics-root";
const METRICS_LINK: &str = "metrics-link";
const OSUSER: &str = "osuser";
const PORT: &str = "port";
const USER: &str = "user";
const CONFIG_DIR: &str = "config-dir";
const PUSH: &str = "push";
const P4LOG: &str = "p4log";
const SETTINGS: &str = "settings";
const HELP: &str = "help";

/// Single-dash long flags accepted for compatibility.
const LEGACY_FLAGS: &[&str] = &[NOSDP, OSUSER, PUSH];

/// Parsed command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args {
    /// SDP instance (e.g. `1`).
    pub instance: Option<String>,
    /// Install against a server that is not managed by the SDP.
    pub no_sdp: bool,
    pub metrics_root: Option<PathBuf>,
    pub metrics_link: Option<PathBuf>,
    pub os_user: Option<String>,
    /// `P4PORT` (flag or environment).
    pub port: Option<String>,
    /// `P4USER` (flag or environment).
    pub user: Option<String>,
    /// True if the port or user was given on the command line (not inherited).
    pub explicit_connection: bool,
    pub config_dir: Option<PathBuf>,
    pub push: bool,
    pub p4log: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub verbose: bool,
    pub help: bool,
}

/// Definition of the command line.
pub fn command() -> Command {
    Command::new("install-p4prom")
        .version(crate::crate_version())
        .about("Install node_exporter, p4prometheus, and the monitor_metrics scripts.")
        .after_help(
            "Specify either the SDP instance (e.g. 1), or -nosdp.\n\
With -nosdp, P4PORT and P4USER must identify a server you can already reach\n\
and are logged in to (run 'p4 trust' first if required).\n\n\
Examples:\n  install-p4prom 1\n  install-p4prom -nosdp -m /p4metrics -osuser perforce -p ssl:1666 -u admin",
        )
        .disable_help_flag(true)
        .arg(
            Arg::new(HELP)
                .short('h')
                .long(HELP)
                .help("Print usage and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .help("Log debug output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(INSTANCE)
                .help("SDP instance to monitor")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new(NOSDP)
                .long(NOSDP)
                .help("The server is not managed by the SDP")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(METRICS_ROOT)
                .short('m')
                .long(METRICS_ROOT)
                .help("Directory metrics are written to (default: /p4/metrics)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(METRICS_LINK)
                .short('l')
                .long(METRICS_LINK)
                .help("Legacy link to the metrics directory, SDP only (default: /hxlogs/metrics)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(OSUSER)
                .long(OSUSER)
                .help("OS user p4d runs as (default: perforce)")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new(PORT)
                .short('p')
                .long(PORT)
                .env("P4PORT")
                .help("P4PORT of the server (-nosdp only)")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new(USER)
                .short('u')
                .long(USER)
                .env("P4USER")
                .help("P4USER to connect as (-nosdp only)")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new(CONFIG_DIR)
                .short('c')
                .long(CONFIG_DIR)
                .help("Directory for p4prometheus.yaml and the push-gateway config")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(PUSH)
                .long(PUSH)
                .help("Install the push-gateway config file and cron jobs")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(P4LOG)
                .long(P4LOG)
                .help("Server log path, when the server does not report P4LOG (-nosdp only)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(SETTINGS)
                .long(SETTINGS)
                .help("Path to YAML settings file (versions, download URLs, paths)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

/// Rewrites legacy single-dash long flags (`-push`) to `--push`.
pub fn normalize<I, T>(argv: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    argv.into_iter()
        .map(|arg| {
            let arg: OsString = arg.into();
            match arg.to_str().and_then(|a| a.strip_prefix('-')) {
                Some(flag) if LEGACY_FLAGS.contains(&flag) => OsString::from(format!("--{flag}")),
                _ => arg,
            }
        })
        .collect()
}

/// Parses a full command line (including the program name).
pub fn parse<I, T>(argv: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let matches = command().try_get_matches_from(normalize(argv))?;
    Ok(Args::from_matches(&matches))
}

impl Args {
    fn from_matches(matches: &ArgMatches) -> Self {
        let explicit =
            |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);
        Self {
            instance: matches.get_one::<String>(INSTANCE).cloned(),
            no_sdp: matches.get_flag(NOSDP),
            metrics_root: matches.get_one::<PathBuf>(METRICS_ROOT).cloned(),
            metrics_link: matches.get_one::<PathBuf>(METRICS_LINK).cloned(),
            os_user: matches.get_one::<String>(OSUSER).cloned(),
            port: matches.get_one::<String>(PORT).cloned(),
            user: matches.get_one::<String>(USER).cloned(),
            explicit_connection: explicit(PORT) || explicit(USER),
            config_dir: matches.get_one::<PathBuf>(CONFIG_DIR).cloned(),
            push: matches.get_flag(PUSH),
            p4log: matches.get_one::<PathBuf>(P4LOG).cloned(),
            settings: matches.get_one::<PathBuf>(SETTINGS).cloned(),
            verbose: matches.get_flag(VERBOSE_FLAG),
            help: matches.get_flag(HELP),
        }
    }
}
