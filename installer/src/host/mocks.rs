//! In-memory [Host] that records every side effect.
//!
//! Downloads write the requested URL into the destination file and archives registered with
//! [Config::with_archive] are unpacked into real files, so installers can be run end to end
//! inside a temporary directory.

use crate::{perforce::Connection, settings::Releases, Architecture, Error};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// A side effect requested from the [Host].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    AddServiceUser(String),
    Chown {
        path: PathBuf,
        user: String,
        group: String,
    },
    LoadEnvironment {
        script: PathBuf,
        instance: String,
    },
    P4(Vec<String>),
    Fetch {
        url: String,
        dest: PathBuf,
    },
    Extract {
        archive: PathBuf,
        into: PathBuf,
    },
    Decompress(PathBuf),
    Label(PathBuf),
    Systemctl(Vec<String>),
    SetCrontab {
        user: String,
        contents: String,
    },
}

impl Call {
    /// Returns true if the call changes the host (anything but lookups and p4 queries).
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::LoadEnvironment { .. } | Call::P4(_))
    }
}

/// Behavior of the mock.
#[derive(Clone, Debug)]
pub struct Config {
    pub root: bool,
    pub arch: Architecture,
    pub hostname: String,
    pub selinux: bool,
    /// Existing accounts and their primary group.
    pub users: BTreeMap<String, String>,
    /// Group owning a path.
    pub path_groups: BTreeMap<PathBuf, String>,
    /// Result of sourcing an environment script (`None` fails).
    pub environment: Option<BTreeMap<String, String>>,
    pub reachable: bool,
    pub authenticated: bool,
    pub server_id: String,
    pub case_handling: String,
    /// Output of `p4 configure show`.
    pub configure: String,
    /// Archive file name to `(relative path, contents)` entries.
    pub archives: BTreeMap<String, Vec<(String, Vec<u8>)>>,
    pub failing_urls: BTreeSet<String>,
    pub inactive_services: BTreeSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: true,
            arch: Architecture::Amd64,
            hostname: "p4host".to_string(),
            selinux: false,
            users: BTreeMap::from([("perforce".to_string(), "perforce".to_string())]),
            path_groups: BTreeMap::new(),
            environment: None,
            reachable: true,
            authenticated: true,
            server_id: "master.1".to_string(),
            case_handling: "sensitive".to_string(),
            configure: "P4ROOT=/srv/p4root (-r)\nP4LOG=/srv/p4root/logs/log (configure)\n"
                .to_string(),
            archives: BTreeMap::new(),
            failing_urls: BTreeSet::new(),
            inactive_services: BTreeSet::new(),
        }
    }
}

impl Config {
    /// Registers the contents of an archive (by file name).
    pub fn with_archive(mut self, name: &str, entries: Vec<(String, Vec<u8>)>) -> Self {
        self.archives.insert(name.to_string(), entries);
        self
    }

    /// Registers the node_exporter release archive for `releases`.
    pub fn with_node_exporter(self, releases: &Releases) -> Self {
        let stem = releases.node_exporter_stem(self.arch);
        let entries = vec![
            (format!("{stem}/node_exporter"), b"node_exporter".to_vec()),
            (format!("{stem}/LICENSE"), b"Apache-2.0".to_vec()),
        ];
        self.with_archive(&format!("{stem}.tar.gz"), entries)
    }
}

/// Recording mock of a host.
pub struct Host {
    config: Config,
    calls: Mutex<Vec<Call>>,
    users: Mutex<BTreeMap<String, String>>,
    crontabs: Mutex<BTreeMap<String, String>>,
}

impl Host {
    pub fn new(config: Config) -> Self {
        let users = config.users.clone();
        Self {
            config,
            calls: Mutex::new(Vec::new()),
            users: Mutex::new(users),
            crontabs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Every side effect requested so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Current crontab of `user`, if one was ever set.
    pub fn crontab_of(&self, user: &str) -> Option<String> {
        self.crontabs.lock().unwrap().get(user).cloned()
    }

    /// Seeds the crontab of `user`.
    pub fn seed_crontab(&self, user: &str, contents: &str) {
        self.crontabs
            .lock()
            .unwrap()
            .insert(user.to_string(), contents.to_string());
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn failed(program: &str, stderr: &str) -> Error {
        Error::CommandFailed {
            program: program.to_string(),
            status: "exit status: 1".to_string(),
            stderr: stderr.to_string(),
        }
    }
}

impl super::Host for Host {
    fn is_root(&self) -> bool {
        self.config.root
    }

    fn architecture(&self) -> Result<Architecture, Error> {
        Ok(self.config.arch)
    }

    fn hostname(&self) -> Result<String, Error> {
        Ok(self.config.hostname.clone())
    }

    async fn selinux_enforcing(&self) -> bool {
        self.config.selinux
    }

    async fn user_exists(&self, user: &str) -> Result<bool, Error> {
        Ok(self.users.lock().unwrap().contains_key(user))
    }

    async fn add_service_user(&self, user: &str) -> Result<(), Error> {
        self.record(Call::AddServiceUser(user.to_string()));
        self.users
            .lock()
            .unwrap()
            .insert(user.to_string(), user.to_string());
        Ok(())
    }

    async fn primary_group(&self, user: &str) -> Result<String, Error> {
        self.users
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .ok_or_else(|| Error::UnknownUser(user.to_string()))
    }

    async fn group_owner(&self, path: &Path) -> Result<String, Error> {
        self.config
            .path_groups
            .get(path)
            .cloned()
            .ok_or_else(|| Error::UnknownGroup(path.display().to_string()))
    }

    async fn chown(&self, path: &Path, user: &str, group: &str) -> Result<(), Error> {
        self.record(Call::Chown {
            path: path.to_path_buf(),
            user: user.to_string(),
            group: group.to_string(),
        });
        Ok(())
    }

    async fn load_environment(
        &self,
        script: &Path,
        instance: &str,
    ) -> Result<BTreeMap<String, String>, Error> {
        self.record(Call::LoadEnvironment {
            script: script.to_path_buf(),
            instance: instance.to_string(),
        });
        self.config
            .environment
            .clone()
            .ok_or_else(|| Self::failed(&script.display().to_string(), "unknown instance"))
    }

    async fn p4(&self, connection: &Connection, command: &[&str]) -> Result<String, Error> {
        self.record(Call::P4(
            connection.args(command).into_iter().map(String::from).collect(),
        ));
        match command.first().copied() {
            Some("info") if !self.config.reachable => Err(Self::failed(
                "p4",
                "Connect to server failed; check $P4PORT.",
            )),
            Some("info") => Ok(format!(
                "User name: {}\nServer address: {}\nCase Handling: {}\n",
                connection.user, connection.port, self.config.case_handling
            )),
            Some("login") if !self.config.authenticated => Err(Self::failed(
                "p4",
                "Your session has expired, please login again.",
            )),
            Some("login") => Ok(format!("User {} ticket expires in 12 hours.\n", connection.user)),
            Some("serverid") => Ok(format!("Server identity: {}\n", self.config.server_id)),
            Some("configure") => Ok(self.config.configure.clone()),
            _ => Ok(String::new()),
        }
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), Error> {
        self.record(Call::Fetch {
            url: url.to_string(),
            dest: dest.to_path_buf(),
        });
        if self.config.failing_urls.contains(url) {
            return Err(Error::Io(io::Error::new(io::ErrorKind::NotFound, url)));
        }
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)?;
        file.write_all(url.as_bytes())?;
        Ok(())
    }

    async fn extract(&self, archive: &Path, into: &Path) -> Result<(), Error> {
        self.record(Call::Extract {
            archive: archive.to_path_buf(),
            into: into.to_path_buf(),
        });
        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(entries) = self.config.archives.get(&name) else {
            return Err(Self::failed("tar", "not in gzip format"));
        };
        for (path, contents) in entries {
            let path = into.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    async fn decompress(&self, file: &Path) -> Result<PathBuf, Error> {
        self.record(Call::Decompress(file.to_path_buf()));
        let Some(decompressed) = file.to_str().and_then(|f| f.strip_suffix(".gz")) else {
            return Err(Self::failed("gunzip", "unknown suffix"));
        };
        let decompressed = PathBuf::from(decompressed);
        std::fs::rename(file, &decompressed)?;
        Ok(decompressed)
    }

    async fn label_binary(&self, path: &Path) -> Result<(), Error> {
        self.record(Call::Label(path.to_path_buf()));
        Ok(())
    }

    async fn systemctl(&self, args: &[&str]) -> Result<(), Error> {
        self.record(Call::Systemctl(
            args.iter().map(|arg| arg.to_string()).collect(),
        ));
        Ok(())
    }

    async fn service_active(&self, unit: &str) -> Result<bool, Error> {
        Ok(!self.config.inactive_services.contains(unit))
    }

    async fn crontab(&self, user: &str) -> Result<String, Error> {
        Ok(self.crontab_of(user).unwrap_or_default())
    }

    async fn set_crontab(&self, user: &str, contents: &str) -> Result<(), Error> {
        self.record(Call::SetCrontab {
            user: user.to_string(),
            contents: contents.to_string(),
        });
        self.seed_crontab(user, contents);
        Ok(())
    }
}
