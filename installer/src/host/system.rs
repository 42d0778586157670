//! [Host] backed by the local machine.

use super::Host;
use crate::{perforce::Connection, Architecture, Error};
use std::{
    collections::BTreeMap,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

/// Snippet run by `bash -c` to source an environment script and dump the result.
///
/// `$0` is the script and `$1` its argument.
const LOAD_ENVIRONMENT: &str = r#"source "$0" "$1" > /dev/null 2>&1 || exit 1; env -0"#;

/// The local machine.
#[derive(Clone, Copy, Debug, Default)]
pub struct System;

impl System {
    /// Runs `program` with `args`, returning standard output on success.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, Error> {
        self.run_with_env(program, args, &BTreeMap::new()).await
    }

    async fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        debug!(program, ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Host for System {
    fn is_root(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    fn architecture(&self) -> Result<Architecture, Error> {
        Architecture::from_target(std::env::consts::ARCH)
    }

    fn hostname(&self) -> Result<String, Error> {
        let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")?;
        Ok(short_hostname(&hostname))
    }

    async fn selinux_enforcing(&self) -> bool {
        match self.run("getenforce", &[]).await {
            Ok(mode) => mode.trim() == "Enforcing",
            Err(_) => false,
        }
    }

    async fn user_exists(&self, user: &str) -> Result<bool, Error> {
        let status = Command::new("id")
            .arg("-u")
            .arg(user)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    async fn add_service_user(&self, user: &str) -> Result<(), Error> {
        self.run(
            "useradd",
            &["--no-create-home", "--shell", "/bin/false", user],
        )
        .await?;
        Ok(())
    }

    async fn primary_group(&self, user: &str) -> Result<String, Error> {
        match self.run("id", &["-gn", user]).await {
            Ok(group) => Ok(group.trim().to_string()),
            Err(Error::CommandFailed { .. }) => Err(Error::UnknownUser(user.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn group_owner(&self, path: &Path) -> Result<String, Error> {
        let gid = std::fs::metadata(path)?.gid().to_string();
        let entry = self
            .run("getent", &["group", gid.as_str()])
            .await
            .map_err(|_| Error::UnknownGroup(gid.clone()))?;
        parse_group_entry(&entry).ok_or(Error::UnknownGroup(gid))
    }

    async fn chown(&self, path: &Path, user: &str, group: &str) -> Result<(), Error> {
        let owner = format!("{user}:{group}");
        let path = path.to_string_lossy();
        self.run("chown", &[owner.as_str(), &*path]).await?;
        Ok(())
    }

    async fn load_environment(
        &self,
        script: &Path,
        instance: &str,
    ) -> Result<BTreeMap<String, String>, Error> {
        let script = script.to_string_lossy();
        let output = Command::new("bash")
            .args(["-c", LOAD_ENVIRONMENT, &*script, instance])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: script.into_owned(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_environment(&output.stdout))
    }

    async fn p4(&self, connection: &Connection, command: &[&str]) -> Result<String, Error> {
        self.run_with_env(&connection.bin, &connection.args(command), &connection.env)
            .await
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), Error> {
        debug!(url, ?dest, "downloading");
        let download = |source| Error::Download {
            url: url.to_string(),
            source,
        };
        let response = reqwest::get(url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download)?;
        let bytes = response.bytes().await.map_err(download)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn extract(&self, archive: &Path, into: &Path) -> Result<(), Error> {
        let archive = archive.to_string_lossy();
        let into = into.to_string_lossy();
        self.run("tar", &["-xzf", &*archive, "-C", &*into]).await?;
        Ok(())
    }

    async fn decompress(&self, file: &Path) -> Result<PathBuf, Error> {
        let Some(decompressed) = file.to_str().and_then(|f| f.strip_suffix(".gz")) else {
            return Err(Error::InvalidArgument(format!(
                "not a .gz file: {}",
                file.display()
            )));
        };
        let decompressed = PathBuf::from(decompressed);
        self.run("gunzip", &["-f", &*file.to_string_lossy()]).await?;
        Ok(decompressed)
    }

    async fn label_binary(&self, path: &Path) -> Result<(), Error> {
        let path = path.to_string_lossy();

        // Adding fails if a rule for the path already exists
        if self
            .run("semanage", &["fcontext", "-a", "-t", "bin_t", &*path])
            .await
            .is_err()
        {
            self.run("semanage", &["fcontext", "-m", "-t", "bin_t", &*path])
                .await?;
        }
        self.run("restorecon", &["-v", &*path]).await?;
        Ok(())
    }

    async fn systemctl(&self, args: &[&str]) -> Result<(), Error> {
        self.run("systemctl", args).await?;
        Ok(())
    }

    async fn service_active(&self, unit: &str) -> Result<bool, Error> {
        let output = Command::new("systemctl")
            .args(["is-active", unit])
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "active")
    }

    async fn crontab(&self, user: &str) -> Result<String, Error> {
        let output = Command::new("crontab")
            .args(["-l", "-u", user])
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab for") {
            return Ok(String::new());
        }
        Err(Error::CommandFailed {
            program: "crontab".to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }

    async fn set_crontab(&self, user: &str, contents: &str) -> Result<(), Error> {
        let mut child = Command::new("crontab")
            .args(["-u", user, "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(contents.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: "crontab".to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Parses the NUL-separated output of `env -0`.
pub fn parse_environment(output: &[u8]) -> BTreeMap<String, String> {
    output
        .split(|b| *b == 0)
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Extracts the group name from a `getent group` line (`name:x:gid:members`).
pub fn parse_group_entry(entry: &str) -> Option<String> {
    let name = entry.lines().next()?.split(':').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Strips any domain from the kernel host name (`p4.example.com` becomes `p4`).
pub fn short_hostname(hostname: &str) -> String {
    let hostname = hostname.trim();
    hostname.split('.').next().unwrap_or(hostname).to_string()
}
