// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Handles running array CLI commands.
// Commands are run through the system ssh binary. The binary is located
// once, when the executor is constructed, by searching an explicit list of
// directories rather than PATH. Password authentication additionally
// requires sshpass, which receives the password through its environment so
// that it never appears on a command line. ssh hands the joined arguments to
// the array's shell, so every argument is quoted for that shell first.

use std::{
    borrow::Cow,
    fmt::{self, Debug},
    path::PathBuf,
    process::Command,
};

use itertools::Itertools;

use crate::flashsys::{
    config::FlashSystemConfig,
    errors::{DriverError, DriverResult},
};

const BINARIES_PATHS: [&str; 4] = ["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

const SSH: &str = "ssh";
const SSHPASS: &str = "sshpass";

/// Find the binary with the given name by looking in likely locations.
/// Return None if no binary was found.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    BINARIES_PATHS
        .iter()
        .map(|pre| [pre, name].iter().collect::<PathBuf>())
        .find(|path| path.exists())
}

/// Quote an argument so that the remote shell passes it on as one word.
/// Arguments made only of characters the shell treats literally are left
/// alone.
fn quote_for_remote(arg: &str) -> Cow<'_, str> {
    let literal = !arg.is_empty()
        && arg.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '-' | '_' | '.' | ',' | ':' | '/' | '@' | '=' | '+' | '%')
        });
    if literal {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

/// Output captured from a successful command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one array command line and returns its output. A command that
/// exits non-zero is reported as DriverError::CommandFailure.
pub trait CliExecutor: Debug + Send + Sync {
    fn execute(&self, args: &[String]) -> DriverResult<CliOutput>;
}

/// Runs commands over an SSH session to the array's management address.
pub struct SshExecutor {
    ssh: PathBuf,
    sshpass: Option<PathBuf>,
    destination: String,
    port: u16,
    private_key: Option<PathBuf>,
    password: Option<String>,
    connect_timeout: u64,
}

impl Debug for SshExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshExecutor")
            .field("ssh", &self.ssh)
            .field("destination", &self.destination)
            .field("port", &self.port)
            .field("private_key", &self.private_key)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Locate the binaries needed for the configured authentication method.
    pub fn new(config: &FlashSystemConfig) -> DriverResult<SshExecutor> {
        let ssh = find_binary(SSH).ok_or_else(|| binary_missing(SSH))?;

        let sshpass = if config.san_private_key.is_none() && config.san_password.is_some() {
            Some(find_binary(SSHPASS).ok_or_else(|| binary_missing(SSHPASS))?)
        } else {
            None
        };

        Ok(SshExecutor {
            ssh,
            sshpass,
            destination: format!("{}@{}", config.san_login, config.san_ip),
            port: config.san_ssh_port,
            private_key: config.san_private_key.clone(),
            password: config.san_password.clone(),
            connect_timeout: config.ssh_conn_timeout,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = match (&self.sshpass, &self.password) {
            (Some(sshpass), Some(password)) => {
                let mut cmd = Command::new(sshpass);
                cmd.env("SSHPASS", password).arg("-e").arg(&self.ssh);
                cmd
            }
            _ => {
                let mut cmd = Command::new(&self.ssh);
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        };
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout))
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(ref key) = self.private_key {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(&self.destination);
        cmd
    }
}

impl CliExecutor for SshExecutor {
    fn execute(&self, args: &[String]) -> DriverResult<CliOutput> {
        let cmd_line = args.iter().join(" ");
        debug!("Running array command: {cmd_line}");

        let output = self
            .command()
            .args(args.iter().map(|a| quote_for_remote(a).into_owned()))
            .output()
            .map_err(|err| {
                DriverError::Chained(
                    format!(
                        "Failed to run {} for command \"{cmd_line}\"",
                        self.ssh.display()
                    ),
                    Box::new(DriverError::from(err)),
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            trace!("Command \"{cmd_line}\" returned: {stdout}");
            Ok(CliOutput { stdout, stderr })
        } else {
            Err(DriverError::CommandFailure {
                cmd: cmd_line,
                code: output.status.code(),
                stdout,
                stderr,
            })
        }
    }
}

fn binary_missing(name: &str) -> DriverError {
    DriverError::Msg(format!(
        "Executable {name} was not found in any of {}",
        BINARIES_PATHS.iter().join(", ")
    ))
}

/// Build an argument vector from string slices.
pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}
