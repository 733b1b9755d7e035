// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io, sync};

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug)]
pub enum DriverError {
    Msg(String),
    Chained(String, Box<DriverError>),

    /// An array command could not be run, or exited non-zero.
    CommandFailure {
        cmd: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The array rejected a request or answered in an unexpected way.
    BackendApi(String),
    InvalidInput(String),
    ManageExistingInvalidReference {
        existing_ref: String,
        reason: String,
    },

    Io(io::Error),
    Serde(serde_json::error::Error),
    Regex(regex::Error),
}

impl DriverError {
    /// The stderr captured from a failed command, searched through any
    /// chain of context.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            DriverError::CommandFailure { ref stderr, .. } => Some(stderr),
            DriverError::Chained(_, ref err) => err.stderr(),
            _ => None,
        }
    }

    /// True if the failed command reported the given CMMVC error code.
    pub fn has_cli_code(&self, code: &str) -> bool {
        self.stderr().map(|s| s.contains(code)).unwrap_or(false)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Msg(ref s) => write!(f, "{s}"),
            DriverError::Chained(ref s, ref e) => write!(f, "{s}; caused by: {e}"),
            DriverError::CommandFailure {
                ref cmd,
                code,
                ref stdout,
                ref stderr,
            } => {
                write!(
                    f,
                    "command \"{cmd}\" failed with exit code {}; stdout: {}; stderr: {}",
                    code.map(|c| c.to_string())
                        .unwrap_or_else(|| "<none>".to_string()),
                    stdout.trim(),
                    stderr.trim()
                )
            }
            DriverError::BackendApi(ref s) => write!(f, "Backend API error: {s}"),
            DriverError::InvalidInput(ref s) => write!(f, "Invalid input: {s}"),
            DriverError::ManageExistingInvalidReference {
                ref existing_ref,
                ref reason,
            } => write!(
                f,
                "Manage existing volume failed due to invalid backend reference {existing_ref}: {reason}"
            ),
            DriverError::Io(ref err) => write!(f, "IO error: {err}"),
            DriverError::Serde(ref err) => write!(f, "Serde error: {err}"),
            DriverError::Regex(ref err) => write!(f, "Regex error: {err}"),
        }
    }
}

impl Error for DriverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DriverError::Chained(_, ref err) => Some(err.as_ref()),
            DriverError::Io(ref err) => Some(err),
            DriverError::Serde(ref err) => Some(err),
            DriverError::Regex(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> DriverError {
        DriverError::Io(err)
    }
}

impl From<serde_json::error::Error> for DriverError {
    fn from(err: serde_json::error::Error) -> DriverError {
        DriverError::Serde(err)
    }
}

impl From<regex::Error> for DriverError {
    fn from(err: regex::Error) -> DriverError {
        DriverError::Regex(err)
    }
}

impl<T> From<sync::PoisonError<T>> for DriverError {
    fn from(err: sync::PoisonError<T>) -> DriverError {
        DriverError::Msg(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_code_found_through_chain() {
        let err = DriverError::Chained(
            "Failed to map vdisk".to_string(),
            Box::new(DriverError::CommandFailure {
                cmd: "svctask mkvdiskhostmap".to_string(),
                code: Some(1),
                stdout: String::new(),
                stderr: "CMMVC6071E The VDisk-to-host mapping was not created".to_string(),
            }),
        );
        assert!(err.has_cli_code("CMMVC6071E"));
        assert!(!err.has_cli_code("CMMVC6045E"));
        assert!(!DriverError::Msg("x".to_string()).has_cli_code("CMMVC6071E"));
    }
}
