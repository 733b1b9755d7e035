// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fs::File, io::BufReader, path::Path, path::PathBuf, str::FromStr, time::Duration};

use serde::{de, Deserialize, Deserializer};

use crate::{
    driver::Protocol,
    flashsys::errors::{DriverError, DriverResult},
};

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_SSH_CONN_TIMEOUT: u64 = 30;
const DEFAULT_ISCSI_PORT: u16 = 3260;
const DEFAULT_DD_BLOCKSIZE: &str = "1M";
const DEFAULT_COPY_WAIT_LOG_INTERVAL: u64 = 5;
const DEFAULT_VOLPOOL_NAME: &str = "mdiskgrp0";

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_ssh_conn_timeout() -> u64 {
    DEFAULT_SSH_CONN_TIMEOUT
}

fn default_protocol() -> Protocol {
    Protocol::Fc
}

/// Accept any capitalization of a protocol name.
fn deserialize_protocol<'de, D>(deserializer: D) -> Result<Protocol, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Protocol::from_str(name.trim()).map_err(|_| {
        de::Error::custom(format!(
            "unknown connection protocol \"{name}\"; expected FC or iSCSI"
        ))
    })
}

fn default_true() -> bool {
    true
}

fn default_iscsi_port() -> u16 {
    DEFAULT_ISCSI_PORT
}

fn default_dd_blocksize() -> String {
    DEFAULT_DD_BLOCKSIZE.to_string()
}

fn default_copy_wait_log_interval() -> u64 {
    DEFAULT_COPY_WAIT_LOG_INTERVAL
}

fn default_volpool_name() -> String {
    DEFAULT_VOLPOOL_NAME.to_string()
}

/// Driver options, read from a JSON document.
#[derive(Clone, Debug, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct FlashSystemConfig {
    pub san_ip: String,
    #[serde(default = "default_ssh_port")]
    pub san_ssh_port: u16,
    pub san_login: String,
    #[serde(default)]
    pub san_password: Option<String>,
    #[serde(default)]
    pub san_private_key: Option<PathBuf>,
    /// Seconds allowed for establishing the SSH connection.
    #[serde(default = "default_ssh_conn_timeout")]
    pub ssh_conn_timeout: u64,
    #[serde(
        default = "default_protocol",
        deserialize_with = "deserialize_protocol"
    )]
    pub flashsystem_connection_protocol: Protocol,
    /// Allow a vdisk to be mapped to more than one host.
    #[serde(default = "default_true")]
    pub flashsystem_multihostmap_enabled: bool,
    #[serde(default)]
    pub flashsystem_iscsi_portid: u32,
    #[serde(default = "default_volpool_name")]
    pub flashsystem_volpool_name: String,
    #[serde(default)]
    pub iscsi_ip_address: Option<String>,
    #[serde(default = "default_iscsi_port")]
    pub iscsi_port: u16,
    #[serde(default)]
    pub volume_backend_name: Option<String>,
    #[serde(default)]
    pub reserved_percentage: u8,
    /// Block size for volume copies, dd style: "1M", "512K", "4096".
    #[serde(default = "default_dd_blocksize")]
    pub volume_dd_blocksize: String,
    /// Seconds between "still waiting" messages while a copy blocks.
    #[serde(default = "default_copy_wait_log_interval")]
    pub copy_wait_log_interval: u64,
}

impl FlashSystemConfig {
    pub fn new(san_ip: &str, san_login: &str) -> FlashSystemConfig {
        FlashSystemConfig {
            san_ip: san_ip.to_string(),
            san_ssh_port: default_ssh_port(),
            san_login: san_login.to_string(),
            san_password: None,
            san_private_key: None,
            ssh_conn_timeout: default_ssh_conn_timeout(),
            flashsystem_connection_protocol: default_protocol(),
            flashsystem_multihostmap_enabled: default_true(),
            flashsystem_iscsi_portid: 0,
            flashsystem_volpool_name: default_volpool_name(),
            iscsi_ip_address: None,
            iscsi_port: default_iscsi_port(),
            volume_backend_name: None,
            reserved_percentage: 0,
            volume_dd_blocksize: default_dd_blocksize(),
            copy_wait_log_interval: default_copy_wait_log_interval(),
        }
    }

    /// Read and validate a configuration file.
    pub fn from_file(path: &Path) -> DriverResult<FlashSystemConfig> {
        let file = File::open(path).map_err(|err| {
            DriverError::Chained(
                format!("Failed to open configuration file {}", path.display()),
                Box::new(DriverError::from(err)),
            )
        })?;
        let config: FlashSystemConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the options for consistency.
    pub fn validate(&self) -> DriverResult<()> {
        if self.san_ip.trim().is_empty() {
            return Err(DriverError::InvalidInput(
                "san_ip must be set".to_string(),
            ));
        }
        if self.san_login.trim().is_empty() {
            return Err(DriverError::InvalidInput(
                "san_login must be set".to_string(),
            ));
        }
        if self.san_password.is_none() && self.san_private_key.is_none() {
            return Err(DriverError::InvalidInput(
                "Password or SSH private key is required for authentication: set either san_password or san_private_key option".to_string(),
            ));
        }
        if self.reserved_percentage > 100 {
            return Err(DriverError::InvalidInput(format!(
                "reserved_percentage {} exceeds 100",
                self.reserved_percentage
            )));
        }
        if self.flashsystem_volpool_name.trim().is_empty() {
            return Err(DriverError::InvalidInput(
                "flashsystem_volpool_name must not be empty".to_string(),
            ));
        }
        self.block_size_bytes()?;
        Ok(())
    }

    /// The configured copy block size in bytes.
    pub fn block_size_bytes(&self) -> DriverResult<u64> {
        parse_block_size(&self.volume_dd_blocksize)
    }

    pub fn copy_wait_log_interval(&self) -> Duration {
        Duration::from_secs(self.copy_wait_log_interval.max(1))
    }
}

/// Parse a dd style block size: a positive integer optionally followed
/// by K, M or G (case-insensitive, powers of 1024).
pub fn parse_block_size(value: &str) -> DriverResult<u64> {
    let trimmed = value.trim();
    let invalid = || {
        DriverError::InvalidInput(format!(
            "Incorrect value \"{value}\" for volume_dd_blocksize"
        ))
    };

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k' | 'K') => (&trimmed[..trimmed.len() - 1], 1u64 << 10),
        Some('m' | 'M') => (&trimmed[..trimmed.len() - 1], 1u64 << 20),
        Some('g' | 'G') => (&trimmed[..trimmed.len() - 1], 1u64 << 30),
        Some(_) => (trimmed, 1u64),
        None => return Err(invalid()),
    };

    let count = digits.parse::<u64>().map_err(|_| invalid())?;
    match count.checked_mul(multiplier) {
        Some(0) | None => Err(invalid()),
        Some(bytes) => Ok(bytes),
    }
}
