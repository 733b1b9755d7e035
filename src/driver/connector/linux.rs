// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Attaches LUNs through the Linux SCSI stack. FC LUNs appear after a rescan
// of the SCSI hosts, iSCSI LUNs after a login to the target. Either way the
// device is located through its /dev/disk/by-path link.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use retry::{delay::Fixed, retry_with_index};
use serde_json::Value;

use crate::{
    driver::{
        connector::DeviceConnector,
        flashsystem::find_binary,
        types::{ConnectionInfo, Connector},
    },
    flashsys::errors::{DriverError, DriverResult},
};

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";
const INITIATOR_NAME_PATH: &str = "/etc/iscsi/initiatorname.iscsi";
const FC_HOST_DIR: &str = "/sys/class/fc_host";
const SCSI_HOST_DIR: &str = "/sys/class/scsi_host";
const BY_PATH_DIR: &str = "/dev/disk/by-path";

const ISCSIADM: &str = "iscsiadm";

/// Milliseconds between looks for a newly attached device.
const DEVICE_WAIT_INTERVAL_MS: u64 = 1000;
const DEVICE_WAIT_TRIES: usize = 15;

#[derive(Debug, Default)]
pub struct LinuxConnector;

impl LinuxConnector {
    pub fn new() -> LinuxConnector {
        LinuxConnector
    }
}

fn read_trimmed(path: &Path) -> DriverResult<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|err| {
            DriverError::Chained(
                format!("Failed to read {}", path.display()),
                Box::new(DriverError::Io(err)),
            )
        })
}

fn local_initiator() -> Option<String> {
    let contents = fs::read_to_string(INITIATOR_NAME_PATH).ok()?;
    contents
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .find_map(|l| l.trim().strip_prefix("InitiatorName="))
        .map(|i| i.trim().to_string())
}

fn local_wwpns() -> Vec<String> {
    let entries = match fs::read_dir(FC_HOST_DIR) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|e| fs::read_to_string(e.path().join("port_name")).ok())
        .map(|name| name.trim().trim_start_matches("0x").to_lowercase())
        .collect()
}

/// Ask every SCSI host to scan for new LUNs.
fn rescan_scsi_hosts() -> DriverResult<()> {
    for entry in fs::read_dir(SCSI_HOST_DIR)?.filter_map(Result::ok) {
        let scan = entry.path().join("scan");
        if let Err(err) = fs::write(&scan, "- - -") {
            warn!("Failed to rescan {}: {err}", scan.display());
        }
    }
    Ok(())
}

fn iscsiadm(args: &[&str]) -> DriverResult<()> {
    let binary = find_binary(ISCSIADM).ok_or_else(|| {
        DriverError::Msg(format!("Unable to find executable \"{ISCSIADM}\""))
    })?;
    debug!("Running {ISCSIADM} {}", args.join(" "));
    let output = Command::new(&binary).args(args).output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(DriverError::CommandFailure {
            cmd: format!("{ISCSIADM} {}", args.join(" ")),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn string_field<'a>(info: &'a ConnectionInfo, name: &str) -> DriverResult<&'a str> {
    info.data.get(name).and_then(Value::as_str).ok_or_else(|| {
        DriverError::InvalidInput(format!(
            "Connection properties for {} lack {name}",
            info.driver_volume_type
        ))
    })
}

fn lun(info: &ConnectionInfo) -> DriverResult<u32> {
    info.target_lun().ok_or_else(|| {
        DriverError::InvalidInput("Connection properties lack target_lun".to_string())
    })
}

/// The by-path link names under which the LUN can appear.
fn by_path_suffixes(info: &ConnectionInfo) -> DriverResult<Vec<String>> {
    let lun = lun(info)?;
    match info.driver_volume_type {
        "fibre_channel" => {
            let wwns = info
                .data
                .get("target_wwn")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect::<Vec<_>>())
                .unwrap_or_default();
            if wwns.is_empty() {
                return Err(DriverError::InvalidInput(
                    "FC connection properties lack target_wwn".to_string(),
                ));
            }
            Ok(wwns
                .into_iter()
                .map(|w| format!("-fc-0x{}-lun-{lun}", w.to_lowercase()))
                .collect())
        }
        "iscsi" => {
            let portal = string_field(info, "target_portal")?;
            let iqn = string_field(info, "target_iqn")?;
            Ok(vec![format!("ip-{portal}-iscsi-{iqn}-lun-{lun}")])
        }
        other => Err(DriverError::InvalidInput(format!(
            "Unsupported volume type {other}"
        ))),
    }
}

fn find_by_path(suffixes: &[String]) -> Option<PathBuf> {
    fs::read_dir(BY_PATH_DIR)
        .ok()?
        .filter_map(Result::ok)
        .find(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            suffixes.iter().any(|s| name.ends_with(s.as_str()))
        })
        .map(|e| e.path())
}

impl DeviceConnector for LinuxConnector {
    fn local_connector(&self) -> DriverResult<Connector> {
        Ok(Connector {
            host: read_trimmed(Path::new(HOSTNAME_PATH))?,
            initiator: local_initiator(),
            wwpns: local_wwpns(),
            ip: None,
            multipath: false,
        })
    }

    fn connect_volume(&self, info: &ConnectionInfo) -> DriverResult<PathBuf> {
        if info.driver_volume_type == "iscsi" {
            let portal = string_field(info, "target_portal")?;
            let iqn = string_field(info, "target_iqn")?;
            iscsiadm(&["-m", "node", "-T", iqn, "-p", portal, "--op", "new"])?;
            if let Err(err) = iscsiadm(&["-m", "node", "-T", iqn, "-p", portal, "--login"]) {
                // Already logged in is reported as a failure by iscsiadm.
                debug!("iSCSI login to {iqn} at {portal} reported: {err}");
            }
        } else {
            rescan_scsi_hosts()?;
        }

        let suffixes = by_path_suffixes(info)?;
        let link = retry_with_index(
            Fixed::from_millis(DEVICE_WAIT_INTERVAL_MS).take(DEVICE_WAIT_TRIES),
            |i| {
                trace!("Device lookup attempt {i}");
                find_by_path(&suffixes).ok_or("device link not present")
            },
        )
        .map_err(|err| {
            DriverError::Msg(format!(
                "Device for {} did not appear: {err}",
                suffixes.join(" or ")
            ))
        })?;

        let device = fs::canonicalize(&link)?;
        info!("Attached {} as {}", link.display(), device.display());
        Ok(device)
    }

    fn disconnect_volume(&self, _info: &ConnectionInfo, device: &Path) -> DriverResult<()> {
        let name = device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DriverError::InvalidInput(format!("{} is not a device", device.display()))
            })?;
        let delete = Path::new("/sys/block")
            .join(&name)
            .join("device")
            .join("delete");
        fs::write(&delete, "1").map_err(|err| {
            DriverError::Chained(
                format!("Failed to remove SCSI device {name}"),
                Box::new(DriverError::Io(err)),
            )
        })?;
        info!("Removed SCSI device {name}");
        Ok(())
    }
}
