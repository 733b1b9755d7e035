// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Typed views of CLI output. Each record names the CLI view it is read
// from and the fields that view must contain.

use std::str::FromStr;

use crate::{
    driver::flashsystem::parse::{Attributes, Fields, Table},
    flashsys::errors::{DriverError, DriverResult},
};

pub trait CliRecord: Sized {
    /// The CLI command the record is read from, for error messages.
    const VIEW: &'static str;
    /// Fields that must be present for the record to be built.
    const REQUIRED: &'static [&'static str];

    fn build(fields: &dyn Fields) -> DriverResult<Self>;

    fn from_fields(fields: &dyn Fields) -> DriverResult<Self> {
        let missing = Self::REQUIRED
            .iter()
            .filter(|name| fields.field(name).is_none())
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(DriverError::BackendApi(format!(
                "{} output is missing the field(s) {}",
                Self::VIEW,
                missing.join(", ")
            )));
        }
        Self::build(fields)
    }

    fn from_attributes(attributes: &Attributes) -> DriverResult<Self> {
        Self::from_fields(attributes)
    }

    fn from_table(table: &Table) -> DriverResult<Vec<Self>> {
        table.rows().map(|row| Self::from_fields(&row)).collect()
    }
}

fn required<'a>(fields: &'a dyn Fields, name: &str) -> &'a str {
    // Presence is checked by from_fields before build is called.
    fields.field(name).unwrap_or_default()
}

fn number<T: FromStr>(view: &str, fields: &dyn Fields, name: &str) -> DriverResult<T> {
    let value = required(fields, name);
    value.trim().parse::<T>().map_err(|_| {
        DriverError::BackendApi(format!(
            "{view} field {name} has non-numeric value \"{value}\""
        ))
    })
}

fn optional(fields: &dyn Fields, name: &str) -> Option<String> {
    fields
        .field(name)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// "svcinfo lsvdisk -bytes -delim ! <vdisk>"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VdiskInfo {
    pub id: u32,
    pub name: String,
    pub status: String,
    /// Capacity in bytes.
    pub capacity: u64,
    pub vdisk_uid: String,
    pub mdisk_grp_name: Option<String>,
}

impl VdiskInfo {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

impl CliRecord for VdiskInfo {
    const VIEW: &'static str = "lsvdisk";
    const REQUIRED: &'static [&'static str] = &["id", "name", "status", "capacity", "vdisk_UID"];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(VdiskInfo {
            id: number(Self::VIEW, fields, "id")?,
            name: required(fields, "name").to_string(),
            status: required(fields, "status").to_string(),
            capacity: number(Self::VIEW, fields, "capacity")?,
            vdisk_uid: required(fields, "vdisk_UID").to_string(),
            mdisk_grp_name: optional(fields, "mdisk_grp_name"),
        })
    }
}

/// A row of "svcinfo lshost -delim !"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostSummary {
    pub id: u32,
    pub name: String,
}

impl CliRecord for HostSummary {
    const VIEW: &'static str = "lshost";
    const REQUIRED: &'static [&'static str] = &["id", "name"];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(HostSummary {
            id: number(Self::VIEW, fields, "id")?,
            name: required(fields, "name").to_string(),
        })
    }
}

/// "svcinfo lshost -delim ! <host>"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostInfo {
    pub id: u32,
    pub name: String,
    pub wwpns: Vec<String>,
    pub iscsi_names: Vec<String>,
}

impl CliRecord for HostInfo {
    const VIEW: &'static str = "lshost";
    const REQUIRED: &'static [&'static str] = &["id", "name"];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(HostInfo {
            id: number(Self::VIEW, fields, "id")?,
            name: required(fields, "name").to_string(),
            wwpns: fields
                .field_all("WWPN")
                .into_iter()
                .map(|w| w.to_string())
                .collect(),
            iscsi_names: fields
                .field_all("iscsi_name")
                .into_iter()
                .map(|n| n.to_string())
                .collect(),
        })
    }
}

/// A row of "svcinfo lshostvdiskmap -delim ! <host>"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostVdiskMap {
    pub host_id: u32,
    pub host_name: String,
    pub scsi_id: u32,
    pub vdisk_id: u32,
    pub vdisk_name: String,
    pub vdisk_uid: String,
}

impl CliRecord for HostVdiskMap {
    const VIEW: &'static str = "lshostvdiskmap";
    const REQUIRED: &'static [&'static str] = &[
        "id",
        "name",
        "SCSI_id",
        "vdisk_id",
        "vdisk_name",
        "vdisk_UID",
    ];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(HostVdiskMap {
            host_id: number(Self::VIEW, fields, "id")?,
            host_name: required(fields, "name").to_string(),
            scsi_id: number(Self::VIEW, fields, "SCSI_id")?,
            vdisk_id: number(Self::VIEW, fields, "vdisk_id")?,
            vdisk_name: required(fields, "vdisk_name").to_string(),
            vdisk_uid: required(fields, "vdisk_UID").to_string(),
        })
    }
}

/// A row of "svcinfo lsvdiskhostmap -delim ! <vdisk>"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VdiskHostMap {
    pub vdisk_id: u32,
    pub vdisk_name: String,
    pub scsi_id: u32,
    pub host_id: u32,
    pub host_name: String,
    pub vdisk_uid: String,
}

impl CliRecord for VdiskHostMap {
    const VIEW: &'static str = "lsvdiskhostmap";
    const REQUIRED: &'static [&'static str] = &[
        "id",
        "name",
        "SCSI_id",
        "host_id",
        "host_name",
        "vdisk_UID",
    ];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(VdiskHostMap {
            vdisk_id: number(Self::VIEW, fields, "id")?,
            vdisk_name: required(fields, "name").to_string(),
            scsi_id: number(Self::VIEW, fields, "SCSI_id")?,
            host_id: number(Self::VIEW, fields, "host_id")?,
            host_name: required(fields, "host_name").to_string(),
            vdisk_uid: required(fields, "vdisk_UID").to_string(),
        })
    }
}

/// "svcinfo lssystem -delim !"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SystemInfo {
    pub id: String,
    pub name: String,
    pub code_level: Option<String>,
    /// Unit suffixed, e.g. "9.53TB".
    pub total_mdisk_capacity: String,
    pub total_free_space: String,
}

impl CliRecord for SystemInfo {
    const VIEW: &'static str = "lssystem";
    const REQUIRED: &'static [&'static str] =
        &["id", "name", "total_mdisk_capacity", "total_free_space"];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(SystemInfo {
            id: required(fields, "id").to_string(),
            name: required(fields, "name").to_string(),
            code_level: optional(fields, "code_level"),
            total_mdisk_capacity: required(fields, "total_mdisk_capacity").to_string(),
            total_free_space: required(fields, "total_free_space").to_string(),
        })
    }
}

/// A row of "svcinfo lsnode -delim !"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub iscsi_name: Option<String>,
}

impl NodeSummary {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

impl CliRecord for NodeSummary {
    const VIEW: &'static str = "lsnode";
    const REQUIRED: &'static [&'static str] = &["id", "name", "status"];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(NodeSummary {
            id: required(fields, "id").to_string(),
            name: required(fields, "name").to_string(),
            status: required(fields, "status").to_string(),
            iscsi_name: optional(fields, "iscsi_name"),
        })
    }
}

/// "svcinfo lsnode -delim ! <node>"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeDetail {
    pub id: String,
    pub name: String,
    pub port_ids: Vec<String>,
    pub port_statuses: Vec<String>,
}

impl NodeDetail {
    /// WWPNs of the node's FC ports that are logged in to the fabric.
    pub fn active_wwpns(&self) -> Vec<String> {
        self.port_ids
            .iter()
            .zip(self.port_statuses.iter())
            .filter(|(_, status)| *status == "active")
            .map(|(wwpn, _)| wwpn.clone())
            .collect()
    }
}

impl CliRecord for NodeDetail {
    const VIEW: &'static str = "lsnode";
    const REQUIRED: &'static [&'static str] = &["id", "name"];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        let port_ids = fields
            .field_all("port_id")
            .into_iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>();
        let port_statuses = fields
            .field_all("port_status")
            .into_iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>();
        if port_ids.len() != port_statuses.len() {
            return Err(DriverError::BackendApi(format!(
                "{} reports {} port ids but {} port statuses",
                Self::VIEW,
                port_ids.len(),
                port_statuses.len()
            )));
        }
        Ok(NodeDetail {
            id: required(fields, "id").to_string(),
            name: required(fields, "name").to_string(),
            port_ids,
            port_statuses,
        })
    }
}

/// A row of "svcinfo lsportip -delim !"
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortIp {
    pub port_id: u32,
    pub node_id: String,
    pub ip_address: Option<String>,
}

impl CliRecord for PortIp {
    const VIEW: &'static str = "lsportip";
    const REQUIRED: &'static [&'static str] = &["id", "node_id", "IP_address"];

    fn build(fields: &dyn Fields) -> DriverResult<Self> {
        Ok(PortIp {
            port_id: number(Self::VIEW, fields, "id")?,
            node_id: required(fields, "node_id").to_string(),
            ip_address: optional(fields, "IP_address"),
        })
    }
}
