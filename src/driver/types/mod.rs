// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use serde_json::Value;
use uuid::Uuid;

mod actions;

pub use crate::driver::types::actions::{
    CreateAction, DeleteAction, DriverAction, MappingCreateAction, MappingDeleteAction,
    RenameAction,
};

pub const GIB: u64 = 1 << 30;
pub const MIB: u64 = 1 << 20;

/// Block protocol used between hosts and the array.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    serde_derive::Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::VariantArray,
)]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[serde(rename = "FC")]
    #[strum(serialize = "FC")]
    Fc,
    #[serde(rename = "iSCSI")]
    #[strum(serialize = "iSCSI")]
    Iscsi,
}

/// A volume as known to the block-storage service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    pub id: Uuid,
    pub name: String,
    /// Size in GiB.
    pub size: u64,
    pub status: String,
    pub display_name: Option<String>,
}

impl Volume {
    pub fn new(id: Uuid, size: u64) -> Volume {
        Volume {
            id,
            name: format!("volume-{id}"),
            size,
            status: "creating".to_string(),
            display_name: None,
        }
    }

    pub fn with_status(mut self, status: &str) -> Volume {
        self.status = status.to_string();
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub id: Uuid,
    pub name: String,
    pub volume_id: Uuid,
    pub volume_name: String,
    /// Size of the source volume in GiB.
    pub volume_size: u64,
    /// Status of the source volume when the snapshot was requested.
    pub volume_status: String,
    pub status: String,
}

impl Snapshot {
    pub fn new(id: Uuid, volume: &Volume) -> Snapshot {
        Snapshot {
            id,
            name: format!("snapshot-{id}"),
            volume_id: volume.id,
            volume_name: volume.name.clone(),
            volume_size: volume.size,
            volume_status: volume.status.clone(),
            status: "creating".to_string(),
        }
    }
}

/// Properties of the host asking for a connection.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct Connector {
    pub host: String,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default)]
    pub wwpns: Vec<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub multipath: bool,
}

/// A reference to a vdisk that already exists on the array.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExistingRef {
    SourceName(String),
    SourceId(String),
}

impl ExistingRef {
    /// Interpret a key/value reference as supplied by a caller.
    pub fn from_map(map: &BTreeMap<String, String>) -> Option<ExistingRef> {
        map.get("source-name")
            .map(|n| ExistingRef::SourceName(n.clone()))
            .or_else(|| {
                map.get("source-id")
                    .map(|i| ExistingRef::SourceId(i.clone()))
            })
    }

    /// The object argument to hand to the CLI.
    pub fn object(&self) -> &str {
        match self {
            ExistingRef::SourceName(n) => n,
            ExistingRef::SourceId(i) => i,
        }
    }
}

impl Display for ExistingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExistingRef::SourceName(n) => write!(f, "{{source-name: {n}}}"),
            ExistingRef::SourceId(i) => write!(f, "{{source-id: {i}}}"),
        }
    }
}

/// What a host needs in order to attach a volume.
#[derive(Clone, Debug, PartialEq, serde_derive::Serialize)]
pub struct ConnectionInfo {
    pub driver_volume_type: &'static str,
    pub data: serde_json::Map<String, Value>,
}

impl ConnectionInfo {
    pub fn target_lun(&self) -> Option<u32> {
        self.data
            .get("target_lun")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok())
    }
}

#[derive(Clone, Debug, PartialEq, serde_derive::Serialize)]
pub struct VolumeStats {
    pub volume_backend_name: String,
    pub vendor_name: String,
    pub driver_version: String,
    pub storage_protocol: Protocol,
    pub total_capacity_gb: f64,
    pub free_capacity_gb: f64,
    pub reserved_percentage: u8,
    #[serde(rename = "QoS_support")]
    pub qos_support: bool,
    pub multiattach: bool,
    pub pool_name: String,
}

/// Whole GiB needed to hold the given number of bytes.
pub fn bytes_to_gib_ceil(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}
