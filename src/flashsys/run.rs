// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// One driver operation requested from the command line, and its execution.

use std::path::Path;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    driver::{
        Connector, DeviceConnector, DriverAction, ExistingRef, FlashSystemDriver, SimArray,
        SimConnector, Snapshot, Volume, VolumeDriver,
    },
    flashsys::{
        config::FlashSystemConfig,
        errors::{DriverError, DriverResult},
    },
};

/// Status assumed for volumes named on the command line.
const ASSUMED_STATUS: &str = "available";

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Setup,
    CreateVolume {
        id: Uuid,
        size: u64,
    },
    DeleteVolume {
        id: Uuid,
    },
    ExtendVolume {
        id: Uuid,
        size: u64,
        new_size: u64,
    },
    CreateSnapshot {
        id: Uuid,
        volume_id: Uuid,
        volume_size: u64,
    },
    DeleteSnapshot {
        id: Uuid,
        volume_id: Uuid,
    },
    CreateFromSnapshot {
        id: Uuid,
        size: u64,
        snapshot_id: Uuid,
        volume_id: Uuid,
        volume_size: u64,
    },
    Clone {
        id: Uuid,
        size: u64,
        src_id: Uuid,
        src_size: u64,
    },
    /// Attach for the given connector, or for the local host if none.
    Attach {
        id: Uuid,
        connector: Option<Connector>,
    },
    Detach {
        id: Uuid,
        connector: Option<Connector>,
        force: bool,
    },
    Manage {
        id: Uuid,
        existing_ref: ExistingRef,
    },
    ManageGetSize {
        id: Uuid,
        existing_ref: ExistingRef,
    },
    Unmanage {
        id: Uuid,
    },
    Stats,
}

fn volume(id: Uuid, size: u64) -> Volume {
    Volume::new(id, size).with_status(ASSUMED_STATUS)
}

fn snapshot(id: Uuid, volume_id: Uuid, volume_size: u64) -> Snapshot {
    Snapshot::new(id, &volume(volume_id, volume_size))
}

/// Build a driver from the configuration file, or around a fresh
/// simulated array if sim is set.
pub fn build_driver(config_path: Option<&Path>, sim: bool) -> DriverResult<FlashSystemDriver> {
    if sim {
        let mut config = match config_path {
            Some(path) => FlashSystemConfig::from_file(path)?,
            None => FlashSystemConfig::new("sim", "superuser"),
        };
        if config.san_password.is_none() && config.san_private_key.is_none() {
            config.san_password = Some("sim".to_string());
        }
        let array = SimArray::new(&config.flashsystem_volpool_name)?;
        let connector = SimConnector::new(array.clone());
        info!("Using the simulated array");
        FlashSystemDriver::new(config, Box::new(array), Box::new(connector))
    } else {
        let path = config_path.ok_or_else(|| {
            DriverError::InvalidInput(
                "A configuration file is required unless --sim is given".to_string(),
            )
        })?;
        FlashSystemDriver::from_config(FlashSystemConfig::from_file(path)?)
    }
}

fn connector_or_local(
    connector: Option<Connector>,
    local: &dyn DeviceConnector,
) -> DriverResult<Connector> {
    match connector {
        Some(c) => Ok(c),
        None => local.local_connector(),
    }
}

/// Set the driver up and perform the request. The result is a JSON
/// document describing what happened.
pub fn run(driver: &FlashSystemDriver, request: Request) -> DriverResult<Value> {
    driver.do_setup()?;
    driver.check_for_setup_error()?;

    match request {
        Request::Setup => Ok(json!({
            "protocol": driver.config().flashsystem_connection_protocol,
            "pool": driver.array().pool(),
        })),
        Request::CreateVolume { id, size } => {
            let vol = volume(id, size);
            let action = driver.create_volume(&vol)?;
            Ok(json!({ "volume": vol.name, "changed": action.is_changed() }))
        }
        Request::DeleteVolume { id } => {
            let vol = volume(id, 0);
            let action = driver.delete_volume(&vol)?;
            Ok(json!({ "volume": vol.name, "changed": action.is_changed() }))
        }
        Request::ExtendVolume { id, size, new_size } => {
            let vol = volume(id, size);
            driver.extend_volume(&vol, new_size)?;
            Ok(json!({ "volume": vol.name, "size": new_size }))
        }
        Request::CreateSnapshot {
            id,
            volume_id,
            volume_size,
        } => {
            let snap = snapshot(id, volume_id, volume_size);
            driver.create_snapshot(&snap)?;
            Ok(json!({ "snapshot": snap.name }))
        }
        Request::DeleteSnapshot { id, volume_id } => {
            let snap = snapshot(id, volume_id, 0);
            let action = driver.delete_snapshot(&snap)?;
            Ok(json!({ "snapshot": snap.name, "changed": action.is_changed() }))
        }
        Request::CreateFromSnapshot {
            id,
            size,
            snapshot_id,
            volume_id,
            volume_size,
        } => {
            let vol = volume(id, size);
            driver.create_volume_from_snapshot(
                &vol,
                &snapshot(snapshot_id, volume_id, volume_size),
            )?;
            Ok(json!({ "volume": vol.name }))
        }
        Request::Clone {
            id,
            size,
            src_id,
            src_size,
        } => {
            let vol = volume(id, size);
            driver.create_cloned_volume(&vol, &volume(src_id, src_size))?;
            Ok(json!({ "volume": vol.name }))
        }
        Request::Attach { id, connector } => {
            let connector = connector_or_local(connector, driver.device_connector())?;
            let info = driver.initialize_connection(&volume(id, 0), &connector)?;
            Ok(serde_json::to_value(info)?)
        }
        Request::Detach {
            id,
            connector,
            force,
        } => {
            let connector = connector_or_local(connector, driver.device_connector())?;
            let info = driver.terminate_connection(&volume(id, 0), &connector, force)?;
            Ok(serde_json::to_value(info)?)
        }
        Request::Manage { id, existing_ref } => {
            let vol = volume(id, 0);
            let action = driver.manage_existing(&vol, &existing_ref)?;
            Ok(json!({ "volume": vol.name, "result": action.to_string() }))
        }
        Request::ManageGetSize { id, existing_ref } => {
            let size = driver.manage_existing_get_size(&volume(id, 0), &existing_ref)?;
            Ok(json!({ "size": size }))
        }
        Request::Unmanage { id } => {
            driver.unmanage(&volume(id, 0))?;
            Ok(json!({}))
        }
        Request::Stats => Ok(serde_json::to_value(driver.get_volume_stats(true)?)?),
    }
}
