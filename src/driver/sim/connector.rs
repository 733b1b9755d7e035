// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{
    driver::{
        connector::{copy_volume, DeviceConnector},
        sim::array::SimArray,
        types::{ConnectionInfo, Connector},
    },
    flashsys::errors::{DriverError, DriverResult},
};

/// Attaches LUNs of a SimArray by handing out the backing files of the
/// vdisks mapped to the local host. Clones share their state.
#[derive(Clone, Debug)]
pub struct SimConnector {
    array: SimArray,
    local: Connector,
    attached: Arc<Mutex<Vec<PathBuf>>>,
    fail_copies: Arc<Mutex<usize>>,
}

impl SimConnector {
    /// A connector for a local host with one FC port and an iSCSI
    /// initiator name.
    pub fn new(array: SimArray) -> SimConnector {
        SimConnector::with_connector(
            array,
            Connector {
                host: "flashsys-local".to_string(),
                initiator: Some("iqn.1994-05.com.example:flashsys-local".to_string()),
                wwpns: vec!["10000090fa000001".to_string()],
                ip: Some("192.168.0.100".to_string()),
                multipath: false,
            },
        )
    }

    pub fn with_connector(array: SimArray, local: Connector) -> SimConnector {
        SimConnector {
            array,
            local,
            attached: Arc::new(Mutex::new(Vec::new())),
            fail_copies: Arc::new(Mutex::new(0)),
        }
    }

    /// Devices currently connected.
    pub fn attached(&self) -> DriverResult<Vec<PathBuf>> {
        Ok(self.attached.lock()?.clone())
    }

    /// Make the next copy fail after the devices are attached.
    pub fn fail_next_copy(&self) -> DriverResult<()> {
        *self.fail_copies.lock()? += 1;
        Ok(())
    }
}

impl DeviceConnector for SimConnector {
    fn local_connector(&self) -> DriverResult<Connector> {
        Ok(self.local.clone())
    }

    fn connect_volume(&self, info: &ConnectionInfo) -> DriverResult<PathBuf> {
        let lun = info.target_lun().ok_or_else(|| {
            DriverError::InvalidInput("Connection properties lack target_lun".to_string())
        })?;
        let device = self.array.lun_backing(&self.local, lun)?.ok_or_else(|| {
            DriverError::Msg(format!(
                "No LUN {lun} is mapped to the local host {}",
                self.local.host
            ))
        })?;
        self.attached.lock()?.push(device.clone());
        debug!("Simulated attach of LUN {lun} as {}", device.display());
        Ok(device)
    }

    fn disconnect_volume(&self, _info: &ConnectionInfo, device: &Path) -> DriverResult<()> {
        let mut attached = self.attached.lock()?;
        match attached.iter().position(|d| d == device) {
            Some(index) => {
                attached.remove(index);
                Ok(())
            }
            None => Err(DriverError::Msg(format!(
                "{} is not attached",
                device.display()
            ))),
        }
    }

    fn copy_volume(
        &self,
        src: &Path,
        dest: &Path,
        size_mb: u64,
        block_size: u64,
    ) -> DriverResult<()> {
        {
            let mut failures = self.fail_copies.lock()?;
            if *failures > 0 {
                *failures -= 1;
                return Err(DriverError::Msg(format!(
                    "Simulated failure copying {} to {}",
                    src.display(),
                    dest.display()
                )));
            }
        }
        copy_volume(src, dest, size_mb, block_size)
    }
}
