// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Attaching array LUNs to the host the driver runs on.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

use crate::{
    driver::types::{ConnectionInfo, Connector},
    flashsys::errors::DriverResult,
};

mod copy;
mod linux;

pub use self::{copy::copy_volume, linux::LinuxConnector};

pub trait DeviceConnector: Debug + Send + Sync {
    /// The connector record describing the local host's initiators.
    fn local_connector(&self) -> DriverResult<Connector>;

    /// Scan in the LUN described by the connection properties and return
    /// the path of its block device.
    fn connect_volume(&self, info: &ConnectionInfo) -> DriverResult<PathBuf>;

    /// Release a device obtained from connect_volume.
    fn disconnect_volume(&self, info: &ConnectionInfo, device: &Path) -> DriverResult<()>;

    /// Copy size_mb MiB from src to dest in blocks of block_size bytes.
    fn copy_volume(
        &self,
        src: &Path,
        dest: &Path,
        size_mb: u64,
        block_size: u64,
    ) -> DriverResult<()> {
        copy_volume(src, dest, size_mb, block_size)
    }
}
