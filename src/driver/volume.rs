// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt::Debug;

use crate::{
    driver::types::{
        ConnectionInfo, Connector, CreateAction, DeleteAction, ExistingRef, RenameAction,
        Snapshot, Volume, VolumeStats,
    },
    flashsys::errors::DriverResult,
};

/// The operations a block-storage service asks of a backend.
pub trait VolumeDriver: Debug + Send + Sync {
    /// Learn about the array: its identity and the target ports hosts
    /// connect to.
    fn do_setup(&self) -> DriverResult<()>;

    /// Verify that setup found everything the driver needs.
    fn check_for_setup_error(&self) -> DriverResult<()>;

    /// Create the vdisk backing the volume. Returns the vdisk id.
    fn create_volume(&self, volume: &Volume) -> DriverResult<CreateAction<u32>>;

    fn delete_volume(&self, volume: &Volume) -> DriverResult<DeleteAction<String>>;

    /// Grow the volume to new_size GiB.
    fn extend_volume(&self, volume: &Volume, new_size: u64) -> DriverResult<()>;

    fn create_snapshot(&self, snapshot: &Snapshot) -> DriverResult<()>;

    fn delete_snapshot(&self, snapshot: &Snapshot) -> DriverResult<DeleteAction<String>>;

    fn create_volume_from_snapshot(&self, volume: &Volume, snapshot: &Snapshot)
        -> DriverResult<()>;

    fn create_cloned_volume(&self, volume: &Volume, src: &Volume) -> DriverResult<()>;

    /// Map the volume to the connector's host and return what the host
    /// needs to attach it.
    fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> DriverResult<ConnectionInfo>;

    /// Remove the volume's mapping to the connector's host.
    fn terminate_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
        force: bool,
    ) -> DriverResult<Option<ConnectionInfo>>;

    /// Bring an existing vdisk under management by giving it the volume's
    /// name.
    fn manage_existing(
        &self,
        volume: &Volume,
        existing_ref: &ExistingRef,
    ) -> DriverResult<RenameAction<String>>;

    /// Size in whole GiB of a vdisk that is to be managed.
    fn manage_existing_get_size(
        &self,
        volume: &Volume,
        existing_ref: &ExistingRef,
    ) -> DriverResult<u64>;

    fn unmanage(&self, volume: &Volume) -> DriverResult<()>;

    /// Backend statistics, recomputed if refresh is set or nothing is
    /// cached.
    fn get_volume_stats(&self, refresh: bool) -> DriverResult<VolumeStats>;
}
