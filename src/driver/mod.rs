// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub mod connector;
pub mod flashsystem;
pub mod sim;
mod types;
mod volume;

pub use self::{
    connector::{DeviceConnector, LinuxConnector},
    flashsystem::FlashSystemDriver,
    sim::{SimArray, SimConnector},
    types::{
        bytes_to_gib_ceil, ConnectionInfo, Connector, CreateAction, DeleteAction, DriverAction,
        ExistingRef, MappingCreateAction, MappingDeleteAction, Protocol, RenameAction, Snapshot,
        Volume, VolumeStats, GIB, MIB,
    },
    volume::VolumeDriver,
};
