// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::{Mutex, RwLock};

use crate::{
    driver::{
        connector::{DeviceConnector, LinuxConnector},
        flashsystem::{
            array::{Array, SizeUnit},
            cmd::{CliExecutor, SshExecutor},
            consts::SNAPSHOT_SOURCE_STATUSES,
            copy::CopyLock,
            mapping::{HostMapper, Unmapped},
            protocol::{hooks_for, ProtocolHooks, TargetPorts},
            records::VdiskInfo,
            stats::build_stats,
        },
        types::{
            bytes_to_gib_ceil, ConnectionInfo, Connector, CreateAction, DeleteAction,
            ExistingRef, MappingCreateAction, MappingDeleteAction, RenameAction, Snapshot,
            Volume, VolumeStats, GIB,
        },
        volume::VolumeDriver,
    },
    flashsys::{
        config::FlashSystemConfig,
        errors::{DriverError, DriverResult},
    },
};

/// What setup learned about the array.
#[derive(Debug, Default)]
struct BackendState {
    system_name: Option<String>,
    system_id: Option<String>,
    node_count: usize,
    targets: TargetPorts,
}

/// Volume driver for a FlashSystem array.
#[derive(Debug)]
pub struct FlashSystemDriver {
    pub(super) config: FlashSystemConfig,
    pub(super) array: Array,
    pub(super) hooks: Box<dyn ProtocolHooks>,
    pub(super) connector: Box<dyn DeviceConnector>,
    pub(super) copies: CopyLock,
    map_lock: Mutex<()>,
    unmap_lock: Mutex<()>,
    backend: RwLock<BackendState>,
    stats: Mutex<Option<VolumeStats>>,
}

impl FlashSystemDriver {
    pub fn new(
        config: FlashSystemConfig,
        executor: Box<dyn CliExecutor>,
        connector: Box<dyn DeviceConnector>,
    ) -> DriverResult<FlashSystemDriver> {
        config.validate()?;
        let hooks = hooks_for(&config);
        hooks.check_params(&config)?;
        Ok(FlashSystemDriver {
            array: Array::new(executor, &config.flashsystem_volpool_name),
            hooks,
            connector,
            copies: CopyLock::new(config.copy_wait_log_interval()),
            map_lock: Mutex::new(()),
            unmap_lock: Mutex::new(()),
            backend: RwLock::new(BackendState::default()),
            stats: Mutex::new(None),
            config,
        })
    }

    /// A driver reaching the array over SSH and attaching LUNs through the
    /// local SCSI stack.
    pub fn from_config(config: FlashSystemConfig) -> DriverResult<FlashSystemDriver> {
        let executor = SshExecutor::new(&config)?;
        FlashSystemDriver::new(config, Box::new(executor), Box::new(LinuxConnector::new()))
    }

    pub fn config(&self) -> &FlashSystemConfig {
        &self.config
    }

    pub fn array(&self) -> &Array {
        &self.array
    }

    pub fn device_connector(&self) -> &dyn DeviceConnector {
        self.connector.as_ref()
    }

    /// Vdisks currently taking part in a copy.
    pub fn copies_in_progress(&self) -> DriverResult<Vec<String>> {
        self.copies.in_progress()
    }

    fn mapper(&self) -> HostMapper<'_> {
        HostMapper::new(
            &self.array,
            self.hooks.as_ref(),
            self.config.flashsystem_multihostmap_enabled,
        )
    }

    pub(super) fn map_vdisk_to_host(
        &self,
        vdisk: &str,
        connector: &Connector,
    ) -> DriverResult<MappingCreateAction<u32>> {
        let _lock = self.map_lock.lock()?;
        self.mapper().map_vdisk(vdisk, connector)
    }

    pub(super) fn unmap_vdisk_from_host(
        &self,
        vdisk: &str,
        connector: &Connector,
    ) -> DriverResult<MappingDeleteAction<Unmapped>> {
        let _lock = self.unmap_lock.lock()?;
        self.mapper().unmap_vdisk(vdisk, connector)
    }

    pub(super) fn connection_properties(
        &self,
        connector: &Connector,
        lun: u32,
        vdisk: &str,
    ) -> DriverResult<ConnectionInfo> {
        let backend = self.backend.read()?;
        self.hooks
            .map_properties(&backend.targets, connector, lun, vdisk)
    }

    fn existing_vdisk(&self, name: &str) -> DriverResult<VdiskInfo> {
        self.array.vdisk_attributes(name)?.ok_or_else(|| {
            DriverError::BackendApi(format!("Vdisk {name} does not exist on the array"))
        })
    }

    /// The vdisk an existing reference names, provided it may be managed.
    fn manageable_vdisk(&self, existing_ref: &ExistingRef) -> DriverResult<VdiskInfo> {
        let invalid = |reason: String| DriverError::ManageExistingInvalidReference {
            existing_ref: existing_ref.to_string(),
            reason,
        };

        let vdisk = self
            .array
            .vdisk_attributes(existing_ref.object())?
            .ok_or_else(|| invalid("the vdisk does not exist".to_string()))?;
        if !self.array.vdisk_mappings(&vdisk.name)?.is_empty() {
            return Err(invalid(format!(
                "vdisk {} is mapped to a host; unmap it first",
                vdisk.name
            )));
        }
        Ok(vdisk)
    }

    fn delete_vdisk(&self, name: &str) -> DriverResult<DeleteAction<String>> {
        self.copies.wait_until_idle(name)?;
        self.array.delete_vdisk(name, false)
    }
}

/// Size of the volume in bytes.
fn size_bytes(volume: &Volume) -> DriverResult<u64> {
    volume.size.checked_mul(GIB).ok_or_else(|| {
        DriverError::InvalidInput(format!(
            "Size {} GiB of volume {} is too large",
            volume.size, volume.name
        ))
    })
}

impl VolumeDriver for FlashSystemDriver {
    fn do_setup(&self) -> DriverResult<()> {
        let system = self.array.system_info()?;
        let nodes = self.array.nodes()?;
        let targets = self.hooks.node_setup(&self.array, &nodes)?;

        info!(
            "Array {} (id {}) has {} node(s); code level {}",
            system.name,
            system.id,
            nodes.len(),
            system.code_level.as_deref().unwrap_or("unknown")
        );

        let mut backend = self.backend.write()?;
        backend.system_name = Some(system.name);
        backend.system_id = Some(system.id);
        backend.node_count = nodes.len();
        backend.targets = targets;
        Ok(())
    }

    fn check_for_setup_error(&self) -> DriverResult<()> {
        let backend = self.backend.read()?;
        if backend.system_name.is_none() || backend.system_id.is_none() {
            return Err(DriverError::InvalidInput(
                "Unable to determine system name and id".to_string(),
            ));
        }
        if backend.node_count == 0 {
            return Err(DriverError::InvalidInput(
                "The array reports no nodes".to_string(),
            ));
        }
        if backend.targets.is_empty() {
            return Err(DriverError::InvalidInput(format!(
                "No usable {} target ports found on the array",
                self.hooks.protocol()
            )));
        }
        if self.config.san_password.is_none() && self.config.san_private_key.is_none() {
            return Err(DriverError::InvalidInput(
                "Password or SSH private key is required for authentication".to_string(),
            ));
        }
        self.hooks.check_params(&self.config)
    }

    fn create_volume(&self, volume: &Volume) -> DriverResult<CreateAction<u32>> {
        let size = size_bytes(volume)?;
        if let Some(existing) = self.array.vdisk_attributes(&volume.name)? {
            if existing.capacity == size {
                info!("Vdisk {} already exists with the requested size", volume.name);
                return Ok(CreateAction::Identity);
            }
            return Err(DriverError::BackendApi(format!(
                "Vdisk {} already exists with a capacity of {} bytes, not {} GiB",
                volume.name, existing.capacity, volume.size
            )));
        }
        self.array
            .create_vdisk(&volume.name, volume.size, SizeUnit::Gb)
            .map(CreateAction::Created)
    }

    fn delete_volume(&self, volume: &Volume) -> DriverResult<DeleteAction<String>> {
        self.delete_vdisk(&volume.name)
    }

    fn extend_volume(&self, volume: &Volume, new_size: u64) -> DriverResult<()> {
        if new_size <= volume.size {
            return Err(DriverError::InvalidInput(format!(
                "New size {new_size} GiB of volume {} must exceed its current size {} GiB",
                volume.name, volume.size
            )));
        }
        self.existing_vdisk(&volume.name)?;
        self.copies.wait_until_idle(&volume.name)?;
        self.array
            .expand_vdisk(&volume.name, new_size - volume.size)
    }

    fn create_snapshot(&self, snapshot: &Snapshot) -> DriverResult<()> {
        if !SNAPSHOT_SOURCE_STATUSES.contains(&snapshot.volume_status.as_str()) {
            return Err(DriverError::InvalidInput(format!(
                "Volume {} has status {}; snapshots may only be taken of volumes that are {}",
                snapshot.volume_name,
                snapshot.volume_status,
                SNAPSHOT_SOURCE_STATUSES.join(" or ")
            )));
        }
        self.create_and_copy_vdisk_data(&snapshot.volume_name, &snapshot.name, None)
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> DriverResult<DeleteAction<String>> {
        self.delete_vdisk(&snapshot.name)
    }

    fn create_volume_from_snapshot(
        &self,
        volume: &Volume,
        snapshot: &Snapshot,
    ) -> DriverResult<()> {
        if snapshot.volume_size > volume.size {
            return Err(DriverError::InvalidInput(format!(
                "Volume size {} GiB is smaller than the snapshot size {} GiB",
                volume.size, snapshot.volume_size
            )));
        }
        self.create_and_copy_vdisk_data(&snapshot.name, &volume.name, Some(size_bytes(volume)?))
    }

    fn create_cloned_volume(&self, volume: &Volume, src: &Volume) -> DriverResult<()> {
        if src.size > volume.size {
            return Err(DriverError::InvalidInput(format!(
                "Clone size {} GiB is smaller than the source volume size {} GiB",
                volume.size, src.size
            )));
        }
        self.create_and_copy_vdisk_data(&src.name, &volume.name, Some(size_bytes(volume)?))
    }

    fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> DriverResult<ConnectionInfo> {
        self.hooks.check_connector(connector)?;
        self.existing_vdisk(&volume.name)?;

        let action = self.map_vdisk_to_host(&volume.name, connector)?;
        debug!("Mapping of {} for {}: {action}", volume.name, connector.host);
        let lun = action.into_value();
        self.connection_properties(connector, lun, &volume.id.to_string())
            .map_err(|err| {
                DriverError::Chained(
                    format!(
                        "Failed to build connection properties for volume {}",
                        volume.name
                    ),
                    Box::new(err),
                )
            })
    }

    fn terminate_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
        force: bool,
    ) -> DriverResult<Option<ConnectionInfo>> {
        if force {
            debug!("Forced detach of volume {} from {}", volume.name, connector.host);
        }
        match self.unmap_vdisk_from_host(&volume.name, connector)? {
            MappingDeleteAction::Identity => Ok(None),
            MappingDeleteAction::Deleted(unmapped) => {
                let backend = self.backend.read()?;
                Ok(self
                    .hooks
                    .unmap_properties(&backend.targets, connector, &unmapped))
            }
        }
    }

    fn manage_existing(
        &self,
        volume: &Volume,
        existing_ref: &ExistingRef,
    ) -> DriverResult<RenameAction<String>> {
        let vdisk = self.manageable_vdisk(existing_ref)?;
        let action = self.array.rename_vdisk(&vdisk.name, &volume.name)?;
        info!("Manage {existing_ref} as volume {}: {action}", volume.name);
        Ok(action)
    }

    fn manage_existing_get_size(
        &self,
        _volume: &Volume,
        existing_ref: &ExistingRef,
    ) -> DriverResult<u64> {
        let vdisk = self.manageable_vdisk(existing_ref)?;
        Ok(bytes_to_gib_ceil(vdisk.capacity))
    }

    fn unmanage(&self, volume: &Volume) -> DriverResult<()> {
        info!(
            "Volume {} is no longer managed; vdisk left on the array",
            volume.name
        );
        Ok(())
    }

    fn get_volume_stats(&self, refresh: bool) -> DriverResult<VolumeStats> {
        let mut cached = self.stats.lock()?;
        if let (false, Some(stats)) = (refresh, cached.as_ref()) {
            return Ok(stats.clone());
        }
        let system = self.array.system_info()?;
        let stats = build_stats(&self.config, &system, self.hooks.protocol())?;
        *cached = Some(stats.clone());
        Ok(stats)
    }
}
