// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Host resolution and host-to-vdisk mapping.

use itertools::Itertools;

use crate::{
    driver::{
        flashsystem::{
            array::Array,
            consts::{CMMVC6045E, CMMVC6071E},
            protocol::ProtocolHooks,
        },
        types::{Connector, MappingCreateAction, MappingDeleteAction},
    },
    flashsys::errors::{DriverError, DriverResult},
};

/// The lowest LUN id, starting at 1, that is not in use.
pub fn next_free_lun<I>(used: I) -> u32
where
    I: IntoIterator<Item = u32>,
{
    let mut candidate = 1;
    for lun in used.into_iter().filter(|l| *l >= 1).sorted_unstable().dedup() {
        if lun > candidate {
            break;
        }
        candidate = lun + 1;
    }
    candidate
}

/// What an unmap did to the host side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Unmapped {
    pub host: String,
    /// The host had no mappings left and was removed.
    pub host_deleted: bool,
}

/// Resolves hosts for connectors and manages their vdisk mappings.
#[derive(Debug)]
pub struct HostMapper<'a> {
    array: &'a Array,
    hooks: &'a dyn ProtocolHooks,
    multihostmap: bool,
}

impl<'a> HostMapper<'a> {
    pub fn new(array: &'a Array, hooks: &'a dyn ProtocolHooks, multihostmap: bool) -> Self {
        HostMapper {
            array,
            hooks,
            multihostmap,
        }
    }

    /// Find the host object whose ports match the connector. Every host is
    /// examined in turn; nothing is cached.
    pub fn get_host_from_connector(&self, connector: &Connector) -> DriverResult<Option<String>> {
        let hosts = self.array.list_hosts()?;
        let found = self
            .hooks
            .find_host_exhaustive(self.array, connector, &hosts)?;
        match found {
            Some(ref host) => debug!("Connector for {} resolved to host {host}", connector.host),
            None => debug!("No host found for connector of {}", connector.host),
        }
        Ok(found)
    }

    /// Map the vdisk to the connector's host, creating the host if needed.
    /// A vdisk already mapped to that host keeps its LUN id.
    pub fn map_vdisk(&self, vdisk: &str, connector: &Connector) -> DriverResult<MappingCreateAction<u32>> {
        let host = match self.get_host_from_connector(connector)? {
            Some(host) => host,
            None => self.hooks.create_host(self.array, connector)?,
        };

        let mappings = self.array.host_mappings(&host)?;
        if let Some(existing) = mappings.iter().find(|m| m.vdisk_name == vdisk) {
            info!(
                "Vdisk {vdisk} is already mapped to host {host} with LUN id {}",
                existing.scsi_id
            );
            return Ok(MappingCreateAction::Identity(existing.scsi_id));
        }

        let lun = next_free_lun(mappings.iter().map(|m| m.scsi_id));
        match self.array.create_mapping(&host, vdisk, lun, false) {
            Ok(()) => Ok(MappingCreateAction::Created(lun)),
            Err(err) if err.has_cli_code(CMMVC6045E) || err.has_cli_code(CMMVC6071E) => {
                if !self.multihostmap {
                    return Err(DriverError::BackendApi(format!(
                        "Vdisk {vdisk} is already mapped to another host and multi-host mapping is disabled: {}",
                        err.stderr().unwrap_or_default().trim()
                    )));
                }
                warn!("Vdisk {vdisk} is mapped to another host; forcing an additional mapping to {host}");
                self.array
                    .create_mapping(&host, vdisk, lun, true)
                    .map_err(|err| {
                        DriverError::Chained(
                            format!("Failed to force mapping of vdisk {vdisk} to host {host}"),
                            Box::new(err),
                        )
                    })?;
                Ok(MappingCreateAction::Forced(lun))
            }
            Err(err) => Err(DriverError::Chained(
                format!("Failed to map vdisk {vdisk} to host {host}"),
                Box::new(err),
            )),
        }
    }

    /// Remove the mapping of the vdisk to the connector's host, then remove
    /// the host if nothing else is mapped to it.
    pub fn unmap_vdisk(&self, vdisk: &str, connector: &Connector) -> DriverResult<MappingDeleteAction<Unmapped>> {
        let host = match self.get_host_from_connector(connector)? {
            Some(host) => host,
            None => {
                warn!(
                    "No host found for connector of {}; vdisk {vdisk} is not mapped to it",
                    connector.host
                );
                return Ok(MappingDeleteAction::Identity);
            }
        };

        let mapped_hosts = self.array.vdisk_mappings(vdisk)?;
        if !mapped_hosts.iter().any(|m| m.host_name == host) {
            warn!("Vdisk {vdisk} is not mapped to host {host}; nothing to unmap");
            return Ok(MappingDeleteAction::Identity);
        }

        self.array.delete_mapping(&host, vdisk)?;

        let host_deleted = if self.array.host_mappings(&host)?.is_empty() {
            self.array.delete_host(&host)?;
            true
        } else {
            false
        };

        Ok(MappingDeleteAction::Deleted(Unmapped { host, host_deleted }))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn lun_allocation_examples() {
        assert_eq!(next_free_lun(Vec::new()), 1);
        assert_eq!(next_free_lun(vec![1, 2, 3]), 4);
        assert_eq!(next_free_lun(vec![2, 3]), 1);
        assert_eq!(next_free_lun(vec![3, 1]), 2);
        assert_eq!(next_free_lun(vec![1, 1, 2]), 3);
        assert_eq!(next_free_lun(vec![0, 1]), 2);
    }

    #[test]
    fn sequential_allocations_fill_range() {
        let mut used = Vec::new();
        for _ in 0..16 {
            used.push(next_free_lun(used.clone()));
        }
        assert_eq!(used, (1..=16).collect::<Vec<u32>>());
    }

    proptest! {
        #[test]
        /// The chosen LUN is unused, at least 1, and every smaller id
        /// is taken.
        fn lun_is_lowest_gap(used in proptest::collection::vec(0u32..64, 0..48)) {
            let lun = next_free_lun(used.clone());
            prop_assert!(lun >= 1);
            prop_assert!(!used.contains(&lun));
            for smaller in 1..lun {
                prop_assert!(used.contains(&smaller));
            }
        }
    }
}
