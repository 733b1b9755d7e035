// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde_json::{json, Map, Value};

use crate::{
    driver::{
        flashsystem::{
            array::{Array, HostPorts},
            host::new_host_name,
            mapping::Unmapped,
            protocol::{ProtocolHooks, TargetPorts},
            records::{HostInfo, NodeSummary},
        },
        types::{ConnectionInfo, Connector, Protocol},
    },
    flashsys::{
        config::FlashSystemConfig,
        errors::{DriverError, DriverResult},
    },
};

const DRIVER_VOLUME_TYPE: &str = "fibre_channel";

#[derive(Debug)]
pub struct FcHooks;

impl FcHooks {
    fn initiator_target_map(targets: &TargetPorts, connector: &Connector) -> Value {
        let map = connector
            .wwpns
            .iter()
            .map(|initiator| (initiator.clone(), json!(targets.wwpns)))
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }
}

impl ProtocolHooks for FcHooks {
    fn protocol(&self) -> Protocol {
        Protocol::Fc
    }

    fn check_params(&self, config: &FlashSystemConfig) -> DriverResult<()> {
        if config.flashsystem_connection_protocol != Protocol::Fc {
            return Err(DriverError::InvalidInput(format!(
                "FC hooks used with protocol {}",
                config.flashsystem_connection_protocol
            )));
        }
        Ok(())
    }

    fn check_connector(&self, connector: &Connector) -> DriverResult<()> {
        if connector.wwpns.is_empty() {
            return Err(DriverError::InvalidInput(format!(
                "Connector of {} has no WWPNs; FC connections need at least one",
                connector.host
            )));
        }
        Ok(())
    }

    fn create_host(&self, array: &Array, connector: &Connector) -> DriverResult<String> {
        self.check_connector(connector)?;
        let name = new_host_name(connector)?;
        array.create_host(&name, HostPorts::Wwpns(&connector.wwpns))?;
        Ok(name)
    }

    fn host_matches(&self, host: &HostInfo, connector: &Connector) -> bool {
        host.wwpns.iter().any(|hw| {
            connector
                .wwpns
                .iter()
                .any(|cw| hw.eq_ignore_ascii_case(cw))
        })
    }

    fn node_setup(&self, array: &Array, nodes: &[NodeSummary]) -> DriverResult<TargetPorts> {
        let mut wwpns = Vec::new();
        for node in nodes.iter().filter(|n| n.is_online()) {
            let detail = array.node_detail(&node.id)?;
            let active = detail.active_wwpns();
            if active.is_empty() {
                warn!("Node {} has no active FC ports", node.name);
            }
            wwpns.extend(active);
        }
        debug!("FC target WWPNs: {}", wwpns.join(", "));
        Ok(TargetPorts {
            wwpns,
            iscsi: Vec::new(),
        })
    }

    fn map_properties(
        &self,
        targets: &TargetPorts,
        connector: &Connector,
        lun: u32,
        volume_id: &str,
    ) -> DriverResult<ConnectionInfo> {
        if targets.wwpns.is_empty() {
            return Err(DriverError::BackendApi(
                "No active FC target ports are known for the array".to_string(),
            ));
        }

        let mut data = Map::new();
        data.insert("target_discovered".to_string(), json!(false));
        data.insert("target_lun".to_string(), json!(lun));
        data.insert("target_wwn".to_string(), json!(targets.wwpns));
        data.insert(
            "initiator_target_map".to_string(),
            Self::initiator_target_map(targets, connector),
        );
        data.insert("volume_id".to_string(), json!(volume_id));
        Ok(ConnectionInfo {
            driver_volume_type: DRIVER_VOLUME_TYPE,
            data,
        })
    }

    fn unmap_properties(
        &self,
        targets: &TargetPorts,
        connector: &Connector,
        unmapped: &Unmapped,
    ) -> Option<ConnectionInfo> {
        // Zoning may be torn down only once the host is gone.
        if !unmapped.host_deleted {
            return None;
        }
        let mut data = Map::new();
        data.insert("target_wwn".to_string(), json!(targets.wwpns));
        data.insert(
            "initiator_target_map".to_string(),
            Self::initiator_target_map(targets, connector),
        );
        Some(ConnectionInfo {
            driver_volume_type: DRIVER_VOLUME_TYPE,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> Connector {
        Connector {
            host: "compute-1".to_string(),
            wwpns: vec!["10000090fa0a0b0c".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn wwpn_match_ignores_case() {
        let host = HostInfo {
            id: 1,
            name: "compute-1-00000001".to_string(),
            wwpns: vec!["10000090FA0A0B0C".to_string()],
            iscsi_names: Vec::new(),
        };
        assert!(FcHooks.host_matches(&host, &connector()));
    }

    #[test]
    fn properties_carry_targets() {
        let targets = TargetPorts {
            wwpns: vec!["500507680210DE01".to_string()],
            iscsi: Vec::new(),
        };
        let info = FcHooks
            .map_properties(&targets, &connector(), 3, "vol-id")
            .unwrap();
        assert_eq!(info.driver_volume_type, "fibre_channel");
        assert_eq!(info.target_lun(), Some(3));
        assert_eq!(
            info.data["initiator_target_map"]["10000090fa0a0b0c"],
            json!(["500507680210DE01"])
        );
    }

    #[test]
    fn unmap_reports_only_when_host_removed() {
        let targets = TargetPorts::default();
        let kept = Unmapped {
            host: "h".to_string(),
            host_deleted: false,
        };
        assert!(FcHooks
            .unmap_properties(&targets, &connector(), &kept)
            .is_none());
        let removed = Unmapped {
            host_deleted: true,
            ..kept
        };
        assert!(FcHooks
            .unmap_properties(&targets, &connector(), &removed)
            .is_some());
    }

    #[test]
    fn connector_needs_wwpns() {
        let mut c = connector();
        c.wwpns.clear();
        assert!(FcHooks.check_connector(&c).is_err());
    }
}
